//! Simulated modem
//!
//! A scriptable in-process modem that answers AT commands from a rule list,
//! keeps a raw receive buffer for inline frames and owns a URC table. It
//! implements every channel interface the modem core needs, which makes it
//! the stand-in for real hardware in tests and in the CLI demo.

use super::codec::encode_upper;
use super::power::PowerPin;
use super::transport::{
    route, AtResponse, AtTransport, RawReader, TransportError, UrcEntry, UrcRouter,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::time::Duration;

/// Command selector of a rule
#[derive(Debug, Clone)]
pub enum CommandMatch {
    /// Whole command
    Exact(String),
    /// Command prefix
    Prefix(String),
    /// Regular expression
    Regex(Regex),
}

impl CommandMatch {
    /// Match the whole command
    pub fn exact(command: &str) -> Self {
        Self::Exact(command.to_string())
    }

    /// Match a command prefix
    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }

    /// Match a regular expression
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Check if `command` is selected
    pub fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact(expected) => command == expected,
            Self::Prefix(prefix) => command.starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(command),
        }
    }
}

/// Scripted answer to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimReply {
    /// Final `OK` preceded by these lines
    Ok(Vec<String>),
    /// Final `ERROR`
    Error,
    /// Silence until the caller's timeout
    NoReply,
    /// Bytes placed on the raw stream, for replies read inline
    Raw(Vec<u8>),
    /// Allocate the next socket id and answer with it
    NextSocketId,
}

impl SimReply {
    /// Bare `OK`
    pub fn ok() -> Self {
        Self::Ok(Vec::new())
    }

    /// `OK` with reply lines
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ok(lines.into_iter().map(Into::into).collect())
    }
}

struct Rule {
    condition: CommandMatch,
    script: VecDeque<SimReply>,
    fallback: Option<SimReply>,
}

#[derive(Default)]
struct Inner {
    rules: Vec<Rule>,
    history: Vec<String>,
    raw: VecDeque<u8>,
    urc_table: Vec<UrcEntry>,
    next_socket_id: i32,
    latency: Duration,
}

impl Inner {
    fn reply_for(&mut self, command: &str) -> SimReply {
        let reply = self
            .rules
            .iter_mut()
            .rev()
            .filter(|rule| rule.condition.matches(command))
            .find_map(|rule| rule.script.pop_front().or_else(|| rule.fallback.clone()))
            .unwrap_or(SimReply::Error);

        match reply {
            SimReply::NextSocketId => {
                let id = self.next_socket_id;
                self.next_socket_id += 1;
                SimReply::lines([String::new(), id.to_string()])
            }
            other => other,
        }
    }
}

/// Scriptable modem
#[derive(Default)]
pub struct SimulatedModem {
    inner: Mutex<Inner>,
}

impl SimulatedModem {
    /// Modem with no rules; every command fails
    pub fn new() -> Self {
        Self::default()
    }

    /// Modem that attaches on the first try and serves sockets
    pub fn healthy() -> Self {
        let sim = Self::new();
        sim.on(CommandMatch::exact("AT"), SimReply::ok());
        sim.on(CommandMatch::exact("AT+NRB"), SimReply::NoReply);
        sim.on(
            CommandMatch::exact("AT+NCCID?"),
            SimReply::lines(["+NCCID:89860317492047812345"]),
        );
        sim.on(CommandMatch::prefix("AT+CPSMS="), SimReply::ok());
        sim.on(CommandMatch::prefix("AT+CEDRXS="), SimReply::ok());
        sim.on(CommandMatch::exact("AT+CSQ"), SimReply::lines(["+CSQ: 17,99"]));
        sim.on(CommandMatch::exact("AT+CEREG?"), SimReply::lines(["+CEREG: 0,1"]));
        sim.on(
            CommandMatch::exact("AT+CGPADDR=0"),
            SimReply::lines(["+CGPADDR: 0,10.0.0.7"]),
        );
        sim.on(
            CommandMatch::exact("AT+CGSN=1"),
            SimReply::lines(["+CGSN:123456789012345"]),
        );
        sim.on(CommandMatch::prefix("AT+NSOCR="), SimReply::NextSocketId);
        sim.on(CommandMatch::prefix("AT+NSOCO="), SimReply::ok());
        sim.on(CommandMatch::prefix("AT+NSOSD="), SimReply::ok());
        sim.on(CommandMatch::prefix("AT+NSOST="), SimReply::ok());
        sim.on(CommandMatch::prefix("AT+NSOCL="), SimReply::ok());
        sim.on(
            CommandMatch::prefix("AT+MDNS="),
            SimReply::lines(["+MDNS:93.184.216.34"]),
        );
        sim.on(
            CommandMatch::prefix("AT+NPING="),
            SimReply::lines(["+NPING:93.184.216.34,52,1330"]),
        );
        sim
    }

    /// Answer matching commands with `reply` from now on
    ///
    /// Later rules take precedence over earlier ones.
    pub fn on(&self, condition: CommandMatch, reply: SimReply) {
        self.inner.lock().rules.push(Rule {
            condition,
            script: VecDeque::new(),
            fallback: Some(reply),
        });
    }

    /// Answer the next matching commands with `replies`, one each
    ///
    /// Once the script runs out, earlier rules answer again.
    pub fn on_sequence(&self, condition: CommandMatch, replies: Vec<SimReply>) {
        self.inner.lock().rules.push(Rule {
            condition,
            script: replies.into(),
            fallback: None,
        });
    }

    /// Delay answered commands by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Every command received, oldest first
    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().history.clone()
    }

    /// Number of received commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    /// Forget received commands
    pub fn clear_history(&self) {
        self.inner.lock().history.clear();
    }

    /// Append bytes to the raw receive stream
    pub fn push_raw(&self, data: &[u8]) {
        self.inner.lock().raw.extend(data.iter().copied());
    }

    /// Bytes waiting on the raw stream
    pub fn raw_pending(&self) -> usize {
        self.inner.lock().raw.len()
    }

    /// Prefixes of the installed URC table
    pub fn urc_prefixes(&self) -> Vec<&'static str> {
        self.inner.lock().urc_table.iter().map(|e| e.prefix).collect()
    }

    /// Deliver an unsolicited line to the installed handler
    ///
    /// Returns `false` when no entry matches.
    pub async fn inject_urc(&self, line: &str) -> bool {
        let handler = {
            let inner = self.inner.lock();
            route(&inner.urc_table, line).map(|entry| entry.handler.clone())
        };

        match handler {
            Some(handler) => {
                handler.on_urc(line).await;
                true
            }
            None => false,
        }
    }

    /// Announce `payload` on socket `id` and serve it on the next read command
    pub async fn deliver(&self, id: i32, ip: &str, port: u16, payload: &[u8]) -> bool {
        self.on_sequence(
            CommandMatch::prefix(&format!("AT+NSORF={id},")),
            vec![SimReply::Raw(Self::data_frame(id, ip, port, payload))],
        );
        self.inject_urc(&format!("+NSONMI:{id},{}", payload.len())).await
    }

    /// Inline frame as the modem emits it after `AT+NSORF`
    ///
    /// The trailing `OK` belongs to the response matcher and is not included.
    pub fn data_frame(id: i32, ip: &str, port: u16, payload: &[u8]) -> Vec<u8> {
        format!(
            "{id},{ip},{port},{},{}\r\n",
            payload.len(),
            encode_upper(payload)
        )
        .into_bytes()
    }
}

#[async_trait]
impl AtTransport for SimulatedModem {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<AtResponse, TransportError> {
        let (reply, latency) = {
            let mut inner = self.inner.lock();
            inner.history.push(command.to_string());
            (inner.reply_for(command), inner.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match reply {
            SimReply::Ok(lines) => Ok(AtResponse::new(lines)),
            SimReply::Error => Err(TransportError::CommandFailed("ERROR".to_string())),
            SimReply::NoReply | SimReply::NextSocketId => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
            SimReply::Raw(data) => {
                self.push_raw(&data);
                Ok(AtResponse::default())
            }
        }
    }

    async fn send_command(&self, command: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.history.push(command.to_string());
        if let SimReply::Raw(data) = inner.reply_for(command) {
            inner.raw.extend(data);
        }
        Ok(())
    }
}

#[async_trait]
impl RawReader for SimulatedModem {
    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let n = {
            let mut inner = self.inner.lock();
            let n = buf.len().min(inner.raw.len());
            for (slot, byte) in buf.iter_mut().zip(inner.raw.drain(..n)) {
                *slot = byte;
            }
            n
        };

        if n < buf.len() {
            tokio::time::sleep(timeout).await;
        }
        Ok(n)
    }
}

impl UrcRouter for SimulatedModem {
    fn set_urc_table(&self, table: Vec<UrcEntry>) {
        self.inner.lock().urc_table = table;
    }

    fn clear_urc_table(&self) {
        self.inner.lock().urc_table.clear();
    }
}

/// Power pin that records the levels it is driven to
#[derive(Debug, Default)]
pub struct SimulatedPin {
    levels: Mutex<Vec<bool>>,
}

impl SimulatedPin {
    /// Create a pin
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level, `None` if never driven
    pub fn level(&self) -> Option<bool> {
        self.levels.lock().last().copied()
    }

    /// Every level written, oldest first
    pub fn history(&self) -> Vec<bool> {
        self.levels.lock().clone()
    }
}

impl PowerPin for SimulatedPin {
    fn set_level(&self, high: bool) {
        self.levels.lock().push(high);
    }
}
