//! Reply lines and the handful of reply shapes the modem core understands

use serde::{Deserialize, Serialize};

/// Reply lines of one executed command, final result code stripped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtResponse {
    lines: Vec<String>,
}

impl AtResponse {
    /// Create a response from its lines
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// All lines
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Line by 1-based number
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(String::as_str)
    }

    /// First line containing `keyword`
    pub fn line_by_kw(&self, keyword: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|line| line.contains(keyword))
    }

    /// Text following `keyword` on the first line that contains it
    pub fn value_after(&self, keyword: &str) -> Option<&str> {
        let line = self.line_by_kw(keyword)?;
        let start = line.find(keyword)? + keyword.len();
        Some(line[start..].trim())
    }
}

/// EPS registration status reported by `+CEREG`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Not registered, not searching
    NotRegistered,
    /// Registered on the home network
    Home,
    /// Searching for an operator
    Searching,
    /// Registration denied
    Denied,
    /// Unknown
    Unknown,
    /// Registered, roaming
    Roaming,
    /// Any other code
    Other(u8),
}

impl RegistrationStatus {
    /// Map a `<stat>` code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotRegistered,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            4 => Self::Unknown,
            5 => Self::Roaming,
            other => Self::Other(other),
        }
    }

    /// Home or roaming registration means the link is usable
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// `0` and `99` both mean the modem has no signal reading yet
pub fn is_valid_rssi(rssi: u8) -> bool {
    rssi != 0 && rssi != 99
}

fn first_token(value: &str) -> Option<&str> {
    value
        .split_whitespace()
        .next()
        .map(|token| token.trim_matches('"'))
        .filter(|token| !token.is_empty())
}

/// `+CSQ: <rssi>,<ber>` → rssi
pub fn parse_csq(resp: &AtResponse) -> Option<u8> {
    resp.value_after("+CSQ:")?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// `+CEREG: <n>,<stat>[,...]` → stat
pub fn parse_cereg_stat(resp: &AtResponse) -> Option<u8> {
    resp.value_after("+CEREG:")?
        .split(',')
        .nth(1)?
        .trim()
        .parse()
        .ok()
}

/// `+CGPADDR: <cid>,<address>` → address
pub fn parse_cgpaddr(resp: &AtResponse) -> Option<&str> {
    let (_, address) = resp.value_after("+CGPADDR:")?.split_once(',')?;
    first_token(address)
}

/// `+CGSN:<imei>` → imei
pub fn parse_cgsn(resp: &AtResponse) -> Option<&str> {
    first_token(resp.value_after("+CGSN:")?)
}

/// `+MDNS:<address>` → address
pub fn parse_mdns(resp: &AtResponse) -> Option<&str> {
    first_token(resp.value_after("+MDNS:")?)
}

/// `+NPING:<address>,<ttl>,<rtt>` → (address, ttl, rtt)
pub fn parse_nping(resp: &AtResponse) -> Option<(&str, u32, u32)> {
    let mut fields = resp.value_after("+NPING:")?.split(',').map(str::trim);
    let address = fields.next().filter(|a| !a.is_empty())?;
    let ttl = fields.next()?.parse().ok()?;
    let rtt = fields.next()?.parse().ok()?;
    Some((address, ttl, rtt))
}

/// Socket id reply of `AT+NSOCR`: the first purely numeric line
pub fn parse_socket_id(resp: &AtResponse) -> Option<i32> {
    resp.lines()
        .iter()
        .find_map(|line| line.trim().parse::<i32>().ok())
        .filter(|id| *id >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_lookup() {
        let resp = AtResponse::new(["", "+CSQ: 17,99"]);
        assert_eq!(resp.line(2), Some("+CSQ: 17,99"));
        assert_eq!(resp.line(0), None);
        assert_eq!(resp.line(3), None);
        assert_eq!(resp.line_by_kw("+CSQ:"), Some("+CSQ: 17,99"));
    }

    #[test]
    fn test_signal_and_registration() {
        assert_eq!(parse_csq(&AtResponse::new(["+CSQ: 17,99"])), Some(17));
        assert_eq!(parse_csq(&AtResponse::new(["+CSQ: x"])), None);
        assert!(is_valid_rssi(17));
        assert!(!is_valid_rssi(0));
        assert!(!is_valid_rssi(99));

        assert_eq!(parse_cereg_stat(&AtResponse::new(["+CEREG: 0,5"])), Some(5));
        assert_eq!(
            parse_cereg_stat(&AtResponse::new(["+CEREG: 2,1,\"1A2B\",\"01A2B3C4\",9"])),
            Some(1)
        );
        assert_eq!(parse_cereg_stat(&AtResponse::new(["+CEREG: 0"])), None);
    }

    #[test]
    fn test_registered_codes() {
        let registered: Vec<u8> = (0..=10)
            .filter(|code| RegistrationStatus::from_code(*code).is_registered())
            .collect();
        assert_eq!(registered, vec![1, 5]);
    }

    #[test]
    fn test_address_replies() {
        assert_eq!(
            parse_cgpaddr(&AtResponse::new(["+CGPADDR: 0,10.1.2.3"])),
            Some("10.1.2.3")
        );
        assert_eq!(
            parse_cgpaddr(&AtResponse::new(["+CGPADDR: 0,\"10.1.2.3\""])),
            Some("10.1.2.3")
        );
        assert_eq!(parse_cgpaddr(&AtResponse::new(["+CGPADDR: 0"])), None);
        assert_eq!(
            parse_cgsn(&AtResponse::new(["+CGSN:863703030123456"])),
            Some("863703030123456")
        );
        assert_eq!(
            parse_mdns(&AtResponse::new(["+MDNS:93.184.216.34"])),
            Some("93.184.216.34")
        );
        assert_eq!(
            parse_nping(&AtResponse::new(["+NPING:93.184.216.34,52,1330"])),
            Some(("93.184.216.34", 52, 1330))
        );
    }

    #[test]
    fn test_socket_id() {
        assert_eq!(parse_socket_id(&AtResponse::new(["", "1"])), Some(1));
        assert_eq!(parse_socket_id(&AtResponse::new(["-1"])), None);
        assert_eq!(parse_socket_id(&AtResponse::default()), None);
    }
}
