//! Slot table mapping socket handles to modem socket ids

use parking_lot::Mutex;
use serde::Serialize;

/// Number of socket slots
pub const SOCKET_SLOTS: usize = 7;

/// Local port of slot 0; slot `n` binds `LOCAL_PORT_BASE + n`
pub const LOCAL_PORT_BASE: u16 = 1024;

/// Longest dotted-quad address a slot stores
pub const MAX_IP_LEN: usize = 15;

/// Local port bound by `slot`
pub fn local_port(slot: u8) -> u16 {
    LOCAL_PORT_BASE + u16::from(slot)
}

/// One entry of the slot table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocketSlot {
    /// Caller-visible handle
    pub slot_index: u8,
    /// Modem socket id, `None` when free
    pub device_socket: Option<i32>,
    /// Remote address
    pub remote_ip: String,
    /// Remote port
    pub remote_port: u16,
}

impl SocketSlot {
    fn free(slot_index: u8) -> Self {
        Self {
            slot_index,
            ..Default::default()
        }
    }

    /// Check if the slot holds no socket
    pub fn is_free(&self) -> bool {
        self.device_socket.is_none()
    }
}

/// Fixed-size table of socket slots
///
/// The lock is never held across an await point.
pub struct SocketTable {
    slots: Mutex<[SocketSlot; SOCKET_SLOTS]>,
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTable {
    /// Create a table with every slot free
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|i| SocketSlot::free(i as u8))),
        }
    }

    /// Check if `slot` is a valid index
    pub fn is_valid(slot: u8) -> bool {
        usize::from(slot) < SOCKET_SLOTS
    }

    /// Copy of one slot
    pub fn get(&self, slot: u8) -> Option<SocketSlot> {
        self.slots.lock().get(usize::from(slot)).cloned()
    }

    /// Modem socket id held by `slot`
    pub fn device_socket(&self, slot: u8) -> Option<i32> {
        self.slots
            .lock()
            .get(usize::from(slot))
            .and_then(|s| s.device_socket)
    }

    /// Slot holding modem socket `id`
    pub fn slot_of(&self, id: i32) -> Option<u8> {
        if id < 0 {
            return None;
        }
        self.slots
            .lock()
            .iter()
            .find(|s| s.device_socket == Some(id))
            .map(|s| s.slot_index)
    }

    /// Store a connected socket in `slot`
    ///
    /// Any other slot still carrying `id` is freed so that an id maps to at
    /// most one slot.
    pub fn occupy(&self, slot: u8, id: i32, remote_ip: &str, remote_port: u16) {
        let mut slots = self.slots.lock();
        if usize::from(slot) >= SOCKET_SLOTS {
            return;
        }

        for stale in slots.iter_mut().filter(|s| s.device_socket == Some(id)) {
            *stale = SocketSlot::free(stale.slot_index);
        }

        slots[usize::from(slot)] = SocketSlot {
            slot_index: slot,
            device_socket: Some(id),
            remote_ip: remote_ip.chars().take(MAX_IP_LEN).collect(),
            remote_port,
        };
    }

    /// Free `slot`, returning the id it held
    pub fn release(&self, slot: u8) -> Option<i32> {
        let mut slots = self.slots.lock();
        let entry = slots.get_mut(usize::from(slot))?;
        let id = entry.device_socket;
        *entry = SocketSlot::free(slot);
        id
    }

    /// Free every slot
    pub fn reset(&self) {
        let mut slots = self.slots.lock();
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = SocketSlot::free(i as u8);
        }
    }

    /// Occupied slots
    pub fn occupied(&self) -> Vec<SocketSlot> {
        self.slots
            .lock()
            .iter()
            .filter(|s| !s.is_free())
            .cloned()
            .collect()
    }
}
