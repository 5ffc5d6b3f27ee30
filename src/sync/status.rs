// Sync status readable without the engine lock
// Link state and effective role are packed into one atomic, so a reader always
// sees a pair written together

use super::SyncRole;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// State of the connection to the external transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl LinkStatus {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => LinkStatus::Connecting,
            2 => LinkStatus::Connected,
            3 => LinkStatus::Error,
            _ => LinkStatus::Disconnected,
        }
    }
}

impl SyncRole {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => SyncRole::Follower,
            2 => SyncRole::Master,
            _ => SyncRole::Unsynced,
        }
    }

    fn bits(self) -> u8 {
        match self {
            SyncRole::Unsynced => 0,
            SyncRole::Follower => 1,
            SyncRole::Master => 2,
        }
    }
}

fn pack(link: LinkStatus, role: SyncRole) -> u8 {
    (role.bits() << 2) | link as u8
}

/// Link status and sync role, written by the transport sync, read by anyone
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    inner: Arc<AtomicU8>,
}

impl SyncStatus {
    pub fn get(&self) -> (LinkStatus, SyncRole) {
        let bits = self.inner.load(Ordering::Acquire);
        (LinkStatus::from_bits(bits), SyncRole::from_bits(bits >> 2))
    }

    pub fn link(&self) -> LinkStatus {
        self.get().0
    }

    pub fn role(&self) -> SyncRole {
        self.get().1
    }

    pub fn set(&self, link: LinkStatus, role: SyncRole) {
        self.inner.store(pack(link, role), Ordering::Release);
    }

    /// Change the role, keeping the link status
    pub fn set_role(&self, role: SyncRole) {
        self.set(self.link(), role);
    }
}
