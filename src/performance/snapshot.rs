// Display snapshot - Read-only view of the performance for periodic refresh

use crate::sequencer::run_mode::RunMode;
use crate::sequencer::timeline::BeatPosition;
use crate::sync::{LinkStatus, SyncRole};

/// One occupied slot of the current bank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub slot: usize,
    pub name: String,
    pub playing: bool,
    /// Target of a deferred toggle not yet applied
    pub pending: Option<bool>,
    pub in_edit: bool,
    pub length_ticks: u64,
}

/// Everything the display layer draws on a refresh
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub run_mode: RunMode,
    pub tick: u64,
    pub bpm: f64,
    pub beat: BeatPosition,
    pub current_bank: usize,
    pub bank_name: String,
    pub bank_notepad: String,
    /// One entry per slot of the current bank, None for empty slots
    pub slots: Vec<Option<SlotView>>,
    pub song_recording: bool,
    pub modified: bool,
    pub sync_role: SyncRole,
    pub link_status: LinkStatus,
}

impl DisplaySnapshot {
    pub fn playing_count(&self) -> usize {
        self.slots.iter().flatten().filter(|s| s.playing).count()
    }

    pub fn slot(&self, slot: usize) -> Option<&SlotView> {
        self.slots.iter().flatten().find(|s| s.slot == slot)
    }
}
