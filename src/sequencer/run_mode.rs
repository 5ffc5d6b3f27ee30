// Run mode - Playback state machine and its lock-free mirror
// Stopped -> LiveRunning -> Stopped, Stopped -> SongRunning -> Stopped

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Run mode of the performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Stopped,
    /// Free-running: pattern play flags are driven by the user
    LiveRunning,
    /// Automated: the song timeline drives the play flags
    SongRunning,
}

/// Rejected run-mode edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid run mode transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunMode,
    pub to: RunMode,
}

impl RunMode {
    pub fn is_running(&self) -> bool {
        !matches!(self, RunMode::Stopped)
    }

    pub fn is_song(&self) -> bool {
        matches!(self, RunMode::SongRunning)
    }

    /// Mode entered by `start(song_mode)`
    pub fn running(song_mode: bool) -> Self {
        if song_mode {
            RunMode::SongRunning
        } else {
            RunMode::LiveRunning
        }
    }

    /// Apply a transition, rejecting edges that skip `Stopped`
    pub fn transition(self, to: RunMode) -> Result<RunMode, InvalidTransition> {
        match (self, to) {
            (RunMode::LiveRunning, RunMode::SongRunning)
            | (RunMode::SongRunning, RunMode::LiveRunning) => {
                Err(InvalidTransition { from: self, to })
            }
            _ => Ok(to),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            RunMode::Stopped => 0,
            RunMode::LiveRunning => 1,
            RunMode::SongRunning => 2,
        }
    }
}

impl From<u8> for RunMode {
    fn from(value: u8) -> Self {
        match value {
            1 => RunMode::LiveRunning,
            2 => RunMode::SongRunning,
            _ => RunMode::Stopped,
        }
    }
}

/// Clock state readable without taking the engine lock
/// Written only by the engine, polled by the display layer
#[derive(Debug)]
pub struct SharedClockState {
    mode: AtomicU8,
    tick: AtomicU64,
    bpm_bits: AtomicU64,
}

impl SharedClockState {
    pub fn new(bpm: f64) -> Arc<Self> {
        Arc::new(Self {
            mode: AtomicU8::new(RunMode::Stopped.to_u8()),
            tick: AtomicU64::new(0),
            bpm_bits: AtomicU64::new(bpm.to_bits()),
        })
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::from(self.mode.load(Ordering::Acquire))
    }

    pub fn set_run_mode(&self, mode: RunMode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::Relaxed);
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
    }
}

impl Default for SharedClockState {
    fn default() -> Self {
        Self {
            mode: AtomicU8::new(0),
            tick: AtomicU64::new(0),
            bpm_bits: AtomicU64::new(120.0f64.to_bits()),
        }
    }
}
