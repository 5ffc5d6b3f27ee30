// Playback clock - Tick counter driven by elapsed time
// The only authority for "what time is it" while the performance runs

use super::timeline::Tempo;
use std::ops::Range;
use std::time::Duration;

/// Converts wall-clock time into ticks at the current tempo
///
/// Fractional ticks are carried between calls so uneven callback periods
/// never lose or duplicate ticks. Changing the tempo only changes the rate.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    tempo: Tempo,
    ppqn: u32,
    tick: u64,
    fraction: f64,
    running: bool,
}

impl PlaybackClock {
    pub fn new(tempo: Tempo, ppqn: u32) -> Self {
        Self {
            tempo,
            ppqn: ppqn.max(1),
            tick: 0,
            fraction: 0.0,
            running: false,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Change the rate without touching the tick counter
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
    }

    /// Jump to a tick, dropping any fractional carry
    pub fn reset(&mut self, tick: u64) {
        self.tick = tick;
        self.fraction = 0.0;
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.fraction = 0.0;
    }

    /// Advance by elapsed time. Returns the window of ticks covered, `[from, to)`
    /// The window is empty while the clock is stopped
    pub fn advance(&mut self, elapsed: Duration) -> Range<u64> {
        if !self.running {
            return self.tick..self.tick;
        }

        let rate = self.tempo.ticks_per_second(self.ppqn);
        let delta = elapsed.as_secs_f64() * rate + self.fraction;
        let whole = delta.floor();
        self.fraction = delta - whole;

        // `as` saturates for values past u64::MAX
        self.advance_ticks(whole as u64)
    }

    /// Advance by a whole number of ticks
    pub fn advance_ticks(&mut self, ticks: u64) -> Range<u64> {
        if !self.running {
            return self.tick..self.tick;
        }
        let from = self.tick;
        self.tick = self.tick.saturating_add(ticks);
        from..self.tick
    }

    /// Move to an externally given tick
    /// Returns the window crossed, empty when the target is not ahead
    pub fn jump_to(&mut self, tick: u64) -> Range<u64> {
        let from = self.tick;
        self.reset(tick);
        if tick > from { from..tick } else { tick..tick }
    }
}
