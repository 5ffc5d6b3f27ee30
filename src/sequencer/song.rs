// Song timeline - Automation of pattern play states
// Consulted by the tick pass only while the performance runs in song mode

/// Switch a slot on or off at a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub tick: u64,
    pub slot: usize,
    pub on: bool,
}

/// Ordered list of triggers
///
/// Sorted by ascending tick; triggers sharing a tick keep their insertion order.
#[derive(Debug, Clone, Default)]
pub struct SongTimeline {
    triggers: Vec<Trigger>,
}

impl SongTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trigger after every existing trigger at the same tick
    pub fn record_trigger(&mut self, tick: u64, slot: usize, on: bool) {
        let insert_pos = self.triggers.partition_point(|t| t.tick <= tick);
        self.triggers.insert(insert_pos, Trigger { tick, slot, on });
    }

    /// Triggers whose tick lies in `[from_tick, to_tick)`
    ///
    /// The returned iterator is lazy and can be cloned to restart it.
    pub fn triggers_due(&self, from_tick: u64, to_tick: u64) -> TriggersDue<'_> {
        let start = self.triggers.partition_point(|t| t.tick < from_tick);
        let end = self.triggers.partition_point(|t| t.tick < to_tick).max(start);
        TriggersDue {
            inner: self.triggers[start..end].iter(),
        }
    }

    /// Play state of `slot` after every trigger strictly before `tick`
    /// None if the slot has no trigger before that tick
    pub fn state_at(&self, slot: usize, tick: u64) -> Option<bool> {
        let end = self.triggers.partition_point(|t| t.tick < tick);
        self.triggers[..end]
            .iter()
            .rev()
            .find(|t| t.slot == slot)
            .map(|t| t.on)
    }

    /// Drop every trigger of a slot (its pattern was destroyed)
    pub fn remove_slot(&mut self, slot: usize) {
        self.triggers.retain(|t| t.slot != slot);
    }

    /// Exchange the triggers of two slots (their patterns were swapped)
    pub fn swap_slots(&mut self, a: usize, b: usize) {
        for trigger in &mut self.triggers {
            if trigger.slot == a {
                trigger.slot = b;
            } else if trigger.slot == b {
                trigger.slot = a;
            }
        }
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }
}

/// Lazy view over the triggers of a tick window
#[derive(Debug, Clone)]
pub struct TriggersDue<'a> {
    inner: std::slice::Iter<'a, Trigger>,
}

impl Iterator for TriggersDue<'_> {
    type Item = Trigger;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TriggersDue<'_> {}
