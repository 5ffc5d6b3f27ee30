// Slot grid - Fixed-size array of pattern slots, grouped into banks

use super::PerformanceError;
use crate::sequencer::pattern::Pattern;
use std::ops::Range;

/// Number of banks and slots per bank, fixed at construction
/// Both are at least 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    bank_count: usize,
    bank_capacity: usize,
}

impl GridLayout {
    pub fn new(bank_count: usize, bank_capacity: usize) -> Self {
        Self {
            bank_count: bank_count.max(1),
            bank_capacity: bank_capacity.max(1),
        }
    }

    pub fn bank_count(&self) -> usize {
        self.bank_count
    }

    pub fn bank_capacity(&self) -> usize {
        self.bank_capacity
    }

    pub fn total_slots(&self) -> usize {
        self.bank_count * self.bank_capacity
    }

    /// Slot range covered by `bank`
    pub fn bank_slots(&self, bank: usize) -> Range<usize> {
        let start = bank * self.bank_capacity;
        start..start + self.bank_capacity
    }
}

impl Default for GridLayout {
    /// 32 banks of 32 slots
    fn default() -> Self {
        Self::new(32, 32)
    }
}

/// Slot index -> optional pattern
#[derive(Debug, Clone)]
pub struct SlotGrid {
    layout: GridLayout,
    slots: Vec<Option<Pattern>>,
}

impl SlotGrid {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            slots: (0..layout.total_slots()).map(|_| None).collect(),
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn check(&self, slot: usize) -> Result<(), PerformanceError> {
        if slot < self.slots.len() {
            Ok(())
        } else {
            Err(PerformanceError::InvalidSlot(slot))
        }
    }

    /// False for empty and out-of-range slots
    pub fn is_active(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    pub fn get(&self, slot: usize) -> Option<&Pattern> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Pattern> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Place a pattern into an empty slot
    pub fn create(
        &mut self,
        slot: usize,
        pattern: Pattern,
    ) -> Result<&mut Pattern, PerformanceError> {
        self.check(slot)?;
        let entry = &mut self.slots[slot];
        if entry.is_some() {
            return Err(PerformanceError::SlotOccupied(slot));
        }
        Ok(entry.insert(pattern))
    }

    /// Take the pattern out of a slot. Empty slots yield None
    pub fn destroy(&mut self, slot: usize) -> Result<Option<Pattern>, PerformanceError> {
        self.check(slot)?;
        Ok(self.slots[slot].take())
    }

    /// Move `src` into `dst`. An occupied `dst` ends up in `src` (swap)
    pub fn move_pattern(&mut self, src: usize, dst: usize) -> Result<(), PerformanceError> {
        self.check(src)?;
        self.check(dst)?;

        match &self.slots[src] {
            None => return Err(PerformanceError::SlotEmpty(src)),
            Some(pattern) if pattern.is_in_edit() => return Err(PerformanceError::SlotInEdit(src)),
            Some(_) => {}
        }
        if src == dst {
            return Ok(());
        }
        if self.slots[dst].as_ref().is_some_and(Pattern::is_in_edit) {
            return Err(PerformanceError::SlotInEdit(dst));
        }

        self.slots.swap(src, dst);
        Ok(())
    }

    /// Empty every slot, returning the removed patterns with their slots
    pub fn clear(&mut self) -> Vec<(usize, Pattern)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.take().map(|p| (slot, p)))
            .collect()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &Pattern)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|p| (slot, p)))
    }

    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = (usize, &mut Pattern)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_mut().map(|p| (slot, p)))
    }
}
