// Banks (sets) - Named pages of the slot grid

/// Metadata of one bank. Storage stays in the slot grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub name: String,
    pub notepad: String,
}

impl Bank {
    pub fn new(index: usize) -> Self {
        Self {
            name: format!("Bank {}", index + 1),
            notepad: String::new(),
        }
    }
}

/// Wrap any integer onto `[0, bank_count)`
/// Negative indices wrap from the end: -1 is the last bank
pub fn normalize_bank_index(index: i64, bank_count: usize) -> usize {
    let count = bank_count.max(1) as i64;
    index.rem_euclid(count) as usize
}

pub(crate) fn default_banks(bank_count: usize) -> Vec<Bank> {
    (0..bank_count).map(Bank::new).collect()
}
