use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAP: usize = 5;

/// Custom instructions the user has typed recently, most recent first.
/// Re-using an instruction moves it back to the front instead of storing it
/// twice.
#[derive(Debug, Clone)]
pub struct RecentInstructions {
    entries: VecDeque<String>,
    cap: usize,
}

impl Default for RecentInstructions {
    fn default() -> Self {
        Self::with_cap(DEFAULT_HISTORY_CAP)
    }
}

impl RecentInstructions {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn record(&mut self, instruction: &str) {
        let instruction = instruction.trim();
        if instruction.is_empty() || self.cap == 0 {
            return;
        }
        self.entries.retain(|e| e != instruction);
        self.entries.push_front(instruction.to_string());
        self.entries.truncate(self.cap);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
        self.entries.truncate(cap);
    }
}
