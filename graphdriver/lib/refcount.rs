use std::{collections::HashMap, sync::Mutex};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Counts outstanding `get` calls per layer id.
///
/// The count is advisory. Drivers use it to decide when a layer's mount can be released and
/// to log unbalanced `put` calls; the driver contract does not require callers to balance them.
#[derive(Debug, Default)]
pub struct RefCounter {
    counts: Mutex<HashMap<String, usize>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RefCounter {
    /// Creates an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a `get` on `id` and returns the new count.
    pub fn increment(&self, id: &str) -> usize {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Records a `put` on `id` and returns the remaining count. Never goes below zero.
    pub fn decrement(&self, id: &str) -> usize {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        match counts.get_mut(id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                counts.remove(id);
                0
            }
            None => 0,
        }
    }

    /// Returns the current count for `id`.
    pub fn count(&self, id: &str) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(id).copied().unwrap_or(0)
    }

    /// Forgets `id` entirely.
    pub fn clear(&self, id: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.remove(id);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
