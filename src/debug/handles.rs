use crate::{Error, Result};
use std::collections::HashMap;

/// Client-facing ids for engine objects that only live until the next resume.
///
/// Ids keep counting across [`clear`](HandleTable::clear), so an id handed
/// out during an earlier stop is reported as stale instead of silently
/// pointing at whatever the engine reuses it for.
#[derive(Debug)]
pub struct HandleTable<T> {
    kind: &'static str,
    next: i64,
    entries: HashMap<i64, T>,
}

impl<T: Clone> HandleTable<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next: 1,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> i64 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        id
    }

    pub fn get(&self, id: i64) -> Result<T> {
        self.entries
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::StaleHandle(format!("{} {} is not valid in the current stop", self.kind, id)))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every handle kind the session hands out during a stop.
#[derive(Debug)]
pub struct StopHandles {
    /// Client frame id -> engine frame id
    pub frames: HandleTable<i64>,
    /// Client variablesReference -> engine reference (scopes and structured values)
    pub variables: HandleTable<i64>,
}

impl StopHandles {
    pub fn new() -> Self {
        Self {
            frames: HandleTable::new("frame"),
            variables: HandleTable::new("variablesReference"),
        }
    }

    /// Maps an engine variables reference, keeping `0` (no children) as is.
    pub fn variables_reference(&mut self, engine_reference: i64) -> i64 {
        if engine_reference > 0 {
            self.variables.insert(engine_reference)
        } else {
            0
        }
    }

    pub fn invalidate(&mut self) {
        self.frames.clear();
        self.variables.clear();
    }
}

impl Default for StopHandles {
    fn default() -> Self {
        Self::new()
    }
}
