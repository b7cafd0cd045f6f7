//! Variable handle table
//!
//! Scopes are handed to the client as opaque integer references. A later
//! `variables` request names only the reference, so the table maps it back
//! to the runtime-side descriptor (`local_<frameId>`, `global_<frameId>`).

use std::collections::HashMap;

/// First reference handed out; 0 means "no children" in DAP
const START_HANDLE: i64 = 1000;

/// Which variable group of a frame a handle names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Local,
    Global,
}

impl ScopeKind {
    fn prefix(self) -> &'static str {
        match self {
            ScopeKind::Local => "local",
            ScopeKind::Global => "global",
        }
    }

    /// Descriptor string for this scope of a frame
    pub fn descriptor(self, frame_id: i64) -> String {
        format!("{}_{}", self.prefix(), frame_id)
    }

    /// Split a descriptor back into scope and frame id
    pub fn parse(descriptor: &str) -> Option<(ScopeKind, i64)> {
        let (prefix, frame) = descriptor.split_once('_')?;
        let kind = match prefix {
            "local" => ScopeKind::Local,
            "global" => ScopeKind::Global,
            _ => return None,
        };
        Some((kind, frame.parse().ok()?))
    }
}

/// Bidirectional map between references and descriptors
#[derive(Debug)]
pub struct VariableHandles {
    next: i64,
    by_ref: HashMap<i64, String>,
    by_descriptor: HashMap<String, i64>,
}

impl Default for VariableHandles {
    fn default() -> Self {
        Self {
            next: START_HANDLE,
            by_ref: HashMap::new(),
            by_descriptor: HashMap::new(),
        }
    }
}

impl VariableHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference for `descriptor`, allocating one on first use
    ///
    /// The same descriptor always maps to the same reference for the life of
    /// the table; references are never reused.
    pub fn get_or_create(&mut self, descriptor: &str) -> i64 {
        if let Some(&reference) = self.by_descriptor.get(descriptor) {
            return reference;
        }

        let reference = self.next;
        self.next += 1;
        self.by_ref.insert(reference, descriptor.to_string());
        self.by_descriptor.insert(descriptor.to_string(), reference);
        reference
    }

    /// Descriptor behind a reference, if it was ever handed out
    pub fn get(&self, reference: i64) -> Option<&str> {
        self.by_ref.get(&reference).map(String::as_str)
    }

    /// Forget every mapping; the counter keeps going so old references stay dead
    pub fn clear(&mut self) {
        self.by_ref.clear();
        self.by_descriptor.clear();
    }

    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}
