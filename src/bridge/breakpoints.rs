//! Line breakpoint registry
//!
//! DAP sends the complete set of breakpoints for a file on every change, so
//! each call replaces what was registered for that path.

use std::collections::BTreeMap;

use crate::dap::{Breakpoint, Source};

/// First breakpoint id handed out
const FIRST_BREAKPOINT_ID: u32 = 1000;

/// Breakpoint sets keyed by source path
#[derive(Debug)]
pub struct BreakpointRegistry {
    next_id: u32,
    by_path: BTreeMap<String, Vec<Breakpoint>>,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self {
            next_id: FIRST_BREAKPOINT_ID,
            by_path: BTreeMap::new(),
        }
    }
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the breakpoints of `path` with one per line, in input order
    ///
    /// Every returned breakpoint is verified and carries a fresh id; lines
    /// are kept exactly as given.
    pub fn set_breakpoints(&mut self, path: &str, lines: &[u32]) -> Vec<Breakpoint> {
        let source = Source::from_path(path);
        let breakpoints: Vec<Breakpoint> = lines
            .iter()
            .map(|&line| {
                let id = self.next_id;
                self.next_id += 1;
                Breakpoint {
                    id,
                    verified: true,
                    line,
                    source: Some(source.clone()),
                }
            })
            .collect();

        if breakpoints.is_empty() {
            self.by_path.remove(path);
        } else {
            self.by_path.insert(path.to_string(), breakpoints.clone());
        }

        breakpoints
    }

    /// Breakpoints currently registered for `path`
    pub fn for_path(&self, path: &str) -> &[Breakpoint] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Lines per path, for replaying to a freshly connected runtime
    pub fn line_sets(&self) -> Vec<(String, Vec<u32>)> {
        self.by_path
            .iter()
            .map(|(path, bps)| (path.clone(), bps.iter().map(|bp| bp.line).collect()))
            .collect()
    }

    /// Total number of registered breakpoints
    pub fn len(&self) -> usize {
        self.by_path.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_all_for_path() {
        let mut registry = BreakpointRegistry::new();
        let first = registry.set_breakpoints("/a.nx", &[1, 5, 9]);
        let second = registry.set_breakpoints("/a.nx", &[2]);

        let current = registry.for_path("/a.nx");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].line, 2);

        let max_previous = first.iter().map(|bp| bp.id).max().unwrap();
        assert!(second[0].id > max_previous);
    }

    #[test]
    fn test_ids_ascend_in_input_order() {
        let mut registry = BreakpointRegistry::new();
        let bps = registry.set_breakpoints("/b.nx", &[30, 10, 20]);

        let ids: Vec<u32> = bps.iter().map(|bp| bp.id).collect();
        assert_eq!(ids, vec![1000, 1001, 1002]);
        let lines: Vec<u32> = bps.iter().map(|bp| bp.line).collect();
        assert_eq!(lines, vec![30, 10, 20]);
        assert!(bps.iter().all(|bp| bp.verified));
        assert_eq!(bps[0].source.as_ref().unwrap().name.as_deref(), Some("b.nx"));
    }

    #[test]
    fn test_paths_are_independent() {
        let mut registry = BreakpointRegistry::new();
        registry.set_breakpoints("/a.nx", &[1]);
        registry.set_breakpoints("/b.nx", &[2, 3]);
        registry.set_breakpoints("/a.nx", &[]);

        assert!(registry.for_path("/a.nx").is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.line_sets(), vec![("/b.nx".to_string(), vec![2, 3])]);
    }

    #[test]
    fn test_ids_not_reused_after_clearing() {
        let mut registry = BreakpointRegistry::new();
        registry.set_breakpoints("/a.nx", &[1, 2]);
        registry.set_breakpoints("/a.nx", &[]);
        let again = registry.set_breakpoints("/a.nx", &[1]);
        assert_eq!(again[0].id, 1002);
    }
}
