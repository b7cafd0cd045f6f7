//! Correlation of forwarded commands with runtime responses
//!
//! Every command sent to the runtime carries a fresh id. The entry recorded
//! here says what to do once the response with that id comes back, or once
//! it is given up on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::common::{Error, Result};

/// Client query answered from the runtime response
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    StackTrace,
    Variables,
    Evaluate,
}

/// What a runtime response settles
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyTarget {
    /// A client request waiting for its answer
    Client {
        request_seq: i64,
        command: String,
        query: Query,
    },
    /// continue/next/stepIn/stepOut confirmation
    Resume,
    /// Breakpoint set acknowledgement for a path
    Breakpoints { path: String },
}

/// A command forwarded to the runtime and not answered yet
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: u64,
    pub command: String,
    pub issued_at: Instant,
    pub target: ReplyTarget,
}

impl PendingRequest {
    pub fn new(id: u64, command: &str, target: ReplyTarget) -> Self {
        Self {
            id,
            command: command.to_string(),
            issued_at: Instant::now(),
            target,
        }
    }

    /// Client request seq, when a client is waiting on this entry
    pub fn client_seq(&self) -> Option<i64> {
        match &self.target {
            ReplyTarget::Client { request_seq, .. } => Some(*request_seq),
            _ => None,
        }
    }
}

/// Table of in-flight runtime commands
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<u64, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a forwarded command; ids must be unique
    pub fn insert(&mut self, request: PendingRequest) -> Result<()> {
        if self.entries.contains_key(&request.id) {
            return Err(Error::Internal(format!(
                "runtime request id {} is already pending",
                request.id
            )));
        }
        self.entries.insert(request.id, request);
        Ok(())
    }

    /// Remove the entry a response answers
    pub fn take(&mut self, id: u64) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Remove the entry a client request is waiting on
    pub fn take_by_client_seq(&mut self, request_seq: i64) -> Option<PendingRequest> {
        let id = self
            .entries
            .values()
            .find(|p| p.client_seq() == Some(request_seq))
            .map(|p| p.id)?;
        self.entries.remove(&id)
    }

    /// Remove every entry older than `timeout`, oldest id first
    pub fn take_expired(&mut self, now: Instant, timeout: Duration) -> Vec<PendingRequest> {
        let expired: Vec<u64> = self
            .entries
            .values()
            .filter(|p| now.saturating_duration_since(p.issued_at) >= timeout)
            .map(|p| p.id)
            .collect();

        let mut taken: Vec<PendingRequest> = expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect();
        taken.sort_by_key(|p| p.id);
        taken
    }

    /// Remove everything, oldest id first
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        let mut all: Vec<PendingRequest> = self.entries.drain().map(|(_, p)| p).collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
