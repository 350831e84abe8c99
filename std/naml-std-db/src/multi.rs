///
/// Multi-statement result queue.
///
/// A multi-statement query string is split with `scan::split_statements`
/// and run one statement at a time. Result sets are appended to the queue;
/// DML only updates the connection's affected-row count. The first queued
/// entry is "staged" and unconsumed; the caller takes it with
/// `consume_staged` and moves on with `advance`.
///

use tracing::debug;

use crate::errors::DbResult;
use crate::scan::split_statements;

#[derive(Debug, Clone)]
pub struct MultiResultQueue<T> {
    entries: Vec<T>,
    index: usize,
    consumed: bool,
}

impl<T> Default for MultiResultQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: 0,
            consumed: true,
        }
    }
}

impl<T: Clone> MultiResultQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets queued entries. Entries are not closed; handles already given
    /// out stay usable.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.index = 0;
        self.consumed = true;
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    /// Stages the first entry, if any.
    pub fn finish(&mut self) {
        self.index = 0;
        self.consumed = self.entries.is_empty();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_more(&self) -> bool {
        !self.consumed || self.index + 1 < self.entries.len()
    }

    pub fn consume_staged(&mut self) -> Option<T> {
        if self.consumed {
            return None;
        }
        self.consumed = true;
        self.entries.get(self.index).cloned()
    }

    pub fn advance(&mut self) -> bool {
        if self.index + 1 < self.entries.len() {
            self.index += 1;
            self.consumed = false;
            true
        } else {
            false
        }
    }

    /// Runs every statement of `sql` through `exec`, in order, queueing the
    /// result sets it returns. The first failure stops the batch; entries
    /// queued before it stay available.
    pub fn execute_all<F>(&mut self, sql: &str, mut exec: F) -> DbResult<()>
    where
        F: FnMut(&str) -> DbResult<Option<T>>,
    {
        self.reset();
        let mut outcome = Ok(());
        for stmt in split_statements(sql) {
            match exec(&stmt) {
                Ok(Some(entry)) => self.push(entry),
                Ok(None) => {}
                Err(e) => {
                    debug!(statement = %stmt, error = %e, "multi-statement batch stopped");
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.finish();
        outcome
    }
}
