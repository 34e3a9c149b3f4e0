//! Reference-correlation table
//!
//! Maps every client-visible handle to the server-side handle it stands for,
//! the endpoint slot that owns it, and the process that created it. Entries
//! for child handle kinds keep a back-reference to their parent handle; the
//! table never cascades removal through those links (callers close children
//! explicitly, stale children fail lazily on next use).
//!
//! Lookups key on (client handle, owning pid) so that two processes running
//! this code cannot cross-resolve each other's handles, including in the
//! window between a fork and its detection.

use crate::error::{ClientError, Result};
use crate::refs::RefKind;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub(crate) struct RefEntry {
    pub kind: RefKind,
    pub server_ref: u32,
    pub slot: usize,
    pub parent: Option<u32>,
    pub plugin_name: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(u32, u32), RefEntry>,
    next: u32,
}

/// Process-wide correlation table; internally synchronized, so register,
/// resolve and remove are atomic with respect to concurrent callers
#[derive(Debug)]
pub struct RefTable {
    inner: Mutex<Inner>,
}

impl Default for RefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RefTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a freshly received server handle and hand back a new client
    /// handle for it
    ///
    /// Handles are allocated from a monotonically increasing counter that
    /// wraps around, skipping zero and any value still live for this
    /// process, so a recently freed handle is not immediately reissued.
    pub(crate) fn register(
        &self,
        kind: RefKind,
        server_ref: u32,
        pid: u32,
        slot: usize,
        parent: Option<u32>,
        plugin_name: Option<String>,
    ) -> u32 {
        let mut inner = self.lock();
        let client_ref = loop {
            let candidate = inner.next;
            inner.next = inner.next.wrapping_add(1);
            if candidate == 0 {
                continue;
            }
            if !inner.entries.contains_key(&(candidate, pid)) {
                break candidate;
            }
        };
        inner.entries.insert(
            (client_ref, pid),
            RefEntry {
                kind,
                server_ref,
                slot,
                parent,
                plugin_name,
            },
        );
        client_ref
    }

    /// Resolve a handle to its (server handle, endpoint slot) pair
    ///
    /// Fails with `RefNotFound` when there is no entry for this process or
    /// the entry is of a different kind than the caller expects.
    pub(crate) fn resolve(&self, client_ref: u32, kind: RefKind, pid: u32) -> Result<(u32, usize)> {
        let inner = self.lock();
        match inner.entries.get(&(client_ref, pid)) {
            Some(entry) if entry.kind == kind => Ok((entry.server_ref, entry.slot)),
            _ => Err(ClientError::RefNotFound),
        }
    }

    pub(crate) fn plugin_name(&self, client_ref: u32, pid: u32) -> Option<String> {
        let inner = self.lock();
        inner
            .entries
            .get(&(client_ref, pid))
            .and_then(|e| e.plugin_name.clone())
    }

    pub(crate) fn parent(&self, client_ref: u32, pid: u32) -> Option<u32> {
        let inner = self.lock();
        inner.entries.get(&(client_ref, pid)).and_then(|e| e.parent)
    }

    /// Delete an entry; removing an absent handle is not an error here
    pub(crate) fn remove(&self, client_ref: u32, pid: u32) {
        let mut inner = self.lock();
        inner.entries.remove(&(client_ref, pid));
    }

    /// Empty the table for every process; fork recovery and full reset only
    pub(crate) fn clear_all(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn set_next(&self, next: u32) {
        self.lock().next = next;
    }
}
