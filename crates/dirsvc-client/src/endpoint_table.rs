//! Endpoint table: bounded sparse map of slot → endpoint
//!
//! Slot 0 is reserved for the shared local channel; slots `1..=N` are leased
//! one per remote proxy session. Remote acquisition is split into reserve
//! and fill so no lock is held across the TCP connect: a reservation pins
//! the slot number, the connected channel fills it, and an abandoned
//! reservation is simply cancelled.

use crate::endpoint::{Channel, Endpoint, EndpointKind};
use crate::error::{ClientError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// Slot index of the shared local channel
pub const LOCAL_SLOT: usize = 0;

/// Default number of remote slots
pub const DEFAULT_MAX_REMOTE_SESSIONS: usize = 8;

#[derive(Debug)]
enum Slot {
    /// Slot number pinned while its TCP connect is in progress
    Reserved,
    Open(Arc<Endpoint>),
}

#[derive(Debug)]
pub struct EndpointTable {
    max_remote: usize,
    slots: Mutex<BTreeMap<usize, Slot>>,
}

impl EndpointTable {
    pub fn new(max_remote: usize) -> Self {
        Self {
            max_remote,
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Highest valid slot index
    pub fn capacity(&self) -> usize {
        self.max_remote
    }

    /// Resolve a slot number to its live endpoint
    ///
    /// A slot past the table bound is a corruption-defense failure distinct
    /// from an empty slot, which means the endpoint was torn down and any
    /// correlation entry pointing here is stale.
    pub(crate) fn get(&self, slot: usize) -> Result<Arc<Endpoint>> {
        if slot > self.max_remote {
            return Err(ClientError::SlotOutOfRange {
                slot,
                max: self.max_remote,
            });
        }
        match self.lock().get(&slot) {
            Some(Slot::Open(ep)) => Ok(ep.clone()),
            _ => Err(ClientError::CannotAccessSession),
        }
    }

    pub(crate) fn local(&self) -> Option<Arc<Endpoint>> {
        match self.lock().get(&LOCAL_SLOT) {
            Some(Slot::Open(ep)) => Some(ep.clone()),
            _ => None,
        }
    }

    pub(crate) fn install_local(&self, channel: Channel) -> Arc<Endpoint> {
        let ep = Arc::new(Endpoint::new(LOCAL_SLOT, EndpointKind::Local, channel));
        self.lock().insert(LOCAL_SLOT, Slot::Open(ep.clone()));
        trace!("local channel installed");
        ep
    }

    /// Pin the lowest free remote slot; fails before any resource is
    /// allocated when every slot is taken
    pub(crate) fn reserve_remote(&self) -> Result<usize> {
        let mut slots = self.lock();
        for slot in 1..=self.max_remote {
            if !slots.contains_key(&slot) {
                slots.insert(slot, Slot::Reserved);
                return Ok(slot);
            }
        }
        Err(ClientError::MaxSessionsOpen)
    }

    pub(crate) fn fill_remote(&self, slot: usize, channel: Channel) -> Arc<Endpoint> {
        let ep = Arc::new(Endpoint::new(slot, EndpointKind::Remote, channel));
        self.lock().insert(slot, Slot::Open(ep.clone()));
        trace!(slot, "remote endpoint installed");
        ep
    }

    pub(crate) fn cancel_reservation(&self, slot: usize) {
        let mut slots = self.lock();
        if matches!(slots.get(&slot), Some(Slot::Reserved)) {
            slots.remove(&slot);
        }
    }

    /// Close the endpoint (if any) and free the slot; idempotent
    ///
    /// The transport shutdown happens after the table lock is dropped so a
    /// blocked in-flight call on the endpoint cannot stall other slots.
    pub(crate) fn release(&self, slot: usize) {
        let removed = self.lock().remove(&slot);
        if let Some(Slot::Open(ep)) = removed {
            trace!(slot, "endpoint released");
            ep.close();
        }
    }

    /// Close every open slot; fork recovery and full reset
    pub(crate) fn close_all(&self) {
        let removed = std::mem::take(&mut *self.lock());
        for (_, slot) in removed {
            if let Slot::Open(ep) = slot {
                ep.close();
            }
        }
    }

    pub fn open_slots(&self) -> usize {
        self.lock()
            .values()
            .filter(|s| matches!(s, Slot::Open(_)))
            .count()
    }
}
