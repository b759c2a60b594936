//! Single-flight tracking and response fencing.
//!
//! Every fetch asks the ledger for a [`Ticket`] before calling the connector.
//! A non-forced request is refused while another request for the same key is
//! in flight. A forced request is always admitted and supersedes whatever is
//! in flight: the older ticket's generation is no longer current, so its
//! response is discarded when it arrives.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Permission to write one response for a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    key: String,
    generation: u64,
}

impl Ticket {
    /// Returns the cache key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the request generation for the key.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    in_flight: bool,
}

/// Per-key request bookkeeping shared by every binding of an engine.
#[derive(Debug, Default)]
pub struct RequestLedger {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RequestLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a request for `key`.
    ///
    /// Returns `None` when a request is already in flight and `force` is false.
    pub fn begin(&self, key: &str, force: bool) -> Option<Ticket> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_default();
        if slot.in_flight && !force {
            return None;
        }
        slot.generation += 1;
        slot.in_flight = true;
        Some(Ticket {
            key: key.to_string(),
            generation: slot.generation,
        })
    }

    /// Returns true if no newer request for the ticket's key has started.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.slots
            .lock()
            .get(&ticket.key)
            .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// Ends a request.
    ///
    /// Returns true if the ticket is still current, meaning its response may
    /// be written. A superseded ticket leaves the newer request in flight.
    pub fn finish(&self, ticket: &Ticket) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&ticket.key) {
            Some(slot) if slot.generation == ticket.generation => {
                slot.in_flight = false;
                true
            }
            _ => false,
        }
    }

    /// Gives up a request that will never finish, e.g. because its future was
    /// dropped.
    ///
    /// Returns true if the ticket was current; the key is then no longer in
    /// flight. A superseded ticket changes nothing.
    pub fn abandon(&self, ticket: &Ticket) -> bool {
        self.finish(ticket)
    }

    /// Returns true if a request for `key` is in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.slots.lock().get(key).is_some_and(|slot| slot.in_flight)
    }

    /// Abandons every in-flight request. Outstanding tickets stop being current.
    pub fn clear(&self) {
        for slot in self.slots.lock().values_mut() {
            slot.generation += 1;
            slot.in_flight = false;
        }
    }
}
