/// Port registry shared by every responder of a detector.
///
/// Tracks which local (address, port) pairs are held by a responder and
/// whether that responder is currently answering heartbeats. All
/// check-then-set sequences happen under a single lock acquisition so two
/// responders can never both observe "free" and race each other.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard};

use crate::error::{FailureDetectorError, Result};

#[derive(Debug, Default)]
pub struct PortRegistry {
    entries: Mutex<HashMap<IpAddr, HashMap<u16, bool>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, HashMap<u16, bool>>> {
        // The map is valid after any panic mid-update, so poisoning is ignored.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `addr` as bound (not yet responding).
    pub fn reserve(&self, addr: SocketAddr) -> Result<()> {
        let mut entries = self.lock();
        let ports = entries.entry(addr.ip()).or_default();
        if ports.contains_key(&addr.port()) {
            return Err(FailureDetectorError::AlreadyBound { addr });
        }
        ports.insert(addr.port(), false);
        Ok(())
    }

    /// Flip the responding flag. Unregistered pairs are left alone.
    pub fn mark_responding(&self, addr: SocketAddr, active: bool) {
        if let Some(flag) = self
            .lock()
            .get_mut(&addr.ip())
            .and_then(|ports| ports.get_mut(&addr.port()))
        {
            *flag = active;
        }
    }

    /// Atomically move `addr` into the responding state.
    pub fn try_start_responding(&self, addr: SocketAddr) -> Result<()> {
        let mut entries = self.lock();
        let flag = entries
            .entry(addr.ip())
            .or_default()
            .entry(addr.port())
            .or_insert(false);
        if *flag {
            return Err(FailureDetectorError::AlreadyRunning);
        }
        *flag = true;
        Ok(())
    }

    pub fn is_actively_responding(&self, addr: SocketAddr) -> bool {
        self.lock()
            .get(&addr.ip())
            .and_then(|ports| ports.get(&addr.port()))
            .copied()
            .unwrap_or(false)
    }

    pub fn is_reserved(&self, addr: SocketAddr) -> bool {
        self.lock()
            .get(&addr.ip())
            .is_some_and(|ports| ports.contains_key(&addr.port()))
    }

    /// Forget `addr` entirely. Called when the owning responder is dropped.
    pub fn release(&self, addr: SocketAddr) {
        let mut entries = self.lock();
        if let Some(ports) = entries.get_mut(&addr.ip()) {
            ports.remove(&addr.port());
            if ports.is_empty() {
                entries.remove(&addr.ip());
            }
        }
    }
}
