//! Bounded admission for in-flight fetches.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::CrawlError;

pub struct ConcurrencyGate {
    semaphore: Semaphore,
    limit: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub limit: usize,
    pub in_flight: usize,
    pub peak: usize,
    pub acquired: u64,
    pub released: u64,
}

/// A held slot. Dropping it releases the slot exactly once.
pub struct GatePermit<'a> {
    gate: &'a ConcurrencyGate,
    _permit: SemaphorePermit<'a>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<GatePermit<'_>, CrawlError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CrawlError::GateClosed)?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            gate: self,
            _permit: permit,
        })
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            limit: self.limit,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.gate.released.fetch_add(1, Ordering::SeqCst);
    }
}
