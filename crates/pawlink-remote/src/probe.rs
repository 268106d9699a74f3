//! Sources of the signal-strength reading carried by each heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reports the current radio signal strength in dBm.
pub trait SignalProbe: Send + Sync {
    fn signal_strength(&self) -> f64;
}

/// A probe that always reports the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedSignal(pub f64);

impl SignalProbe for FixedSignal {
    fn signal_strength(&self) -> f64 {
        self.0
    }
}

/// A probe whose value is updated by hardware code on another task.
///
/// Clones share the same reading.
#[derive(Debug, Clone)]
pub struct SharedSignal {
    bits: Arc<AtomicU64>,
}

impl SharedSignal {
    pub fn new(initial: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(initial.to_bits())),
        }
    }

    /// Record a new reading. Non-finite readings are ignored.
    pub fn set(&self, dbm: f64) -> bool {
        if !dbm.is_finite() {
            return false;
        }
        self.bits.store(dbm.to_bits(), Ordering::Relaxed);
        true
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl SignalProbe for SharedSignal {
    fn signal_strength(&self) -> f64 {
        self.get()
    }
}

impl<P: SignalProbe + ?Sized> SignalProbe for Arc<P> {
    fn signal_strength(&self) -> f64 {
        (**self).signal_strength()
    }
}
