//! Bounded pool of predicate engines.
//!
//! Declaring a few hundred header-bit variables and warming the prefix cache
//! is the expensive part of engine construction, so finished instances hand
//! their engine back for the next one. The pool is seeded with clones of one
//! pre-warmed engine; predicate ids minted in the seed are valid in every
//! clone, which is what lets instances share encoded context predicates.
//!
//! Acquisition blocks up to a timeout and then falls back to cloning the
//! seed, so a stuck worker can never deadlock the whole run. The fallback is
//! counted; a low reuse ratio in the report points at an undersized pool.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::warn;

use plover_bdd::PredicateEngine;

use crate::report::PoolMetrics;

pub struct EnginePool {
    seed: Arc<PredicateEngine>,
    tx: Sender<PredicateEngine>,
    rx: Receiver<PredicateEngine>,
    capacity: usize,
    reused: AtomicU64,
    constructed: AtomicU64,
}

impl EnginePool {
    /// Fill the pool with `capacity` clones of the seed (at least one).
    pub fn new(seed: Arc<PredicateEngine>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = tx.send((*seed).clone());
        }
        EnginePool {
            seed,
            tx,
            rx,
            capacity,
            reused: AtomicU64::new(0),
            constructed: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Borrow an engine, waiting up to `timeout` for one to come back before
    /// falling back to a fresh clone of the seed.
    pub fn acquire(&self, timeout: Duration) -> EngineLease<'_> {
        let engine = match self.rx.recv_timeout(timeout) {
            Ok(engine) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                engine
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.constructed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "engine pool exhausted, cloning the seed"
                );
                (*self.seed).clone()
            }
        };
        EngineLease {
            pool: self,
            engine: Some(engine),
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            reused: self.reused.load(Ordering::Relaxed),
            constructed: self.constructed.load(Ordering::Relaxed),
        }
    }

    /// Idle engines currently in the pool.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    fn put_back(&self, engine: PredicateEngine) {
        // Fallback clones can outnumber the slots; surplus engines are
        // simply dropped.
        let _ = self.tx.try_send(engine);
    }
}

/// A borrowed engine. Dropping the lease returns the engine to its pool on
/// every path, unwinding included.
pub struct EngineLease<'a> {
    pool: &'a EnginePool,
    engine: Option<PredicateEngine>,
}

impl Deref for EngineLease<'_> {
    type Target = PredicateEngine;

    fn deref(&self) -> &PredicateEngine {
        self.engine.as_ref().expect("engine present until drop")
    }
}

impl DerefMut for EngineLease<'_> {
    fn deref_mut(&mut self) -> &mut PredicateEngine {
        self.engine.as_mut().expect("engine present until drop")
    }
}

impl Drop for EngineLease<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.put_back(engine);
        }
    }
}
