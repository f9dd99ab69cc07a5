//! Bounded, fail-fast pool of transport executors.
//!
//! # Design
//! Idle executors sit on a LIFO stack next to a counter of how many more may
//! be created; one mutex guards both. `acquire` never waits: when the stack
//! is empty and the counter is spent it returns `None`, which the service
//! reports as `ConnectionOver`. Executors move out of the pool on `acquire`
//! and back in on `release`, so no executor ever has two owners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::DEFAULT_MAX_CONNECTIONS;
use crate::engine::{HttpEngine, UreqEngine};
use crate::executor::RestExecutor;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

type EngineFactory<E> = Box<dyn Fn() -> E + Send + Sync>;

struct PoolState<E> {
    idle: Vec<RestExecutor<E>>,
    creatable: usize,
    created: usize,
}

pub struct ExecutorPool<E> {
    id: u64,
    capacity: usize,
    factory: EngineFactory<E>,
    state: Mutex<PoolState<E>>,
}

impl<E: HttpEngine> ExecutorPool<E> {
    /// At most `capacity` executors are ever created, each from `factory`.
    pub fn new(capacity: usize, factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            factory: Box::new(factory),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                creatable: capacity,
                created: 0,
            }),
        }
    }

    // Every critical section is a single push, pop or counter step, so the
    // state is consistent even if a holder panicked.
    fn state(&self) -> MutexGuard<'_, PoolState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recently released idle executor, else a new one while the
    /// ceiling allows, else `None`.
    pub fn acquire(&self) -> Option<RestExecutor<E>> {
        let mut state = self.state();
        if let Some(executor) = state.idle.pop() {
            return Some(executor);
        }
        if state.creatable == 0 {
            tracing::warn!(pool = self.id, capacity = self.capacity, "executor pool exhausted");
            return None;
        }
        state.creatable -= 1;
        let id = state.created;
        state.created += 1;
        tracing::debug!(pool = self.id, executor = id, "creating executor");
        Some(RestExecutor::pooled((self.factory)(), self.id, id))
    }

    pub fn release(&self, executor: RestExecutor<E>) {
        if executor.pool_id() != self.id {
            tracing::warn!(
                pool = self.id,
                owner = executor.pool_id(),
                "dropping executor released to a pool that did not create it"
            );
            return;
        }
        self.state().idle.push(executor);
    }

    /// The executor ceiling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.state().idle.len()
    }

    /// Executors created so far, idle or checked out.
    pub fn created_count(&self) -> usize {
        self.state().created
    }
}

impl ExecutorPool<UreqEngine> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, UreqEngine::new)
    }
}

impl Default for ExecutorPool<UreqEngine> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_CONNECTIONS)
    }
}
