//! The persistent async preload loop and the state it shares with callers.
//!
//! Two locks are taken independently and never nested: `requests` guards the
//! pending buffer, `pending` guards the wake flag paired with `loop_guard`.
//! Producers hold neither while the worker decodes.

use super::decode::{self, PreloadTarget};
use super::request::PreloadRequest;
use super::text::TextRasterizer;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[inline(always)]
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct AsyncLoopState {
    requests: Mutex<Vec<PreloadRequest>>,
    pending: Mutex<bool>,
    loop_guard: Condvar,
    busy: AtomicBool,
    terminate: AtomicBool,
}

impl AsyncLoopState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, request: PreloadRequest) {
        lock(&self.requests).push(request);

        let mut pending = lock(&self.pending);
        *pending = true;
        self.loop_guard.notify_all();
    }

    /// Blocks until `pending` is set, termination is requested, or `timeout`
    /// elapses. Consumes the flag.
    pub fn wait_for_pending(&self, timeout: Duration) {
        let mut pending = lock(&self.pending);
        if !*pending {
            pending = self
                .loop_guard
                .wait_timeout_while(pending, timeout, |p| {
                    !*p && !self.terminate.load(Ordering::Acquire)
                })
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *pending = false;
    }

    /// Swaps the whole pending buffer out, preserving submission order.
    pub fn take_batch(&self) -> Vec<PreloadRequest> {
        std::mem::take(&mut *lock(&self.requests))
    }

    /// Advisory: may flip right after it is read.
    #[inline(always)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.terminate.store(true, Ordering::Release);
        let _pending = lock(&self.pending);
        self.loop_guard.notify_all();
    }

    pub(crate) fn busy_scope(&self) -> BusyScope<'_> {
        self.busy.store(true, Ordering::Release);
        BusyScope { state: self }
    }
}

/// Holds `busy` for the length of one batch.
pub(crate) struct BusyScope<'a> {
    state: &'a AsyncLoopState,
}

impl Drop for BusyScope<'_> {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
    }
}

/// Runs until `state` is told to terminate. `sink` receives each decoded
/// target in request order.
pub fn run_loop<F>(
    state: &AsyncLoopState,
    rasterizer: &mut dyn TextRasterizer,
    wait_timeout: Duration,
    mut sink: F,
) where
    F: FnMut(PreloadTarget),
{
    info!("Async preload loop started.");
    while !state.should_terminate() {
        state.wait_for_pending(wait_timeout);

        let requests = state.take_batch();
        if requests.is_empty() {
            continue;
        }

        let _busy = state.busy_scope();
        debug!("Processing {} async preload request(s).", requests.len());
        for rq in &requests {
            match decode::decode_request(rasterizer, rq) {
                Ok(target) => sink(target),
                Err(decode::DecodeError::Unsupported(kind)) => {
                    error!("Unsupported async preload type {kind:?} for '{}'", rq.id);
                }
                Err(e) => warn!("Failed to preload '{}': {e}. Skipping.", rq.id),
            }
        }
    }
    info!("Async preload loop stopped.");
}
