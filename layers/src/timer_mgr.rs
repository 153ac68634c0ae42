//! Timer Manager
//!
//! One-shot millisecond timers executed on the tokio worker pool. Every timer
//! gets a fresh [`TimerId`] which is handed back to its callback, so a single
//! handler can multiplex several logical timers.
//!
//! Stopping a timer is a synchronization point: once `stop_timer` has returned,
//! the callback of that timer will not start. A callback already running when
//! `stop_timer` is called runs to completion.

use crate::LayerError;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Timer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u32);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expiry callback
pub type TimerCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

type TimerTable = Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>;

/// Process-wide timer service, passed explicitly to its users
pub struct TimerManager {
    runtime: Handle,
    timers: TimerTable,
    next_id: AtomicU32,
}

impl TimerManager {
    /// Create a timer manager running its timers on `runtime`
    pub fn new(runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU32::new(1),
        })
    }

    /// Start a timer firing `period_ms` milliseconds from now
    pub fn start_timer(&self, period_ms: u64, callback: TimerCallback) -> TimerId {
        self.start_timer_at(Instant::now() + Duration::from_millis(period_ms), callback)
    }

    /// Start a timer firing at `deadline`
    pub fn start_timer_at(&self, deadline: Instant, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let table = self.timers.clone();

        // The table stays locked until the task is recorded, so an immediately
        // expiring task cannot look itself up before it is inserted.
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let armed = table
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id)
                .is_some();
            if armed {
                trace!("Timer {} expired", id);
                callback(id);
            }
        });
        timers.insert(id, task);
        trace!("Started timer {}", id);

        id
    }

    /// Stop a running timer
    pub fn stop_timer(&self, id: TimerId) -> Result<(), LayerError> {
        let task = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .ok_or(LayerError::InvalidTimerId(id))?;
        task.abort();
        trace!("Stopped timer {}", id);
        Ok(())
    }

    /// Number of timers started and not yet fired or stopped
    pub fn active_timers(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if !timers.is_empty() {
            debug!("Aborting {} pending timers", timers.len());
        }
        for (_, task) in timers.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timer_fires_once() {
        let timer_mgr = TimerManager::new(Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));

        let id = timer_mgr.start_timer(10, counting_callback(&fired));
        assert_eq!(timer_mgr.active_timers(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer_mgr.active_timers(), 0);
        assert!(matches!(timer_mgr.stop_timer(id), Err(LayerError::InvalidTimerId(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stopped_timer_never_fires() {
        let timer_mgr = TimerManager::new(Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));

        let id = timer_mgr.start_timer(30, counting_callback(&fired));
        timer_mgr.stop_timer(id).unwrap();
        assert!(matches!(timer_mgr.stop_timer(id), Err(LayerError::InvalidTimerId(_))));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callback_receives_its_id() {
        let timer_mgr = TimerManager::new(Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: TimerCallback = Arc::new(move |id| sink.lock().unwrap().push(id));

        let first = timer_mgr.start_timer(5, callback.clone());
        let second = timer_mgr.start_timer(20, callback);
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[first, second]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_timer_id() {
        let timer_mgr = TimerManager::new(Handle::current());
        assert!(matches!(
            timer_mgr.stop_timer(TimerId(999)),
            Err(LayerError::InvalidTimerId(TimerId(999)))
        ));
    }
}
