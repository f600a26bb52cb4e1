//! Ordered start/stop of long-lived components.
//!
//! Components are registered as (start, stop) pairs. `start` runs the start
//! halves in registration order; if one fails, the stop halves of every pair
//! before it run in reverse and the original error is returned. `stop` runs
//! every stop half in reverse and reports each failure.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ShutdownReport;
use crate::{Error, Result};

type Callback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A component with both halves of its lifecycle.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Bring the component up.
    async fn start(&self) -> Result<()>;

    /// Tear the component down.
    async fn stop(&self) -> Result<()>;
}

#[derive(Clone)]
struct Entry {
    name: String,
    start: Option<Callback>,
    stop: Option<Callback>,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    started: bool,
    starting: bool,
    stopping: bool,
}

/// Start/stop coordinator.
#[derive(Default)]
pub struct Lifecycle {
    state: Mutex<State>,
}

fn boxed<F, Fut>(f: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

impl Lifecycle {
    /// Create an empty lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a start callback with no matching stop.
    pub fn on_start<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(Entry {
            name: name.into(),
            start: Some(boxed(f)),
            stop: None,
        });
    }

    /// Register a stop callback with no matching start.
    pub fn on_stop<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(Entry {
            name: name.into(),
            start: None,
            stop: Some(boxed(f)),
        });
    }

    /// Register a start/stop pair.
    pub fn register<S, SFut, T, TFut>(&self, name: impl Into<String>, start: S, stop: T)
    where
        S: Fn() -> SFut + Send + Sync + 'static,
        SFut: Future<Output = Result<()>> + Send + 'static,
        T: Fn() -> TFut + Send + Sync + 'static,
        TFut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(Entry {
            name: name.into(),
            start: Some(boxed(start)),
            stop: Some(boxed(stop)),
        });
    }

    /// Register a [`Component`].
    pub fn register_component(&self, name: impl Into<String>, component: Arc<dyn Component>) {
        let up = Arc::clone(&component);
        self.register(
            name,
            move || {
                let c = Arc::clone(&up);
                async move { c.start().await }
            },
            move || {
                let c = Arc::clone(&component);
                async move { c.stop().await }
            },
        );
    }

    /// Register something that only needs closing.
    pub fn register_closer<F, Fut>(&self, name: impl Into<String>, close: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_stop(name, close);
    }

    fn push(&self, entry: Entry) {
        self.state.lock().entries.push(entry);
    }

    /// Whether `start` has completed and `stop` has not run since.
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Run every start callback in order.
    ///
    /// A second call while started (or while a start is running) fails with
    /// [`Error::AlreadyStarted`].
    pub async fn start(&self) -> Result<()> {
        let entries = {
            let mut state = self.state.lock();
            if state.started || state.starting {
                return Err(Error::AlreadyStarted);
            }
            state.starting = true;
            state.entries.clone()
        };

        for (index, entry) in entries.iter().enumerate() {
            let Some(start) = &entry.start else {
                continue;
            };
            debug!(component = %entry.name, "Starting");
            if let Err(e) = start().await {
                rollback(&entries[..index]).await;
                self.state.lock().starting = false;
                return Err(Error::StartFailed {
                    index,
                    name: entry.name.clone(),
                    source: Box::new(e),
                });
            }
        }

        let mut state = self.state.lock();
        state.started = true;
        state.starting = false;
        Ok(())
    }

    /// Run every stop callback in reverse order.
    ///
    /// Every callback runs even when an earlier one fails. Calling this when
    /// not started, or while another stop is running, does nothing.
    pub async fn stop(&self) -> ShutdownReport {
        let entries = {
            let mut state = self.state.lock();
            if !state.started || state.stopping {
                return ShutdownReport::new();
            }
            state.stopping = true;
            state.entries.clone()
        };

        let mut report = ShutdownReport::new();
        for entry in entries.iter().rev() {
            let Some(stop) = &entry.stop else {
                continue;
            };
            debug!(component = %entry.name, "Stopping");
            if let Err(e) = stop().await {
                warn!(component = %entry.name, error = %e, "Stop callback failed");
                report.push(entry.name.clone(), e);
            }
        }

        let mut state = self.state.lock();
        state.started = false;
        state.stopping = false;
        report
    }
}

async fn rollback(started: &[Entry]) {
    for entry in started.iter().rev() {
        let Some(stop) = &entry.stop else {
            continue;
        };
        if let Err(e) = stop().await {
            warn!(component = %entry.name, error = %e, "Rollback stop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use pretty_assertions::assert_eq;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(
        log: &Log,
        line: &str,
    ) -> impl Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
        let log = Arc::clone(log);
        let line = line.to_string();
        move || {
            let log = Arc::clone(&log);
            let line = line.clone();
            async move {
                log.lock().push(line);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_stop_runs_in_reverse() {
        let log: Log = Arc::default();
        let lc = Lifecycle::new();
        lc.on_stop("a", recorder(&log, "A"));
        lc.on_stop("b", recorder(&log, "B"));
        lc.on_stop("c", recorder(&log, "C"));

        lc.start().await.unwrap();
        assert!(lc.stop().await.is_empty());
        assert_eq!(*log.lock(), vec!["C", "B", "A"]);
        assert!(!lc.is_started());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let lc = Lifecycle::new();
        lc.start().await.unwrap();
        assert!(matches!(lc.start().await, Err(Error::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lc = Lifecycle::new();
        let c = Arc::clone(&calls);
        lc.on_stop("a", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        assert!(lc.stop().await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_earlier_components() {
        let log: Log = Arc::default();
        let lc = Lifecycle::new();
        lc.register("first", recorder(&log, "start-1"), recorder(&log, "stop-1"));
        lc.register(
            "second",
            || async { Err(Error::Internal("boom".into())) },
            recorder(&log, "stop-2"),
        );
        lc.register("third", recorder(&log, "start-3"), recorder(&log, "stop-3"));

        let err = lc.start().await.unwrap_err();
        assert!(matches!(err, Error::StartFailed { index: 1, .. }));
        assert!(err.to_string().contains("boom"));
        assert_eq!(*log.lock(), vec!["start-1", "stop-1"]);
        assert!(!lc.is_started());
    }

    #[tokio::test]
    async fn test_rollback_errors_do_not_replace_original() {
        let lc = Lifecycle::new();
        lc.register(
            "first",
            || async { Ok(()) },
            || async { Err(Error::Internal("rollback failed".into())) },
        );
        lc.on_start("second", || async { Err(Error::Config("original".into())) });

        let err = lc.start().await.unwrap_err().to_string();
        assert!(err.contains("original"));
        assert!(!err.contains("rollback failed"));
    }

    #[tokio::test]
    async fn test_stop_attempts_everything_and_reports_each_failure() {
        let log: Log = Arc::default();
        let lc = Lifecycle::new();
        lc.on_stop("a", recorder(&log, "A"));
        lc.on_stop("b", || async { Err(Error::Audit("b broke".into())) });
        lc.on_stop("c", || async { Err(Error::Session("c broke".into())) });

        lc.start().await.unwrap();
        let report = lc.stop().await;
        assert_eq!(report.components(), vec!["c", "b"]);
        assert_eq!(*log.lock(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let lc = Lifecycle::new();
        lc.start().await.unwrap();
        lc.stop().await;
        assert!(lc.start().await.is_ok());
    }

    struct Counter {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Component for Counter {
        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_component() {
        let counter = Arc::new(Counter {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let lc = Lifecycle::new();
        lc.register_component("counter", counter.clone());
        lc.start().await.unwrap();
        lc.stop().await;
        assert_eq!(counter.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counter.stops.load(Ordering::SeqCst), 1);
    }
}
