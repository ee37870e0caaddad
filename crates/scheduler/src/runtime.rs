//! Time-driven trigger primitive the engine registers its entries with.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tokio::task::JoinHandle,
    tokio_util::task::TaskTracker,
    tracing::{debug, error, info},
};

use crate::{
    Result,
    validate::{CronSchedule, parse_cron_expression},
};

/// Callback fired on every occurrence of a registered entry.
pub type CronHandler = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Opaque handle returned by [`CronRuntime::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// Registers handlers against 5-field cron specs.
///
/// Entries registered while stopped wait for [`CronRuntime::start`]. Stopping
/// prevents new fires but never cancels a handler that is already running.
#[async_trait]
pub trait CronRuntime: Send + Sync {
    fn register(&self, spec: &str, handler: CronHandler) -> Result<EntryId>;
    /// Returns `false` if `id` was not registered.
    fn unregister(&self, id: EntryId) -> bool;
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
    fn entry_count(&self) -> usize;
    /// Resolve once no fired handler is still running.
    async fn wait_idle(&self);
}

struct Entry {
    spec: String,
    schedule: CronSchedule,
    handler: CronHandler,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    running: bool,
    entries: HashMap<EntryId, Entry>,
}

/// [`CronRuntime`] backed by one Tokio timer task per entry.
///
/// Must be started from within a Tokio runtime.
#[derive(Default)]
pub struct TokioCronRuntime {
    inner: Mutex<Inner>,
    handlers: TaskTracker,
}

impl TokioCronRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_timer(&self, id: EntryId, entry: &mut Entry) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(%id, spec = %entry.spec, "no tokio runtime, cron entry will not fire");
            return;
        };
        let schedule = entry.schedule.clone();
        let handler = Arc::clone(&entry.handler);
        let handlers = self.handlers.clone();
        entry.timer = Some(handle.spawn(drive(id, schedule, handler, handlers)));
    }
}

#[async_trait]
impl CronRuntime for TokioCronRuntime {
    fn register(&self, spec: &str, handler: CronHandler) -> Result<EntryId> {
        let schedule = parse_cron_expression(spec)?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let id = EntryId(inner.next_id);
        let mut entry = Entry {
            spec: spec.to_string(),
            schedule,
            handler,
            timer: None,
        };
        if inner.running {
            self.spawn_timer(id, &mut entry);
        }
        inner.entries.insert(id, entry);
        debug!(%id, spec, "cron entry registered");
        Ok(id)
    }

    fn unregister(&self, id: EntryId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.entries.remove(&id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                debug!(%id, spec = %entry.spec, "cron entry unregistered");
                true
            },
            None => false,
        }
    }

    fn start(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.running {
            return;
        }
        inner.running = true;
        for (id, entry) in &mut inner.entries {
            self.spawn_timer(*id, entry);
        }
        info!(entries = inner.entries.len(), "cron runtime started");
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.running {
            return;
        }
        inner.running = false;
        for entry in inner.entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        info!("cron runtime stopped");
    }

    fn is_running(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).running
    }

    fn entry_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    async fn wait_idle(&self) {
        let in_flight = self.handlers.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for running cron handlers");
        }
        self.handlers.close();
        self.handlers.wait().await;
        self.handlers.reopen();
    }
}

impl Drop for TokioCronRuntime {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        for entry in inner.entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Timer loop for one entry. Handlers run on their own tracked task so
/// aborting the loop leaves in-flight work alone.
async fn drive(
    id: EntryId,
    schedule: CronSchedule,
    handler: CronHandler,
    handlers: TaskTracker,
) {
    let mut last_fired: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        // An early wake-up must not fire the same occurrence twice.
        let from = last_fired.map_or(now, |last| last.max(now));
        let Some(next) = schedule.after(&from).next() else {
            debug!(%id, "cron entry has no further occurrences");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        last_fired = Some(next);
        debug!(%id, at = %next, "cron entry fired");
        let handler = Arc::clone(&handler);
        handlers.spawn(async move { handler().await });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Runtime that only fires when told to, for deterministic tests.
    #[derive(Default)]
    pub(crate) struct ManualCronRuntime {
        inner: Mutex<ManualInner>,
    }

    #[derive(Default)]
    struct ManualInner {
        next_id: u64,
        running: bool,
        entries: HashMap<EntryId, (String, CronHandler)>,
    }

    impl ManualCronRuntime {
        pub(crate) fn specs(&self) -> Vec<String> {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut specs: Vec<String> = inner.entries.values().map(|(s, _)| s.clone()).collect();
            specs.sort();
            specs
        }

        /// Run every registered handler once, in registration order.
        pub(crate) async fn fire_all(&self) {
            let handlers: Vec<CronHandler> = {
                let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                let mut ids: Vec<&EntryId> = inner.entries.keys().collect();
                ids.sort();
                ids.into_iter()
                    .filter_map(|id| inner.entries.get(id))
                    .map(|(_, h)| Arc::clone(h))
                    .collect()
            };
            for handler in handlers {
                handler().await;
            }
        }
    }

    #[async_trait]
    impl CronRuntime for ManualCronRuntime {
        fn register(&self, spec: &str, handler: CronHandler) -> Result<EntryId> {
            parse_cron_expression(spec)?;
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.next_id += 1;
            let id = EntryId(inner.next_id);
            inner.entries.insert(id, (spec.to_string(), handler));
            Ok(id)
        }

        fn unregister(&self, id: EntryId) -> bool {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.entries.remove(&id).is_some()
        }

        fn start(&self) {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).running = true;
        }

        fn stop(&self) {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).running = false;
        }

        fn is_running(&self) -> bool {
            self.inner.lock().unwrap_or_else(|e| e.into_inner()).running
        }

        fn entry_count(&self) -> usize {
            self.inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entries
                .len()
        }

        // Handlers run inline in `fire_all`.
        async fn wait_idle(&self) {}
    }
}
