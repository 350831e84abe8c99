///
/// Process runtime and request sessions.
///
/// `DbRuntime` is constructed once per process and owns what every session
/// shares: the configuration and the table metadata cache.
///
/// A `Session` is one request scope. Every connection, result, and
/// statement registers a weak cleanup hook with its session when it is
/// created; closing the session (explicitly or by dropping the last handle)
/// runs the hooks of resources that are still alive, newest first, so
/// results and statements are released before the connections they came
/// from.
///

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::config::DbConfig;
use crate::metadata::TableMetadataCache;

#[derive(Debug)]
pub struct DbRuntime {
    config: DbConfig,
    metadata: Arc<TableMetadataCache>,
}

impl DbRuntime {
    pub fn new(config: DbConfig) -> Arc<Self> {
        let metadata = Arc::new(TableMetadataCache::from_config(&config.metadata));
        Arc::new(Self { config, metadata })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<TableMetadataCache> {
        &self.metadata
    }
}

/// Resource released when its session ends. Must be idempotent.
pub trait Cleanup: Send + Sync {
    fn cleanup(&self);
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    runtime: Arc<DbRuntime>,
    hooks: Mutex<Vec<Weak<dyn Cleanup>>>,
}

/// Non-owning reference held by resources, so a resource never keeps its
/// session alive.
#[derive(Clone)]
pub(crate) struct SessionRef(Weak<SessionInner>);

impl Session {
    pub fn new(runtime: Arc<DbRuntime>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                runtime,
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn runtime(&self) -> &Arc<DbRuntime> {
        &self.inner.runtime
    }

    pub fn register(&self, hook: Weak<dyn Cleanup>) {
        self.inner.register(hook);
    }

    /// Number of registered resources that are still alive.
    pub fn live_resources(&self) -> usize {
        self.inner
            .hooks
            .lock()
            .iter()
            .filter(|h| h.strong_count() > 0)
            .count()
    }

    pub fn close(&self) {
        self.inner.close();
    }

    pub(crate) fn downgrade(&self) -> SessionRef {
        SessionRef(Arc::downgrade(&self.inner))
    }
}

impl SessionInner {
    fn register(&self, hook: Weak<dyn Cleanup>) {
        let mut hooks = self.hooks.lock();
        hooks.retain(|h| h.strong_count() > 0);
        hooks.push(hook);
    }

    fn close(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        trace!(count = hooks.len(), "closing session");
        for hook in hooks.iter().rev() {
            if let Some(resource) = hook.upgrade() {
                resource.cleanup();
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionRef {
    /// Registers `hook` if the session is still open.
    pub(crate) fn register(&self, hook: Weak<dyn Cleanup>) {
        if let Some(inner) = self.0.upgrade() {
            inner.register(hook);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Cleanup for Recorder {
        fn cleanup(&self) {
            self.log.lock().push(self.name);
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_close_runs_hooks_in_reverse_order() {
        let session = Session::new(DbRuntime::new(DbConfig::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let conn = recorder("conn", &log);
        let result = recorder("result", &log);

        let conn_hook = Arc::downgrade(&conn);
        let conn_hook: Weak<dyn Cleanup> = conn_hook;
        let result_hook = Arc::downgrade(&result);
        let result_hook: Weak<dyn Cleanup> = result_hook;
        session.register(conn_hook);
        session.register(result_hook);
        assert_eq!(session.live_resources(), 2);

        session.close();
        assert_eq!(*log.lock(), vec!["result", "conn"]);

        session.close();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_dropped_resources_are_skipped() {
        let session = Session::new(DbRuntime::new(DbConfig::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let gone = recorder("gone", &log);
        let hook = Arc::downgrade(&gone);
        let hook: Weak<dyn Cleanup> = hook;
        session.register(hook);
        drop(gone);
        assert_eq!(session.live_resources(), 0);
        session.close();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_drop_closes_session() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let kept = recorder("kept", &log);
        {
            let session = Session::new(DbRuntime::new(DbConfig::default()));
            let hook = Arc::downgrade(&kept);
            let hook: Weak<dyn Cleanup> = hook;
            session.downgrade().register(hook);
        }
        assert_eq!(*log.lock(), vec!["kept"]);
    }

    #[test]
    fn test_runtime_builds_cache_from_config() {
        let runtime = DbRuntime::new(DbConfig::default());
        assert_eq!(runtime.config().metadata.capacity, 256);
        assert_eq!(runtime.metadata().entry_count(), 0);
    }
}
