use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::TrackingConfig;
use crate::tracker::ContinuityTracker;

/// One logical video stream.
///
/// The tracker mutex is held for the whole of a frame, so frames of the same
/// session are processed one after another while other sessions run freely.
#[derive(Debug)]
pub struct Session {
    id: String,
    tracker: Mutex<ContinuityTracker>,
    closed: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Session {
    fn new(id: String, config: TrackingConfig) -> Self {
        Self {
            id,
            tracker: Mutex::new(ContinuityTracker::new(config)),
            closed: AtomicBool::new(false),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Locks the tracker for the duration of one frame.
    ///
    /// A frame that panicked mid-way never committed, so the last committed
    /// state is still consistent and the poison is cleared.
    pub fn tracker(&self) -> MutexGuard<'_, ContinuityTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Live sessions by id.
///
/// Sessions open implicitly on their first frame and live until
/// [`SessionRegistry::close`] or [`SessionRegistry::evict_idle`] removes them.
/// Callers that cannot guarantee a close must evict periodically.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    config: TrackingConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            sessions: Mutex::default(),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session for `id`, opening it on first use.
    pub fn open(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get(id) {
            session.touch();
            return Arc::clone(session);
        }
        log::debug!("opening session {}", id);
        let session = Arc::new(Session::new(id.to_string(), self.config));
        sessions.insert(id.to_string(), Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions().get(id).cloned()
    }

    /// Drops the session. A frame still in flight for it stops before its
    /// next catalog mutation and discards its result.
    pub fn close(&self, id: &str) -> bool {
        match self.sessions().remove(id) {
            Some(session) => {
                log::debug!("closing session {}", id);
                session.close();
                true
            }
            None => false,
        }
    }

    /// Closes every session whose last frame started at least `max_idle` ago.
    /// Returns the ids that were closed.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut sessions = self.sessions();
        let idle: Vec<String> = sessions
            .values()
            .filter(|session| session.idle_for() >= max_idle)
            .map(|session| session.id.clone())
            .collect();
        for id in &idle {
            if let Some(session) = sessions.remove(id) {
                session.close();
            }
        }
        if !idle.is_empty() {
            log::info!("evicted {} idle session(s)", idle.len());
        }
        idle
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_returns_same_session() {
        let registry = SessionRegistry::default();
        let a = registry.open("cam-1");
        let b = registry.open("cam-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_marks_in_flight_handle() {
        let registry = SessionRegistry::default();
        let session = registry.open("cam-1");
        assert!(registry.close("cam-1"));
        assert!(session.is_closed());
        assert!(registry.get("cam-1").is_none());
        assert!(!registry.close("cam-1"));
    }

    #[test]
    fn test_evict_idle_sessions() {
        let registry = SessionRegistry::default();
        let session = registry.open("cam-1");
        registry.open("cam-2");

        assert!(registry.evict_idle(Duration::from_secs(3600)).is_empty());
        assert_eq!(registry.len(), 2);

        let mut evicted = registry.evict_idle(Duration::ZERO);
        evicted.sort();
        assert_eq!(evicted, vec!["cam-1".to_string(), "cam-2".to_string()]);
        assert!(registry.is_empty());
        assert!(session.is_closed());
    }

    #[test]
    fn test_reopen_after_close_starts_fresh() {
        let registry = SessionRegistry::default();
        let old = registry.open("cam-1");
        registry.close("cam-1");
        let new = registry.open("cam-1");
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!new.is_closed());
        assert!(new.tracker().is_empty());
    }
}
