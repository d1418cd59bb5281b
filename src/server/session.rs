//! Cookie-keyed session store with idle eviction.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Default idle time after which a session is evicted.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// State attached to a session by the layers above the transport.
///
/// `cleanup` is called exactly once, when the owning session is evicted.
pub trait SessionResource: Send + Sync {
    fn cleanup(&self);
}

pub struct Session {
    key: String,
    last_touched: Mutex<Instant>,
    resources: Mutex<Vec<(String, Arc<dyn SessionResource>)>>,
}

impl Session {
    fn new(key: String, now: Instant) -> Self {
        Self {
            key,
            last_touched: Mutex::new(now),
            resources: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn last_touched(&self) -> Instant {
        *lock(&self.last_touched)
    }

    pub fn touch(&self) {
        *lock(&self.last_touched) = Instant::now();
    }

    /// Attaches a resource under `name`, replacing any previous one.
    pub fn add_resource(&self, name: impl Into<String>, resource: Arc<dyn SessionResource>) {
        let name = name.into();
        let mut resources = lock(&self.resources);
        resources.retain(|(n, _)| *n != name);
        resources.push((name, resource));
    }

    pub fn resource(&self, name: &str) -> Option<Arc<dyn SessionResource>> {
        lock(&self.resources)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| Arc::clone(r))
    }

    pub fn resource_names(&self) -> Vec<String> {
        lock(&self.resources).iter().map(|(n, _)| n.clone()).collect()
    }

    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_touched()) > timeout
    }

    fn cleanup(&self) {
        let resources = std::mem::take(&mut *lock(&self.resources));
        for (name, resource) in resources {
            tracing::debug!(session = %self.key, resource = %name, "Cleaning up session resource");
            resource.cleanup();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("resources", &self.resource_names())
            .finish()
    }
}

/// Sessions keyed by the id carried in the session cookie.
///
/// Every access touches the session it returns and then evicts the ones
/// idle for longer than the timeout. Resource cleanup runs after the store
/// lock is released.
#[derive(Debug)]
pub struct SessionManager {
    timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Session for `key`, or a new one under a fresh id when `key` is
    /// blank, unknown or expired.
    pub fn get_or_create(&self, key: Option<&str>) -> Arc<Session> {
        let now = Instant::now();
        let (session, evicted) = {
            let mut sessions = lock(&self.sessions);
            let existing = key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .and_then(|k| sessions.get(k))
                .filter(|s| !s.expired(now, self.timeout))
                .cloned();

            let session = match existing {
                Some(session) => {
                    session.touch();
                    session
                }
                None => {
                    let session = Arc::new(Session::new(Uuid::new_v4().to_string(), now));
                    tracing::debug!(session = %session.key, "Session created");
                    sessions.insert(session.key.clone(), Arc::clone(&session));
                    session
                }
            };
            (session, self.collect_expired(&mut sessions, Instant::now()))
        };

        cleanup_all(evicted);
        session
    }

    /// Existing session for `key`, touched; never creates one.
    pub fn get(&self, key: &str) -> Option<Arc<Session>> {
        let (session, evicted) = {
            let mut sessions = lock(&self.sessions);
            let session = sessions
                .get(key)
                .filter(|s| !s.expired(Instant::now(), self.timeout))
                .cloned();
            if let Some(session) = &session {
                session.touch();
            }
            (session, self.collect_expired(&mut sessions, Instant::now()))
        };

        cleanup_all(evicted);
        session
    }

    /// Evicts idle sessions, returning how many went.
    pub fn sweep(&self) -> usize {
        let evicted = self.collect_expired(&mut lock(&self.sessions), Instant::now());
        let count = evicted.len();
        cleanup_all(evicted);
        count
    }

    /// Removes a session right away, cleaning up its resources.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = lock(&self.sessions).remove(key);
        match removed {
            Some(session) => {
                session.cleanup();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect_expired(
        &self,
        sessions: &mut HashMap<String, Arc<Session>>,
        now: Instant,
    ) -> Vec<Arc<Session>> {
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.expired(now, self.timeout))
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| sessions.remove(&key))
            .collect()
    }
}

fn cleanup_all(evicted: Vec<Arc<Session>>) {
    for session in evicted {
        tracing::debug!(session = %session.key, "Session expired");
        session.cleanup();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
