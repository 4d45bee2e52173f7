use super::*;

use moka::future::Cache;
use moka::notification::RemovalCause;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Weak;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;

use crate::config::PoolOptions;

/// Opens the byte stream a session runs over.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Stream, ConnectError>> + Send;
}

/// Plain TCP to the device's Telnet port.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<TcpStream, ConnectError> {
        super::transport::tcp_connect(host, port, timeout).await
    }
}

/// A cached session together with its keepalive task.
///
/// Dropping the entry stops the keepalive task.
pub struct PooledSession {
    session: Arc<DeviceSession>,
    keepalive: AbortHandle,
}

impl PooledSession {
    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

struct PoolInner<C> {
    cache: Cache<String, Arc<PooledSession>>,
    /// Serializes session creation per host so concurrent callers share one login.
    creating: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    connector: C,
    profile: Arc<DialectProfile>,
    options: PoolOptions,
}

/// Host-keyed pool of logged-in sessions.
///
/// Holds at most one session per host. Sessions are created on first use,
/// kept alive by a background task while idle, and replaced once they die.
/// Cloning the pool is cheap and shares the cache.
pub struct ConnectionPool<C: Connector = TcpConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ConnectionPool<TcpConnector> {
    /// Creates a pool that connects over TCP.
    pub fn new(profile: Arc<DialectProfile>, options: PoolOptions) -> Self {
        Self::with_connector(TcpConnector, profile, options)
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn with_connector(connector: C, profile: Arc<DialectProfile>, options: PoolOptions) -> Self {
        let cache = Cache::builder()
            .max_capacity(options.max_sessions)
            .time_to_idle(options.idle_eviction)
            .eviction_listener(|host: Arc<String>, entry: Arc<PooledSession>, cause| {
                debug!("Evicting session for {} ({:?})", host, cause);
                entry.keepalive.abort();
                if cause != RemovalCause::Replaced {
                    entry.session.mark_dead(&format!("evicted from pool: {cause:?}"));
                }
            })
            .build();

        Self {
            inner: Arc::new(PoolInner {
                cache,
                creating: std::sync::Mutex::new(HashMap::new()),
                connector,
                profile,
                options,
            }),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn profile(&self) -> &Arc<DialectProfile> {
        &self.inner.profile
    }

    /// Gets the cached session for `host` or logs in a new one.
    ///
    /// A cached session is reused only while it is alive and was opened for
    /// the same family with the same credentials; otherwise it is evicted and
    /// replaced.
    pub async fn get(
        &self,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
    ) -> Result<Arc<DeviceSession>, ConnectError> {
        if let Some(session) = self.reusable(host, credentials, family).await {
            debug!("Cache hit: {}", host);
            return Ok(session);
        }

        let lock = self.creation_lock(host)?;
        let result = {
            let _creating = lock.lock().await;
            self.create_locked(host, credentials, family).await
        };
        self.release_creation_lock(host, lock);
        result
    }

    async fn create_locked(
        &self,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
    ) -> Result<Arc<DeviceSession>, ConnectError> {
        // Another caller may have finished the login while we waited.
        if let Some(session) = self.reusable(host, credentials, family).await {
            debug!("Session for {} created by a concurrent caller", host);
            return Ok(session);
        }
        if self.inner.cache.contains_key(host) {
            debug!("Cached session for {} is stale. Removing.", host);
            self.inner.cache.invalidate(host).await;
        } else {
            debug!("Cache miss, creating new session for {}...", host);
        }

        let session = Arc::new(self.create(host, credentials, family).await?);
        let keepalive = spawn_keepalive(
            Arc::downgrade(&session),
            self.inner.options.keepalive_interval,
            self.inner.options.keepalive_idle_threshold,
        );
        self.inner
            .cache
            .insert(
                host.to_string(),
                Arc::new(PooledSession {
                    session: session.clone(),
                    keepalive,
                }),
            )
            .await;
        info!("New session for {} has been cached", host);
        Ok(session)
    }

    async fn reusable(
        &self,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
    ) -> Option<Arc<DeviceSession>> {
        let entry = self.inner.cache.get(host).await?;
        let session = &entry.session;
        if !session.is_alive() {
            debug!("Cached session {} is dead", host);
            return None;
        }
        if session.family() != family {
            debug!("Cached session {} is {}, wanted {}", host, session.family(), family);
            return None;
        }
        if !session.matches_credentials(credentials) {
            return None;
        }
        Some(session.clone())
    }

    fn creation_lock(&self, host: &str) -> Result<Arc<Mutex<()>>, ConnectError> {
        let mut locks = self
            .inner
            .creating
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("pool lock error: {e}")))?;
        Ok(locks.entry(host.to_string()).or_default().clone())
    }

    /// Drops the creation lock of `host` once no other caller is waiting on it.
    fn release_creation_lock(&self, host: &str, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.inner.creating.lock() else {
            return;
        };
        // The map and `lock` are the only holders.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(host);
        }
    }

    #[cfg(test)]
    fn pending_creations(&self) -> usize {
        self.inner.creating.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    async fn create(
        &self,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
    ) -> Result<DeviceSession, ConnectError> {
        let options = self.inner.options.session.clone();
        let stream = self
            .inner
            .connector
            .connect(host, options.port, options.connect_timeout)
            .await?;
        DeviceSession::with_stream(
            stream,
            host,
            credentials,
            family,
            self.inner.profile.clone(),
            options,
            SessionRecorder::new(self.inner.options.record_level),
        )
        .await
    }

    /// Drops the session of `host`; the next `get` logs in again.
    pub async fn evict(&self, host: &str) {
        if self.inner.cache.contains_key(host) {
            info!("Evicting session for {}", host);
        }
        self.inner.cache.invalidate(host).await;
    }

    /// Runs `op` on the session of `host`, retrying on connection failures.
    ///
    /// Between attempts the session is evicted so the retry logs in fresh.
    /// Errors that leave the session usable (lookup, capacity) are returned at
    /// once.
    pub async fn with_retry<T, F, Fut>(
        &self,
        host: &str,
        credentials: &Credentials,
        family: DeviceFamily,
        mut op: F,
    ) -> Result<T, ConnectError>
    where
        F: FnMut(Arc<DeviceSession>) -> Fut,
        Fut: Future<Output = Result<T, ConnectError>>,
    {
        let attempts = self.inner.options.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.get(host, credentials, family).await {
                Ok(session) => op(session).await,
                Err(err) => Err(err),
            };
            match result {
                Err(err) if err.should_evict() && attempt < attempts => {
                    warn!(
                        "{} attempt {}/{} failed: {}, retrying",
                        host, attempt, attempts, err
                    );
                    self.evict(host).await;
                    tokio::time::sleep(self.inner.options.retry_delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Closes every session and empties the pool.
    pub async fn close_all(&self) {
        let entries: Vec<_> = self.inner.cache.iter().map(|(_, entry)| entry).collect();
        for entry in entries {
            entry.session.close().await;
        }
        self.inner.cache.invalidate_all();
        self.inner.cache.run_pending_tasks().await;
        debug!("Connection pool closed");
    }

    /// Number of cached sessions.
    pub async fn len(&self) -> u64 {
        self.inner.cache.run_pending_tasks().await;
        self.inner.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Starts the idle keepalive of a session.
///
/// The task holds only a weak reference and ends on its own once the session
/// is gone or dead.
fn spawn_keepalive(
    session: Weak<DeviceSession>,
    interval: Duration,
    idle_threshold: Duration,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            let Some(session) = session.upgrade() else {
                break;
            };
            if let Err(err) = session.keepalive(idle_threshold).await {
                debug!("{} keepalive stopped: {}", session.host(), err);
                break;
            }
        }
    });
    task.abort_handle()
}
