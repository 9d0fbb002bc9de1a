use std::{fmt, sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use reqwest::Url;

use crate::{LoaderError, Result};

/// Long-lived HTTP client bound to one base address.
///
/// `reqwest::Client` keeps its own connection pool, so one handle per base
/// address means one socket pool per remote endpoint for the process lifetime.
#[derive(Debug)]
pub struct EndpointHandle {
    base: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl EndpointHandle {
    fn connect(base_address: &str, timeout: Duration) -> Result<Self> {
        let base = parse_base_address(base_address)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LoaderError::Request)?;
        Ok(Self {
            base,
            http,
            timeout,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves `path` (with optional query) against the base address.
    pub fn join(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| LoaderError::InvalidEndpoint(format!("{}{path}: {err}", self.base)))
    }
}

/// Keyed cache of [`EndpointHandle`]s shared by every client of an endpoint.
///
/// Cloning the pool clones a reference to the same map. The composition root
/// owns the pool and tears it down with [`ConnectionPool::dispose_all`].
#[derive(Clone, Default)]
pub struct ConnectionPool {
    handles: Arc<DashMap<String, Arc<EndpointHandle>>>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoints", &self.handles.len())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `key`, creating it on first use.
    ///
    /// Creation happens under the map's shard lock, so concurrent callers for
    /// the same key always observe a single handle. The timeout only applies
    /// when the handle is created.
    pub fn get_or_create(&self, key: &str, timeout: Duration) -> Result<Arc<EndpointHandle>> {
        match self.handles.entry(key.to_owned()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let handle = Arc::new(EndpointHandle::connect(key, timeout)?);
                tracing::debug!(endpoint = key, ?timeout, "created pooled http client");
                entry.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Evicts the handle for `key`. Clients still holding it keep working
    /// until they drop their reference.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.handles.remove(key).is_some();
        if removed {
            tracing::debug!(endpoint = key, "removed pooled http client");
        }
        removed
    }

    pub fn dispose_all(&self) {
        let count = self.handles.len();
        self.handles.clear();
        tracing::debug!(count, "disposed pooled http clients");
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn parse_base_address(base_address: &str) -> Result<Url> {
    let trimmed = base_address.trim();
    if trimmed.is_empty() {
        return Err(LoaderError::InvalidEndpoint(
            "base address cannot be empty".to_owned(),
        ));
    }
    let url = Url::parse(trimmed)
        .map_err(|err| LoaderError::InvalidEndpoint(format!("{trimmed}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoaderError::InvalidEndpoint(format!(
            "{trimmed}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::ConnectionPool;
    use crate::LoaderError;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn same_key_returns_shared_handle() {
        let pool = ConnectionPool::new();
        let first = pool
            .get_or_create("https://api.example.dev", TIMEOUT)
            .expect("must create");
        let second = pool
            .get_or_create("https://api.example.dev", Duration::from_secs(1))
            .expect("must reuse");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.timeout(), TIMEOUT);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn concurrent_callers_observe_one_handle() {
        let pool = ConnectionPool::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    pool.get_or_create("https://api.example.dev", TIMEOUT)
                        .expect("must create")
                })
            })
            .collect();

        let created: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread must not panic"))
            .collect();

        assert!(created.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn invalid_base_address_is_rejected() {
        let pool = ConnectionPool::new();
        for key in ["", "not a url", "ftp://files.example.dev"] {
            let err = pool.get_or_create(key, TIMEOUT).expect_err("must fail");
            assert!(matches!(err, LoaderError::InvalidEndpoint(_)), "{key}");
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn remove_and_dispose_evict_handles() {
        let pool = ConnectionPool::new();
        pool.get_or_create("https://a.example.dev", TIMEOUT)
            .expect("must create");
        pool.get_or_create("https://b.example.dev", TIMEOUT)
            .expect("must create");

        assert!(pool.remove("https://a.example.dev"));
        assert!(!pool.remove("https://a.example.dev"));
        assert!(!pool.contains("https://a.example.dev"));

        pool.dispose_all();
        assert!(pool.is_empty());
    }

    #[test]
    fn join_resolves_paths_against_base() {
        let pool = ConnectionPool::new();
        let handle = pool
            .get_or_create("https://api.example.dev", TIMEOUT)
            .expect("must create");
        let url = handle.join("/v1.4/movie/random?year=2000-2020").expect("must join");
        assert_eq!(
            url.as_str(),
            "https://api.example.dev/v1.4/movie/random?year=2000-2020"
        );
    }
}
