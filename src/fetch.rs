//! Retrieval of the registries' delegated stats files.
use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use crate::delegations::Registry;


//------------ Fetcher -------------------------------------------------------

/// Provides the raw bytes of one registry's delegated extended stats.
pub trait Fetcher: Sync {
    fn fetch(&self, registry: Registry) -> Result<Vec<u8>, FetchError>;
}


//------------ HttpFetcher ---------------------------------------------------

/// Downloads the latest files from the registries' public FTP mirrors over
/// HTTPS. Gzip encoded responses are decoded transparently.
pub struct HttpFetcher {
    client: reqwest::blocking::Client
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Permanent(e.to_string()))?;
        Ok(HttpFetcher { client })
    }

    pub fn url(registry: Registry) -> &'static str {
        match registry {
            Registry::Arin    => "https://ftp.arin.net/pub/stats/arin/delegated-arin-extended-latest",
            Registry::Ripe    => "https://ftp.ripe.net/pub/stats/ripencc/delegated-ripencc-extended-latest",
            Registry::Apnic   => "https://ftp.apnic.net/pub/stats/apnic/delegated-apnic-extended-latest",
            Registry::Lacnic  => "https://ftp.lacnic.net/pub/stats/lacnic/delegated-lacnic-extended-latest",
            Registry::Afrinic => "https://ftp.afrinic.net/pub/stats/afrinic/delegated-afrinic-extended-latest"
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, registry: Registry) -> Result<Vec<u8>, FetchError> {
        let url = Self::url(registry);
        info!("downloading {} data from {}", registry, url);

        let response = self.client.get(url).send()?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Transient(format!("{} returned {}", url, status)))
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("{} returned {}", url, status)))
        }
        Ok(response.bytes()?.to_vec())
    }
}


//------------ DirectoryFetcher ----------------------------------------------

/// Reads previously downloaded files named like the registries publish them,
/// e.g. `delegated-ripencc-extended-latest`, from a local directory.
pub struct DirectoryFetcher {
    dir: PathBuf
}

impl DirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryFetcher { dir: dir.into() }
    }

    pub fn path(&self, registry: Registry) -> PathBuf {
        self.dir.join(registry.file_name())
    }
}

impl Fetcher for DirectoryFetcher {
    fn fetch(&self, registry: Registry) -> Result<Vec<u8>, FetchError> {
        let path = self.path(registry);
        debug!("reading {} data from {}", registry, path.display());
        fs::read(&path).map_err(|e| FetchError::from_io(&path, e))
    }
}


//------------ RetryPolicy ---------------------------------------------------

/// How often and how patiently a failed fetch is repeated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Wait before the first retry.
    pub backoff: Duration,

    /// Factor applied to the wait after every retry.
    pub multiplier: u32
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        RetryPolicy { max_attempts, backoff, multiplier: 1 }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// The wait after the given failed attempt, counting from one.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.backoff * factor
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_secs(5))
    }
}


//------------ Retrying ------------------------------------------------------

/// Wraps a fetcher and repeats transient failures according to a policy.
/// Permanent failures are returned immediately.
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy
}

impl<F: Fetcher> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Retrying { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }
}

impl<F: Fetcher> Fetcher for Retrying<F> {
    fn fetch(&self, registry: Registry) -> Result<Vec<u8>, FetchError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.fetch(registry) {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::Transient(msg)) if attempt < attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        "attempt {} of {} failed for {}: {}, retrying in {:?}",
                        attempt, attempts, registry, msg, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "failed to fetch {} after {} attempt(s): {}",
                        registry, attempt, e
                    );
                    return Err(e)
                }
            }
        }
    }
}


//------------ FetchError ----------------------------------------------------

#[derive(Debug, Display)]
pub enum FetchError {
    #[display(fmt = "Transient fetch failure: {}", _0)]
    Transient(String),

    #[display(fmt = "Fetch failed: {}", _0)]
    Permanent(String),
}

impl FetchError {
    fn from_io(path: &PathBuf, e: io::Error) -> Self {
        let msg = format!("{}: {}", path.display(), e);
        match e.kind() {
            io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
                FetchError::Transient(msg)
            }
            _ => FetchError::Permanent(msg)
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transient(_) => true,
            FetchError::Permanent(_) => false
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            FetchError::Transient(e.to_string())
        } else {
            FetchError::Permanent(e.to_string())
        }
    }
}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    /// Fails transiently a given number of times before succeeding.
    struct Flaky {
        failures: u32,
        calls: AtomicU32
    }

    impl Fetcher for Flaky {
        fn fetch(&self, _registry: Registry) -> Result<Vec<u8>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FetchError::Transient("connection reset".to_string()))
            } else {
                Ok(b"data".to_vec())
            }
        }
    }

    struct Gone;

    impl Fetcher for Gone {
        fn fetch(&self, _registry: Registry) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Permanent("404".to_string()))
        }
    }

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(0))
    }

    #[test]
    fn should_retry_transient_failures() {
        let fetcher = Retrying::new(Flaky { failures: 2, calls: AtomicU32::new(0) }, no_wait(3));
        assert_eq!(b"data".to_vec(), fetcher.fetch(Registry::Arin).unwrap());
        assert_eq!(3, fetcher.inner.calls.load(Ordering::SeqCst));
    }

    #[test]
    fn should_give_up_after_max_attempts() {
        let fetcher = Retrying::new(Flaky { failures: 5, calls: AtomicU32::new(0) }, no_wait(3));
        let err = fetcher.fetch(Registry::Arin).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(3, fetcher.inner.calls.load(Ordering::SeqCst));
    }

    #[test]
    fn should_not_retry_permanent_failures() {
        let fetcher = Retrying::new(Gone, no_wait(3));
        assert!(!fetcher.fetch(Registry::Ripe).unwrap_err().is_transient());
    }

    #[test]
    fn should_compute_backoff_schedule() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2)).with_multiplier(3);
        assert_eq!(Duration::from_secs(2), policy.delay(1));
        assert_eq!(Duration::from_secs(6), policy.delay(2));
        assert_eq!(Duration::from_secs(18), policy.delay(3));
        assert_eq!(Duration::from_secs(5), RetryPolicy::default().delay(2));
    }

    #[test]
    fn should_read_files_from_directory() {
        let fetcher = DirectoryFetcher::new("test/delegated");
        let bytes = fetcher.fetch(Registry::Apnic).unwrap();
        assert!(!bytes.is_empty());
        assert!(!fetcher.fetch(Registry::Afrinic).unwrap_err().is_transient());
    }

    #[test]
    fn should_know_registry_urls() {
        for registry in Registry::ALL.iter() {
            assert!(HttpFetcher::url(*registry).ends_with(&registry.file_name()));
        }
    }
}
