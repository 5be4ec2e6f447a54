//! Offline cache worker.
//!
//! [`CachePolicy`] decides how each request is answered: the application
//! document goes network-first, other same-origin `GET`s go cache-first and
//! are stored on first successful fetch, everything else passes straight to
//! the network. [`Worker`] runs a policy on its own thread; the UI talks to it
//! only through channel messages.

use std::thread;

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use sha1::{Digest, Sha1};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::network::{Method, Mode, Network, Request, Response, Source};
use crate::storage::{CacheEntry, Store};

const INSTALLED_KEY_PREFIX: &str = "offline-installed:";
const ACTIVE_VERSION_KEY: &str = "offline-active-version";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OfflineError {
    #[error("offline: install of {version} failed on {url}: {reason}")]
    Install {
        version: String,
        url: String,
        reason: String,
    },
    #[error("offline: {0} has not been installed")]
    NotInstalled(String),
    #[error("offline: {url} is not cached and the network failed: {reason}")]
    Miss { url: String, reason: String },
    #[error("offline: network request for {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("offline: cache storage failed: {0}")]
    Storage(String),
    #[error("offline: worker stopped")]
    Disconnected,
}

fn storage_error(err: anyhow::Error) -> OfflineError {
    OfflineError::Storage(format!("{err:#}"))
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the current cache bucket.
    pub version: String,
    /// Deployment base; shell paths and the origin check resolve against it.
    pub base_url: String,
    pub shell: Vec<String>,
    /// Shell entry served for navigations when nothing better is cached.
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { assets: usize },
    /// This version's shell is already stored from an earlier run.
    AlreadyInstalled,
}

pub struct CachePolicy<N: Network> {
    store: Store,
    network: N,
    version: String,
    base: Url,
    shell: Vec<String>,
    document: String,
    controller: Option<String>,
}

impl<N: Network> CachePolicy<N> {
    pub fn new(store: Store, network: N, settings: Settings) -> Result<Self> {
        let base = Url::parse(&settings.base_url)?;
        let shell = settings
            .shell
            .iter()
            .map(|path| base.join(path).map(|url| url.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let document = base.join(&settings.document)?.to_string();
        Ok(Self {
            store,
            network,
            version: settings.version,
            base,
            shell,
            document,
            controller: None,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The bucket currently answering fetches, if any.
    pub fn controller(&self) -> Option<&str> {
        self.controller.as_deref()
    }

    /// Stores the whole shell under the current version, or nothing.
    pub fn install(&mut self) -> Result<InstallOutcome, OfflineError> {
        let marker = format!("{INSTALLED_KEY_PREFIX}{}", self.version);
        let buckets = self.store.list_buckets().map_err(storage_error)?;
        if buckets.contains(&self.version)
            && self.store.get_value(&marker).map_err(storage_error)?.is_some()
        {
            debug!(version = %self.version, "offline: shell already installed");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let mut entries = Vec::with_capacity(self.shell.len());
        for url in &self.shell {
            let response = self
                .network
                .fetch(&Request::get(url.clone()))
                .map_err(|err| OfflineError::Install {
                    version: self.version.clone(),
                    url: url.clone(),
                    reason: format!("{err:#}"),
                })?;
            if !response.is_success() {
                return Err(OfflineError::Install {
                    version: self.version.clone(),
                    url: url.clone(),
                    reason: format!("status {}", response.status),
                });
            }
            entries.push(self.entry_for(url, &response));
        }

        self.store.put_all(&entries).map_err(storage_error)?;
        self.store
            .put_value(&marker, &Utc::now().to_rfc3339())
            .map_err(storage_error)?;
        info!(version = %self.version, assets = entries.len(), "offline: shell installed");
        Ok(InstallOutcome::Installed {
            assets: entries.len(),
        })
    }

    /// Deletes every bucket except the current version and starts answering
    /// fetches. Returns the deleted bucket names.
    pub fn activate(&mut self) -> Result<Vec<String>, OfflineError> {
        let marker = format!("{INSTALLED_KEY_PREFIX}{}", self.version);
        if self.store.get_value(&marker).map_err(storage_error)?.is_none() {
            return Err(OfflineError::NotInstalled(self.version.clone()));
        }

        let mut deleted = Vec::new();
        for bucket in self.store.list_buckets().map_err(storage_error)? {
            if bucket == self.version {
                continue;
            }
            self.store.delete_bucket(&bucket).map_err(storage_error)?;
            self.store
                .delete_value(&format!("{INSTALLED_KEY_PREFIX}{bucket}"))
                .map_err(storage_error)?;
            deleted.push(bucket);
        }
        self.store
            .put_value(ACTIVE_VERSION_KEY, &self.version)
            .map_err(storage_error)?;
        self.controller = Some(self.version.clone());
        info!(version = %self.version, purged = ?deleted, "offline: activated");
        Ok(deleted)
    }

    /// Keeps serving from the bucket of the last activated version. Used when
    /// a new version fails to install.
    pub fn resume_previous(&mut self) -> Option<String> {
        let previous = self.store.get_value(ACTIVE_VERSION_KEY).ok().flatten()?;
        let buckets = self.store.list_buckets().ok()?;
        if !buckets.contains(&previous) {
            return None;
        }
        warn!(previous = %previous, "offline: continuing with previously active cache");
        self.controller = Some(previous.clone());
        Some(previous)
    }

    pub fn handle_fetch(&self, request: &Request) -> Result<Response, OfflineError> {
        let Some(bucket) = self.controller.as_deref() else {
            return self.network_only(request);
        };
        if request.method != Method::Get {
            return self.network_only(request);
        }
        if self.is_document(request) {
            return self.network_first(bucket, request);
        }
        if !self.same_origin(&request.url) {
            return self.network_only(request);
        }
        self.cache_first(bucket, request)
    }

    fn network_first(&self, bucket: &str, request: &Request) -> Result<Response, OfflineError> {
        match self.network.fetch(request) {
            Ok(response) => {
                if response.is_success() && self.same_origin(&request.url) {
                    self.put(bucket, &request.url, &response);
                }
                Ok(response)
            }
            Err(err) => {
                warn!(url = %request.url, "offline: document fetch failed, using cache: {err:#}");
                let cached = self
                    .lookup(&request.url)
                    .or_else(|| self.lookup(&self.document));
                cached.ok_or_else(|| OfflineError::Miss {
                    url: request.url.clone(),
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    fn cache_first(&self, bucket: &str, request: &Request) -> Result<Response, OfflineError> {
        if let Some(cached) = self.lookup(&request.url) {
            trace!(url = %request.url, "offline: cache hit");
            return Ok(cached);
        }
        debug!(url = %request.url, "offline: cache miss");
        let response = self
            .network
            .fetch(request)
            .map_err(|err| OfflineError::Miss {
                url: request.url.clone(),
                reason: format!("{err:#}"),
            })?;
        if response.is_success() {
            self.put(bucket, &request.url, &response);
        }
        Ok(response)
    }

    fn network_only(&self, request: &Request) -> Result<Response, OfflineError> {
        self.network
            .fetch(request)
            .map_err(|err| OfflineError::Network {
                url: request.url.clone(),
                reason: format!("{err:#}"),
            })
    }

    fn lookup(&self, url: &str) -> Option<Response> {
        match self.store.match_entry(url) {
            Ok(Some(entry)) => Some(Response {
                url: entry.url,
                status: entry.status,
                content_type: entry.content_type,
                body: entry.body,
                source: Source::Cache,
            }),
            Ok(None) => None,
            Err(err) => {
                warn!(url, "offline: cache lookup failed: {err:#}");
                None
            }
        }
    }

    fn put(&self, bucket: &str, url: &str, response: &Response) {
        let entry = CacheEntry {
            bucket: bucket.to_string(),
            ..self.entry_for(url, response)
        };
        match self.store.put_entry(&entry) {
            Ok(()) => debug!(url, bucket, bytes = entry.body.len(), "offline: stored"),
            Err(err) => warn!(url, "offline: failed to store response: {err:#}"),
        }
    }

    fn entry_for(&self, url: &str, response: &Response) -> CacheEntry {
        CacheEntry {
            bucket: self.version.clone(),
            url: url.to_string(),
            status: response.status,
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            checksum: sha1_hex(&response.body),
            stored_at: Utc::now(),
        }
    }

    fn is_document(&self, request: &Request) -> bool {
        if request.mode == Mode::Navigate {
            return true;
        }
        Url::parse(&request.url)
            .map(|url| url.path().ends_with("/index.html"))
            .unwrap_or(false)
    }

    fn same_origin(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|url| {
                url.origin() == self.base.origin()
                    || (url.scheme() == "file" && self.base.scheme() == "file")
            })
            .unwrap_or(false)
    }
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub type FetchResult = Result<Response, OfflineError>;

/// Result of the install and activate steps run when the worker starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Activated {
        install: InstallOutcome,
        purged: Vec<String>,
    },
    /// Install failed; fetches are answered from an older version's bucket.
    Fallback { error: OfflineError, version: String },
    /// Install failed and nothing was cached before; fetches go to the
    /// network.
    Uncontrolled { error: OfflineError },
}

enum Message {
    Start {
        reply: Sender<Lifecycle>,
    },
    Fetch {
        request: Request,
        reply: Option<Sender<FetchResult>>,
    },
    Shutdown,
}

/// Cloneable sender side of a running worker.
#[derive(Clone)]
pub struct Handle {
    tx: Sender<Message>,
}

impl Handle {
    /// Runs install then activate. The receiver yields once both are done.
    pub fn start(&self) -> Receiver<Lifecycle> {
        let (reply, rx) = unbounded();
        let _ = self.tx.send(Message::Start { reply });
        rx
    }

    pub fn fetch(&self, request: Request) -> Receiver<FetchResult> {
        let (reply, rx) = unbounded();
        if self
            .tx
            .send(Message::Fetch {
                request,
                reply: Some(reply.clone()),
            })
            .is_err()
        {
            let _ = reply.send(Err(OfflineError::Disconnected));
        }
        rx
    }

    /// Fire-and-forget fetch; the result only warms the cache.
    pub fn preload(&self, url: impl Into<String>) {
        let _ = self.tx.send(Message::Fetch {
            request: Request::get(url),
            reply: None,
        });
    }
}

pub struct Worker {
    handle: Handle,
    join: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<N: Network + 'static>(policy: CachePolicy<N>) -> Self {
        let (tx, rx) = unbounded();
        let join = thread::Builder::new()
            .name("offline-worker".into())
            .spawn(move || run(policy, rx));
        let join = match join {
            Ok(join) => Some(join),
            Err(err) => {
                error!("offline: failed to spawn worker thread: {err}");
                None
            }
        };
        Self {
            handle: Handle { tx },
            join,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    fn shutdown(&mut self) {
        let _ = self.handle.tx.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<N: Network>(mut policy: CachePolicy<N>, rx: Receiver<Message>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Start { reply } => {
                let _ = reply.send(start(&mut policy));
            }
            Message::Fetch { request, reply } => {
                let result = policy.handle_fetch(&request);
                if let Err(err) = &result {
                    debug!(url = %request.url, "offline: fetch failed: {err}");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Message::Shutdown => break,
        }
    }
    debug!("offline: worker stopped");
}

fn start<N: Network>(policy: &mut CachePolicy<N>) -> Lifecycle {
    let install = match policy.install() {
        Ok(install) => install,
        Err(error) => {
            error!("{error}");
            return match policy.resume_previous() {
                Some(version) => Lifecycle::Fallback { error, version },
                None => Lifecycle::Uncontrolled { error },
            };
        }
    };
    match policy.activate() {
        Ok(purged) => Lifecycle::Activated { install, purged },
        Err(error) => {
            error!("{error}");
            Lifecycle::Uncontrolled { error }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockNetwork;
    use super::*;

    const BASE: &str = "https://clawmic.example/reader/";

    fn settings(version: &str) -> Settings {
        Settings {
            version: version.into(),
            base_url: BASE.into(),
            shell: vec!["index.html".into(), "comic_db.json".into()],
            document: "index.html".into(),
        }
    }

    fn site() -> MockNetwork {
        let network = MockNetwork::default();
        network.serve(&format!("{BASE}index.html"), b"<html>v1</html>");
        network.serve(&format!("{BASE}comic_db.json"), b"[]");
        network.serve(&format!("{BASE}img/issue1/p1.png"), b"png-bytes");
        network
    }

    fn ready(store: Store, network: MockNetwork, version: &str) -> CachePolicy<MockNetwork> {
        let mut policy = CachePolicy::new(store, network, settings(version)).unwrap();
        policy.install().unwrap();
        policy.activate().unwrap();
        policy
    }

    #[test]
    fn install_fails_without_partial_shell() {
        let store = Store::open_in_memory().unwrap();
        let network = MockNetwork::default();
        network.serve(&format!("{BASE}index.html"), b"<html>");
        let mut policy = CachePolicy::new(store.clone(), network, settings("v1")).unwrap();

        let err = policy.install().unwrap_err();
        assert!(matches!(err, OfflineError::Install { ref url, .. } if url.ends_with("comic_db.json")));
        assert_eq!(store.count_entries("v1").unwrap(), 0);
        assert!(matches!(
            policy.activate(),
            Err(OfflineError::NotInstalled(_))
        ));
    }

    #[test]
    fn activation_purges_other_versions() {
        let store = Store::open_in_memory().unwrap();
        store.open_bucket("clawmic-v1.008").unwrap();
        let mut policy =
            CachePolicy::new(store.clone(), site(), settings("clawmic-v1.009")).unwrap();
        policy.install().unwrap();
        assert_eq!(
            store.list_buckets().unwrap(),
            vec!["clawmic-v1.008", "clawmic-v1.009"]
        );

        let purged = policy.activate().unwrap();
        assert_eq!(purged, vec!["clawmic-v1.008"]);
        assert_eq!(store.list_buckets().unwrap(), vec!["clawmic-v1.009"]);
        assert_eq!(policy.controller(), Some("clawmic-v1.009"));
    }

    #[test]
    fn second_install_of_same_version_skips_network() {
        let store = Store::open_in_memory().unwrap();
        let network = site();
        ready(store.clone(), network.clone(), "v1");
        let before = network.requests().len();

        network.set_online(false);
        let mut again = CachePolicy::new(store, network.clone(), settings("v1")).unwrap();
        assert_eq!(again.install().unwrap(), InstallOutcome::AlreadyInstalled);
        again.activate().unwrap();
        assert_eq!(network.requests().len(), before);
    }

    #[test]
    fn assets_are_cache_first_after_first_fetch() {
        let store = Store::open_in_memory().unwrap();
        let network = site();
        let policy = ready(store, network.clone(), "v1");
        let url = format!("{BASE}img/issue1/p1.png");

        let first = policy.handle_fetch(&Request::get(url.clone())).unwrap();
        assert_eq!(first.source, Source::Network);

        network.set_online(false);
        let second = policy.handle_fetch(&Request::get(url)).unwrap();
        assert_eq!(second.source, Source::Cache);
        assert_eq!(second.body, b"png-bytes".to_vec());
    }

    #[test]
    fn failed_responses_are_not_stored() {
        let store = Store::open_in_memory().unwrap();
        let network = site();
        let policy = ready(store, network.clone(), "v1");
        let url = format!("{BASE}img/issue9/missing.png");

        let response = policy.handle_fetch(&Request::get(url.clone())).unwrap();
        assert_eq!(response.status, 404);
        network.set_online(false);
        assert!(matches!(
            policy.handle_fetch(&Request::get(url)),
            Err(OfflineError::Miss { .. })
        ));
    }

    #[test]
    fn document_is_network_first_with_shell_fallback() {
        let store = Store::open_in_memory().unwrap();
        let network = site();
        let policy = ready(store, network.clone(), "v1");

        network.serve(&format!("{BASE}index.html"), b"<html>v2</html>");
        let fresh = policy
            .handle_fetch(&Request::navigate(format!("{BASE}index.html")))
            .unwrap();
        assert_eq!(fresh.source, Source::Network);
        assert_eq!(fresh.body, b"<html>v2</html>".to_vec());

        network.set_online(false);
        let cached = policy
            .handle_fetch(&Request::navigate(format!("{BASE}index.html")))
            .unwrap();
        assert_eq!(cached.source, Source::Cache);
        assert_eq!(cached.body, b"<html>v2</html>".to_vec());

        let deep = policy
            .handle_fetch(&Request::navigate(format!("{BASE}?issue=3")))
            .unwrap();
        assert_eq!(deep.body, b"<html>v2</html>".to_vec());
    }

    #[test]
    fn non_get_and_cross_origin_are_never_cached() {
        let store = Store::open_in_memory().unwrap();
        let network = site();
        network.serve("https://cdn.example/font.woff", b"font");
        let policy = ready(store.clone(), network.clone(), "v1");
        let before = store.count_entries("v1").unwrap();

        policy
            .handle_fetch(&Request {
                url: format!("{BASE}comic_db.json"),
                method: Method::Post,
                mode: Mode::Subresource,
            })
            .unwrap();
        policy
            .handle_fetch(&Request::get("https://cdn.example/font.woff"))
            .unwrap();
        assert_eq!(store.count_entries("v1").unwrap(), before);
    }

    #[test]
    fn failed_upgrade_keeps_serving_previous_version() {
        let store = Store::open_in_memory().unwrap();
        let network = site();
        ready(store.clone(), network.clone(), "v1");

        network.set_online(false);
        let policy = CachePolicy::new(store, network, settings("v2")).unwrap();
        let worker = Worker::spawn(policy);
        let lifecycle = worker.handle().start().recv().unwrap();
        assert!(matches!(
            lifecycle,
            Lifecycle::Fallback { ref version, .. } if version == "v1"
        ));

        let response = worker
            .handle()
            .fetch(Request::get(format!("{BASE}comic_db.json")))
            .recv()
            .unwrap()
            .unwrap();
        assert_eq!(response.source, Source::Cache);
    }

    #[test]
    fn worker_runs_lifecycle_over_channels() {
        let store = Store::open_in_memory().unwrap();
        let policy = CachePolicy::new(store, site(), settings("v1")).unwrap();
        let worker = Worker::spawn(policy);
        let handle = worker.handle();

        let lifecycle = handle.start().recv().unwrap();
        assert_eq!(
            lifecycle,
            Lifecycle::Activated {
                install: InstallOutcome::Installed { assets: 2 },
                purged: vec![],
            }
        );

        handle.preload(format!("{BASE}img/issue1/p1.png"));
        let result = handle
            .fetch(Request::get(format!("{BASE}img/issue1/p1.png")))
            .recv()
            .unwrap()
            .unwrap();
        assert_eq!(result.source, Source::Cache);
        drop(worker);
        assert!(matches!(
            handle.fetch(Request::get(format!("{BASE}comic_db.json"))).recv(),
            Ok(Err(OfflineError::Disconnected))
        ));
    }
}
