use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::{self, AssetPaths};
use crate::config::Config;
use crate::network::HttpNetwork;
use crate::offline::{CachePolicy, Settings, Worker};
use crate::preferences::{self, ReaderPreferences};
use crate::router;
use crate::storage;
use crate::ui;

pub fn run(cfg: Config, fragment: Option<String>) -> Result<()> {
    let store = storage::Store::open(storage::Options {
        path: cfg.storage.path.clone(),
    })
    .context("open storage")?;
    let prefs = preferences::load(&store);

    let paths = AssetPaths::new(&cfg.site.base_url)
        .with_context(|| format!("invalid site.base_url {:?}", cfg.site.base_url))?;

    let offline_path = cfg
        .offline
        .database
        .clone()
        .or_else(storage::default_offline_path)
        .context("resolve offline cache path")?;
    let offline_store = storage::Store::open(storage::Options {
        path: Some(offline_path),
    })
    .context("open offline cache")?;
    let network = HttpNetwork::new(cfg.site.request_timeout)?;
    let policy = CachePolicy::new(
        offline_store,
        network,
        Settings {
            version: cfg.offline.cache_version.clone(),
            base_url: paths.base().to_string(),
            shell: cfg.offline.shell.clone(),
            document: catalog::DOCUMENT_FILE.to_string(),
        },
    )
    .context("configure offline cache")?;
    let worker = Worker::spawn(policy);

    let initial_fragment = initial_fragment(fragment, &prefs);
    info!(
        base_url = %paths.base(),
        cache_version = %cfg.offline.cache_version,
        fragment = %initial_fragment,
        "app: starting"
    );

    let mut model = ui::Model::new(ui::Options {
        worker: worker.handle(),
        store,
        paths,
        preferences: prefs,
        initial_fragment,
        cache_version: cfg.offline.cache_version.clone(),
        tick_rate: cfg.ui.tick_rate,
    });
    let result = model.run();
    drop(model);
    drop(worker);
    result
}

/// A fragment given on the command line wins; otherwise the last reader
/// location is resumed, and with neither the router falls back to the
/// library.
pub fn initial_fragment(cli: Option<String>, prefs: &ReaderPreferences) -> String {
    if let Some(fragment) = cli {
        return router::normalize_fragment(&fragment);
    }
    match prefs.issue_id {
        Some(issue_id) => {
            let page = prefs.page.map(|page| page as usize).unwrap_or(0);
            router::reader_fragment(issue_id, page)
        }
        None => String::new(),
    }
}
