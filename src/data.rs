use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use tracing::{info, warn};

use crate::catalog::{self, AboutText, AssetPaths, Catalog};
use crate::network::{Request, Response, Source};
use crate::offline::{FetchResult, Handle};

/// Everything the UI needs before it can render a route.
#[derive(Debug, Clone, Default)]
pub struct SiteData {
    pub catalog: Catalog,
    pub about: AboutText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    /// The document came from the offline cache.
    Offline,
    Unreachable,
}

/// Fetches the catalog and the editor note together and fails unless both
/// arrive intact.
pub fn load_site(handle: &Handle, paths: &AssetPaths) -> Result<SiteData> {
    let catalog_rx = handle.fetch(Request::get(paths.catalog()));
    let about_rx = handle.fetch(Request::get(paths.about()));

    let catalog_response = receive(catalog_rx, catalog::CATALOG_FILE);
    let about_response = receive(about_rx, catalog::ABOUT_FILE);
    let catalog_response = catalog_response?;
    let about_response = about_response?;

    let catalog = Catalog::from_json(&catalog_response.body)
        .with_context(|| format!("{} is not a list of issues", catalog::CATALOG_FILE))?;
    let about = catalog::parse_about_text(&about_response.text());
    info!(
        issues = catalog.len(),
        catalog_source = ?catalog_response.source,
        "data: site loaded"
    );
    Ok(SiteData { catalog, about })
}

/// Requests the application document the way a page load would and reports
/// where it came from.
pub fn check_connectivity(handle: &Handle, paths: &AssetPaths) -> Connectivity {
    match handle.fetch(Request::navigate(paths.document())).recv() {
        Ok(Ok(response)) if response.source == Source::Network => Connectivity::Online,
        Ok(Ok(_)) => Connectivity::Offline,
        Ok(Err(err)) => {
            warn!("data: document unavailable: {err}");
            Connectivity::Unreachable
        }
        Err(_) => Connectivity::Unreachable,
    }
}

fn receive(rx: Receiver<FetchResult>, name: &str) -> Result<Response> {
    let response = rx
        .recv()
        .with_context(|| format!("{name} load failed: worker stopped"))?
        .with_context(|| format!("{name} load failed"))?;
    if !response.is_success() {
        bail!("{name} load failed: status {}", response.status);
    }
    Ok(response)
}
