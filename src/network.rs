use std::fs;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

/// How the request was initiated. `Navigate` loads the application document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Navigate,
    #[default]
    Subresource,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub mode: Mode,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            mode: Mode::Subresource,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            mode: Mode::Navigate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub source: Source,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that can perform a request without any caching.
pub trait Network: Send {
    /// Transport failures are errors; HTTP error statuses are responses.
    fn fetch(&self, request: &Request) -> Result<Response>;
}

#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: Client,
    user_agent: String,
}

impl HttpNetwork {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("network: build http client")?;
        Ok(Self {
            http,
            user_agent: format!("clawmic-reader/{}", crate::VERSION),
        })
    }

    fn fetch_file(&self, url: &Url) -> Result<Response> {
        let path = url
            .to_file_path()
            .map_err(|_| anyhow!("network: invalid file url {url}"))?;
        let body = fs::read(&path)
            .with_context(|| format!("network: read {}", path.display()))?;
        Ok(Response {
            url: url.to_string(),
            status: 200,
            content_type: detect_mime(&body),
            body,
            source: Source::Network,
        })
    }
}

impl Network for HttpNetwork {
    fn fetch(&self, request: &Request) -> Result<Response> {
        let url = Url::parse(&request.url)
            .with_context(|| format!("network: parse url {}", request.url))?;
        if url.scheme() == "file" {
            if request.method != Method::Get {
                bail!("network: {} not supported for file urls", request.method.as_str());
            }
            return self.fetch_file(&url);
        }

        let builder = match request.method {
            Method::Get => self.http.get(url.clone()),
            Method::Head => self.http.head(url.clone()),
            Method::Post => self.http.post(url.clone()),
        };
        let response = builder
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("network: {} {}", request.method.as_str(), url))?;

        let status = response.status().as_u16();
        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .map(|s| s.to_string());
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .context("network: read body")?
            .to_vec();
        let content_type = header_type.unwrap_or_else(|| detect_mime(&body));

        Ok(Response {
            url: final_url,
            status,
            content_type,
            body,
            source: Source::Network,
        })
    }
}

pub fn detect_mime(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(512)];
    tree_magic_mini::from_u8(head).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_urls_read_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comic_db.json");
        fs::write(&path, b"[]").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let network = HttpNetwork::new(Duration::from_secs(1)).unwrap();
        let response = network.fetch(&Request::get(url.as_str())).unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, b"[]".to_vec());
        assert_eq!(response.source, Source::Network);

        let missing = Url::from_file_path(dir.path().join("nope.json")).unwrap();
        assert!(network.fetch(&Request::get(missing.as_str())).is_err());
    }
}
