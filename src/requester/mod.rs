mod http;

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

pub use http::{AuthKind, HttpRequester, RequesterConfig};

/// Result of one probe. Immutable once built.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Response {
    pub status: u16,
    pub length: usize,
    pub headers: HashMap<String, String>,
    #[serde(skip)]
    pub body: String,
    /// Path relative to the target root, as requested.
    pub path: String,
    pub full_path: String,
    pub redirect: Option<String>,
    pub history: Vec<String>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no target bound to the requester")]
    Unbound,

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("too many redirects starting at {url}")]
    TooManyRedirects { url: String },

    #[error("invalid header: {name}")]
    InvalidHeader { name: String },

    #[error("failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to setup proxy: {proxy}: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Issues one request for a path relative to the bound target.
///
/// Implementations report redirects through [`Response::redirect`] and
/// [`Response::history`] instead of following them silently.
pub trait Requester: Send + Sync {
    /// Binds the target root every subsequent path is resolved against.
    fn bind(&self, target: &str) -> Result<(), RequestError>;

    fn request<'a>(
        &'a self,
        path: &'a str,
        proxy: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Response, RequestError>>;
}

/// Joins a target root and a relative path with exactly one slash.
pub fn join_url(root: &str, path: &str) -> String {
    let mut out = root.to_string();
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(path.trim_start_matches('/'));
    out
}
