use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{redirect, Proxy};
use tracing::debug;

use super::{join_url, RequestError, Requester, Response};

const MAX_REDIRECTS: usize = 10;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    Basic,
    Bearer,
}

impl AuthKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "bearer" => Some(Self::Bearer),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RequesterConfig {
    pub method: reqwest::Method,
    pub headers: HashMap<String, String>,
    pub data: Option<String>,
    pub auth: Option<(AuthKind, String)>,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub follow_redirects: bool,
    pub retries: usize,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            method: reqwest::Method::GET,
            headers: default_headers(),
            data: None,
            auth: None,
            timeout: Duration::from_millis(7500),
            proxy: None,
            follow_redirects: false,
            retries: 0,
        }
    }
}

pub fn default_headers() -> HashMap<String, String> {
    HashMap::from([
        ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language".to_string(), "en-US,en;q=0.5".to_string()),
        ("Connection".to_string(), "keep-alive".to_string()),
        ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
    ])
}

/// reqwest backed [`Requester`].
#[derive(Debug)]
pub struct HttpRequester {
    config: RequesterConfig,
    client: reqwest::Client,
    target: RwLock<Option<String>>,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpRequester {
    pub fn new(config: RequesterConfig) -> Result<Self, RequestError> {
        let client = build_client(&config, config.proxy.as_deref())?;
        Ok(Self {
            config,
            client,
            target: RwLock::new(None),
            proxied: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.config
    }

    fn target(&self) -> Result<String, RequestError> {
        let guard = self.target.read().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(RequestError::Unbound)
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, RequestError> {
        let proxy = match proxy.filter(|p| !p.trim().is_empty()) {
            Some(proxy) => proxy,
            None => return Ok(self.client.clone()),
        };
        let mut cache = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = cache.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, Some(proxy))?;
        cache.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<reqwest::Response, RequestError> {
        let mut builder = client.request(self.config.method.clone(), url);
        if let Some(data) = self.config.data.as_ref() {
            builder = builder.body(data.clone());
        }
        match self.config.auth.as_ref() {
            Some((AuthKind::Basic, credential)) => {
                let (user, pass) = credential
                    .split_once(':')
                    .unwrap_or((credential.as_str(), ""));
                builder = builder.basic_auth(user, Some(pass));
            }
            Some((AuthKind::Bearer, token)) => builder = builder.bearer_auth(token),
            None => {}
        }
        builder.send().await.map_err(|e| classify_error(url, e))
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        path: &str,
        full_path: &str,
    ) -> Result<Response, RequestError> {
        let mut url = full_path.to_string();
        let mut history: Vec<String> = Vec::new();
        loop {
            let resp = self.send(client, &url).await?;
            let status = resp.status().as_u16();
            let location = if (300..400).contains(&status) {
                resp.headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.to_string())
            } else {
                None
            };

            if self.config.follow_redirects {
                if let Some(location) = location.as_deref() {
                    if history.len() >= MAX_REDIRECTS {
                        return Err(RequestError::TooManyRedirects {
                            url: full_path.to_string(),
                        });
                    }
                    let next = resolve_location(&url, location)?;
                    history.push(std::mem::replace(&mut url, next));
                    continue;
                }
            }

            let headers = header_map_to_hashmap(resp.headers());
            let body = resp.bytes().await.map_err(|e| classify_error(&url, e))?;
            let redirect = match location {
                Some(location) => {
                    history.push(url.clone());
                    Some(location)
                }
                None if !history.is_empty() => Some(url.clone()),
                None => None,
            };
            return Ok(Response {
                status,
                length: body.len(),
                headers,
                body: String::from_utf8_lossy(&body).to_string(),
                path: path.to_string(),
                full_path: full_path.to_string(),
                redirect,
                history,
            });
        }
    }
}

impl Requester for HttpRequester {
    fn bind(&self, target: &str) -> Result<(), RequestError> {
        let target = target.trim();
        if reqwest::Url::parse(target).is_err() {
            return Err(RequestError::InvalidUrl {
                url: target.to_string(),
            });
        }
        let mut guard = self.target.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(target.to_string());
        Ok(())
    }

    fn request<'a>(
        &'a self,
        path: &'a str,
        proxy: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Response, RequestError>> {
        async move {
            let root = self.target()?;
            let full_path = join_url(&root, path);
            let client = self.client_for(proxy)?;
            let mut attempt = 0usize;
            loop {
                match self.fetch(&client, path, &full_path).await {
                    Err(e) if attempt < self.config.retries && is_retryable(&e) => {
                        attempt += 1;
                        debug!(url = %full_path, attempt, error = %e, "retrying request");
                    }
                    other => return other,
                }
            }
        }
        .boxed()
    }
}

fn build_client(
    config: &RequesterConfig,
    proxy: Option<&str>,
) -> Result<reqwest::Client, RequestError> {
    let mut headers = HeaderMap::new();
    for (k, v) in config.headers.iter() {
        let key = HeaderName::from_str(k.trim()).map_err(|_| RequestError::InvalidHeader {
            name: k.to_string(),
        })?;
        let value = HeaderValue::from_str(v.trim()).map_err(|_| RequestError::InvalidHeader {
            name: k.to_string(),
        })?;
        headers.insert(key, value);
    }

    // redirects are followed by hand so the history can be recorded
    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .redirect(redirect::Policy::none())
        .timeout(config.timeout)
        .danger_accept_invalid_hostnames(true)
        .danger_accept_invalid_certs(true);

    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        let p = Proxy::all(proxy).map_err(|e| RequestError::Proxy {
            proxy: proxy.to_string(),
            source: e,
        })?;
        builder = builder.proxy(p);
    }

    builder
        .build()
        .map_err(|e| RequestError::Client { source: e })
}

fn header_map_to_hashmap(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in headers.iter() {
        if let Ok(v) = v.to_str() {
            out.insert(k.as_str().to_lowercase(), v.to_string());
        }
    }
    out
}

fn resolve_location(current: &str, location: &str) -> Result<String, RequestError> {
    let base = reqwest::Url::parse(current).map_err(|_| RequestError::InvalidUrl {
        url: current.to_string(),
    })?;
    base.join(location)
        .map(|u| u.to_string())
        .map_err(|_| RequestError::InvalidUrl {
            url: location.to_string(),
        })
}

fn classify_error(url: &str, e: reqwest::Error) -> RequestError {
    if e.is_timeout() {
        RequestError::Timeout {
            url: url.to_string(),
        }
    } else {
        RequestError::Transport {
            url: url.to_string(),
            source: e,
        }
    }
}

fn is_retryable(e: &RequestError) -> bool {
    matches!(e, RequestError::Timeout { .. } | RequestError::Transport { .. })
}
