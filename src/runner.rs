use std::collections::HashMap;
use std::sync::Arc;

use indicatif::ProgressBar;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::classifier::FilterSet;
use crate::controller::{Command, Controller, ControllerError, ScanOptions, ScanReport};
use crate::dictionary::{self, Dictionary, DictionaryError, WordlistSource};
use crate::output::{self, OutputFormat, OutputRecord, ViewOptions};
use crate::requester::{HttpRequester, RequestError, RequesterConfig};
use crate::utils;

pub const DEFAULT_DICT_DIR: &str = "./dict";

#[derive(Clone, Debug)]
pub struct Options {
    pub urls: Vec<String>,
    pub url_file: Option<String>,
    pub stdin: bool,
    pub cidr: Option<String>,
    /// Empty means every `*.txt` under `dict_dir`.
    pub wordlists: Vec<WordlistSource>,
    pub dict_dir: String,
    pub scan: ScanOptions,
    pub filters: FilterSet,
    pub request: RequesterConfig,
    /// Applied over the defaults and the header file.
    pub headers: HashMap<String, String>,
    pub header_file: Option<String>,
    pub data_file: Option<String>,
    pub view: ViewOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            url_file: None,
            stdin: false,
            cidr: None,
            wordlists: Vec::new(),
            dict_dir: DEFAULT_DICT_DIR.to_string(),
            scan: ScanOptions::default(),
            filters: FilterSet::default(),
            request: RequesterConfig::default(),
            headers: HashMap::new(),
            header_file: None,
            data_file: None,
            view: ViewOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no targets provided (urls, url_file, stdin and cidr are all empty)")]
    NoTargets,

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("invalid workers {value}, expected positive integer")]
    InvalidWorkers { value: usize },

    #[error("invalid CIDR: {message}")]
    InvalidCidr { message: String },

    #[error("failed to open file for {kind}: {path}: {source}")]
    FileOpen {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read lines for {kind}: {path}: {source}")]
    FileRead {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load wordlists: {source}")]
    Dictionary {
        #[from]
        source: DictionaryError,
    },

    #[error("failed to setup requester: {source}")]
    Requester {
        #[source]
        source: RequestError,
    },

    #[error("scan failed: {source}")]
    Scan {
        #[from]
        source: ControllerError,
    },

    #[error("failed to write output: {path}: {source}")]
    OutputWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ScanResult {
    pub targets: Vec<String>,
    pub dictionary_size: usize,
    pub report: ScanReport,
}

impl ScanResult {
    pub fn records(&self) -> Vec<OutputRecord> {
        self.report
            .targets
            .iter()
            .flat_map(|t| t.hits.iter().map(|h| OutputRecord::new(&t.target, h)))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct Runner {
    options: Options,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        if options.urls.iter().all(|u| u.trim().is_empty())
            && options.url_file.is_none()
            && !options.stdin
            && options.cidr.is_none()
        {
            return Err(RunnerError::NoTargets);
        }
        if options.scan.workers == 0 {
            return Err(RunnerError::InvalidWorkers { value: 0 });
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub async fn run(&self) -> Result<ScanResult, RunnerError> {
        self.run_with(ProgressBar::hidden(), None).await
    }

    /// Like [`Runner::run`], printing hits above `pb` and obeying operator
    /// commands from `commands`.
    pub async fn run_with(
        &self,
        pb: ProgressBar,
        commands: Option<mpsc::Receiver<Command>>,
    ) -> Result<ScanResult, RunnerError> {
        let targets = self.load_targets().await?;
        info!(targets = targets.len(), "targets loaded");

        let dictionary = Arc::new(self.load_dictionary().await?);
        info!(words = dictionary.len(), "dictionary loaded");

        let requester = Arc::new(
            HttpRequester::new(self.requester_config().await?)
                .map_err(|e| RunnerError::Requester { source: e })?,
        );

        let mut controller = Controller::new(
            requester,
            dictionary.clone(),
            self.options.filters.clone(),
            self.options.scan.clone(),
        )
        .with_progress(pb)
        .with_view(self.options.view);
        if let Some(commands) = commands {
            controller = controller.with_commands(commands);
        }

        let report = controller.run(&targets).await?;
        Ok(ScanResult {
            targets,
            dictionary_size: dictionary.len(),
            report,
        })
    }

    pub async fn load_targets(&self) -> Result<Vec<String>, RunnerError> {
        let mut out: Vec<String> = self
            .options
            .urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        if let Some(path) = self.options.url_file.as_deref().filter(|p| !p.trim().is_empty()) {
            let path = crate::config::expand_tilde_string(path);
            let handle = File::open(&path).await.map_err(|e| RunnerError::FileOpen {
                kind: "url_file",
                path: path.clone(),
                source: e,
            })?;
            out.extend(read_lines("url_file", &path, BufReader::new(handle)).await?);
        }

        if self.options.stdin {
            let stdin = BufReader::new(tokio::io::stdin());
            out.extend(read_lines("stdin", "-", stdin).await?);
        }

        if let Some(cidr) = self.options.cidr.as_deref() {
            let hosts =
                utils::expand_cidr(cidr).map_err(|message| RunnerError::InvalidCidr { message })?;
            out.extend(hosts.iter().map(|h| host_url(h)));
        }

        let out = utils::uniq(out);
        if out.is_empty() {
            return Err(RunnerError::NoTargets);
        }
        for url in out.iter() {
            if reqwest::Url::parse(url).is_err() {
                return Err(RunnerError::InvalidUrl { url: url.clone() });
            }
        }
        Ok(out)
    }

    pub async fn load_dictionary(&self) -> Result<Dictionary, RunnerError> {
        let sources = if self.options.wordlists.is_empty() {
            let dir = crate::config::expand_tilde_string(&self.options.dict_dir);
            dictionary::discover_wordlists(&dir)
                .await?
                .into_iter()
                .map(WordlistSource::FilePath)
                .collect::<Vec<_>>()
        } else {
            self.options
                .wordlists
                .iter()
                .map(|s| match s {
                    WordlistSource::FilePath(p) => {
                        WordlistSource::FilePath(crate::config::expand_tilde_string(p))
                    }
                    inline => inline.clone(),
                })
                .collect()
        };
        debug!(sources = sources.len(), "loading wordlists");
        Ok(Dictionary::load(&sources).await?)
    }

    /// Request settings with the header file, `headers` overrides and the
    /// body file folded in.
    pub async fn requester_config(&self) -> Result<RequesterConfig, RunnerError> {
        let mut config = self.options.request.clone();
        if let Some(path) = self.options.header_file.as_deref() {
            let path = crate::config::expand_tilde_string(path);
            let raw = read_file("header_file", &path).await?;
            merge_headers(&mut config.headers, utils::parse_headers(&raw));
        }
        merge_headers(&mut config.headers, self.options.headers.clone());
        if let Some(path) = self.options.data_file.as_deref() {
            let path = crate::config::expand_tilde_string(path);
            config.data = Some(read_file("data_file", &path).await?);
        }
        Ok(config)
    }
}

/// Writes hits to `path`, replacing any previous content.
pub async fn write_output(
    path: &str,
    format: OutputFormat,
    records: &[OutputRecord],
) -> Result<(), RunnerError> {
    let rendered = output::render(format, records);
    let mut outfile = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| RunnerError::OutputWrite {
            path: path.to_string(),
            source: e,
        })?;
    outfile
        .write_all(&rendered)
        .await
        .map_err(|e| RunnerError::OutputWrite {
            path: path.to_string(),
            source: e,
        })
}

async fn read_lines<R>(kind: &'static str, path: &str, reader: R) -> Result<Vec<String>, RunnerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut out = Vec::new();
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                out.push(line.to_string());
            }
            Ok(None) => break,
            Err(e) => {
                return Err(RunnerError::FileRead {
                    kind,
                    path: path.to_string(),
                    source: e,
                })
            }
        }
    }
    Ok(out)
}

async fn read_file(kind: &'static str, path: &str) -> Result<String, RunnerError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunnerError::FileOpen {
            kind,
            path: path.to_string(),
            source: e,
        })
}

// header names are case-insensitive; a later value replaces any spelling
fn merge_headers(base: &mut HashMap<String, String>, extra: HashMap<String, String>) {
    for (key, value) in extra {
        base.retain(|k, _| !k.eq_ignore_ascii_case(&key));
        base.insert(key, value);
    }
}

fn host_url(host: &str) -> String {
    if host.contains(':') {
        format!("http://[{host}]/")
    } else {
        format!("http://{host}/")
    }
}
