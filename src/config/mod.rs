use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    // input
    pub urls: Option<Vec<String>>,
    pub url_file: Option<String>,
    pub cidr: Option<String>,

    // dictionary
    pub wordlists: Option<Vec<String>>,

    // general
    pub workers: Option<usize>,
    pub max_rate: Option<u32>,
    #[serde(alias = "delay_ms")]
    pub delay: Option<u64>,
    pub recursive: Option<bool>,
    pub deep_recursive: Option<bool>,
    pub force_recursive: Option<bool>,
    pub max_recursion_depth: Option<usize>,
    pub recursion_status: Option<String>,
    pub subdirs: Option<String>,
    pub exclude_subdirs: Option<String>,
    pub include_status: Option<String>,
    pub exclude_status: Option<String>,
    pub exclude_sizes: Option<String>,
    pub exclude_texts: Option<Vec<String>>,
    pub exclude_regex: Option<String>,
    pub exclude_redirect: Option<String>,
    pub min_response_size: Option<usize>,
    pub max_response_size: Option<usize>,
    pub skip_on_status: Option<String>,
    pub max_time: Option<u64>,
    pub max_errors: Option<usize>,
    pub exit_on_error: Option<bool>,
    /// status -> path suffixes treated as soft-404 pages
    pub blacklists: Option<HashMap<u16, Vec<String>>>,

    // request
    pub method: Option<String>,
    pub data: Option<String>,
    pub data_file: Option<String>,
    pub headers: Option<Vec<String>>,
    pub header_file: Option<String>,
    pub user_agent: Option<String>,
    pub cookie: Option<String>,
    pub auth: Option<String>,
    pub auth_type: Option<String>,
    pub follow_redirects: Option<bool>,

    // connection
    pub timeout: Option<f64>,
    pub retries: Option<usize>,
    pub proxy: Option<String>,
    pub replay_proxy: Option<String>,

    // view
    pub full_url: Option<bool>,
    pub redirects_history: Option<bool>,
    pub no_color: Option<bool>,
    pub quiet: Option<bool>,

    // output
    pub output: Option<String>,
    pub output_format: Option<String>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".hidir").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn expand_tilde_string(path: &str) -> String {
    expand_tilde(path).to_string_lossy().to_string()
}

pub fn parse_config(contents: &str) -> Result<ConfigFile, String> {
    serde_yaml::from_str::<ConfigFile>(contents).map_err(|e| e.to_string())
}

pub fn load_config(path: &PathBuf, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# hidir config
#
# Location (default):
#   ~/.hidir/config.yml
#
# Every key is optional. Command line flags win over this file.

# Targets
# urls:
#   - https://example.com/
# url_file: ./targets.txt
# cidr: 10.0.0.0/30

# Wordlists (default: every *.txt under ./dict)
# wordlists:
#   - ./dict/common.txt

# General
workers: 25
max_rate: 0
delay: 0
recursive: false
deep_recursive: false
force_recursive: false
max_recursion_depth: 0
# recursion_status: "200-399,401,403"
# subdirs: "api/,v2/"
# exclude_subdirs: "static/,assets/"
# include_status: "200-399"
exclude_status: "404"
# exclude_sizes: "0,1234"
# exclude_texts:
#   - "Not Found"
# exclude_regex: "(?i)page not found"
# exclude_redirect: "/login"
# min_response_size: 0
# max_response_size: 0
# skip_on_status: "429"
max_time: 0
max_errors: 5
exit_on_error: false
# blacklists:
#   403:
#     - "/403.html"
#   500:
#     - "/500.html"

# Request
method: GET
# data: "a=b"
# data_file: ./body.txt
# headers:
#   - "X-Forwarded-For: 127.0.0.1"
# header_file: ./headers.txt
# user_agent: "hidir"
# cookie: "session=..."
# auth: "user:pass"
# auth_type: basic
follow_redirects: false

# Connection
timeout: 7.5
retries: 1
# proxy: http://127.0.0.1:8080
# replay_proxy: http://127.0.0.1:8080

# View
full_url: false
redirects_history: false
no_color: false
quiet: false

# Output
# output: ./hits.json
# output_format: json
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &PathBuf) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}
