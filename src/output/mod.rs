use colored::Colorize;
use serde::Serialize;

use crate::requester::Response;
use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

/// How hits are printed on the terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViewOptions {
    pub full_url: bool,
    pub redirects_history: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutputRecord {
    pub target: String,
    pub url: String,
    pub path: String,
    pub status: u16,
    pub size: usize,
    pub content_type: String,
    pub redirect: Option<String>,
}

impl OutputRecord {
    pub fn new(target: &str, response: &Response) -> Self {
        Self {
            target: target.to_string(),
            url: response.full_path.clone(),
            path: response.path.clone(),
            status: response.status,
            size: response.length,
            content_type: response.header("content-type").unwrap_or("").to_string(),
            redirect: response.redirect.clone(),
        }
    }
}

/// `STATUS SIZE URL` per line.
pub fn render_text(records: &[OutputRecord]) -> Vec<u8> {
    let mut out = String::new();
    for r in records {
        out.push_str(&format!("{} {} {}", r.status, utils::human_size(r.size), r.url));
        if let Some(redirect) = r.redirect.as_ref() {
            out.push_str(&format!("  -> {redirect}"));
        }
        out.push('\n');
    }
    out.into_bytes()
}

pub fn render_json(records: &[OutputRecord]) -> Vec<u8> {
    serde_json::to_vec_pretty(records).unwrap_or_else(|_| b"[]\n".to_vec())
}

pub fn render(format: OutputFormat, records: &[OutputRecord]) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(records),
        OutputFormat::Json => render_json(records),
    }
}

/// One colored terminal line for a hit.
pub fn format_hit(response: &Response, view: &ViewOptions) -> String {
    let status = response.status.to_string();
    let status = match response.status {
        200..=299 => status.bold().green(),
        300..=399 => status.bold().cyan(),
        401 | 403 => status.bold().blue(),
        400..=499 => status.bold().yellow(),
        500..=599 => status.bold().red(),
        _ => status.bold().white(),
    };
    let shown = if view.full_url {
        response.full_path.as_str()
    } else {
        response.path.as_str()
    };
    let mut line = format!(
        "{} {} {} {}",
        status,
        format!("{:>7}", utils::human_size(response.length)).white(),
        "-".white(),
        if view.full_url {
            shown.bold().white()
        } else {
            format!("/{shown}").bold().white()
        },
    );
    if let Some(redirect) = response.redirect.as_ref() {
        line.push_str(&format!("  {} {}", "->".bold().white(), redirect.bold().blue()));
    }
    if view.redirects_history && response.history.len() > 1 {
        for hop in response.history.iter() {
            line.push_str(&format!("\n        {} {}", "<-".white(), hop.white()));
        }
    }
    line
}
