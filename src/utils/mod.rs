use std::collections::{HashMap, HashSet};

use ipnet::IpNet;
use itertools::Itertools;

pub fn parse_u16_set_csv(value: &str) -> Result<HashSet<u16>, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("list is empty".to_string());
    }
    let mut out = HashSet::new();
    for part in raw.split(',') {
        let item = part.trim();
        if item.is_empty() {
            continue;
        }
        // dirsearch-style ranges, e.g. 500-599
        if let Some((start, end)) = item.split_once('-') {
            let start: u16 = start
                .trim()
                .parse()
                .map_err(|_| format!("invalid status code range '{item}'"))?;
            let end: u16 = end
                .trim()
                .parse()
                .map_err(|_| format!("invalid status code range '{item}'"))?;
            if start > end {
                return Err(format!("invalid status code range '{item}'"));
            }
            out.extend(start..=end);
            continue;
        }
        let code: u16 = item
            .parse()
            .map_err(|_| format!("invalid status code '{item}'"))?;
        out.insert(code);
    }
    if out.is_empty() {
        return Err("list is empty".to_string());
    }
    Ok(out)
}

pub fn parse_usize_set_csv(value: &str) -> Result<HashSet<usize>, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("list is empty".to_string());
    }
    let mut out = HashSet::new();
    for part in raw.split(',') {
        let item = part.trim();
        if item.is_empty() {
            continue;
        }
        let size: usize = item.parse().map_err(|_| format!("invalid size '{item}'"))?;
        out.insert(size);
    }
    if out.is_empty() {
        return Err("list is empty".to_string());
    }
    Ok(out)
}

/// Splits a comma separated option into trimmed, non-empty items.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Removes duplicates while keeping the first occurrence of every item.
pub fn uniq(items: Vec<String>) -> Vec<String> {
    items.into_iter().unique().collect()
}

/// Widest block `expand_cidr` accepts, in host bits (a /16 for IPv4).
pub const MAX_CIDR_HOST_BITS: u8 = 16;

/// Expands a CIDR block into its host addresses. For IPv4 blocks wider than
/// /31 the network and broadcast addresses are dropped. Blocks with more
/// than 2^16 addresses are refused.
pub fn expand_cidr(cidr: &str) -> Result<Vec<String>, String> {
    let net: IpNet = cidr
        .trim()
        .parse()
        .map_err(|e| format!("invalid CIDR '{cidr}': {e}"))?;
    let host_bits = net.max_prefix_len() - net.prefix_len();
    if host_bits > MAX_CIDR_HOST_BITS {
        return Err(format!(
            "CIDR '{cidr}' is too large, at most {MAX_CIDR_HOST_BITS} host bits (e.g. /{}) are scanned",
            net.max_prefix_len() - MAX_CIDR_HOST_BITS
        ));
    }
    Ok(net.hosts().map(|ip| ip.to_string()).collect())
}

/// Parses `Key: Value` header lines. Lines without a colon are ignored and
/// later occurrences of a key replace earlier ones.
pub fn parse_headers(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            out.insert(key.to_string(), value.trim().to_string());
        }
    }
    out
}

pub fn human_size(bytes: usize) -> String {
    const UNIT: usize = 1024;
    if bytes < UNIT {
        return format!("{bytes}B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1}{}B", bytes as f64 / div as f64, suffix)
}
