use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::requester::Response;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Directory {
    pub path: String,
    pub depth: usize,
}

/// Book-keeping for the target being scanned. Only the controller task
/// touches it.
#[derive(Debug)]
pub(crate) struct ScanState {
    pub target: String,
    pub queue: VecDeque<Directory>,
    pub passed: HashSet<String>,
    pub current: Directory,
    pub scanned: Vec<String>,
    pub hits: Vec<Arc<Response>>,
    pub errors: usize,
    pub consecutive_errors: usize,
    pub replays: JoinSet<()>,
}

impl ScanState {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            queue: VecDeque::new(),
            passed: HashSet::new(),
            current: Directory {
                path: String::new(),
                depth: 0,
            },
            scanned: Vec::new(),
            hits: Vec::new(),
            errors: 0,
            consecutive_errors: 0,
            replays: JoinSet::new(),
        }
    }

    /// Queues `path` unless it was queued before for this target or contains
    /// one of `excluded`. Returns whether it was queued.
    pub fn add_directory(&mut self, path: &str, depth: usize, excluded: &[String]) -> bool {
        let path = normalize_dir(path);
        if excluded
            .iter()
            .map(|e| e.trim().trim_start_matches('/'))
            .any(|e| !e.is_empty() && path.contains(e))
        {
            return false;
        }
        if !self.passed.insert(path.clone()) {
            return false;
        }
        self.queue.push_back(Directory { path, depth });
        true
    }
}

/// Canonical directory key: no leading slash, one trailing slash, `""` for
/// the target root.
pub(crate) fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/');
    let mut out = trimmed.to_string();
    if !out.is_empty() && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Every proper ancestor of a normalized directory, shallowest first.
/// `a/b/c/` yields `a/` and `a/b/`.
pub(crate) fn parent_dirs(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let trimmed = path.trim_end_matches('/');
    let mut acc = String::new();
    let parts = trimmed.split('/').filter(|p| !p.is_empty()).collect::<Vec<_>>();
    if parts.len() < 2 {
        return out;
    }
    for part in &parts[..parts.len() - 1] {
        acc.push_str(part);
        acc.push('/');
        out.push(acc.clone());
    }
    out
}
