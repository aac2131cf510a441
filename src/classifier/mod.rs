use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::requester::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Hit,
    Miss,
}

/// Read-only filter snapshot consulted for every response of a scan.
///
/// Empty sets, zero sizes and `None` regexes mean "no constraint".
#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    pub exclude_status_codes: HashSet<u16>,
    pub include_status_codes: HashSet<u16>,
    pub minimum_response_size: usize,
    pub maximum_response_size: usize,
    pub exclude_texts: Vec<String>,
    pub exclude_sizes: HashSet<usize>,
    pub exclude_regex: Option<Regex>,
    pub exclude_redirect: Option<Regex>,
    /// status -> path suffixes treated as soft-404 pages
    pub blacklists: HashMap<u16, Vec<String>>,
}

impl FilterSet {
    pub fn is_unconstrained(&self) -> bool {
        self.exclude_status_codes.is_empty()
            && self.include_status_codes.is_empty()
            && self.minimum_response_size == 0
            && self.maximum_response_size == 0
            && self.exclude_texts.is_empty()
            && self.exclude_sizes.is_empty()
            && self.exclude_regex.is_none()
            && self.exclude_redirect.is_none()
            && self.blacklists.is_empty()
    }
}

/// Decides whether a response is a hit. The first failing stage wins.
pub fn classify(response: &Response, filters: &FilterSet) -> Verdict {
    if filters.exclude_status_codes.contains(&response.status) {
        return Verdict::Miss;
    }
    if !filters.include_status_codes.is_empty()
        && !filters.include_status_codes.contains(&response.status)
    {
        return Verdict::Miss;
    }
    if response.length < filters.minimum_response_size {
        return Verdict::Miss;
    }
    if filters.maximum_response_size > 0 && response.length > filters.maximum_response_size {
        return Verdict::Miss;
    }
    if filters
        .exclude_texts
        .iter()
        .any(|text| response.body.contains(text.as_str()))
    {
        return Verdict::Miss;
    }
    if filters.exclude_sizes.contains(&response.length) {
        return Verdict::Miss;
    }
    if let Some(re) = filters.exclude_regex.as_ref() {
        if re.is_match(&response.body) {
            return Verdict::Miss;
        }
    }
    if let (Some(re), Some(target)) = (filters.exclude_redirect.as_ref(), response.redirect.as_deref()) {
        if re.is_match(target) {
            return Verdict::Miss;
        }
    }
    if let Some(suffixes) = filters.blacklists.get(&response.status) {
        if suffixes.iter().any(|s| response.path.ends_with(s.as_str())) {
            return Verdict::Miss;
        }
    }
    Verdict::Hit
}
