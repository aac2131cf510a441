use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::utils;

#[derive(Clone, Debug)]
pub enum WordlistSource {
    FilePath(String),
    Inline(Vec<String>),
}

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("no words found in the configured wordlists")]
    NoWordsFound,

    #[error("no wordlist files (*.txt) found in {dir}")]
    NoWordlists { dir: String },

    #[error("failed to open wordlist: {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read wordlist: {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered, deduplicated candidate words plus a shared cursor.
///
/// Any number of tasks may call [`Dictionary::next`] at once; between two
/// calls to [`Dictionary::reset`] every word is handed out exactly once.
#[derive(Debug)]
pub struct Dictionary {
    words: Vec<String>,
    cursor: AtomicUsize,
}

impl Dictionary {
    /// Builds a dictionary from already materialized words.
    pub fn from_words<I, S>(words: I) -> Result<Self, DictionaryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cleaned = words
            .into_iter()
            .filter_map(|w| clean_word(w.as_ref()))
            .collect::<Vec<_>>();
        let words = utils::uniq(cleaned);
        if words.is_empty() {
            return Err(DictionaryError::NoWordsFound);
        }
        Ok(Self {
            words,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Reads every source in order, merges and deduplicates the lines.
    pub async fn load(sources: &[WordlistSource]) -> Result<Self, DictionaryError> {
        let mut merged: Vec<String> = Vec::new();
        for source in sources {
            match source {
                WordlistSource::Inline(values) => merged.extend(values.iter().cloned()),
                WordlistSource::FilePath(path) => merged.extend(read_lines(path).await?),
            }
        }
        Self::from_words(merged)
    }

    /// Hands out the next word of the current pass, or `None` once the pass
    /// is exhausted.
    pub fn next(&self) -> Option<&str> {
        // one RMW per draw: concurrent callers always see distinct indexes
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.words.get(idx).map(String::as_str)
    }

    /// Rewinds the cursor. Callers must make sure no pass is in flight.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of words handed out so far in the current pass.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.words.len())
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

fn clean_word(line: &str) -> Option<String> {
    let word = line.trim();
    if word.is_empty() || word.starts_with('#') {
        return None;
    }
    let word = word.strip_prefix('/').unwrap_or(word);
    if word.is_empty() {
        return None;
    }
    Some(word.to_string())
}

async fn read_lines(path: &str) -> Result<Vec<String>, DictionaryError> {
    let handle = File::open(path)
        .await
        .map_err(|e| DictionaryError::FileOpen {
            path: path.to_string(),
            source: e,
        })?;
    let mut out = Vec::new();
    let mut lines = BufReader::new(handle).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => out.push(line),
            Ok(None) => break,
            Err(e) => {
                return Err(DictionaryError::FileRead {
                    path: path.to_string(),
                    source: e,
                })
            }
        }
    }
    Ok(out)
}

/// Collects every `*.txt` file directly below `dir`, sorted by path.
pub async fn discover_wordlists(dir: &str) -> Result<Vec<String>, DictionaryError> {
    let mut found: Vec<String> = Vec::new();
    if let Ok(mut rd) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = rd.next_entry().await {
            let path = entry.path();
            if !is_txt(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    found.push(path.to_string_lossy().to_string());
                }
            }
        }
    }
    if found.is_empty() {
        return Err(DictionaryError::NoWordlists {
            dir: dir.to_string(),
        });
    }
    found.sort();
    Ok(found)
}

fn is_txt(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}
