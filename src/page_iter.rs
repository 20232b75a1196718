//! Mountpoint Page Iterator
//!
//! Enumerates the object names cached under one mountpoint's bucket root, in
//! name order, one bounded page at a time. Each call to [`LocalPageIterator::next`]
//! adds every name after the current cursor and up to the page bound, then moves
//! the cursor to the bound. Once nothing is left past the cursor the iterator is
//! exhausted and further calls add nothing.
//!
//! Names compare as plain strings (`/` included), the same order a remote listing
//! uses. Directories whose whole subtree falls before the cursor or after the bound
//! are not descended into.

use crate::page_pool::Page;
use crate::{CacheError, Result};
use std::cell::Cell;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Upper bound of one local page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageBound {
    /// Drain everything that is left
    AllPages,
    /// Stop after this name (inclusive)
    Until(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IterState {
    Active { cursor: Option<String> },
    Exhausted,
    /// Exhausted and acknowledged by the caller
    Cleared,
}

#[derive(Debug)]
pub struct LocalPageIterator {
    root: PathBuf,
    root_str: String,
    prefix: String,
    state: IterState,
}

impl LocalPageIterator {
    /// Iterate names under `root` (a bucket's object root) that start with `prefix`
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let root = root.into();
        let root_str = root.display().to_string();
        Self {
            root,
            root_str,
            prefix: prefix.into(),
            state: IterState::Active { cursor: None },
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current position: the last name/bound reached, the root before the first
    /// page, and the empty string once exhausted
    pub fn pos(&self) -> &str {
        match &self.state {
            IterState::Active { cursor: Some(c) } => c,
            IterState::Active { cursor: None } => &self.root_str,
            IterState::Exhausted | IterState::Cleared => "",
        }
    }

    pub fn is_exhausted(&self) -> bool {
        !matches!(self.state, IterState::Active { .. })
    }

    pub fn is_cleared(&self) -> bool {
        self.state == IterState::Cleared
    }

    /// Terminal state for an iterator known to be exhausted
    pub fn clear(&mut self) {
        if self.is_exhausted() {
            self.state = IterState::Cleared;
        }
    }

    /// Move the cursor to `bound` without adding anything, for a page whose names
    /// could not be scanned. The cursor never moves backwards.
    pub fn skip_to(&mut self, bound: &PageBound) {
        let IterState::Active { cursor } = &self.state else {
            return;
        };
        self.state = match bound {
            PageBound::AllPages => IterState::Exhausted,
            PageBound::Until(end) => match cursor {
                Some(c) if c.as_str() >= end.as_str() => return,
                _ => IterState::Active {
                    cursor: Some(end.clone()),
                },
            },
        };
        debug!(root = %self.root_str, pos = %self.pos(), "local page skipped");
    }

    /// Add the next page of names (up to `bound`) to `page`; returns how many
    /// were added. On error nothing is added and the cursor does not move.
    pub fn next(&mut self, bound: &PageBound, page: &mut Page) -> Result<usize> {
        let cursor = match &self.state {
            IterState::Active { cursor } => cursor.clone(),
            IterState::Exhausted | IterState::Cleared => return Ok(0),
        };

        match std::fs::symlink_metadata(&self.root) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(root = %self.root_str, "nothing cached under root");
                self.state = IterState::Exhausted;
                return Ok(0);
            }
            Err(e) => {
                return Err(CacheError::IoError(format!("{}: {}", self.root_str, e)));
            }
        }

        let (mut found, beyond) = self.scan(cursor.as_deref(), bound)?;
        found.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let added = found.len();
        page.extend(found);

        self.state = match bound {
            PageBound::Until(end) if beyond => IterState::Active {
                cursor: Some(end.clone()),
            },
            _ => IterState::Exhausted,
        };
        debug!(root = %self.root_str, added, pos = %self.pos(), "local page");
        Ok(added)
    }

    /// Collect `(name, size)` for names in `(cursor, bound]`; the flag reports
    /// whether anything may exist past the bound
    fn scan(&self, cursor: Option<&str>, bound: &PageBound) -> Result<(Vec<(String, u64)>, bool)> {
        let beyond = Cell::new(false);
        let end = match bound {
            PageBound::Until(end) => Some(end.as_str()),
            PageBound::AllPages => None,
        };
        let prefix = self.prefix.as_str();
        let root = &self.root;

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                let Some(rel) = rel_name(root, entry.path()) else {
                    return false;
                };
                // every name below `rel` is in ("rel/", "rel0")
                let lo = format!("{}/", rel);
                let hi = format!("{}0", rel);
                if !lo.starts_with(prefix) && !prefix.starts_with(lo.as_str()) {
                    return false;
                }
                if cursor.is_some_and(|c| hi.as_str() <= c) {
                    return false;
                }
                if end.is_some_and(|e| lo.as_str() >= e) {
                    beyond.set(true);
                    return false;
                }
                true
            });

        let mut found = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                CacheError::IoError(format!("walk {}: {}", self.root_str, e))
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let Some(name) = rel_name(root, entry.path()) else {
                warn!(path = ?entry.path(), "skipping non UTF-8 object name");
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            if cursor.is_some_and(|c| name.as_str() <= c) {
                continue;
            }
            if end.is_some_and(|e| name.as_str() > e) {
                beyond.set(true);
                continue;
            }
            let size = match entry.metadata() {
                Ok(md) => md.len(),
                Err(e) => {
                    // removed between readdir and stat
                    debug!(name = %name, error = %e, "skipping vanished entry");
                    continue;
                }
            };
            found.push((name, size));
        }
        Ok((found, beyond.get()))
    }
}

/// `path` relative to `root`, as a slash-separated object name
fn rel_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut name = String::new();
    for component in rel.components() {
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(component.as_os_str().to_str()?);
    }
    Some(name)
}
