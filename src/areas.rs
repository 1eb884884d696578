//! Area routing and the subscription/watermark list
//!
//! The router is a static bidirectional table built once per run: explicit
//! remap entries from configuration first, then auto-mapping for every
//! subscribed group (area = uppercased group name, group = lowercased area
//! tag). Hold policy is evaluated per area: a remapped area uses its own
//! override or the global flag, an auto-mapped area is never held.
//!
//! The subscription list file is the one piece of shared mutable state
//! between phases: one `newsgroup: low-high` line per group. It is read
//! fully, mutated in memory, and written back atomically (write-temp-then-
//! rename) with a timestamped backup before any destructive edit.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::AreaRemap;
use crate::error::Result;

/// Per-newsgroup article number range already processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    /// Lowest article number of the tracked range
    pub low: u64,
    /// Highest article number already attempted
    pub high: u64,
}

impl Watermark {
    /// Advance the high watermark; it only ever moves forward
    pub fn advance(&mut self, attempted: u64) {
        if attempted > self.high {
            self.high = attempted;
        }
    }
}

/// One subscribed newsgroup with its watermark
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Newsgroup name (stored lowercased)
    pub newsgroup: String,
    /// Fetch watermark
    pub watermark: Watermark,
}

/// The line-oriented subscription list file
#[derive(Debug)]
pub struct SubscriptionList {
    path: PathBuf,
    entries: Vec<Subscription>,
    index: HashMap<String, usize>,
}

impl SubscriptionList {
    /// Load the list; a missing file is an empty list, not an error
    pub fn load(path: &Path) -> Result<Self> {
        let mut list = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            index: HashMap::new(),
        };

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("subscription list {} not found, starting empty", path.display());
                return Ok(list);
            }
            Err(e) => return Err(e.into()),
        };

        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((group, range)) = line.split_once(':') else {
                warn!("{}:{}: missing ':' separator", path.display(), line_number + 1);
                continue;
            };
            let Some((low, high)) = range.trim().split_once('-') else {
                warn!("{}:{}: missing '-' in range", path.display(), line_number + 1);
                continue;
            };
            match (low.trim().parse::<u64>(), high.trim().parse::<u64>()) {
                (Ok(low), Ok(high)) if high >= low => {
                    list.insert(group.trim(), Watermark { low, high });
                }
                _ => warn!(
                    "{}:{}: invalid range {:?}",
                    path.display(),
                    line_number + 1,
                    range.trim()
                ),
            }
        }

        info!("loaded {} subscriptions from {}", list.entries.len(), path.display());
        Ok(list)
    }

    fn insert(&mut self, group: &str, watermark: Watermark) {
        let key = group.to_ascii_lowercase();
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].watermark = watermark;
            return;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(Subscription {
            newsgroup: key,
            watermark,
        });
    }

    /// All subscriptions in file order
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Number of subscribed groups
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is subscribed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive membership test
    pub fn contains(&self, group: &str) -> bool {
        self.index.contains_key(&group.to_ascii_lowercase())
    }

    /// Watermark for a group
    pub fn watermark(&self, group: &str) -> Option<Watermark> {
        self.index
            .get(&group.to_ascii_lowercase())
            .map(|&idx| self.entries[idx].watermark)
    }

    /// Subscribe a group with a zero watermark; false if already present
    pub fn add(&mut self, group: &str) -> bool {
        if self.contains(group) {
            return false;
        }
        self.insert(group, Watermark { low: 0, high: 0 });
        true
    }

    /// Unsubscribe a group; false if not present
    pub fn remove(&mut self, group: &str) -> bool {
        let key = group.to_ascii_lowercase();
        let Some(idx) = self.index.remove(&key) else {
            return false;
        };
        self.entries.remove(idx);
        // Re-number everything after the removed entry
        for (i, entry) in self.entries.iter().enumerate().skip(idx) {
            self.index.insert(entry.newsgroup.clone(), i);
        }
        true
    }

    /// Advance a group's high watermark (monotonically, never backward)
    pub fn advance(&mut self, group: &str, attempted: u64) {
        if let Some(&idx) = self.index.get(&group.to_ascii_lowercase()) {
            self.entries[idx].watermark.advance(attempted);
        }
    }

    /// Write the list back atomically, taking a timestamped backup first
    pub fn save(&self) -> Result<()> {
        if self.path.exists() {
            let stamp = Utc::now().format("%Y%m%d-%H%M%S");
            let backup = self.path.with_extension(format!("{}.bak", stamp));
            fs::copy(&self.path, &backup)?;
            debug!("subscription list backed up to {}", backup.display());
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            writeln!(file, "# Gated newsgroups, one per line: name: low-high")?;
            for entry in &self.entries {
                writeln!(
                    file,
                    "{}: {}-{}",
                    entry.newsgroup, entry.watermark.low, entry.watermark.high
                )?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        info!("saved {} subscriptions to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}

/// Static bidirectional area tag <-> newsgroup table with hold policy
#[derive(Debug)]
pub struct AreaRouter {
    by_area: HashMap<String, MappingEntry>,
    by_group: HashMap<String, String>,
    hold_default: bool,
}

#[derive(Debug, Clone)]
struct MappingEntry {
    area: String,
    newsgroup: String,
    /// None for auto-mapped areas (never held), Some for remapped areas
    hold: Option<Option<bool>>,
}

impl AreaRouter {
    /// Build the table from remap entries plus the subscription list
    pub fn build(remap: &[AreaRemap], subscriptions: &SubscriptionList, hold_default: bool) -> Self {
        let mut by_area = HashMap::new();
        let mut by_group = HashMap::new();

        for entry in remap {
            let area = entry.area.to_ascii_uppercase();
            let group = entry.newsgroup.to_ascii_lowercase();
            by_group.insert(group.clone(), area.clone());
            by_area.insert(
                area.clone(),
                MappingEntry {
                    area,
                    newsgroup: group,
                    hold: Some(entry.hold),
                },
            );
        }

        // Subscribed groups without an explicit remap auto-map by case
        for sub in subscriptions.iter() {
            if by_group.contains_key(&sub.newsgroup) {
                continue;
            }
            let area = sub.newsgroup.to_ascii_uppercase();
            by_group.insert(sub.newsgroup.clone(), area.clone());
            by_area.insert(
                area.clone(),
                MappingEntry {
                    area,
                    newsgroup: sub.newsgroup.clone(),
                    hold: None,
                },
            );
        }

        Self {
            by_area,
            by_group,
            hold_default,
        }
    }

    /// Newsgroup for a FidoNet area tag; auto-maps unknown tags by lowercasing
    pub fn newsgroup_for(&self, area: &str) -> Option<String> {
        let key = area.to_ascii_uppercase();
        match self.by_area.get(&key) {
            Some(entry) => Some(entry.newsgroup.clone()),
            None if !area.is_empty() => Some(area.to_ascii_lowercase()),
            None => None,
        }
    }

    /// Area tag for a newsgroup
    pub fn area_for(&self, group: &str) -> String {
        let key = group.to_ascii_lowercase();
        match self.by_group.get(&key) {
            Some(area) => area.clone(),
            None => group.to_ascii_uppercase(),
        }
    }

    /// Hold policy: remapped areas use their override or the global flag;
    /// auto-mapped areas are never held
    pub fn should_hold(&self, area: &str) -> bool {
        match self.by_area.get(&area.to_ascii_uppercase()) {
            Some(MappingEntry {
                hold: Some(override_flag),
                ..
            }) => override_flag.unwrap_or(self.hold_default),
            _ => false,
        }
    }

    /// All known (area, newsgroup) pairs, remapped and auto-mapped
    pub fn mappings(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .by_area
            .values()
            .map(|e| (e.area.clone(), e.newsgroup.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}
