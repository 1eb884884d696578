//! Hold-for-review store
//!
//! Messages whose target area is marked hold are persisted as one JSON
//! record each under pending/, then resolved by the sysop into approved/ or
//! rejected/. Approved records re-enter the translation pipeline on the next
//! cycle; a backup copy is written before release. Rejected records are
//! archival — they are never silently deleted, only expired by maintenance
//! after the retention window.
//!
//! Sysop notifications are rate limited to one per rolling hour. Areas that
//! accumulate held messages inside the quiet window are remembered in the
//! notification state file and flushed with the next eligible notification.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{GateError, Result};

/// Which way a held message was traveling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Came from FidoNet, going to the news server
    #[serde(rename = "nntp")]
    ToNntp,
    /// Came from the news server, going to FidoNet
    #[serde(rename = "fidonet")]
    ToFidonet,
}

/// Review status of a held record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    /// Waiting for review
    Pending,
    /// Cleared for gating
    Approved,
    /// Refused; kept for audit
    Rejected,
}

/// Review outcome passed to [`HoldStore::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Release for gating on the next cycle
    Approved,
    /// Refuse and archive
    Rejected,
}

/// One persisted held message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldMessage {
    /// Generated record id
    pub id: String,
    /// Travel direction
    pub direction: Direction,
    /// Target area tag
    pub area: String,
    /// Author display name
    pub from: String,
    /// Subject line
    pub subject: String,
    /// Canonical message-id (dedup key)
    pub message_id: String,
    /// Translated headers at hold time, keyed by lowercased name
    pub headers: BTreeMap<String, String>,
    /// Message body
    pub body: String,
    /// When the message arrived at the gate
    pub held_at: DateTime<Utc>,
    /// Review status
    pub status: HoldStatus,
    /// Reviewer, set at resolution
    #[serde(default)]
    pub reviewed_by: Option<String>,
    /// Resolution instant
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Free-form reviewer note
    #[serde(default)]
    pub note: Option<String>,
}

impl HeldMessage {
    /// Create a pending record with a fresh id
    pub fn new(
        direction: Direction,
        area: &str,
        from: &str,
        subject: &str,
        message_id: &str,
        headers: BTreeMap<String, String>,
        body: String,
        held_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            area: area.to_string(),
            from: from.to_string(),
            subject: subject.to_string(),
            message_id: message_id.to_string(),
            headers,
            body,
            held_at,
            status: HoldStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            note: None,
        }
    }
}

/// Notification rate-limit state, persisted between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NotificationState {
    /// Last notification instant
    last_notification: Option<DateTime<Utc>>,
    /// Areas with held messages the sysop has not been told about yet
    pending_areas: Vec<String>,
}

/// Minimum gap between sysop notifications
fn notify_interval() -> Duration {
    Duration::hours(1)
}

/// Directory-backed store of held messages
#[derive(Debug)]
pub struct HoldStore {
    root: PathBuf,
}

impl HoldStore {
    /// Open (creating the directory layout if needed)
    pub fn open(root: &Path) -> Result<Self> {
        for sub in ["pending", "approved", "rejected", "backup"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn record_path(&self, status: &str, id: &str) -> PathBuf {
        self.root.join(status).join(format!("{}.json", id))
    }

    fn notification_path(&self) -> PathBuf {
        self.root.join("notifications.json")
    }

    /// Persist a new pending record; returns the record id
    pub fn hold(&self, record: HeldMessage) -> Result<String> {
        let path = self.record_path("pending", &record.id);
        fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
        info!(
            "held message for review: id={} area={} subject={:?}",
            record.id, record.area, record.subject
        );
        Ok(record.id)
    }

    fn read_dir(&self, status: &str) -> Result<Vec<HeldMessage>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join(status))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(GateError::from).and_then(|bytes| {
                serde_json::from_slice::<HeldMessage>(&bytes).map_err(GateError::from)
            }) {
                Ok(record) => records.push(record),
                Err(e) => error!("unreadable hold record {}: {}", path.display(), e),
            }
        }
        // Newest first
        records.sort_by(|a, b| b.held_at.cmp(&a.held_at));
        Ok(records)
    }

    /// Pending records, optionally restricted to one area
    pub fn list_pending(&self, area: Option<&str>) -> Result<Vec<HeldMessage>> {
        let mut records = self.read_dir("pending")?;
        if let Some(area) = area {
            records.retain(|r| r.area.eq_ignore_ascii_case(area));
        }
        Ok(records)
    }

    /// Resolve a pending record into approved or rejected
    pub fn resolve(
        &self,
        id: &str,
        resolution: Resolution,
        reviewer: &str,
        note: Option<&str>,
    ) -> Result<()> {
        let pending = self.record_path("pending", id);
        if !pending.exists() {
            return Err(GateError::Other(format!("no pending hold record {}", id)));
        }
        let mut record: HeldMessage = serde_json::from_slice(&fs::read(&pending)?)?;

        let status_dir = match resolution {
            Resolution::Approved => {
                record.status = HoldStatus::Approved;
                "approved"
            }
            Resolution::Rejected => {
                record.status = HoldStatus::Rejected;
                "rejected"
            }
        };
        record.reviewed_by = Some(reviewer.to_string());
        record.reviewed_at = Some(Utc::now());
        record.note = note.map(str::to_string);

        fs::write(
            self.record_path(status_dir, id),
            serde_json::to_vec_pretty(&record)?,
        )?;
        fs::remove_file(&pending)?;
        info!("hold record {} {}", id, status_dir);
        Ok(())
    }

    /// Take all approved records for one direction out of the store
    ///
    /// Each released record is copied into backup/ first; the pipeline then
    /// owns the message. A failed backup is logged but does not block the
    /// release.
    pub fn take_approved(&self, direction: Direction) -> Result<Vec<HeldMessage>> {
        let mut released = Vec::new();
        for record in self.read_dir("approved")? {
            if record.direction != direction {
                continue;
            }
            let backup = self.record_path("backup", &record.id);
            if let Err(e) = fs::write(&backup, serde_json::to_vec_pretty(&record)?) {
                error!("failed to back up approved record {}: {}", record.id, e);
            }
            fs::remove_file(self.record_path("approved", &record.id))?;
            debug!("released approved record {}", record.id);
            released.push(record);
        }
        Ok(released)
    }

    /// Decide whether a sysop notification is due
    ///
    /// The new areas are merged into the pending set. If the last
    /// notification is less than an hour old the set is kept for later and
    /// `None` is returned; otherwise the whole accumulated set is returned
    /// and the clock restarts.
    pub fn notify_if_due(&self, areas: &[String], now: DateTime<Utc>) -> Result<Option<Vec<String>>> {
        let mut state = self.load_notification_state();

        for area in areas {
            if !state.pending_areas.iter().any(|a| a.eq_ignore_ascii_case(area)) {
                state.pending_areas.push(area.clone());
            }
        }

        if state.pending_areas.is_empty() {
            self.save_notification_state(&state)?;
            return Ok(None);
        }

        if let Some(last) = state.last_notification
            && now - last < notify_interval()
        {
            debug!(
                "notification suppressed, last one {}s ago",
                (now - last).num_seconds()
            );
            self.save_notification_state(&state)?;
            return Ok(None);
        }

        let due = std::mem::take(&mut state.pending_areas);
        state.last_notification = Some(now);
        self.save_notification_state(&state)?;
        Ok(Some(due))
    }

    fn load_notification_state(&self) -> NotificationState {
        match fs::read(self.notification_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("unreadable notification state, resetting: {}", e);
                NotificationState::default()
            }),
            Err(_) => NotificationState::default(),
        }
    }

    fn save_notification_state(&self, state: &NotificationState) -> Result<()> {
        fs::write(self.notification_path(), serde_json::to_vec_pretty(state)?)?;
        Ok(())
    }

    /// Expire resolved records and backups older than the retention window
    pub fn cleanup(&self, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let mut removed = 0;
        for status in ["approved", "rejected", "backup"] {
            for record in self.read_dir(status)? {
                let resolved_at = record.reviewed_at.unwrap_or(record.held_at);
                if resolved_at < cutoff {
                    fs::remove_file(self.record_path(status, &record.id))?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("hold maintenance removed {} expired records", removed);
        }
        Ok(removed)
    }

    /// Pending/approved/rejected counts for status display
    pub fn statistics(&self) -> Result<(usize, usize, usize)> {
        Ok((
            self.read_dir("pending")?.len(),
            self.read_dir("approved")?.len(),
            self.read_dir("rejected")?.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(area: &str, direction: Direction) -> HeldMessage {
        HeldMessage::new(
            direction,
            area,
            "Test User",
            "Held subject",
            "<held@example.com>",
            BTreeMap::new(),
            "body text".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_hold_and_list_pending() {
        let dir = tempdir().unwrap();
        let store = HoldStore::open(dir.path()).unwrap();
        store.hold(record("FIDOTEST", Direction::ToNntp)).unwrap();
        store.hold(record("OTHER", Direction::ToFidonet)).unwrap();

        assert_eq!(store.list_pending(None).unwrap().len(), 2);
        let filtered = store.list_pending(Some("fidotest")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].area, "FIDOTEST");
    }

    #[test]
    fn test_resolve_and_release_with_backup() {
        let dir = tempdir().unwrap();
        let store = HoldStore::open(dir.path()).unwrap();
        let id = store.hold(record("FIDOTEST", Direction::ToNntp)).unwrap();

        store
            .resolve(&id, Resolution::Approved, "sysop", Some("looks fine"))
            .unwrap();
        assert!(store.list_pending(None).unwrap().is_empty());

        // Wrong direction releases nothing
        assert!(store.take_approved(Direction::ToFidonet).unwrap().is_empty());

        let released = store.take_approved(Direction::ToNntp).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].status, HoldStatus::Approved);
        assert_eq!(released[0].reviewed_by.as_deref(), Some("sysop"));

        // The record left approved/ but survives in backup/
        assert!(store.take_approved(Direction::ToNntp).unwrap().is_empty());
        assert!(dir
            .path()
            .join("backup")
            .join(format!("{}.json", id))
            .exists());
    }

    #[test]
    fn test_rejection_is_archival() {
        let dir = tempdir().unwrap();
        let store = HoldStore::open(dir.path()).unwrap();
        let id = store.hold(record("FIDOTEST", Direction::ToNntp)).unwrap();
        store
            .resolve(&id, Resolution::Rejected, "sysop", Some("off topic"))
            .unwrap();
        // The record still exists on disk, just not pending
        assert!(dir
            .path()
            .join("rejected")
            .join(format!("{}.json", id))
            .exists());
        let (pending, approved, rejected) = store.statistics().unwrap();
        assert_eq!((pending, approved, rejected), (0, 0, 1));
    }

    #[test]
    fn test_notification_rate_limit() {
        let dir = tempdir().unwrap();
        let store = HoldStore::open(dir.path()).unwrap();
        let start = Utc::now();
        let areas = vec!["FIDOTEST".to_string()];

        // First notification goes out
        let due = store.notify_if_due(&areas, start).unwrap();
        assert_eq!(due, Some(vec!["FIDOTEST".to_string()]));

        // Ten minutes later: suppressed, area accumulates
        let more = vec!["OTHER".to_string()];
        let due = store.notify_if_due(&more, start + Duration::minutes(10)).unwrap();
        assert_eq!(due, None);

        // Seventy minutes after the first: flushed with the accumulated area
        let due = store
            .notify_if_due(&[], start + Duration::minutes(70))
            .unwrap();
        assert_eq!(due, Some(vec!["OTHER".to_string()]));

        // Nothing pending, nothing due
        let due = store
            .notify_if_due(&[], start + Duration::minutes(200))
            .unwrap();
        assert_eq!(due, None);
    }

    #[test]
    fn test_cleanup_expires_old_resolved_records() {
        let dir = tempdir().unwrap();
        let store = HoldStore::open(dir.path()).unwrap();
        let id = store.hold(record("FIDOTEST", Direction::ToNntp)).unwrap();
        store.resolve(&id, Resolution::Rejected, "sysop", None).unwrap();

        // Not yet expired
        assert_eq!(store.cleanup(30, Utc::now()).unwrap(), 0);
        // Far future: expired
        assert_eq!(store.cleanup(30, Utc::now() + Duration::days(31)).unwrap(), 1);
    }
}
