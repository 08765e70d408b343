use crate::connection::{Connection, FiveTuple};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stream identifier notices are written under.
pub const NOTICE_STREAM: &str = "notice";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeKind {
    /// A server rejection mentioned a block list service.
    BlockListMention,
    /// A server rejection says the originator itself is listed.
    BlockedHost,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeKind::BlockListMention => write!(f, "BlockListMention"),
            NoticeKind::BlockedHost => write!(f, "BlockedHost"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub ts: DateTime<Utc>,
    pub note: NoticeKind,
    pub uid: String,
    pub id: FiveTuple,
    pub msg: String,
    /// The reply text that triggered the notice.
    pub sub: String,
    /// Key used for suppression of repeats.
    pub identifier: String,
}

impl Notice {
    pub fn new(note: NoticeKind, conn: &Connection, msg: String, sub: &str) -> Self {
        Self {
            ts: Utc::now(),
            note,
            uid: conn.uid.clone(),
            id: conn.id,
            msg,
            sub: sub.to_string(),
            identifier: conn.id.orig_h.to_string(),
        }
    }
}

/// Drops repeats of the same notice kind for the same identifier within a window.
#[derive(Debug)]
pub struct NoticeSuppressor {
    enabled: bool,
    interval: Duration,
    seen: HashMap<(NoticeKind, String), DateTime<Utc>>,
}

impl NoticeSuppressor {
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            enabled: interval_seconds > 0,
            interval: Duration::seconds(interval_seconds as i64),
            seen: HashMap::new(),
        }
    }

    /// Returns true when `notice` should be delivered, remembering it if so.
    pub fn admit(&mut self, notice: &Notice) -> bool {
        if !self.enabled {
            return true;
        }

        let now = notice.ts;
        let interval = self.interval;
        self.seen.retain(|_, first_seen| now - *first_seen < interval);

        let key = (notice.note, notice.identifier.clone());
        if self.seen.contains_key(&key) {
            log::debug!(
                "Suppressing repeated {} notice for {}",
                notice.note,
                notice.identifier
            );
            return false;
        }
        self.seen.insert(key, now);
        true
    }
}
