use crate::connection::{Connection, FiveTuple};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use uuid::Uuid;

/// Stream identifier message records are written under.
pub const RECORD_STREAM: &str = "smtp";

/// Connection-scoped state that survives message boundaries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub helo: Option<String>,
    pub messages_transferred: u64,
}

/// One log entry per mail message transacted on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub ts: DateTime<Utc>,
    pub uid: String,
    pub id: FiveTuple,
    pub message_uid: String,
    pub helo: Option<String>,
    pub mailfrom: Option<String>,
    pub rcptto: Option<BTreeSet<String>>,
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<BTreeSet<String>>,
    pub reply_to: Option<String>,
    pub msg_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub subject: Option<String>,
    pub x_originating_ip: Option<IpAddr>,
    pub first_received: Option<String>,
    pub second_received: Option<String>,
    pub last_reply: Option<String>,
    pub path: Vec<IpAddr>,
    pub user_agent: Option<String>,
    pub process_received_from: bool,
    pub has_client_activity: bool,
}

impl MessageRecord {
    /// Start a record for the next message on `conn`.
    ///
    /// The path is seeded with the two connection endpoints; hops recovered
    /// from Received headers are appended after them.
    pub fn new(conn: &Connection, state: &SessionState) -> Self {
        Self {
            ts: Utc::now(),
            uid: conn.uid.clone(),
            id: conn.id,
            message_uid: Uuid::new_v4().simple().to_string(),
            helo: state.helo.clone(),
            mailfrom: None,
            rcptto: None,
            date: None,
            from: None,
            to: None,
            reply_to: None,
            msg_id: None,
            in_reply_to: None,
            subject: None,
            x_originating_ip: None,
            first_received: None,
            second_received: None,
            last_reply: None,
            path: vec![conn.id.resp_h, conn.id.orig_h],
            user_agent: None,
            process_received_from: true,
            has_client_activity: false,
        }
    }

    pub fn add_rcptto(&mut self, rcpt: impl Into<String>) {
        self.rcptto.get_or_insert_with(BTreeSet::new).insert(rcpt.into());
    }

    pub fn add_to(&mut self, to: impl Into<String>) {
        self.to.get_or_insert_with(BTreeSet::new).insert(to.into());
    }

    /// Shift the newest Received value into the two-slot window.
    pub fn push_received(&mut self, value: impl Into<String>) {
        if let Some(previous) = self.first_received.take() {
            self.second_received = Some(previous);
        }
        self.first_received = Some(value.into());
    }

    /// Append a relay hop unless it repeats the newest one.
    pub fn push_hop(&mut self, addr: IpAddr) {
        if self.path.last() != Some(&addr) {
            self.path.push(addr);
        }
    }
}

/// Everything tracked for one connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub record: Option<MessageRecord>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::default(),
            record: None,
        }
    }

    /// Create the current record if there is none. Idempotent within a message.
    pub fn ensure_record(&mut self, conn: &Connection) -> &mut MessageRecord {
        let state = &self.state;
        self.record
            .get_or_insert_with(|| MessageRecord::new(conn, state))
    }

    /// Replace the current record with a fresh one, returning the old.
    pub fn rotate(&mut self, conn: &Connection) -> Option<MessageRecord> {
        let fresh = MessageRecord::new(conn, &self.state);
        self.record.replace(fresh)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
