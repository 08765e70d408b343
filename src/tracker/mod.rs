//! Per-connection SMTP session tracking.
//!
//! Decoder events arrive one at a time through the handlers in the
//! submodules. Each connection owns a [`Session`] holding the state that
//! survives message boundaries and the record of the message currently in
//! flight. Records are emitted when the server acknowledges the end of a
//! message body and when the connection goes away.

mod command;
mod header;
mod lifecycle;
mod reply;

pub use header::Header;

use crate::config::{Config, XOriginatingIpSource};
use crate::connection::{Connection, PathCapture, SiteClassifier};
use crate::extract::BlocklistSignatures;
use crate::notice::NoticeSuppressor;
use crate::record::Session;
use crate::sink::{NoticeSink, RecordSink};
use serde::Serialize;
use std::collections::HashMap;

/// Counters reported when the tracker shuts down.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub events: u64,
    pub events_ignored: u64,
    pub sessions_opened: u64,
    pub records_emitted: u64,
    pub records_discarded: u64,
    pub notices_raised: u64,
    pub notices_suppressed: u64,
}

pub struct SmtpTracker {
    ports: Vec<u16>,
    signatures: BlocklistSignatures,
    path_capture: PathCapture,
    x_originating_ip_source: XOriginatingIpSource,
    site: Box<dyn SiteClassifier>,
    sessions: HashMap<String, Session>,
    records: Box<dyn RecordSink>,
    notices: Box<dyn NoticeSink>,
    suppressor: NoticeSuppressor,
    pub(crate) stats: TrackerStats,
}

impl SmtpTracker {
    pub fn new(
        config: &Config,
        records: Box<dyn RecordSink>,
        notices: Box<dyn NoticeSink>,
    ) -> anyhow::Result<Self> {
        Ok(SmtpTracker {
            ports: config.ports.clone(),
            signatures: config.signatures()?,
            path_capture: config.mail_path_capture,
            x_originating_ip_source: config.x_originating_ip_source,
            site: Box::new(config.site.clone()),
            sessions: HashMap::new(),
            records,
            notices,
            suppressor: NoticeSuppressor::new(config.notice_suppression_seconds),
            stats: TrackerStats::default(),
        })
    }

    pub fn monitors(&self, conn: &Connection) -> bool {
        self.ports.contains(&conn.id.resp_p)
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, uid: &str) -> Option<&Session> {
        self.sessions.get(uid)
    }
}
