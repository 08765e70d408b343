use super::SmtpTracker;
use crate::connection::Connection;
use crate::record::{MessageRecord, Session};

impl SmtpTracker {
    /// Session for `conn` with a record in flight, creating either as needed.
    pub(super) fn ensure_session(&mut self, conn: &Connection) -> &mut Session {
        let stats = &mut self.stats;
        let session = self.sessions.entry(conn.uid.clone()).or_insert_with(|| {
            log::debug!("New SMTP session {} ({})", conn.uid, conn.id);
            stats.sessions_opened += 1;
            Session::new()
        });
        session.ensure_record(conn);
        session
    }

    /// Emit `record` if the client did anything during it; drop it otherwise.
    pub(super) fn flush_record(&mut self, record: MessageRecord) {
        if !record.has_client_activity {
            log::debug!("Discarding idle record {} on {}", record.message_uid, record.uid);
            self.stats.records_discarded += 1;
            return;
        }

        log::debug!("Emitting record {} on {}", record.message_uid, record.uid);
        self.stats.records_emitted += 1;
        if let Err(e) = self.records.write_record(&record) {
            log::warn!("Failed to write record {}: {e}", record.message_uid);
        }
    }

    /// The connection is gone: flush whatever is pending and forget it.
    pub fn connection_teardown(&mut self, conn: &Connection) {
        self.stats.events += 1;
        if let Some(session) = self.sessions.remove(&conn.uid) {
            log::debug!(
                "SMTP session {} closed after {} message(s)",
                conn.uid,
                session.state.messages_transferred
            );
            if let Some(record) = session.record {
                self.flush_record(record);
            }
        }
    }

    /// Tear down every live session, e.g. when the event source goes away.
    pub fn shutdown(&mut self) {
        let pending: Vec<Session> = self.sessions.drain().map(|(_, s)| s).collect();
        for record in pending.into_iter().filter_map(|s| s.record) {
            self.flush_record(record);
        }
        log::info!(
            "SMTP tracker stopped: {} events ({} ignored), {} sessions, {} records emitted, {} discarded, {} notices ({} suppressed)",
            self.stats.events,
            self.stats.events_ignored,
            self.stats.sessions_opened,
            self.stats.records_emitted,
            self.stats.records_discarded,
            self.stats.notices_raised,
            self.stats.notices_suppressed
        );
    }
}
