use super::SmtpTracker;
use crate::connection::Connection;
use crate::extract::find_ip_addresses;
use crate::notice::{Notice, NoticeKind};

/// Command the server acknowledges when a message body has been accepted or refused.
const END_OF_DATA: &str = ".";

impl SmtpTracker {
    /// A reply sent by the server.
    ///
    /// Block list detection always runs before message boundary handling so
    /// that a rejection of the body is still attributed to the message it
    /// belongs to.
    pub fn server_reply(
        &mut self,
        conn: &Connection,
        _is_orig: bool,
        code: u16,
        cmd: &str,
        msg: &str,
        _cont: bool,
    ) {
        self.stats.events += 1;

        self.ensure_session(conn)
            .ensure_record(conn)
            .last_reply = Some(format!("{code} {msg}"));

        if code != 421 && code >= 400 && self.signatures.matches(msg) {
            self.raise_blocklist_notice(conn, msg);
        }

        if cmd == END_OF_DATA {
            let session = self.ensure_session(conn);
            session.state.messages_transferred += 1;
            if let Some(finished) = session.rotate(conn) {
                self.flush_record(finished);
            }
        }
    }

    fn raise_blocklist_notice(&mut self, conn: &Connection, msg: &str) {
        let orig = conn.id.orig_h;
        let listed = find_ip_addresses(msg).first() == Some(&orig);

        let (kind, text) = if listed {
            (
                NoticeKind::BlockedHost,
                format!("{orig} is on an SMTP block list"),
            )
        } else {
            (
                NoticeKind::BlockListMention,
                format!("{orig} received an error message mentioning an SMTP block list"),
            )
        };
        log::debug!(
            "Block list signature {:?} in reply on {}",
            self.signatures.matching_patterns(msg),
            conn.uid
        );
        self.raise_notice(Notice::new(kind, conn, text, msg));
    }

    pub(super) fn raise_notice(&mut self, notice: Notice) {
        if !self.suppressor.admit(&notice) {
            self.stats.notices_suppressed += 1;
            return;
        }

        self.stats.notices_raised += 1;
        log::warn!("{}: {} ({})", notice.note, notice.msg, notice.uid);
        if let Err(e) = self.notices.write_notice(&notice) {
            log::warn!("Failed to write notice for {}: {e}", notice.uid);
        }
    }
}
