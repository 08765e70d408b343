use super::SmtpTracker;
use crate::connection::Connection;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MAIL_FROM: Regex = Regex::new(r"(?i)^\s*from\s*:[ \t]*(.*)$").unwrap();
    static ref RCPT_TO: Regex = Regex::new(r"(?i)^\s*to\s*:[ \t]*(.*)$").unwrap();
}

/// Envelope sender from a MAIL argument, without trailing ESMTP parameters.
fn parse_mail_from(arg: &str) -> Option<&str> {
    let rest = MAIL_FROM.captures(arg)?.get(1)?.as_str();
    rest.split_whitespace().next()
}

/// Recipient from a RCPT argument.
fn parse_rcpt_to(arg: &str) -> Option<&str> {
    let rest = RCPT_TO.captures(arg)?.get(1)?.as_str().trim_end();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

impl SmtpTracker {
    /// A command sent by the client.
    pub fn client_command(&mut self, conn: &Connection, _is_orig: bool, command: &str, arg: &str) {
        self.stats.events += 1;
        let command = command.to_uppercase();

        let session = self.ensure_session(conn);
        let record = session.ensure_record(conn);
        if command != "QUIT" {
            record.has_client_activity = true;
        }

        match command.as_str() {
            "HELO" | "EHLO" => {
                record.helo = Some(arg.to_string());
                session.state.helo = Some(arg.to_string());
            }
            "RCPT" => {
                if let Some(rcpt) = parse_rcpt_to(arg) {
                    record.add_rcptto(rcpt);
                }
            }
            "MAIL" => {
                if let Some(sender) = parse_mail_from(arg) {
                    record.mailfrom = Some(sender.to_string());
                }
            }
            _ => {}
        }
    }
}
