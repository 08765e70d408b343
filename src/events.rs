use crate::connection::Connection;
use crate::tracker::{Header, SmtpTracker};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// One decoder event, as carried on the wire (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ClientCommand {
        conn: Connection,
        #[serde(default = "default_true")]
        is_orig: bool,
        command: String,
        #[serde(default)]
        arg: String,
    },
    ServerReply {
        conn: Connection,
        #[serde(default)]
        is_orig: bool,
        code: u16,
        cmd: String,
        #[serde(default)]
        msg: String,
        #[serde(default)]
        cont: bool,
    },
    Header {
        conn: Connection,
        name: String,
        #[serde(default)]
        value: String,
    },
    ConnectionTeardown {
        conn: Connection,
    },
}

fn default_true() -> bool {
    true
}

impl Event {
    pub fn connection(&self) -> &Connection {
        match self {
            Event::ClientCommand { conn, .. }
            | Event::ServerReply { conn, .. }
            | Event::Header { conn, .. }
            | Event::ConnectionTeardown { conn } => conn,
        }
    }

    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

impl SmtpTracker {
    /// Route a decoder event to its handler. Connections on ports that are not
    /// monitored are ignored.
    pub fn dispatch(&mut self, event: Event) {
        if !self.monitors(event.connection()) {
            log::debug!(
                "Ignoring event for unmonitored connection {}",
                event.connection().id
            );
            self.stats.events_ignored += 1;
            return;
        }

        match event {
            Event::ClientCommand {
                conn,
                is_orig,
                command,
                arg,
            } => self.client_command(&conn, is_orig, &command, &arg),
            Event::ServerReply {
                conn,
                is_orig,
                code,
                cmd,
                msg,
                cont,
            } => self.server_reply(&conn, is_orig, code, &cmd, &msg, cont),
            Event::Header { conn, name, value } => {
                self.parsed_header(&conn, &Header { name, value })
            }
            Event::ConnectionTeardown { conn } => self.connection_teardown(&conn),
        }
    }

    /// Feed a JSON-lines event capture through the tracker. Blank lines are
    /// skipped; malformed lines are logged and skipped. Returns the number of
    /// events dispatched.
    pub fn replay<R: BufRead>(&mut self, reader: R) -> std::io::Result<u64> {
        let mut dispatched = 0;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match Event::parse(&line) {
                Ok(event) => {
                    self.dispatch(event);
                    dispatched += 1;
                }
                Err(e) => log::warn!("Skipping malformed event on line {}: {e}", lineno + 1),
            }
        }
        Ok(dispatched)
    }
}
