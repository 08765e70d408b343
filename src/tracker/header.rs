use super::SmtpTracker;
use crate::config::XOriginatingIpSource;
use crate::connection::{Connection, PathCapture, SiteClassifier};
use crate::extract::{find_address_in_header_value, find_ip_addresses};
use crate::record::MessageRecord;
use serde::{Deserialize, Serialize};

/// A parsed MIME header as delivered by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn merge_field(record: &mut MessageRecord, header: &Header, x_ip_source: XOriginatingIpSource) {
    let value = &header.value;
    match header.name.to_uppercase().as_str() {
        "MESSAGE-ID" => record.msg_id = Some(value.clone()),
        "IN-REPLY-TO" => record.in_reply_to = Some(value.clone()),
        "SUBJECT" => record.subject = Some(value.clone()),
        "FROM" => record.from = Some(value.clone()),
        "REPLY-TO" => record.reply_to = Some(value.clone()),
        "DATE" => record.date = Some(value.clone()),
        "X-MAILER" | "USER-AGENT" | "X-USER-AGENT" => record.user_agent = Some(value.clone()),
        "TO" => record.add_to(value.clone()),
        "RECEIVED" => record.push_received(value.clone()),
        "X-ORIGINATING-IP" => {
            let source = match x_ip_source {
                XOriginatingIpSource::Name => &header.name,
                XOriginatingIpSource::Value => value,
            };
            if let Some(addr) = find_ip_addresses(source).first() {
                record.x_originating_ip = Some(*addr);
            }
        }
        _ => {}
    }
}

/// Extend the relay path with the hop named in a Received header value.
fn extend_path(
    record: &mut MessageRecord,
    value: &str,
    policy: PathCapture,
    site: &dyn SiteClassifier,
) {
    let Some(addr) = find_address_in_header_value(value) else {
        return;
    };

    // This hop is still recorded; later (older) ones are not.
    if !policy.allows(addr, site) && !site.is_private_addr(addr) {
        record.process_received_from = false;
    }
    record.push_hop(addr);
}

impl SmtpTracker {
    /// A header of the message currently being transferred. Ignored when no
    /// message is in flight on the connection.
    pub fn parsed_header(&mut self, conn: &Connection, header: &Header) {
        self.stats.events += 1;

        let Some(record) = self
            .sessions
            .get_mut(&conn.uid)
            .and_then(|session| session.record.as_mut())
        else {
            log::debug!("Header {} on {} without a session", header.name, conn.uid);
            return;
        };

        record.has_client_activity = true;
        merge_field(record, header, self.x_originating_ip_source);

        if header.name.eq_ignore_ascii_case("received") && record.process_received_from {
            extend_path(record, &header.value, self.path_capture, self.site.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::Site;
    use crate::tracker::tests::{conn, tracker, tracker_with, ORIG, RESP};
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn path_of(tracker: &SmtpTracker, uid: &str) -> Vec<IpAddr> {
        tracker
            .session(uid)
            .unwrap()
            .record
            .as_ref()
            .unwrap()
            .path
            .clone()
    }

    #[test]
    fn test_header_without_session_is_ignored() {
        let (mut tracker, sink) = tracker();
        let c = conn("C1");

        tracker.parsed_header(&c, &Header::new("Subject", "hi"));
        assert!(tracker.session("C1").is_none());
        tracker.connection_teardown(&c);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_fields_are_merged_last_writer_wins() {
        let (mut tracker, _sink) = tracker();
        let c = conn("C1");
        tracker.client_command(&c, true, "QUIT", "");

        for (name, value) in [
            ("Subject", "first"),
            ("subject", "second"),
            ("Message-ID", "<1@x.com>"),
            ("In-Reply-To", "<0@x.com>"),
            ("From", "A <a@x.com>"),
            ("Reply-To", "r@x.com"),
            ("Date", "Mon, 1 Jan 2024 10:22:33 +0000"),
            ("X-Mailer", "Mailer 1.0"),
            ("User-Agent", "Agent 2.0"),
            ("To", "b@y.com"),
            ("TO", "c@y.com"),
            ("X-Unknown", "ignored"),
        ] {
            tracker.parsed_header(&c, &Header::new(name, value));
        }

        let record = tracker.session("C1").unwrap().record.as_ref().unwrap();
        assert!(record.has_client_activity);
        assert_eq!(record.subject.as_deref(), Some("second"));
        assert_eq!(record.msg_id.as_deref(), Some("<1@x.com>"));
        assert_eq!(record.in_reply_to.as_deref(), Some("<0@x.com>"));
        assert_eq!(record.from.as_deref(), Some("A <a@x.com>"));
        assert_eq!(record.reply_to.as_deref(), Some("r@x.com"));
        assert_eq!(record.date.as_deref(), Some("Mon, 1 Jan 2024 10:22:33 +0000"));
        assert_eq!(record.user_agent.as_deref(), Some("Agent 2.0"));
        assert_eq!(record.to.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_received_window_and_path() {
        let (mut tracker, _sink) = tracker();
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(
            &c,
            &Header::new("Received", "from a.example ([203.0.113.1]) by b.example"),
        );
        tracker.parsed_header(
            &c,
            &Header::new("Received", "from c.example ([203.0.113.2]) by a.example"),
        );
        tracker.parsed_header(
            &c,
            &Header::new("Received", "from d.example ([203.0.113.3]) by c.example"),
        );

        let record = tracker.session("C1").unwrap().record.as_ref().unwrap();
        assert_eq!(
            record.first_received.as_deref(),
            Some("from d.example ([203.0.113.3]) by c.example")
        );
        assert_eq!(
            record.second_received.as_deref(),
            Some("from c.example ([203.0.113.2]) by a.example")
        );
        assert_eq!(
            record.path,
            vec![
                ip(RESP),
                ip(ORIG),
                ip("203.0.113.1"),
                ip("203.0.113.2"),
                ip("203.0.113.3")
            ]
        );
    }

    #[test]
    fn test_path_suppresses_consecutive_duplicates() {
        let (mut tracker, _sink) = tracker();
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(&c, &Header::new("Received", &format!("from x ([{ORIG}])")));
        tracker.parsed_header(&c, &Header::new("Received", "from y ([203.0.113.7])"));
        tracker.parsed_header(&c, &Header::new("Received", "from y ([203.0.113.7])"));
        tracker.parsed_header(&c, &Header::new("Received", "from localhost"));

        assert_eq!(
            path_of(&tracker, "C1"),
            vec![ip(RESP), ip(ORIG), ip("203.0.113.7")]
        );
    }

    #[test]
    fn test_local_hosts_policy_stops_after_leaving_site() {
        let (mut tracker, _sink) = tracker_with(Config {
            mail_path_capture: PathCapture::LocalHosts,
            site: Site {
                local_nets: vec!["192.0.2.0/24".parse().unwrap()],
                ..Default::default()
            },
            ..Default::default()
        });
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(&c, &Header::new("Received", "from in ([192.0.2.40])"));
        tracker.parsed_header(&c, &Header::new("Received", "from lan ([10.1.1.1])"));
        tracker.parsed_header(&c, &Header::new("Received", "from out ([203.0.113.9])"));
        tracker.parsed_header(&c, &Header::new("Received", "from older ([203.0.113.10])"));

        let record = tracker.session("C1").unwrap().record.as_ref().unwrap();
        assert!(!record.process_received_from);
        assert_eq!(
            record.path,
            vec![
                ip(RESP),
                ip(ORIG),
                ip("192.0.2.40"),
                ip("10.1.1.1"),
                ip("203.0.113.9")
            ]
        );
        // The window keeps rotating even after path capture stopped.
        assert_eq!(
            record.first_received.as_deref(),
            Some("from older ([203.0.113.10])")
        );
    }

    #[test]
    fn test_no_hosts_policy_records_a_single_hop() {
        let (mut tracker, _sink) = tracker_with(Config {
            mail_path_capture: PathCapture::NoHosts,
            ..Default::default()
        });
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(&c, &Header::new("Received", "from a ([203.0.113.1])"));
        tracker.parsed_header(&c, &Header::new("Received", "from b ([203.0.113.2])"));
        assert_eq!(
            path_of(&tracker, "C1"),
            vec![ip(RESP), ip(ORIG), ip("203.0.113.1")]
        );
    }

    #[test]
    fn test_private_relays_never_stop_capture() {
        let (mut tracker, _sink) = tracker_with(Config {
            mail_path_capture: PathCapture::NoHosts,
            ..Default::default()
        });
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(&c, &Header::new("Received", "from a ([10.0.0.1])"));
        tracker.parsed_header(&c, &Header::new("Received", "from b ([192.168.1.1])"));
        let record = tracker.session("C1").unwrap().record.as_ref().unwrap();
        assert!(record.process_received_from);
        assert_eq!(record.path.len(), 4);
    }

    #[test]
    fn test_x_originating_ip_from_header_name() {
        let (mut tracker, _sink) = tracker();
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(&c, &Header::new("X-Originating-IP", "[203.0.113.77]"));
        let record = tracker.session("C1").unwrap().record.as_ref().unwrap();
        assert_eq!(record.x_originating_ip, None);
    }

    #[test]
    fn test_x_originating_ip_from_header_value() {
        let (mut tracker, _sink) = tracker_with(Config {
            x_originating_ip_source: XOriginatingIpSource::Value,
            ..Default::default()
        });
        let c = conn("C1");
        tracker.client_command(&c, true, "DATA", "");

        tracker.parsed_header(&c, &Header::new("X-Originating-IP", "[203.0.113.77]"));
        let record = tracker.session("C1").unwrap().record.as_ref().unwrap();
        assert_eq!(record.x_originating_ip, Some(ip("203.0.113.77")));
    }
}
