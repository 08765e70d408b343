use lazy_static::lazy_static;
use regex::{Regex, RegexSet};
use std::net::IpAddr;

lazy_static! {
    // IPv6 candidates (optionally written as an SMTP "IPv6:" literal) or dotted-quad IPv4.
    // Every candidate is validated by the std parser, so the pattern only has to be loose.
    static ref ADDRESS_CANDIDATE: Regex = Regex::new(
        r"(?i)(?:ipv6:)?[0-9a-f]*:[0-9a-f:.]*[0-9a-f]|\b\d{1,3}(?:\.\d{1,3}){3}\b"
    )
    .unwrap();
    static ref IPV4_LITERAL: Regex = Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").unwrap();
}

/// URL fragments of well known DNS block list services, as they show up in
/// rejection messages ("see https://www.spamhaus.org/query/ip/...").
pub const DEFAULT_BLOCKLIST_PATTERNS: &[&str] = &[
    r"spamhaus\.org/",
    r"sophos\.com/",
    r"spamcop\.net/bl",
    r"cbl\.abuseat\.org/",
    r"sorbs\.net/",
    r"bsn\.borderware\.com/",
    r"mail-abuse\.com/",
    r"b\.barracudacentral\.com/",
    r"psbl\.surriel\.com/",
    r"antispam\.imp\.ch/",
    r"dyndns\.com/.*spam",
    r"rbl\.knology\.net/",
    r"intercept\.datapacket\.net/",
    r"uceprotect\.net/",
    r"hostkarma\.junkemailfilter\.com/",
];

/// Find every IPv4/IPv6 address literal embedded in `text`, in order of appearance.
pub fn find_ip_addresses(text: &str) -> Vec<IpAddr> {
    let mut found = Vec::new();
    for m in ADDRESS_CANDIDATE.find_iter(text) {
        let candidate = m.as_str();
        let candidate = match candidate.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("ipv6:") => &candidate[5..],
            _ => candidate,
        };
        match candidate.parse::<IpAddr>() {
            Ok(addr) => found.push(addr),
            // A loose IPv6 match such as "IP:192.0.2.1" can swallow a dotted quad.
            Err(_) => found.extend(
                IPV4_LITERAL
                    .find_iter(candidate)
                    .filter_map(|v4| v4.as_str().parse::<IpAddr>().ok()),
            ),
        }
    }
    found
}

/// Pick the representative address of a Received header value.
///
/// Received lines usually name the relay before the address the sender
/// claimed, so when there are several addresses the second one wins.
pub fn find_address_in_header_value(text: &str) -> Option<IpAddr> {
    let ips = find_ip_addresses(text);
    match ips.len() {
        0 => None,
        1 => Some(ips[0]),
        _ => Some(ips[1]),
    }
}

/// Compiled set of block list signatures matched against server replies.
#[derive(Debug, Clone)]
pub struct BlocklistSignatures {
    patterns: Vec<String>,
    set: RegexSet,
}

impl BlocklistSignatures {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        let set = RegexSet::new(&patterns)?;
        Ok(Self { patterns, set })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// Patterns that matched `text`, for diagnostics.
    pub fn matching_patterns(&self, text: &str) -> Vec<&str> {
        self.set
            .matches(text)
            .into_iter()
            .map(|i| self.patterns[i].as_str())
            .collect()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
