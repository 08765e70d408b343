use crate::connection::{PathCapture, Site};
use crate::extract::{BlocklistSignatures, DEFAULT_BLOCKLIST_PATTERNS};
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub socket_path: String,
    /// Responder ports carrying SMTP. Events for other ports are ignored.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_blocklist_patterns")]
    pub blocklist_patterns: Vec<String>,
    #[serde(default)]
    pub mail_path_capture: PathCapture,
    #[serde(default)]
    pub x_originating_ip_source: XOriginatingIpSource,
    /// Repeats of a notice for the same host inside this window are dropped. 0, the
    /// default, delivers every notice.
    #[serde(default = "default_notice_suppression_seconds")]
    pub notice_suppression_seconds: u64,
    #[serde(default)]
    pub site: Site,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which text the X-Originating-IP header address is extracted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XOriginatingIpSource {
    /// The header name. Kept for compatibility with existing logs; never yields an address
    /// for a well-formed header.
    #[default]
    Name,
    Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Message records; stdout when unset.
    pub record_log: Option<String>,
    /// Notices; stderr when unset.
    pub notice_log: Option<String>,
}

fn default_ports() -> Vec<u16> {
    vec![25, 587]
}

fn default_blocklist_patterns() -> Vec<String> {
    DEFAULT_BLOCKLIST_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_notice_suppression_seconds() -> u64 {
    0
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: "/var/run/mailtrail.sock".to_string(),
            ports: default_ports(),
            blocklist_patterns: default_blocklist_patterns(),
            mail_path_capture: PathCapture::default(),
            x_originating_ip_source: XOriginatingIpSource::default(),
            notice_suppression_seconds: default_notice_suppression_seconds(),
            site: Site::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Compile the configured block list patterns.
    pub fn signatures(&self) -> anyhow::Result<BlocklistSignatures> {
        BlocklistSignatures::new(&self.blocklist_patterns)
            .context("Invalid block list pattern in configuration")
    }
}
