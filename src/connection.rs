use chrono::{DateTime, Utc};
use cidr::IpCidr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Connection 5-tuple as reported by the connection tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    pub orig_h: IpAddr,
    pub orig_p: u16,
    pub resp_h: IpAddr,
    pub resp_p: u16,
    #[serde(default)]
    pub proto: Transport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.orig_h, self.orig_p, self.resp_h, self.resp_p
        )
    }
}

/// Identity of one tracked connection. Read-only input from the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub uid: String,
    pub id: FiveTuple,
    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,
}

impl Connection {
    pub fn new(uid: impl Into<String>, id: FiveTuple) -> Self {
        Self {
            uid: uid.into(),
            id,
            start_time: Utc::now(),
        }
    }
}

/// Classifies addresses relative to the monitored site.
pub trait SiteClassifier: Send + Sync {
    /// RFC1918-style internal address space.
    fn is_private_addr(&self, addr: IpAddr) -> bool;
    /// Address belongs to the monitored network.
    fn is_local_addr(&self, addr: IpAddr) -> bool;
}

/// How far back along the Received chain the relay path is captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathCapture {
    /// Keep capturing while hops are inside the monitored network.
    LocalHosts,
    /// Keep capturing while hops are outside the monitored network.
    RemoteHosts,
    #[default]
    AllHosts,
    NoHosts,
}

impl PathCapture {
    pub fn allows(self, addr: IpAddr, site: &dyn SiteClassifier) -> bool {
        match self {
            PathCapture::LocalHosts => site.is_local_addr(addr),
            PathCapture::RemoteHosts => !site.is_local_addr(addr),
            PathCapture::AllHosts => true,
            PathCapture::NoHosts => false,
        }
    }
}

/// Network lists describing the monitored site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    #[serde(default)]
    pub local_nets: Vec<IpCidr>,
    #[serde(default = "Site::default_private_nets")]
    pub private_nets: Vec<IpCidr>,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            local_nets: vec![],
            private_nets: Self::default_private_nets(),
        }
    }
}

impl Site {
    fn default_private_nets() -> Vec<IpCidr> {
        [
            "10.0.0.0/8",
            "172.16.0.0/12",
            "192.168.0.0/16",
            "100.64.0.0/10",
            "127.0.0.0/8",
            "169.254.0.0/16",
            "fc00::/7",
            "fe80::/10",
            "::1/128",
        ]
        .iter()
        .filter_map(|net| net.parse().ok())
        .collect()
    }
}

impl SiteClassifier for Site {
    fn is_private_addr(&self, addr: IpAddr) -> bool {
        self.private_nets.iter().any(|net| net.contains(&addr))
    }

    fn is_local_addr(&self, addr: IpAddr) -> bool {
        self.local_nets.iter().any(|net| net.contains(&addr))
    }
}
