pub mod config;
pub mod connection;
pub mod events;
pub mod extract;
pub mod notice;
pub mod record;
pub mod server;
pub mod sink;
pub mod tracker;

pub use config::Config;
pub use connection::{Connection, FiveTuple, PathCapture};
pub use events::Event;
pub use notice::{Notice, NoticeKind};
pub use record::MessageRecord;
pub use server::EventServer;
pub use tracker::{Header, SmtpTracker, TrackerStats};
