//! Fleet agent.
//!
//! Provides:
//! - `FileTailer` - follows local files from their current end
//! - `Uplink` - streams tailed lines to the hub and answers hub commands
//! - Hub dialing with optional TLS

pub mod config;
pub mod connect;
pub mod tailer;
pub mod uplink;

pub use config::{AgentConfig, AgentTls, ConfigError, load_filelist, parse_filelist};
pub use connect::{ClientTls, ConnectError, bootstrap, connect_plain, connect_tls};
pub use tailer::{FileTailer, LineSource};
pub use uplink::{EnvelopeSender, Uplink, UplinkError, WatchedFile};
