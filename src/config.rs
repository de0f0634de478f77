//! Server configuration
//!
//! Every option has a default, a command-line flag and an `MAVX_*`
//! environment variable.

use crate::upload::UploadLimits;
use std::net::SocketAddr;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Compressed bytes accepted per upload and per request body
    pub max_upload_bytes: u64,
    /// Size limit of a decompressed log
    pub max_decoded_bytes: u64,
    /// Inactivity after which a partial upload is discarded
    pub upload_ttl: Duration,
    /// Analysis sessions kept in memory, 0 for no limit
    pub max_sessions: usize,
    /// XML catalog files or glob patterns; empty uses the built-in catalog
    pub graph_patterns: Vec<String>,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_upload_bytes: 200 * MIB,
            max_decoded_bytes: 512 * MIB,
            upload_ttl: Duration::from_secs(600),
            max_sessions: 32,
            graph_patterns: Vec::new(),
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_upload_bytes: self.max_upload_bytes,
            max_decoded_bytes: self.max_decoded_bytes,
            upload_ttl: self.upload_ttl,
        }
    }

    /// Request body limit for the upload routes; multipart framing needs headroom
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes.saturating_add(MIB)).unwrap_or(usize::MAX)
    }
}

#[cfg(feature = "cli")]
pub use cli::{build_command, config_from_matches};

#[cfg(feature = "cli")]
mod cli {
    use super::{ServerConfig, MIB};
    use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
    use std::net::SocketAddr;
    use std::time::Duration;

    pub fn build_command() -> Command {
        Command::new("MAV Explorer")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Serve ArduPilot DataFlash logs for browsing: chunked upload, timeseries, graphs, flight modes and CSV export.")
            .arg(
                Arg::new("bind")
                    .long("bind")
                    .env("MAVX_BIND")
                    .help("Address to listen on")
                    .value_name("ADDR")
                    .default_value("0.0.0.0:5000")
                    .value_parser(value_parser!(SocketAddr)),
            )
            .arg(
                Arg::new("max-upload-mb")
                    .long("max-upload-mb")
                    .env("MAVX_MAX_UPLOAD_MB")
                    .help("Maximum compressed upload size in MiB")
                    .value_name("MIB")
                    .default_value("200")
                    .value_parser(value_parser!(u64).range(1..)),
            )
            .arg(
                Arg::new("max-decoded-mb")
                    .long("max-decoded-mb")
                    .env("MAVX_MAX_DECODED_MB")
                    .help("Maximum decompressed log size in MiB")
                    .value_name("MIB")
                    .default_value("512")
                    .value_parser(value_parser!(u64).range(1..)),
            )
            .arg(
                Arg::new("upload-ttl")
                    .long("upload-ttl")
                    .env("MAVX_UPLOAD_TTL")
                    .help("Seconds of inactivity before a partial upload is discarded")
                    .value_name("SECS")
                    .default_value("600")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("max-sessions")
                    .long("max-sessions")
                    .env("MAVX_MAX_SESSIONS")
                    .help("Decoded logs kept in memory; the oldest is dropped first (0 = unlimited)")
                    .value_name("N")
                    .default_value("32")
                    .value_parser(value_parser!(usize)),
            )
            .arg(
                Arg::new("graphs")
                    .long("graphs")
                    .env("MAVX_GRAPHS")
                    .help("Graph catalog XML files (supports globbing); defaults to the built-in catalog")
                    .value_name("PATTERN")
                    .num_args(1..)
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("debug")
                    .long("debug")
                    .help("Enable debug logging")
                    .action(ArgAction::SetTrue),
            )
    }

    pub fn config_from_matches(matches: &ArgMatches) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind: matches
                .get_one::<SocketAddr>("bind")
                .copied()
                .unwrap_or(defaults.bind),
            max_upload_bytes: matches
                .get_one::<u64>("max-upload-mb")
                .map_or(defaults.max_upload_bytes, |mb| mb.saturating_mul(MIB)),
            max_decoded_bytes: matches
                .get_one::<u64>("max-decoded-mb")
                .map_or(defaults.max_decoded_bytes, |mb| mb.saturating_mul(MIB)),
            upload_ttl: matches
                .get_one::<u64>("upload-ttl")
                .map_or(defaults.upload_ttl, |secs| Duration::from_secs(*secs)),
            max_sessions: matches
                .get_one::<usize>("max-sessions")
                .copied()
                .unwrap_or(defaults.max_sessions),
            graph_patterns: matches
                .get_many::<String>("graphs")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            debug: matches.get_flag("debug"),
        }
    }

}
