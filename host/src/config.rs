//! Command-line configuration of the host

use crate::transport::ReverseTarget;
use clap::{Parser, ValueEnum};
use shared::{SizeOrder, DEFAULT_MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Byte order of the stream transport's size prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrefixOrder {
    /// Little-endian with the bytes reversed
    Swapped,
    Little,
}

impl From<PrefixOrder> for SizeOrder {
    fn from(order: PrefixOrder) -> Self {
        match order {
            PrefixOrder::Swapped => SizeOrder::Swapped,
            PrefixOrder::Little => SizeOrder::Little,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Scene replication host", long_about = None)]
pub struct HostConfig {
    /// Listen address of the size-prefixed stream transport
    #[arg(long, default_value = "0.0.0.0:45000")]
    pub stream_addr: SocketAddr,

    /// Listen address of the event transport (controller and headset peers)
    #[arg(long, default_value = "0.0.0.0:46001")]
    pub event_addr: SocketAddr,

    /// Reverse-channel target; defaults to the stream peer's IP at --headset-port
    #[arg(long)]
    pub headset_addr: Option<SocketAddr>,

    /// Reverse-channel port on the head-mounted client
    #[arg(long, default_value = "46000")]
    pub headset_port: u16,

    /// Ticks per second
    #[arg(short, long, default_value = "60", value_parser = clap::value_parser!(u32).range(1..))]
    pub tick_rate: u32,

    #[arg(long, value_enum, default_value = "swapped")]
    pub size_order: PrefixOrder,

    /// Largest accepted frame, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Keep at most this many received meshes
    #[arg(long)]
    pub mesh_history_limit: Option<usize>,

    /// Where mesh history is saved on shutdown
    #[arg(long)]
    pub mesh_file: Option<PathBuf>,

    /// Replay the meshes in --mesh-file at startup
    #[arg(long, requires = "mesh_file")]
    pub load_meshes: bool,
}

impl HostConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    pub fn stream_order(&self) -> SizeOrder {
        self.size_order.into()
    }

    pub fn reverse_target(&self) -> ReverseTarget {
        ReverseTarget {
            explicit: self.headset_addr,
            port: self.headset_port,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            stream_addr: SocketAddr::from(([0, 0, 0, 0], 45000)),
            event_addr: SocketAddr::from(([0, 0, 0, 0], 46001)),
            headset_addr: None,
            headset_port: 46000,
            tick_rate: 60,
            size_order: PrefixOrder::Swapped,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            mesh_history_limit: None,
            mesh_file: None,
            load_meshes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_parser() {
        let parsed = HostConfig::parse_from(["host"]);
        let default = HostConfig::default();

        assert_eq!(parsed.stream_addr, default.stream_addr);
        assert_eq!(parsed.event_addr, default.event_addr);
        assert_eq!(parsed.headset_addr, None);
        assert_eq!(parsed.headset_port, 46000);
        assert_eq!(parsed.tick_rate, 60);
        assert_eq!(parsed.stream_order(), SizeOrder::Swapped);
        assert_eq!(parsed.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(!parsed.load_meshes);
    }

    #[test]
    fn test_explicit_flags() {
        let parsed = HostConfig::try_parse_from([
            "host",
            "--stream-addr",
            "127.0.0.1:5000",
            "--headset-addr",
            "10.1.1.4:46000",
            "--size-order",
            "little",
            "--tick-rate",
            "30",
            "--mesh-history-limit",
            "8",
            "--mesh-file",
            "meshes.bin",
            "--load-meshes",
        ])
        .unwrap();

        assert_eq!(parsed.stream_addr.port(), 5000);
        assert_eq!(parsed.stream_order(), SizeOrder::Little);
        assert_eq!(parsed.mesh_history_limit, Some(8));
        assert_eq!(parsed.tick_duration(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(
            parsed.reverse_target().explicit,
            Some("10.1.1.4:46000".parse().unwrap())
        );
    }

    #[test]
    fn test_invalid_flags_rejected() {
        assert!(HostConfig::try_parse_from(["host", "--tick-rate", "0"]).is_err());
        assert!(HostConfig::try_parse_from(["host", "--size-order", "big"]).is_err());
        assert!(HostConfig::try_parse_from(["host", "--load-meshes"]).is_err());
    }
}
