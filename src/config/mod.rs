//! Fixture configuration

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::media::capture::DEFAULT_LINK_HEADER_LEN;
use crate::media::sdp;

/// Replay start index for the reference captures (skips call setup noise).
const DEFAULT_START_INDEX: usize = 918;

/// One replayed media stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// RTP port; the replay trigger socket. RTCP feedback listens one above.
    pub port: u16,
    /// pcap file holding the captured stream
    pub capture: PathBuf,
    /// Index of the first packet a session sends
    pub start_index: usize,
}

impl StreamConfig {
    fn new(port: u16, capture: &str) -> Self {
        Self {
            port,
            capture: PathBuf::from(capture),
            start_index: DEFAULT_START_INDEX,
        }
    }

    pub fn feedback_port(&self) -> u16 {
        sdp::rtcp_port(self.port)
    }
}

/// Fixture configuration. Defaults match the reference deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IP advertised in Contact, SDP and the ding descriptor
    pub ip: String,
    /// Local address all sockets bind to
    pub bind_ip: IpAddr,
    /// SIP over TCP
    pub signaling_port: u16,
    /// SIP over UDP, disabled when unset
    pub signaling_udp_port: Option<u16>,
    /// Bytes stripped from each captured frame before replay
    pub link_header_len: usize,
    pub audio: StreamConfig,
    pub video: StreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            bind_ip: IpAddr::from([0, 0, 0, 0]),
            signaling_port: 8081,
            signaling_udp_port: None,
            link_header_len: DEFAULT_LINK_HEADER_LEN,
            audio: StreamConfig::new(30510, "audio_in.pcap"),
            video: StreamConfig::new(30304, "video_in.pcap"),
        }
    }
}

impl Config {
    /// Get config file path
    fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "doorbot-fixture", "doorbot-fixture")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from `path`, or from the platform config directory.
    ///
    /// An explicit path must exist. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject port layouts where two endpoints would collide.
    pub fn validate(&self) -> Result<()> {
        let mut ports = vec![
            ("audio", self.audio.port),
            ("audio feedback", self.audio.feedback_port()),
            ("video", self.video.port),
            ("video feedback", self.video.feedback_port()),
        ];
        if let Some(port) = self.signaling_udp_port {
            ports.push(("signaling udp", port));
        }
        for (i, (name, port)) in ports.iter().enumerate() {
            if let Some((other, _)) = ports[i + 1..].iter().find(|(_, p)| p == port) {
                bail!("{} and {} ports both set to {}", name, other, port);
            }
        }
        if self.audio.port == u16::MAX || self.video.port == u16::MAX {
            bail!("RTP ports must leave room for RTCP one above");
        }
        Ok(())
    }

    pub fn bind_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind_ip, port)
    }
}
