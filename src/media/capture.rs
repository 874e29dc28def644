//! Captured packet store, loaded from a pcap file once at startup.
//!
//! Packets are kept exactly as captured, link/IP/UDP headers included, with
//! their capture timestamp split into whole seconds and microseconds. The
//! replayer strips the header prefix when it sends.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use pcap_file::pcap::PcapReader;

/// Ethernet (14) + IPv4 without options (20) + UDP (8).
pub const DEFAULT_LINK_HEADER_LEN: usize = 42;

const MICROS_PER_SEC: u64 = 1_000_000;

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub seconds: u64,
    /// Microseconds within `seconds`.
    pub micros: u32,
    pub data: Vec<u8>,
}

impl CapturedPacket {
    pub fn new(seconds: u64, micros: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            seconds,
            micros,
            data: data.into(),
        }
    }

    /// Bytes after the link header prefix, or `None` for a runt frame.
    pub fn payload(&self, link_header_len: usize) -> Option<&[u8]> {
        self.data.get(link_header_len..)
    }

    /// Wall-clock gap from this packet to `next`, reconstructed from the
    /// split timestamps.
    ///
    /// When the seconds counter advanced, the gap is the remainder of this
    /// packet's second plus `next`'s microseconds, plus any whole seconds in
    /// between. A `next` that is earlier than `self` yields zero.
    pub fn delay_until(&self, next: &CapturedPacket) -> Duration {
        let (prev_us, next_us) = (u64::from(self.micros), u64::from(next.micros));
        if next.seconds == self.seconds {
            Duration::from_micros(next_us.saturating_sub(prev_us))
        } else if next.seconds > self.seconds {
            let carry = next_us + MICROS_PER_SEC.saturating_sub(prev_us);
            Duration::from_micros(carry) + Duration::from_secs(next.seconds - self.seconds - 1)
        } else {
            Duration::ZERO
        }
    }
}

/// Immutable, ordered packets of one media stream.
#[derive(Debug, Default)]
pub struct PacketStore {
    packets: Vec<CapturedPacket>,
}

impl PacketStore {
    pub fn from_packets(packets: Vec<CapturedPacket>) -> Self {
        Self { packets }
    }

    /// Load every packet of a pcap file (micro- or nanosecond resolution).
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open capture file {}", path.display()))?;
        let store = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to load capture file {}", path.display()))?;
        if store.is_empty() {
            tracing::warn!("Capture file {} holds no packets", path.display());
        } else {
            tracing::info!("Loaded {} packets from {}", store.len(), path.display());
        }
        Ok(store)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut pcap = PcapReader::new(reader).context("Invalid pcap header")?;
        let mut packets = Vec::new();
        while let Some(packet) = pcap.next_packet() {
            let packet = packet
                .with_context(|| format!("Invalid pcap record after {} packets", packets.len()))?;
            packets.push(CapturedPacket::new(
                packet.timestamp.as_secs(),
                packet.timestamp.subsec_micros(),
                packet.data.into_owned(),
            ));
        }
        Ok(Self::from_packets(packets))
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CapturedPacket> {
        self.packets.get(index)
    }

    /// Total time a replay starting at `start` takes from first to last send.
    pub fn replay_duration(&self, start: usize) -> Duration {
        self.packets
            .get(start..)
            .unwrap_or_default()
            .windows(2)
            .map(|pair| pair[0].delay_until(&pair[1]))
            .sum()
    }
}

/// Build an in-memory pcap from `(seconds, micros, frame)` triples.
#[cfg(test)]
pub(crate) fn pcap_bytes(packets: &[(u64, u32, Vec<u8>)]) -> Vec<u8> {
    use pcap_file::pcap::{PcapPacket, PcapWriter};

    let mut writer = PcapWriter::new(Vec::new()).unwrap();
    for (seconds, micros, data) in packets {
        let ts = Duration::new(*seconds, micros * 1_000);
        writer
            .write_packet(&PcapPacket::new(ts, data.len() as u32, data))
            .unwrap();
    }
    writer.into_writer()
}

/// A fake Ethernet/IPv4/UDP frame wrapping `payload`.
#[cfg(test)]
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; DEFAULT_LINK_HEADER_LEN];
    data.extend_from_slice(payload);
    data
}
