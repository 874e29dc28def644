//! Timed RTP replay from a captured packet store.
//!
//! A scheduler owns one UDP socket. The first datagram to arrive while idle
//! starts a session towards its sender; the session walks the store from a
//! fixed start index, sending each packet and sleeping for the captured gap
//! before the next one. Datagrams arriving mid-session are ignored.
//!
//! State is owned by the task that drives the socket, so no lock is needed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};

use super::capture::PacketStore;

/// Largest datagram we read off a trigger socket. The payload is ignored.
const TRIGGER_BUF_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Replaying {
        /// Index of the next packet to send.
        cursor: usize,
        destination: SocketAddr,
    },
}

/// One send decided by [`ReplayScheduler::step`].
#[derive(Debug)]
pub struct Emission<'a> {
    pub index: usize,
    pub destination: SocketAddr,
    /// Packet bytes without the link header, `None` for a runt frame.
    pub payload: Option<&'a [u8]>,
    /// Gap before the next packet, `None` when this was the last one.
    pub next: Option<Duration>,
}

pub struct ReplayScheduler {
    label: &'static str,
    store: Arc<PacketStore>,
    start_index: usize,
    link_header_len: usize,
    state: ReplayState,
    sessions_completed: u64,
}

impl ReplayScheduler {
    pub fn new(
        label: &'static str,
        store: Arc<PacketStore>,
        start_index: usize,
        link_header_len: usize,
    ) -> Self {
        Self {
            label,
            store,
            start_index,
            link_header_len,
            state: ReplayState::Idle,
            sessions_completed: 0,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed
    }

    /// Handle a datagram from `source`. Returns true if it started a session.
    pub fn trigger(&mut self, source: SocketAddr) -> bool {
        match self.state {
            ReplayState::Replaying { destination, .. } => {
                tracing::debug!(
                    "Ignoring {} trigger from {} while replaying to {}",
                    self.label,
                    source,
                    destination
                );
                false
            }
            ReplayState::Idle if self.start_index >= self.store.len() => {
                tracing::warn!(
                    "{} capture has {} packets, nothing to replay from index {}",
                    self.label,
                    self.store.len(),
                    self.start_index
                );
                false
            }
            ReplayState::Idle => {
                tracing::info!("Start pushing {} RTP data to {}", self.label, source);
                self.state = ReplayState::Replaying {
                    cursor: self.start_index,
                    destination: source,
                };
                true
            }
        }
    }

    /// Take the packet under the cursor and advance.
    ///
    /// Returns to `Idle` after the last packet. Returns `None` when idle.
    pub fn step(&mut self) -> Option<Emission<'_>> {
        let ReplayState::Replaying {
            cursor,
            destination,
        } = self.state
        else {
            return None;
        };

        let Some(packet) = self.store.get(cursor) else {
            self.state = ReplayState::Idle;
            return None;
        };
        let next = self
            .store
            .get(cursor + 1)
            .map(|following| packet.delay_until(following));

        if next.is_some() {
            self.state = ReplayState::Replaying {
                cursor: cursor + 1,
                destination,
            };
        } else {
            tracing::info!("Finished pushing {} RTP data to {}", self.label, destination);
            self.state = ReplayState::Idle;
            self.sessions_completed += 1;
        }

        Some(Emission {
            index: cursor,
            destination,
            payload: packet.payload(self.link_header_len),
            next,
        })
    }

    /// Drive the scheduler from `socket` forever.
    pub async fn run(mut self, socket: UdpSocket) -> Result<()> {
        let mut buf = [0u8; TRIGGER_BUF_SIZE];
        let mut due: Option<Instant> = None;

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((_, source)) => {
                        if self.trigger(source) {
                            due = Some(Instant::now());
                        }
                    }
                    Err(e) => tracing::warn!("{} socket recv failed: {:#}", self.label, e),
                },
                _ = time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    due = self.emit(&socket).await;
                    if due.is_none() {
                        debug_assert_eq!(self.state(), ReplayState::Idle);
                        tracing::debug!(
                            "{} replay idle after {} sessions",
                            self.label,
                            self.sessions_completed()
                        );
                    }
                }
            }
        }
    }

    /// Send one packet and return when the next one is due.
    async fn emit(&mut self, socket: &UdpSocket) -> Option<Instant> {
        let label = self.label;
        let emission = self.step()?;

        match emission.payload {
            Some(payload) => {
                if let Err(e) = socket.send_to(payload, emission.destination).await {
                    tracing::warn!(
                        "{} packet {} to {} failed: {:#}",
                        label,
                        emission.index,
                        emission.destination,
                        e
                    );
                }
            }
            None => tracing::warn!(
                "{} packet {} is shorter than the link header, skipped",
                label,
                emission.index
            ),
        }

        // Measured from the send, so a late timer never shortens the next gap.
        emission.next.map(|delay| Instant::now() + delay)
    }
}
