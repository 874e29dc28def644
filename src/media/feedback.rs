//! Passive RTCP sink. Keeps the feedback port open and logs what arrives.

use anyhow::Result;
use tokio::net::UdpSocket;

pub struct PassiveSink {
    label: &'static str,
    socket: UdpSocket,
}

impl PassiveSink {
    pub fn new(label: &'static str, socket: UdpSocket) -> Self {
        Self { label, socket }
    }

    /// Receive and discard datagrams forever.
    pub async fn run(self) -> Result<()> {
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, source)) => {
                    tracing::info!("Have {} RTCP data ({} bytes from {})", self.label, len, source)
                }
                Err(e) => tracing::warn!("{} RTCP recv failed: {:#}", self.label, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_sink_never_answers() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink_addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(PassiveSink::new("audio", socket).run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..3 {
            client.send_to(&[0x81, 0xc9, 0x00, 0x01], sink_addr).await.unwrap();
        }

        let mut buf = [0u8; 64];
        let reply = timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        assert!(reply.is_err());
        assert!(!handle.is_finished());
        handle.abort();
    }
}
