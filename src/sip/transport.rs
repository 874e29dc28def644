//! SIP transports: a TCP listener (one task per peer connection) and an
//! optional UDP endpoint.
//!
//! Over TCP the response always travels back on the connection the request
//! came in on; the routed address is only logged. Over UDP the response is
//! sent to the routed address.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};

use super::message::{take_frame, SipMessage, SipResponse, MAX_MESSAGE_SIZE};
use super::responder::SignalResponder;
use super::router::{ResponseRouter, RoutingAddress};

/// Parse one message and run requests through the responder.
fn dispatch(data: &[u8], peer: SocketAddr, responder: &SignalResponder) -> Option<SipResponse> {
    match SipMessage::parse(data) {
        Ok(SipMessage::Request(request)) => {
            tracing::debug!("SIP from {}:\n{}", peer, String::from_utf8_lossy(data));
            responder.handle(&request, peer)
        }
        Ok(SipMessage::Response(response)) => {
            tracing::info!(
                "Ignoring {} {} response from {}",
                response.status,
                response.reason,
                peer
            );
            None
        }
        Err(e) => {
            tracing::warn!("Dropping malformed SIP from {}: {}", peer, e);
            None
        }
    }
}

/// Route a response, falling back to the peer address when the Via is
/// missing or unparseable.
fn destination(
    router: &ResponseRouter,
    response: &SipResponse,
    peer: SocketAddr,
    transport: &str,
) -> RoutingAddress {
    router.route(response).unwrap_or_else(|e| {
        tracing::debug!("Cannot route by Via ({}), answering {}", e, peer);
        RoutingAddress {
            host: peer.ip().to_string(),
            port: peer.port(),
            transport: transport.to_string(),
        }
    })
}

/// TCP signaling listener.
pub struct TcpSignaling {
    listener: TcpListener,
    responder: Arc<SignalResponder>,
    router: ResponseRouter,
}

impl TcpSignaling {
    pub async fn bind(addr: SocketAddr, responder: Arc<SignalResponder>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind SIP TCP listener on {}", addr))?;
        let router = ResponseRouter::new(responder.signaling_port());
        let signaling = Self {
            listener,
            responder,
            router,
        };
        tracing::info!("SIP/TCP listening on {}", signaling.local_addr()?);
        Ok(signaling)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per peer.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("SIP TCP accept failed")?;
            let responder = self.responder.clone();
            let router = self.router;
            tokio::spawn(handle_connection(stream, peer, responder, router));
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    responder: Arc<SignalResponder>,
    router: ResponseRouter,
) {
    tracing::info!("SIP connection from {}", peer);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    'conn: loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("SIP read from {} failed: {:#}", peer, e);
                break;
            }
        };
        buf.extend_from_slice(&chunk[..n]);

        loop {
            let frame = match take_frame(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Discarding unframeable SIP from {}: {}", peer, e);
                    buf.clear();
                    break;
                }
            };

            let Some(response) = dispatch(&frame, peer, &responder) else {
                continue;
            };
            let dest = destination(&router, &response, peer, "TCP");
            tracing::debug!("SIP to {} (via {}):\n{}", peer, dest, response);
            if let Err(e) = stream.write_all(&response.to_bytes()).await {
                tracing::warn!("SIP write to {} failed: {:#}", peer, e);
                break 'conn;
            }
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            tracing::warn!("SIP message from {} exceeds {} bytes, discarding", peer, MAX_MESSAGE_SIZE);
            buf.clear();
        }
    }

    tracing::info!("SIP connection from {} closed", peer);
}

/// UDP signaling endpoint; one datagram is one message.
pub struct UdpSignaling {
    socket: UdpSocket,
    responder: Arc<SignalResponder>,
    router: ResponseRouter,
}

impl UdpSignaling {
    pub async fn bind(addr: SocketAddr, responder: Arc<SignalResponder>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind SIP UDP socket on {}", addr))?;
        let router = ResponseRouter::new(responder.signaling_port());
        let signaling = Self {
            socket,
            responder,
            router,
        };
        tracing::info!("SIP/UDP listening on {}", signaling.local_addr()?);
        Ok(signaling)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("SIP UDP recv failed: {:#}", e);
                    continue;
                }
            };

            let Some(response) = dispatch(&buf[..len], peer, &self.responder) else {
                continue;
            };
            let dest = destination(&self.router, &response, peer, "UDP");
            if let Err(e) = self.deliver(&response, &dest).await {
                tracing::warn!("SIP delivery to {} failed: {:#}", dest, e);
            }
        }
    }

    async fn deliver(&self, response: &SipResponse, dest: &RoutingAddress) -> Result<()> {
        let target = lookup_host((dest.host.as_str(), dest.port))
            .await
            .with_context(|| format!("Failed to resolve {}", dest.host))?
            .next()
            .with_context(|| format!("No address for {}", dest.host))?;
        tracing::debug!("SIP to {}:\n{}", target, response);
        self.socket
            .send_to(&response.to_bytes(), target)
            .await
            .with_context(|| format!("Failed to send response to {}", target))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn responder() -> Arc<SignalResponder> {
        Arc::new(SignalResponder::new("127.0.0.1", 8081, 30510, 30304))
    }

    fn request(method: &str, via: &str, cseq: u32) -> String {
        format!(
            "{method} sip:1-2@127.0.0.1:8081 SIP/2.0\r\n\
             Via: {via}\r\n\
             From: <sip:client@127.0.0.1>;tag=1\r\n\
             To: <sip:1-2@127.0.0.1:8081>\r\n\
             Call-ID: transport-test\r\n\
             CSeq: {cseq} {method}\r\n\
             Content-Length: 0\r\n\
             \r\n"
        )
    }

    async fn read_response(stream: &mut TcpStream, buf: &mut Vec<u8>) -> SipResponse {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = take_frame(buf).unwrap() {
                match SipMessage::parse(&frame).unwrap() {
                    SipMessage::Response(resp) => return resp,
                    other => panic!("expected response, got {:?}", other),
                }
            }
            let n = timeout(Duration::from_secs(2), stream.read(&mut chunk))
                .await
                .expect("timed out waiting for response")
                .unwrap();
            assert!(n > 0, "connection closed");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn test_tcp_call_flow() {
        let server = TcpSignaling::bind("127.0.0.1:0".parse().unwrap(), responder())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let via = "SIP/2.0/TCP 127.0.0.1:5060;branch=z9hG4bK1";

        // INVITE split across two writes.
        let invite = request("INVITE", via, 1);
        let (a, b) = invite.as_bytes().split_at(40);
        stream.write_all(a).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(b).await.unwrap();

        let mut buf = Vec::new();
        let ok = read_response(&mut stream, &mut buf).await;
        assert_eq!(ok.status, 200);
        assert_eq!(ok.headers.first("cseq"), Some("1 INVITE"));
        assert_eq!(ok.headers.first("content-type"), Some("application/sdp"));
        let declared: usize = ok.headers.first("content-length").unwrap().parse().unwrap();
        assert_eq!(ok.body.len(), declared);

        // ACK and garbage get nothing back; the BYE answer is the next thing read.
        stream
            .write_all(request("ACK", via, 1).as_bytes())
            .await
            .unwrap();
        stream.write_all(b"not sip at all\r\n\r\n").await.unwrap();
        stream
            .write_all(request("BYE", via, 2).as_bytes())
            .await
            .unwrap();

        let bye_ok = read_response(&mut stream, &mut buf).await;
        assert_eq!(bye_ok.status, 200);
        assert_eq!(bye_ok.headers.first("cseq"), Some("2 BYE"));
        assert!(bye_ok.body.is_empty());
    }

    #[tokio::test]
    async fn test_udp_response_follows_via() {
        let server = UdpSignaling::bind("127.0.0.1:0".parse().unwrap(), responder())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_port = receiver.local_addr().unwrap().port();

        // The Via names a different port than the one we send from.
        let via = format!(
            "SIP/2.0/UDP 127.0.0.1:5999;branch=z9hG4bK2;received=127.0.0.1;rport={}",
            receiver_port
        );
        sender
            .send_to(request("INFO", &via, 7).as_bytes(), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let (len, from) = timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("no response at routed address")
            .unwrap();
        assert_eq!(from, server_addr);
        let SipMessage::Response(resp) = SipMessage::parse(&buf[..len]).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.first("content-length"), Some("0"));
        assert_eq!(resp.headers.first("cseq"), Some("7 INFO"));
    }

    #[tokio::test]
    async fn test_udp_unhandled_method_is_silent() {
        let server = UdpSignaling::bind("127.0.0.1:0".parse().unwrap(), responder())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let via = format!("SIP/2.0/UDP {}", client.local_addr().unwrap());
        client
            .send_to(request("OPTIONS", &via, 3).as_bytes(), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let res = timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(res.is_err(), "OPTIONS must not be answered");
    }
}
