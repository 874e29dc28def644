//! Startup wiring and the endpoint task set.
//!
//! Order matters: captures are loaded before schedulers are built, and
//! schedulers before any socket is bound, so a bad capture aborts startup
//! without leaving ports half-open.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;

use crate::config::{Config, StreamConfig};
use crate::media::capture::PacketStore;
use crate::media::feedback::PassiveSink;
use crate::media::replay::ReplayScheduler;
use crate::sip::responder::SignalResponder;
use crate::sip::transport::{TcpSignaling, UdpSignaling};

/// Load a stream's capture, refusing one the configured start index overruns.
pub fn load_store(label: &str, stream: &StreamConfig) -> Result<Arc<PacketStore>> {
    let store = PacketStore::load(&stream.capture)
        .with_context(|| format!("Cannot start without the {} capture", label))?;
    if stream.start_index >= store.len() {
        bail!(
            "{} capture {} has {} packets but replay starts at index {}",
            label,
            stream.capture.display(),
            store.len(),
            stream.start_index
        );
    }
    Ok(Arc::new(store))
}

/// Replay trigger socket plus its RTCP sink.
struct MediaEndpoint {
    scheduler: ReplayScheduler,
    replay_socket: UdpSocket,
    sink: PassiveSink,
}

impl MediaEndpoint {
    async fn bind(
        label: &'static str,
        config: &Config,
        stream: &StreamConfig,
        scheduler: ReplayScheduler,
    ) -> Result<Self> {
        let replay_addr = config.bind_addr(stream.port);
        let replay_socket = UdpSocket::bind(replay_addr)
            .await
            .with_context(|| format!("Failed to bind {} RTP socket on {}", label, replay_addr))?;

        let feedback_addr = config.bind_addr(stream.feedback_port());
        let feedback_socket = UdpSocket::bind(feedback_addr).await.with_context(|| {
            format!("Failed to bind {} RTCP socket on {}", label, feedback_addr)
        })?;

        tracing::info!(
            "{} replay on {}, feedback on {}",
            label,
            replay_socket.local_addr()?,
            feedback_socket.local_addr()?
        );

        Ok(Self {
            scheduler,
            replay_socket,
            sink: PassiveSink::new(label, feedback_socket),
        })
    }

    fn spawn(self, tasks: &mut JoinSet<Result<()>>) {
        tasks.spawn(self.scheduler.run(self.replay_socket));
        tasks.spawn(self.sink.run());
    }
}

/// Every endpoint of the fixture, bound and ready to run.
pub struct Fixture {
    tcp: TcpSignaling,
    udp: Option<UdpSignaling>,
    audio: MediaEndpoint,
    video: MediaEndpoint,
}

impl Fixture {
    pub async fn bind(config: &Config) -> Result<Self> {
        let audio_store = load_store("audio", &config.audio)?;
        let video_store = load_store("video", &config.video)?;

        let audio_scheduler = ReplayScheduler::new(
            "audio",
            audio_store,
            config.audio.start_index,
            config.link_header_len,
        );
        let video_scheduler = ReplayScheduler::new(
            "video",
            video_store,
            config.video.start_index,
            config.link_header_len,
        );

        let responder = Arc::new(SignalResponder::from_config(config));
        let tcp = TcpSignaling::bind(config.bind_addr(config.signaling_port), responder.clone())
            .await?;
        let udp = match config.signaling_udp_port {
            Some(port) => Some(UdpSignaling::bind(config.bind_addr(port), responder).await?),
            None => None,
        };

        let audio = MediaEndpoint::bind("audio", config, &config.audio, audio_scheduler).await?;
        let video = MediaEndpoint::bind("video", config, &config.video, video_scheduler).await?;

        Ok(Self {
            tcp,
            udp,
            audio,
            video,
        })
    }

    pub fn signaling_addr(&self) -> Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Run all endpoints until one fails or Ctrl+C.
    ///
    /// Dropping the task set aborts every endpoint and releases its socket.
    pub async fn run(self) -> Result<()> {
        let mut tasks = JoinSet::new();
        tasks.spawn(self.tcp.run());
        if let Some(udp) = self.udp {
            tasks.spawn(udp.run());
        }
        self.audio.spawn(&mut tasks);
        self.video.spawn(&mut tasks);

        tokio::select! {
            finished = tasks.join_next() => match finished {
                Some(Ok(Ok(()))) | None => Ok(()),
                Some(Ok(Err(e))) => Err(e),
                Some(Err(e)) => Err(e).context("Endpoint task panicked"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                Ok(())
            }
        }
    }
}
