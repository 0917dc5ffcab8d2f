//! Raw voice transport.
//!
//! A connection opens with a single JSON handshake read, then every further
//! read is treated as one binary voice packet.

use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use super::capture::{quality_report, AudioFormat, AudioPacket};
use super::packet;
use crate::state::AppState;
use crate::voice;

/// Upper bound on the handshake frame.
pub const HANDSHAKE_LIMIT: usize = 4096;
/// Read buffer for packet reads.
const READ_BUFFER: usize = 4096;

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceHandshake {
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("connection closed before handshake")]
    NoHandshake,
    #[error("invalid handshake: {0}")]
    Handshake(#[from] serde_json::Error),
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct VoiceServer {
    listener: TcpListener,
    state: AppState,
    read_timeout: Duration,
}

impl VoiceServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        state: AppState,
        read_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state,
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires. Connections already
    /// accepted are left to finish on their own.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "voice accept failed");
                        continue;
                    }
                },
            };

            let state = self.state.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                tracing::debug!(peer = %peer, "voice connection accepted");
                match handle_connection(stream, state, read_timeout).await {
                    Ok(()) => tracing::debug!(peer = %peer, "voice connection closed"),
                    Err(e) => tracing::info!(peer = %peer, error = %e, "voice connection ended"),
                }
            });
        }
        tracing::info!("voice transport stopped accepting");
    }
}

async fn read_handshake(
    stream: &mut TcpStream,
    read_timeout: Duration,
) -> Result<VoiceHandshake, VoiceError> {
    let mut buf = vec![0u8; HANDSHAKE_LIMIT];
    let n = tokio::time::timeout(read_timeout, stream.read(&mut buf))
        .await
        .map_err(|_| VoiceError::Timeout(read_timeout))??;
    if n == 0 {
        return Err(VoiceError::NoHandshake);
    }

    // Only the first JSON value counts; anything after it in the same read is dropped.
    let mut values = serde_json::Deserializer::from_slice(&buf[..n]).into_iter::<VoiceHandshake>();
    match values.next() {
        Some(handshake) => Ok(handshake?),
        None => Err(VoiceError::NoHandshake),
    }
}

pub async fn handle_connection(
    mut stream: TcpStream,
    state: AppState,
    read_timeout: Duration,
) -> Result<(), VoiceError> {
    let handshake = read_handshake(&mut stream, read_timeout).await?;
    let session_id = uuid::Uuid::new_v4().to_string();

    voice::state::register_connection(
        &state,
        &session_id,
        &handshake.guild_id,
        &handshake.channel_id,
        &handshake.user_id,
    );
    state.capture.start_capture(&handshake.channel_id);
    tracing::info!(
        session_id = %session_id,
        guild_id = %handshake.guild_id,
        channel_id = %handshake.channel_id,
        user_id = %handshake.user_id,
        "voice session established"
    );

    let result = stream_packets(
        &mut stream,
        &state,
        &session_id,
        &handshake.channel_id,
        read_timeout,
    )
    .await;

    if let Some(capture) = state.capture.stop_capture(&handshake.channel_id) {
        let report = quality_report(&capture);
        tracing::info!(
            session_id = %session_id,
            channel_id = %handshake.channel_id,
            packets = report.packet_count,
            gaps = report.gap_count,
            packet_rate = report.packet_rate,
            avg_payload = report.average_payload_size,
            "voice capture finished"
        );
    }
    voice::state::remove_connection(&state, &session_id);

    result
}

async fn stream_packets(
    stream: &mut TcpStream,
    state: &AppState,
    session_id: &str,
    channel_id: &str,
    read_timeout: Duration,
) -> Result<(), VoiceError> {
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = tokio::time::timeout(read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| VoiceError::Timeout(read_timeout))??;
        if n == 0 {
            return Ok(());
        }

        let Some(packet) = packet::decode(&buf[..n]) else {
            tracing::trace!(session_id, len = n, "discarding short read");
            continue;
        };

        state.capture.capture_packet(
            channel_id,
            AudioPacket {
                captured_at: Utc::now(),
                sequence: packet.header.sequence,
                ssrc: packet.header.ssrc,
                payload: packet.payload.to_vec(),
                format: AudioFormat::Opus,
            },
        );
        voice::state::touch_connection(state, session_id);
    }
}
