use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Opus,
    Pcm,
}

#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub captured_at: DateTime<Utc>,
    pub sequence: u16,
    pub ssrc: u32,
    pub payload: Vec<u8>,
    pub format: AudioFormat,
}

/// A recording of one channel's packets, from start to stop.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub channel_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub packets: Vec<AudioPacket>,
    pub packet_count: u64,
}

impl CaptureSession {
    fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            packets: Vec::new(),
            packet_count: 0,
        }
    }

    /// Elapsed time of the capture; still running captures measure up to now.
    pub fn duration(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub channel_id: String,
    pub packet_count: u64,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub average_payload_size: f64,
    pub packet_rate: f64,
    pub gap_count: u64,
}

fn serialize_millis<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration.as_millis() as u64)
}

/// Per-channel recording engine. Holds zero or one active capture per channel.
#[derive(Default)]
pub struct AudioCapture {
    sessions: DashMap<String, CaptureSession>,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording a channel. Does nothing if a capture is already active.
    pub fn start_capture(&self, channel_id: &str) {
        self.sessions
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(channel_id, "capture started");
                CaptureSession::new(channel_id)
            });
    }

    /// Stop recording a channel and hand back the finished session.
    pub fn stop_capture(&self, channel_id: &str) -> Option<CaptureSession> {
        let (_, mut session) = self.sessions.remove(channel_id)?;
        session.ended_at = Some(Utc::now());
        tracing::debug!(
            channel_id,
            packets = session.packet_count,
            duration_ms = session.duration().as_millis() as u64,
            "capture stopped"
        );
        Some(session)
    }

    /// Record a packet. Packets for channels without an active capture are dropped.
    pub fn capture_packet(&self, channel_id: &str, packet: AudioPacket) {
        if let Some(mut session) = self.sessions.get_mut(channel_id) {
            session.packets.push(packet);
            session.packet_count += 1;
        }
    }

    /// True only if the capture exists, holds packets, and all of them are `expected`.
    pub fn validate_format(&self, channel_id: &str, expected: AudioFormat) -> bool {
        match self.sessions.get(channel_id) {
            Some(session) if !session.packets.is_empty() => {
                session.packets.iter().all(|p| p.format == expected)
            }
            _ => false,
        }
    }

    pub fn analyze_quality(&self, channel_id: &str) -> Option<QualityReport> {
        let session = self.sessions.get(channel_id)?;
        Some(quality_report(&session))
    }

    pub fn is_capturing(&self, channel_id: &str) -> bool {
        self.sessions.contains_key(channel_id)
    }

    pub fn active_channels(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

pub fn quality_report(session: &CaptureSession) -> QualityReport {
    let duration = session.duration();
    let total_payload: usize = session.packets.iter().map(|p| p.payload.len()).sum();
    let average_payload_size = if session.packets.is_empty() {
        0.0
    } else {
        total_payload as f64 / session.packets.len() as f64
    };

    QualityReport {
        channel_id: session.channel_id.clone(),
        packet_count: session.packet_count,
        duration,
        average_payload_size,
        packet_rate: packet_rate(session.packet_count, duration),
        gap_count: count_gaps(session.packets.iter().map(|p| p.sequence)),
    }
}

fn packet_rate(count: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Count places where a sequence number is not exactly one past its
/// predecessor. A 16-bit wrap (65535 -> 0) counts as a gap.
pub fn count_gaps(sequences: impl IntoIterator<Item = u16>) -> u64 {
    let mut gaps = 0;
    let mut previous: Option<u16> = None;
    for seq in sequences {
        if let Some(prev) = previous {
            if u32::from(seq) != u32::from(prev) + 1 {
                gaps += 1;
            }
        }
        previous = Some(seq);
    }
    gaps
}
