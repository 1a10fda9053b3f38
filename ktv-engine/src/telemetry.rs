//! Audio-frame telemetry channel
//!
//! The lead singer's pitch and score ride along with outgoing audio frames
//! in each frame's auxiliary data; every peer reads them back out of the
//! lead singer's incoming frames. Both entry points run on the real-time
//! audio thread at frame rate, so they never block, never wait on the engine
//! loop and never allocate beyond reusing the frame's buffer.
//! Remote values reach observers through a revision counter that the engine
//! loop polls, never through a channel send from the audio thread.
//!
//! **Payload layout** (32 bytes, little-endian):
//!
//! | offset | size | field                                    |
//! |--------|------|------------------------------------------|
//! | 0      | 1    | magic `0x4B`                             |
//! | 1      | 1    | version `1`                              |
//! | 2      | 1    | presence bits (pitch, score, average)    |
//! | 3      | 1    | reserved, zero                           |
//! | 4      | 4    | speaker id (`u32`)                       |
//! | 8      | 8    | pitch (`f64`)                            |
//! | 16     | 8    | current score (`f64`)                    |
//! | 24     | 8    | average score (`f64`)                    |

use arc_swap::ArcSwap;
use ktv_common::events::PlaybackState;
use ktv_common::UserId;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Encoded payload size in bytes
pub const PAYLOAD_LEN: usize = 32;

const MAGIC: u8 = 0x4B;
const VERSION: u8 = 1;

const HAS_PITCH: u8 = 0b001;
const HAS_SCORE: u8 = 0b010;
const HAS_AVERAGE: u8 = 0b100;
const KNOWN_BITS: u8 = HAS_PITCH | HAS_SCORE | HAS_AVERAGE;

/// One audio frame as exposed by the audio pipeline
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    /// Auxiliary bytes transported alongside the frame
    pub extra_data: Vec<u8>,
}

/// Why a received payload was rejected
#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload is {0} bytes, expected 32")]
    Length(usize),
    #[error("bad magic byte {0:#04x}")]
    Magic(u8),
    #[error("unsupported payload version {0}")]
    Version(u8),
    #[error("unknown presence bits {0:#010b}")]
    Flags(u8),
    #[error("non-finite value in payload")]
    NonFinite,
}

/// Fixed-layout telemetry record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryPayload {
    pub speaker_id: UserId,
    pub pitch: Option<f64>,
    pub score: Option<f64>,
    pub average_score: Option<f64>,
}

impl TelemetryPayload {
    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        let mut flags = 0u8;
        out[0] = MAGIC;
        out[1] = VERSION;
        out[4..8].copy_from_slice(&self.speaker_id.to_le_bytes());
        if let Some(pitch) = self.pitch {
            flags |= HAS_PITCH;
            out[8..16].copy_from_slice(&pitch.to_le_bytes());
        }
        if let Some(score) = self.score {
            flags |= HAS_SCORE;
            out[16..24].copy_from_slice(&score.to_le_bytes());
        }
        if let Some(average) = self.average_score {
            flags |= HAS_AVERAGE;
            out[24..32].copy_from_slice(&average.to_le_bytes());
        }
        out[2] = flags;
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let bytes: &[u8; PAYLOAD_LEN] = bytes
            .try_into()
            .map_err(|_| PayloadError::Length(bytes.len()))?;
        if bytes[0] != MAGIC {
            return Err(PayloadError::Magic(bytes[0]));
        }
        if bytes[1] != VERSION {
            return Err(PayloadError::Version(bytes[1]));
        }
        let flags = bytes[2];
        if flags & !KNOWN_BITS != 0 {
            return Err(PayloadError::Flags(flags));
        }

        let field = |bit: u8, offset: usize| -> Result<Option<f64>, PayloadError> {
            if flags & bit == 0 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[offset..offset + 8]);
            let value = f64::from_le_bytes(raw);
            if value.is_finite() {
                Ok(Some(value))
            } else {
                Err(PayloadError::NonFinite)
            }
        };

        Ok(Self {
            speaker_id: UserId::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            pitch: field(HAS_PITCH, 8)?,
            score: field(HAS_SCORE, 16)?,
            average_score: field(HAS_AVERAGE, 24)?,
        })
    }
}

/// Read-only view of engine state for the audio thread
///
/// The engine republishes a fresh snapshot whenever any field changes; the
/// audio thread only ever loads it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryContext {
    /// False before the engine starts and after teardown
    pub attached: bool,
    pub local_user: UserId,
    pub owner_id: UserId,
    pub state: PlaybackState,
    pub pitch: Option<f64>,
    pub score: Option<f64>,
    pub average_score: Option<f64>,
}

impl TelemetryContext {
    pub fn is_lead_singer(&self) -> bool {
        self.attached && self.local_user == self.owner_id
    }
}

pub type SharedTelemetry = Arc<ArcSwap<TelemetryContext>>;

/// Stamps the lead singer's telemetry onto locally processed frames
///
/// A changed payload is written to the next `retransmit_frames` frames and
/// then no more until it changes again.
pub struct OutgoingTelemetry {
    context: SharedTelemetry,
    retransmit_frames: u32,
    last_sent: Option<[u8; PAYLOAD_LEN]>,
    remaining: u32,
}

impl OutgoingTelemetry {
    pub fn new(context: SharedTelemetry, retransmit_frames: u32) -> Self {
        Self {
            context,
            retransmit_frames,
            last_sent: None,
            remaining: 0,
        }
    }

    /// Called once per locally captured/processed frame
    pub fn process_local_frame(&mut self, frame: &mut AudioFrame) {
        let ctx = self.context.load();
        if !ctx.is_lead_singer() || !ctx.state.is_playing() {
            self.last_sent = None;
            self.remaining = 0;
            return;
        }

        let encoded = TelemetryPayload {
            speaker_id: ctx.local_user,
            pitch: ctx.pitch,
            score: ctx.score,
            average_score: ctx.average_score,
        }
        .encode();

        if self.last_sent != Some(encoded) {
            self.last_sent = Some(encoded);
            self.remaining = self.retransmit_frames;
        }

        if self.remaining > 0 {
            frame.extra_data.clear();
            frame.extra_data.extend_from_slice(&encoded);
            self.remaining -= 1;
        }
    }

    /// Frames still to be stamped with the current payload
    pub fn pending_frames(&self) -> u32 {
        self.remaining
    }
}

const NONE_BITS: u64 = u64::MAX;

/// Remote lead singer's pitch and score as perceived by this peer
///
/// Written only by [`IncomingTelemetry`] on the audio thread; read lock-free
/// by anyone. `revision` moves after every change, so readers poll it
/// instead of being notified.
#[derive(Debug)]
pub struct RemoteSingerState {
    speaker_id: AtomicU32,
    pitch: AtomicU64,
    score: AtomicU64,
    average_score: AtomicU64,
    revision: AtomicU64,
}

impl Default for RemoteSingerState {
    fn default() -> Self {
        Self {
            speaker_id: AtomicU32::new(0),
            pitch: AtomicU64::new(NONE_BITS),
            score: AtomicU64::new(NONE_BITS),
            average_score: AtomicU64::new(NONE_BITS),
            revision: AtomicU64::new(0),
        }
    }
}

fn load_f64(slot: &AtomicU64) -> Option<f64> {
    match slot.load(Ordering::Acquire) {
        NONE_BITS => None,
        bits => Some(f64::from_bits(bits)),
    }
}

impl RemoteSingerState {
    pub fn speaker_id(&self) -> UserId {
        self.speaker_id.load(Ordering::Acquire)
    }

    pub fn pitch(&self) -> Option<f64> {
        load_f64(&self.pitch)
    }

    pub fn score(&self) -> Option<f64> {
        load_f64(&self.score)
    }

    pub fn average_score(&self) -> Option<f64> {
        load_f64(&self.average_score)
    }

    /// Bumped once per frame that changed any value
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.speaker_id.store(0, Ordering::Release);
        self.pitch.store(NONE_BITS, Ordering::Release);
        self.score.store(NONE_BITS, Ordering::Release);
        self.average_score.store(NONE_BITS, Ordering::Release);
        self.bump();
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

/// Last remote values turned into events
///
/// Polled from the engine side; intermediate values written between two
/// polls are coalesced into the latest one.
#[derive(Debug, Default)]
pub struct RemoteChangeTracker {
    revision: u64,
    pitch: Option<f64>,
    score: Option<(f64, f64)>,
}

/// What changed since the previous poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteChange {
    Pitch { speaker_id: UserId, pitch: f64 },
    Score { speaker_id: UserId, score: f64, average_score: f64 },
}

impl RemoteChangeTracker {
    pub fn poll(&mut self, remote: &RemoteSingerState) -> Vec<RemoteChange> {
        let revision = remote.revision();
        if revision == self.revision {
            return Vec::new();
        }
        self.revision = revision;

        let speaker_id = remote.speaker_id();
        let mut changes = Vec::new();
        let pitch = remote.pitch();
        if pitch != self.pitch {
            self.pitch = pitch;
            if let Some(pitch) = pitch {
                changes.push(RemoteChange::Pitch { speaker_id, pitch });
            }
        }
        let score = remote
            .score()
            .map(|score| (score, remote.average_score().unwrap_or(0.0)));
        if score != self.score {
            self.score = score;
            if let Some((score, average_score)) = score {
                changes.push(RemoteChange::Score {
                    speaker_id,
                    score,
                    average_score,
                });
            }
        }
        changes
    }
}

/// Reads the lead singer's telemetry out of remote frames
pub struct IncomingTelemetry {
    context: SharedTelemetry,
    remote: Arc<RemoteSingerState>,
    last_pitch: Option<f64>,
    last_score: Option<(f64, f64)>,
}

impl IncomingTelemetry {
    pub fn new(context: SharedTelemetry, remote: Arc<RemoteSingerState>) -> Self {
        Self {
            context,
            remote,
            last_pitch: None,
            last_score: None,
        }
    }

    /// Called once per frame received from a remote peer
    ///
    /// Only payloads declaring the room owner as speaker are trusted.
    /// Malformed payloads are dropped without any visible effect.
    pub fn process_remote_frame(&mut self, frame: &AudioFrame) {
        if frame.extra_data.is_empty() {
            return;
        }
        let ctx = self.context.load();
        if !ctx.attached {
            return;
        }

        let payload = match TelemetryPayload::decode(&frame.extra_data) {
            Ok(payload) => payload,
            Err(e) => {
                trace!("Dropping telemetry payload: {}", e);
                return;
            }
        };
        if payload.speaker_id != ctx.owner_id {
            return;
        }
        self.remote.speaker_id.store(payload.speaker_id, Ordering::Release);
        let mut changed = false;

        if let Some(pitch) = payload.pitch {
            if self.last_pitch != Some(pitch) {
                self.last_pitch = Some(pitch);
                self.remote.pitch.store(pitch.to_bits(), Ordering::Release);
                changed = true;
            }
        }

        if let Some(score) = payload.score {
            let average = payload
                .average_score
                .or(self.last_score.map(|(_, avg)| avg))
                .unwrap_or(0.0);
            if self.last_score != Some((score, average)) {
                self.last_score = Some((score, average));
                self.remote.score.store(score.to_bits(), Ordering::Release);
                self.remote.average_score.store(average.to_bits(), Ordering::Release);
                changed = true;
            }
        }

        if changed {
            self.remote.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = 1001;

    fn shared(ctx: TelemetryContext) -> SharedTelemetry {
        Arc::new(ArcSwap::from_pointee(ctx))
    }

    fn lead_context(pitch: Option<f64>) -> TelemetryContext {
        TelemetryContext {
            attached: true,
            local_user: OWNER,
            owner_id: OWNER,
            state: PlaybackState::Start,
            pitch,
            score: Some(-1.0),
            average_score: Some(0.0),
        }
    }

    fn audience_context() -> TelemetryContext {
        TelemetryContext {
            attached: true,
            local_user: 2002,
            owner_id: OWNER,
            state: PlaybackState::Idle,
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_decode_rejects_malformed() {
        let good = TelemetryPayload {
            speaker_id: OWNER,
            pitch: Some(220.0),
            score: None,
            average_score: None,
        }
        .encode();

        assert_eq!(
            TelemetryPayload::decode(&good[..10]),
            Err(PayloadError::Length(10))
        );

        let mut bad_magic = good;
        bad_magic[0] = b'{';
        assert_eq!(TelemetryPayload::decode(&bad_magic), Err(PayloadError::Magic(b'{')));

        let mut bad_flags = good;
        bad_flags[2] = 0b1000;
        assert!(matches!(TelemetryPayload::decode(&bad_flags), Err(PayloadError::Flags(_))));

        let mut nan = good;
        nan[8..16].copy_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(TelemetryPayload::decode(&nan), Err(PayloadError::NonFinite));
    }

    #[test]
    fn test_absent_fields_decode_as_none() {
        let payload = TelemetryPayload {
            speaker_id: 7,
            pitch: None,
            score: Some(-1.0),
            average_score: Some(0.0),
        };
        let decoded = TelemetryPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_changed_payload_stamped_for_bounded_window() {
        let context = shared(lead_context(Some(200.0)));
        let mut outgoing = OutgoingTelemetry::new(Arc::clone(&context), 5);

        // Initial payload goes out for 5 frames, then the channel falls quiet
        let mut stamped_initial = 0;
        for _ in 0..12 {
            let mut frame = AudioFrame::default();
            outgoing.process_local_frame(&mut frame);
            if !frame.extra_data.is_empty() {
                stamped_initial += 1;
            }
        }
        assert_eq!(stamped_initial, 5);

        let changed = lead_context(Some(240.0));
        let expected = TelemetryPayload {
            speaker_id: OWNER,
            pitch: Some(240.0),
            score: Some(-1.0),
            average_score: Some(0.0),
        }
        .encode();
        context.store(Arc::new(changed));

        let mut carrying_new = 0;
        for _ in 0..20 {
            let mut frame = AudioFrame::default();
            outgoing.process_local_frame(&mut frame);
            if frame.extra_data == expected {
                carrying_new += 1;
            } else {
                assert!(frame.extra_data.is_empty());
            }
        }
        assert_eq!(carrying_new, 5);
        assert_eq!(outgoing.pending_frames(), 0);
    }

    #[test]
    fn test_frames_before_change_never_carry_new_payload() {
        let context = shared(lead_context(Some(100.0)));
        let mut outgoing = OutgoingTelemetry::new(Arc::clone(&context), 5);
        let future = TelemetryPayload {
            speaker_id: OWNER,
            pitch: Some(101.0),
            score: Some(-1.0),
            average_score: Some(0.0),
        }
        .encode();

        for _ in 0..8 {
            let mut frame = AudioFrame::default();
            outgoing.process_local_frame(&mut frame);
            assert_ne!(frame.extra_data, future);
        }
    }

    #[test]
    fn test_not_playing_clears_pending_and_leaves_frame_untouched() {
        let context = shared(lead_context(Some(100.0)));
        let mut outgoing = OutgoingTelemetry::new(Arc::clone(&context), 5);

        let mut frame = AudioFrame::default();
        outgoing.process_local_frame(&mut frame);
        assert_eq!(outgoing.pending_frames(), 4);

        let mut paused = lead_context(Some(100.0));
        paused.state = PlaybackState::Pause;
        context.store(Arc::new(paused));

        let mut frame = AudioFrame {
            extra_data: vec![9, 9, 9],
        };
        outgoing.process_local_frame(&mut frame);
        assert_eq!(frame.extra_data, vec![9, 9, 9]);
        assert_eq!(outgoing.pending_frames(), 0);

        // Resuming with the same values counts as a fresh change
        let mut resumed = lead_context(Some(100.0));
        resumed.state = PlaybackState::Resume;
        context.store(Arc::new(resumed));
        let mut frame = AudioFrame::default();
        outgoing.process_local_frame(&mut frame);
        assert_eq!(frame.extra_data.len(), PAYLOAD_LEN);
    }

    #[test]
    fn test_audience_never_stamps() {
        let mut ctx = audience_context();
        ctx.state = PlaybackState::Start;
        let mut outgoing = OutgoingTelemetry::new(shared(ctx), 5);
        let mut frame = AudioFrame::default();
        outgoing.process_local_frame(&mut frame);
        assert!(frame.extra_data.is_empty());
    }

    #[test]
    fn test_incoming_updates_only_on_change() {
        let remote = Arc::new(RemoteSingerState::default());
        let mut tracker = RemoteChangeTracker::default();
        let mut incoming = IncomingTelemetry::new(shared(audience_context()), Arc::clone(&remote));

        let frame = AudioFrame {
            extra_data: TelemetryPayload {
                speaker_id: OWNER,
                pitch: Some(330.0),
                score: Some(80.0),
                average_score: Some(75.0),
            }
            .encode()
            .to_vec(),
        };
        incoming.process_remote_frame(&frame);
        incoming.process_remote_frame(&frame);
        incoming.process_remote_frame(&frame);

        assert_eq!(remote.pitch(), Some(330.0));
        assert_eq!(remote.score(), Some(80.0));
        assert_eq!(remote.average_score(), Some(75.0));
        assert_eq!(remote.speaker_id(), OWNER);
        assert_eq!(remote.revision(), 1, "duplicate frames must not bump");

        assert_eq!(
            tracker.poll(&remote),
            vec![
                RemoteChange::Pitch {
                    speaker_id: OWNER,
                    pitch: 330.0
                },
                RemoteChange::Score {
                    speaker_id: OWNER,
                    score: 80.0,
                    average_score: 75.0
                },
            ]
        );
        assert!(tracker.poll(&remote).is_empty());
    }

    #[test]
    fn test_tracker_coalesces_changes_between_polls() {
        let remote = Arc::new(RemoteSingerState::default());
        let mut tracker = RemoteChangeTracker::default();
        let mut incoming = IncomingTelemetry::new(shared(audience_context()), Arc::clone(&remote));

        for score in [10.0, 20.0, 30.0] {
            incoming.process_remote_frame(&AudioFrame {
                extra_data: TelemetryPayload {
                    speaker_id: OWNER,
                    pitch: None,
                    score: Some(score),
                    average_score: Some(score / 2.0),
                }
                .encode()
                .to_vec(),
            });
        }
        assert_eq!(remote.revision(), 3);
        assert_eq!(
            tracker.poll(&remote),
            vec![RemoteChange::Score {
                speaker_id: OWNER,
                score: 30.0,
                average_score: 15.0
            }]
        );

        // A reset forgets the values without reporting anything
        remote.reset();
        assert!(tracker.poll(&remote).is_empty());
    }

    #[test]
    fn test_incoming_ignores_non_owner_and_garbage() {
        let remote = Arc::new(RemoteSingerState::default());
        let mut incoming = IncomingTelemetry::new(shared(audience_context()), Arc::clone(&remote));

        let impostor = AudioFrame {
            extra_data: TelemetryPayload {
                speaker_id: 4242,
                pitch: Some(500.0),
                score: Some(99.0),
                average_score: Some(99.0),
            }
            .encode()
            .to_vec(),
        };
        incoming.process_remote_frame(&impostor);
        incoming.process_remote_frame(&AudioFrame {
            extra_data: br#"{"uid":1001,"pitch":12}"#.to_vec(),
        });
        incoming.process_remote_frame(&AudioFrame::default());

        assert_eq!(remote.pitch(), None);
        assert_eq!(remote.score(), None);
    }

    #[test]
    fn test_detached_context_ignores_frames() {
        let remote = Arc::new(RemoteSingerState::default());
        let mut incoming =
            IncomingTelemetry::new(shared(TelemetryContext::default()), Arc::clone(&remote));
        let frame = AudioFrame {
            extra_data: TelemetryPayload {
                speaker_id: 0,
                pitch: Some(1.0),
                score: None,
                average_score: None,
            }
            .encode()
            .to_vec(),
        };
        incoming.process_remote_frame(&frame);
        assert_eq!(remote.pitch(), None);
    }
}
