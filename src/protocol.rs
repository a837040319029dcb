//! RTP/L16 wire format
//!
//! Datagrams carry an RTP header (RFC 3550) followed by interleaved signed
//! 16-bit big-endian PCM samples, the format emitted by PulseAudio's
//! `module-rtp-send`:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            CSRC list (CC x 32 bits), optional extension       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        L16 samples, big-endian, channel-interleaved           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut};

use crate::constants::SAMPLE_SIZE;
use crate::error::PacketError;

/// Fixed RTP header length
pub const RTP_HEADER_LEN: usize = 12;

/// Fixed header plus a full CSRC list
pub const RTP_MAX_HEADER_LEN: usize = RTP_HEADER_LEN + 15 * 4;

pub const RTP_VERSION: u8 = 2;

/// Dynamic payload type PulseAudio uses for L16 at 48kHz
pub const DEFAULT_PAYLOAD_TYPE: u8 = 127;

/// Forward sequence jump treated as a sender restart rather than loss
const MAX_DROPOUT: i64 = 3000;

/// Backward sequence jump treated as a sender restart rather than reordering
const MAX_MISORDER: i64 = 100;

/// Parsed RTP fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Plain header with no padding, extension or CSRCs
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Append the 12-byte fixed header. CSRCs and extensions are not written.
    pub fn write(&self, out: &mut impl BufMut) {
        let b0 = (RTP_VERSION << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc_count & 0x0f);
        let b1 = (u8::from(self.marker) << 7) | (self.payload_type & 0x7f);
        out.put_u8(b0);
        out.put_u8(b1);
        out.put_u16(self.sequence);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
    }
}

/// A datagram split into header and payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram, skipping CSRCs and the header extension and
    /// stripping padding. Does not look at the payload contents.
    pub fn parse(datagram: &'a [u8]) -> Result<Self, PacketError> {
        if datagram.len() < RTP_HEADER_LEN {
            return Err(PacketError::Truncated(datagram.len()));
        }

        let mut buf = datagram;
        let b0 = buf.get_u8();
        let b1 = buf.get_u8();

        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::BadVersion(version));
        }

        let header = RtpHeader {
            padding: b0 & 0x20 != 0,
            extension: b0 & 0x10 != 0,
            csrc_count: b0 & 0x0f,
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7f,
            sequence: buf.get_u16(),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        };

        let csrc_len = header.csrc_count as usize * 4;
        if buf.remaining() < csrc_len {
            return Err(PacketError::Truncated(datagram.len()));
        }
        buf.advance(csrc_len);

        if header.extension {
            if buf.remaining() < 4 {
                return Err(PacketError::Truncated(datagram.len()));
            }
            let _profile = buf.get_u16();
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                return Err(PacketError::Truncated(datagram.len()));
            }
            buf.advance(words * 4);
        }

        let mut payload = buf;
        if header.padding {
            let pad = *payload.last().ok_or(PacketError::EmptyPayload)?;
            if pad == 0 || pad as usize > payload.len() {
                return Err(PacketError::BadPadding(pad));
            }
            payload = &payload[..payload.len() - pad as usize];
        }

        Ok(Self { header, payload })
    }
}

/// Check that `payload` holds at least one whole `channels`-channel L16
/// frame and nothing else. Returns the frame count.
pub fn check_l16_payload(payload: &[u8], channels: u16) -> Result<usize, PacketError> {
    let frame_bytes = channels as usize * SAMPLE_SIZE;
    if payload.is_empty() {
        return Err(PacketError::EmptyPayload);
    }
    if frame_bytes == 0 || payload.len() % frame_bytes != 0 {
        return Err(PacketError::PartialFrame {
            len: payload.len(),
            frame_bytes,
        });
    }
    Ok(payload.len() / frame_bytes)
}

/// Append big-endian samples from `payload` to `out`
pub fn decode_l16(mut payload: &[u8], out: &mut Vec<i16>) {
    out.reserve(payload.len() / SAMPLE_SIZE);
    while payload.remaining() >= SAMPLE_SIZE {
        out.push(payload.get_i16());
    }
}

/// Append samples to `out` as big-endian bytes
pub fn encode_l16(samples: &[i16], out: &mut impl BufMut) {
    for &s in samples {
        out.put_i16(s);
    }
}

/// What a sequence number says about delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    /// First packet seen, or the stream restarted
    Sync,
    /// Exactly the next expected packet
    InOrder,
    /// Arrived after skipping this many packets
    Gap(u64),
    /// Older than or equal to the highest seen: reordered or duplicated
    Late,
}

/// Extends 16-bit RTP sequence numbers to a monotonic 64-bit counter and
/// classifies each arrival. Diagnostic only: frames are never reordered.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    highest: Option<u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest extended sequence number seen so far
    pub fn highest(&self) -> Option<u64> {
        self.highest
    }

    /// Returns the extended sequence number and the delivery event
    pub fn observe(&mut self, sequence: u16) -> (u64, SequenceEvent) {
        let Some(highest) = self.highest else {
            return self.resync(sequence);
        };

        // Pick the rollover cycle that puts `sequence` closest to `highest`
        let cycle = highest & !0xffff;
        let candidate = (cycle | sequence as u64) as i64;
        let h = highest as i64;
        let extended = [candidate - 0x1_0000, candidate, candidate + 0x1_0000]
            .into_iter()
            .filter(|&c| c >= 0)
            .min_by_key(|&c| (c - h).abs())
            .unwrap_or(candidate);
        let delta = extended - h;

        if delta > MAX_DROPOUT || delta < -MAX_MISORDER {
            return self.resync(sequence);
        }

        let extended = extended as u64;
        if delta <= 0 {
            return (extended, SequenceEvent::Late);
        }

        self.highest = Some(extended);
        if delta == 1 {
            (extended, SequenceEvent::InOrder)
        } else {
            (extended, SequenceEvent::Gap(delta as u64 - 1))
        }
    }

    fn resync(&mut self, sequence: u16) -> (u64, SequenceEvent) {
        // Start a fresh rollover cycle so extended numbers stay monotonic
        let base = match self.highest {
            Some(h) => (h & !0xffff) + 0x1_0000,
            None => 0,
        };
        let extended = base | sequence as u64;
        self.highest = Some(extended);
        (extended, SequenceEvent::Sync)
    }
}
