//! Network receiver
//!
//! Owns the inbound socket on a dedicated thread. Every datagram is
//! validated, decoded, channel-selected and written straight into the
//! jitter buffer's tail slot. Frames go in arrival order; sequence numbers
//! are only tracked for loss and reordering statistics.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::RingProducer;
use crate::audio::channel::ChannelSelector;
use crate::error::{NetworkError, PacketError};
use crate::protocol::{
    check_l16_payload, decode_l16, RtpPacket, SequenceEvent, SequenceTracker, RTP_MAX_HEADER_LEN,
};
use crate::telemetry::EngineTelemetry;

/// Minimum spacing between drop summaries in the log
const DROP_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Pause after an unexpected socket error before retrying
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Result of ingesting one valid datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Enqueued,
    /// Valid, but the jitter buffer was full
    Dropped,
}

/// Datagram-to-buffer pipeline, independent of the socket
pub struct PacketIngest {
    producer: RingProducer,
    telemetry: Arc<EngineTelemetry>,
    selector: ChannelSelector,
    mtu: usize,
    sequence: SequenceTracker,
    /// Decoded samples before channel selection
    scratch: Vec<i16>,
}

impl PacketIngest {
    pub fn new(
        producer: RingProducer,
        selector: ChannelSelector,
        mtu: usize,
        telemetry: Arc<EngineTelemetry>,
    ) -> Self {
        Self {
            producer,
            telemetry,
            selector,
            mtu,
            sequence: SequenceTracker::new(),
            scratch: Vec::with_capacity(mtu / 2),
        }
    }

    /// Largest datagram accepted: full header, full payload
    pub fn max_datagram(&self) -> usize {
        RTP_MAX_HEADER_LEN + self.mtu
    }

    /// Validate one datagram and enqueue its audio.
    ///
    /// Malformed datagrams are counted as invalid and returned as errors;
    /// valid ones are counted as received whether or not they fit.
    pub fn ingest(&mut self, datagram: &[u8]) -> Result<Ingest, PacketError> {
        let result = self.ingest_inner(datagram);
        if result.is_err() {
            self.telemetry.record_invalid();
        }
        result
    }

    fn ingest_inner(&mut self, datagram: &[u8]) -> Result<Ingest, PacketError> {
        let max = self.max_datagram();
        if datagram.len() > max {
            return Err(PacketError::Oversized {
                len: datagram.len(),
                max,
            });
        }

        let packet = RtpPacket::parse(datagram)?;
        if packet.payload.len() > self.mtu {
            return Err(PacketError::Oversized {
                len: packet.payload.len(),
                max: self.mtu,
            });
        }
        check_l16_payload(packet.payload, self.selector.input_channels())?;

        self.telemetry.record_packet();
        let (sequence, event) = self.sequence.observe(packet.header.sequence);
        match event {
            SequenceEvent::Gap(lost) => self.telemetry.record_lost(lost),
            SequenceEvent::Late => self.telemetry.record_reordered(),
            SequenceEvent::Sync | SequenceEvent::InOrder => {}
        }

        let selector = &self.selector;
        let timestamp = packet.header.timestamp;
        let payload = packet.payload;

        let accepted = if selector.is_passthrough() {
            self.producer.try_enqueue_with(|slot| {
                slot.samples.clear();
                decode_l16(payload, &mut slot.samples);
                slot.channels = selector.output_channels();
                slot.timestamp = timestamp;
                slot.sequence = sequence;
            })
        } else {
            self.scratch.clear();
            decode_l16(payload, &mut self.scratch);
            let scratch = &self.scratch;
            self.producer.try_enqueue_with(|slot| {
                slot.samples.clear();
                selector.select_into(scratch, &mut slot.samples);
                slot.channels = selector.output_channels();
                slot.timestamp = timestamp;
                slot.sequence = sequence;
            })
        };

        Ok(if accepted { Ingest::Enqueued } else { Ingest::Dropped })
    }
}

/// Rate-limited drop accounting for the log
struct DropLog {
    overflows: u64,
    invalid: u64,
    last_error: Option<PacketError>,
    since: Instant,
}

impl DropLog {
    fn new() -> Self {
        Self {
            overflows: 0,
            invalid: 0,
            last_error: None,
            since: Instant::now(),
        }
    }

    fn flush_if_due(&mut self) {
        if self.since.elapsed() < DROP_LOG_INTERVAL {
            return;
        }
        if self.overflows > 0 {
            tracing::debug!("Jitter buffer full, dropped {} packets", self.overflows);
        }
        if let Some(err) = self.last_error.take() {
            tracing::debug!("Dropped {} malformed datagrams, last: {}", self.invalid, err);
        }
        self.overflows = 0;
        self.invalid = 0;
        self.since = Instant::now();
    }
}

/// Receiver thread handle
pub struct NetworkReceiver {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl NetworkReceiver {
    /// Spawn the receive loop. The socket must already have a read timeout.
    pub fn start(socket: UdpSocket, mut ingest: PacketIngest) -> Result<Self, NetworkError> {
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("rtp-receiver".to_string())
            .spawn(move || {
                tracing::info!("Start receiving on {}", local_addr);
                // One spare byte so oversized datagrams show up as too long
                // instead of being silently truncated.
                let mut recv_buf = vec![0u8; ingest.max_datagram() + 1];
                let mut drops = DropLog::new();

                while running_for_loop.load(Ordering::Acquire) {
                    match socket.recv_from(&mut recv_buf) {
                        Ok((len, _from)) => match ingest.ingest(&recv_buf[..len]) {
                            Ok(Ingest::Enqueued) => {}
                            Ok(Ingest::Dropped) => drops.overflows += 1,
                            Err(e) => {
                                drops.invalid += 1;
                                drops.last_error = Some(e);
                            }
                        },
                        Err(e) => match e.kind() {
                            std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::Interrupted => {}
                            _ => {
                                tracing::warn!("Receive failed: {}", e);
                                thread::sleep(ERROR_BACKOFF);
                            }
                        },
                    }
                    drops.flush_if_due();
                }

                tracing::info!("Stop receiving on {}", local_addr);
            })
            .map_err(|e| NetworkError::Spawn(e.to_string()))?;

        Ok(Self {
            running,
            thread_handle: Some(handle),
            local_addr,
        })
    }

    /// Signal the loop and wait for it to exit. Returns within one socket
    /// read timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Receiver thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.running.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for NetworkReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}
