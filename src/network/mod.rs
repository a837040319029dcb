//! Network subsystem for RTP audio transport

pub mod receiver;
pub mod udp;

pub use receiver::{Ingest, NetworkReceiver, PacketIngest};
pub use udp::{bind_receiver, resolve};
