//! Media socket server
//!
//! Bridges per-call duplex PCM audio between the switch and the AI layer.
//! The switch opens one TCP connection per bridged call and speaks a small
//! binary protocol: `[type u8][length u16 BE][payload]`.
//!
//! Audio is 16 kHz, 16-bit signed little-endian, mono.

mod frame;
mod server;
mod session;


pub use frame::{parse_call_id, Frame, FrameCodec, FrameType, HEADER_LEN, MAX_PAYLOAD};
pub use server::{MediaSocketServer, SessionRegistry};
pub use session::{MediaSession, SessionEvent, AUDIO_CHUNK_BYTES};

use thiserror::Error;

/// Media socket errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("A session for call {0} already exists")]
    DuplicateSession(String),

    #[error("Payload of {0} bytes does not fit in one frame")]
    PayloadTooLarge(usize),

    #[error("Session {0} is closed")]
    Closed(String),

    #[error("Events of session {0} already have a consumer")]
    EventsTaken(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
