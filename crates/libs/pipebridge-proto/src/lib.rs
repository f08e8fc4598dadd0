//! Wire protocol for the pipebridge DCC relay.
//!
//! A relay and its peer process exchange JSON message envelopes over a local
//! channel — either a TCP socket (length-prefix framed) or a hosted pub/sub
//! event hub. This crate defines the wire-level pieces shared by both:
//!
//! - [`Envelope`] — the `{id, topic, data, source, in_reply_to_event}`
//!   message unit, with UUID ids and reply correlation
//! - [`topics`] — the fixed dot-namespaced topic constants
//! - [`frame`] — 4-byte big-endian length-prefixed stream framing with an
//!   accumulator for partial socket reads
//!
//! Behavior (dispatch, RPC, session handshake) lives in `pipebridge-relay`.

pub mod envelope;
pub mod error;
pub mod frame;
pub mod topics;

pub use envelope::{Envelope, SESSION_ID_FIELD};
pub use error::ProtoError;
pub use frame::{encode_frame, FrameReader, MAX_FRAME_LEN};
