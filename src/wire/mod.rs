//! # Proxy Wire Framing
//!
//! Low-level framing used by the shipped TCP transport.
//!
//! ## Overview
//!
//! Frames are length-prefixed and carry a kind byte plus a correlation id.
//! The body is opaque at this layer; request envelopes and row batches are
//! encoded by [`crate::driver::tcp`].
//!
//! ## Submodules
//!
//! - [`frame`] - Frame kinds and error bodies
//! - [`codec`] - Tokio codec for async I/O
//! - [`error`] - Wire error types
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with frames directly.

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
pub use error::{WireError, WireResult};
pub use frame::{Frame, FrameKind};
