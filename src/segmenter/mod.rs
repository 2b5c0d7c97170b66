//! Stream segmentation
//!
//! Matches the media byte feed against the boundary feed and extracts the
//! initialization segment.
//!
//! # Data flow
//!
//! ```text
//!   media bytes ──► Correlator::add_media ─┐
//!                                          ├──► [Data, NewSegment, ...]
//!   boundaries ───► Correlator::add_info ──┘            │
//!                                                       ├──► InitCapture::observe ──► InitSegment
//!                                                       └──► Multiplexer::dispatch ──► consumers
//! ```
//!
//! Notifications are returned as ordered `Vec`s rather than emitted to
//! listeners; the caller hands each one to the capture first, then to the
//! multiplexer.

pub mod correlator;
pub mod error;
pub mod init;

pub use correlator::{Correlator, CorrelatorEvent};
pub use error::{CaptureError, SequencingError};
pub use init::{InitCapture, InitSegment};
