//! # Filament Monitor Core Library
//!
//! This library keeps a small JSON document describing a filament spool on an
//! NTAG215 tag glued to the spool flange, and turns the noisy "tag seen / tag not
//! seen" signal of a fixed NFC reader into one consumption step per spool
//! revolution.
//!
//! ## Design Philosophy
//!
//! ### Hardware at the edges
//! Everything that talks to a transceiver or a display is a trait
//! ([`tag_store::PageIo`], [`tag_store::TagReader`], [`display::SegmentDisplay`]).
//! The codec, the physics and both state machines are plain Rust and are tested
//! against the in-memory [`tag_image::TagImage`].
//!
//! ### Tag layout
//! NTAG215 exposes 135 pages of 4 bytes. Pages 0-3 hold the UID, lock bytes and
//! capability container; pages [`START_PAGE`]..=[`MAX_PAGE`] are user memory and
//! carry a single NDEF Text record wrapped in a TLV container:
//!
//! ```text
//! 0x03 [len | 0xFF len_hi len_lo] [record] 0xFE 0x00..   (padded to 4 bytes)
//! ```
//!
//! ### Data Flow
//! 1. **Scan**: the reader reports a UID (or nothing) once per loop iteration
//! 2. **Track**: [`tracker::ConsumptionTracker`] loads the spool on first sight and
//!    charges one revolution per confirmed absence
//! 3. **Persist**: the decremented document is written straight back to the tag
//! 4. **Show**: [`display::DisplayCycler`] rotates type / grams / metres on a
//!    four-digit display
//!
//! ## Core Types
//! - [`Uid`]: identifier reported by the reader for the tag in the field
//! - [`tag_store::TagPayload`]: the JSON mapping stored on the tag
//! - [`spool::SpoolState`]: validated document plus derived geometry

pub mod config;
pub mod display;
pub mod monitor;
pub mod ndef;
pub mod spool;
pub mod tag_image;
pub mod tag_store;
pub mod tracker;

/// Bytes per NTAG page.
pub const PAGE_SIZE: usize = 4;

/// First user-writable page on NTAG21x tags.
pub const START_PAGE: u16 = 4;

/// Last user-writable page on NTAG215 (inclusive).
pub const MAX_PAGE: u16 = 134;

/// Tag identifier as reported by the reader (4, 7 or 10 bytes for ISO 14443-A).
///
/// # Example
/// ```
/// use filament_monitor_lib::Uid;
///
/// let uid = Uid::new(vec![0x04, 0xA2, 0x3B, 0x11]);
/// assert_eq!(uid.to_string(), "04:A2:3B:11");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uid(Vec<u8>);

impl Uid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

pub use spool::{normalise, Document, SpoolState, ValidationError};
pub use tag_store::{read_document, write_document, StoreError, TagPayload};
pub use tracker::{ConsumptionTracker, TrackerEvent};
