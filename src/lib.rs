//! # EEProbe Reader for Rust
//!
//! A pure Rust library for reading EEProbe (`.cnt`) EEG recordings, the
//! RIFF/RF64 based format written by eego and ASA acquisition software.
//! It decodes the recording header, the channel table, the segment table
//! and the event library, and merges events and segment boundaries into a
//! single onset-sorted timeline.
//!
//! A recording is made of up to three files sharing a base name:
//!
//! * `name.cnt` - RIFF container with the header text chunks (`eeph`,
//!   `info`) and the compressed sample stream (`raw3`)
//! * `name.evt` - binary event library (markers, epochs, impedances, video)
//! * `name.seg` - optional text list of acquisition segments
//!
//! ## Quick Start
//!
//! ```rust
//! use eepread::{EepReader, TimelineKind, Result};
//! # use eepread::doctest_utils::simple_recording;
//!
//! fn main() -> Result<()> {
//!     # let dir = tempfile::tempdir().unwrap();
//!     # let path = dir.path().join("subject01.cnt");
//!     # let files = simple_recording(1_600_000_000.0);
//!     # std::fs::write(&path, &files.cnt)?;
//!     # std::fs::write(path.with_extension("evt"), &files.evt)?;
//!     let reader = EepReader::open(&path)?;
//!
//!     let header = reader.header();
//!     println!("Sampling rate: {:?} Hz", header.sample_rate);
//!     println!("Started: {:?}", header.acquisition_datetime());
//!     for channel in &header.channels {
//!         println!("{:<6} x{} {} (ref {})",
//!             channel.label, channel.calibration, channel.unit, channel.reference);
//!     }
//!
//!     for entry in reader.timeline() {
//!         if entry.kind == TimelineKind::Marker {
//!             println!("{:.3}s sample {}: {}", entry.onset, entry.sample, entry.description);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Decoding from memory
//!
//! [`decode`] runs the same pipeline on buffers that are already in memory,
//! and the component modules ([`riff`], [`header`], [`segments`],
//! [`events`], [`timeline`], [`raw`]) can be used on their own.
//!
//! ```rust
//! use eepread::{decode, ReadOptions, UnresolvedEventPolicy};
//! # use eepread::doctest_utils::simple_recording;
//!
//! # let files = simple_recording(1_600_000_000.0);
//! let options = ReadOptions::default()
//!     .with_unresolved_events(UnresolvedEventPolicy::ClampToFirst);
//! let recording = decode(&files.cnt, None, &files.evt, &options)?;
//!
//! assert_eq!(recording.segments.len(), 1);
//! assert!(recording.timeline.windows(2).all(|w| w[0].onset <= w[1].onset));
//! # Ok::<(), eepread::EepError>(())
//! ```
//!
//! ## Sample data
//!
//! The sample stream is compressed with a proprietary codec that this crate
//! does not implement. Supply one through the [`SampleCodec`] trait and call
//! [`EepReader::read_samples`] to get calibrated samples with the channel
//! order of the header.

pub mod error;
pub mod types;
pub mod utils;
pub mod riff;
pub mod header;
pub mod segments;
pub mod events;
pub mod timeline;
pub mod raw;
pub mod reader;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{EepError, Result};
pub use types::{
    ChannelRow, EepRecording, EpochDescriptor, EventInfo, EventRecord, HeaderInfo, Impedance,
    MarkerInfo, ReadOptions, Segment, TimelineEntry, TimelineKind, TypedValue,
    UnresolvedEventPolicy, VideoRef,
};
pub use raw::{DecodedBlock, SampleCodec, SampleMatrix};
pub use reader::{decode, EepReader};

// Important constants
pub const EEP_DAY_SECONDS: f64 = 86_400.0;
/// Seconds between the day-count epoch (1899-12-30) and the POSIX epoch
pub const EEP_EPOCH_OFFSET: f64 = 2_209_161_600.0;
/// Length-prefixed strings in event files must be shorter than this
pub const EEP_MAX_STRING_LEN: usize = 255;
pub const EEP_LIBRARY_CLASS: &str = "class dcEventsLibrary_c";

/// Library version
///
/// Returns the current version of the eepread library.
///
/// # Examples
///
/// ```rust
/// let version = eepread::version();
/// assert!(!version.is_empty());
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
