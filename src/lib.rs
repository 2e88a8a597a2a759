/*! Decoder for airborne weather radar (ARINC 708) captures.

The radar shares its measurements as a continuous bit stream of 1600-bit
bus words. The wire format carries no timestamp, and no framing beyond a
9-bit label (three octal digits, `0o550`) at the start of every word.
Between words sits a nominal 144-bit gap, but the stream drifts and
resynchronizes, so the gap cannot be trusted.

Turning a capture of that stream into usable records takes three separate
recoveries, plus glue:

* [`frame_sync`] finds frame boundaries, expecting each label one gap past
  the previous word and falling back to a bit-by-bit hunt when the stream
  has drifted.
* [`word`] decodes one frame into a [`Record`]: undo the per-byte bit
  reversal the acquisition path introduces, then pull out the bit-packed
  fields with their reversed-subfield encodings.
* [`sizelog`] reconstructs approximate capture times. The only time source
  is a log of the capture file's size over the flight; a frame's time is
  interpolated between the two log samples that bracket its bit offset.
* [`session`] runs the three per capture file, in parallel across files,
  and merges everything into one time-ordered record sequence plus
  diagnostics.

```text
[ capture file ]               [ size log ]
       ↓                            ↓
 [ FrameSync ]                 [ SizeLog ]
       ↓ RawFrame                   |
[ word::decode ]                    |
       ↓ Record                     |
 [ Session ] ←——— correlate ————————+
       ↓
ordered (seconds, Record) stream + diagnostics
```

# Example

```
use wxrx::bits::Bits;
use wxrx::frame_sync::FrameSync;
use wxrx::word;

// One synthetic bus word followed by the nominal inter-frame gap.
let rec = word::Record {
    scan_angle: 90.0,
    tilt: -2.5,
    ..Default::default()
};
let mut capture = word::encode(&rec);
capture.extend(std::iter::repeat(0u8).take(18));

let report = FrameSync::new().scan(&Bits::from_bytes(&capture), "demo.tmp");
assert_eq!(report.frames.len(), 1);
assert!(report.resyncs.is_empty());

let decoded = word::decode(&report.frames[0]).unwrap();
assert_eq!(decoded.scan_angle, 90.0);
assert_eq!(decoded.tilt, -2.5);
```

Scope ends at the decoded record stream. Persisting records to an array
format, plotting, and geolocating the reflectivity bins are all jobs for
the caller.
 */

pub mod bits;
pub mod frame_sync;
pub mod session;
pub mod sizelog;
pub mod word;

pub use frame_sync::{FrameSync, RawFrame, ResyncEvent, SyncReport};
pub use session::{Diagnostics, FileDecode, FileDiagnostics, Session, SessionReport, TimedRecord};
pub use sizelog::{LogSample, SENTINEL_SECONDS, SizeLog};
pub use word::{FrameInvalid, OperatingMode, Record};

/// Bits in one bus word.
pub const FRAME_BITS: usize = 1600;

/// Nominal bits from one frame start to the next (frame plus gap).
pub const PERIOD_BITS: usize = 1744;

/// Nominal inter-frame gap, in bits.
pub const GAP_BITS: usize = PERIOD_BITS - FRAME_BITS;

/// Width of the sync label, in bits.
pub const LABEL_BITS: usize = 9;

/// The sync label: three octal digits, read MSB first from the raw
/// (pre byte-reversal) bit order.
pub const LABEL: u16 = 0o550;

/// Nominal bus word rate. Only good enough for coverage estimates.
pub const WORDS_PER_SECOND: f64 = 190.0;

/// Errors that abort a whole session.
///
/// Per-frame and per-sample conditions are not errors. They degrade to
/// skipped frames and sentinel timestamps, reported through
/// [`session::Diagnostics`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The size log has no readable `Logging started:` line. Without it no
    /// capture time can be reconstructed for the session.
    #[error("size log is missing the 'Logging started:' line")]
    MissingBaseTime,

    /// The base time on the `Logging started:` line did not parse.
    #[error("size log base time unparsable: {0}")]
    BadBaseTime(String),

    /// Reading a capture or log file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
