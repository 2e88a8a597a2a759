/*! Capture session orchestration.

One session is a set of capture files plus the size log recorded
alongside them. Each file gets its own synchronize → decode → correlate
pass; files are independent, so the passes are fanned out with rayon and
share nothing but the read-only [`SizeLog`]. At the end the per-file
outputs are stitched together with one stable sort by timestamp, which
keeps file order and capture order for ties.

Per-frame problems never escape a file's pass: frames with a bad label
and records the log cannot place in time are counted into the
[`Diagnostics`] and dropped. The only hard errors at this level come
from the size log itself; even an unreadable capture file just leaves a
hole in the merge.
*/
use std::path::Path;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::bits::Bits;
use crate::frame_sync::{FrameSync, ResyncEvent, SyncReport};
use crate::sizelog::{SENTINEL_SECONDS, SizeLog};
use crate::word::{self, Record};
use crate::{GAP_BITS, Result};

/// A decoded record with its reconstructed capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedRecord {
    /// Seconds since midnight of the session base date.
    pub seconds: f64,
    /// The decoded bus word.
    pub record: Record,
}

/// Scan and decode outcome for one capture file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileDiagnostics {
    /// Capture file name.
    pub file: String,
    /// Frames recovered by synchronization.
    pub frames: u64,
    /// Resynchronizations, in stream order.
    pub resyncs: Vec<ResyncEvent>,
    /// Frames whose label did not survive decoding.
    pub invalid_frames: u64,
    /// Decoded records dropped because the log could not bracket their
    /// offset.
    pub dropped_timestamps: u64,
    /// Unframed bits at the end of the capture.
    pub tail_bits: u64,
}

/// Aggregate diagnostics for a session. Nothing the scan or decode stage
/// noticed is thrown away silently; it all ends up here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// Per-file breakdown, in session file order.
    pub files: Vec<FileDiagnostics>,
    /// Capture files that could not be read at all.
    pub skipped_files: u64,
}

impl Diagnostics {
    /// Total resynchronization events.
    pub fn resync_events(&self) -> u64 {
        self.files.iter().map(|f| f.resyncs.len() as u64).sum()
    }

    /// Total frames rejected by the decoder.
    pub fn invalid_frames(&self) -> u64 {
        self.files.iter().map(|f| f.invalid_frames).sum()
    }

    /// Total records dropped for lack of a timestamp.
    pub fn dropped_timestamps(&self) -> u64 {
        self.files.iter().map(|f| f.dropped_timestamps).sum()
    }

    /// Files with an unparsable trailing fragment. One nominal gap of
    /// leftover bits is how a clean capture ends and does not count.
    pub fn tail_fragments(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| f.tail_bits > GAP_BITS as u64)
            .count() as u64
    }
}

/// Time-ordered records plus diagnostics for a whole session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// All surviving records, ordered by timestamp.
    pub records: Vec<TimedRecord>,
    /// What fell by the wayside, per file and in aggregate.
    pub diagnostics: Diagnostics,
}

/// Decode-only outcome for one capture, for sessions without a usable
/// size log.
#[derive(Debug, Clone)]
pub struct FileDecode {
    /// `(bit offset, record)` pairs in capture order.
    pub records: Vec<(u64, Record)>,
    /// Scan and decode diagnostics. `dropped_timestamps` stays 0 here.
    pub diagnostics: FileDiagnostics,
}

/// One capture session.
pub struct Session {
    log: SizeLog,
    sync: FrameSync,
}

impl Session {
    /// Session around a parsed size log.
    pub fn new(log: SizeLog) -> Self {
        Self {
            log,
            sync: FrameSync::new(),
        }
    }

    /// Process every capture file and merge the results by time.
    ///
    /// Files run in parallel. A file that cannot be read is skipped with
    /// a warning and counted; only the size log can fail a session.
    pub fn run<P: AsRef<Path> + Sync>(&self, files: &[P]) -> SessionReport {
        let outcomes: Vec<_> = files
            .par_iter()
            .map(|p| self.process_file(p.as_ref()))
            .collect();

        let mut records = Vec::new();
        let mut diagnostics = Diagnostics::default();
        for (path, outcome) in files.iter().zip(outcomes) {
            match outcome {
                Ok((recs, diag)) => {
                    records.extend(recs);
                    diagnostics.files.push(diag);
                }
                Err(e) => {
                    warn!("skipping {}: {e}", path.as_ref().display());
                    diagnostics.skipped_files += 1;
                }
            }
        }
        // Stable by construction: ties keep file order, then capture
        // order.
        records.sort_by(|a, b| a.seconds.total_cmp(&b.seconds));
        SessionReport {
            records,
            diagnostics,
        }
    }

    /// One file's full pass: synchronize, decode, correlate, filter.
    fn process_file(&self, path: &Path) -> Result<(Vec<TimedRecord>, FileDiagnostics)> {
        let (scan, name) = scan_capture(&self.sync, path)?;
        let mut diag = base_diagnostics(&name, &scan);
        let mut out = Vec::with_capacity(scan.frames.len());
        for frame in &scan.frames {
            let record = match word::decode(frame) {
                Ok(r) => r,
                Err(e) => {
                    debug!("{name}: {e}");
                    diag.invalid_frames += 1;
                    continue;
                }
            };
            let seconds = self.log.correlate(frame.offset(), frame.source());
            if seconds == SENTINEL_SECONDS {
                diag.dropped_timestamps += 1;
                continue;
            }
            out.push(TimedRecord { seconds, record });
        }
        info!(
            "{name}: {} frames (~{:.1} s), {} resyncs, {} invalid, {} without time, {} tail bits",
            diag.frames,
            scan.coverage_seconds(),
            diag.resyncs.len(),
            diag.invalid_frames,
            diag.dropped_timestamps,
            diag.tail_bits,
        );
        Ok((out, diag))
    }

    /// Synchronize and decode one capture without time correlation.
    ///
    /// The degraded mode for sessions whose size log is missing or
    /// unusable: everything except the timestamps.
    pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<FileDecode> {
        let (scan, name) = scan_capture(&FrameSync::new(), path.as_ref())?;
        let mut diagnostics = base_diagnostics(&name, &scan);
        let mut records = Vec::with_capacity(scan.frames.len());
        for frame in &scan.frames {
            match word::decode(frame) {
                Ok(r) => records.push((frame.offset(), r)),
                Err(e) => {
                    debug!("{name}: {e}");
                    diagnostics.invalid_frames += 1;
                }
            }
        }
        Ok(FileDecode {
            records,
            diagnostics,
        })
    }
}

/// Read a capture and scan it for frames. The file's bytes only live for
/// the duration of the unpack.
fn scan_capture(sync: &FrameSync, path: &Path) -> Result<(SyncReport, String)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bits = {
        let data = std::fs::read(path)?;
        Bits::from_bytes(&data)
    };
    Ok((sync.scan(&bits, &name), name))
}

fn base_diagnostics(name: &str, scan: &SyncReport) -> FileDiagnostics {
    FileDiagnostics {
        file: name.to_string(),
        frames: scan.frames.len() as u64,
        resyncs: scan.resyncs.clone(),
        invalid_frames: 0,
        dropped_timestamps: 0,
        tail_bits: scan.tail_bits,
    }
}
