/*! Capture time reconstruction from the file-size log.

The bus protocol carries no timestamp at all. During a flight a separate
logger watches the growing capture file and periodically writes
`(timestamp, file size, file name)` rows. That log is the only connection
between bit offsets and wall-clock time: a frame's capture time is
linearly interpolated between the two samples whose sizes bracket the
frame's offset.

Log format:

```text
# file size log                          <- header, ignored
Logging started: 2012-03-01 09:14:06.12  <- session base time, mandatory
2012-03-01 09:14:16, 124600, COP13B.tmp
2012-03-01 09:14:26, 249200, COP13B.tmp
# comment lines are skipped
```

All times are reported as `f64` seconds since midnight of the base date.
A missing or unparsable base-time line kills time reconstruction for the
whole session and is this crate's only hard parse error; damaged data
rows are merely dropped with a warning.
*/
use chrono::{NaiveDateTime, NaiveTime};
use log::warn;

use crate::{Error, Result};

/// Elapsed-seconds value for frames the log cannot bracket.
pub const SENTINEL_SECONDS: f64 = -9999.0;

const BASE_TIME_MARKER: &str = "Logging started:";
const BASE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const SAMPLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One size/time sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSample {
    /// Seconds since midnight of the base date.
    pub seconds: f64,
    /// Capture file size at that moment, in bits.
    pub size_bits: u64,
    /// Capture file the size refers to. One log can track several.
    pub file: String,
}

/// Parsed size log for one capture session. Loaded once, immutable, and
/// shareable read-only across per-file tasks.
#[derive(Debug, Clone)]
pub struct SizeLog {
    base: NaiveDateTime,
    samples: Vec<LogSample>,
}

impl SizeLog {
    /// Read and parse a size log file.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Parse size log text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let _header = lines.next();
        let base_line = lines.next().ok_or(Error::MissingBaseTime)?;
        let base_str = base_line
            .split(BASE_TIME_MARKER)
            .nth(1)
            .ok_or(Error::MissingBaseTime)?
            .trim();
        let base = NaiveDateTime::parse_from_str(base_str, BASE_TIME_FORMAT)
            .map_err(|e| Error::BadBaseTime(format!("{base_str:?}: {e}")))?;
        let midnight = base.date().and_time(NaiveTime::MIN);

        let mut samples = Vec::new();
        for (n, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_sample(line, midnight) {
                Some(s) => samples.push(s),
                // Lines 1 and 2 are the header and base time.
                None => warn!("size log line {}: unparsable row {line:?}", n + 3),
            }
        }
        let log = Self { base, samples };
        log.warn_non_monotonic();
        Ok(log)
    }

    /// Build a log from already-converted samples. The base time is still
    /// needed to define what "seconds" means for the session.
    pub fn from_samples(base: NaiveDateTime, samples: Vec<LogSample>) -> Self {
        let log = Self { base, samples };
        log.warn_non_monotonic();
        log
    }

    /// Session base time, from the `Logging started:` line.
    pub fn base_time(&self) -> NaiveDateTime {
        self.base
    }

    /// All samples, in log order.
    pub fn samples(&self) -> &[LogSample] {
        &self.samples
    }

    /// Capture time for a bit offset within `file`, as seconds since
    /// midnight of the base date.
    ///
    /// Interpolates between the sample with the greatest size strictly
    /// below the offset and the one with the least size strictly above
    /// it, both for `file` only. [`SENTINEL_SECONDS`] when either bound
    /// is missing; times are never extrapolated past the observed
    /// samples.
    pub fn correlate(&self, offset_bits: u64, file: &str) -> f64 {
        let mut below: Option<&LogSample> = None;
        let mut above: Option<&LogSample> = None;
        for s in self.samples.iter().filter(|s| s.file == file) {
            if s.size_bits < offset_bits && below.is_none_or(|b| s.size_bits > b.size_bits) {
                below = Some(s);
            }
            if s.size_bits > offset_bits && above.is_none_or(|a| s.size_bits < a.size_bits) {
                above = Some(s);
            }
        }
        match (below, above) {
            (Some(s1), Some(s2)) => {
                let ratio =
                    (offset_bits - s1.size_bits) as f64 / (s2.size_bits - s1.size_bits) as f64;
                s1.seconds + ratio * (s2.seconds - s1.seconds)
            }
            _ => SENTINEL_SECONDS,
        }
    }

    /// Sizes for one file should only ever grow; a logger restart or a
    /// clock jump shows up as shrinkage. Correlation still works on the
    /// nearest bracketing samples, but the caller should know.
    fn warn_non_monotonic(&self) {
        let mut checked: Vec<&str> = Vec::new();
        for s in &self.samples {
            if checked.contains(&s.file.as_str()) {
                continue;
            }
            checked.push(&s.file);
            let mut last = 0u64;
            for t in self.samples.iter().filter(|t| t.file == s.file) {
                if t.size_bits < last {
                    warn!(
                        "size log for {}: sizes are not monotonic; \
                         timestamps may be unreliable",
                        s.file
                    );
                    break;
                }
                last = t.size_bits;
            }
        }
    }
}

fn parse_sample(line: &str, midnight: NaiveDateTime) -> Option<LogSample> {
    let mut cols = line.splitn(3, ',');
    let ts = NaiveDateTime::parse_from_str(cols.next()?.trim(), SAMPLE_TIME_FORMAT).ok()?;
    let size_bytes: f64 = cols.next()?.trim().parse().ok()?;
    if !size_bytes.is_finite() || size_bytes < 0.0 {
        return None;
    }
    let file = cols.next()?.trim();
    if file.is_empty() {
        return None;
    }
    Some(LogSample {
        seconds: seconds_since(midnight, ts),
        size_bits: (size_bytes * 8.0) as u64,
        file: file.to_string(),
    })
}

fn seconds_since(midnight: NaiveDateTime, t: NaiveDateTime) -> f64 {
    (t - midnight).num_milliseconds() as f64 / 1e3
}
