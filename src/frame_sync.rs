/*! Frame synchronization.

A capture is one long unframed bit stream. Each 1600-bit bus word is
followed by a nominal 144-bit gap, and the only framing on the wire is the
9-bit label at the start of every word. The scanner walks the stream,
expects the next label exactly one gap past the end of the previous word,
and falls back to a bit-by-bit hunt from the current position when it is
not there.

Nothing the scan encounters is an error. A missing label ends the scan, a
label in the wrong place is recorded as a [`ResyncEvent`], and whatever
trailing bits could not be framed are reported as the tail. The caller
gets everything back in a [`SyncReport`].

One wrinkle is inherited from the archive format: the hunt accepts the
first bit pattern that looks like a label, with no further check that a
whole well-formed word follows. A coincidental label pattern inside
drifted data cuts a frame from the wrong place, and only the decoder's
own validation stands between that frame and the output.
*/
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::bits::Bits;
use crate::{FRAME_BITS, LABEL, LABEL_BITS, PERIOD_BITS};

/// One frame-sized run of bits cut out of a capture.
///
/// Ephemeral: produced by a scan, consumed by [`crate::word::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    source: Arc<str>,
    offset: u64,
    bits: Vec<u8>,
}

impl RawFrame {
    /// Frame from bits obtained elsewhere. `bits` is one bit per element
    /// in wire order and must be exactly [`FRAME_BITS`] long.
    pub fn new(source: &str, offset: u64, bits: Vec<u8>) -> Self {
        assert_eq!(bits.len(), FRAME_BITS);
        Self {
            source: Arc::from(source),
            offset,
            bits,
        }
    }

    /// Name of the capture file the frame came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Bit offset of the frame start within its capture.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The frame's bits in wire order, one per element.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }
}

/// The scanner had to move the cursor somewhere other than the nominal
/// gap to find the next label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResyncEvent {
    /// Bit position the search started from.
    pub pos: u64,

    /// Distance from `pos` at which the label was found.
    pub gap: u64,

    /// Deviation from the nominal inter-frame gap.
    pub shift: i64,
}

/// Everything one scan over a capture produced.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Recovered frames, in stream order.
    pub frames: Vec<RawFrame>,

    /// Resynchronizations, in stream order.
    pub resyncs: Vec<ResyncEvent>,

    /// Trailing bits that could not be framed. A clean capture still ends
    /// with up to one nominal gap here; anything longer is an unparsable
    /// fragment.
    pub tail_bits: u64,
}

impl SyncReport {
    /// Approximate seconds of bus time covered, at the nominal word rate.
    pub fn coverage_seconds(&self) -> f64 {
        self.frames.len() as f64 / crate::WORDS_PER_SECOND
    }
}

/// Frame boundary scanner.
#[derive(Debug, Clone)]
pub struct FrameSync {
    frame_bits: usize,
    period_bits: usize,
    label_bits: usize,
    label: u32,
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync {
    /// Scanner for the standard bus geometry.
    pub fn new() -> Self {
        Self::with_geometry(FRAME_BITS, PERIOD_BITS, LABEL_BITS, u32::from(LABEL))
    }

    /// Scanner for an arbitrary geometry. Mostly useful for tests; real
    /// captures use [`FrameSync::new`].
    pub fn with_geometry(
        frame_bits: usize,
        period_bits: usize,
        label_bits: usize,
        label: u32,
    ) -> Self {
        assert!(period_bits >= frame_bits);
        assert!(label_bits <= frame_bits);
        assert!(label_bits <= 32);
        Self {
            frame_bits,
            period_bits,
            label_bits,
            label,
        }
    }

    /// The label as a bit pattern, MSB first.
    fn pattern(&self) -> Vec<u8> {
        (0..self.label_bits)
            .map(|i| ((self.label >> (self.label_bits - 1 - i)) & 1) as u8)
            .collect()
    }

    /// Scan a capture for frames.
    ///
    /// `source` is the capture file name; it tags every emitted frame and
    /// is later the key into the size log.
    pub fn scan(&self, data: &Bits, source: &str) -> SyncReport {
        let source: Arc<str> = Arc::from(source);
        let bits = data.as_slice();
        let gap = self.period_bits - self.frame_bits;
        let pattern = self.pattern();
        let mut report = SyncReport::default();
        let mut cursor = 0usize;

        // Position on a label, emit a frame, repeat. Stop as soon as a
        // full period no longer fits.
        while bits.len() - cursor >= self.frame_bits + gap {
            if bits[cursor + gap..].starts_with(&pattern) {
                // The label is exactly one gap ahead. The common case.
                cursor += gap;
            } else {
                let Some(d) = find(&bits[cursor..], &pattern) else {
                    // No label before the stream end.
                    break;
                };
                if d != 0 && d != gap {
                    debug!("{source}: resync at bit {cursor}, label found {d} bits out");
                    report.resyncs.push(ResyncEvent {
                        pos: cursor as u64,
                        gap: d as u64,
                        shift: d as i64 - gap as i64,
                    });
                }
                cursor += d;
            }
            if bits.len() - cursor < self.frame_bits {
                // The label was too close to the end for a whole frame.
                break;
            }
            report.frames.push(RawFrame {
                source: Arc::clone(&source),
                offset: cursor as u64,
                bits: bits[cursor..cursor + self.frame_bits].to_vec(),
            });
            cursor += self.frame_bits;
        }
        report.tail_bits = (bits.len() - cursor) as u64;
        report
    }
}

fn find(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    haystack.windows(pattern.len()).position(|w| w == pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GAP_BITS;
    use crate::word::{self, Record};

    /// A quiet bus word as capture bytes, followed by `gap_bits` of zeros.
    fn period(gap_bits: usize) -> Vec<u8> {
        assert_eq!(gap_bits % 8, 0);
        let mut bytes = word::encode(&Record::default());
        bytes.extend(std::iter::repeat(0u8).take(gap_bits / 8));
        bytes
    }

    #[test]
    fn two_frames_no_drift() {
        let mut capture = period(GAP_BITS);
        capture.extend(period(GAP_BITS));
        let report = FrameSync::new().scan(&Bits::from_bytes(&capture), "a.tmp");
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[0].offset(), 0);
        assert_eq!(report.frames[1].offset(), PERIOD_BITS as u64);
        assert!(report.resyncs.is_empty());
        assert_eq!(report.tail_bits, GAP_BITS as u64);
    }

    #[test]
    fn two_frames_second_shifted() {
        // Same length as the clean case, but the second frame starts 5
        // bits late and the trailing gap shrinks to match.
        let frame = word::encode(&Record::default());
        let mut bits: Vec<u8> = Bits::from_bytes(&frame).as_slice().to_vec();
        bits.extend(std::iter::repeat(0u8).take(GAP_BITS + 5));
        bits.extend(Bits::from_bytes(&frame).as_slice());
        bits.extend(std::iter::repeat(0u8).take(GAP_BITS - 5));
        assert_eq!(bits.len(), 2 * PERIOD_BITS);

        let report = FrameSync::new().scan(&Bits::from_bits(bits), "a.tmp");
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[1].offset(), (PERIOD_BITS + 5) as u64);
        assert_eq!(report.resyncs.len(), 1);
        let ev = report.resyncs[0];
        assert_eq!(ev.pos, FRAME_BITS as u64);
        assert_eq!(ev.gap, (GAP_BITS + 5) as u64);
        assert_eq!(ev.shift, 5);
    }

    #[test]
    fn three_frames_then_fragment() {
        let mut capture = Vec::new();
        for _ in 0..3 {
            capture.extend(period(GAP_BITS));
        }
        // 800 bits of frame-shaped junk with no label.
        capture.extend(std::iter::repeat(0xffu8).take(100));
        let report = FrameSync::new().scan(&Bits::from_bytes(&capture), "a.tmp");
        assert_eq!(report.frames.len(), 3);
        assert!(report.resyncs.is_empty());
        assert_eq!(report.tail_bits, (GAP_BITS + 800) as u64);
    }

    #[test]
    fn no_label_no_frames() {
        let capture = vec![0u8; 1000];
        let report = FrameSync::new().scan(&Bits::from_bytes(&capture), "a.tmp");
        assert!(report.frames.is_empty());
        assert!(report.resyncs.is_empty());
        assert_eq!(report.tail_bits, 8000);
    }

    #[test]
    fn short_buffer_no_partial_frame() {
        // A valid label right at the start, but less than a period of
        // data. No partial frames.
        let capture = &word::encode(&Record::default())[..100];
        let report = FrameSync::new().scan(&Bits::from_bytes(capture), "a.tmp");
        assert!(report.frames.is_empty());
        assert_eq!(report.tail_bits, 800);
    }

    #[test]
    fn toy_geometry() {
        // 16-bit frames, 4-bit gap, 4-bit label 0b1011.
        let sync = FrameSync::with_geometry(16, 20, 4, 0b1011);
        let frame = [1u8, 0, 1, 1, 0, 0, 1, 0, 0, 1, 1, 0, 1, 0, 0, 1];
        let mut stream = Vec::new();
        stream.extend(frame);
        stream.extend([0, 0, 0, 0]);
        stream.extend(frame);
        // Drift: 2 extra bits before the third frame.
        stream.extend([0, 0, 0, 0, 0, 0]);
        stream.extend(frame);
        stream.extend([0, 0, 0, 0]);

        let report = sync.scan(&Bits::from_bits(stream), "toy");
        assert_eq!(report.frames.len(), 3);
        assert_eq!(report.resyncs.len(), 1);
        assert_eq!(report.resyncs[0].shift, 2);
        assert_eq!(
            report.frames.iter().map(|f| f.offset()).collect::<Vec<_>>(),
            vec![0, 20, 42]
        );
    }

    #[test]
    fn coverage_estimate() {
        let mut capture = period(GAP_BITS);
        capture.extend(period(GAP_BITS));
        let report = FrameSync::new().scan(&Bits::from_bytes(&capture), "a.tmp");
        assert!((report.coverage_seconds() - 2.0 / 190.0).abs() < 1e-12);
    }
}
