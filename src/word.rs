/*! ARINC 708 bus word decoding.

A bus word is 1600 bits: a 64-bit header followed by 512 reflectivity bins
of 3 bits each. Before any field can be read, two bit-order quirks have to
be undone:

1. The acquisition path stores every byte with its bits reversed, so the
   whole frame is flipped back byte by byte into the canonical bit string
   ([`crate::bits::reverse_byte_groups`]).
2. Each multi-bit subfield is transmitted low bit first and is read with
   [`crate::bits::uint_rev`].

The exception is the label: it is validated on the *raw* bit order, as
three octal digits, before anything is flipped.

All field positions live in the [`layout`] table. They follow the
protocol reference exactly, including its oddities; see the notes on
[`layout::STABILIZATION`] and in [`encode`]. Archives were decoded with
these offsets, so they are not "fixed" here.
*/
use itertools::Itertools;
use serde::Serialize;

use crate::bits::{self, uint_msb, uint_rev};
use crate::frame_sync::RawFrame;
use crate::{FRAME_BITS, LABEL, LABEL_BITS};

/// Degrees per scan angle count: 360 / 4096.
const SCAN_ANGLE_STEP: f32 = 0.087890625;

/// Degrees per tilt count.
const TILT_STEP: f32 = 0.25;

/// Weight of the tilt sign bit, degrees.
const TILT_SIGN_WEIGHT: f32 = -16.0;

/// Range reported for a range code missing from [`RANGE_TABLE`].
pub const RANGE_UNKNOWN: u16 = 9999;

/// Range code (after subfield reversal) to nautical miles.
const RANGE_TABLE: [(u32, u16); 8] = [
    (0b000001, 5),
    (0b000010, 10),
    (0b000100, 20),
    (0b001000, 40),
    (0b010000, 80),
    (0b100000, 160),
    (0b111111, 315),
    (0b000000, 320),
];

/// Field positions on the canonical (byte-reversed) bit string.
///
/// Half-open bit ranges, multi-bit fields read via
/// [`crate::bits::uint_rev`].
pub mod layout {
    use std::ops::Range;

    /// Which indicators accept control, 0..=3.
    pub const CONTROL_ACCEPT: Range<usize> = 8..10;
    /// Slave mode flag.
    pub const SLAVE: usize = 11;
    /// Mode annunciation bitmask, 5 flags.
    pub const MODE_ANNUNCIATION: Range<usize> = 13..18;
    /// Fault bitmask, 7 flags.
    pub const FAULTS: Range<usize> = 18..25;
    /// Antenna stabilization flag.
    ///
    /// Shares bit 26 with [`OPERATING_MODE`]. The overlap is in the
    /// protocol reference (likely a transcription error there) and is
    /// preserved for compatibility with previously decoded archives.
    pub const STABILIZATION: usize = 26;
    /// Operating mode, 3 bits.
    pub const OPERATING_MODE: Range<usize> = 26..29;
    /// Tilt: 6-bit magnitude, then a sign bit at the top of the range.
    pub const TILT: Range<usize> = 29..36;
    /// Gain code, raw.
    pub const GAIN: Range<usize> = 36..42;
    /// Range code, looked up in the range table.
    pub const RANGE: Range<usize> = 42..48;
    /// Which data sources are accepted, 0..=3.
    pub const DATA_ACCEPT: Range<usize> = 49..51;
    /// Antenna scan angle, 12 bits of 360/4096 degrees.
    pub const SCAN_ANGLE: Range<usize> = 51..63;
    /// 512 reflectivity bins, 3 bits each.
    pub const REFLECTIVITY: Range<usize> = 64..1600;
}

/// Number of reflectivity bins in a word.
pub const REFLECTIVITY_BINS: usize = 512;

/// Operating mode annunciation, from the 3-bit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperatingMode {
    Standby,
    Weather,
    Map,
    Contour,
    Test,
    Turbulence,
    WeatherTurbulence,
    Reserved,
}

impl OperatingMode {
    /// Mode for a raw 3-bit code.
    pub fn from_code(code: u8) -> Self {
        match code & 0b111 {
            0 => OperatingMode::Standby,
            1 => OperatingMode::Weather,
            2 => OperatingMode::Map,
            3 => OperatingMode::Contour,
            4 => OperatingMode::Test,
            5 => OperatingMode::Turbulence,
            6 => OperatingMode::WeatherTurbulence,
            _ => OperatingMode::Reserved,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            OperatingMode::Standby => "standby",
            OperatingMode::Weather => "weather",
            OperatingMode::Map => "map",
            OperatingMode::Contour => "contour",
            OperatingMode::Test => "test",
            OperatingMode::Turbulence => "turbulence",
            OperatingMode::WeatherTurbulence => "weather & turbulence",
            OperatingMode::Reserved => "reserved",
        };
        write!(f, "{s}")
    }
}

/// Mode annunciation flag names, low bit first.
pub const MODE_ANNUNCIATION_FLAGS: [&str; 5] = [
    "antenna stability limits",
    "sector scan",
    "anti clutter",
    "weather alert",
    "turbulence alert",
];

/// Fault flag names, low bit first.
pub const FAULT_FLAGS: [&str; 7] = [
    "cooling fault",
    "display fault",
    "calibration fault",
    "altitude input fault",
    "control fault",
    "antenna fault",
    "transmitter/receiver fault",
];

/// One decoded bus word.
///
/// Reflectivity bins code precipitation and turbulence intensity:
/// 0 none, 1 light, 2 moderate, 3 heavy, 4 very heavy precipitation,
/// 5 reserved, 6 medium turbulence, 7 heavy turbulence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// The sync label, always [`LABEL`] on a decoded record.
    pub label: u16,
    /// Which indicators accept control, 0..=3.
    pub control_accept: u8,
    /// Slave mode.
    pub slave: bool,
    /// Mode annunciation bitmask; see [`MODE_ANNUNCIATION_FLAGS`].
    pub mode_annunciation: u8,
    /// Fault bitmask; see [`FAULT_FLAGS`].
    pub faults: u8,
    /// Antenna stabilization. Always equal to the low bit of
    /// `operating_mode`; see [`layout::STABILIZATION`].
    pub stabilization: bool,
    /// Raw 3-bit operating mode code; [`Record::operating_mode`] names it.
    pub operating_mode: u8,
    /// Antenna tilt, degrees, -16.0..=15.75 in 0.25 steps.
    pub tilt: f32,
    /// Raw 6-bit gain code, passed through undecoded.
    pub gain: u8,
    /// Selected range, nautical miles, or [`RANGE_UNKNOWN`].
    pub range: u16,
    /// Which data sources are accepted, 0..=3.
    pub data_accept: u8,
    /// Antenna scan angle, degrees, 0..360.
    pub scan_angle: f32,
    /// Reflectivity code per range bin.
    #[serde(serialize_with = "serialize_reflectivity")]
    pub reflectivity: [u8; REFLECTIVITY_BINS],
}

fn serialize_reflectivity<S>(v: &[u8; REFLECTIVITY_BINS], s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.collect_seq(v.iter())
}

impl Default for Record {
    fn default() -> Self {
        Self {
            label: LABEL,
            control_accept: 0,
            slave: false,
            mode_annunciation: 0,
            faults: 0,
            stabilization: false,
            operating_mode: 0,
            tilt: 0.0,
            gain: 0,
            // The all-zero range code maps to 320 nm.
            range: 320,
            data_accept: 0,
            scan_angle: 0.0,
            reflectivity: [0; REFLECTIVITY_BINS],
        }
    }
}

impl Record {
    /// The operating mode, named.
    pub fn operating_mode(&self) -> OperatingMode {
        OperatingMode::from_code(self.operating_mode)
    }

    /// Names of the set mode annunciation flags.
    pub fn annunciations(&self) -> Vec<&'static str> {
        flag_names(self.mode_annunciation, &MODE_ANNUNCIATION_FLAGS)
    }

    /// Names of the set fault flags.
    pub fn fault_names(&self) -> Vec<&'static str> {
        flag_names(self.faults, &FAULT_FLAGS)
    }
}

fn flag_names(mask: u8, names: &[&'static str]) -> Vec<&'static str> {
    names
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, &name)| name)
        .collect()
}

impl std::fmt::Display for Record {
    /// Header summary plus the reflectivity bins, 25 per row.
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "mode {} tilt {:+.2} deg gain {} range {} nm scan {:.1} deg",
            self.operating_mode(),
            self.tilt,
            self.gain,
            self.range,
            self.scan_angle,
        )?;
        for (row, chunk) in self.reflectivity.chunks(25).enumerate() {
            let bins = chunk
                .chunks(5)
                .map(|g| g.iter().map(|v| v.to_string()).collect::<String>())
                .join("  ");
            writeln!(f, "<{:3} - {:3}>  {}", row * 25 + 1, row * 25 + chunk.len(), bins)?;
        }
        Ok(())
    }
}

/// A frame that is not a decodable bus word.
///
/// This is a per-frame outcome, not a [`crate::Error`]: the session layer
/// counts these and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameInvalid {
    /// Bit offset of the frame within its capture.
    pub offset: u64,
    /// The label that was actually there.
    pub label: u16,
}

impl std::fmt::Display for FrameInvalid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "frame at bit {} has label 0o{:03o}, want 0o{:03o}",
            self.offset, self.label, LABEL
        )
    }
}

impl std::error::Error for FrameInvalid {}

/// Decode one frame into a [`Record`].
///
/// Pure function of the frame. The only failure is a label mismatch.
pub fn decode(frame: &RawFrame) -> Result<Record, FrameInvalid> {
    let raw = frame.bits();
    let label = uint_msb(&raw[..LABEL_BITS]) as u16;
    if label != LABEL {
        return Err(FrameInvalid {
            offset: frame.offset(),
            label,
        });
    }
    let mut w = raw.to_vec();
    bits::reverse_byte_groups(&mut w);
    Ok(Record {
        label,
        control_accept: uint_rev(&w[layout::CONTROL_ACCEPT]) as u8,
        slave: w[layout::SLAVE] != 0,
        mode_annunciation: uint_rev(&w[layout::MODE_ANNUNCIATION]) as u8,
        faults: uint_rev(&w[layout::FAULTS]) as u8,
        stabilization: w[layout::STABILIZATION] != 0,
        operating_mode: uint_rev(&w[layout::OPERATING_MODE]) as u8,
        tilt: tilt(&w),
        gain: uint_rev(&w[layout::GAIN]) as u8,
        range: range_nm(uint_rev(&w[layout::RANGE])),
        data_accept: uint_rev(&w[layout::DATA_ACCEPT]) as u8,
        scan_angle: uint_rev(&w[layout::SCAN_ANGLE]) as f32 * SCAN_ANGLE_STEP,
        reflectivity: reflectivity(&w),
    })
}

/// Sign bit at the top of the range, 6-bit magnitude below it.
fn tilt(w: &[u8]) -> f32 {
    let sign = w[layout::TILT.end - 1];
    let mag = uint_rev(&w[layout::TILT.start..layout::TILT.end - 1]);
    f32::from(sign) * TILT_SIGN_WEIGHT + mag as f32 * TILT_STEP
}

fn range_nm(code: u32) -> u16 {
    RANGE_TABLE
        .iter()
        .find(|&&(c, _)| c == code)
        .map(|&(_, nm)| nm)
        .unwrap_or(RANGE_UNKNOWN)
}

fn reflectivity(w: &[u8]) -> [u8; REFLECTIVITY_BINS] {
    let mut out = [0u8; REFLECTIVITY_BINS];
    let data = &w[layout::REFLECTIVITY];
    // An all-dark scan is common on the ground; skip the per-bin work.
    if data.iter().any(|&b| b != 0) {
        for (bin, chunk) in data.chunks_exact(3).enumerate() {
            out[bin] = uint_rev(chunk) as u8;
        }
    }
    out
}

/// Build the 200 capture bytes for a record. Inverse of [`decode`], used
/// for synthetic captures in tests and fixtures.
///
/// Two quirks of the layout cannot round-trip arbitrary records:
///
/// * Bit 26 is shared between stabilization and the operating mode's low
///   bit; the operating mode wins.
/// * The label is written last, on the raw bit order, and its ninth bit
///   lands on canonical bit 15 (mode annunciation flag bit 2). That flag
///   reads back as 0 from any label-valid frame.
///
/// A `range` missing from the lookup table is written as a code that
/// decodes to [`RANGE_UNKNOWN`].
pub fn encode(rec: &Record) -> Vec<u8> {
    let mut w = vec![0u8; FRAME_BITS];
    write_rev(&mut w, layout::CONTROL_ACCEPT, u32::from(rec.control_accept));
    w[layout::SLAVE] = rec.slave as u8;
    write_rev(
        &mut w,
        layout::MODE_ANNUNCIATION,
        u32::from(rec.mode_annunciation),
    );
    write_rev(&mut w, layout::FAULTS, u32::from(rec.faults));
    w[layout::STABILIZATION] = rec.stabilization as u8;
    write_rev(&mut w, layout::OPERATING_MODE, u32::from(rec.operating_mode));
    let q = (rec.tilt / TILT_STEP).round() as i32;
    let (sign, mag) = if q < 0 { (1, (q + 64) as u32) } else { (0, q as u32) };
    w[layout::TILT.end - 1] = sign;
    write_rev(&mut w, layout::TILT.start..layout::TILT.end - 1, mag);
    write_rev(&mut w, layout::GAIN, u32::from(rec.gain));
    write_rev(&mut w, layout::RANGE, range_code(rec.range));
    write_rev(&mut w, layout::DATA_ACCEPT, u32::from(rec.data_accept));
    write_rev(
        &mut w,
        layout::SCAN_ANGLE,
        ((rec.scan_angle / SCAN_ANGLE_STEP).round() as u32) & 0xfff,
    );
    for (bin, &v) in rec.reflectivity.iter().enumerate() {
        let at = layout::REFLECTIVITY.start + 3 * bin;
        write_rev(&mut w, at..at + 3, u32::from(v));
    }
    bits::reverse_byte_groups(&mut w);
    for (i, bit) in w[..LABEL_BITS].iter_mut().enumerate() {
        *bit = ((LABEL >> (LABEL_BITS - 1 - i)) & 1) as u8;
    }
    bits::pack_bytes(&w)
}

/// Write `v` into the range, low bit first.
fn write_rev(bits: &mut [u8], r: std::ops::Range<usize>, v: u32) {
    for (i, ix) in r.enumerate() {
        bits[ix] = ((v >> i) & 1) as u8;
    }
}

fn range_code(nm: u16) -> u32 {
    RANGE_TABLE
        .iter()
        .find(|&&(_, n)| n == nm)
        .map(|&(c, _)| c)
        // Any code outside the table decodes to RANGE_UNKNOWN.
        .unwrap_or(0b000101)
}
