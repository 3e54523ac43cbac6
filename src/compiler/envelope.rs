//! Envelope encoder and project-wide unique curve table
//!
//! Encoded curve layout:
//!
//! - byte 0: offset of the release entry point (0 = no release)
//! - `0x80..=0xFF`: value for one frame (value + 192)
//! - `0x01..=0x7F`: run count, followed by the value byte
//! - `0x00, target`: jump to `target`; a jump onto itself halts the curve

use super::diagnostics::{CompileLog, WarningKind};
use super::kernel::Kernel;
use crate::project::{Envelope, EnvelopeKind};
use std::collections::HashMap;

/// Bias applied to signed values
pub const VALUE_BIAS: u8 = 192;

/// Representable signed value range
pub const VALUE_MIN: i8 = -64;
pub const VALUE_MAX: i8 = 63;

/// Longest run one record can hold
pub const MAX_RUN: usize = 127;

/// Jump marker
pub const JUMP: u8 = 0x00;

/// Longest curve the driver can address with 8-bit offsets
pub const MAX_ENVELOPE_LENGTH: usize = 240;

/// Canonical "do nothing" curve: no release, halt immediately
pub const DEFAULT_ENVELOPE: [u8; 3] = [0x00, JUMP, 0x01];

/// Hardware-profile flags for one encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeFlags {
    pub allow_releases: bool,
    pub is_pitch: bool,
}

fn bias(value: i8) -> u8 {
    (value as u8).wrapping_add(VALUE_BIAS)
}

/// Inverse of the value bias
pub fn unbias(byte: u8) -> i8 {
    byte.wrapping_sub(VALUE_BIAS) as i8
}

/// Encode one curve. `None` means "use the canonical default curve".
pub fn encode_envelope(
    env: &Envelope,
    flags: EncodeFlags,
    log: &mut CompileLog,
) -> Option<Vec<u8>> {
    if !env.is_well_formed() {
        if !env.is_empty() {
            log.warn(
                WarningKind::MalformedCurve,
                format!(
                    "Envelope of length {} has loop {:?} / release {:?} out of range, using default",
                    env.len(),
                    env.loop_point,
                    env.release
                ),
            );
        }
        return None;
    }

    let mut values = env.values.clone();
    if values.len() > MAX_ENVELOPE_LENGTH {
        log.warn(
            WarningKind::MalformedCurve,
            format!(
                "Envelope truncated from {} to {} frames",
                values.len(),
                MAX_ENVELOPE_LENGTH
            ),
        );
        values.truncate(MAX_ENVELOPE_LENGTH);
    }

    if values.iter().any(|&v| !(VALUE_MIN..=VALUE_MAX).contains(&v)) {
        if flags.is_pitch {
            log.warn_once(
                WarningKind::UnsupportedCurve,
                "Pitch envelope needs hi-pitch values, clamping to -64..63",
            );
        } else {
            log.warn(WarningKind::Clamped, "Envelope values clamped to -64..63");
        }
    }
    let mut bytes: Vec<u8> = values
        .iter()
        .map(|&v| bias(v.clamp(VALUE_MIN, VALUE_MAX)))
        .collect();

    let release = if flags.allow_releases {
        env.effective_release().filter(|&r| r < bytes.len())
    } else {
        if env.release.is_some() {
            log.warn_once(
                WarningKind::UnsupportedCurve,
                "Envelope releases are not supported by the target kernel",
            );
        }
        None
    };
    let loop_point = if release.is_some() {
        env.effective_loop()
    } else {
        env.loop_point
    }
    .filter(|&l| l < bytes.len());

    // Set-and-hold
    if bytes.len() == 1 && !env.relative && release.is_none() {
        let value = bytes[0];
        return Some(if flags.is_pitch {
            vec![0x00, value, JUMP, 2]
        } else {
            vec![0x00, MAX_RUN as u8, value, JUMP, 1]
        });
    }

    // A relative curve that ends must stop adding deltas
    if env.relative && loop_point.is_none() {
        bytes.push(bias(0));
    }

    Some(encode_runs(&bytes, loop_point, release))
}

fn encode_runs(bytes: &[u8], loop_point: Option<usize>, release: Option<usize>) -> Vec<u8> {
    let last = bytes.len() - 1;
    let mut out = vec![0x00];
    let mut loop_offset = None;

    let mut i = 0;
    while i < bytes.len() {
        if release == Some(i) {
            let target = loop_offset.expect("a release always has a loop before it");
            out.push(JUMP);
            out.push(target as u8);
            out[0] = out.len() as u8;
        }
        if loop_point == Some(i) {
            loop_offset = Some(out.len());
        }

        let start = i;
        let value = bytes[i];
        i += 1;
        while i < bytes.len()
            && bytes[i] == value
            && i - start < MAX_RUN
            && loop_point != Some(i)
            && release != Some(i)
            && i != last
        {
            i += 1;
        }

        let run = i - start;
        if run == 1 {
            out.push(value);
        } else {
            out.push(run as u8);
            out.push(value);
        }
    }

    // After a release the tail holds its last value instead of re-entering the sustain loop
    let target = match (loop_offset, release) {
        (Some(offset), None) => offset,
        _ => out.len() - 1,
    };
    out.push(JUMP);
    out.push(target as u8);

    if let Some(offset) = loop_offset {
        assert!(
            record_starts(&out).contains(&offset),
            "loop target {} lands inside a run record",
            offset
        );
    }

    out
}

/// Offsets at which records start
fn record_starts(bytes: &[u8]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut pos = 1;
    while pos < bytes.len() {
        starts.push(pos);
        pos += if bytes[pos] >= 0x80 { 1 } else { 2 };
    }
    starts
}

/// Encode an instrument curve, folding what the instrument record can carry
pub fn encode_instrument_envelope(
    env: &Envelope,
    kind: EnvelopeKind,
    kernel: Kernel,
    log: &mut CompileLog,
) -> Option<Vec<u8>> {
    // Constant duty lives in the instrument's register init byte
    if kind == EnvelopeKind::DutyCycle && env.len() == 1 && env.release.is_none() && !env.relative
    {
        return None;
    }
    let flags = EncodeFlags {
        allow_releases: kernel.allows_releases(),
        is_pitch: kind == EnvelopeKind::Pitch,
    };
    encode_envelope(env, flags, log)
}

/// CRC-keyed table of unique byte blobs
#[derive(Debug, Default)]
pub struct UniqueTable {
    entries: Vec<Vec<u8>>,
    by_crc: HashMap<u32, Vec<usize>>,
}

impl UniqueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table whose entry 0 is a fixed default
    pub fn with_default(bytes: &[u8]) -> Self {
        let mut table = Self::new();
        table.intern(bytes.to_vec(), 0);
        table
    }

    /// Return the index of `bytes`, adding it on first sight.
    /// `tag` separates blobs that are byte-identical but played differently.
    pub fn intern(&mut self, bytes: Vec<u8>, tag: u8) -> usize {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        hasher.update(&[tag]);
        let crc = hasher.finalize();

        let bucket = self.by_crc.entry(crc).or_default();
        if let Some(&index) = bucket.iter().find(|&&i| self.entries[i] == bytes) {
            return index;
        }
        let index = self.entries.len();
        bucket.push(index);
        self.entries.push(bytes);
        index
    }

    pub fn get(&self, index: usize) -> &[u8] {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }
}

/// Unique envelope table; index 0 is the canonical default curve
#[derive(Debug)]
pub struct EnvelopeTable {
    table: UniqueTable,
}

impl EnvelopeTable {
    pub const DEFAULT_INDEX: usize = 0;

    pub fn new() -> Self {
        Self {
            table: UniqueTable::with_default(&DEFAULT_ENVELOPE),
        }
    }

    /// Encode and deduplicate an instrument or arpeggio curve
    pub fn add(
        &mut self,
        env: Option<&Envelope>,
        kind: EnvelopeKind,
        kernel: Kernel,
        log: &mut CompileLog,
    ) -> usize {
        match env.and_then(|e| encode_instrument_envelope(e, kind, kernel, log)) {
            Some(bytes) => self.table.intern(bytes, env.map_or(0, |e| e.relative as u8)),
            None => Self::DEFAULT_INDEX,
        }
    }

    pub fn add_encoded(&mut self, bytes: Vec<u8>, relative: bool) -> usize {
        self.table.intern(bytes, relative as u8)
    }

    pub fn get(&self, index: usize) -> &[u8] {
        self.table.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.table.iter()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.table.total_bytes()
    }
}

impl Default for EnvelopeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Vibrato amplitude per depth (0..15)
const VIBRATO_AMPLITUDE: [u8; 16] = [0, 1, 2, 3, 4, 5, 7, 9, 11, 14, 17, 21, 26, 33, 42, 52];

/// Phase steps in one vibrato cycle
const VIBRATO_PHASES: usize = 64;

/// Looping absolute pitch curve for a vibrato speed/depth pair
pub fn vibrato_envelope(speed: u8, depth: u8) -> Envelope {
    let speed = usize::from(speed.clamp(1, 15));
    let amplitude = f64::from(VIBRATO_AMPLITUDE[usize::from(depth.min(15))]);

    let frames = VIBRATO_PHASES / gcd(VIBRATO_PHASES, speed);
    let values = (0..frames)
        .map(|f| {
            let phase = (f * speed) % VIBRATO_PHASES;
            let angle = std::f64::consts::TAU * phase as f64 / VIBRATO_PHASES as f64;
            (angle.sin() * amplitude).round() as i8
        })
        .collect();

    Envelope::new(values).with_loop(0)
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
