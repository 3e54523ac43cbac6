//! Waveform sub-tables of FDS and N163 instruments

use super::diagnostics::{CompileLog, WarningKind};
use super::envelope::UniqueTable;
use crate::project::{Envelope, EnvelopeKind, Instrument, InstrumentKind};

/// FDS wave RAM size (6-bit samples)
pub const FDS_WAVE_LENGTH: usize = 64;

/// FDS modulation table size (3-bit codes)
pub const FDS_MOD_LENGTH: usize = 32;

/// Modulation table codes by pitch offset; code 4 resets the accumulator
const FDS_MOD_CODES: [(i8, u8); 7] = [(0, 0), (1, 1), (2, 2), (4, 3), (-4, 5), (-2, 6), (-1, 7)];

/// Sample of a cyclic waveform
fn sample(values: &[i8], index: usize) -> i8 {
    if values.is_empty() {
        0
    } else {
        values[index % values.len()]
    }
}

/// 64 six-bit samples of an FDS wave
pub fn fds_wave(env: &Envelope, log: &mut CompileLog) -> Vec<u8> {
    if env.values.iter().any(|&v| !(0..=63).contains(&v)) {
        log.warn_once(WarningKind::Clamped, "FDS wave samples clamped to 0..63");
    }
    (0..FDS_WAVE_LENGTH)
        .map(|i| sample(&env.values, i).clamp(0, 63) as u8)
        .collect()
}

/// 32 modulation codes; offsets without a code use the nearest one
pub fn fds_mod(env: &Envelope, log: &mut CompileLog) -> Vec<u8> {
    (0..FDS_MOD_LENGTH)
        .map(|i| {
            let value = sample(&env.values, i);
            let &(offset, code) = FDS_MOD_CODES
                .iter()
                .min_by_key(|(offset, _)| (i16::from(*offset) - i16::from(value)).abs())
                .unwrap_or(&(0, 0));
            if offset != value {
                log.warn_once(
                    WarningKind::Clamped,
                    format!("FDS modulation offset {} replaced by {}", value, offset),
                );
            }
            code
        })
        .collect()
}

/// N163 wave, two 4-bit samples per byte, low nibble first
pub fn n163_wave(env: &Envelope, size: usize, log: &mut CompileLog) -> Vec<u8> {
    if env.values.iter().any(|&v| !(0..=15).contains(&v)) {
        log.warn_once(WarningKind::Clamped, "N163 wave samples clamped to 0..15");
    }
    let size = size.max(2) & !1;
    (0..size / 2)
        .map(|i| {
            let low = sample(&env.values, i * 2).clamp(0, 15) as u8;
            let high = sample(&env.values, i * 2 + 1).clamp(0, 15) as u8;
            (high << 4) | low
        })
        .collect()
}

/// Deduplicated waveform data of all expansion instruments
#[derive(Debug, Default)]
pub struct WaveTables {
    pub fds_waves: UniqueTable,
    pub fds_mods: UniqueTable,
    pub n163_waves: UniqueTable,
}

/// Waveform table indices of one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentWaves {
    None,
    Fds { wave: usize, modulation: usize },
    N163 { wave: usize },
}

impl WaveTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, instrument: &Instrument, log: &mut CompileLog) -> InstrumentWaves {
        let flat = Envelope::new(Vec::new());
        match instrument.kind {
            InstrumentKind::Fds { .. } => {
                let wave = instrument
                    .envelope(EnvelopeKind::FdsWaveform)
                    .unwrap_or(&flat);
                let modulation = instrument
                    .envelope(EnvelopeKind::FdsModulation)
                    .unwrap_or(&flat);
                InstrumentWaves::Fds {
                    wave: self.fds_waves.intern(fds_wave(wave, log), 0),
                    modulation: self.fds_mods.intern(fds_mod(modulation, log), 0),
                }
            }
            InstrumentKind::N163 { wave_size, .. } => {
                let wave = instrument
                    .envelope(EnvelopeKind::N163Waveform)
                    .unwrap_or(&flat);
                let bytes = n163_wave(wave, usize::from(wave_size), log);
                InstrumentWaves::N163 {
                    wave: self.n163_waves.intern(bytes, 0),
                }
            }
            _ => InstrumentWaves::None,
        }
    }
}
