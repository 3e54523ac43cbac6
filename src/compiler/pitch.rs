//! Pitch register tables and slide step calculation

use crate::project::{Machine, PitchProfile, Song, TempoMode, NOTE_MAX};

/// CPU clocks
pub const NTSC_CLOCK: f64 = 1_789_773.0;
pub const PAL_CLOCK: f64 = 1_662_607.0;

/// Note value of A4 (440 Hz)
const A4_NOTE: i32 = 58;

/// Pitch register value of every note for one profile and region
#[derive(Debug, Clone)]
pub struct PitchTable {
    /// Register values, index 0 unused
    pub values: [u16; NOTE_MAX as usize + 1],
    /// Whether a higher register value means a lower pitch
    pub is_period: bool,
}

impl PitchTable {
    /// Calculate register values; `machine` must be a single region
    pub fn calculate(profile: PitchProfile, machine: Machine) -> Self {
        let clock = match machine {
            Machine::Pal => PAL_CLOCK,
            _ => NTSC_CLOCK,
        };

        let mut values = [0u16; NOTE_MAX as usize + 1];
        for (note, value) in values.iter_mut().enumerate().skip(1) {
            let freq = 440.0 * 2.0_f64.powf((note as i32 - A4_NOTE) as f64 / 12.0);
            let reg = match profile {
                PitchProfile::ApuPeriod => (clock / (16.0 * freq) - 1.0).round().min(2047.0),
                PitchProfile::SawPeriod => (clock / (14.0 * freq) - 1.0).round().min(4095.0),
                PitchProfile::Frequency => (freq * 1_048_576.0 / clock).round().min(4095.0),
                PitchProfile::None => 0.0,
            };
            *value = reg.max(0.0) as u16;
        }

        Self {
            values,
            is_period: matches!(profile, PitchProfile::ApuPeriod | PitchProfile::SawPeriod),
        }
    }

    pub fn get(&self, note: u8) -> u16 {
        self.values[usize::from(note.clamp(1, NOTE_MAX))]
    }
}

/// Frames one row lasts at a position, with `speed` the speed in effect there
pub fn frames_per_row(
    song: &Song,
    speed: u8,
    mode: TempoMode,
    machine: Machine,
    position: usize,
) -> f64 {
    match mode {
        TempoMode::FamiTracker => {
            let rate = if machine == Machine::Pal { 125.0 } else { 150.0 };
            f64::from(speed.max(1)) * rate / f64::from(song.tempo.max(1))
        }
        TempoMode::Groove => {
            let groove = song.groove_at(position);
            if groove.is_empty() {
                6.0
            } else {
                groove.iter().map(|&g| f64::from(g.max(1))).sum::<f64>() / groove.len() as f64
            }
        }
    }
}

/// Per-frame step taking the pitch from `from` to `to` in `frames` frames.
///
/// The driver starts at the register delta and moves it towards zero by the
/// step every frame. Results are clamped to the signed byte range and never
/// zero for distinct notes.
fn region_step(profile: PitchProfile, machine: Machine, from: u8, to: u8, frames: f64) -> i32 {
    let table = PitchTable::calculate(profile, machine);
    let delta = i32::from(table.get(from)) - i32::from(table.get(to));
    if delta == 0 {
        return 0;
    }
    let magnitude = (f64::from(delta.abs()) / frames.max(1.0)).ceil() as i32;
    (magnitude.max(1) * delta.signum()).clamp(-128, 127)
}

/// Slide step for the project's machine setting.
///
/// For hardware-agnostic projects the NTSC and PAL steps are computed and the
/// one moving further in the slide direction is kept, so both regions reach the
/// target within the note.
pub fn slide_step(
    profile: PitchProfile,
    machine: Machine,
    from: u8,
    to: u8,
    ntsc_frames: f64,
    pal_frames: f64,
) -> i8 {
    let step = match machine {
        Machine::Ntsc => region_step(profile, Machine::Ntsc, from, to, ntsc_frames),
        Machine::Pal => region_step(profile, Machine::Pal, from, to, pal_frames),
        Machine::Dual => {
            let ntsc = region_step(profile, Machine::Ntsc, from, to, ntsc_frames);
            let pal = region_step(profile, Machine::Pal, from, to, pal_frames);
            if ntsc >= 0 && pal >= 0 {
                ntsc.max(pal)
            } else {
                ntsc.min(pal)
            }
        }
    };
    step as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_period() {
        let table = PitchTable::calculate(PitchProfile::ApuPeriod, Machine::Ntsc);
        // 1789773 / (16 * 440) - 1 = 253.2
        assert_eq!(table.get(A4_NOTE as u8), 253);
        assert!(table.is_period);
        assert!(table.get(40) > table.get(41));
    }

    #[test]
    fn test_frequency_table_rises() {
        let table = PitchTable::calculate(PitchProfile::Frequency, Machine::Ntsc);
        assert!(!table.is_period);
        assert!(table.get(40) < table.get(41));
    }

    #[test]
    fn test_frames_per_row() {
        let song = Song::new("s", 1, 16);
        assert_eq!(
            frames_per_row(&song, song.speed, TempoMode::FamiTracker, Machine::Ntsc, 0),
            6.0
        );
        assert_eq!(
            frames_per_row(&song, song.speed, TempoMode::FamiTracker, Machine::Pal, 0),
            5.0
        );
        assert_eq!(
            frames_per_row(&song, 3, TempoMode::FamiTracker, Machine::Ntsc, 0),
            3.0
        );
    }

    #[test]
    fn test_slide_step_direction() {
        let up = slide_step(PitchProfile::ApuPeriod, Machine::Ntsc, 40, 45, 24.0, 20.0);
        let down = slide_step(PitchProfile::ApuPeriod, Machine::Ntsc, 45, 40, 24.0, 20.0);
        assert!(up > 0);
        assert!(down < 0);
        assert_eq!(slide_step(PitchProfile::ApuPeriod, Machine::Ntsc, 40, 40, 24.0, 20.0), 0);
    }

    #[test]
    fn test_dual_takes_larger_step() {
        let ntsc = slide_step(PitchProfile::ApuPeriod, Machine::Ntsc, 30, 42, 48.0, 40.0);
        let pal = slide_step(PitchProfile::ApuPeriod, Machine::Pal, 30, 42, 48.0, 40.0);
        let dual = slide_step(PitchProfile::ApuPeriod, Machine::Dual, 30, 42, 48.0, 40.0);
        assert_eq!(dual, ntsc.max(pal));

        let down = slide_step(PitchProfile::ApuPeriod, Machine::Dual, 42, 30, 48.0, 40.0);
        let ntsc_down = slide_step(PitchProfile::ApuPeriod, Machine::Ntsc, 42, 30, 48.0, 40.0);
        let pal_down = slide_step(PitchProfile::ApuPeriod, Machine::Pal, 42, 30, 48.0, 40.0);
        assert_eq!(down, ntsc_down.min(pal_down));
    }

    #[test]
    fn test_step_clamped() {
        let step = slide_step(PitchProfile::ApuPeriod, Machine::Ntsc, 1, 96, 1.0, 1.0);
        assert_eq!(step, 127);
    }
}
