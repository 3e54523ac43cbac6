//! Channel kinds and hardware-variant capability queries

use serde::{Deserialize, Serialize};

/// Expansion sound chips. The 2A03 itself is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expansion {
    Vrc6,
    Vrc7,
    Fds,
    Mmc5,
    N163,
    S5b,
}

impl Expansion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vrc6 => "VRC6",
            Self::Vrc7 => "VRC7",
            Self::Fds => "FDS",
            Self::Mmc5 => "MMC5",
            Self::N163 => "N163",
            Self::S5b => "S5B",
        }
    }

    /// Bit used in the header's expansion mask
    pub fn mask_bit(&self) -> u8 {
        match self {
            Self::Vrc6 => 0x01,
            Self::Vrc7 => 0x02,
            Self::Fds => 0x04,
            Self::Mmc5 => 0x08,
            Self::N163 => 0x10,
            Self::S5b => 0x20,
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Vrc6,
            Self::Vrc7,
            Self::Fds,
            Self::Mmc5,
            Self::N163,
            Self::S5b,
        ]
        .into_iter()
    }
}

/// How a channel turns a note into a pitch register value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchProfile {
    /// 11-bit period, clock / 16
    ApuPeriod,
    /// 12-bit period, clock / 14
    SawPeriod,
    /// Frequency-based registers (VRC7, FDS, N163)
    Frequency,
    /// Noise or DPCM: no pitch table, slides are meaningless
    None,
}

/// Which instrument table a channel indexes into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentTable {
    Primary,
    Extended,
}

/// Every channel the compiler knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Square1,
    Square2,
    Triangle,
    Noise,
    Dpcm,
    Vrc6Square1,
    Vrc6Square2,
    Vrc6Saw,
    Vrc7Fm1,
    Vrc7Fm2,
    Vrc7Fm3,
    Vrc7Fm4,
    Vrc7Fm5,
    Vrc7Fm6,
    FdsWave,
    Mmc5Square1,
    Mmc5Square2,
    N163Wave1,
    N163Wave2,
    N163Wave3,
    N163Wave4,
    N163Wave5,
    N163Wave6,
    N163Wave7,
    N163Wave8,
    S5bSquare1,
    S5bSquare2,
    S5bSquare3,
}

impl ChannelKind {
    /// Short name, used in labels and messages
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Square1 => "sq1",
            Self::Square2 => "sq2",
            Self::Triangle => "tri",
            Self::Noise => "noise",
            Self::Dpcm => "dpcm",
            Self::Vrc6Square1 => "vrc6sq1",
            Self::Vrc6Square2 => "vrc6sq2",
            Self::Vrc6Saw => "vrc6saw",
            Self::Vrc7Fm1 => "vrc7fm1",
            Self::Vrc7Fm2 => "vrc7fm2",
            Self::Vrc7Fm3 => "vrc7fm3",
            Self::Vrc7Fm4 => "vrc7fm4",
            Self::Vrc7Fm5 => "vrc7fm5",
            Self::Vrc7Fm6 => "vrc7fm6",
            Self::FdsWave => "fds",
            Self::Mmc5Square1 => "mmc5sq1",
            Self::Mmc5Square2 => "mmc5sq2",
            Self::N163Wave1 => "n163w1",
            Self::N163Wave2 => "n163w2",
            Self::N163Wave3 => "n163w3",
            Self::N163Wave4 => "n163w4",
            Self::N163Wave5 => "n163w5",
            Self::N163Wave6 => "n163w6",
            Self::N163Wave7 => "n163w7",
            Self::N163Wave8 => "n163w8",
            Self::S5bSquare1 => "s5bsq1",
            Self::S5bSquare2 => "s5bsq2",
            Self::S5bSquare3 => "s5bsq3",
        }
    }

    /// Expansion chip owning the channel, `None` for the 2A03
    pub fn expansion(&self) -> Option<Expansion> {
        match self {
            Self::Square1 | Self::Square2 | Self::Triangle | Self::Noise | Self::Dpcm => None,
            Self::Vrc6Square1 | Self::Vrc6Square2 | Self::Vrc6Saw => Some(Expansion::Vrc6),
            Self::Vrc7Fm1
            | Self::Vrc7Fm2
            | Self::Vrc7Fm3
            | Self::Vrc7Fm4
            | Self::Vrc7Fm5
            | Self::Vrc7Fm6 => Some(Expansion::Vrc7),
            Self::FdsWave => Some(Expansion::Fds),
            Self::Mmc5Square1 | Self::Mmc5Square2 => Some(Expansion::Mmc5),
            Self::N163Wave1
            | Self::N163Wave2
            | Self::N163Wave3
            | Self::N163Wave4
            | Self::N163Wave5
            | Self::N163Wave6
            | Self::N163Wave7
            | Self::N163Wave8 => Some(Expansion::N163),
            Self::S5bSquare1 | Self::S5bSquare2 | Self::S5bSquare3 => Some(Expansion::S5b),
        }
    }

    /// Index of an N163 channel (0-based), used to check the configured channel count
    pub fn n163_index(&self) -> Option<usize> {
        match self {
            Self::N163Wave1 => Some(0),
            Self::N163Wave2 => Some(1),
            Self::N163Wave3 => Some(2),
            Self::N163Wave4 => Some(3),
            Self::N163Wave5 => Some(4),
            Self::N163Wave6 => Some(5),
            Self::N163Wave7 => Some(6),
            Self::N163Wave8 => Some(7),
            _ => None,
        }
    }

    pub fn is_vrc7(&self) -> bool {
        self.expansion() == Some(Expansion::Vrc7)
    }

    pub fn supports_volume(&self) -> bool {
        !matches!(self, Self::Triangle | Self::Dpcm)
    }

    pub fn supports_duty(&self) -> bool {
        matches!(
            self,
            Self::Square1
                | Self::Square2
                | Self::Noise
                | Self::Vrc6Square1
                | Self::Vrc6Square2
                | Self::Mmc5Square1
                | Self::Mmc5Square2
        )
    }

    pub fn supports_slide(&self) -> bool {
        self.pitch_profile() != PitchProfile::None
    }

    pub fn supports_arpeggio(&self) -> bool {
        !matches!(self, Self::Dpcm)
    }

    pub fn supports_vibrato(&self) -> bool {
        !matches!(self, Self::Dpcm | Self::Noise)
    }

    pub fn supports_fine_pitch(&self) -> bool {
        !matches!(self, Self::Dpcm | Self::Noise)
    }

    pub fn supports_fds_modulation(&self) -> bool {
        matches!(self, Self::FdsWave)
    }

    pub fn supports_delta_counter(&self) -> bool {
        matches!(self, Self::Dpcm)
    }

    pub fn pitch_profile(&self) -> PitchProfile {
        match self {
            Self::Noise | Self::Dpcm => PitchProfile::None,
            Self::Vrc6Saw => PitchProfile::SawPeriod,
            Self::FdsWave => PitchProfile::Frequency,
            _ if self.is_vrc7() || self.n163_index().is_some() => PitchProfile::Frequency,
            _ => PitchProfile::ApuPeriod,
        }
    }

    /// Instrument table the channel's instrument opcodes index into.
    /// DPCM notes select samples through the mapping table instead.
    pub fn instrument_table(&self) -> Option<InstrumentTable> {
        match self.expansion() {
            _ if *self == Self::Dpcm => None,
            None | Some(Expansion::Mmc5) => Some(InstrumentTable::Primary),
            Some(_) => Some(InstrumentTable::Extended),
        }
    }

    /// Canonical channel order of the driver: 2A03 first, then expansions.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Square1,
            Self::Square2,
            Self::Triangle,
            Self::Noise,
            Self::Dpcm,
            Self::Vrc6Square1,
            Self::Vrc6Square2,
            Self::Vrc6Saw,
            Self::Vrc7Fm1,
            Self::Vrc7Fm2,
            Self::Vrc7Fm3,
            Self::Vrc7Fm4,
            Self::Vrc7Fm5,
            Self::Vrc7Fm6,
            Self::FdsWave,
            Self::Mmc5Square1,
            Self::Mmc5Square2,
            Self::N163Wave1,
            Self::N163Wave2,
            Self::N163Wave3,
            Self::N163Wave4,
            Self::N163Wave5,
            Self::N163Wave6,
            Self::N163Wave7,
            Self::N163Wave8,
            Self::S5bSquare1,
            Self::S5bSquare2,
            Self::S5bSquare3,
        ]
        .into_iter()
    }
}
