//! Instruments, arpeggios and DPCM samples

use super::channel::{ChannelKind, Expansion};
use super::envelope::{Envelope, EnvelopeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hardware variant of an instrument, with its variant-specific fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentKind {
    Apu,
    Vrc6,
    Vrc7 {
        /// Built-in patch number, 0 selects the custom patch
        patch: u8,
        /// Custom patch registers (used when `patch` is 0)
        #[serde(default)]
        regs: [u8; 8],
    },
    Fds {
        #[serde(default)]
        mod_speed: u16,
        #[serde(default)]
        mod_depth: u8,
        #[serde(default)]
        mod_delay: u8,
    },
    Mmc5,
    N163 {
        /// Position of the waveform in N163 RAM (in samples)
        wave_pos: u8,
        /// Waveform size (in samples)
        wave_size: u8,
    },
    S5b,
}

impl InstrumentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Apu => "2A03",
            Self::Vrc6 => "VRC6",
            Self::Vrc7 { .. } => "VRC7",
            Self::Fds { .. } => "FDS",
            Self::Mmc5 => "MMC5",
            Self::N163 { .. } => "N163",
            Self::S5b => "S5B",
        }
    }

    pub fn expansion(&self) -> Option<Expansion> {
        match self {
            Self::Apu => None,
            Self::Vrc6 => Some(Expansion::Vrc6),
            Self::Vrc7 { .. } => Some(Expansion::Vrc7),
            Self::Fds { .. } => Some(Expansion::Fds),
            Self::Mmc5 => Some(Expansion::Mmc5),
            Self::N163 { .. } => Some(Expansion::N163),
            Self::S5b => Some(Expansion::S5b),
        }
    }

    /// Whether notes on `channel` can use an instrument of this kind
    pub fn fits_channel(&self, channel: ChannelKind) -> bool {
        channel != ChannelKind::Dpcm && self.expansion() == channel.expansion()
    }

    /// VRC7 instrument using the shared custom patch
    pub fn is_vrc7_custom(&self) -> bool {
        matches!(self, Self::Vrc7 { patch: 0, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub envelopes: BTreeMap<EnvelopeKind, Envelope>,
}

impl Instrument {
    pub fn new(name: &str, kind: InstrumentKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            envelopes: BTreeMap::new(),
        }
    }

    pub fn with_envelope(mut self, kind: EnvelopeKind, envelope: Envelope) -> Self {
        self.envelopes.insert(kind, envelope);
        self
    }

    pub fn envelope(&self, kind: EnvelopeKind) -> Option<&Envelope> {
        self.envelopes.get(&kind)
    }
}

/// A named arpeggio curve shared between instruments and notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arpeggio {
    pub name: String,
    pub envelope: Envelope,
}

/// Raw 1-bit delta modulation sample data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpcmSample {
    pub name: String,
    pub data: Vec<u8>,
}

/// Maps a note on the DPCM channel to a sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMapping {
    pub note: u8,
    pub sample: usize,
    /// Playback rate index (0..15)
    #[serde(default = "default_sample_pitch")]
    pub pitch: u8,
    #[serde(default)]
    pub looping: bool,
}

fn default_sample_pitch() -> u8 {
    15
}
