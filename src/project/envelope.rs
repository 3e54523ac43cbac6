//! Envelope (curve) definitions

use serde::{Deserialize, Serialize};

/// Envelope slot types an instrument can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Volume,
    Arpeggio,
    Pitch,
    DutyCycle,
    FdsWaveform,
    FdsModulation,
    N163Waveform,
}

impl EnvelopeKind {
    /// Envelopes that are run-length encoded into the shared envelope table.
    /// The remaining kinds are packed into waveform sub-tables.
    pub fn is_curve(&self) -> bool {
        matches!(
            self,
            Self::Volume | Self::Arpeggio | Self::Pitch | Self::DutyCycle
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Arpeggio => "arpeggio",
            Self::Pitch => "pitch",
            Self::DutyCycle => "duty",
            Self::FdsWaveform => "fds waveform",
            Self::FdsModulation => "fds modulation",
            Self::N163Waveform => "n163 waveform",
        }
    }
}

/// A per-tick sequence of control values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Values, one per frame
    pub values: Vec<i8>,
    /// Loop start index
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_point: Option<usize>,
    /// Release index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<usize>,
    /// Values are deltas rather than absolute levels
    #[serde(default)]
    pub relative: bool,
}

impl Envelope {
    pub fn new(values: Vec<i8>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn with_loop(mut self, index: usize) -> Self {
        self.loop_point = Some(index);
        self
    }

    pub fn with_release(mut self, index: usize) -> Self {
        self.release = Some(index);
        self
    }

    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Loop point actually used by the driver.
    ///
    /// A release always implies a loop: with no loop the sustain holds on the
    /// frame just before the release, and a loop at or past the release is
    /// pulled back to that frame.
    pub fn effective_loop(&self) -> Option<usize> {
        match (self.loop_point, self.effective_release()) {
            (Some(l), Some(r)) if l >= r => Some(r - 1),
            (None, Some(r)) => Some(r - 1),
            (l, _) => l,
        }
    }

    /// Release index, ignoring a release on the first frame (nothing to sustain)
    pub fn effective_release(&self) -> Option<usize> {
        self.release.filter(|&r| r > 0)
    }

    /// Check the loop/release invariants against the length
    pub fn is_well_formed(&self) -> bool {
        let len = self.values.len();
        len > 0
            && self.loop_point.map_or(true, |l| l < len)
            && self.release.map_or(true, |r| r < len)
    }
}
