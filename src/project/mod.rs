//! Music project model consumed by the compiler
//!
//! The project arrives fully populated; the compiler only reads it.

pub mod channel;
pub mod envelope;
pub mod instrument;

pub use channel::{ChannelKind, Expansion, InstrumentTable, PitchProfile};
pub use envelope::{Envelope, EnvelopeKind};
pub use instrument::{Arpeggio, DpcmSample, Instrument, InstrumentKind, SampleMapping};

use crate::error::Result;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

/// Lowest and highest playable note values
pub const NOTE_MIN: u8 = 1;
pub const NOTE_MAX: u8 = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoMode {
    /// Speed/tempo integers
    #[default]
    FamiTracker,
    /// Per-row frame counts cycled from a groove
    Groove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Machine {
    #[default]
    Ntsc,
    Pal,
    /// Hardware agnostic: data must play acceptably on both
    Dual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub expansions: BTreeSet<Expansion>,
    /// Number of active N163 channels
    #[serde(default = "default_n163_channels")]
    pub n163_channels: usize,
    #[serde(default)]
    pub tempo_mode: TempoMode,
    #[serde(default)]
    pub machine: Machine,
    #[serde(default)]
    pub instruments: Vec<Instrument>,
    #[serde(default)]
    pub arpeggios: Vec<Arpeggio>,
    #[serde(default)]
    pub samples: Vec<DpcmSample>,
    #[serde(default)]
    pub sample_mappings: Vec<SampleMapping>,
    #[serde(default)]
    pub songs: Vec<Song>,
}

fn default_n163_channels() -> usize {
    1
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            expansions: BTreeSet::new(),
            n163_channels: default_n163_channels(),
            tempo_mode: TempoMode::default(),
            machine: Machine::default(),
            instruments: Vec::new(),
            arpeggios: Vec::new(),
            samples: Vec::new(),
            sample_mappings: Vec::new(),
            songs: Vec::new(),
        }
    }

    pub fn uses_expansion(&self, expansion: Expansion) -> bool {
        self.expansions.contains(&expansion)
    }

    /// Whether the project's hardware configuration has this channel
    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        match (kind.expansion(), kind.n163_index()) {
            (None, _) => true,
            (Some(_), Some(index)) => {
                self.uses_expansion(Expansion::N163) && index < self.n163_channels
            }
            (Some(exp), None) => self.uses_expansion(exp),
        }
    }

    /// Parse a project from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a project file, transparently decompressing gzip data
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        // Check for gzip magic (0x1f 0x8b) regardless of extension
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            let mut decoder = GzDecoder::new(Cursor::new(data));
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            data = decompressed;
        }

        Ok(serde_json::from_slice(&data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    /// Number of positions in the order list
    pub length: usize,
    /// Default number of rows per pattern
    pub pattern_length: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub position_overrides: Vec<PositionOverride>,
    /// Position the song loops back to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_point: Option<usize>,
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default = "default_tempo")]
    pub tempo: u16,
    #[serde(default = "default_groove")]
    pub groove: Vec<u8>,
    pub channels: Vec<ChannelTrack>,
}

fn default_speed() -> u8 {
    6
}

fn default_tempo() -> u16 {
    150
}

fn default_groove() -> Vec<u8> {
    vec![6]
}

impl Song {
    pub fn new(name: &str, length: usize, pattern_length: usize) -> Self {
        Self {
            name: name.to_string(),
            length,
            pattern_length,
            position_overrides: Vec::new(),
            loop_point: Some(0),
            speed: default_speed(),
            tempo: default_tempo(),
            groove: default_groove(),
            channels: Vec::new(),
        }
    }

    fn position_override(&self, position: usize) -> Option<&PositionOverride> {
        self.position_overrides
            .iter()
            .find(|o| o.position == position)
    }

    /// Number of rows at a position
    pub fn position_length(&self, position: usize) -> usize {
        self.position_override(position)
            .and_then(|o| o.length)
            .unwrap_or(self.pattern_length)
    }

    /// Groove override starting at a position
    pub fn position_groove(&self, position: usize) -> Option<&[u8]> {
        self.position_override(position)
            .and_then(|o| o.groove.as_deref())
    }

    /// Groove in effect at a position (last override at or before it)
    pub fn groove_at(&self, position: usize) -> &[u8] {
        (0..=position)
            .rev()
            .find_map(|p| self.position_groove(p))
            .unwrap_or(&self.groove)
    }

    pub fn track(&self, kind: ChannelKind) -> Option<&ChannelTrack> {
        self.channels.iter().find(|t| t.kind == kind)
    }
}

/// Custom length and/or groove for one position of the order list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOverride {
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groove: Option<Vec<u8>>,
}

/// Patterns and order list of one channel in a song
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTrack {
    pub kind: ChannelKind,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    /// Pattern index played at each position (none = silence)
    #[serde(default)]
    pub order: Vec<Option<usize>>,
}

impl ChannelTrack {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            patterns: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn pattern_at(&self, position: usize) -> Option<usize> {
        self.order.get(position).copied().flatten()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Pattern {
    pub fn new(notes: Vec<Note>) -> Self {
        Self { notes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteValue {
    Pitch(u8),
    Stop,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vibrato {
    pub speed: u8,
    pub depth: u8,
}

/// One cell of a pattern. Every attribute is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub row: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<NoteValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<usize>,
    /// Arpeggio played with a pitched note (none = no arpeggio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arpeggio: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_pitch: Option<i8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_to: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duty: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_delay: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_delay: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_counter: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fds_mod_speed: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fds_mod_depth: Option<u8>,
}

impl Note {
    pub fn pitch(row: usize, value: u8, instrument: usize) -> Self {
        Self {
            row,
            value: Some(NoteValue::Pitch(value)),
            instrument: Some(instrument),
            ..Self::default()
        }
    }

    pub fn stop(row: usize) -> Self {
        Self {
            row,
            value: Some(NoteValue::Stop),
            ..Self::default()
        }
    }

    pub fn release(row: usize) -> Self {
        Self {
            row,
            value: Some(NoteValue::Release),
            ..Self::default()
        }
    }

    /// A note with no value and no attribute plays nothing
    pub fn is_empty(&self) -> bool {
        *self
            == Self {
                row: self.row,
                ..Self::default()
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_project() {
        let json = r#"{
            "name": "demo",
            "instruments": [{ "name": "lead", "kind": { "type": "apu" },
                "envelopes": { "volume": { "values": [15, 12, 8], "loop": 2 } } }],
            "songs": [{
                "name": "intro", "length": 1, "pattern_length": 16,
                "channels": [{ "kind": "square1",
                    "patterns": [{ "notes": [{ "row": 0, "value": { "pitch": 37 }, "instrument": 0 }] }],
                    "order": [0] }]
            }]
        }"#;
        let project = Project::from_json(json).unwrap();
        assert_eq!(project.songs[0].speed, 6);
        assert_eq!(project.songs[0].channels[0].pattern_at(0), Some(0));
        let env = project.instruments[0].envelope(EnvelopeKind::Volume).unwrap();
        assert_eq!(env.loop_point, Some(2));
        assert_eq!(
            project.songs[0].channels[0].patterns[0].notes[0].value,
            Some(NoteValue::Pitch(37))
        );
    }

    #[test]
    fn test_position_overrides() {
        let mut song = Song::new("s", 4, 64);
        song.position_overrides.push(PositionOverride {
            position: 2,
            length: Some(32),
            groove: Some(vec![5, 6]),
        });
        assert_eq!(song.position_length(1), 64);
        assert_eq!(song.position_length(2), 32);
        assert_eq!(song.groove_at(1), &[6]);
        assert_eq!(song.groove_at(3), &[5, 6]);
    }

    #[test]
    fn test_has_channel() {
        let mut project = Project::new("p");
        assert!(project.has_channel(ChannelKind::Dpcm));
        assert!(!project.has_channel(ChannelKind::N163Wave1));
        project.expansions.insert(Expansion::N163);
        project.n163_channels = 2;
        assert!(project.has_channel(ChannelKind::N163Wave2));
        assert!(!project.has_channel(ChannelKind::N163Wave3));
    }
}
