//! Score compiler - turns a project into driver music data
//!
//! One `compile` call owns every derived table. Songs are generated channel
//! by channel, each stream is compressed on its own, and the result is laid
//! out once and serialized as assembler text and as binary.

pub mod channel;
pub mod compress;
pub mod decode;
pub mod diagnostics;
pub mod envelope;
pub mod instruments;
pub mod kernel;
pub mod labels;
pub mod pitch;
pub mod token;
pub mod waveform;

use crate::error::{Error, Result};
use crate::output::assembler::assemble;
use crate::output::layout::{
    check_samples, padded_sample, ChannelStream, Layout, SongData, EXTENDED_RECORD_SIZE,
    PRIMARY_RECORD_SIZE, SAMPLE_ENTRY_SIZE,
};
use crate::output::report::{ChannelReport, CompileReport, SongReport, TableReport, TableSize};
use crate::output::Dialect;
use crate::project::{ChannelKind, EnvelopeKind, Expansion, Machine, Project, TempoMode};
use channel::{ChannelGenerator, ChannelJob, PatchTimeline, SharedTables};
use compress::{compress, compress_best, reference_count, THRESHOLDS};
use diagnostics::{Warning, WarningKind};
use instruments::{InstrumentData, InstrumentEnvelopes, InstrumentSlots};
use kernel::{Kernel, NOTE_WINDOW};
use labels::Labels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use token::{byte_size, Token};
use waveform::WaveTables;

/// Default load address of the song data
pub const DEFAULT_DATA_BASE: u16 = 0x8000;

/// Default load address of the DPCM samples
pub const DEFAULT_DPCM_BASE: u16 = 0xC000;

/// Back-reference compression of channel streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Off,
    /// One minimum note count
    Fixed(usize),
    /// Try every minimum note count in the range, keep the smallest stream
    Sweep { min: usize, max: usize },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Sweep {
            min: *THRESHOLDS.start(),
            max: *THRESHOLDS.end(),
        }
    }
}

impl Compression {
    /// Compressed stream and the threshold used (0 when off)
    pub fn apply(&self, tokens: &[Token], kernel: Kernel) -> (Vec<Token>, usize) {
        match *self {
            Self::Off => (tokens.to_vec(), 0),
            Self::Fixed(threshold) => (compress(tokens, kernel, threshold), threshold),
            Self::Sweep { min, max } => compress_best(tokens, kernel, min..=max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub kernel: Kernel,
    pub dialect: Dialect,
    /// Prepended to every generated label
    pub label_prefix: String,
    /// Indices of the songs to compile (all songs when unset)
    pub songs: Option<Vec<usize>>,
    pub data_base: u16,
    pub dpcm_base: u16,
    pub compression: Compression,
    /// Overrides the project's machine
    pub machine: Option<Machine>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            kernel: Kernel::default(),
            dialect: Dialect::default(),
            label_prefix: String::new(),
            songs: None,
            data_base: DEFAULT_DATA_BASE,
            dpcm_base: DEFAULT_DPCM_BASE,
            compression: Compression::default(),
            machine: None,
        }
    }
}

impl CompileOptions {
    /// Read options from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Everything one compile produces
#[derive(Debug, Clone)]
pub struct CompiledScore {
    /// Assembler source
    pub text: String,
    /// Song data, loaded at `data_base`
    pub music: Vec<u8>,
    /// DPCM samples, loaded at `dpcm_base`
    pub samples: Vec<u8>,
    /// Address of every label
    pub symbols: BTreeMap<String, u16>,
    pub warnings: Vec<Warning>,
    pub report: CompileReport,
}

/// Main compiler entry point
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile a project file (JSON, optionally gzip compressed) and write
    /// the assembler text to `output`
    pub fn compile_file(&self, input: &Path, output: &Path) -> Result<CompiledScore> {
        let project = Project::load(input)?;
        let score = self.compile(&project)?;
        fs::write(output, &score.text)?;
        Ok(score)
    }

    pub fn compile(&self, project: &Project) -> Result<CompiledScore> {
        let kernel = self.options.kernel;
        let machine = self.options.machine.unwrap_or(project.machine);

        if !kernel.allows_expansions() {
            if let Some(expansion) = project.expansions.iter().next() {
                return Err(Error::UnsupportedExpansion {
                    kernel: kernel.name(),
                    expansion: expansion.name(),
                });
            }
        }
        let songs = self.selected_songs(project)?;
        for mapping in &project.sample_mappings {
            if mapping.sample >= project.samples.len() {
                return Err(Error::MissingSample(mapping.sample));
            }
        }

        let labels = Labels::new(&self.options.label_prefix);
        let mut tables = SharedTables::new();
        check_samples(project, self.options.dpcm_base, &mut tables.log)?;
        let mut waves = WaveTables::new();

        let slots = InstrumentSlots::assign(project, kernel, &mut tables.log);
        let mut instruments: Vec<Option<InstrumentData>> = Vec::new();
        for (index, instrument) in project.instruments.iter().enumerate() {
            let data = match slots.slot(index) {
                Some(_) => Some(InstrumentData {
                    envelopes: InstrumentEnvelopes::process(
                        instrument,
                        kernel,
                        &mut tables.envelopes,
                        &mut tables.log,
                    ),
                    waves: waves.add(instrument, &mut tables.log),
                }),
                None => None,
            };
            instruments.push(data);
        }

        let mut arpeggios = Vec::new();
        for arpeggio in &project.arpeggios {
            arpeggios.push(tables.envelopes.add(
                Some(&arpeggio.envelope),
                EnvelopeKind::Arpeggio,
                kernel,
                &mut tables.log,
            ));
        }

        let channels: Vec<ChannelKind> = ChannelKind::all()
            .filter(|k| project.has_channel(*k))
            .collect();

        let mut song_data = Vec::new();
        let mut song_reports = Vec::new();
        for &index in &songs {
            let song = &project.songs[index];
            check_tracks(project, index, &mut tables)?;

            let patches = if project.uses_expansion(Expansion::Vrc7) {
                Some(PatchTimeline::build(project, song, &mut tables.log)?)
            } else {
                None
            };

            let mut generator = ChannelGenerator {
                project,
                kernel,
                machine,
                labels: &labels,
                slots: &slots,
                arpeggios: &arpeggios,
                tables: &mut tables,
            };

            let mut streams = Vec::new();
            let mut reports = Vec::new();
            for (position, &kind) in channels.iter().enumerate() {
                let job = ChannelJob {
                    song_index: index,
                    song,
                    kind,
                    speed_channel: position == 0,
                    patches: patches.as_ref(),
                };
                let raw = generator.generate(&job)?;
                let (tokens, threshold) = self.options.compression.apply(&raw, kernel);

                let report = ChannelReport {
                    channel: kind,
                    raw_bytes: byte_size(&raw),
                    compressed_bytes: byte_size(&tokens),
                    threshold,
                    references: reference_count(&tokens, kernel),
                    notes: decode::note_count(&raw),
                };
                log::debug!(
                    "song {} {}: {} -> {} bytes, {} references (threshold {})",
                    index,
                    kind.short_name(),
                    report.raw_bytes,
                    report.compressed_bytes,
                    report.references,
                    report.threshold
                );
                reports.push(report);
                streams.push(ChannelStream { kind, tokens });
            }

            let (speed, groove) = match project.tempo_mode {
                TempoMode::FamiTracker => (song.speed, None),
                TempoMode::Groove => (0, Some(tables.groove(&song.groove))),
            };
            song_data.push(SongData {
                index,
                name: song.name.clone(),
                speed,
                tempo: song.tempo,
                groove,
                streams,
            });
            song_reports.push(SongReport {
                index,
                name: song.name.clone(),
                channels: reports,
            });
        }

        let layout = Layout {
            project,
            kernel,
            machine,
            labels: &labels,
            symbols: &tables.symbols,
            envelopes: &tables.envelopes,
            grooves: &tables.grooves,
            waves: &waves,
            slots: &slots,
            instruments: &instruments,
            channels: &channels,
            data_base: self.options.data_base,
            dpcm_base: self.options.dpcm_base,
        };
        let asm = layout.build(&song_data);
        let text = asm.render(self.options.dialect);
        let assembled = assemble(asm.lines(), self.options.data_base)?;

        let tables_report = TableReport {
            primary_instruments: TableSize::new(
                slots.primary.len(),
                slots.primary.len() * PRIMARY_RECORD_SIZE,
            ),
            extended_instruments: TableSize::new(
                slots.extended.len(),
                slots.extended.len() * EXTENDED_RECORD_SIZE,
            ),
            sample_mappings: {
                let entries = project.sample_mappings.len().min(usize::from(NOTE_WINDOW));
                TableSize::new(entries, entries * SAMPLE_ENTRY_SIZE)
            },
            envelopes: TableSize::new(tables.envelopes.len(), tables.envelopes.total_bytes()),
            grooves: TableSize::new(tables.grooves.len(), tables.grooves.total_bytes()),
            fds_waves: TableSize::new(waves.fds_waves.len(), waves.fds_waves.total_bytes()),
            fds_modulations: TableSize::new(waves.fds_mods.len(), waves.fds_mods.total_bytes()),
            n163_waves: TableSize::new(waves.n163_waves.len(), waves.n163_waves.total_bytes()),
            samples: TableSize::new(
                project.samples.len(),
                project
                    .samples
                    .iter()
                    .map(|s| padded_sample(&s.data).len())
                    .sum(),
            ),
        };

        let warnings = tables.log.into_warnings();
        let report = CompileReport {
            kernel: kernel.name(),
            songs: song_reports,
            tables: tables_report,
            music_bytes: assembled.music.len(),
            sample_bytes: assembled.samples.len(),
            warnings: warnings.len(),
        };
        log::debug!(
            "compiled {} songs: {} music bytes, {} sample bytes, {} stream bytes saved",
            report.songs.len(),
            report.music_bytes,
            report.sample_bytes,
            report.saved_bytes()
        );

        Ok(CompiledScore {
            text,
            music: assembled.music,
            samples: assembled.samples,
            symbols: assembled.symbols,
            warnings,
            report,
        })
    }

    fn selected_songs(&self, project: &Project) -> Result<Vec<usize>> {
        let songs = match &self.options.songs {
            Some(songs) => {
                if let Some(&bad) = songs.iter().find(|&&s| s >= project.songs.len()) {
                    return Err(Error::InvalidSong(bad));
                }
                songs.clone()
            }
            None => (0..project.songs.len()).collect(),
        };
        if songs.is_empty() {
            return Err(Error::NoSongs);
        }
        Ok(songs)
    }
}

/// Reject notes on channels of disabled expansions; tracks on unused N163
/// channels are dropped with a warning
fn check_tracks(project: &Project, song: usize, tables: &mut SharedTables) -> Result<()> {
    let song = &project.songs[song];
    for track in &song.channels {
        if project.has_channel(track.kind) {
            continue;
        }
        let has_notes = track
            .patterns
            .iter()
            .any(|p| p.notes.iter().any(|n| !n.is_empty()));
        if !has_notes {
            continue;
        }
        match track.kind.expansion() {
            Some(expansion) if !project.uses_expansion(expansion) => {
                return Err(Error::ExpansionDisabled {
                    channel: track.kind.short_name(),
                    expansion: expansion.name(),
                });
            }
            _ => tables.log.warn(
                WarningKind::UnsupportedFeature,
                format!(
                    "Song '{}': channel {} is beyond the {} active N163 channels, ignored",
                    song.name,
                    track.kind.short_name(),
                    project.n163_channels
                ),
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ChannelTrack, Instrument, InstrumentKind, Note, Pattern, Song};

    fn one_note_project() -> Project {
        let mut project = Project::new("demo");
        project
            .instruments
            .push(Instrument::new("lead", InstrumentKind::Apu));
        let mut song = Song::new("intro", 1, 4);
        let mut track = ChannelTrack::new(ChannelKind::Square1);
        track.patterns.push(Pattern::new(vec![Note::pitch(0, 37, 0)]));
        track.order.push(Some(0));
        song.channels.push(track);
        project.songs.push(song);
        project
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: CompileOptions =
            serde_json::from_str(r#"{ "kernel": "classic", "compression": { "fixed": 12 } }"#)
                .unwrap();
        assert_eq!(options.kernel, Kernel::Classic);
        assert_eq!(options.compression, Compression::Fixed(12));
        assert_eq!(options.data_base, DEFAULT_DATA_BASE);
        assert_eq!(options.dpcm_base, DEFAULT_DPCM_BASE);
        assert_eq!(options.label_prefix, "");
    }

    #[test]
    fn test_default_compression_sweeps() {
        assert_eq!(
            Compression::default(),
            Compression::Sweep { min: 8, max: 40 }
        );
    }

    #[test]
    fn test_classic_kernel_rejects_expansions() {
        let mut project = one_note_project();
        project.expansions.insert(Expansion::Vrc6);
        let compiler = Compiler::with_options(CompileOptions {
            kernel: Kernel::Classic,
            ..CompileOptions::default()
        });
        assert!(matches!(
            compiler.compile(&project),
            Err(Error::UnsupportedExpansion { .. })
        ));
    }

    #[test]
    fn test_song_selection() {
        let project = one_note_project();
        let compiler = Compiler::with_options(CompileOptions {
            songs: Some(vec![3]),
            ..CompileOptions::default()
        });
        assert!(matches!(
            compiler.compile(&project),
            Err(Error::InvalidSong(3))
        ));

        let compiler = Compiler::with_options(CompileOptions {
            songs: Some(Vec::new()),
            ..CompileOptions::default()
        });
        assert!(matches!(compiler.compile(&project), Err(Error::NoSongs)));
    }

    #[test]
    fn test_disabled_expansion_track() {
        let mut project = one_note_project();
        let mut track = ChannelTrack::new(ChannelKind::Vrc6Saw);
        track.patterns.push(Pattern::new(vec![Note::stop(0)]));
        track.order.push(Some(0));
        project.songs[0].channels.push(track);
        assert!(matches!(
            Compiler::new().compile(&project),
            Err(Error::ExpansionDisabled {
                channel: "vrc6saw",
                ..
            })
        ));
    }

    #[test]
    fn test_compile_minimal_project() {
        let score = Compiler::new().compile(&one_note_project()).unwrap();
        assert_eq!(score.symbols["music_data"], DEFAULT_DATA_BASE);
        assert_eq!(score.music[0], 1);
        assert!(score.samples.is_empty());
        assert!(score.text.contains("song0_sq1:"));
        assert_eq!(score.report.songs[0].channels.len(), 5);
        assert!(score.warnings.is_empty());
    }
}
