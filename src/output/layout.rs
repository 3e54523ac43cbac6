//! Table layout of a compiled score
//!
//! Order of the music segment: header, song records, instrument tables,
//! sample mapping table, envelopes, grooves, waveforms, channel streams.
//! DPCM samples follow in their own segment.

use super::{AsmBuilder, Segment, Word};
use crate::compiler::diagnostics::{CompileLog, WarningKind};
use crate::compiler::envelope::{EnvelopeTable, UniqueTable};
use crate::compiler::instruments::{InstrumentData, InstrumentSlots};
use crate::compiler::kernel::{Kernel, NOTE_WINDOW};
use crate::compiler::labels::Labels;
use crate::compiler::token::{Symbols, Token};
use crate::compiler::waveform::{InstrumentWaves, WaveTables};
use crate::error::{Error, Result};
use crate::project::{ChannelKind, InstrumentKind, Machine, Project, TempoMode};
use std::collections::BTreeSet;

/// Header field offsets (in bytes)
pub mod header {
    pub const SONG_COUNT: usize = 0x00;
    pub const EXPANSIONS: usize = 0x01;
    pub const MACHINE: usize = 0x02;
    pub const N163_CHANNELS: usize = 0x03;
    pub const CHANNEL_COUNT: usize = 0x04;
    pub const TEMPO_MODE: usize = 0x05;
    pub const INSTRUMENTS: usize = 0x06;
    pub const EXTENDED_INSTRUMENTS: usize = 0x08;
    pub const SAMPLES: usize = 0x0A;
    /// Song record pointers follow the fixed fields
    pub const SONGS: usize = 0x0C;
}

/// Bytes per primary instrument record: four curve pointers, duty init, padding
pub const PRIMARY_RECORD_SIZE: usize = 10;

/// Bytes per extended instrument record
pub const EXTENDED_RECORD_SIZE: usize = 16;

/// Bytes per sample mapping entry: rate/loop flags, address, length, padding
pub const SAMPLE_ENTRY_SIZE: usize = 4;

/// DPCM data must start on 64-byte boundaries
pub const DPCM_ALIGNMENT: usize = 64;

/// Longest sample the length register can describe
pub const MAX_SAMPLE_LENGTH: usize = 0xFF * 16 + 1;

/// Address the DPCM address register counts from
pub const DPCM_REGISTER_BASE: u16 = 0xC000;

/// Compiled stream of one channel
#[derive(Debug, Clone)]
pub struct ChannelStream {
    pub kind: ChannelKind,
    pub tokens: Vec<Token>,
}

/// Compiled song
#[derive(Debug, Clone)]
pub struct SongData {
    /// Index of the song in the project
    pub index: usize,
    pub name: String,
    pub speed: u8,
    pub tempo: u16,
    /// Groove table index in groove tempo mode
    pub groove: Option<usize>,
    pub streams: Vec<ChannelStream>,
}

/// Sample data padded to a length the driver can play
pub fn padded_sample(data: &[u8]) -> Vec<u8> {
    let mut bytes = data[..data.len().min(MAX_SAMPLE_LENGTH)].to_vec();
    while bytes.is_empty() || bytes.len() % 16 != 1 {
        bytes.push(0x55);
    }
    bytes
}

/// Reject a DPCM segment the address register cannot reach; samples the
/// length register cannot describe are cut with a warning
pub fn check_samples(project: &Project, dpcm_base: u16, log: &mut CompileLog) -> Result<()> {
    if project.samples.is_empty() {
        return Ok(());
    }
    if dpcm_base < DPCM_REGISTER_BASE || usize::from(dpcm_base) % DPCM_ALIGNMENT != 0 {
        return Err(Error::InvalidSampleBase(dpcm_base));
    }

    let register_offset = usize::from(dpcm_base - DPCM_REGISTER_BASE);
    for (sample, offset) in project.samples.iter().zip(sample_offsets(project)) {
        if (register_offset + offset) / DPCM_ALIGNMENT > 0xFF {
            return Err(Error::AddressOverflow("DPCM"));
        }
        if sample.data.len() > MAX_SAMPLE_LENGTH {
            log.warn(
                WarningKind::TableOverflow,
                format!(
                    "Sample '{}' is {} bytes, cut to {}",
                    sample.name,
                    sample.data.len(),
                    MAX_SAMPLE_LENGTH
                ),
            );
        }
    }
    Ok(())
}

/// Offset of every sample in the DPCM segment
pub fn sample_offsets(project: &Project) -> Vec<usize> {
    let mut offset: usize = 0;
    project
        .samples
        .iter()
        .map(|sample| {
            offset = offset.next_multiple_of(DPCM_ALIGNMENT);
            let start = offset;
            offset += padded_sample(&sample.data).len();
            start
        })
        .collect()
}

/// Inputs of the layout pass
pub struct Layout<'a> {
    pub project: &'a Project,
    pub kernel: Kernel,
    pub machine: Machine,
    pub labels: &'a Labels,
    pub symbols: &'a Symbols,
    pub envelopes: &'a EnvelopeTable,
    pub grooves: &'a UniqueTable,
    pub waves: &'a WaveTables,
    pub slots: &'a InstrumentSlots,
    /// Data of every instrument with its own slot, by instrument index
    pub instruments: &'a [Option<InstrumentData>],
    pub channels: &'a [ChannelKind],
    pub data_base: u16,
    pub dpcm_base: u16,
}

impl Layout<'_> {
    pub fn build(&self, songs: &[SongData]) -> AsmBuilder {
        let mut asm = AsmBuilder::new();
        asm.comment(format!(
            "{} ({} kernel)",
            self.project.name,
            self.kernel.name()
        ));
        asm.segment(Segment::Music, self.data_base);

        self.header(&mut asm, songs);
        self.song_records(&mut asm, songs);
        self.instrument_tables(&mut asm);
        self.sample_table(&mut asm);
        self.curves(&mut asm);
        for song in songs {
            for stream in &song.streams {
                self.stream(&mut asm, song.index, stream);
            }
        }
        self.samples(&mut asm);
        asm
    }

    fn header(&self, asm: &mut AsmBuilder, songs: &[SongData]) {
        let labels = self.labels;
        let expansions = self
            .project
            .expansions
            .iter()
            .fold(0, |mask, exp| mask | exp.mask_bit());
        let machine = match self.machine {
            Machine::Ntsc => 0,
            Machine::Pal => 1,
            Machine::Dual => 2,
        };
        let n163_channels = if self.channels.iter().any(|c| c.n163_index().is_some()) {
            self.project.n163_channels as u8
        } else {
            0
        };
        let tempo_mode = match self.project.tempo_mode {
            TempoMode::FamiTracker => 0,
            TempoMode::Groove => 1,
        };

        asm.label(labels.header());
        asm.bytes(&[
            songs.len() as u8,
            expansions,
            machine,
            n163_channels,
            self.channels.len() as u8,
            tempo_mode,
        ]);
        asm.words(vec![
            Word::Label(labels.instruments()),
            Word::Label(labels.extended_instruments()),
            Word::Label(labels.sample_table()),
        ]);
        asm.words(
            songs
                .iter()
                .map(|song| Word::Label(labels.song(song.index)))
                .collect(),
        );
    }

    fn song_records(&self, asm: &mut AsmBuilder, songs: &[SongData]) {
        for song in songs {
            asm.blank();
            asm.comment(format!("Song: {}", song.name));
            asm.label(self.labels.song(song.index));
            asm.words(
                song.streams
                    .iter()
                    .map(|s| Word::Label(self.labels.stream(song.index, s.kind.short_name())))
                    .collect(),
            );
            asm.byte(song.speed);
            match song.groove {
                Some(groove) => asm.word_label(self.labels.groove(groove)),
                None => asm.word(song.tempo),
            }
        }
    }

    fn curve_words(&self, data: &InstrumentData, fourth: Word) -> Vec<Word> {
        let env = |index| Word::Label(self.labels.envelope(index));
        vec![
            env(data.envelopes.volume),
            env(data.envelopes.arpeggio),
            env(data.envelopes.pitch),
            fourth,
        ]
    }

    fn instrument_tables(&self, asm: &mut AsmBuilder) {
        let labels = self.labels;

        asm.blank();
        asm.label(labels.instruments());
        for &index in &self.slots.primary {
            let Some(data) = &self.instruments[index] else {
                continue;
            };
            asm.comment(self.project.instruments[index].name.clone());
            let duty = Word::Label(labels.envelope(data.envelopes.duty));
            asm.words(self.curve_words(data, duty));
            asm.bytes(&[data.envelopes.duty_init, 0]);
        }

        asm.blank();
        asm.label(labels.extended_instruments());
        for &index in &self.slots.extended {
            let Some(data) = &self.instruments[index] else {
                continue;
            };
            let instrument = &self.project.instruments[index];
            asm.comment(instrument.name.clone());

            match (&instrument.kind, data.waves) {
                (InstrumentKind::Vrc7 { patch, regs }, _) => {
                    let mut words = self.curve_words(data, Word::Value(0));
                    words.pop();
                    asm.words(words);
                    asm.bytes(&[*patch, 0]);
                    asm.bytes(regs);
                }
                (
                    InstrumentKind::Fds {
                        mod_speed,
                        mod_depth,
                        mod_delay,
                    },
                    InstrumentWaves::Fds { wave, modulation },
                ) => {
                    asm.words(self.curve_words(data, Word::Label(labels.fds_wave(wave))));
                    asm.words(vec![
                        Word::Label(labels.fds_mod(modulation)),
                        Word::Value(*mod_speed),
                    ]);
                    asm.bytes(&[*mod_depth, *mod_delay, 0, 0]);
                }
                (
                    InstrumentKind::N163 {
                        wave_pos,
                        wave_size,
                    },
                    InstrumentWaves::N163 { wave },
                ) => {
                    asm.words(self.curve_words(data, Word::Label(labels.n163_wave(wave))));
                    asm.bytes(&[*wave_pos, *wave_size, 0, 0, 0, 0, 0, 0]);
                }
                _ => {
                    let duty = Word::Label(labels.envelope(data.envelopes.duty));
                    asm.words(self.curve_words(data, duty));
                    asm.bytes(&[data.envelopes.duty_init, 0, 0, 0, 0, 0, 0, 0]);
                }
            }
        }
    }

    fn sample_table(&self, asm: &mut AsmBuilder) {
        let offsets = sample_offsets(self.project);
        // base and addresses are validated by check_samples
        let register_offset = usize::from(self.dpcm_base.wrapping_sub(DPCM_REGISTER_BASE));

        asm.blank();
        asm.label(self.labels.sample_table());
        for mapping in self
            .project
            .sample_mappings
            .iter()
            .take(usize::from(NOTE_WINDOW))
        {
            let Some(sample) = self.project.samples.get(mapping.sample) else {
                continue;
            };
            let length = padded_sample(&sample.data).len();
            let flags = (mapping.pitch & 0x0F) | if mapping.looping { 0x40 } else { 0 };
            let address = (register_offset + offsets[mapping.sample]) / DPCM_ALIGNMENT;
            asm.bytes(&[flags, address as u8, ((length - 1) / 16) as u8, 0]);
        }
    }

    fn curves(&self, asm: &mut AsmBuilder) {
        let labels = self.labels;

        asm.blank();
        asm.comment("Envelopes");
        for (index, bytes) in self.envelopes.iter().enumerate() {
            asm.label(labels.envelope(index));
            asm.bytes(bytes);
        }

        if !self.grooves.is_empty() {
            asm.blank();
            asm.comment("Grooves");
            for (index, bytes) in self.grooves.iter().enumerate() {
                asm.label(labels.groove(index));
                asm.bytes(bytes);
            }
        }

        let tables: [(&UniqueTable, fn(&Labels, usize) -> String); 3] = [
            (&self.waves.fds_waves, Labels::fds_wave),
            (&self.waves.fds_mods, Labels::fds_mod),
            (&self.waves.n163_waves, Labels::n163_wave),
        ];
        for (table, label) in tables {
            for (index, bytes) in table.iter().enumerate() {
                asm.label(label(labels, index));
                asm.bytes(bytes);
            }
        }
    }

    /// Channel stream; back-reference targets get their own labels
    fn stream(&self, asm: &mut AsmBuilder, song: usize, stream: &ChannelStream) {
        let channel = stream.kind.short_name();
        let targets: BTreeSet<usize> = stream
            .tokens
            .iter()
            .filter_map(|t| match t {
                Token::LocalRef(target) => Some(*target as usize),
                _ => None,
            })
            .collect();

        asm.blank();
        asm.label(self.labels.stream(song, channel));

        let mut bytes = Vec::new();
        let flush = |asm: &mut AsmBuilder, bytes: &mut Vec<u8>| {
            if !bytes.is_empty() {
                asm.bytes(bytes);
                bytes.clear();
            }
        };

        for (offset, token) in stream.tokens.iter().enumerate() {
            if targets.contains(&offset) {
                flush(asm, &mut bytes);
                asm.label(self.labels.stream_ref(song, channel, offset));
            }
            match *token {
                Token::Byte(b) | Token::Opcode(b) | Token::Note(b) => bytes.push(b),
                Token::Label(symbol) => {
                    flush(asm, &mut bytes);
                    asm.label(self.symbols.name(symbol));
                }
                Token::Ref(symbol) => {
                    flush(asm, &mut bytes);
                    asm.word_label(self.symbols.name(symbol));
                }
                Token::LocalRef(target) => {
                    flush(asm, &mut bytes);
                    asm.word_label(self.labels.stream_ref(song, channel, target as usize));
                }
            }
        }
        flush(asm, &mut bytes);
    }

    fn samples(&self, asm: &mut AsmBuilder) {
        if self.project.samples.is_empty() {
            return;
        }
        asm.blank();
        asm.segment(Segment::Samples, self.dpcm_base);
        for (index, sample) in self.project.samples.iter().enumerate() {
            asm.align(DPCM_ALIGNMENT);
            asm.label(self.labels.dpcm_sample(index));
            asm.bytes(&padded_sample(&sample.data));
        }
    }
}
