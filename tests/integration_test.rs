//! Integration tests for score compilation
//!
//! These tests compile projects end to end and inspect the assembled binary
//! through the symbol table, the way a playback driver would read it.

use chipscore::compiler::kernel::Kernel;
use chipscore::compiler::{CompileOptions, CompiledScore, Compiler, Compression};
use chipscore::output::layout::header;
use chipscore::output::Dialect;
use chipscore::project::{
    ChannelKind, ChannelTrack, DpcmSample, Envelope, EnvelopeKind, Expansion, Instrument,
    InstrumentKind, Note, NoteValue, Pattern, Project, SampleMapping, Song, TempoMode,
};
use chipscore::Error;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use std::io::Write;
use tempfile::tempdir;

/// Project with one 2A03 instrument and the given square 1 notes
fn square_project(notes: Vec<Note>, rows: usize) -> Project {
    let mut project = Project::new("test");
    project
        .instruments
        .push(Instrument::new("lead", InstrumentKind::Apu));
    project.songs.push(song_with(ChannelKind::Square1, notes, rows));
    project
}

fn song_with(kind: ChannelKind, notes: Vec<Note>, rows: usize) -> Song {
    let mut song = Song::new("song", 1, rows);
    song.channels.push(track(kind, notes));
    song
}

fn track(kind: ChannelKind, notes: Vec<Note>) -> ChannelTrack {
    let mut track = ChannelTrack::new(kind);
    track.patterns.push(Pattern::new(notes));
    track.order.push(Some(0));
    track
}

fn compile(project: &Project) -> CompiledScore {
    Compiler::new().compile(project).expect("Compilation failed")
}

fn compile_with(project: &Project, options: CompileOptions) -> CompiledScore {
    Compiler::with_options(options)
        .compile(project)
        .expect("Compilation failed")
}

/// Address of a label
fn address(score: &CompiledScore, label: &str) -> u16 {
    *score
        .symbols
        .get(label)
        .unwrap_or_else(|| panic!("missing label {}", label))
}

/// Music bytes starting at a label
fn bytes_at<'a>(score: &'a CompiledScore, label: &str, len: usize) -> &'a [u8] {
    let start = usize::from(address(score, label) - 0x8000);
    &score.music[start..start + len]
}

/// Little-endian word at a byte offset from a label
fn word_at(score: &CompiledScore, label: &str, offset: usize) -> u16 {
    let bytes = bytes_at(score, label, offset + 2);
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn split(address: u16) -> [u8; 2] {
    address.to_le_bytes()
}

// =============================================================================
// Header and Song Records
// =============================================================================

#[test]
fn test_header_fields() {
    let score = compile(&square_project(vec![Note::pitch(0, 37, 0)], 16));

    assert_eq!(address(&score, "music_data"), 0x8000);
    assert_eq!(score.music[header::SONG_COUNT], 1);
    assert_eq!(score.music[header::EXPANSIONS], 0);
    assert_eq!(score.music[header::MACHINE], 0);
    assert_eq!(score.music[header::N163_CHANNELS], 0);
    assert_eq!(score.music[header::CHANNEL_COUNT], 5);
    assert_eq!(score.music[header::TEMPO_MODE], 0);

    assert_eq!(
        word_at(&score, "music_data", header::INSTRUMENTS),
        address(&score, "instruments")
    );
    assert_eq!(
        word_at(&score, "music_data", header::EXTENDED_INSTRUMENTS),
        address(&score, "extended_instruments")
    );
    assert_eq!(
        word_at(&score, "music_data", header::SAMPLES),
        address(&score, "samples")
    );
    assert_eq!(
        word_at(&score, "music_data", header::SONGS),
        address(&score, "song0")
    );
}

#[test]
fn test_song_record() {
    let score = compile(&square_project(vec![Note::pitch(0, 37, 0)], 16));

    let channels = ["sq1", "sq2", "tri", "noise", "dpcm"];
    for (i, channel) in channels.iter().enumerate() {
        assert_eq!(
            word_at(&score, "song0", i * 2),
            address(&score, &format!("song0_{}", channel)),
            "stream pointer of {}",
            channel
        );
    }
    // Speed byte, then the tempo word
    assert_eq!(bytes_at(&score, "song0", 11)[10], 6);
    assert_eq!(word_at(&score, "song0", 11), 150);
}

#[test]
fn test_song_selection() {
    let mut project = square_project(vec![Note::pitch(0, 37, 0)], 16);
    project
        .songs
        .push(song_with(ChannelKind::Triangle, vec![Note::pitch(0, 40, 0)], 8));

    let score = compile_with(
        &project,
        CompileOptions {
            songs: Some(vec![1]),
            ..CompileOptions::default()
        },
    );
    assert_eq!(score.music[header::SONG_COUNT], 1);
    assert!(score.symbols.contains_key("song1"));
    assert!(!score.symbols.contains_key("song0"));
    assert_eq!(score.report.songs.len(), 1);
    assert_eq!(score.report.songs[0].index, 1);
}

#[test]
fn test_invalid_song_selection() {
    let project = square_project(vec![], 16);
    let result = Compiler::with_options(CompileOptions {
        songs: Some(vec![2]),
        ..CompileOptions::default()
    })
    .compile(&project);
    assert!(matches!(result, Err(Error::InvalidSong(2))));
}

// =============================================================================
// Channel Streams
// =============================================================================

#[test]
fn test_long_silence_before_note() {
    let score = compile(&square_project(vec![Note::pitch(40, 37, 0)], 64));
    let [lo, hi] = split(address(&score, "song0_sq1"));

    // 40 empty rows, instrument 0, note 37, 23 empty rows, jump to the loop
    assert_eq!(
        bytes_at(&score, "song0_sq1", 7),
        &[0xCF, 0x80, 0x19, 0xAD, 0x44, lo, hi]
    );
    assert_eq!(
        address(&score, "song0_sq1_loop"),
        address(&score, "song0_sq1")
    );
}

#[test]
fn test_silent_channel_stream() {
    let score = compile(&square_project(vec![Note::pitch(0, 37, 0)], 64));
    let [lo, hi] = split(address(&score, "song0_tri"));
    assert_eq!(bytes_at(&score, "song0_tri", 4), &[0xFF, 0x44, lo, hi]);
}

#[test]
fn test_classic_kernel_stream() {
    let project = square_project(vec![Note::pitch(40, 37, 0)], 64);
    let score = compile_with(
        &project,
        CompileOptions {
            kernel: Kernel::Classic,
            ..CompileOptions::default()
        },
    );
    let [lo, hi] = split(address(&score, "song0_sq1"));

    // Empty rows are capped at 32 per instruction, notes are shifted left
    assert_eq!(
        bytes_at(&score, "song0_sq1", 8),
        &[0xBF, 0x8F, 0x80, 0x32, 0xAD, 0xC5, lo, hi]
    );
}

#[test]
fn test_song_without_loop_halts() {
    let mut project = square_project(vec![Note::pitch(0, 37, 0)], 2);
    project.songs[0].loop_point = None;
    let score = compile(&project);

    assert_eq!(bytes_at(&score, "song0_sq1", 4), &[0x80, 0x19, 0x81, 0x45]);
    assert!(!score.symbols.contains_key("song0_sq1_loop"));
}

#[test]
fn test_classic_kernel_rejects_expansions() {
    let mut project = square_project(vec![], 16);
    project.expansions.insert(Expansion::Fds);
    let result = Compiler::with_options(CompileOptions {
        kernel: Kernel::Classic,
        ..CompileOptions::default()
    })
    .compile(&project);
    assert!(matches!(
        result,
        Err(Error::UnsupportedExpansion {
            kernel: "classic",
            expansion: "FDS"
        })
    ));
}

#[test]
fn test_unknown_instrument_is_an_error() {
    let project = square_project(vec![Note::pitch(0, 37, 5)], 16);
    assert!(matches!(
        Compiler::new().compile(&project),
        Err(Error::MissingInstrument(5))
    ));
}

#[test]
fn test_clamped_volume_warns() {
    let note = Note {
        volume: Some(20),
        ..Note::pitch(0, 37, 0)
    };
    let score = compile(&square_project(vec![note], 16));
    assert_eq!(score.warnings.len(), 1);
    assert!(score.warnings[0].message.contains("Volume 20"));
    assert_eq!(score.report.warnings, 1);
}

// =============================================================================
// Back-Reference Compression
// =============================================================================

/// A 16-note phrase at rows 0 and 32 with different notes in between
fn repeated_phrase_project() -> Project {
    let mut notes = Vec::new();
    for row in 0..16 {
        notes.push(Note::pitch(row, 30 + row as u8, 0));
        notes.push(Note::pitch(row + 16, 60 + row as u8, 0));
        notes.push(Note::pitch(row + 32, 30 + row as u8, 0));
    }
    notes.sort_by_key(|n| n.row);
    square_project(notes, 64)
}

#[test]
fn test_repeated_phrase_is_referenced() {
    let project = repeated_phrase_project();
    let score = compile(&project);
    let channel = &score.report.songs[0].channels[0];

    assert_eq!(channel.channel, ChannelKind::Square1);
    assert_eq!(channel.references, 1);
    assert!(channel.compressed_bytes < channel.raw_bytes);
    assert!(score
        .symbols
        .keys()
        .any(|label| label.starts_with("song0_sq1_ref")));

    let plain = compile_with(
        &project,
        CompileOptions {
            compression: Compression::Off,
            ..CompileOptions::default()
        },
    );
    assert_eq!(plain.report.songs[0].channels[0].references, 0);
    assert!(plain.music.len() > score.music.len());
}

#[test]
fn test_threshold_above_phrase_length() {
    let score = compile_with(
        &repeated_phrase_project(),
        CompileOptions {
            compression: Compression::Fixed(20),
            ..CompileOptions::default()
        },
    );
    let channel = &score.report.songs[0].channels[0];
    assert_eq!(channel.threshold, 20);
    assert_eq!(channel.references, 0);
    assert_eq!(channel.compressed_bytes, channel.raw_bytes);
}

// =============================================================================
// Instruments and Envelopes
// =============================================================================

#[test]
fn test_identical_envelopes_are_shared() {
    let volume = Envelope::new(vec![15, 12, 9, 6]).with_loop(3);
    let mut project = square_project(vec![Note::pitch(0, 37, 0), Note::pitch(1, 38, 1)], 4);
    project.instruments[0] = Instrument::new("a", InstrumentKind::Apu)
        .with_envelope(EnvelopeKind::Volume, volume.clone());
    project.instruments.push(
        Instrument::new("b", InstrumentKind::Apu).with_envelope(EnvelopeKind::Volume, volume),
    );
    let score = compile(&project);

    let first = word_at(&score, "instruments", 0);
    let second = word_at(&score, "instruments", 10);
    assert_eq!(first, second);
    assert_eq!(first, address(&score, "env1"));
    // Arpeggio, pitch and duty fall back to the default curve
    for offset in [2, 4, 6] {
        assert_eq!(word_at(&score, "instruments", offset), address(&score, "env0"));
    }
    assert_eq!(bytes_at(&score, "env0", 3), &[0x00, 0x00, 0x01]);
    assert_eq!(score.report.tables.envelopes.entries, 2);
    assert_eq!(score.report.tables.primary_instruments.entries, 2);
}

#[test]
fn test_vrc6_project() {
    let mut project = Project::new("vrc6");
    project.expansions.insert(Expansion::Vrc6);
    project
        .instruments
        .push(Instrument::new("saw", InstrumentKind::Vrc6));
    project
        .songs
        .push(song_with(ChannelKind::Vrc6Saw, vec![Note::pitch(0, 37, 0)], 8));
    let score = compile(&project);

    assert_eq!(score.music[header::EXPANSIONS], 0x01);
    assert_eq!(score.music[header::CHANNEL_COUNT], 8);
    assert_eq!(
        word_at(&score, "song0", 7 * 2),
        address(&score, "song0_vrc6saw")
    );
    assert_eq!(
        word_at(&score, "extended_instruments", 0),
        address(&score, "env0")
    );
    assert_eq!(bytes_at(&score, "song0_vrc6saw", 2), &[0x80, 0x19]);
    assert_eq!(score.report.tables.extended_instruments.entries, 1);
}

#[test]
fn test_disabled_expansion_channel_is_an_error() {
    let mut project = square_project(vec![], 8);
    project.songs[0]
        .channels
        .push(track(ChannelKind::FdsWave, vec![Note::stop(0)]));
    assert!(matches!(
        Compiler::new().compile(&project),
        Err(Error::ExpansionDisabled {
            channel: "fds",
            expansion: "FDS"
        })
    ));
}

#[test]
fn test_n163_wave_table() {
    let mut project = Project::new("n163");
    project.expansions.insert(Expansion::N163);
    project.instruments.push(
        Instrument::new(
            "wave",
            InstrumentKind::N163 {
                wave_pos: 0,
                wave_size: 8,
            },
        )
        .with_envelope(
            EnvelopeKind::N163Waveform,
            Envelope::new(vec![1, 2, 3, 4, 5, 6, 7, 8]),
        ),
    );
    project
        .songs
        .push(song_with(ChannelKind::N163Wave1, vec![Note::pitch(0, 49, 0)], 8));
    let score = compile(&project);

    assert_eq!(score.music[header::N163_CHANNELS], 1);
    assert_eq!(score.music[header::CHANNEL_COUNT], 6);
    assert_eq!(
        word_at(&score, "extended_instruments", 6),
        address(&score, "n163_wave0")
    );
    assert_eq!(bytes_at(&score, "n163_wave0", 4), &[0x21, 0x43, 0x65, 0x87]);
    // Wave position and size follow the four pointers
    assert_eq!(bytes_at(&score, "extended_instruments", 10)[8..], [0, 8]);
}

// =============================================================================
// Tempo
// =============================================================================

#[test]
fn test_groove_song() {
    let mut project = square_project(vec![Note::pitch(0, 37, 0)], 8);
    project.tempo_mode = TempoMode::Groove;
    project.songs[0].groove = vec![6, 5];
    let score = compile(&project);

    assert_eq!(score.music[header::TEMPO_MODE], 1);
    assert_eq!(bytes_at(&score, "song0", 11)[10], 0);
    assert_eq!(word_at(&score, "song0", 11), address(&score, "groove0"));
    assert_eq!(bytes_at(&score, "groove0", 3), &[6, 5, 0]);
}

// =============================================================================
// DPCM Samples
// =============================================================================

fn dpcm_project() -> Project {
    let mut project = Project::new("drums");
    project.samples.push(DpcmSample {
        name: "kick".to_string(),
        data: vec![0xAA; 100],
    });
    project.sample_mappings.push(SampleMapping {
        note: 37,
        sample: 0,
        pitch: 15,
        looping: false,
    });
    let note = Note {
        row: 0,
        value: Some(NoteValue::Pitch(37)),
        ..Note::default()
    };
    project
        .songs
        .push(song_with(ChannelKind::Dpcm, vec![note], 8));
    project
}

#[test]
fn test_dpcm_samples() {
    let score = compile(&dpcm_project());

    assert_eq!(address(&score, "dpcm0"), 0xC000);
    assert_eq!(score.samples.len(), 113);
    assert_eq!(score.samples[100..], [0x55; 13]);
    assert_eq!(bytes_at(&score, "samples", 4), &[15, 0, 7, 0]);
    assert_eq!(bytes_at(&score, "song0_dpcm", 1), &[0x01]);
    assert_eq!(score.report.tables.samples.bytes, 113);
}

#[test]
fn test_missing_sample() {
    let mut project = dpcm_project();
    project.sample_mappings[0].sample = 3;
    assert!(matches!(
        Compiler::new().compile(&project),
        Err(Error::MissingSample(3))
    ));
}

#[test]
fn test_long_sample_cut_with_warning() {
    let mut project = dpcm_project();
    project.samples[0].data = vec![0xAA; 6000];
    let score = compile(&project);

    assert_eq!(score.samples.len(), 4081);
    assert_eq!(score.warnings.len(), 1);
    assert!(score.warnings[0].message.contains("cut to 4081"));
    // length register holds (length - 1) / 16
    assert_eq!(bytes_at(&score, "samples", 4)[2], 0xFF);
}

#[test]
fn test_sample_base_below_register_range() {
    let options = CompileOptions {
        dpcm_base: 0x8000,
        ..CompileOptions::default()
    };
    assert!(matches!(
        Compiler::with_options(options).compile(&dpcm_project()),
        Err(Error::InvalidSampleBase(0x8000))
    ));
}

// =============================================================================
// Output Options
// =============================================================================

#[test]
fn test_asm6_dialect_with_prefix() {
    let score = compile_with(
        &square_project(vec![Note::pitch(0, 37, 0)], 8),
        CompileOptions {
            dialect: Dialect::Asm6,
            label_prefix: "bgm_".to_string(),
            ..CompileOptions::default()
        },
    );
    assert!(score.text.starts_with("; test (extended kernel)\n.base $8000\n"));
    assert!(score.text.contains("bgm_music_data:\n"));
    assert!(score.text.contains("\t.dw bgm_instruments,"));
    assert_eq!(address(&score, "bgm_music_data"), 0x8000);
}

#[test]
fn test_data_base_override() {
    let score = compile_with(
        &square_project(vec![Note::pitch(0, 37, 0)], 8),
        CompileOptions {
            data_base: 0x9000,
            ..CompileOptions::default()
        },
    );
    assert_eq!(address(&score, "music_data"), 0x9000);
    let stream = address(&score, "song0_sq1");
    assert_eq!(
        u16::from_le_bytes([score.music[0x0C], score.music[0x0D]]),
        address(&score, "song0")
    );
    assert!(stream > 0x9000);
}

#[test]
fn test_report_json() {
    let score = compile(&square_project(vec![Note::pitch(0, 37, 0)], 8));
    let json = score.report.to_json().unwrap();
    assert!(json.contains("\"kernel\": \"extended\""));
    assert!(json.contains("\"channel\": \"square1\""));
    assert_eq!(score.report.music_bytes, score.music.len());
}

// =============================================================================
// Files
// =============================================================================

#[test]
fn test_compile_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("song.json");
    let output = dir.path().join("song.s");

    let project = square_project(vec![Note::pitch(0, 37, 0)], 8);
    std::fs::write(&input, serde_json::to_string(&project).unwrap()).unwrap();

    let score = Compiler::new()
        .compile_file(&input, &output)
        .expect("Compilation failed");
    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text, score.text);
    assert!(text.contains(".segment \"MUSIC\""));
}

#[test]
fn test_compile_gzip_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("song.json.gz");
    let output = dir.path().join("song.s");

    let project = square_project(vec![Note::pitch(0, 37, 0)], 8);
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder
        .write_all(serde_json::to_string(&project).unwrap().as_bytes())
        .unwrap();
    std::fs::write(&input, encoder.finish().unwrap()).unwrap();

    let score = Compiler::new()
        .compile_file(&input, &output)
        .expect("Compilation failed");
    assert_eq!(score.music, compile(&project).music);
}

#[test]
fn test_cli_statistics_with_debug_logging() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("song.json");
    let output = dir.path().join("song.s");
    let project = square_project(vec![Note::pitch(0, 37, 0)], 8);
    std::fs::write(&input, serde_json::to_string(&project).unwrap()).unwrap();

    let run = |level: Option<&str>| {
        let mut command = std::process::Command::new(env!("CARGO_BIN_EXE_chipscore"));
        command.arg(&input).arg(&output).env_remove("RUST_LOG");
        if let Some(level) = level {
            command.env("RUST_LOG", level);
        }
        let result = command.output().expect("failed to run chipscore");
        assert!(result.status.success());
        String::from_utf8_lossy(&result.stderr).into_owned()
    };

    let quiet = run(None);
    assert!(!quiet.contains("references (threshold"));

    let verbose = run(Some("debug"));
    assert!(verbose.contains("sq1"));
    assert!(verbose.contains("references (threshold"));
    assert!(output.exists());
}

#[test]
fn test_options_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("options.json");
    std::fs::write(
        &path,
        r#"{ "kernel": "classic", "dialect": "asm6", "label_prefix": "m_", "compression": "off" }"#,
    )
    .unwrap();

    let options = CompileOptions::load(&path).unwrap();
    assert_eq!(options.kernel, Kernel::Classic);
    assert_eq!(options.dialect, Dialect::Asm6);
    assert_eq!(options.label_prefix, "m_");
    assert_eq!(options.compression, Compression::Off);
    assert_eq!(options.data_base, 0x8000);
}

#[test]
fn test_invalid_project_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("broken.json");
    std::fs::write(&input, "{ \"songs\": [").unwrap();
    let result = Compiler::new().compile_file(&input, &dir.path().join("out.s"));
    assert!(matches!(result, Err(Error::Json(_))));
}
