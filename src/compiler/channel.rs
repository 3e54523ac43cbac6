//! Channel opcode generation
//!
//! Walks one channel of one song row by row and turns every audible or
//! controllable change into driver instructions. Running state is tracked on
//! two sides: what the song asks for and what the driver was last told, and
//! only differences are emitted.

use super::diagnostics::{CompileLog, WarningKind};
use super::envelope::{
    encode_envelope, vibrato_envelope, EncodeFlags, EnvelopeTable, UniqueTable,
};
use super::instruments::InstrumentSlots;
use super::kernel::{Kernel, Op, NOTE_WINDOW, STOP_NOTE};
use super::labels::Labels;
use super::pitch::{frames_per_row, slide_step};
use super::token::{Symbols, Token};
use crate::error::{Error, Result};
use crate::project::{
    ChannelKind, ChannelTrack, Machine, Note, NoteValue, Project, Song, TempoMode, Vibrato,
    NOTE_MAX, NOTE_MIN,
};
use std::collections::HashMap;

/// Volume of a freshly reset channel
pub const DEFAULT_VOLUME: u8 = 15;

/// Largest value of the DPCM delta counter
pub const MAX_DELTA_COUNTER: u8 = 127;

/// Largest FDS modulation speed and depth
pub const MAX_FDS_MOD_SPEED: u16 = 4095;
pub const MAX_FDS_MOD_DEPTH: u8 = 63;

/// One row of a song timeline
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub position: usize,
    /// First row of its position
    pub first: bool,
    pub note: Option<&'a Note>,
}

/// Flatten a track into rows in playback order. A missing track is silence.
pub fn flatten<'a>(song: &'a Song, track: Option<&'a ChannelTrack>) -> Result<Vec<Row<'a>>> {
    let mut rows = Vec::new();

    for position in 0..song.length {
        let length = song.position_length(position);
        let start = rows.len();
        rows.extend((0..length).map(|row| Row {
            position,
            first: row == 0,
            note: None,
        }));

        let Some(track) = track else { continue };
        let Some(index) = track.pattern_at(position) else {
            continue;
        };
        let pattern = track
            .patterns
            .get(index)
            .ok_or_else(|| Error::MissingPattern {
                song: song.name.clone(),
                channel: track.kind.short_name(),
                pattern: index,
            })?;

        for note in &pattern.notes {
            if note.row < length && rows[start + note.row].note.is_none() {
                rows[start + note.row].note = Some(note);
            }
        }
    }

    Ok(rows)
}

/// Tables shared by every channel of one compile
#[derive(Debug, Default)]
pub struct SharedTables {
    pub symbols: Symbols,
    pub envelopes: EnvelopeTable,
    pub grooves: UniqueTable,
    pub log: CompileLog,
    vibratos: HashMap<(u8, u8), usize>,
}

impl SharedTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelope index of the generated curve for a vibrato setting
    pub fn vibrato(&mut self, vibrato: Vibrato) -> usize {
        let key = (vibrato.speed.min(15), vibrato.depth.min(15));
        if let Some(&index) = self.vibratos.get(&key) {
            return index;
        }
        let flags = EncodeFlags {
            allow_releases: false,
            is_pitch: true,
        };
        let curve = vibrato_envelope(key.0, key.1);
        let index = match encode_envelope(&curve, flags, &mut self.log) {
            Some(bytes) => self.envelopes.add_encoded(bytes, false),
            None => EnvelopeTable::DEFAULT_INDEX,
        };
        self.vibratos.insert(key, index);
        index
    }

    /// Groove table index; a groove is its frame counts and a 0 terminator
    pub fn groove(&mut self, values: &[u8]) -> usize {
        let mut bytes: Vec<u8> = values.iter().map(|&v| v.max(1)).collect();
        if bytes.is_empty() {
            bytes.push(6);
        }
        bytes.push(0);
        self.grooves.intern(bytes, 0)
    }
}

/// Custom VRC7 patch loads of every VRC7 channel, row by row.
///
/// All VRC7 channels share one custom patch register set, so a channel
/// whose custom instrument was overwritten by another channel must reload it.
#[derive(Debug, Default)]
pub struct PatchTimeline {
    loads: Vec<Vec<usize>>,
}

impl PatchTimeline {
    pub fn build(project: &Project, song: &Song, log: &mut CompileLog) -> Result<Self> {
        let mut timeline = Self::default();

        let channels = ChannelKind::all().filter(|k| k.is_vrc7() && project.has_channel(*k));
        for kind in channels {
            let rows = flatten(song, song.track(kind))?;
            timeline.loads.resize(rows.len(), Vec::new());

            let mut current = None;
            for (index, row) in rows.iter().enumerate() {
                let Some(note) = row.note else { continue };
                if note.instrument.is_some() {
                    current = note.instrument;
                }
                let Some(instrument) = current else { continue };
                let custom = project
                    .instruments
                    .get(instrument)
                    .is_some_and(|i| i.kind.is_vrc7_custom());
                if custom && matches!(note.value, Some(NoteValue::Pitch(_))) {
                    timeline.loads[index].push(instrument);
                }
            }
        }

        for (row, loads) in timeline.loads.iter().enumerate() {
            if loads.windows(2).any(|w| w[0] != w[1]) {
                log.warn(
                    WarningKind::AmbiguousSharing,
                    format!(
                        "Song '{}': VRC7 channels use different custom patches on row {}",
                        song.name, row
                    ),
                );
            }
        }

        Ok(timeline)
    }

    /// Whether the most recent load strictly between `since` and `row` was
    /// a different instrument
    pub fn overwritten(&self, instrument: usize, since: Option<usize>, row: usize) -> bool {
        let start = since.map_or(0, |s| s + 1);
        (start..row)
            .rev()
            .find_map(|r| self.loads.get(r).and_then(|l| l.last()))
            .is_some_and(|&other| other != instrument)
    }
}

/// Compile-wide inputs of the generator
pub struct ChannelGenerator<'a> {
    pub project: &'a Project,
    pub kernel: Kernel,
    pub machine: Machine,
    pub labels: &'a Labels,
    pub slots: &'a InstrumentSlots,
    /// Envelope index of every project arpeggio
    pub arpeggios: &'a [usize],
    pub tables: &'a mut SharedTables,
}

/// One channel of one song to generate
pub struct ChannelJob<'a> {
    pub song_index: usize,
    pub song: &'a Song,
    pub kind: ChannelKind,
    /// Carries the song's tempo instructions
    pub speed_channel: bool,
    pub patches: Option<&'a PatchTimeline>,
}

impl<'a> ChannelGenerator<'a> {
    /// Generate the instruction stream of one channel
    pub fn generate(&mut self, job: &ChannelJob<'a>) -> Result<Vec<Token>> {
        let rows = flatten(job.song, job.song.track(job.kind))?;
        let speeds = collect_speeds(job.song, rows.len())?;
        let mut writer = ChannelWriter::new(self, job, &rows, speeds);
        writer.run()?;
        Ok(writer.tokens)
    }
}

/// Speed changes of a song from all of its tracks
fn collect_speeds(song: &Song, length: usize) -> Result<Vec<Option<u8>>> {
    let mut speeds = vec![None; length];
    for track in &song.channels {
        for (index, row) in flatten(song, Some(track))?.iter().enumerate() {
            if let Some(speed) = row.note.and_then(|n| n.speed) {
                speeds[index].get_or_insert(speed);
            }
        }
    }
    Ok(speeds)
}

/// What the driver was last told; `None` is unknown
#[derive(Debug, Clone, Default)]
struct DriverState {
    instrument: Option<usize>,
    arpeggio: Option<Option<usize>>,
    volume: Option<u8>,
    fine_pitch: Option<i8>,
    vibrato: Option<Option<Vibrato>>,
    duty: Option<u8>,
    fds_mod_speed: Option<u16>,
    fds_mod_depth: Option<u8>,
    speed: Option<u8>,
    groove: Option<usize>,
}

/// What the song asks for at the current row
#[derive(Debug, Clone)]
struct SongState {
    instrument: Option<usize>,
    volume: u8,
    fine_pitch: i8,
    vibrato: Option<Vibrato>,
    duty: Option<u8>,
    fds_mod_speed: Option<u16>,
    fds_mod_depth: Option<u8>,
    speed: u8,
    groove: usize,
}

/// State fields that change somewhere in the channel
#[derive(Debug, Clone, Copy, Default)]
struct Touched {
    arpeggio: bool,
    volume: bool,
    fine_pitch: bool,
    vibrato: bool,
    duty: bool,
    fds: bool,
    speed: bool,
    groove: bool,
}

struct ChannelWriter<'g, 'a> {
    ctx: &'g mut ChannelGenerator<'a>,
    job: &'g ChannelJob<'a>,
    rows: &'g [Row<'a>],
    speeds: Vec<Option<u8>>,
    tokens: Vec<Token>,
    /// Instructions of the row being processed
    scratch: Vec<Token>,
    /// Empty rows not written yet
    pending: usize,
    /// The row ends with a single-byte note
    row_note: bool,
    /// Index of a single-byte note that can absorb one empty row
    squeeze: Option<usize>,
    driver: DriverState,
    song: SongState,
    touched: Touched,
    last_patch_row: Option<usize>,
}

impl<'g, 'a> ChannelWriter<'g, 'a> {
    fn new(
        ctx: &'g mut ChannelGenerator<'a>,
        job: &'g ChannelJob<'a>,
        rows: &'g [Row<'a>],
        speeds: Vec<Option<u8>>,
    ) -> Self {
        let groove = match ctx.project.tempo_mode {
            TempoMode::Groove => ctx.tables.groove(&job.song.groove),
            TempoMode::FamiTracker => 0,
        };
        let driver = DriverState {
            arpeggio: Some(None),
            volume: Some(DEFAULT_VOLUME),
            fine_pitch: Some(0),
            vibrato: Some(None),
            speed: Some(job.song.speed),
            groove: Some(groove),
            ..DriverState::default()
        };
        let song = SongState {
            instrument: None,
            volume: DEFAULT_VOLUME,
            fine_pitch: 0,
            vibrato: None,
            duty: None,
            fds_mod_speed: None,
            fds_mod_depth: None,
            speed: job.song.speed,
            groove,
        };

        let mut touched = Touched::default();
        for note in rows.iter().filter_map(|r| r.note) {
            touched.arpeggio |= note.arpeggio.is_some();
            touched.volume |= note.volume.is_some();
            touched.fine_pitch |= note.fine_pitch.is_some();
            touched.vibrato |= note.vibrato.is_some();
            touched.duty |= note.duty.is_some() || note.instrument.is_some();
            touched.fds |= note.fds_mod_speed.is_some()
                || note.fds_mod_depth.is_some()
                || note.instrument.is_some();
        }
        touched.speed = speeds.iter().any(Option::is_some);
        touched.groove = !job.song.position_overrides.is_empty();

        Self {
            ctx,
            job,
            rows,
            speeds,
            tokens: Vec::new(),
            scratch: Vec::new(),
            pending: 0,
            row_note: false,
            squeeze: None,
            driver,
            song,
            touched,
            last_patch_row: None,
        }
    }

    fn kind(&self) -> ChannelKind {
        self.job.kind
    }

    fn log(&mut self) -> &mut CompileLog {
        &mut self.ctx.tables.log
    }

    fn symbol(&mut self, name: &str) -> Token {
        Token::Ref(self.ctx.tables.symbols.intern(name))
    }

    fn envelope_ref(&mut self, index: usize) -> Token {
        let name = self.ctx.labels.envelope(index);
        self.symbol(&name)
    }

    fn run(&mut self) -> Result<()> {
        let loop_row = self.loop_row();
        let rows = self.rows;

        for (index, row) in rows.iter().enumerate() {
            if Some(index) == loop_row {
                self.place_loop();
            }
            self.process_row(index, row)?;
        }
        self.flush_pending();

        match loop_row {
            Some(_) => {
                let name = self
                    .ctx
                    .labels
                    .stream_loop(self.job.song_index, self.kind().short_name());
                if self.op(Op::Jump) {
                    let target = self.symbol(&name);
                    self.scratch.push(target);
                }
            }
            None => {
                self.op(Op::Halt);
            }
        }
        self.commit();
        Ok(())
    }

    fn loop_row(&mut self) -> Option<usize> {
        let song = self.job.song;
        let mut position = song.loop_point?;
        if position >= song.length {
            let message = format!(
                "Song '{}': loop point {} is past the end, looping to the start",
                song.name, position
            );
            self.log().warn_once(WarningKind::Clamped, message);
            position = 0;
        }
        if let Some(row) = self
            .rows
            .iter()
            .position(|r| r.position >= position && r.first)
        {
            let target = self.rows[row].position;
            if target != position {
                let message = format!(
                    "Song '{}': loop point {} has no rows, looping to position {}",
                    song.name, position, target
                );
                self.log().warn_once(WarningKind::Clamped, message);
            }
            return Some(row);
        }
        if self.rows.is_empty() {
            return None;
        }
        let message = format!(
            "Song '{}': no rows at or after loop point {}, looping to the start",
            song.name, position
        );
        self.log().warn_once(WarningKind::Clamped, message);
        Some(0)
    }

    /// Loop label; everything the song changes is unknown after a jump back
    fn place_loop(&mut self) {
        self.flush_pending();
        let name = self
            .ctx
            .labels
            .stream_loop(self.job.song_index, self.kind().short_name());
        let symbol = self.ctx.tables.symbols.intern(&name);
        self.tokens.push(Token::Label(symbol));
        self.squeeze = None;

        self.driver.instrument = None;
        self.last_patch_row = None;
        if self.touched.arpeggio {
            self.driver.arpeggio = None;
        }
        if self.touched.volume {
            self.driver.volume = None;
        }
        if self.touched.fine_pitch {
            self.driver.fine_pitch = None;
        }
        if self.touched.vibrato {
            self.driver.vibrato = None;
        }
        if self.touched.duty {
            self.driver.duty = None;
        }
        if self.touched.fds {
            self.driver.fds_mod_speed = None;
            self.driver.fds_mod_depth = None;
        }
        if self.touched.speed {
            self.driver.speed = None;
        }
        if self.touched.groove {
            self.driver.groove = None;
        }
    }

    fn process_row(&mut self, index: usize, row: &Row<'a>) -> Result<()> {
        self.update_tempo(index, row);
        if self.job.speed_channel {
            self.sync_tempo();
        }

        let mut advanced = false;
        if let Some(note) = row.note {
            self.update_state(note);

            match note.value {
                Some(NoteValue::Pitch(value)) => {
                    if self.kind() == ChannelKind::Dpcm {
                        self.sync_continuous();
                        self.delays(note);
                        advanced = self.sample_note(value)?;
                    } else {
                        self.sync_instrument(note, index)?;
                        self.sync_arpeggio(note)?;
                        self.sync_continuous();
                        self.delays(note);
                        self.pitched_note(index, row, note, value);
                        advanced = true;
                    }
                }
                Some(NoteValue::Stop) => {
                    self.sync_continuous();
                    self.delays(note);
                    self.push_note(STOP_NOTE);
                    advanced = true;
                }
                Some(NoteValue::Release) => {
                    self.sync_continuous();
                    if self.ctx.kernel.allows_releases() {
                        self.delays(note);
                        advanced = self.op(Op::Release);
                    } else {
                        let message = format!(
                            "The {} kernel does not support note releases, releases are ignored",
                            self.ctx.kernel.name()
                        );
                        self.log().warn_once(WarningKind::UnsupportedFeature, message);
                    }
                }
                None => self.sync_continuous(),
            }

            self.delta_counter(note);
        }

        self.commit();
        if !advanced {
            self.pending += 1;
        }
        Ok(())
    }

    fn update_tempo(&mut self, index: usize, row: &Row<'a>) {
        let song = self.job.song;
        match self.ctx.project.tempo_mode {
            TempoMode::FamiTracker => {
                if let Some(speed) = self.speeds.get(index).copied().flatten() {
                    self.song.speed = self.clamped(speed, 1, 31, "Speed");
                }
            }
            TempoMode::Groove => {
                if row.first {
                    if let Some(groove) = song.position_groove(row.position) {
                        self.song.groove = self.ctx.tables.groove(groove);
                    }
                }
                if self.speeds.get(index).copied().flatten().is_some() {
                    self.log().warn_once(
                        WarningKind::UnsupportedFeature,
                        "Speed changes are ignored in groove tempo mode",
                    );
                }
            }
        }
    }

    fn sync_tempo(&mut self) {
        match self.ctx.project.tempo_mode {
            TempoMode::FamiTracker => {
                if self.driver.speed != Some(self.song.speed) && self.op(Op::Speed) {
                    self.scratch.push(Token::Byte(self.song.speed));
                    self.driver.speed = Some(self.song.speed);
                }
            }
            TempoMode::Groove => {
                if self.driver.groove != Some(self.song.groove) && self.op(Op::Groove) {
                    let name = self.ctx.labels.groove(self.song.groove);
                    let target = self.symbol(&name);
                    self.scratch.push(target);
                    self.driver.groove = Some(self.song.groove);
                }
            }
        }
    }

    fn clamped(&mut self, value: u8, min: u8, max: u8, what: &str) -> u8 {
        if value < min || value > max {
            let message = format!("{} {} clamped to {}..{}", what, value, min, max);
            self.log().warn_once(WarningKind::Clamped, message);
        }
        value.clamp(min, max)
    }

    fn unsupported(&mut self, what: &str) {
        let message = format!(
            "{} is not supported on channel {}, ignored",
            what,
            self.kind().short_name()
        );
        self.log().warn_once(WarningKind::UnsupportedFeature, message);
    }

    /// Take the song-level attributes of a note
    fn update_state(&mut self, note: &Note) {
        let kind = self.kind();

        if let Some(volume) = note.volume {
            if kind.supports_volume() {
                self.song.volume = self.clamped(volume, 0, 15, "Volume");
            } else {
                self.unsupported("Volume");
            }
        }
        if let Some(pitch) = note.fine_pitch {
            if kind.supports_fine_pitch() {
                self.song.fine_pitch = pitch;
            } else {
                self.unsupported("Fine pitch");
            }
        }
        if let Some(vibrato) = note.vibrato {
            if kind.supports_vibrato() {
                self.song.vibrato = (vibrato.speed > 0 && vibrato.depth > 0).then_some(vibrato);
            } else {
                self.unsupported("Vibrato");
            }
        }
        if let Some(duty) = note.duty {
            if kind.supports_duty() {
                self.song.duty = Some(self.clamped(duty, 0, duty_limit(kind), "Duty"));
            } else {
                self.unsupported("Duty");
            }
        }
        if note.fds_mod_speed.is_some() || note.fds_mod_depth.is_some() {
            if kind.supports_fds_modulation() {
                if let Some(speed) = note.fds_mod_speed {
                    if speed > MAX_FDS_MOD_SPEED {
                        self.log()
                            .warn_once(WarningKind::Clamped, "FDS modulation speed clamped to 4095");
                    }
                    self.song.fds_mod_speed = Some(speed.min(MAX_FDS_MOD_SPEED));
                }
                if let Some(depth) = note.fds_mod_depth {
                    let depth = self.clamped(depth, 0, MAX_FDS_MOD_DEPTH, "FDS modulation depth");
                    self.song.fds_mod_depth = Some(depth);
                }
            } else {
                self.unsupported("FDS modulation");
            }
        }
    }

    /// Emit every continuous setting the driver does not have yet
    fn sync_continuous(&mut self) {
        if self.driver.volume != Some(self.song.volume) && self.op(Op::Volume) {
            self.scratch.push(Token::Byte(self.song.volume));
            self.driver.volume = Some(self.song.volume);
        }
        if self.driver.fine_pitch != Some(self.song.fine_pitch) && self.op(Op::FinePitch) {
            self.scratch.push(Token::Byte(self.song.fine_pitch as u8));
            self.driver.fine_pitch = Some(self.song.fine_pitch);
        }
        if self.driver.vibrato != Some(self.song.vibrato) && self.op(Op::VibratoOverride) {
            match self.song.vibrato {
                Some(vibrato) => {
                    let index = self.ctx.tables.vibrato(vibrato);
                    let target = self.envelope_ref(index);
                    self.scratch.push(target);
                }
                None => {
                    let target = self.envelope_ref(EnvelopeTable::DEFAULT_INDEX);
                    self.scratch.push(target);
                    self.op(Op::ClearPitchOverride);
                }
            }
            self.driver.vibrato = Some(self.song.vibrato);
        }
        if let Some(duty) = self.song.duty {
            if self.driver.duty != Some(duty) && self.op(Op::Duty) {
                self.scratch.push(Token::Byte(duty));
                self.driver.duty = Some(duty);
            }
        }
        if let Some(speed) = self.song.fds_mod_speed {
            if self.driver.fds_mod_speed != Some(speed) && self.op(Op::FdsModSpeed) {
                self.scratch.push(Token::Byte((speed & 0xFF) as u8));
                self.scratch.push(Token::Byte((speed >> 8) as u8));
                self.driver.fds_mod_speed = Some(speed);
            }
        }
        if let Some(depth) = self.song.fds_mod_depth {
            if self.driver.fds_mod_depth != Some(depth) && self.op(Op::FdsModDepth) {
                self.scratch.push(Token::Byte(depth));
                self.driver.fds_mod_depth = Some(depth);
            }
        }
    }

    fn sync_instrument(&mut self, note: &Note, row: usize) -> Result<()> {
        let kind = self.kind();
        if kind.instrument_table().is_none() {
            return Ok(());
        }
        if note.instrument.is_some() {
            self.song.instrument = note.instrument;
        }
        let Some(index) = self.song.instrument else {
            return Ok(());
        };

        let project = self.ctx.project;
        let instrument = project
            .instruments
            .get(index)
            .ok_or(Error::MissingInstrument(index))?;
        if !instrument.kind.fits_channel(kind) {
            return Err(Error::UnsupportedInstrument {
                name: instrument.name.clone(),
                kind: instrument.kind.name(),
                reason: format!("on channel {}", kind.short_name()),
            });
        }
        let slot = self
            .ctx
            .slots
            .slot(index)
            .ok_or_else(|| Error::UnsupportedInstrument {
                name: instrument.name.clone(),
                kind: instrument.kind.name(),
                reason: format!("by the {} kernel", self.ctx.kernel.name()),
            })?;

        let mut reload = self.driver.instrument != Some(index);
        if instrument.kind.is_vrc7_custom() {
            if let Some(patches) = self.job.patches {
                reload |= patches.overwritten(index, self.last_patch_row, row);
            }
            self.last_patch_row = Some(row);
        }

        if reload {
            self.scratch
                .push(Token::Opcode(self.ctx.kernel.instrument_byte(slot)));
            self.driver.instrument = Some(index);
            // Instrument init resets duty and modulation
            self.driver.duty = None;
            self.driver.fds_mod_speed = None;
            self.driver.fds_mod_depth = None;
        }
        Ok(())
    }

    fn sync_arpeggio(&mut self, note: &Note) -> Result<()> {
        let wanted = note.arpeggio;
        if let Some(arpeggio) = wanted {
            if arpeggio >= self.ctx.arpeggios.len() {
                return Err(Error::MissingArpeggio(arpeggio));
            }
            if !self.kind().supports_arpeggio() {
                self.unsupported("Arpeggio");
                return Ok(());
            }
        }
        if !self.ctx.kernel.supports(Op::ArpOverride) {
            if wanted.is_some() {
                self.op(Op::ArpOverride);
            }
            return Ok(());
        }

        match (self.driver.arpeggio, wanted) {
            (Some(current), Some(_)) if current == wanted => {
                self.op(Op::ResetArp);
            }
            (Some(None), None) => {}
            (_, Some(arpeggio)) => {
                self.op(Op::ArpOverride);
                let target = self.envelope_ref(self.ctx.arpeggios[arpeggio]);
                self.scratch.push(target);
            }
            (_, None) => {
                self.op(Op::ArpOverride);
                let target = self.envelope_ref(EnvelopeTable::DEFAULT_INDEX);
                self.scratch.push(target);
                self.op(Op::ClearArpOverride);
            }
        }
        self.driver.arpeggio = Some(wanted);
        Ok(())
    }

    fn delays(&mut self, note: &Note) {
        if let Some(delay) = note.note_delay {
            if self.op(Op::NoteDelay) {
                self.scratch.push(Token::Byte(delay));
            }
        }
        if let Some(delay) = note.cut_delay {
            if self.op(Op::CutDelay) {
                self.scratch.push(Token::Byte(delay));
            }
        }
    }

    fn delta_counter(&mut self, note: &Note) {
        let Some(value) = note.delta_counter else {
            return;
        };
        if !self.kind().supports_delta_counter() {
            self.unsupported("Delta counter");
            return;
        }
        let value = self.clamped(value, 0, MAX_DELTA_COUNTER, "Delta counter");
        // Written before the row's note so the counter is set when it plays
        let at = self
            .scratch
            .iter()
            .rposition(|t| matches!(t, Token::Note(_)))
            .unwrap_or(self.scratch.len());
        if let Some(opcode) = self.ctx.kernel.opcode(Op::DeltaCounter) {
            self.scratch.insert(at, Token::Byte(value));
            self.scratch.insert(at, Token::Opcode(opcode));
        } else {
            self.op(Op::DeltaCounter);
        }
    }

    /// DPCM note: the byte selects a sample mapping
    fn sample_note(&mut self, value: u8) -> Result<bool> {
        let project = self.ctx.project;
        let Some(index) = project.sample_mappings.iter().position(|m| m.note == value) else {
            let message = format!("No sample is mapped to DPCM note {}, note ignored", value);
            self.log().warn_once(WarningKind::UnsupportedFeature, message);
            return Ok(false);
        };
        let mapping = &project.sample_mappings[index];
        if mapping.sample >= project.samples.len() {
            return Err(Error::MissingSample(mapping.sample));
        }
        if index >= usize::from(NOTE_WINDOW) {
            let message = format!(
                "Sample mapping {} exceeds the {} addressable mappings, note ignored",
                index, NOTE_WINDOW
            );
            self.log().warn_once(WarningKind::TableOverflow, message);
            return Ok(false);
        }

        let byte = self.ctx.kernel.raw_note_byte(index as u8 + 1);
        self.scratch.push(Token::Note(byte));
        self.row_note = true;
        Ok(true)
    }

    fn pitched_note(&mut self, index: usize, row: &Row<'a>, note: &Note, value: u8) {
        let value = self.clamped(value, NOTE_MIN, NOTE_MAX, "Note");

        if let Some(target) = note.slide_to {
            let target = self.clamped(target, NOTE_MIN, NOTE_MAX, "Slide target");
            if !self.kind().supports_slide() {
                self.unsupported("Slide");
            } else if self.ctx.kernel.supports(Op::Slide) {
                let step = self.slide_step(index, row, value, target);
                if step != 0 {
                    self.op(Op::Slide);
                    self.scratch.extend([
                        Token::Byte(step as u8),
                        Token::Byte(value),
                        Token::Byte(target),
                    ]);
                    return;
                }
            } else {
                self.op(Op::Slide);
            }
        }

        match self.ctx.kernel.note_byte(value) {
            Some(_) => self.push_note(value),
            None => self.extended_note(value),
        }
    }

    fn slide_step(&self, index: usize, row: &Row<'a>, from: u8, to: u8) -> i8 {
        let next = self.rows[index + 1..]
            .iter()
            .position(|r| r.note.is_some_and(|n| n.value.is_some()))
            .map_or(self.rows.len() - index, |p| p + 1);

        let song = self.job.song;
        let mode = self.ctx.project.tempo_mode;
        let speed = self.song.speed;
        let ntsc = next as f64 * frames_per_row(song, speed, mode, Machine::Ntsc, row.position);
        let pal = next as f64 * frames_per_row(song, speed, mode, Machine::Pal, row.position);
        slide_step(
            self.kind().pitch_profile(),
            self.ctx.machine,
            from,
            to,
            ntsc,
            pal,
        )
    }

    /// Single-byte note or stop
    fn push_note(&mut self, value: u8) {
        let byte = if value == STOP_NOTE {
            STOP_NOTE
        } else {
            match self.ctx.kernel.note_byte(value) {
                Some(byte) => byte,
                None => return self.extended_note(value),
            }
        };
        self.scratch.push(Token::Note(byte));
        self.row_note = true;
    }

    fn extended_note(&mut self, value: u8) {
        assert!(
            self.ctx.kernel.note_byte(value).is_none(),
            "note {} has a single-byte encoding",
            value
        );
        if self.op(Op::ExtendedNote) {
            self.scratch.push(Token::Byte(value));
        }
    }

    /// Push an instruction's first byte, `false` if the kernel lacks it
    fn op(&mut self, op: Op) -> bool {
        match self.ctx.kernel.opcode(op) {
            Some(byte) => {
                self.scratch.push(if op.advances_row() {
                    Token::Note(byte)
                } else {
                    Token::Opcode(byte)
                });
                true
            }
            None => {
                let message = format!(
                    "The {} kernel does not support {} instructions, ignored",
                    self.ctx.kernel.name(),
                    op.name()
                );
                self.log().warn_once(WarningKind::UnsupportedFeature, message);
                false
            }
        }
    }

    /// Move the row's instructions to the stream
    fn commit(&mut self) {
        let row_note = std::mem::take(&mut self.row_note);
        if self.scratch.is_empty() {
            return;
        }
        let squeezable = row_note && matches!(self.scratch.last(), Some(Token::Note(_)));
        self.flush_pending();
        self.tokens.append(&mut self.scratch);
        self.squeeze = squeezable.then(|| self.tokens.len() - 1);
    }

    fn flush_pending(&mut self) {
        let kernel = self.ctx.kernel;
        if self.pending == 1 && kernel.packs_empty_rows() {
            if let Some(index) = self.squeeze.take() {
                if let Some(Token::Note(byte)) = self.tokens.get_mut(index) {
                    *byte |= 1;
                    self.pending = 0;
                    return;
                }
            }
        }

        while self.pending > 0 {
            let count = self.pending.min(kernel.max_empty_rows());
            self.tokens.push(Token::Note(kernel.empty_rows_byte(count)));
            self.pending -= count;
        }
        self.squeeze = None;
    }
}

/// Highest duty value of a channel
fn duty_limit(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Noise => 1,
        ChannelKind::Vrc6Square1 | ChannelKind::Vrc6Square2 => 7,
        _ => 3,
    }
}
