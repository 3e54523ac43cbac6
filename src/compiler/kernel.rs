//! Target playback kernels and their byte-code tables
//!
//! Both kernels share the instrument and empty-row encodings. They differ in
//! the note window, the opcode map and the features they implement; every
//! opcode lookup goes through the per-kernel table.

use serde::{Deserialize, Serialize};

/// Offset between a project note value and its single-byte encoding
pub const NOTE_BIAS: u8 = 12;

/// Largest single-byte note index (after removing the bias)
pub const NOTE_WINDOW: u8 = 63;

/// Stop note byte
pub const STOP_NOTE: u8 = 0x00;

/// Number of instrument slots addressable by the instrument opcode
pub const MAX_INSTRUMENT_SLOTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// Small driver: 2A03 only, speed tempo, few effects, packed notes
    Classic,
    /// Full driver: expansions, grooves, all effects
    #[default]
    Extended,
}

/// Driver instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    ExtendedNote = 0,
    Slide,
    Speed,
    Groove,
    Jump,
    Halt,
    Reference,
    Release,
    Volume,
    FinePitch,
    VibratoOverride,
    ClearPitchOverride,
    ArpOverride,
    ClearArpOverride,
    ResetArp,
    Duty,
    NoteDelay,
    CutDelay,
    DeltaCounter,
    FdsModSpeed,
    FdsModDepth,
}

const OP_COUNT: usize = 21;

const ALL_OPS: [Op; OP_COUNT] = [
    Op::ExtendedNote,
    Op::Slide,
    Op::Speed,
    Op::Groove,
    Op::Jump,
    Op::Halt,
    Op::Reference,
    Op::Release,
    Op::Volume,
    Op::FinePitch,
    Op::VibratoOverride,
    Op::ClearPitchOverride,
    Op::ArpOverride,
    Op::ClearArpOverride,
    Op::ResetArp,
    Op::Duty,
    Op::NoteDelay,
    Op::CutDelay,
    Op::DeltaCounter,
    Op::FdsModSpeed,
    Op::FdsModDepth,
];

/// Opcode bytes indexed by `Op as usize`
static EXTENDED_OPCODES: [Option<u8>; OP_COUNT] = [
    Some(0x40),
    Some(0x41),
    Some(0x42),
    Some(0x43),
    Some(0x44),
    Some(0x45),
    Some(0x46),
    Some(0x47),
    Some(0x48),
    Some(0x49),
    Some(0x4A),
    Some(0x4B),
    Some(0x4C),
    Some(0x4D),
    Some(0x4E),
    Some(0x4F),
    Some(0x50),
    Some(0x51),
    Some(0x52),
    Some(0x53),
    Some(0x54),
];

static CLASSIC_OPCODES: [Option<u8>; OP_COUNT] = [
    Some(0xC1),
    None,
    Some(0xC3),
    None,
    Some(0xC5),
    Some(0xC7),
    Some(0xC9),
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
];

/// Operand layout of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operands {
    /// Plain operand bytes following the opcode
    pub bytes: usize,
    /// Address operands following the bytes
    pub refs: usize,
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtendedNote => "extended_note",
            Self::Slide => "slide",
            Self::Speed => "speed",
            Self::Groove => "groove",
            Self::Jump => "jump",
            Self::Halt => "halt",
            Self::Reference => "reference",
            Self::Release => "release",
            Self::Volume => "volume",
            Self::FinePitch => "fine_pitch",
            Self::VibratoOverride => "vibrato_override",
            Self::ClearPitchOverride => "clear_pitch_override",
            Self::ArpOverride => "arp_override",
            Self::ClearArpOverride => "clear_arp_override",
            Self::ResetArp => "reset_arp",
            Self::Duty => "duty",
            Self::NoteDelay => "note_delay",
            Self::CutDelay => "cut_delay",
            Self::DeltaCounter => "delta_counter",
            Self::FdsModSpeed => "fds_mod_speed",
            Self::FdsModDepth => "fds_mod_depth",
        }
    }

    pub fn operands(&self) -> Operands {
        let (bytes, refs) = match self {
            Self::ExtendedNote => (1, 0),
            Self::Slide => (3, 0),
            Self::Speed => (1, 0),
            Self::Groove => (0, 1),
            Self::Jump => (0, 1),
            Self::Halt => (0, 0),
            Self::Reference => (1, 1),
            Self::Release => (0, 0),
            Self::Volume | Self::FinePitch | Self::Duty => (1, 0),
            Self::VibratoOverride | Self::ArpOverride => (0, 1),
            Self::ClearPitchOverride | Self::ClearArpOverride | Self::ResetArp => (0, 0),
            Self::NoteDelay | Self::CutDelay | Self::DeltaCounter => (1, 0),
            Self::FdsModSpeed => (2, 0),
            Self::FdsModDepth => (1, 0),
        };
        Operands { bytes, refs }
    }

    /// Instructions that consume a row like a note does
    pub fn advances_row(&self) -> bool {
        matches!(self, Self::ExtendedNote | Self::Slide | Self::Release)
    }
}

/// A decoded leading byte of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Note (0 = stop) and whether one empty row is packed into it
    Note { note: u8, empty_row: bool },
    Instrument(u8),
    EmptyRows(usize),
    Op(Op),
    Invalid,
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Extended => "extended",
        }
    }

    fn table(&self) -> &'static [Option<u8>; OP_COUNT] {
        match self {
            Self::Classic => &CLASSIC_OPCODES,
            Self::Extended => &EXTENDED_OPCODES,
        }
    }

    /// Opcode byte of an instruction, `None` if the kernel lacks it
    pub fn opcode(&self, op: Op) -> Option<u8> {
        self.table()[op as usize]
    }

    pub fn supports(&self, op: Op) -> bool {
        self.opcode(op).is_some()
    }

    /// Longest run a single empty-row token can describe
    pub fn max_empty_rows(&self) -> usize {
        match self {
            Self::Classic => 32,
            Self::Extended => 64,
        }
    }

    pub fn allows_releases(&self) -> bool {
        matches!(self, Self::Extended)
    }

    pub fn allows_expansions(&self) -> bool {
        matches!(self, Self::Extended)
    }

    /// Classic kernel notes carry a "one empty row follows" flag in bit 0
    pub fn packs_empty_rows(&self) -> bool {
        matches!(self, Self::Classic)
    }

    /// Single-byte encoding of a note, `None` outside the window
    pub fn note_byte(&self, note: u8) -> Option<u8> {
        let index = note.checked_sub(NOTE_BIAS).filter(|&i| (1..=NOTE_WINDOW).contains(&i))?;
        Some(match self {
            Self::Classic => index << 1,
            Self::Extended => index,
        })
    }

    /// Single-byte encoding of a raw note index (DPCM mapping slots)
    pub fn raw_note_byte(&self, index: u8) -> u8 {
        assert!(
            (1..=NOTE_WINDOW).contains(&index),
            "note index {} outside the single-byte window",
            index
        );
        match self {
            Self::Classic => index << 1,
            Self::Extended => index,
        }
    }

    pub fn instrument_byte(&self, slot: usize) -> u8 {
        debug_assert!(slot < MAX_INSTRUMENT_SLOTS);
        0x80 | ((slot as u8) << 1)
    }

    pub fn empty_rows_byte(&self, count: usize) -> u8 {
        debug_assert!(count >= 1 && count <= self.max_empty_rows());
        0x81 | (((count - 1) as u8) << 1)
    }

    /// Classify the first byte of an instruction
    pub fn decode(&self, byte: u8) -> Decoded {
        if byte & 0x80 != 0 && byte & 1 == 0 {
            return Decoded::Instrument((byte & 0x7F) >> 1);
        }
        match self {
            Self::Extended => match byte {
                0x00..=0x3F => Decoded::Note {
                    note: if byte == STOP_NOTE { 0 } else { byte + NOTE_BIAS },
                    empty_row: false,
                },
                0x40..=0x7F => self.decode_op(byte),
                _ => Decoded::EmptyRows(usize::from((byte & 0x7F) >> 1) + 1),
            },
            Self::Classic => match byte {
                0x00..=0x7F => {
                    let index = byte >> 1;
                    Decoded::Note {
                        note: if index == 0 { 0 } else { index + NOTE_BIAS },
                        empty_row: byte & 1 != 0,
                    }
                }
                0x81..=0xBF => Decoded::EmptyRows(usize::from((byte & 0x7F) >> 1) + 1),
                _ => self.decode_op(byte),
            },
        }
    }

    fn decode_op(&self, byte: u8) -> Decoded {
        ALL_OPS
            .iter()
            .find(|op| self.opcode(**op) == Some(byte))
            .map_or(Decoded::Invalid, |op| Decoded::Op(*op))
    }
}
