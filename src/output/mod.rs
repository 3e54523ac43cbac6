//! Assembly-style output of compiled data
//!
//! Every table is laid out once as a list of typed lines. The lines are then
//! rendered as assembler source in one of two dialects and assembled to
//! binary by [`assembler::assemble`].

pub mod assembler;
pub mod layout;
pub mod report;

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Values per `.byte` line
pub const BYTES_PER_LINE: usize = 16;

/// Values per `.word` line
pub const WORDS_PER_LINE: usize = 8;

/// Assembler syntax of the text output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Ca65,
    Asm6,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ca65 => "ca65",
            Self::Asm6 => "asm6",
        }
    }

    fn byte_directive(&self) -> &'static str {
        match self {
            Self::Ca65 => ".byte",
            Self::Asm6 => ".db",
        }
    }

    fn word_directive(&self) -> &'static str {
        match self {
            Self::Ca65 => ".word",
            Self::Asm6 => ".dw",
        }
    }
}

/// Output segments; song data and DPCM samples load at separate addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Music,
    Samples,
}

impl Segment {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Music => "MUSIC",
            Self::Samples => "DPCM",
        }
    }
}

/// Operand of a word directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Label(String),
    Value(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Following lines belong to a segment starting at `base`
    Segment(Segment, u16),
    Label(String),
    Bytes(Vec<u8>),
    Words(Vec<Word>),
    /// Pad with zeros to a multiple of the alignment
    Align(usize),
    Comment(String),
    Blank,
}

/// Line accumulator owned by one compile
#[derive(Debug, Default)]
pub struct AsmBuilder {
    lines: Vec<Line>,
}

impl AsmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(&mut self, segment: Segment, base: u16) {
        self.lines.push(Line::Segment(segment, base));
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.lines.push(Line::Label(name.into()));
    }

    /// Bytes, split over lines of [`BYTES_PER_LINE`]
    pub fn bytes(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(BYTES_PER_LINE) {
            self.lines.push(Line::Bytes(chunk.to_vec()));
        }
    }

    pub fn byte(&mut self, byte: u8) {
        self.lines.push(Line::Bytes(vec![byte]));
    }

    pub fn words(&mut self, words: Vec<Word>) {
        for chunk in words.chunks(WORDS_PER_LINE) {
            self.lines.push(Line::Words(chunk.to_vec()));
        }
    }

    pub fn word_label(&mut self, name: impl Into<String>) {
        self.lines.push(Line::Words(vec![Word::Label(name.into())]));
    }

    pub fn word(&mut self, value: u16) {
        self.lines.push(Line::Words(vec![Word::Value(value)]));
    }

    pub fn align(&mut self, alignment: usize) {
        self.lines.push(Line::Align(alignment));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.lines.push(Line::Comment(text.into()));
    }

    pub fn blank(&mut self) {
        self.lines.push(Line::Blank);
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Render assembler source
    pub fn render(&self, dialect: Dialect) -> String {
        let mut text = String::new();
        for line in &self.lines {
            // Writing to a String cannot fail
            let _ = match line {
                Line::Segment(segment, base) => match dialect {
                    Dialect::Ca65 => writeln!(text, ".segment \"{}\"", segment.name()),
                    Dialect::Asm6 => writeln!(text, ".base ${:04X}", base),
                },
                Line::Label(name) => writeln!(text, "{}:", name),
                Line::Bytes(bytes) => {
                    let values: Vec<String> = bytes.iter().map(|b| format!("${:02X}", b)).collect();
                    writeln!(text, "\t{} {}", dialect.byte_directive(), values.join(","))
                }
                Line::Words(words) => {
                    let values: Vec<String> = words
                        .iter()
                        .map(|w| match w {
                            Word::Label(name) => name.clone(),
                            Word::Value(v) => format!("${:04X}", v),
                        })
                        .collect();
                    writeln!(text, "\t{} {}", dialect.word_directive(), values.join(","))
                }
                Line::Align(alignment) => match dialect {
                    Dialect::Ca65 => writeln!(text, "\t.align {}", alignment),
                    Dialect::Asm6 => writeln!(text, "\talign {}", alignment),
                },
                Line::Comment(comment) => writeln!(text, "; {}", comment),
                Line::Blank => writeln!(text),
            };
        }
        text
    }
}
