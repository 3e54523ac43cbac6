//! Back-reference compression of channel streams
//!
//! Repeated passages are replaced by a reference instruction that makes the
//! driver play a number of notes from an earlier offset of the same stream
//! and return. Candidates are found through a hash index of 4-token windows
//! of the output written so far.

use super::kernel::{Kernel, Op};
use super::token::{byte_size, Token};
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Tokens covered by one index entry
pub const WINDOW: usize = 4;

/// The note count operand is a single byte
pub const MAX_REFERENCE_NOTES: usize = 255;

/// Minimum match lengths (in notes) tried by the sweep
pub const THRESHOLDS: RangeInclusive<usize> = 8..=40;

fn window_hash(window: &[Token]) -> u64 {
    window.iter().fold(0xcbf2_9ce4_8422_2325, |hash, token| {
        (hash ^ u64::from(token.code())).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Tokens that can be played back from another position
fn replayable(token: &Token) -> bool {
    !matches!(token, Token::Label(_) | Token::Ref(_) | Token::LocalRef(_))
}

/// A region of the source matching earlier output
#[derive(Debug, Clone, Copy)]
struct Match {
    target: usize,
    length: usize,
    notes: usize,
}

/// Output stream with its hash index
struct Compressor<'a> {
    source: &'a [Token],
    min_notes: usize,
    out: Vec<Token>,
    /// Whether an output token was copied from the source
    literal: Vec<bool>,
    index: HashMap<u64, Vec<usize>>,
}

impl<'a> Compressor<'a> {
    fn new(source: &'a [Token], min_notes: usize) -> Self {
        Self {
            source,
            min_notes,
            out: Vec::with_capacity(source.len()),
            literal: Vec::with_capacity(source.len()),
            index: HashMap::new(),
        }
    }

    fn find(&self, at: usize) -> Option<Match> {
        let window = self.source.get(at..at + WINDOW)?;
        if !self.source[at].starts_instruction() || !window.iter().all(replayable) {
            return None;
        }
        let candidates = self.index.get(&window_hash(window))?;

        let mut best: Option<Match> = None;
        for &target in candidates {
            if let Some(found) = self.extend(at, target) {
                if best.map_or(true, |b| found.length > b.length) {
                    best = Some(found);
                }
            }
        }
        best
    }

    /// Longest admissible region at `at` replaying output from `target`.
    /// Regions end right after a note instruction.
    fn extend(&self, at: usize, target: usize) -> Option<Match> {
        let mut accepted = None;
        let mut notes = 0;
        let mut ends_with_note = false;
        let mut length = 0;

        while at + length < self.source.len() && target + length < self.out.len() {
            let token = self.source[at + length];
            if !self.literal[target + length]
                || !replayable(&token)
                || self.out[target + length] != token
            {
                break;
            }
            if token.starts_instruction() {
                if matches!(token, Token::Note(_)) {
                    if notes == MAX_REFERENCE_NOTES {
                        break;
                    }
                    notes += 1;
                    ends_with_note = true;
                } else {
                    ends_with_note = false;
                }
            }
            length += 1;

            let boundary = self
                .source
                .get(at + length)
                .map_or(true, Token::starts_instruction);
            if boundary && ends_with_note && notes >= self.min_notes {
                accepted = Some(Match {
                    target,
                    length,
                    notes,
                });
            }
        }

        accepted
    }

    fn copy(&mut self, token: Token) {
        self.out.push(token);
        self.literal.push(true);

        let Some(start) = self.out.len().checked_sub(WINDOW) else {
            return;
        };
        let window = &self.out[start..];
        if window[0].starts_instruction()
            && self.literal[start..].iter().all(|&l| l)
            && window.iter().all(replayable)
        {
            self.index
                .entry(window_hash(window))
                .or_default()
                .push(start);
        }
    }

    fn run(mut self, reference: u8) -> Vec<Token> {
        let mut at = 0;
        while at < self.source.len() {
            match self.find(at) {
                Some(found) => {
                    // Skipped regions are not indexed
                    self.out.extend([
                        Token::Opcode(reference),
                        Token::Byte(found.notes as u8),
                        Token::LocalRef(found.target as u32),
                    ]);
                    self.literal.extend([false; 3]);
                    at += found.length;
                }
                None => {
                    self.copy(self.source[at]);
                    at += 1;
                }
            }
        }
        self.out
    }
}

/// Compress a stream, replacing repeats of at least `min_notes` notes
pub fn compress(tokens: &[Token], kernel: Kernel, min_notes: usize) -> Vec<Token> {
    match kernel.opcode(Op::Reference) {
        Some(reference) => Compressor::new(tokens, min_notes.max(1)).run(reference),
        None => tokens.to_vec(),
    }
}

/// Compress with every threshold of a range and keep the smallest result.
/// Equal sizes prefer the larger threshold. Returns the stream and the
/// threshold used (0 when the range is empty).
pub fn compress_best(
    tokens: &[Token],
    kernel: Kernel,
    thresholds: RangeInclusive<usize>,
) -> (Vec<Token>, usize) {
    let mut best: Option<(Vec<Token>, usize, usize)> = None;

    for threshold in thresholds {
        let compressed = compress(tokens, kernel, threshold);
        let size = byte_size(&compressed);
        if best.as_ref().map_or(true, |(_, best_size, _)| size <= *best_size) {
            best = Some((compressed, size, threshold));
        }
    }

    match best {
        Some((compressed, _, threshold)) => (compressed, threshold),
        None => (tokens.to_vec(), 0),
    }
}

/// Number of reference instructions in a compressed stream
pub fn reference_count(tokens: &[Token], kernel: Kernel) -> usize {
    let Some(reference) = kernel.opcode(Op::Reference) else {
        return 0;
    };
    tokens
        .windows(3)
        .filter(|w| {
            w[0] == Token::Opcode(reference)
                && matches!(w[1], Token::Byte(_))
                && matches!(w[2], Token::LocalRef(_))
        })
        .count()
}
