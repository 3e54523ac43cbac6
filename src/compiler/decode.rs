//! Reference interpreters for compiled data
//!
//! These walk encoded envelopes and token streams the way the playback driver
//! does. They are used to check the encoders and to describe streams in the
//! compile report.

use super::envelope::{unbias, JUMP};
use super::kernel::{Decoded, Kernel, Op};
use super::token::{SymbolId, Token};

/// Play an encoded curve for `frames` frames, releasing the note at `release_at`
pub fn decode_envelope(bytes: &[u8], frames: usize, release_at: Option<usize>) -> Vec<i8> {
    let mut out = Vec::with_capacity(frames);
    let mut pos = 1;
    let mut run_left = 0;
    let mut value = 0;
    let mut halted = false;

    for frame in 0..frames {
        if release_at == Some(frame) && bytes[0] != 0 {
            pos = usize::from(bytes[0]);
            run_left = 0;
            halted = false;
        }

        if run_left == 0 && !halted {
            let mut hops = 0;
            while bytes[pos] == JUMP {
                let target = usize::from(bytes[pos + 1]);
                hops += 1;
                if target == pos || hops > bytes.len() {
                    halted = true;
                    break;
                }
                pos = target;
            }
            if !halted {
                if bytes[pos] >= 0x80 {
                    value = unbias(bytes[pos]);
                    run_left = 1;
                    pos += 1;
                } else {
                    run_left = usize::from(bytes[pos]);
                    value = unbias(bytes[pos + 1]);
                    pos += 2;
                }
            }
        }

        out.push(value);
        run_left = run_left.saturating_sub(1);
    }

    out
}

/// Replace every back-reference by the tokens it replays
pub fn expand_references(kernel: Kernel, tokens: &[Token]) -> Vec<Token> {
    let reference = kernel.opcode(Op::Reference);
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        match (tokens[i], tokens.get(i + 1), tokens.get(i + 2)) {
            (Token::Opcode(op), Some(Token::Byte(count)), Some(Token::LocalRef(target)))
                if Some(op) == reference =>
            {
                replay(tokens, *target as usize, usize::from(*count), &mut out);
                i += 3;
            }
            (token, _, _) => {
                out.push(token);
                i += 1;
            }
        }
    }

    out
}

fn replay(tokens: &[Token], start: usize, count: usize, out: &mut Vec<Token>) {
    let mut notes = 0;
    for &token in &tokens[start..] {
        if notes == count && (token.starts_instruction() || matches!(token, Token::Label(_))) {
            break;
        }
        if matches!(token, Token::Note(_)) {
            notes += 1;
        }
        out.push(token);
    }
}

/// Number of row-advancing instructions in a stream
pub fn note_count(tokens: &[Token]) -> usize {
    tokens
        .iter()
        .filter(|t| matches!(t, Token::Note(_)))
        .count()
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Label(SymbolId),
    /// Note value (0 = stop) and whether one empty row is packed into it
    Note { note: u8, empty_row: bool },
    Instrument(u8),
    EmptyRows(usize),
    Op {
        op: Op,
        bytes: Vec<u8>,
        refs: Vec<Token>,
    },
    Invalid(Token),
}

/// Split a token stream into instructions
pub fn disassemble(kernel: Kernel, tokens: &[Token]) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        i += 1;
        let byte = match token {
            Token::Label(symbol) => {
                out.push(Instruction::Label(symbol));
                continue;
            }
            Token::Opcode(b) | Token::Note(b) => b,
            _ => {
                out.push(Instruction::Invalid(token));
                continue;
            }
        };

        let instruction = match kernel.decode(byte) {
            Decoded::Note { note, empty_row } => Instruction::Note { note, empty_row },
            Decoded::Instrument(slot) => Instruction::Instrument(slot),
            Decoded::EmptyRows(count) => Instruction::EmptyRows(count),
            Decoded::Op(op) => {
                let layout = op.operands();
                let mut bytes = Vec::with_capacity(layout.bytes);
                let mut refs = Vec::with_capacity(layout.refs);
                for _ in 0..layout.bytes {
                    if let Some(Token::Byte(b)) = tokens.get(i) {
                        bytes.push(*b);
                        i += 1;
                    }
                }
                for _ in 0..layout.refs {
                    if let Some(t @ (Token::Ref(_) | Token::LocalRef(_))) = tokens.get(i) {
                        refs.push(*t);
                        i += 1;
                    }
                }
                Instruction::Op { op, bytes, refs }
            }
            Decoded::Invalid => Instruction::Invalid(token),
        };
        out.push(instruction);
    }

    out
}
