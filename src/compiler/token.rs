//! Intermediate instruction stream tokens
//!
//! Every byte a channel stream will contain is one token. Tokens carry the
//! structural role of the byte so the compressor and emitter know where the
//! stream may be split, merged or referenced.

use std::collections::HashMap;

pub type SymbolId = u32;

/// Structural role of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    PlainByte,
    OpcodeStart,
    NoteBoundary,
    Label,
    ForwardReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// Operand byte
    Byte(u8),
    /// First byte of an instruction that does not advance the row
    Opcode(u8),
    /// First byte of an instruction that advances the row (note, stop, empty rows, release)
    Note(u8),
    /// Zero-width position marker
    Label(SymbolId),
    /// Two-byte address of a symbol
    Ref(SymbolId),
    /// Two-byte address of a token offset inside the same stream
    LocalRef(u32),
}

impl Token {
    pub fn role(&self) -> Role {
        match self {
            Self::Byte(_) => Role::PlainByte,
            Self::Opcode(_) => Role::OpcodeStart,
            Self::Note(_) => Role::NoteBoundary,
            Self::Label(_) => Role::Label,
            Self::Ref(_) | Self::LocalRef(_) => Role::ForwardReference,
        }
    }

    /// Whether an instruction begins at this token
    pub fn starts_instruction(&self) -> bool {
        matches!(self, Self::Opcode(_) | Self::Note(_))
    }

    /// Size in the final byte stream
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Label(_) => 0,
            Self::Ref(_) | Self::LocalRef(_) => 2,
            _ => 1,
        }
    }

    /// Stable numeric code used by the content hash
    pub fn code(&self) -> u32 {
        match *self {
            Self::Byte(b) => u32::from(b),
            Self::Opcode(b) => 0x100 | u32::from(b),
            Self::Note(b) => 0x200 | u32::from(b),
            Self::Label(s) => 0x1000_0000 ^ s,
            Self::Ref(s) => 0x2000_0000 ^ s,
            Self::LocalRef(o) => 0x4000_0000 ^ o,
        }
    }
}

/// Total byte size of a token stream
pub fn byte_size(tokens: &[Token]) -> usize {
    tokens.iter().map(Token::byte_size).sum()
}

/// Interned label names, owned by one compile invocation
#[derive(Debug, Default)]
pub struct Symbols {
    names: Vec<String>,
    lookup: HashMap<String, SymbolId>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = self.names.len() as SymbolId;
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.names[id as usize]
    }
}
