use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Project parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Instrument '{name}' ({kind}) is not supported {reason}")]
    UnsupportedInstrument {
        name: String,
        kind: &'static str,
        reason: String,
    },

    #[error("Instrument {0} does not exist")]
    MissingInstrument(usize),

    #[error("Arpeggio {0} does not exist")]
    MissingArpeggio(usize),

    #[error("Sample {0} does not exist")]
    MissingSample(usize),

    #[error("Pattern {pattern} does not exist in channel {channel} of song '{song}'")]
    MissingPattern {
        song: String,
        channel: &'static str,
        pattern: usize,
    },

    #[error("Channel {channel} requires the {expansion} expansion")]
    ExpansionDisabled {
        channel: &'static str,
        expansion: &'static str,
    },

    #[error("The {kernel} kernel does not support the {expansion} expansion")]
    UnsupportedExpansion {
        kernel: &'static str,
        expansion: &'static str,
    },

    #[error("Unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("The {0} segment does not fit in the 64K address space")]
    AddressOverflow(&'static str),

    #[error("DPCM samples cannot be loaded at ${0:04X}: the address must be 64-byte aligned and at least $C000")]
    InvalidSampleBase(u16),

    #[error("No songs selected for compilation")]
    NoSongs,

    #[error("Song index {0} out of range")]
    InvalidSong(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
