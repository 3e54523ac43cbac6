//! Warning sink for data-quality problems
//!
//! Warnings never change the compiled artifact; they are forwarded to the
//! `log` facade and collected so callers can show them after a compile.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Curve needs a feature the driver lacks (hi-pitch, release on classic kernel)
    UnsupportedCurve,
    /// Empty or inconsistent curve replaced by the default
    MalformedCurve,
    /// Instrument or sample table ceiling exceeded
    TableOverflow,
    /// Channels fighting over a shared hardware resource
    AmbiguousSharing,
    /// Effect or feature not available on the kernel or channel
    UnsupportedFeature,
    /// Value outside its representable range
    Clamped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Default)]
pub struct CompileLog {
    warnings: Vec<Warning>,
    seen: HashSet<String>,
}

impl CompileLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.push(Warning { kind, message });
    }

    /// Warn only the first time a given message is produced
    pub fn warn_once(&mut self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        if self.seen.insert(message.clone()) {
            self.warn(kind, message);
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}
