//! Size statistics of a compile, serialized with `--report`

use crate::error::Result;
use crate::project::ChannelKind;
use serde::Serialize;

/// One compiled channel stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: ChannelKind,
    /// Stream size before back-reference compression
    pub raw_bytes: usize,
    pub compressed_bytes: usize,
    /// Minimum notes per reference (0 when compression is off)
    pub threshold: usize,
    pub references: usize,
    /// Row-advancing instructions in the uncompressed stream
    pub notes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongReport {
    pub index: usize,
    pub name: String,
    pub channels: Vec<ChannelReport>,
}

impl SongReport {
    pub fn raw_bytes(&self) -> usize {
        self.channels.iter().map(|c| c.raw_bytes).sum()
    }

    pub fn compressed_bytes(&self) -> usize {
        self.channels.iter().map(|c| c.compressed_bytes).sum()
    }
}

/// Entry count and byte size of one shared table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableSize {
    pub entries: usize,
    pub bytes: usize,
}

impl TableSize {
    pub fn new(entries: usize, bytes: usize) -> Self {
        Self { entries, bytes }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub primary_instruments: TableSize,
    pub extended_instruments: TableSize,
    pub sample_mappings: TableSize,
    pub envelopes: TableSize,
    pub grooves: TableSize,
    pub fds_waves: TableSize,
    pub fds_modulations: TableSize,
    pub n163_waves: TableSize,
    pub samples: TableSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub kernel: &'static str,
    pub songs: Vec<SongReport>,
    pub tables: TableReport,
    /// Size of the assembled music segment
    pub music_bytes: usize,
    /// Size of the assembled DPCM segment
    pub sample_bytes: usize,
    pub warnings: usize,
}

impl CompileReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Stream bytes saved by compression over every song
    pub fn saved_bytes(&self) -> usize {
        self.songs
            .iter()
            .map(|s| s.raw_bytes().saturating_sub(s.compressed_bytes()))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(kind: ChannelKind, raw: usize, compressed: usize) -> ChannelReport {
        ChannelReport {
            channel: kind,
            raw_bytes: raw,
            compressed_bytes: compressed,
            threshold: 8,
            references: 1,
            notes: 10,
        }
    }

    #[test]
    fn test_saved_bytes() {
        let report = CompileReport {
            kernel: "extended",
            songs: vec![SongReport {
                index: 0,
                name: "intro".to_string(),
                channels: vec![
                    channel(ChannelKind::Square1, 100, 60),
                    channel(ChannelKind::Triangle, 20, 20),
                ],
            }],
            tables: TableReport::default(),
            music_bytes: 200,
            sample_bytes: 0,
            warnings: 0,
        };
        assert_eq!(report.songs[0].raw_bytes(), 120);
        assert_eq!(report.saved_bytes(), 40);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"channel\": \"square1\""));
        assert!(json.contains("\"compressed_bytes\": 60"));
    }
}
