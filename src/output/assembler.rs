//! Binary assembly of the typed line list
//!
//! Labels are collected into a symbol table while bytes are laid out; every
//! word operand naming a label leaves a two-byte hole recorded in a patch
//! list, filled once all addresses are known.

use super::{Line, Segment, Word};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// A hole waiting for a label address
#[derive(Debug, Clone)]
struct Patch {
    segment: Segment,
    offset: usize,
    symbol: String,
}

#[derive(Debug, Clone)]
struct SegmentData {
    base: u16,
    bytes: Vec<u8>,
}

impl SegmentData {
    fn address(&self) -> u32 {
        u32::from(self.base) + self.bytes.len() as u32
    }
}

/// Result of assembling the line list
#[derive(Debug, Clone, Default)]
pub struct Assembled {
    pub music: Vec<u8>,
    pub samples: Vec<u8>,
    /// Absolute address of every label
    pub symbols: BTreeMap<String, u16>,
}

/// Assemble lines; a segment line is required before the first byte.
/// Lines before any segment line land in the music segment at `music_base`.
pub fn assemble(lines: &[Line], music_base: u16) -> Result<Assembled> {
    let mut segments: BTreeMap<Segment, SegmentData> = BTreeMap::new();
    segments.insert(
        Segment::Music,
        SegmentData {
            base: music_base,
            bytes: Vec::new(),
        },
    );
    let mut current = Segment::Music;
    let mut symbols = BTreeMap::new();
    let mut patches = Vec::new();

    for line in lines {
        match line {
            Line::Segment(segment, base) => {
                current = *segment;
                segments.entry(current).or_insert(SegmentData {
                    base: *base,
                    bytes: Vec::new(),
                });
                continue;
            }
            Line::Comment(_) | Line::Blank => continue,
            _ => {}
        }

        let Some(data) = segments.get_mut(&current) else {
            continue;
        };
        match line {
            Line::Label(name) => {
                let address = u16::try_from(data.address())
                    .map_err(|_| Error::AddressOverflow(current.name()))?;
                symbols.insert(name.clone(), address);
            }
            Line::Bytes(bytes) => data.bytes.extend_from_slice(bytes),
            Line::Words(words) => {
                for word in words {
                    match word {
                        Word::Value(value) => data.bytes.extend_from_slice(&value.to_le_bytes()),
                        Word::Label(name) => {
                            patches.push(Patch {
                                segment: current,
                                offset: data.bytes.len(),
                                symbol: name.clone(),
                            });
                            data.bytes.extend_from_slice(&[0, 0]);
                        }
                    }
                }
            }
            Line::Align(alignment) => {
                let alignment = (*alignment).max(1) as u32;
                while data.address() % alignment != 0 {
                    data.bytes.push(0);
                }
            }
            Line::Segment(..) | Line::Comment(_) | Line::Blank => {}
        }

        if data.address() > 0x1_0000 {
            return Err(Error::AddressOverflow(current.name()));
        }
    }

    for patch in &patches {
        let address = *symbols
            .get(&patch.symbol)
            .ok_or_else(|| Error::UnresolvedSymbol(patch.symbol.clone()))?;
        if let Some(data) = segments.get_mut(&patch.segment) {
            data.bytes[patch.offset..patch.offset + 2].copy_from_slice(&address.to_le_bytes());
        }
    }

    let mut take = |segment| {
        segments
            .remove(&segment)
            .map(|data| data.bytes)
            .unwrap_or_default()
    };
    Ok(Assembled {
        music: take(Segment::Music),
        samples: take(Segment::Samples),
        symbols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_reference_patched() {
        let lines = vec![
            Line::Segment(Segment::Music, 0x8000),
            Line::Words(vec![Word::Label("table".to_string()), Word::Value(0xBEEF)]),
            Line::Label("table".to_string()),
            Line::Bytes(vec![1, 2, 3]),
        ];
        let assembled = assemble(&lines, 0x8000).unwrap();
        assert_eq!(assembled.music, vec![0x04, 0x80, 0xEF, 0xBE, 1, 2, 3]);
        assert_eq!(assembled.symbols["table"], 0x8004);
    }

    #[test]
    fn test_sample_segment_aligned() {
        let lines = vec![
            Line::Segment(Segment::Music, 0x8000),
            Line::Words(vec![Word::Label("kick".to_string())]),
            Line::Segment(Segment::Samples, 0xC000),
            Line::Bytes(vec![0x55; 17]),
            Line::Align(64),
            Line::Label("kick".to_string()),
            Line::Bytes(vec![0xAA]),
        ];
        let assembled = assemble(&lines, 0x8000).unwrap();
        assert_eq!(assembled.symbols["kick"], 0xC040);
        assert_eq!(assembled.music, vec![0x40, 0xC0]);
        assert_eq!(assembled.samples.len(), 65);
    }

    #[test]
    fn test_unresolved_symbol() {
        let lines = vec![Line::Words(vec![Word::Label("nowhere".to_string())])];
        assert!(matches!(
            assemble(&lines, 0x8000),
            Err(Error::UnresolvedSymbol(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_overflow() {
        let lines = vec![
            Line::Segment(Segment::Music, 0xFFF0),
            Line::Bytes(vec![0; 32]),
        ];
        assert!(matches!(
            assemble(&lines, 0xFFF0),
            Err(Error::AddressOverflow(_))
        ));
    }

    #[test]
    fn test_segment_may_fill_last_byte() {
        let lines = vec![
            Line::Segment(Segment::Music, 0xFFF0),
            Line::Label("tail".to_string()),
            Line::Bytes(vec![0; 16]),
        ];
        let assembled = assemble(&lines, 0xFFF0).unwrap();
        assert_eq!(assembled.symbols["tail"], 0xFFF0);
        assert_eq!(assembled.music.len(), 16);
    }

    #[test]
    fn test_label_past_address_space() {
        let lines = vec![
            Line::Segment(Segment::Music, 0xFFF0),
            Line::Bytes(vec![0; 16]),
            Line::Label("wrapped".to_string()),
        ];
        assert!(matches!(
            assemble(&lines, 0xFFF0),
            Err(Error::AddressOverflow("MUSIC"))
        ));
    }
}
