//! Instrument slot assignment and instrument curve processing

use super::diagnostics::{CompileLog, WarningKind};
use super::envelope::EnvelopeTable;
use super::kernel::{Kernel, MAX_INSTRUMENT_SLOTS};
use super::waveform::InstrumentWaves;
use crate::project::{EnvelopeKind, Expansion, Instrument, InstrumentTable, Project};

/// Number of records in the extended instrument table
pub const MAX_EXTENDED_SLOTS: usize = 32;

/// Instrument index to table slot mapping
#[derive(Debug, Default)]
pub struct InstrumentSlots {
    slots: Vec<Option<usize>>,
    /// Instrument indices in primary slot order
    pub primary: Vec<usize>,
    /// Instrument indices in extended slot order
    pub extended: Vec<usize>,
}

/// Table an instrument's records live in
pub fn instrument_table(instrument: &Instrument) -> InstrumentTable {
    match instrument.kind.expansion() {
        None | Some(Expansion::Mmc5) => InstrumentTable::Primary,
        Some(_) => InstrumentTable::Extended,
    }
}

impl InstrumentSlots {
    /// Give every playable instrument a slot in project order.
    ///
    /// Instruments past a table's capacity are reported and share slot 0.
    pub fn assign(project: &Project, kernel: Kernel, log: &mut CompileLog) -> Self {
        let mut slots = Self::default();

        for (index, instrument) in project.instruments.iter().enumerate() {
            let playable = match instrument.kind.expansion() {
                None => true,
                Some(exp) => kernel.allows_expansions() && project.uses_expansion(exp),
            };
            if !playable {
                slots.slots.push(None);
                continue;
            }

            let (list, capacity, name) = match instrument_table(instrument) {
                InstrumentTable::Primary => (&mut slots.primary, MAX_INSTRUMENT_SLOTS, "primary"),
                InstrumentTable::Extended => (&mut slots.extended, MAX_EXTENDED_SLOTS, "extended"),
            };

            if list.len() >= capacity {
                log.warn(
                    WarningKind::TableOverflow,
                    format!(
                        "Instrument '{}' exceeds the {} {} instrument slots, using slot 0",
                        instrument.name, capacity, name
                    ),
                );
                slots.slots.push(Some(0));
            } else {
                slots.slots.push(Some(list.len()));
                list.push(index);
            }
        }

        slots
    }

    /// Slot of an instrument, `None` if it cannot be played
    pub fn slot(&self, instrument: usize) -> Option<usize> {
        self.slots.get(instrument).copied().flatten()
    }
}

/// Envelope table indices referenced by an instrument record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentEnvelopes {
    pub volume: usize,
    pub arpeggio: usize,
    pub pitch: usize,
    pub duty: usize,
    /// Register init value carrying a constant duty
    pub duty_init: u8,
}

impl InstrumentEnvelopes {
    pub fn process(
        instrument: &Instrument,
        kernel: Kernel,
        envelopes: &mut EnvelopeTable,
        log: &mut CompileLog,
    ) -> Self {
        let mut add =
            |kind: EnvelopeKind| envelopes.add(instrument.envelope(kind), kind, kernel, log);
        let volume = add(EnvelopeKind::Volume);
        let arpeggio = add(EnvelopeKind::Arpeggio);
        let pitch = add(EnvelopeKind::Pitch);
        let duty = add(EnvelopeKind::DutyCycle);

        let duty_init = instrument
            .envelope(EnvelopeKind::DutyCycle)
            .and_then(|env| env.values.first())
            .map_or(0, |&v| v.clamp(0, 7) as u8);

        Self {
            volume,
            arpeggio,
            pitch,
            duty,
            duty_init,
        }
    }
}

/// Everything an instrument record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentData {
    pub envelopes: InstrumentEnvelopes,
    pub waves: InstrumentWaves,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Envelope, InstrumentKind};

    #[test]
    fn test_slot_overflow_falls_back() {
        let mut project = Project::new("p");
        for i in 0..MAX_INSTRUMENT_SLOTS + 2 {
            project
                .instruments
                .push(Instrument::new(&format!("i{}", i), InstrumentKind::Apu));
        }
        let mut log = CompileLog::new();
        let slots = InstrumentSlots::assign(&project, Kernel::Extended, &mut log);
        assert_eq!(slots.slot(63), Some(63));
        assert_eq!(slots.slot(64), Some(0));
        assert_eq!(slots.primary.len(), MAX_INSTRUMENT_SLOTS);
        assert_eq!(log.warnings().len(), 2);
    }

    #[test]
    fn test_disabled_expansion_has_no_slot() {
        let mut project = Project::new("p");
        project.instruments.push(Instrument::new("a", InstrumentKind::Apu));
        project.instruments.push(Instrument::new("v", InstrumentKind::Vrc6));
        project.instruments.push(Instrument::new("b", InstrumentKind::Apu));
        let mut log = CompileLog::new();
        let slots = InstrumentSlots::assign(&project, Kernel::Extended, &mut log);
        assert_eq!(slots.slot(0), Some(0));
        assert_eq!(slots.slot(1), None);
        assert_eq!(slots.slot(2), Some(1));

        project.expansions.insert(Expansion::Vrc6);
        let slots = InstrumentSlots::assign(&project, Kernel::Extended, &mut log);
        assert_eq!(slots.slot(1), Some(0));
        assert_eq!(slots.extended, vec![1]);
    }

    #[test]
    fn test_constant_duty_goes_to_init_byte() {
        let instrument = Instrument::new("lead", InstrumentKind::Apu)
            .with_envelope(EnvelopeKind::DutyCycle, Envelope::new(vec![2]));
        let mut table = EnvelopeTable::new();
        let mut log = CompileLog::new();
        let envs = InstrumentEnvelopes::process(&instrument, Kernel::Extended, &mut table, &mut log);
        assert_eq!(envs.duty, EnvelopeTable::DEFAULT_INDEX);
        assert_eq!(envs.duty_init, 2);
        assert_eq!(table.len(), 1);
    }
}
