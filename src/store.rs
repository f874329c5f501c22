//! The shared map of live measurements, keyed by OBIS id or register id.

use crate::{
    inverter::{RawDataType, RawRecord},
    measurement::{Measurement, MeasurementKey},
    obis::{self, ObisDefinition},
    registers::{self, RegisterDefinition},
};
use std::collections::BTreeMap;

/// A register slot: the static definition plus the live measurement.
#[derive(Debug, Clone)]
pub struct RegisterSlot {
    /// Static register description, needed to decode raw records.
    pub definition: RegisterDefinition,
    /// Live measurement state.
    pub measurement: Measurement,
}

/// All live measurements of the engine.
///
/// The OBIS filter fills the emeter side, the command client's query results
/// fill the register side, and the derived value stage reads across both.
/// The store is single threaded like the rest of the receive pipeline.
#[derive(Debug, Default)]
pub struct MeasurementStore {
    obis: BTreeMap<u32, Measurement>,
    registers: BTreeMap<u32, RegisterSlot>,
}

impl MeasurementStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with every known OBIS element and inverter
    /// register, each with room for `sample_capacity` samples.
    pub fn with_defaults(sample_capacity: usize) -> Self {
        let mut store = Self::new();

        for definition in obis::all_known() {
            store.add_obis(&definition, sample_capacity);
        }
        for definition in registers::all_known() {
            store.add_register(&definition, sample_capacity);
        }

        store
    }

    /// Add a slot for one OBIS element.
    pub fn add_obis(&mut self, definition: &ObisDefinition, sample_capacity: usize) {
        self.obis.insert(
            definition.id.key(),
            Measurement::new(
                definition.measurement_type,
                definition.wire,
                MeasurementKey::Obis(definition.id),
                definition.name,
                sample_capacity,
            ),
        );
    }

    /// Add a slot for one inverter register.
    pub fn add_register(&mut self, definition: &RegisterDefinition, sample_capacity: usize) {
        self.registers.insert(
            definition.key(),
            RegisterSlot {
                definition: *definition,
                measurement: Measurement::new(
                    definition.measurement_type,
                    definition.wire,
                    MeasurementKey::Register {
                        id: definition.register_id,
                        connector: definition.connector,
                    },
                    definition.name,
                    sample_capacity,
                ),
            },
        );
    }

    /// Measurement for a packed OBIS key.
    pub fn obis(&self, key: u32) -> Option<&Measurement> {
        self.obis.get(&key)
    }

    /// Mutable measurement for a packed OBIS key.
    pub fn obis_mut(&mut self, key: u32) -> Option<&mut Measurement> {
        self.obis.get_mut(&key)
    }

    /// Measurement for an OBIS definition.
    pub fn obis_measurement(&self, definition: &ObisDefinition) -> Option<&Measurement> {
        self.obis(definition.id.key())
    }

    /// Register slot for a packed register key.
    pub fn register(&self, key: u32) -> Option<&RegisterSlot> {
        self.registers.get(&key)
    }

    /// Mutable register slot for a packed register key.
    pub fn register_mut(&mut self, key: u32) -> Option<&mut RegisterSlot> {
        self.registers.get_mut(&key)
    }

    /// Measurement for a register definition.
    pub fn register_measurement(&self, definition: &RegisterDefinition) -> Option<&Measurement> {
        self.registers.get(&definition.key()).map(|s| &s.measurement)
    }

    /// Decode a raw reply record into its register slot.
    ///
    /// Returns the updated measurement, or `None` when the record belongs to
    /// no known register or carries no usable value.
    pub fn ingest_record(&mut self, record: &RawRecord) -> Option<&Measurement> {
        let slot = self.registers.get_mut(&record.key())?;

        if slot.definition.data_type == RawDataType::String32 {
            slot.measurement.text = Some(record.value_string());
            return Some(&slot.measurement);
        }

        let value = slot.definition.decode(record)?;
        slot.measurement.series.append(value, record.time);

        Some(&slot.measurement)
    }
}
