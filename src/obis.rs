//! OBIS identifiers and the set of elements found in SMA emeter packets.

use crate::measurement::{MeasurementType, Wire};

/// OBIS channel carrying the firmware version. Its elements have a type byte
/// of 0 but a 4 byte payload.
pub const FIRMWARE_VERSION_CHANNEL: u8 = 144;

/// An OBIS identifier as found in emeter packets.
///
/// The `kind` byte doubles as the payload length: 4 for unsigned and 7 for
/// signed 32 bit values, 8 for unsigned 64 bit values, 0 for the firmware
/// version and the end-of-data marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ObisId {
    /// Measurement channel.
    pub channel: u8,
    /// Measured quantity.
    pub index: u8,
    /// Value type, also the payload length in bytes.
    pub kind: u8,
    /// Tariff number.
    pub tariff: u8,
}

impl ObisId {
    /// Create an OBIS identifier.
    pub const fn new(channel: u8, index: u8, kind: u8, tariff: u8) -> Self {
        Self {
            channel,
            index,
            kind,
            tariff,
        }
    }

    /// Packed map key: `channel.index.kind.tariff` as one big-endian word.
    pub const fn key(self) -> u32 {
        (self.channel as u32) << 24
            | (self.index as u32) << 16
            | (self.kind as u32) << 8
            | self.tariff as u32
    }
}

impl core::fmt::Display for ObisId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}.{:02}.{}.{}",
            self.channel, self.index, self.kind, self.tariff
        )
    }
}

/// Static description of one OBIS element: its identifier, measurement type
/// and the wire it belongs to.
#[derive(Debug, Copy, Clone)]
pub struct ObisDefinition {
    /// Identifier on the wire.
    pub id: ObisId,
    /// Measurement type including unit and divisor.
    pub measurement_type: MeasurementType,
    /// Wire the element belongs to.
    pub wire: Wire,
    /// Short technical name.
    pub name: &'static str,
}

impl ObisDefinition {
    const fn new(
        id: ObisId,
        measurement_type: MeasurementType,
        wire: Wire,
        name: &'static str,
    ) -> Self {
        Self {
            id,
            measurement_type,
            wire,
            name,
        }
    }
}

macro_rules! obis {
    ($name:ident, $ch:expr, $idx:expr, $kind:expr, $tariff:expr, $mt:expr, $wire:expr, $sname:literal) => {
        #[doc = concat!("`", stringify!($ch), ".", stringify!($idx), ".", stringify!($kind), ".", stringify!($tariff), "`: ", $sname)]
        pub const $name: ObisDefinition = ObisDefinition::new(
            ObisId::new($ch, $idx, $kind, $tariff),
            $mt,
            $wire,
            $sname,
        );
    };
}

// Instantaneous powers have a type byte of 4, energy counters of 8. The
// signed power set is never on the wire; it is synthesized from the positive
// and negative counterparts and uses the signed type byte 7.

obis!(POSITIVE_ACTIVE_POWER_TOTAL, 0, 1, 4, 0, MeasurementType::emeter_positive_active_power(), Wire::Total, "Pin");
obis!(POSITIVE_ACTIVE_POWER_L1, 0, 21, 4, 0, MeasurementType::emeter_positive_active_power(), Wire::L1, "PinL1");
obis!(POSITIVE_ACTIVE_POWER_L2, 0, 41, 4, 0, MeasurementType::emeter_positive_active_power(), Wire::L2, "PinL2");
obis!(POSITIVE_ACTIVE_POWER_L3, 0, 61, 4, 0, MeasurementType::emeter_positive_active_power(), Wire::L3, "PinL3");
obis!(POSITIVE_ACTIVE_ENERGY_TOTAL, 0, 1, 8, 0, MeasurementType::emeter_positive_active_energy(), Wire::Total, "Ein");
obis!(POSITIVE_ACTIVE_ENERGY_L1, 0, 21, 8, 0, MeasurementType::emeter_positive_active_energy(), Wire::L1, "EinL1");
obis!(POSITIVE_ACTIVE_ENERGY_L2, 0, 41, 8, 0, MeasurementType::emeter_positive_active_energy(), Wire::L2, "EinL2");
obis!(POSITIVE_ACTIVE_ENERGY_L3, 0, 61, 8, 0, MeasurementType::emeter_positive_active_energy(), Wire::L3, "EinL3");

obis!(NEGATIVE_ACTIVE_POWER_TOTAL, 0, 2, 4, 0, MeasurementType::emeter_negative_active_power(), Wire::Total, "Pout");
obis!(NEGATIVE_ACTIVE_POWER_L1, 0, 22, 4, 0, MeasurementType::emeter_negative_active_power(), Wire::L1, "PoutL1");
obis!(NEGATIVE_ACTIVE_POWER_L2, 0, 42, 4, 0, MeasurementType::emeter_negative_active_power(), Wire::L2, "PoutL2");
obis!(NEGATIVE_ACTIVE_POWER_L3, 0, 62, 4, 0, MeasurementType::emeter_negative_active_power(), Wire::L3, "PoutL3");
obis!(NEGATIVE_ACTIVE_ENERGY_TOTAL, 0, 2, 8, 0, MeasurementType::emeter_negative_active_energy(), Wire::Total, "Eout");
obis!(NEGATIVE_ACTIVE_ENERGY_L1, 0, 22, 8, 0, MeasurementType::emeter_negative_active_energy(), Wire::L1, "EoutL1");
obis!(NEGATIVE_ACTIVE_ENERGY_L2, 0, 42, 8, 0, MeasurementType::emeter_negative_active_energy(), Wire::L2, "EoutL2");
obis!(NEGATIVE_ACTIVE_ENERGY_L3, 0, 62, 8, 0, MeasurementType::emeter_negative_active_energy(), Wire::L3, "EoutL3");

obis!(POSITIVE_REACTIVE_POWER_TOTAL, 0, 3, 4, 0, MeasurementType::emeter_positive_reactive_power(), Wire::Total, "Qin");
obis!(POSITIVE_REACTIVE_POWER_L1, 0, 23, 4, 0, MeasurementType::emeter_positive_reactive_power(), Wire::L1, "QinL1");
obis!(POSITIVE_REACTIVE_POWER_L2, 0, 43, 4, 0, MeasurementType::emeter_positive_reactive_power(), Wire::L2, "QinL2");
obis!(POSITIVE_REACTIVE_POWER_L3, 0, 63, 4, 0, MeasurementType::emeter_positive_reactive_power(), Wire::L3, "QinL3");
obis!(POSITIVE_REACTIVE_ENERGY_TOTAL, 0, 3, 8, 0, MeasurementType::emeter_positive_reactive_energy(), Wire::Total, "EQin");
obis!(POSITIVE_REACTIVE_ENERGY_L1, 0, 23, 8, 0, MeasurementType::emeter_positive_reactive_energy(), Wire::L1, "EQinL1");
obis!(POSITIVE_REACTIVE_ENERGY_L2, 0, 43, 8, 0, MeasurementType::emeter_positive_reactive_energy(), Wire::L2, "EQinL2");
obis!(POSITIVE_REACTIVE_ENERGY_L3, 0, 63, 8, 0, MeasurementType::emeter_positive_reactive_energy(), Wire::L3, "EQinL3");

obis!(NEGATIVE_REACTIVE_POWER_TOTAL, 0, 4, 4, 0, MeasurementType::emeter_negative_reactive_power(), Wire::Total, "Qout");
obis!(NEGATIVE_REACTIVE_POWER_L1, 0, 24, 4, 0, MeasurementType::emeter_negative_reactive_power(), Wire::L1, "QoutL1");
obis!(NEGATIVE_REACTIVE_POWER_L2, 0, 44, 4, 0, MeasurementType::emeter_negative_reactive_power(), Wire::L2, "QoutL2");
obis!(NEGATIVE_REACTIVE_POWER_L3, 0, 64, 4, 0, MeasurementType::emeter_negative_reactive_power(), Wire::L3, "QoutL3");
obis!(NEGATIVE_REACTIVE_ENERGY_TOTAL, 0, 4, 8, 0, MeasurementType::emeter_negative_reactive_energy(), Wire::Total, "EQout");
obis!(NEGATIVE_REACTIVE_ENERGY_L1, 0, 24, 8, 0, MeasurementType::emeter_negative_reactive_energy(), Wire::L1, "EQoutL1");
obis!(NEGATIVE_REACTIVE_ENERGY_L2, 0, 44, 8, 0, MeasurementType::emeter_negative_reactive_energy(), Wire::L2, "EQoutL2");
obis!(NEGATIVE_REACTIVE_ENERGY_L3, 0, 64, 8, 0, MeasurementType::emeter_negative_reactive_energy(), Wire::L3, "EQoutL3");

obis!(POSITIVE_APPARENT_POWER_TOTAL, 0, 9, 4, 0, MeasurementType::emeter_positive_apparent_power(), Wire::Total, "Sin");
obis!(POSITIVE_APPARENT_POWER_L1, 0, 29, 4, 0, MeasurementType::emeter_positive_apparent_power(), Wire::L1, "SinL1");
obis!(POSITIVE_APPARENT_POWER_L2, 0, 49, 4, 0, MeasurementType::emeter_positive_apparent_power(), Wire::L2, "SinL2");
obis!(POSITIVE_APPARENT_POWER_L3, 0, 69, 4, 0, MeasurementType::emeter_positive_apparent_power(), Wire::L3, "SinL3");
obis!(POSITIVE_APPARENT_ENERGY_TOTAL, 0, 9, 8, 0, MeasurementType::emeter_positive_apparent_energy(), Wire::Total, "ESin");
obis!(POSITIVE_APPARENT_ENERGY_L1, 0, 29, 8, 0, MeasurementType::emeter_positive_apparent_energy(), Wire::L1, "ESinL1");
obis!(POSITIVE_APPARENT_ENERGY_L2, 0, 49, 8, 0, MeasurementType::emeter_positive_apparent_energy(), Wire::L2, "ESinL2");
obis!(POSITIVE_APPARENT_ENERGY_L3, 0, 69, 8, 0, MeasurementType::emeter_positive_apparent_energy(), Wire::L3, "ESinL3");

obis!(NEGATIVE_APPARENT_POWER_TOTAL, 0, 10, 4, 0, MeasurementType::emeter_negative_apparent_power(), Wire::Total, "Sout");
obis!(NEGATIVE_APPARENT_POWER_L1, 0, 30, 4, 0, MeasurementType::emeter_negative_apparent_power(), Wire::L1, "SoutL1");
obis!(NEGATIVE_APPARENT_POWER_L2, 0, 50, 4, 0, MeasurementType::emeter_negative_apparent_power(), Wire::L2, "SoutL2");
obis!(NEGATIVE_APPARENT_POWER_L3, 0, 70, 4, 0, MeasurementType::emeter_negative_apparent_power(), Wire::L3, "SoutL3");
obis!(NEGATIVE_APPARENT_ENERGY_TOTAL, 0, 10, 8, 0, MeasurementType::emeter_negative_apparent_energy(), Wire::Total, "ESout");
obis!(NEGATIVE_APPARENT_ENERGY_L1, 0, 30, 8, 0, MeasurementType::emeter_negative_apparent_energy(), Wire::L1, "ESoutL1");
obis!(NEGATIVE_APPARENT_ENERGY_L2, 0, 50, 8, 0, MeasurementType::emeter_negative_apparent_energy(), Wire::L2, "ESoutL2");
obis!(NEGATIVE_APPARENT_ENERGY_L3, 0, 70, 8, 0, MeasurementType::emeter_negative_apparent_energy(), Wire::L3, "ESoutL3");

obis!(POWER_FACTOR_TOTAL, 0, 13, 4, 0, MeasurementType::emeter_power_factor(), Wire::Total, "CosPhi");
obis!(POWER_FACTOR_L1, 0, 33, 4, 0, MeasurementType::emeter_power_factor(), Wire::L1, "CosPhiL1");
obis!(POWER_FACTOR_L2, 0, 53, 4, 0, MeasurementType::emeter_power_factor(), Wire::L2, "CosPhiL2");
obis!(POWER_FACTOR_L3, 0, 73, 4, 0, MeasurementType::emeter_power_factor(), Wire::L3, "CosPhiL3");

obis!(FREQUENCY, 0, 14, 4, 0, MeasurementType::emeter_frequency(), Wire::Total, "F");

obis!(CURRENT_L1, 0, 31, 4, 0, MeasurementType::emeter_current(), Wire::L1, "IL1");
obis!(CURRENT_L2, 0, 51, 4, 0, MeasurementType::emeter_current(), Wire::L2, "IL2");
obis!(CURRENT_L3, 0, 71, 4, 0, MeasurementType::emeter_current(), Wire::L3, "IL3");

obis!(VOLTAGE_L1, 0, 32, 4, 0, MeasurementType::emeter_voltage(), Wire::L1, "UL1");
obis!(VOLTAGE_L2, 0, 52, 4, 0, MeasurementType::emeter_voltage(), Wire::L2, "UL2");
obis!(VOLTAGE_L3, 0, 72, 4, 0, MeasurementType::emeter_voltage(), Wire::L3, "UL3");

obis!(FIRMWARE_VERSION, 144, 0, 0, 0, MeasurementType::emeter_firmware_version(), Wire::None, "Version");
obis!(END_OF_DATA, 0, 0, 0, 0, MeasurementType::emeter_end_of_data(), Wire::None, "End");

obis!(SIGNED_ACTIVE_POWER_TOTAL, 0, 16, 7, 0, MeasurementType::emeter_signed_active_power(), Wire::Total, "Psigned");
obis!(SIGNED_ACTIVE_POWER_L1, 0, 36, 7, 0, MeasurementType::emeter_signed_active_power(), Wire::L1, "PsignedL1");
obis!(SIGNED_ACTIVE_POWER_L2, 0, 56, 7, 0, MeasurementType::emeter_signed_active_power(), Wire::L2, "PsignedL2");
obis!(SIGNED_ACTIVE_POWER_L3, 0, 76, 7, 0, MeasurementType::emeter_signed_active_power(), Wire::L3, "PsignedL3");

/// All OBIS elements an SMA emeter is known to send, plus the synthesized
/// signed power set.
pub fn all_known() -> Vec<ObisDefinition> {
    vec![
        POSITIVE_ACTIVE_POWER_TOTAL,
        POSITIVE_ACTIVE_POWER_L1,
        POSITIVE_ACTIVE_POWER_L2,
        POSITIVE_ACTIVE_POWER_L3,
        POSITIVE_ACTIVE_ENERGY_TOTAL,
        POSITIVE_ACTIVE_ENERGY_L1,
        POSITIVE_ACTIVE_ENERGY_L2,
        POSITIVE_ACTIVE_ENERGY_L3,
        NEGATIVE_ACTIVE_POWER_TOTAL,
        NEGATIVE_ACTIVE_POWER_L1,
        NEGATIVE_ACTIVE_POWER_L2,
        NEGATIVE_ACTIVE_POWER_L3,
        NEGATIVE_ACTIVE_ENERGY_TOTAL,
        NEGATIVE_ACTIVE_ENERGY_L1,
        NEGATIVE_ACTIVE_ENERGY_L2,
        NEGATIVE_ACTIVE_ENERGY_L3,
        POSITIVE_REACTIVE_POWER_TOTAL,
        POSITIVE_REACTIVE_POWER_L1,
        POSITIVE_REACTIVE_POWER_L2,
        POSITIVE_REACTIVE_POWER_L3,
        POSITIVE_REACTIVE_ENERGY_TOTAL,
        POSITIVE_REACTIVE_ENERGY_L1,
        POSITIVE_REACTIVE_ENERGY_L2,
        POSITIVE_REACTIVE_ENERGY_L3,
        NEGATIVE_REACTIVE_POWER_TOTAL,
        NEGATIVE_REACTIVE_POWER_L1,
        NEGATIVE_REACTIVE_POWER_L2,
        NEGATIVE_REACTIVE_POWER_L3,
        NEGATIVE_REACTIVE_ENERGY_TOTAL,
        NEGATIVE_REACTIVE_ENERGY_L1,
        NEGATIVE_REACTIVE_ENERGY_L2,
        NEGATIVE_REACTIVE_ENERGY_L3,
        POSITIVE_APPARENT_POWER_TOTAL,
        POSITIVE_APPARENT_POWER_L1,
        POSITIVE_APPARENT_POWER_L2,
        POSITIVE_APPARENT_POWER_L3,
        POSITIVE_APPARENT_ENERGY_TOTAL,
        POSITIVE_APPARENT_ENERGY_L1,
        POSITIVE_APPARENT_ENERGY_L2,
        POSITIVE_APPARENT_ENERGY_L3,
        NEGATIVE_APPARENT_POWER_TOTAL,
        NEGATIVE_APPARENT_POWER_L1,
        NEGATIVE_APPARENT_POWER_L2,
        NEGATIVE_APPARENT_POWER_L3,
        NEGATIVE_APPARENT_ENERGY_TOTAL,
        NEGATIVE_APPARENT_ENERGY_L1,
        NEGATIVE_APPARENT_ENERGY_L2,
        NEGATIVE_APPARENT_ENERGY_L3,
        POWER_FACTOR_TOTAL,
        POWER_FACTOR_L1,
        POWER_FACTOR_L2,
        POWER_FACTOR_L3,
        FREQUENCY,
        CURRENT_L1,
        CURRENT_L2,
        CURRENT_L3,
        VOLTAGE_L1,
        VOLTAGE_L2,
        VOLTAGE_L3,
        FIRMWARE_VERSION,
        SIGNED_ACTIVE_POWER_TOTAL,
        SIGNED_ACTIVE_POWER_L1,
        SIGNED_ACTIVE_POWER_L2,
        SIGNED_ACTIVE_POWER_L3,
    ]
}
