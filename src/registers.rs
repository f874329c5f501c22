//! The inverter registers this crate knows how to query and decode.

use crate::{
    inverter::{CommandId, RawDataType, RawRecord},
    measurement::{Direction, MeasurementType, Wire},
};

/// Signed 32 bit NaN marker, sent by inverters e.g. for DC values during
/// darkness.
const NAN_I32: u32 = 0x8000_0000;

/// Unsigned 32 bit NaN marker.
const NAN_U32: u32 = 0xffff_ffff;

/// Status32 value marking the currently selected entry of a status list.
const STATUS_SELECTED: u32 = 0x0100_0000;

/// Device status code for "OK".
const STATUS_OK: u32 = 307;

/// Grid relay status code for "closed".
const STATUS_RELAY_CLOSED: u32 = 51;

/// Static description of one inverter register: the query command that
/// returns it, its id and connector, the value encoding and the measurement
/// it maps to.
#[derive(Debug, Copy, Clone)]
pub struct RegisterDefinition {
    /// Query command that yields this register.
    pub command: CommandId,
    /// Register id, mask `0x00FFFF00` of the record word.
    pub register_id: u32,
    /// Connector number (MPP 1, MPP 2, AC 1).
    pub connector: u8,
    /// Value encoding used by the device.
    pub data_type: RawDataType,
    /// Measurement type including unit and divisor.
    pub measurement_type: MeasurementType,
    /// Wire the register belongs to.
    pub wire: Wire,
    /// Short technical name.
    pub name: &'static str,
}

impl RegisterDefinition {
    const fn new(
        command: CommandId,
        register_id: u32,
        connector: u8,
        data_type: RawDataType,
        measurement_type: MeasurementType,
        wire: Wire,
        name: &'static str,
    ) -> Self {
        Self {
            command,
            register_id,
            connector,
            data_type,
            measurement_type,
            wire,
            name,
        }
    }

    /// Packed map key combining register id and connector.
    pub const fn key(&self) -> u32 {
        self.register_id | self.connector as u32
    }

    /// Decode the first value of a raw record into the physical quantity of
    /// this register, or `None` when the record does not carry a usable
    /// numeric value.
    ///
    /// NaN markers decode to 0 rather than being dropped so that e.g. DC
    /// power reads as zero during darkness.
    pub fn decode(&self, record: &RawRecord) -> Option<f64> {
        match self.data_type {
            RawDataType::Signed32 => {
                let raw = record.value_u32(0)?;
                let value = if raw == NAN_I32 { 0 } else { raw as i32 };
                Some(self.measurement_type.scale(f64::from(value)))
            }
            RawDataType::Unsigned32 => {
                let raw = record.value_u32(0)?;
                let value = if raw == NAN_U32 { 0 } else { raw };
                Some(self.measurement_type.scale(f64::from(value)))
            }
            RawDataType::Status32 => {
                // A status record carries a list of status codes of which
                // exactly one is tagged as currently selected.
                let selected = (0..record.payload().len() / 4)
                    .filter_map(|i| record.value_u32(i * 4))
                    .find(|value| value & STATUS_SELECTED != 0)
                    .map(|value| value & 0x00ff_ffff)?;

                let on = match self.register_id {
                    id if id == DEVICE_STATUS.register_id => selected == STATUS_OK,
                    id if id == GRID_RELAY_STATUS.register_id => selected == STATUS_RELAY_CLOSED,
                    _ => return None,
                };
                Some(if on { 1.0 } else { 0.0 })
            }
            RawDataType::String32 | RawDataType::Float | RawDataType::Unknown(_) => None,
        }
    }
}

macro_rules! register {
    ($name:ident, $cmd:ident, $id:expr, $conn:expr, $dt:ident, $mt:expr, $wire:expr, $sname:literal) => {
        #[doc = concat!("Register `", stringify!($id), "`: ", $sname)]
        pub const $name: RegisterDefinition = RegisterDefinition::new(
            CommandId::$cmd,
            $id,
            $conn,
            RawDataType::$dt,
            $mt,
            $wire,
            $sname,
        );
    };
}

register!(DC_POWER_MPP1, DcQuery, 0x0025_1e00, 0x01, Signed32, MeasurementType::inverter_power(), Wire::Mpp1, "PpvdcA");
register!(DC_POWER_MPP2, DcQuery, 0x0025_1e00, 0x02, Signed32, MeasurementType::inverter_power(), Wire::Mpp2, "PpvdcB");
register!(DC_VOLTAGE_MPP1, DcQuery, 0x0045_1f00, 0x01, Signed32, MeasurementType::inverter_voltage(), Wire::Mpp1, "UpvdcA");
register!(DC_VOLTAGE_MPP2, DcQuery, 0x0045_1f00, 0x02, Signed32, MeasurementType::inverter_voltage(), Wire::Mpp2, "UpvdcB");
register!(DC_CURRENT_MPP1, DcQuery, 0x0045_2100, 0x01, Signed32, MeasurementType::inverter_current(), Wire::Mpp1, "IpvdcA");
register!(DC_CURRENT_MPP2, DcQuery, 0x0045_2100, 0x02, Signed32, MeasurementType::inverter_current(), Wire::Mpp2, "IpvdcB");

register!(AC_POWER_L1, AcQuery, 0x0046_4000, 0x01, Signed32, MeasurementType::inverter_power(), Wire::L1, "PacL1");
register!(AC_POWER_L2, AcQuery, 0x0046_4100, 0x01, Signed32, MeasurementType::inverter_power(), Wire::L2, "PacL2");
register!(AC_POWER_L3, AcQuery, 0x0046_4200, 0x01, Signed32, MeasurementType::inverter_power(), Wire::L3, "PacL3");
register!(AC_VOLTAGE_L1, AcQuery, 0x0046_4800, 0x01, Unsigned32, MeasurementType::inverter_voltage(), Wire::L1, "UacL1");
register!(AC_VOLTAGE_L2, AcQuery, 0x0046_4900, 0x01, Unsigned32, MeasurementType::inverter_voltage(), Wire::L2, "UacL2");
register!(AC_VOLTAGE_L3, AcQuery, 0x0046_4a00, 0x01, Unsigned32, MeasurementType::inverter_voltage(), Wire::L3, "UacL3");
register!(AC_VOLTAGE_L1_L2, AcQuery, 0x0046_4b00, 0x01, Unsigned32, MeasurementType::inverter_voltage(), Wire::L1L2, "UacL1L2");
register!(AC_VOLTAGE_L2_L3, AcQuery, 0x0046_4c00, 0x01, Unsigned32, MeasurementType::inverter_voltage(), Wire::L2L3, "UacL2L3");
register!(AC_VOLTAGE_L3_L1, AcQuery, 0x0046_4d00, 0x01, Unsigned32, MeasurementType::inverter_voltage(), Wire::L3L1, "UacL3L1");
register!(AC_POWER_FACTOR, AcQuery, 0x0046_4e00, 0x01, Unsigned32, MeasurementType::inverter_power_factor(), Wire::Total, "PacCosPhi");
register!(AC_CURRENT_L1, AcQuery, 0x0046_5300, 0x01, Signed32, MeasurementType::inverter_current(), Wire::L1, "IacL1");
register!(AC_CURRENT_L2, AcQuery, 0x0046_5400, 0x01, Signed32, MeasurementType::inverter_current(), Wire::L2, "IacL2");
register!(AC_CURRENT_L3, AcQuery, 0x0046_5500, 0x01, Signed32, MeasurementType::inverter_current(), Wire::L3, "IacL3");
register!(AC_FREQUENCY, AcQuery, 0x0046_5700, 0x01, Unsigned32, MeasurementType::inverter_frequency(), Wire::Total, "Fac");
register!(AC_POWER_TOTAL, AcQuery, 0x0026_3f00, 0x01, Signed32, MeasurementType::inverter_power(), Wire::Total, "Pac");
register!(AC_REACTIVE_POWER_TOTAL, AcQuery, 0x0026_5f00, 0x01, Signed32, MeasurementType::inverter_reactive_power(), Wire::Total, "Qac");
register!(NOMINAL_POWER, AcQuery, 0x0041_1e00, 0x01, Unsigned32, MeasurementType::inverter_nominal_power(), Wire::Total, "Pnominal");

register!(ENERGY_TOTAL, EnergyQuery, 0x0026_0100, 0x01, Unsigned32, MeasurementType::inverter_energy(Direction::None), Wire::Total, "Etotal");
register!(ENERGY_DAILY, EnergyQuery, 0x0026_2200, 0x01, Unsigned32, MeasurementType::inverter_energy(Direction::None), Wire::None, "Edaily");
register!(GRID_EXPORT_ENERGY_TOTAL, EnergyQuery, 0x0046_2400, 0x01, Unsigned32, MeasurementType::inverter_energy(Direction::Negative), Wire::GridTotal, "Eexport");
register!(GRID_IMPORT_ENERGY_TOTAL, EnergyQuery, 0x0046_2500, 0x01, Unsigned32, MeasurementType::inverter_energy(Direction::Positive), Wire::GridTotal, "Eimport");
register!(OPERATION_TIME, EnergyQuery, 0x0046_2e00, 0x01, Unsigned32, MeasurementType::inverter_duration(), Wire::Total, "htotal");
register!(FEED_IN_TIME, EnergyQuery, 0x0046_2f00, 0x01, Unsigned32, MeasurementType::inverter_duration(), Wire::None, "hon");

register!(DEVICE_STATUS, StatusQuery, 0x0021_4800, 0x01, Status32, MeasurementType::inverter_status(), Wire::DeviceOk, "OpInvCtlStt");
register!(GRID_RELAY_STATUS, StatusQuery, 0x0041_6400, 0x01, Status32, MeasurementType::inverter_status(), Wire::RelayOn, "OpGriSwStt");

register!(DEVICE_NAME, DeviceQuery, 0x0082_1e00, 0x01, String32, MeasurementType::inverter_status(), Wire::None, "Name");
register!(DEVICE_CLASS, DeviceQuery, 0x0082_1f00, 0x01, Status32, MeasurementType::inverter_status(), Wire::None, "MainModel");
register!(DEVICE_TYPE, DeviceQuery, 0x0082_2000, 0x01, Status32, MeasurementType::inverter_status(), Wire::None, "Model");
register!(SOFTWARE_VERSION, DeviceQuery, 0x0082_3400, 0x01, Unsigned32, MeasurementType::inverter_status(), Wire::None, "SwRev");

/// All registers this crate queries and decodes.
pub fn all_known() -> Vec<RegisterDefinition> {
    vec![
        DC_POWER_MPP1,
        DC_POWER_MPP2,
        DC_VOLTAGE_MPP1,
        DC_VOLTAGE_MPP2,
        DC_CURRENT_MPP1,
        DC_CURRENT_MPP2,
        AC_POWER_L1,
        AC_POWER_L2,
        AC_POWER_L3,
        AC_VOLTAGE_L1,
        AC_VOLTAGE_L2,
        AC_VOLTAGE_L3,
        AC_VOLTAGE_L1_L2,
        AC_VOLTAGE_L2_L3,
        AC_VOLTAGE_L3_L1,
        AC_POWER_FACTOR,
        AC_CURRENT_L1,
        AC_CURRENT_L2,
        AC_CURRENT_L3,
        AC_FREQUENCY,
        AC_POWER_TOTAL,
        AC_REACTIVE_POWER_TOTAL,
        NOMINAL_POWER,
        ENERGY_TOTAL,
        ENERGY_DAILY,
        GRID_EXPORT_ENERGY_TOTAL,
        GRID_IMPORT_ENERGY_TOTAL,
        OPERATION_TIME,
        FEED_IN_TIME,
        DEVICE_STATUS,
        GRID_RELAY_STATUS,
        DEVICE_NAME,
        DEVICE_CLASS,
        DEVICE_TYPE,
        SOFTWARE_VERSION,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(register_id: u32, connector: u8, data_type: RawDataType, words: &[u32]) -> RawRecord {
        let mut payload = [0u8; 40];
        for (i, w) in words.iter().enumerate() {
            payload[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        RawRecord {
            command: 0,
            register_id,
            connector,
            data_type,
            time: 1000,
            data: payload,
            data_len: (words.len() * 4) as u8,
        }
    }

    #[test]
    fn signed_value_decodes() {
        let r = record(DC_POWER_MPP1.register_id, 1, RawDataType::Signed32, &[0x57]);

        assert_eq!(DC_POWER_MPP1.decode(&r), Some(87.0));
    }

    #[test]
    fn signed_nan_decodes_to_zero() {
        let r = record(
            DC_POWER_MPP1.register_id,
            1,
            RawDataType::Signed32,
            &[NAN_I32],
        );

        assert_eq!(DC_POWER_MPP1.decode(&r), Some(0.0));
    }

    #[test]
    fn unsigned_nan_decodes_to_zero() {
        let r = record(
            AC_VOLTAGE_L1.register_id,
            1,
            RawDataType::Unsigned32,
            &[NAN_U32],
        );

        assert_eq!(AC_VOLTAGE_L1.decode(&r), Some(0.0));
    }

    #[test]
    fn voltage_scales_by_divisor() {
        let r = record(
            AC_VOLTAGE_L1.register_id,
            1,
            RawDataType::Unsigned32,
            &[0x595a],
        );

        // 0x595a = 22874 hundredths of a volt.
        assert_eq!(AC_VOLTAGE_L1.decode(&r), Some(228.74));
    }

    #[test]
    fn relay_status_selects_tagged_entry() {
        // Status list: 0x33 (closed, not selected), 0x137 selected, NaN fill.
        let r = record(
            GRID_RELAY_STATUS.register_id,
            1,
            RawDataType::Status32,
            &[0x0000_0033, 0x0100_0137, 0x00ff_fffd, 0x00ff_fffe],
        );
        assert_eq!(GRID_RELAY_STATUS.decode(&r), Some(0.0));

        let r = record(
            GRID_RELAY_STATUS.register_id,
            1,
            RawDataType::Status32,
            &[0x0100_0033, 0x0000_0137, 0x00ff_fffd, 0x00ff_fffe],
        );
        assert_eq!(GRID_RELAY_STATUS.decode(&r), Some(1.0));
    }

    #[test]
    fn device_status_ok() {
        let r = record(
            DEVICE_STATUS.register_id,
            1,
            RawDataType::Status32,
            &[0x0100_0133, 0x00ff_fffe],
        );

        // 0x133 = 307 = OK.
        assert_eq!(DEVICE_STATUS.decode(&r), Some(1.0));
    }

    #[test]
    fn keys_are_unique() {
        let all = all_known();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.key(), b.key(), "{} vs {}", a.name, b.name);
            }
        }
    }
}
