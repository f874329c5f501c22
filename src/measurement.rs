//! Static measurement type descriptions and live measurement state.

use crate::{obis::ObisId, series::MeasurementSeries};

/// Direction of an energy flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Direction {
    /// Energy is consumed from the grid.
    Positive,
    /// Energy is provided to the grid.
    Negative,
    /// Both directions expressed as a signed value.
    Signed,
    /// Direction is not applicable.
    None,
}

/// Logical conductor or aggregate a measurement belongs to.
///
/// Totals, DC inputs and status values are treated as wires of their own.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Wire {
    /// Total over L1 + L2 + L3.
    Total,
    /// Phase L1.
    L1,
    /// Phase L2.
    L2,
    /// Phase L3.
    L3,
    /// Phase to phase voltage L1 → L2.
    L1L2,
    /// Phase to phase voltage L2 → L3.
    L2L3,
    /// Phase to phase voltage L3 → L1.
    L3L1,
    /// Total over MPP1 + MPP2 direct current inputs.
    MppTotal,
    /// First DC input.
    Mpp1,
    /// Second DC input.
    Mpp2,
    /// Conversion loss, DC total minus AC total.
    LossTotal,
    /// Total at the grid connection point.
    GridTotal,
    /// Device OK status.
    DeviceOk,
    /// Grid relay switched on.
    RelayOn,
    /// Monetary income from grid feed-in.
    FeedIn,
    /// Monetary savings from self-consumption.
    SelfConsumption,
    /// Wire is not applicable.
    None,
}

/// Physical quantity of a measurement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Quantity {
    /// Electrical power.
    Power,
    /// Electrical energy.
    Energy,
    /// Power factor.
    PowerFactor,
    /// Grid frequency.
    Frequency,
    /// Electrical current.
    Current,
    /// Electrical voltage.
    Voltage,
    /// Device status.
    Status,
    /// Conversion efficiency.
    Efficiency,
    /// Percentage value.
    Percentage,
    /// Temperature.
    Temperature,
    /// Time duration.
    Duration,
    /// Monetary amount.
    Currency,
    /// Quantity is not applicable.
    None,
}

impl Quantity {
    /// Energy is accumulated over time; everything else is an instantaneous
    /// reading.
    pub fn is_accumulated(self) -> bool {
        self == Quantity::Energy
    }
}

/// Flavour of a power or energy measurement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Kind {
    /// Active power or energy.
    Active,
    /// Reactive power or energy.
    Reactive,
    /// Apparent power or energy.
    Apparent,
    /// Nominal power.
    Nominal,
    /// Software version.
    Version,
    /// End of data marker.
    EndOfData,
    /// Kind is not applicable.
    None,
}

/// Fixed properties of a measurement type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeasurementType {
    /// Direction of the energy flow.
    pub direction: Direction,
    /// Flavour of the measurement.
    pub kind: Kind,
    /// Physical quantity.
    pub quantity: Quantity,
    /// Unit after applying the divisor, e.g. `W` or `kWh`.
    pub unit: &'static str,
    /// Raw wire values are divided by this to obtain values in `unit`.
    pub divisor: u32,
}

impl MeasurementType {
    const fn new(
        direction: Direction,
        kind: Kind,
        quantity: Quantity,
        unit: &'static str,
        divisor: u32,
    ) -> Self {
        Self {
            direction,
            kind,
            quantity,
            unit,
            divisor,
        }
    }

    /// Convert a raw wire value to the physical unit of this type.
    pub fn scale(&self, raw: f64) -> f64 {
        raw / self.divisor as f64
    }

    // Emeter measurement types. Divisors follow the emeter wire format:
    // powers are in 0.1 W, energies in Ws, voltages/currents/ratios in
    // thousandths.

    /// Active power drawn from the grid.
    pub const fn emeter_positive_active_power() -> Self {
        Self::new(Direction::Positive, Kind::Active, Quantity::Power, "W", 10)
    }

    /// Active energy drawn from the grid.
    pub const fn emeter_positive_active_energy() -> Self {
        Self::new(
            Direction::Positive,
            Kind::Active,
            Quantity::Energy,
            "kWh",
            3_600_000,
        )
    }

    /// Active power fed into the grid.
    pub const fn emeter_negative_active_power() -> Self {
        Self::new(Direction::Negative, Kind::Active, Quantity::Power, "W", 10)
    }

    /// Active energy fed into the grid.
    pub const fn emeter_negative_active_energy() -> Self {
        Self::new(
            Direction::Negative,
            Kind::Active,
            Quantity::Energy,
            "kWh",
            3_600_000,
        )
    }

    /// Reactive power drawn from the grid.
    pub const fn emeter_positive_reactive_power() -> Self {
        Self::new(
            Direction::Positive,
            Kind::Reactive,
            Quantity::Power,
            "Var",
            10,
        )
    }

    /// Reactive energy drawn from the grid.
    pub const fn emeter_positive_reactive_energy() -> Self {
        Self::new(
            Direction::Positive,
            Kind::Reactive,
            Quantity::Energy,
            "Varh",
            3_600_000,
        )
    }

    /// Reactive power fed into the grid.
    pub const fn emeter_negative_reactive_power() -> Self {
        Self::new(
            Direction::Negative,
            Kind::Reactive,
            Quantity::Power,
            "Var",
            10,
        )
    }

    /// Reactive energy fed into the grid.
    pub const fn emeter_negative_reactive_energy() -> Self {
        Self::new(
            Direction::Negative,
            Kind::Reactive,
            Quantity::Energy,
            "Varh",
            3_600_000,
        )
    }

    /// Apparent power drawn from the grid.
    pub const fn emeter_positive_apparent_power() -> Self {
        Self::new(
            Direction::Positive,
            Kind::Apparent,
            Quantity::Power,
            "VA",
            10,
        )
    }

    /// Apparent energy drawn from the grid.
    pub const fn emeter_positive_apparent_energy() -> Self {
        Self::new(
            Direction::Positive,
            Kind::Apparent,
            Quantity::Energy,
            "VAh",
            3_600_000,
        )
    }

    /// Apparent power fed into the grid.
    pub const fn emeter_negative_apparent_power() -> Self {
        Self::new(
            Direction::Negative,
            Kind::Apparent,
            Quantity::Power,
            "VA",
            10,
        )
    }

    /// Apparent energy fed into the grid.
    pub const fn emeter_negative_apparent_energy() -> Self {
        Self::new(
            Direction::Negative,
            Kind::Apparent,
            Quantity::Energy,
            "VAh",
            3_600_000,
        )
    }

    /// Signed active power, synthesized from the positive and negative
    /// counterparts.
    pub const fn emeter_signed_active_power() -> Self {
        Self::new(Direction::Signed, Kind::Active, Quantity::Power, "W", 10)
    }

    /// Power factor.
    pub const fn emeter_power_factor() -> Self {
        Self::new(
            Direction::None,
            Kind::None,
            Quantity::PowerFactor,
            "phi",
            1000,
        )
    }

    /// Grid frequency.
    pub const fn emeter_frequency() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Frequency, "Hz", 1000)
    }

    /// Phase voltage.
    pub const fn emeter_voltage() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Voltage, "V", 1000)
    }

    /// Phase current.
    pub const fn emeter_current() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Current, "A", 1000)
    }

    /// Firmware version pseudo measurement.
    pub const fn emeter_firmware_version() -> Self {
        Self::new(Direction::None, Kind::Version, Quantity::None, "", 1)
    }

    /// End of data marker.
    pub const fn emeter_end_of_data() -> Self {
        Self::new(Direction::None, Kind::EndOfData, Quantity::None, "", 1)
    }

    // Inverter measurement types. Inverter registers scale differently from
    // the emeter wire format.

    /// Inverter power register.
    pub const fn inverter_power() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Power, "W", 1)
    }

    /// Inverter reactive power register.
    pub const fn inverter_reactive_power() -> Self {
        Self::new(Direction::None, Kind::Reactive, Quantity::Power, "Var", 1)
    }

    /// Inverter nominal power register.
    pub const fn inverter_nominal_power() -> Self {
        Self::new(Direction::None, Kind::Nominal, Quantity::Power, "W", 1)
    }

    /// Inverter power factor register.
    pub const fn inverter_power_factor() -> Self {
        Self::new(
            Direction::None,
            Kind::None,
            Quantity::PowerFactor,
            "phi",
            100,
        )
    }

    /// Inverter grid frequency register.
    pub const fn inverter_frequency() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Frequency, "Hz", 100)
    }

    /// Inverter voltage register.
    pub const fn inverter_voltage() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Voltage, "V", 100)
    }

    /// Inverter current register.
    pub const fn inverter_current() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Current, "A", 1000)
    }

    /// Inverter status register.
    pub const fn inverter_status() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Status, "", 1)
    }

    /// Inverter energy counter.
    pub const fn inverter_energy(direction: Direction) -> Self {
        Self::new(direction, Kind::Active, Quantity::Energy, "Wh", 1)
    }

    /// Inverter efficiency, derived from DC and AC totals.
    pub const fn inverter_efficiency() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Efficiency, "%", 1)
    }

    /// Inverter conversion loss, derived from DC and AC totals.
    pub const fn inverter_loss() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Power, "W", 1)
    }

    /// Operating duration counter.
    pub const fn inverter_duration() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Duration, "s", 1)
    }

    /// Monetary amount derived from tariff rates.
    pub const fn currency() -> Self {
        Self::new(Direction::None, Kind::None, Quantity::Currency, "Eur", 1)
    }
}

/// Identifies where a live measurement comes from on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MeasurementKey {
    /// An OBIS element in an emeter packet.
    Obis(ObisId),
    /// An inverter register with its connector number.
    Register {
        /// Register id, mask `0x00FFFF00` of the record word.
        id: u32,
        /// Connector number (MPP 1, MPP 2, AC 1).
        connector: u8,
    },
    /// A value derived from other measurements.
    Derived,
}

impl MeasurementKey {
    /// Packed map key.
    pub fn key(self) -> u32 {
        match self {
            MeasurementKey::Obis(id) => id.key(),
            MeasurementKey::Register { id, connector } => id | u32::from(connector),
            MeasurementKey::Derived => 0,
        }
    }
}

/// A live measurement: a static type, the wire it was measured on and the
/// bounded sample history.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Static properties.
    pub measurement_type: MeasurementType,
    /// Wire the measurement belongs to.
    pub wire: Wire,
    /// Wire origin of the measurement.
    pub key: MeasurementKey,
    /// Short technical name, e.g. `PacL1`.
    pub name: &'static str,
    /// Sample history. Samples are appended with monotonically non-decreasing
    /// timestamps in the clock of the originating device.
    pub series: MeasurementSeries,
    /// Most recent non-numeric value, e.g. a firmware version or device name.
    pub text: Option<String>,
}

impl Measurement {
    /// Create an empty measurement with the given sample capacity.
    pub fn new(
        measurement_type: MeasurementType,
        wire: Wire,
        key: MeasurementKey,
        name: &'static str,
        capacity: usize,
    ) -> Self {
        Self {
            measurement_type,
            wire,
            key,
            name,
            series: MeasurementSeries::new(capacity),
            text: None,
        }
    }

    /// Scale a raw wire value by the type divisor and append it.
    pub fn append_raw(&mut self, raw: f64, time: u32) {
        self.series.append(self.measurement_type.scale(raw), time);
    }
}
