//! Speedwire device addressing and the device records produced by discovery.

use std::net::Ipv4Addr;

/// A Speedwire device address: subsystem id plus serial number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceAddress {
    /// SMA subsystem id.
    pub susy_id: u16,
    /// Device serial number.
    pub serial_number: u32,
}

impl DeviceAddress {
    /// The address this library uses as its own identity in requests.
    pub const LOCAL: Self = Self::new(0x007d, 0x3a28_be42);

    /// The broadcast address matched by every device.
    pub const BROADCAST: Self = Self::new(0xffff, 0xffff_ffff);

    /// The all-zero address of a device that has not been identified yet.
    pub const UNKNOWN: Self = Self::new(0, 0);

    /// Create an address from its parts.
    pub const fn new(susy_id: u16, serial_number: u32) -> Self {
        Self {
            susy_id,
            serial_number,
        }
    }

    /// `true` for the all-zero placeholder address.
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl core::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.susy_id, self.serial_number)
    }
}

/// Well known Speedwire device classes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u16)]
pub enum DeviceClass {
    /// Unknown device class.
    #[default]
    Unknown = 0x0000,
    /// Photovoltaic inverter.
    PvInverter = 0x8001,
    /// Battery inverter.
    BatteryInverter = 0x8007,
    /// Hybrid inverter.
    HybridInverter = 0x8009,
    /// Electrical energy meter.
    Emeter = 0x8065,
}

impl DeviceClass {
    /// Map a raw device class code.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x8001 => Self::PvInverter,
            0x8007 => Self::BatteryInverter,
            0x8009 => Self::HybridInverter,
            0x8065 => Self::Emeter,
            _ => Self::Unknown,
        }
    }

    /// `true` for any of the inverter classes.
    pub fn is_inverter(self) -> bool {
        matches!(
            self,
            Self::PvInverter | Self::BatteryInverter | Self::HybridInverter
        )
    }
}

impl core::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DeviceClass::Unknown => "Unknown",
            DeviceClass::PvInverter => "PV-Inverter",
            DeviceClass::BatteryInverter => "Battery-Inverter",
            DeviceClass::HybridInverter => "Hybrid-Inverter",
            DeviceClass::Emeter => "Emeter",
        };
        f.write_str(s)
    }
}

/// Device types known by their susy id.
///
/// The susy id identifies the product family, so a freshly discovered device
/// can be labelled without querying it.
#[derive(Debug, Copy, Clone)]
pub struct DeviceType {
    /// Subsystem id of the product family.
    pub susy_id: u16,
    /// Brief technical name.
    pub name: &'static str,
    /// Device class of the family.
    pub device_class: DeviceClass,
}

impl DeviceType {
    const KNOWN: &'static [DeviceType] = &[
        DeviceType {
            susy_id: 270,
            name: "EMETER-10",
            device_class: DeviceClass::Emeter,
        },
        DeviceType {
            susy_id: 349,
            name: "EMETER-20",
            device_class: DeviceClass::Emeter,
        },
        DeviceType {
            susy_id: 372,
            name: "HM-20",
            device_class: DeviceClass::Emeter,
        },
        DeviceType {
            susy_id: 378,
            name: "STP-5.0-3AV-40",
            device_class: DeviceClass::PvInverter,
        },
    ];

    /// Look up a known device type by susy id.
    pub fn from_susy_id(susy_id: u16) -> Option<&'static DeviceType> {
        Self::KNOWN.iter().find(|t| t.susy_id == susy_id)
    }
}

/// A device known to the registry.
///
/// Records are created by discovery, either pre-registered with just an ip
/// address or fully registered with the complete data set, and only mutated
/// by promoting a pre-registered record once its identity is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device address; all zero while only pre-registered.
    pub address: DeviceAddress,
    /// Device class.
    pub device_class: DeviceClass,
    /// Device type label.
    pub device_type: String,
    /// Address the device sends from.
    pub peer_ip: Ipv4Addr,
    /// Local interface address the device is reachable through.
    pub interface_ip: Ipv4Addr,
}

impl DeviceRecord {
    /// Create a pre-registered record carrying only the peer ip.
    pub fn pre_registered(peer_ip: Ipv4Addr) -> Self {
        Self {
            address: DeviceAddress::UNKNOWN,
            device_class: DeviceClass::Unknown,
            device_type: String::new(),
            peer_ip,
            interface_ip: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// `true` while only the peer ip is known.
    pub fn is_pre_registered(&self) -> bool {
        self.address.is_unknown() && !self.peer_ip.is_unspecified()
    }

    /// `true` once identity, class and interface are all known.
    pub fn is_fully_registered(&self) -> bool {
        !self.address.is_unknown()
            && !self.peer_ip.is_unspecified()
            && !self.interface_ip.is_unspecified()
    }

    /// Two records describe the same device when address and peer ip match.
    pub fn same_device(&self, other: &Self) -> bool {
        self.address == other.address && self.peer_ip == other.peer_ip
    }
}

impl core::fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "susy {} serial {} class {} type {} ip {} if {}",
            self.address.susy_id,
            self.address.serial_number,
            self.device_class,
            self.device_type,
            self.peer_ip,
            self.interface_ip
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_lifecycle() {
        let pre = DeviceRecord::pre_registered(Ipv4Addr::new(192, 168, 182, 18));

        assert!(pre.is_pre_registered());
        assert!(!pre.is_fully_registered());

        let full = DeviceRecord {
            address: DeviceAddress::new(0x01b3, 0x2a84_017a),
            device_class: DeviceClass::PvInverter,
            device_type: "Inverter".into(),
            peer_ip: Ipv4Addr::new(192, 168, 182, 18),
            interface_ip: Ipv4Addr::new(192, 168, 182, 2),
        };

        assert!(!full.is_pre_registered());
        assert!(full.is_fully_registered());
    }

    #[test]
    fn class_codes() {
        assert_eq!(DeviceClass::from_code(0x8065), DeviceClass::Emeter);
        assert_eq!(DeviceClass::from_code(0x8001), DeviceClass::PvInverter);
        assert_eq!(DeviceClass::from_code(0x1234), DeviceClass::Unknown);
        assert!(DeviceClass::BatteryInverter.is_inverter());
        assert!(!DeviceClass::Emeter.is_inverter());
    }

    #[test]
    fn known_susy_ids() {
        assert_eq!(DeviceType::from_susy_id(349).unwrap().name, "EMETER-20");
        assert!(DeviceType::from_susy_id(1).is_none());
    }
}
