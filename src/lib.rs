//! A pure Rust client for SMA photovoltaic inverters, battery inverters and
//! energy meters speaking the proprietary Speedwire UDP protocol.
//!
//! The crate discovers devices on the local network, authenticates against
//! inverters, subscribes to the emeter multicast stream, polls inverter
//! registers, converts the binary measurements into physical quantities and
//! forwards filtered and averaged values to a [`Producer`] sink.
//!
//! Everything runs on a single thread: one loop drives the
//! [`ReceiveDispatcher`] with a poll timeout, and the processing pipeline
//! ([`ObisFilter`]/[`RawDataFilter`] feeding [`AveragingProcessor`], then
//! [`DerivedValueProcessor`] and finally a [`Producer`]) is invoked
//! synchronously from it.
//!
//! # Examples
//!
//! Discover devices and read the current DC power of the first inverter:
//!
//! ```rust,no_run
//! use speedwire::{
//!     Client, Discovery, LocalHost, SocketFactory, SocketStrategy, registers, CommandId,
//! };
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), speedwire::error::Error> {
//! let localhost = LocalHost::query();
//! let factory = SocketFactory::new(
//!     &localhost,
//!     SocketStrategy::MulticastSingleAndUnicastPerInterface,
//! )?;
//!
//! let mut discovery = Discovery::new();
//! discovery.discover(&localhost, &factory)?;
//!
//! let inverter = discovery.devices()[0].clone();
//! let mut client = Client::new(&factory, discovery.devices());
//!
//! client.login(
//!     &inverter,
//!     speedwire::LoginRole::User,
//!     "0000",
//!     Duration::from_secs(1),
//! )?;
//!
//! let records = client.query(
//!     &inverter,
//!     CommandId::DcQuery,
//!     registers::DC_POWER_MPP1.register_id,
//!     registers::DC_POWER_MPP1.register_id | 0xff,
//!     Duration::from_secs(1),
//! )?;
//!
//! for record in records {
//!     println!("{:#010x}: {:?}", record.register_id, record.value_u32(0));
//! }
//! # Ok(()) }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

mod averaging;
mod command;
mod config;
mod consumer;
mod derived;
mod device;
mod discovery;
mod dispatcher;
mod emeter;
mod encryption;
pub mod error;
mod filter;
mod inverter;
mod localhost;
mod measurement;
pub mod obis;
pub mod packet;
pub mod registers;
mod ring_buffer;
mod series;
mod socket;
mod store;
pub mod time;

use std::net::{Ipv4Addr, Ipv6Addr};

pub use averaging::AveragingProcessor;
pub use command::{Client, CommandToken, TokenRepository, check_reply};
pub use config::{Config, LoginRole, SocketStrategy, TariffRates};
pub use consumer::{MeasurementConsumer, Producer, SharedConsumer};
pub use derived::{DerivedValueProcessor, HOUSEHOLD_SERIAL};
pub use device::{DeviceAddress, DeviceClass, DeviceRecord, DeviceType};
pub use discovery::{Discovery, DiscoveryPacket, MULTICAST_REQUEST, RegisterOutcome, UNICAST_REQUEST};
pub use dispatcher::{PacketReceiver, ProtocolFilter, ReceiveDispatcher};
pub use emeter::{EmeterPacket, EmeterPayloadBuilder, ObisElement};
pub use encryption::EncryptionPacket;
pub use filter::{ObisFilter, RawDataFilter};
pub use inverter::{CommandId, InverterPacket, InverterRequest, RawDataType, RawRecord};
pub use localhost::{InterfaceInfo, LocalHost};
pub use measurement::{
    Direction, Kind, Measurement, MeasurementKey, MeasurementType, Quantity, Wire,
};
pub use ring_buffer::RingBuffer;
pub use series::{MeasurementSeries, Sample};
pub use socket::{SocketDirection, SocketFactory, SocketKind, SpeedwireSocket};
pub use store::{MeasurementStore, RegisterSlot};

/// The Speedwire UDP port, used in all directions.
pub const SPEEDWIRE_PORT: u16 = 9522;

/// The Speedwire IPv4 multicast group.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 12, 255, 254);

/// Placeholder for the Speedwire IPv6 multicast group. SMA has not published
/// one; IPv6 multicast is reserved but not exercised by this crate.
pub const MULTICAST_GROUP_V6: Ipv6Addr = Ipv6Addr::UNSPECIFIED;
