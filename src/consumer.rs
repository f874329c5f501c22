//! Consumer capabilities implemented by the measurement processing stages,
//! and the producer sink they ultimately feed.

use crate::{
    device::DeviceRecord,
    measurement::{Measurement, MeasurementType, Wire},
    store::MeasurementStore,
};
use std::{cell::RefCell, rc::Rc};

/// A stage consuming filtered measurements.
///
/// The whole pipeline runs on the dispatch thread; stages are shared as
/// [`SharedConsumer`] handles so one stage can feed several others.
pub trait MeasurementConsumer {
    /// Take one measurement that just received a new sample.
    fn consume(&mut self, device: &DeviceRecord, measurement: &Measurement);

    /// Called after the last element of a packet has been consumed.
    fn end_of_batch(&mut self, device: &DeviceRecord, store: &MeasurementStore, time: u32) {
        let _ = (device, store, time);
    }
}

/// Shared handle to a consumer stage.
pub type SharedConsumer = Rc<RefCell<dyn MeasurementConsumer>>;

/// The downstream sink receiving finished values, e.g. a time series
/// database writer.
pub trait Producer {
    /// Emit one value.
    fn produce(
        &mut self,
        serial_number: u32,
        measurement_type: &MeasurementType,
        wire: Wire,
        value: f64,
        time: u32,
    );

    /// Called once per finished batch so buffering sinks can write out.
    fn flush(&mut self) {}
}
