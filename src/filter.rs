//! Filters mapping wire elements to measurement slots and feeding the
//! consumer chain.

use crate::{
    consumer::SharedConsumer,
    device::DeviceRecord,
    emeter::{EmeterPacket, ObisElement},
    store::MeasurementStore,
};
use std::{cell::RefCell, rc::Rc};

/// Maps OBIS elements from emeter packets to measurement slots.
///
/// Elements without a slot in the store are skipped. After the last element
/// of a packet every consumer's `end_of_batch` is invoked so signed totals
/// and other derived values can be computed over the finished packet.
pub struct ObisFilter {
    store: Rc<RefCell<MeasurementStore>>,
    consumers: Vec<SharedConsumer>,
}

impl ObisFilter {
    /// Create a filter over the given store.
    pub fn new(store: Rc<RefCell<MeasurementStore>>) -> Self {
        Self {
            store,
            consumers: Vec::new(),
        }
    }

    /// Register a consumer. Consumers are notified in registration order.
    pub fn add_consumer(&mut self, consumer: SharedConsumer) {
        self.consumers.push(consumer);
    }

    /// Consume a whole emeter packet: every known element, then the end of
    /// packet notification.
    pub fn consume_packet(&mut self, device: &DeviceRecord, packet: &EmeterPacket<'_>) {
        let time = packet.timestamp();

        for element in packet.obis_elements() {
            if element.is_end_of_data() {
                break;
            }
            self.consume_element(device, &element, time);
        }

        self.end_of_data(device, time);
    }

    /// Consume a single OBIS element. Returns `true` if the element matched
    /// a slot and was appended.
    pub fn consume_element(
        &mut self,
        device: &DeviceRecord,
        element: &ObisElement<'_>,
        time: u32,
    ) -> bool {
        {
            let mut store = self.store.borrow_mut();
            let Some(measurement) = store.obis_mut(element.id.key()) else {
                return false;
            };

            match element.id.kind {
                0 => measurement.text = Some(element.firmware_version()),
                4 => measurement.append_raw(f64::from(element.value_u32()), time),
                7 => measurement.append_raw(f64::from(element.value_i32()), time),
                8 => measurement.append_raw(element.value_u64() as f64, time),
                other => {
                    log::warn!("obis {} with unhandled type {}", element.id, other);
                    return false;
                }
            }
        }

        let store = self.store.borrow();
        let measurement = store
            .obis(element.id.key())
            .expect("slot present, checked above");

        for consumer in &self.consumers {
            consumer.borrow_mut().consume(device, measurement);
        }

        true
    }

    /// Notify consumers that the packet is complete.
    pub fn end_of_data(&mut self, device: &DeviceRecord, time: u32) {
        let store = self.store.borrow();
        for consumer in &self.consumers {
            consumer.borrow_mut().end_of_batch(device, &store, time);
        }
    }
}

/// Maps raw inverter reply records to measurement slots.
///
/// The counterpart of [`ObisFilter`] for the register side: the command
/// client's query results are pushed through here, one batch per polling
/// round, with an explicit end of batch notification after the last query.
pub struct RawDataFilter {
    store: Rc<RefCell<MeasurementStore>>,
    consumers: Vec<SharedConsumer>,
}

impl RawDataFilter {
    /// Create a filter over the given store.
    pub fn new(store: Rc<RefCell<MeasurementStore>>) -> Self {
        Self {
            store,
            consumers: Vec::new(),
        }
    }

    /// Register a consumer. Consumers are notified in registration order.
    pub fn add_consumer(&mut self, consumer: SharedConsumer) {
        self.consumers.push(consumer);
    }

    /// Consume the records of one query reply. Unknown registers are
    /// skipped. Returns the number of records consumed.
    pub fn consume_records(
        &mut self,
        device: &DeviceRecord,
        records: &[crate::inverter::RawRecord],
    ) -> usize {
        let mut consumed = 0;

        for record in records {
            {
                let mut store = self.store.borrow_mut();
                if store.ingest_record(record).is_none() {
                    log::debug!(
                        "no slot for register {:#010x} connector {}",
                        record.register_id,
                        record.connector
                    );
                    continue;
                }
            }

            let store = self.store.borrow();
            let Some(measurement) = store
                .register(record.key())
                .map(|slot| &slot.measurement)
            else {
                continue;
            };

            for consumer in &self.consumers {
                consumer.borrow_mut().consume(device, measurement);
            }
            consumed += 1;
        }

        consumed
    }

    /// Notify consumers that the polling round is complete.
    pub fn end_of_data(&mut self, device: &DeviceRecord, time: u32) {
        let store = self.store.borrow();
        for consumer in &self.consumers {
            consumer.borrow_mut().end_of_batch(device, &store, time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consumer::MeasurementConsumer,
        device::{DeviceAddress, DeviceClass},
        measurement::Measurement,
        obis,
    };
    use std::net::Ipv4Addr;

    struct Collect {
        values: Vec<(&'static str, f64, u32)>,
        batches: u32,
    }

    impl MeasurementConsumer for Collect {
        fn consume(&mut self, _device: &DeviceRecord, measurement: &Measurement) {
            let sample = measurement.series.newest().unwrap();
            self.values.push((measurement.name, sample.value, sample.time));
        }

        fn end_of_batch(&mut self, _device: &DeviceRecord, _store: &MeasurementStore, _time: u32) {
            self.batches += 1;
        }
    }

    fn emeter_device() -> DeviceRecord {
        DeviceRecord {
            address: DeviceAddress::new(0x015d, 1234),
            device_class: DeviceClass::Emeter,
            device_type: "EMETER-20".into(),
            peer_ip: Ipv4Addr::new(192, 168, 182, 10),
            interface_ip: Ipv4Addr::new(192, 168, 182, 2),
        }
    }

    #[test]
    fn filters_and_scales_elements() {
        let store = Rc::new(RefCell::new(MeasurementStore::with_defaults(4)));
        let collect = Rc::new(RefCell::new(Collect {
            values: Vec::new(),
            batches: 0,
        }));

        let mut filter = ObisFilter::new(store.clone());
        filter.add_consumer(collect.clone());

        let mut payload = crate::emeter::EmeterPayloadBuilder::new(0x015d, 1234, 25_000);
        payload
            .element_u32(obis::POSITIVE_ACTIVE_POWER_TOTAL.id, 0x57)
            // Not in the known set: a tariff 1 counter.
            .element_u32(crate::obis::ObisId::new(0, 1, 4, 1), 999)
            .end_of_data();
        let payload = payload.finish();

        let mut builder = crate::packet::FrameBuilder::new(1);
        builder.data2(crate::packet::data2::PROTOCOL_EMETER, &payload);
        let buf = builder.finish();

        let frame = crate::packet::SpeedwireFrame::parse(&buf).unwrap();
        let packet = EmeterPacket::parse(&frame.data2().unwrap()).unwrap();

        filter.consume_packet(&emeter_device(), &packet);

        let collect = collect.borrow();
        assert_eq!(collect.values, vec![("Pin", 8.7, 25_000)]);
        assert_eq!(collect.batches, 1);

        // The sample also landed in the store.
        let store = store.borrow();
        let measurement = store
            .obis_measurement(&obis::POSITIVE_ACTIVE_POWER_TOTAL)
            .unwrap();
        assert_eq!(measurement.series.newest().unwrap().value, 8.7);
    }
}
