//! Replay emeter multicast packets through the full receive pipeline:
//! dispatcher → OBIS filter → averaging → derived values → producer.

use pretty_assertions::assert_eq;
use speedwire::{
    AveragingProcessor, DerivedValueProcessor, DeviceAddress, DeviceClass, DeviceRecord,
    EmeterPacket, EmeterPayloadBuilder, MeasurementType, ObisFilter, PacketReceiver, Producer,
    ProtocolFilter, Quantity, ReceiveDispatcher, SPEEDWIRE_PORT, TariffRates, Wire,
    MeasurementStore, obis,
    packet::{FrameBuilder, SpeedwireFrame, data2::PROTOCOL_EMETER},
};
use std::{
    cell::RefCell,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    rc::Rc,
};

#[derive(Default)]
struct RecordingProducer {
    produced: Vec<(u32, Quantity, Wire, f64, u32)>,
    flushes: u32,
}

impl Producer for RecordingProducer {
    fn produce(
        &mut self,
        serial_number: u32,
        measurement_type: &MeasurementType,
        wire: Wire,
        value: f64,
        time: u32,
    ) {
        self.produced
            .push((serial_number, measurement_type.quantity, wire, value, time));
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// Emeter receiver bridging the dispatcher to the OBIS filter, the way a
/// main loop wires the pipeline up.
struct EmeterReceiver {
    filter: ObisFilter,
    device: DeviceRecord,
}

impl PacketReceiver for EmeterReceiver {
    fn receive(&mut self, frame: &SpeedwireFrame<'_>, _src: SocketAddr) {
        let Ok(data2) = frame.data2() else {
            return;
        };
        let Ok(packet) = EmeterPacket::parse(&data2) else {
            return;
        };

        self.filter.consume_packet(&self.device, &packet);
    }
}

const SERIAL: u32 = 0x7099_9e06;

fn emeter_device() -> DeviceRecord {
    DeviceRecord {
        address: DeviceAddress::new(349, SERIAL),
        device_class: DeviceClass::Emeter,
        device_type: "EMETER-20".into(),
        peer_ip: Ipv4Addr::new(192, 168, 182, 10),
        interface_ip: Ipv4Addr::new(192, 168, 182, 2),
    }
}

fn src() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::new(192, 168, 182, 10),
        SPEEDWIRE_PORT,
    ))
}

/// An emeter packet with raw positive/negative total active power readings.
fn emeter_packet(positive_raw: u32, negative_raw: u32, time: u32) -> Vec<u8> {
    let mut payload = EmeterPayloadBuilder::new(349, SERIAL, time);
    payload
        .element_u32(obis::POSITIVE_ACTIVE_POWER_TOTAL.id, positive_raw)
        .element_u32(obis::NEGATIVE_ACTIVE_POWER_TOTAL.id, negative_raw)
        .end_of_data();

    let mut builder = FrameBuilder::new(1);
    builder.data2(PROTOCOL_EMETER, &payload.finish());
    builder.finish()
}

/// Wire up the pipeline with the given averaging window; returns the
/// dispatcher and the producer to inspect.
fn pipeline(averaging_ms: u64, now_ms: u64) -> (ReceiveDispatcher, Rc<RefCell<RecordingProducer>>) {
    let store = Rc::new(RefCell::new(MeasurementStore::with_defaults(16)));
    let producer = Rc::new(RefCell::new(RecordingProducer::default()));

    let derived = Rc::new(RefCell::new(DerivedValueProcessor::with_clock(
        producer.clone(),
        TariffRates::default(),
        120,
        Box::new(move || now_ms),
    )));

    let averaging = Rc::new(RefCell::new(AveragingProcessor::new(
        averaging_ms,
        averaging_ms,
    )));
    averaging.borrow_mut().add_consumer(derived);

    let mut filter = ObisFilter::new(store);
    filter.add_consumer(averaging);

    let mut dispatcher = ReceiveDispatcher::new();
    dispatcher.register(
        ProtocolFilter::Emeter,
        Box::new(EmeterReceiver {
            filter,
            device: emeter_device(),
        }),
    );

    (dispatcher, producer)
}

#[test]
fn obis_decode_publishes_physical_value() {
    let _ = env_logger::builder().is_test(true).try_init();

    let time = 1_000_000u32;
    let (mut dispatcher, producer) = pipeline(0, u64::from(time));

    // 0x57 tenths of a watt on the wire.
    assert!(dispatcher.deliver(&emeter_packet(0x57, 0, time), src()));

    let producer = producer.borrow();
    let power: Vec<_> = producer
        .produced
        .iter()
        .filter(|(_, q, w, _, _)| *q == Quantity::Power && *w == Wire::Total)
        .collect();

    // Once as the plain measurement, once as the signed synthesis.
    assert_eq!(power[0], &(SERIAL, Quantity::Power, Wire::Total, 8.7, time));
    assert!(producer.flushes >= 1);
}

#[test]
fn signed_total_is_synthesized_at_end_of_packet() {
    let time = 2_000_000u32;
    let (mut dispatcher, producer) = pipeline(0, u64::from(time));

    // +100.0 W and −30.0 W on the wire (tenths of a watt).
    assert!(dispatcher.deliver(&emeter_packet(1000, 300, time), src()));

    let producer = producer.borrow();

    // The signed synthesis runs after the end of the packet: positive minus
    // negative at the shared timestamp.
    let signed = producer
        .produced
        .last()
        .expect("signed value should be produced last");
    assert_eq!(*signed, (SERIAL, Quantity::Power, Wire::Total, 70.0, time));
}

#[test]
fn averaging_window_gates_the_pipeline() {
    let (mut dispatcher, producer) = pipeline(60_000, 61_000);

    for time in [0u32, 20_000, 40_000] {
        assert!(dispatcher.deliver(&emeter_packet(1000, 300, time), src()));
        assert!(
            producer.borrow().produced.is_empty(),
            "no emission before the window completes (t = {})",
            time
        );
    }

    assert!(dispatcher.deliver(&emeter_packet(1000, 300, 61_000), src()));
    assert!(!producer.borrow().produced.is_empty());
}
