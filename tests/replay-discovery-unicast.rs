//! Replay a captured unicast discovery exchange against the device registry.

use pretty_assertions::assert_eq;
use speedwire::{
    Discovery, DeviceAddress, DeviceClass, InterfaceInfo, LocalHost, RegisterOutcome,
    SPEEDWIRE_PORT,
};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Unicast discovery response of an inverter at 192.168.182.18, answering the
/// 58 byte probe: command `0x00000201`, source device `0x01B3:0x2A84017A`,
/// one 28 byte discovery record.
const DISCOVERY_RESPONSE: [u8; 86] = [
    0x53, 0x4d, 0x41, 0x00, 0x00, 0x04, 0x02, 0xa0, // signature, group tag
    0x00, 0x00, 0x00, 0x01, 0x00, 0x42, 0x00, 0x10, // group 1, data2 tag
    0x60, 0x65, 0x10, 0xa0, // protocol, long words, control
    0x7d, 0x00, 0x42, 0xbe, 0x28, 0x3a, 0x00, 0xc0, // dst address + control
    0xb3, 0x01, 0x7a, 0x01, 0x84, 0x2a, 0x00, 0x00, // src address + control
    0x00, 0x00, 0x00, 0x00, 0x01, 0x80, // error, fragment, packet id
    0x01, 0x02, 0x00, 0x00, // command 0x00000201
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // first, last register
    0x00, 0x03, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, // record word, time
    0x01, 0x00, 0xb3, 0x01, 0x7a, 0x01, 0x84, 0x2a, // record data
    0x00, 0x00, 0x0a, 0x00, 0x0c, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, // record data
    0x00, 0x00, 0x00, 0x00, // end of data
];

fn test_host() -> LocalHost {
    LocalHost::with_interfaces(vec![InterfaceInfo {
        name: "eth0".into(),
        index: 2,
        addresses: vec![(Ipv4Addr::new(192, 168, 182, 2), 24)],
    }])
}

#[test]
fn response_promotes_pre_registered_device() {
    let _ = env_logger::builder().is_test(true).try_init();

    let localhost = test_host();
    let mut discovery = Discovery::new();

    let peer_ip = Ipv4Addr::new(192, 168, 182, 18);
    assert!(discovery.pre_register(peer_ip));
    assert!(discovery.devices()[0].is_pre_registered());

    let src = SocketAddr::V4(SocketAddrV4::new(peer_ip, SPEEDWIRE_PORT));
    let record = discovery
        .classify(&DISCOVERY_RESPONSE, src, &localhost)
        .expect("response should identify a device");

    assert_eq!(discovery.register(record), RegisterOutcome::Updated);

    let devices = discovery.devices();
    assert_eq!(devices.len(), 1);

    let device = &devices[0];
    assert!(device.is_fully_registered());
    assert_eq!(device.address, DeviceAddress::new(0x01b3, 0x2a84_017a));
    assert!(device.device_class.is_inverter());
    assert_eq!(device.device_class, DeviceClass::PvInverter);
    assert_eq!(device.peer_ip, peer_ip);
    assert_eq!(device.interface_ip, Ipv4Addr::new(192, 168, 182, 2));
}

#[test]
fn own_probe_is_not_a_device() {
    let localhost = test_host();
    let discovery = Discovery::new();

    // The looped back unicast probe must not register anything.
    let src = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::new(192, 168, 182, 2),
        SPEEDWIRE_PORT,
    ));

    assert!(
        discovery
            .classify(&speedwire::UNICAST_REQUEST, src, &localhost)
            .is_none()
    );
}

#[test]
fn emeter_multicast_registers_meter() {
    let localhost = test_host();
    let mut discovery = Discovery::new();

    let mut payload = speedwire::EmeterPayloadBuilder::new(349, 0x7099_9e06, 1000);
    payload.end_of_data();
    let payload = payload.finish();

    let mut builder = speedwire::packet::FrameBuilder::new(1);
    builder.data2(speedwire::packet::data2::PROTOCOL_EMETER, &payload);
    let buf = builder.finish();

    let peer_ip = Ipv4Addr::new(192, 168, 182, 10);
    let src = SocketAddr::V4(SocketAddrV4::new(peer_ip, SPEEDWIRE_PORT));

    let record = discovery.classify(&buf, src, &localhost).unwrap();
    assert_eq!(discovery.register(record), RegisterOutcome::New);

    let device = &discovery.devices()[0];
    assert_eq!(device.device_class, DeviceClass::Emeter);
    assert_eq!(device.device_type, "EMETER-20");
    assert_eq!(device.address, DeviceAddress::new(349, 0x7099_9e06));
}
