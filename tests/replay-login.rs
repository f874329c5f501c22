//! Login and query exchanges against a scripted peer on the loopback
//! interface.

use speedwire::{
    Client, CommandId, DeviceAddress, DeviceClass, DeviceRecord, InterfaceInfo, InverterPacket,
    LocalHost, LoginRole, SPEEDWIRE_PORT, SocketFactory, SocketStrategy,
    error::{AuthError, Error},
    packet::{FrameBuilder, SpeedwireFrame, data2::PROTOCOL_INVERTER},
};
use std::{
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};

const PEER: DeviceAddress = DeviceAddress::new(0x01b3, 0x2a84_017a);

fn loopback_host() -> LocalHost {
    LocalHost::with_interfaces(vec![InterfaceInfo {
        name: "lo".into(),
        index: 1,
        addresses: vec![(Ipv4Addr::LOCALHOST, 8)],
    }])
}

fn peer_record() -> DeviceRecord {
    DeviceRecord {
        address: PEER,
        device_class: DeviceClass::PvInverter,
        device_type: "Inverter".into(),
        peer_ip: Ipv4Addr::LOCALHOST,
        interface_ip: Ipv4Addr::LOCALHOST,
    }
}

/// One scripted answer of the peer.
enum Reply {
    /// A status-only reply with the given error code.
    Status(u16),
    /// A successful reply carrying two DC power records and the trailing
    /// zero word.
    DcRecords,
}

/// A scripted inverter: answers each request per the script, echoing the
/// request's packet id. `None` swallows the request.
struct ScriptedPeer {
    socket: UdpSocket,
    script: Vec<Option<Reply>>,
}

impl ScriptedPeer {
    fn bind(script: Vec<Option<Reply>>) -> ScriptedPeer {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, SPEEDWIRE_PORT))
            .expect("port 9522 must be free on loopback");
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        ScriptedPeer { socket, script }
    }

    fn run(self) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            for entry in self.script {
                let mut buf = [0u8; 2048];
                let (n, requester) = self.socket.recv_from(&mut buf).expect("request expected");

                let Some(reply) = entry else {
                    continue;
                };

                let frame = SpeedwireFrame::parse(&buf[..n]).unwrap();
                let request = InverterPacket::parse(&frame.data2().unwrap()).unwrap();

                let reply = match reply {
                    Reply::Status(error_code) => {
                        build_status_reply(request.packet_id(), request.command_id(), error_code)
                    }
                    Reply::DcRecords => {
                        build_record_reply(request.packet_id(), request.command_id())
                    }
                };
                self.socket.send_to(&reply, requester).unwrap();
            }
        })
    }
}

fn reply_header(packet_id: u16, command_id: u32, error_code: u16) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&DeviceAddress::LOCAL.susy_id.to_le_bytes());
    payload.extend_from_slice(&DeviceAddress::LOCAL.serial_number.to_le_bytes());
    payload.extend_from_slice(&0x0001u16.to_le_bytes());
    payload.extend_from_slice(&PEER.susy_id.to_le_bytes());
    payload.extend_from_slice(&PEER.serial_number.to_le_bytes());
    payload.extend_from_slice(&0x0001u16.to_le_bytes());
    payload.extend_from_slice(&error_code.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&packet_id.to_le_bytes());
    payload.extend_from_slice(&command_id.to_le_bytes());
    payload
}

fn finish_reply(payload: Vec<u8>) -> Vec<u8> {
    let mut builder = FrameBuilder::new(1);
    builder.data2_with_control(PROTOCOL_INVERTER, 0xe0, &payload);
    builder.finish()
}

/// A minimal reply: header fields echoed, no records.
fn build_status_reply(packet_id: u16, command_id: u32, error_code: u16) -> Vec<u8> {
    let mut payload = reply_header(packet_id, command_id, error_code);
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());

    finish_reply(payload)
}

/// A successful query reply: two 28 byte records for registers 0..=1,
/// terminated by the zero trailer word.
fn build_record_reply(packet_id: u16, command_id: u32) -> Vec<u8> {
    let mut payload = reply_header(packet_id, command_id, 0);
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&1u32.to_le_bytes());

    for (word, values) in [
        (0x4025_1e01u32, [0x57u32, 0x57, 0x57, 0x57, 1]),
        (0x4025_1e02, [0x5e, 0x5e, 0x5e, 0x5e, 1]),
    ] {
        payload.extend_from_slice(&word.to_le_bytes());
        payload.extend_from_slice(&0x5fe9_a761u32.to_le_bytes());
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
    }
    payload.extend_from_slice(&0u32.to_le_bytes());

    finish_reply(payload)
}

/// The whole conversation runs in one test: the scripted peer owns port 9522
/// on loopback, which only exists once.
#[test]
fn login_query_and_reauthentication() {
    let _ = env_logger::builder().is_test(true).try_init();

    let peer = ScriptedPeer::bind(vec![
        // Login accepted.
        Some(Reply::Status(0x0000)),
        // Login rejected: invalid password.
        Some(Reply::Status(0x0100)),
        // Query answered with records.
        Some(Reply::DcRecords),
        // Query answered with "not authenticated".
        Some(Reply::Status(0x0017)),
        // Query swallowed to force a timeout.
        None,
    ]);
    let handle = peer.run();

    let localhost = loopback_host();
    let factory = SocketFactory::new(&localhost, SocketStrategy::UnicastPerInterface).unwrap();
    let device = peer_record();
    let mut client = Client::new(&factory, std::slice::from_ref(&device));

    let timeout = Duration::from_secs(2);

    // Successful login: token consumed, no login flag raised.
    client
        .login(&device, LoginRole::User, "0000", timeout)
        .expect("login should succeed");
    assert!(client.tokens().is_empty());
    assert!(!client.tokens().needs_login);

    // Rejected password surfaces as an auth error and does not demand a
    // re-login.
    let err = client
        .login(&device, LoginRole::User, "wrong", timeout)
        .unwrap_err();
    assert_eq!(err, Error::Auth(AuthError::InvalidPassword));
    assert!(!client.tokens().needs_login);

    // A successful query decodes the records in front of the trailer word.
    let records = client
        .query(&device, CommandId::DcQuery, 0x0025_1e00, 0x0025_1eff, timeout)
        .expect("query should succeed");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].register_id, 0x0025_1e00);
    assert_eq!(records[0].connector, 0x01);
    assert_eq!(records[0].data_len, 20);
    assert_eq!(records[0].value_u32(0), Some(0x57));
    assert_eq!(records[1].connector, 0x02);
    assert_eq!(records[1].value_u32(0), Some(0x5e));
    assert!(client.tokens().is_empty());

    // A lost session on a query raises the re-login flag for the main loop.
    let err = client
        .query(&device, CommandId::AcQuery, 0x0026_3f00, 0x0026_3fff, timeout)
        .unwrap_err();
    assert_eq!(err, Error::Auth(AuthError::NotAuthenticated));
    assert!(client.tokens().needs_login);

    // An unanswered query times out; the token is removed on return.
    let err = client
        .query(
            &device,
            CommandId::AcQuery,
            0x0026_3f00,
            0x0026_3fff,
            Duration::from_millis(200),
        )
        .unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert!(client.tokens().is_empty());

    handle.join().unwrap();
}
