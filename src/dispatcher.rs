//! Polls the receive sockets and fans inbound packets out to registered
//! receivers by protocol.

use crate::{
    discovery::DiscoveryPacket,
    packet::{SpeedwireFrame, data2},
    socket::{self, SpeedwireSocket},
};
use std::net::SocketAddr;

/// Which packets a receiver wants to see.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolFilter {
    /// Every structurally valid packet.
    Any,
    /// Discovery requests and responses.
    Discovery,
    /// Emeter measurement packets, including the extended variant.
    Emeter,
    /// Inverter request/response packets.
    Inverter,
}

/// A consumer of validated inbound packets.
pub trait PacketReceiver {
    /// Handle one packet. Packets are delivered to all matching receivers in
    /// registration order, on the thread driving the dispatcher.
    fn receive(&mut self, frame: &SpeedwireFrame<'_>, src: SocketAddr);
}

/// Demultiplexes one mixed UDP stream to typed receivers.
pub struct ReceiveDispatcher {
    receivers: Vec<(ProtocolFilter, Box<dyn PacketReceiver>)>,
}

impl Default for ReceiveDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveDispatcher {
    /// Create a dispatcher with no receivers.
    pub fn new() -> Self {
        Self {
            receivers: Vec::new(),
        }
    }

    /// Register a receiver for the packets matching `filter`.
    pub fn register(&mut self, filter: ProtocolFilter, receiver: Box<dyn PacketReceiver>) {
        self.receivers.push((filter, receiver));
    }

    /// Poll `sockets` for up to `timeout_ms` and deliver everything that
    /// arrived. Returns the number of valid packets seen; 0 on timeout.
    ///
    /// Malformed packets and unknown protocols are logged and dropped; a
    /// receive error on one socket does not stop delivery on the others.
    pub fn dispatch(
        &mut self,
        sockets: &[SpeedwireSocket],
        timeout_ms: i32,
    ) -> std::io::Result<usize> {
        let ready = socket::poll_sockets(sockets, timeout_ms)?;
        let mut packets = 0usize;

        for index in ready {
            let mut buf = [0u8; 2048];

            let (n, src) = match sockets[index].try_recv_from(&mut buf) {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("receive failed: {}", e);
                    continue;
                }
            };

            if self.deliver(&buf[..n], src) {
                packets += 1;
            }
        }

        Ok(packets)
    }

    /// Validate and deliver a single packet. Exposed for replay processing;
    /// [`dispatch`](Self::dispatch) is the socket driven entry point.
    pub fn deliver(&mut self, buf: &[u8], src: SocketAddr) -> bool {
        let Ok(frame) = SpeedwireFrame::parse(buf) else {
            log::debug!("dropping malformed packet from {}", src);
            return false;
        };

        if DiscoveryPacket::new(frame).is_discovery() {
            self.fan_out(&frame, src, &[ProtocolFilter::Discovery]);
            return true;
        }

        let Ok(data2) = frame.data2() else {
            log::debug!("dropping tag stream without data2 from {}", src);
            return false;
        };

        match data2.protocol_id() {
            data2::PROTOCOL_EMETER | data2::PROTOCOL_EXTENDED_EMETER => {
                self.fan_out(&frame, src, &[ProtocolFilter::Emeter]);
                true
            }
            data2::PROTOCOL_INVERTER => {
                if let Err(e) = data2.check_inverter_layout() {
                    log::warn!("dropping inverter packet from {}: {}", src, e);
                    return false;
                }
                self.fan_out(&frame, src, &[ProtocolFilter::Inverter]);
                true
            }
            data2::PROTOCOL_ENCRYPTION => {
                // Parsed for the log, otherwise only delivered to receivers
                // that asked for everything.
                log::info!("encryption handshake packet from {}", src);
                self.fan_out(&frame, src, &[]);
                true
            }
            other => {
                log::warn!("unknown protocol {:#06x} from {}", other, src);
                false
            }
        }
    }

    fn fan_out(&mut self, frame: &SpeedwireFrame<'_>, src: SocketAddr, matching: &[ProtocolFilter]) {
        for (filter, receiver) in &mut self.receivers {
            if *filter == ProtocolFilter::Any || matching.contains(filter) {
                receiver.receive(frame, src);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::MULTICAST_REQUEST,
        emeter::EmeterPayloadBuilder,
        packet::{FrameBuilder, data2::PROTOCOL_EMETER},
    };
    use std::{
        cell::RefCell,
        net::{Ipv4Addr, SocketAddrV4},
        rc::Rc,
    };

    struct Recorder {
        seen: Rc<RefCell<Vec<&'static str>>>,
        label: &'static str,
    }

    impl PacketReceiver for Recorder {
        fn receive(&mut self, _frame: &SpeedwireFrame<'_>, _src: SocketAddr) {
            self.seen.borrow_mut().push(self.label);
        }
    }

    fn src() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 182, 18), 9522))
    }

    fn emeter_packet() -> Vec<u8> {
        let mut payload = EmeterPayloadBuilder::new(0x015d, 1234, 1000);
        payload.end_of_data();
        let mut builder = FrameBuilder::new(1);
        builder.data2(PROTOCOL_EMETER, &payload.finish());
        builder.finish()
    }

    #[test]
    fn routes_by_protocol() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = ReceiveDispatcher::new();

        for (filter, label) in [
            (ProtocolFilter::Any, "any"),
            (ProtocolFilter::Discovery, "discovery"),
            (ProtocolFilter::Emeter, "emeter"),
            (ProtocolFilter::Inverter, "inverter"),
        ] {
            dispatcher.register(
                filter,
                Box::new(Recorder {
                    seen: seen.clone(),
                    label,
                }),
            );
        }

        assert!(dispatcher.deliver(&emeter_packet(), src()));
        assert_eq!(*seen.borrow(), vec!["any", "emeter"]);

        seen.borrow_mut().clear();
        assert!(dispatcher.deliver(&MULTICAST_REQUEST, src()));
        assert_eq!(*seen.borrow(), vec!["any", "discovery"]);
    }

    #[test]
    fn drops_malformed_and_unknown() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = ReceiveDispatcher::new();
        dispatcher.register(
            ProtocolFilter::Any,
            Box::new(Recorder {
                seen: seen.clone(),
                label: "any",
            }),
        );

        assert!(!dispatcher.deliver(b"not a packet", src()));

        // Unknown protocol id.
        let mut builder = FrameBuilder::new(1);
        builder.data2(0x4041, &[0, 0, 0, 0]);
        assert!(!dispatcher.deliver(&builder.finish(), src()));

        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn corrupt_inverter_layout_is_dropped() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = ReceiveDispatcher::new();
        dispatcher.register(
            ProtocolFilter::Inverter,
            Box::new(Recorder {
                seen: seen.clone(),
                label: "inverter",
            }),
        );

        let mut buf = crate::discovery::UNICAST_REQUEST.to_vec();
        // Corrupt the long words field.
        buf[18] = 0x55;

        assert!(!dispatcher.deliver(&buf, src()));
        assert!(seen.borrow().is_empty());
    }
}
