//! OSC over UDP.
//!
//! ```text
//! Uninitialized ──new/update_target──► Ready ◄──update_target──┐
//!                                        │                     │
//!                                        └──────close────► Closed
//! ```
//!
//! Each message goes out as its own datagram; bundles are encoded as a single
//! datagram with an immediate time tag.

use super::{OutboundMessage, TransportError, TransportSink};
use parking_lot::RwLock;
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, error, info};

/// OSC time tag meaning "immediately".
const IMMEDIATE: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

enum SenderState {
    Uninitialized,
    Ready { socket: UdpSocket, target: SocketAddr },
    Closed,
}

pub struct UdpOscSender {
    state: RwLock<SenderState>,
}

impl UdpOscSender {
    /// Binds a local socket aimed at `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self, TransportError> {
        let (socket, target) = open_socket(host, port)?;
        info!("OSC sender ready, target {}", target);
        Ok(Self {
            state: RwLock::new(SenderState::Ready { socket, target }),
        })
    }

    /// Sender without a socket; every send is dropped until `update_target`.
    pub fn uninitialized() -> Self {
        Self {
            state: RwLock::new(SenderState::Uninitialized),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.read(), SenderState::Ready { .. })
    }

    pub fn target(&self) -> Option<SocketAddr> {
        match &*self.state.read() {
            SenderState::Ready { target, .. } => Some(*target),
            _ => None,
        }
    }

    fn send_packet(&self, packet: &OscPacket, label: &str) {
        let bytes = match encoder::encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("{}", TransportError::Encode(format!("{}: {:?}", label, e)));
                return;
            }
        };

        match &*self.state.read() {
            SenderState::Ready { socket, target } => {
                if let Err(e) = socket.send_to(&bytes, target) {
                    debug!("{}", TransportError::Send(format!("{} to {}: {}", label, target, e)));
                }
            }
            SenderState::Uninitialized | SenderState::Closed => {
                debug!("Dropping {}: {}", label, TransportError::Closed);
            }
        }
    }
}

fn open_socket(host: &str, port: u16) -> Result<(UdpSocket, SocketAddr), TransportError> {
    let resolve_error = |reason: String| TransportError::Resolve(format!("{}:{}", host, port), reason);

    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_error(e.to_string()))?
        .collect();
    let target = candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| resolve_error("no addresses".to_string()))?;

    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local).map_err(|e| TransportError::Socket(e.to_string()))?;
    Ok((socket, target))
}

fn to_osc(message: &OutboundMessage) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: message.address.clone(),
        args: message.values.iter().map(|v| OscType::Float(*v)).collect(),
    })
}

impl TransportSink for UdpOscSender {
    fn send_osc_message(&self, message: &OutboundMessage) {
        self.send_packet(&to_osc(message), &message.address);
    }

    fn send_osc_bundle(&self, messages: &[OutboundMessage]) {
        if messages.is_empty() {
            return;
        }
        let bundle = OscPacket::Bundle(OscBundle {
            timetag: IMMEDIATE,
            content: messages.iter().map(to_osc).collect(),
        });
        self.send_packet(&bundle, "bundle");
    }

    fn update_target(&self, host: &str, port: u16) {
        // bind before taking the lock so sends in flight are not held up
        match open_socket(host, port) {
            Ok((socket, target)) => {
                *self.state.write() = SenderState::Ready { socket, target };
                info!("OSC target updated to {}", target);
            }
            Err(e) => error!("Failed to update OSC target: {}", e),
        }
    }

    fn close(&self) {
        let mut state = self.state.write();
        if matches!(*state, SenderState::Ready { .. }) {
            info!("OSC sender closed");
        }
        *state = SenderState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::decoder;
    use std::time::Duration;

    fn receiver() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn receive(socket: &UdpSocket) -> Option<OscPacket> {
        let mut buf = [0u8; rosc::decoder::MTU];
        let (len, _) = socket.recv_from(&mut buf).ok()?;
        let (_, packet) = decoder::decode_udp(&buf[..len]).ok()?;
        Some(packet)
    }

    #[test]
    fn message_arrives_as_single_float() {
        let (rx, port) = receiver();
        let sender = UdpOscSender::new("127.0.0.1", port).unwrap();
        assert!(sender.is_initialized());

        sender.send_osc_message(&OutboundMessage::new("/leap/dev1/left/palm/ty", 450.0));

        match receive(&rx) {
            Some(OscPacket::Message(msg)) => {
                assert_eq!(msg.addr, "/leap/dev1/left/palm/ty");
                assert_eq!(msg.args, vec![OscType::Float(450.0)]);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn bundle_carries_all_messages() {
        let (rx, port) = receiver();
        let sender = UdpOscSender::new("127.0.0.1", port).unwrap();

        sender.send_osc_bundle(&[
            OutboundMessage::new("/a", 1.0),
            OutboundMessage::new("/b", 2.0),
        ]);

        match receive(&rx) {
            Some(OscPacket::Bundle(bundle)) => assert_eq!(bundle.content.len(), 2),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn close_drops_sends_until_retargeted() {
        let (first, first_port) = receiver();
        let (second, second_port) = receiver();
        let sender = UdpOscSender::new("127.0.0.1", first_port).unwrap();

        sender.close();
        assert!(!sender.is_initialized());
        sender.send_osc_message(&OutboundMessage::new("/dropped", 1.0));
        assert!(receive(&first).is_none());

        sender.update_target("127.0.0.1", second_port);
        assert_eq!(sender.target().map(|t| t.port()), Some(second_port));
        sender.send_osc_message(&OutboundMessage::new("/after", 2.0));
        match receive(&second) {
            Some(OscPacket::Message(msg)) => assert_eq!(msg.addr, "/after"),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn uninitialized_sender_swallows_messages() {
        let sender = UdpOscSender::uninitialized();
        assert!(!sender.is_initialized());
        assert_eq!(sender.target(), None);
        sender.send_osc_message(&OutboundMessage::new("/nowhere", 0.0));
    }

    #[test]
    fn failed_retarget_keeps_previous_target() {
        let (_rx, port) = receiver();
        let sender = UdpOscSender::new("127.0.0.1", port).unwrap();
        sender.update_target("host.invalid", 9000);
        assert_eq!(sender.target().map(|t| t.port()), Some(port));
    }
}
