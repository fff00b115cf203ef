// net_chan.rs -- datagram channel
//
// Frames sequenced and non-sequenced datagrams to and from the current game
// server, arbitrates sequence numbers, reassembles fragmented payloads and
// inflates compressed ones.
//
// Sequenced wire layout (ingoing):
//   i32 seq             bit 31 = fragment; -1 means non-sequenced
//   i32 ack_and_comp    bit 31 = compression flag
//   [ i16 frag_start, i16 frag_length ]   when fragmented; length bit 14 = last
//   payload
//
// Outgoing sequenced frames carry [out_seq][in_seq][nat_port u16] instead.

use crate::compression;
use crate::console::ConsoleRef;
use crate::msg::Message;
use crate::net::{NetworkAddress, Socket};
use crate::qcommon::{FRAGMENT_BIT, FRAGMENT_LAST, MAX_MSGLEN};

/// A fully reassembled ingoing datagram, ready for the protocol layer.
pub enum Ingress {
    Sequenced(Message),
    NonSequenced(Message),
}

pub struct Channel {
    console: ConsoleRef,
    socket: Option<Socket>,

    ingoing_sequence_num: i32,
    outgoing_sequence_num: i32,
    nat_punchthrough_port: u16,

    total_fragment_size: usize,
    fragment_buffer: Vec<u8>,

    outgoing_message: Message,
    recv_buffer: Vec<u8>,

    curr_server_address: Option<NetworkAddress>,
}

impl Channel {
    pub fn new(console: ConsoleRef) -> Self {
        Self {
            console,
            socket: None,
            ingoing_sequence_num: 0,
            outgoing_sequence_num: 0,
            nat_punchthrough_port: 0,
            total_fragment_size: 0,
            fragment_buffer: vec![0u8; MAX_MSGLEN],
            outgoing_message: Message::new(),
            recv_buffer: vec![0u8; MAX_MSGLEN],
            curr_server_address: None,
        }
    }

    pub fn nat_punchthrough_port(&self) -> u16 {
        self.nat_punchthrough_port
    }

    pub fn server_address(&self) -> Option<NetworkAddress> {
        self.curr_server_address
    }

    /// Binds the channel to a server address. A repeated call with the same
    /// address succeeds without touching any state. Switching addresses
    /// recreates the socket if the address family changed, rerolls the NAT
    /// punch-through port and zeroes the sequence counters.
    pub fn prepare_for_address(&mut self, address: &NetworkAddress) -> bool {
        if self.curr_server_address.as_ref() == Some(address) {
            self.console.printf("Channel::prepare_for_address(): already using the address\n");
            return true;
        }

        if !self.prepare_socket(address) {
            return false;
        }

        self.ingoing_sequence_num = 0;
        self.outgoing_sequence_num = 0;
        self.total_fragment_size = 0;
        self.curr_server_address = Some(*address);
        true
    }

    fn prepare_socket(&mut self, address: &NetworkAddress) -> bool {
        let family_changed = self
            .socket
            .as_ref()
            .map(|socket| socket.is_ipv4() != address.is_ipv4())
            .unwrap_or(true);

        if family_changed {
            self.socket = Socket::new(address.is_ipv4(), &self.console);
        }

        if self.socket.is_none() {
            self.console.printf("Channel::prepare_socket(): cannot create a socket\n");
            return false;
        }

        let random_int: u32 = rand::random();
        self.nat_punchthrough_port = ((random_int >> 16) ^ (random_int & 0xFFFF)) as u16;

        true
    }

    pub fn start_listening(&self) {
        if self.socket.is_none() {
            self.console.printf("Channel::start_listening(): there is no active socket\n");
        }
    }

    pub fn stop_listening(&mut self) {
        self.socket = None;
    }

    pub fn reset(&mut self) {
        self.stop_listening();
    }

    pub fn prepare_sequenced_outgoing_message(&mut self) -> &mut Message {
        self.outgoing_message.clear();
        self.outgoing_message.write_long(self.outgoing_sequence_num);
        self.outgoing_sequence_num += 1;
        self.outgoing_message.write_long(self.ingoing_sequence_num);
        self.outgoing_message.write_short(self.nat_punchthrough_port as i32);
        &mut self.outgoing_message
    }

    pub fn prepare_non_sequenced_outgoing_message(&mut self) -> &mut Message {
        self.outgoing_message.clear();
        self.outgoing_message.write_long(-1);
        &mut self.outgoing_message
    }

    /// Transmits the prepared outgoing frame.
    pub fn send(&mut self) {
        let Some(address) = self.curr_server_address else {
            self.console.printf("Channel::send(): there is no active socket\n");
            return;
        };

        let Some(socket) = self.socket.as_ref() else {
            self.console.printf("Channel::send(): there is no active socket\n");
            return;
        };

        if !socket.send_datagram(&address, self.outgoing_message.data()) {
            self.console.printf("Channel::send(): send_datagram() call has failed\n");
        }
    }

    /// Transmits an already formed message without the channel framing.
    pub fn send_message(&self, message: &Message) {
        let (Some(address), Some(socket)) = (self.curr_server_address, self.socket.as_ref()) else {
            self.console.printf("Channel::send_message(): there is no active socket\n");
            return;
        };

        if !socket.send_datagram(&address, message.data()) {
            self.console.printf("Channel::send_message(): send_datagram() call has failed\n");
        }
    }

    /// Drains every pending datagram from the socket and runs each through
    /// `receive()`, collecting the frames that survived arbitration.
    pub fn receive_pending(&mut self) -> Vec<Ingress> {
        let mut events = Vec::new();

        loop {
            let received = {
                let Some(socket) = self.socket.as_ref() else { break };
                match socket.recv_datagram(&mut self.recv_buffer) {
                    Ok(received) => received,
                    Err(error) => {
                        self.console.vprintf(format_args!("Channel::receive_pending(): recv failed: {}\n", error));
                        break;
                    }
                }
            };

            let Some((size, from)) = received else { break };
            let data = self.recv_buffer[..size].to_vec();

            if let Some(ingress) = self.receive(&from, &data) {
                events.push(ingress);
            }
        }

        events
    }

    /// Runs the receive state machine over one datagram. Returns the frame
    /// to deliver, or `None` when the datagram was dropped (wrong sender,
    /// stale sequence, mid-reassembly fragment).
    pub fn receive(&mut self, from: &NetworkAddress, data: &[u8]) -> Option<Ingress> {
        if self.curr_server_address.as_ref() != Some(from) {
            return None;
        }

        let mut message = Message::from_data(data);
        let raw_sequence = message.read_long();

        if raw_sequence == -1 {
            return Some(Ingress::NonSequenced(Message::from_data(message.remaining())));
        }

        let fragmented = (raw_sequence as u32) & FRAGMENT_BIT != 0;
        let sequence_num = ((raw_sequence as u32) & !FRAGMENT_BIT) as i32;

        // Discard packets that are already received
        if fragmented {
            if sequence_num < self.ingoing_sequence_num {
                return None;
            }
        } else if sequence_num <= self.ingoing_sequence_num {
            return None;
        }

        self.ingoing_sequence_num = sequence_num;
        let compressed = (message.read_long() as u32) & FRAGMENT_BIT != 0;

        let payload: Vec<u8> = if fragmented {
            let fragment_start = message.read_short();
            let raw_length = message.read_short() as u32;

            // Discard a fragment that has arrived out of order
            if fragment_start as usize != self.total_fragment_size {
                self.console.vprintf(format_args!(
                    "Channel::receive(): out-of-order fragment (expected offset {}, got {})\n",
                    self.total_fragment_size, fragment_start
                ));
                return None;
            }

            let last = raw_length & FRAGMENT_LAST != 0;
            let fragment_length = (raw_length & 0x3FFF) as usize;

            if message.bytes_left() < fragment_length {
                panic!("Channel::receive(): fragment overflows the datagram");
            }
            if self.total_fragment_size + fragment_length > MAX_MSGLEN {
                panic!("Channel::receive(): fragment buffer overflow");
            }

            self.fragment_buffer[self.total_fragment_size..self.total_fragment_size + fragment_length]
                .copy_from_slice(&message.remaining()[..fragment_length]);
            self.total_fragment_size += fragment_length;

            if !last {
                return None;
            }

            let total = self.total_fragment_size;
            self.total_fragment_size = 0;
            self.fragment_buffer[..total].to_vec()
        } else {
            message.remaining().to_vec()
        };

        let payload = if compressed && !payload.is_empty() {
            match compression::decompress(&payload, MAX_MSGLEN) {
                Ok(decompressed) => decompressed,
                Err(error) => {
                    self.console.vprintf(format_args!("Channel::receive(): decompression failed: {}\n", error));
                    panic!("Channel::receive(): cannot decompress an ingoing payload");
                }
            }
        } else {
            payload
        };

        Some(Ingress::Sequenced(Message::from_data(&payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::NullConsole;
    use std::sync::Arc;

    fn test_channel() -> (Channel, NetworkAddress) {
        let address = NetworkAddress::parse("127.0.0.1:44400").unwrap();
        let mut channel = Channel::new(Arc::new(NullConsole));
        channel.curr_server_address = Some(address);
        (channel, address)
    }

    fn sequenced_datagram(sequence: u32, second_word: u32, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&sequence.to_le_bytes());
        data.extend_from_slice(&second_word.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn fragment_datagram(sequence: u32, start: u16, length_field: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(sequence | FRAGMENT_BIT).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&start.to_le_bytes());
        data.extend_from_slice(&length_field.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn non_sequenced_frames_are_delivered_verbatim() {
        let (mut channel, address) = test_channel();
        let mut data = (-1i32).to_le_bytes().to_vec();
        data.extend_from_slice(b"challenge 42\0");

        match channel.receive(&address, &data) {
            Some(Ingress::NonSequenced(mut message)) => {
                assert_eq!(message.read_string(), "challenge 42");
            }
            _ => panic!("expected a non-sequenced frame"),
        }
    }

    #[test]
    fn packets_from_a_foreign_address_are_dropped() {
        let (mut channel, _) = test_channel();
        let stranger = NetworkAddress::parse("10.1.2.3:44400").unwrap();
        let data = sequenced_datagram(1, 0, b"payload");
        assert!(channel.receive(&stranger, &data).is_none());
    }

    #[test]
    fn stale_and_duplicate_sequences_are_dropped() {
        let (mut channel, address) = test_channel();

        assert!(channel.receive(&address, &sequenced_datagram(5, 0, b"a")).is_some());
        // Duplicate
        assert!(channel.receive(&address, &sequenced_datagram(5, 0, b"a")).is_none());
        // Stale
        assert!(channel.receive(&address, &sequenced_datagram(3, 0, b"b")).is_none());
        // Advances
        assert!(channel.receive(&address, &sequenced_datagram(6, 0, b"c")).is_some());
        assert_eq!(channel.ingoing_sequence_num, 6);
    }

    #[test]
    fn two_fragments_reassemble_into_one_delivery() {
        let (mut channel, address) = test_channel();

        let first: Vec<u8> = (0..100).map(|i| i as u8).collect();
        let second: Vec<u8> = (100..150).map(|i| i as u8).collect();

        assert!(channel
            .receive(&address, &fragment_datagram(5, 0, 100, &first))
            .is_none());
        let delivered = channel.receive(
            &address,
            &fragment_datagram(5, 100, 50 | (FRAGMENT_LAST as u16), &second),
        );

        match delivered {
            Some(Ingress::Sequenced(message)) => {
                assert_eq!(message.cur_size(), 150);
                let expected: Vec<u8> = (0..150).map(|i| i as u8).collect();
                assert_eq!(message.data(), &expected[..]);
            }
            _ => panic!("expected one sequenced delivery"),
        }

        // Reassembly state is consumed
        assert_eq!(channel.total_fragment_size, 0);
    }

    #[test]
    fn out_of_order_fragment_is_discarded_and_reassembly_continues() {
        let (mut channel, address) = test_channel();

        assert!(channel.receive(&address, &fragment_datagram(7, 0, 10, &[1u8; 10])).is_none());
        // Wrong offset: dropped, reassembly untouched
        assert!(channel.receive(&address, &fragment_datagram(7, 99, 10, &[2u8; 10])).is_none());
        assert_eq!(channel.total_fragment_size, 10);

        let delivered = channel.receive(
            &address,
            &fragment_datagram(7, 10, 5 | (FRAGMENT_LAST as u16), &[3u8; 5]),
        );
        assert!(matches!(delivered, Some(Ingress::Sequenced(_))));
    }

    #[test]
    fn compressed_payload_is_inflated() {
        let (mut channel, address) = test_channel();

        let payload = b"a considerably repetitive payload payload payload payload".to_vec();
        let compressed = compression::compress(&payload).unwrap();
        let data = sequenced_datagram(1, FRAGMENT_BIT, &compressed);

        match channel.receive(&address, &data) {
            Some(Ingress::Sequenced(message)) => assert_eq!(message.data(), &payload[..]),
            _ => panic!("expected the decompressed payload"),
        }
    }

    #[test]
    fn sequenced_outgoing_frame_carries_the_header() {
        let (mut channel, _) = test_channel();
        channel.nat_punchthrough_port = 0xBEEF;
        channel.ingoing_sequence_num = 9;

        let message = channel.prepare_sequenced_outgoing_message();
        let data = message.data().to_vec();
        assert_eq!(&data[0..4], &0i32.to_le_bytes());
        assert_eq!(&data[4..8], &9i32.to_le_bytes());
        assert_eq!(&data[8..10], &0xBEEFu16.to_le_bytes());
        assert_eq!(channel.outgoing_sequence_num, 1);
    }

    #[test]
    fn non_sequenced_outgoing_frame_starts_with_minus_one() {
        let (mut channel, _) = test_channel();
        let message = channel.prepare_non_sequenced_outgoing_message();
        message.write_string("getchallenge");
        assert_eq!(&message.data()[0..4], &(-1i32).to_le_bytes());
    }
}
