// command_buffer.rs -- reliable client command ring
//
// Outgoing text commands are wrapped into CLC_CLIENT_COMMAND datagrams and
// held in a bounded FIFO ring until the server acknowledges their sequence
// number. Only the head slot is ever on the wire; it is retransmitted on a
// timer until the matching ack arrives, then the next slot takes its place.
//
// Connections the server marks reliable skip the ring entirely: the command
// is framed and sent once, delivery is the transport's problem.

use thiserror::Error;

use wswc_common::msg::Message;
use wswc_common::net_chan::Channel;
use wswc_common::qcommon::{CLC_CLIENT_COMMAND, TIMEOUT};

pub const MAX_BUFFERS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("reliable command ring is full")]
pub struct EnqueueOverflow;

struct MessageBuffer {
    message: Message,
    last_sent_at: i64,
    last_sequence_num: i64,
}

pub struct CommandBuffer {
    /// Scratch message for the reliable-connection bypass path.
    message: Message,
    sequence_num: i64,

    buffers: Vec<MessageBuffer>,
    num_buffers: usize,
    head_buffer_index: usize,
}

impl CommandBuffer {
    pub fn new() -> Self {
        let mut buffers = Vec::with_capacity(MAX_BUFFERS);
        for _ in 0..MAX_BUFFERS {
            buffers.push(MessageBuffer {
                message: Message::new(),
                last_sent_at: 0,
                last_sequence_num: 0,
            });
        }
        Self {
            message: Message::new(),
            sequence_num: 0,
            buffers,
            num_buffers: 0,
            head_buffer_index: 0,
        }
    }

    pub fn reset(&mut self) {
        self.sequence_num = 0;
        self.num_buffers = 0;
        self.head_buffer_index = 0;
    }

    pub fn num_buffered(&self) -> usize {
        self.num_buffers
    }

    fn tail_index(&self) -> usize {
        (self.head_buffer_index + self.num_buffers) % MAX_BUFFERS
    }

    fn newest_index(&self) -> usize {
        debug_assert!(self.num_buffers > 0);
        (self.head_buffer_index + self.num_buffers - 1) % MAX_BUFFERS
    }

    fn send_head_buffer(&mut self, channel: &mut Channel, now: i64) {
        assert!(self.num_buffers > 0);
        let head = &mut self.buffers[self.head_buffer_index];

        let channel_message = channel.prepare_sequenced_outgoing_message();
        head.message.copy_to(channel_message);
        channel.send();
        head.last_sent_at = now;
    }

    /// Retransmits the head slot once its resend deadline has passed.
    pub fn resend_buffered_messages(&mut self, channel: &mut Channel, now: i64) {
        if self.num_buffers == 0 || now < self.buffers[self.head_buffer_index].last_sent_at + TIMEOUT {
            return;
        }
        self.send_head_buffer(channel, now);
    }

    /// Releases the head slot when `ack_num` matches its sequence number,
    /// then gets the next head on the wire promptly.
    pub fn try_acknowledge(&mut self, channel: &mut Channel, now: i64, ack_num: i64) {
        if self.num_buffers == 0 || self.buffers[self.head_buffer_index].last_sequence_num != ack_num {
            return;
        }

        self.num_buffers -= 1;
        self.head_buffer_index = (self.head_buffer_index + 1) % MAX_BUFFERS;

        self.resend_buffered_messages(channel, now);
    }

    /// Buffers a command for an unreliable connection. The freshly enqueued
    /// command is transmitted at once when the ring was empty; otherwise it
    /// waits for its turn at the head.
    pub fn enqueue_for_unreliable_connection(
        &mut self,
        channel: &mut Channel,
        now: i64,
        command: &str,
    ) -> Result<(), EnqueueOverflow> {
        self.sequence_num += 1;

        if self.num_buffers == MAX_BUFFERS {
            // A stray self-acknowledge sometimes unjams the ring (matches
            // what actual clients do); a full ring of distinct sequence
            // numbers is unaffected.
            let newest_sequence_num = self.buffers[self.newest_index()].last_sequence_num;
            self.try_acknowledge(channel, now, newest_sequence_num);

            if self.num_buffers == MAX_BUFFERS {
                return Err(EnqueueOverflow);
            }
        }

        let sequence_num = self.sequence_num;
        let tail = self.tail_index();
        let buffer = &mut self.buffers[tail];
        buffer.last_sequence_num = sequence_num;
        buffer.last_sent_at = -TIMEOUT;
        buffer.message.clear();
        buffer.message.write_byte(CLC_CLIENT_COMMAND as i32);
        buffer.message.write_long(sequence_num as i32);
        buffer.message.write_string(command);
        self.num_buffers += 1;

        if self.num_buffers == 1 {
            self.send_head_buffer(channel, now);
        }

        Ok(())
    }

    /// Sends a command immediately over a reliable connection. No slot is
    /// occupied and no sequence tracking applies beyond the counter bump.
    pub fn enqueue_for_reliable_connection(&mut self, channel: &Channel, command: &str) {
        self.message.clear();
        self.message.write_byte(CLC_CLIENT_COMMAND as i32);
        self.sequence_num += 1;
        self.message.write_string(command);

        channel.send_message(&self.message);
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wswc_common::console::NullConsole;

    fn test_channel() -> Channel {
        Channel::new(Arc::new(NullConsole))
    }

    #[test]
    fn release_law_frees_the_slot_for_reuse() {
        let mut channel = test_channel();
        let mut commands = CommandBuffer::new();

        commands.enqueue_for_unreliable_connection(&mut channel, 0, "new").unwrap();
        assert_eq!(commands.num_buffered(), 1);

        commands.try_acknowledge(&mut channel, 10, 1);
        assert_eq!(commands.num_buffered(), 0);

        commands.enqueue_for_unreliable_connection(&mut channel, 20, "begin 3").unwrap();
        assert_eq!(commands.num_buffered(), 1);
        assert_eq!(commands.buffers[commands.head_buffer_index].last_sequence_num, 2);
    }

    #[test]
    fn mismatched_ack_releases_nothing() {
        let mut channel = test_channel();
        let mut commands = CommandBuffer::new();

        commands.enqueue_for_unreliable_connection(&mut channel, 0, "new").unwrap();
        commands.enqueue_for_unreliable_connection(&mut channel, 0, "configstrings 1 0").unwrap();

        commands.try_acknowledge(&mut channel, 0, 2);
        assert_eq!(commands.num_buffered(), 2);

        commands.try_acknowledge(&mut channel, 0, 1);
        assert_eq!(commands.num_buffered(), 1);
    }

    #[test]
    fn ring_full_rejects_the_thirty_third_command() {
        let mut channel = test_channel();
        let mut commands = CommandBuffer::new();

        for i in 0..MAX_BUFFERS {
            commands
                .enqueue_for_unreliable_connection(&mut channel, 0, &format!("cmd {}", i))
                .unwrap();
        }
        assert_eq!(commands.num_buffered(), MAX_BUFFERS);

        let result = commands.enqueue_for_unreliable_connection(&mut channel, 0, "one too many");
        assert_eq!(result, Err(EnqueueOverflow));

        // Acknowledging the head makes room again
        commands.try_acknowledge(&mut channel, 0, 1);
        commands
            .enqueue_for_unreliable_connection(&mut channel, 0, "fits now")
            .unwrap();
        assert_eq!(commands.num_buffered(), MAX_BUFFERS);
    }

    #[test]
    fn commands_keep_enqueue_order() {
        let mut channel = test_channel();
        let mut commands = CommandBuffer::new();

        for i in 0..4 {
            commands
                .enqueue_for_unreliable_connection(&mut channel, 0, &format!("cmd {}", i))
                .unwrap();
        }

        for expected in 1..=4i64 {
            assert_eq!(
                commands.buffers[commands.head_buffer_index].last_sequence_num,
                expected
            );
            commands.try_acknowledge(&mut channel, 0, expected);
        }
        assert_eq!(commands.num_buffered(), 0);
    }

    #[test]
    fn slot_payload_carries_opcode_sequence_and_text() {
        let mut channel = test_channel();
        let mut commands = CommandBuffer::new();

        commands.enqueue_for_unreliable_connection(&mut channel, 0, "new").unwrap();

        let slot = &mut commands.buffers[commands.head_buffer_index];
        slot.message.set_read_count(0);
        assert_eq!(slot.message.read_byte(), CLC_CLIENT_COMMAND as i32);
        assert_eq!(slot.message.read_long(), 1);
        assert_eq!(slot.message.read_string(), "new");
    }

    #[test]
    fn reset_clears_sequence_and_slots() {
        let mut channel = test_channel();
        let mut commands = CommandBuffer::new();

        commands.enqueue_for_unreliable_connection(&mut channel, 0, "new").unwrap();
        commands.reset();
        assert_eq!(commands.num_buffered(), 0);

        commands.enqueue_for_unreliable_connection(&mut channel, 0, "new").unwrap();
        assert_eq!(commands.buffers[commands.head_buffer_index].last_sequence_num, 1);
    }
}
