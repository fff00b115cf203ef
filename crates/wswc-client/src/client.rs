// client.rs -- host-facing fake client facade
//
// A Client owns one protocol-22 executor and relays textual commands into
// it. The host observes the connection through a ClientListener; when none
// is installed the payloads land on the console instead, prefixed with a
// warning, so a headless setup still shows what is going on.

use std::sync::Arc;

use wswc_common::console::ConsoleRef;

use crate::cl_main::{ClientState, ProtocolExecutor};
use crate::cl_parse::BaselineReader;
use crate::system::Clock;

pub trait ClientListener: Send {
    fn set_shown_player_name(&mut self, name: &str);
    fn set_message_of_the_day(&mut self, motd: &str);
    fn print_centered_message(&mut self, message: &str);
    fn print_chat_message(&mut self, from: &str, message: &str);
    fn print_team_chat_message(&mut self, from: &str, message: &str);
    fn print_tv_chat_message(&mut self, from: &str, message: &str);
}

pub struct Client {
    executor: ProtocolExecutor,
    name: String,
    password: String,
}

impl Client {
    pub fn new(console: ConsoleRef, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor: ProtocolExecutor::new(console, clock),
            name: String::new(),
            password: String::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.executor.state()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.executor.set_name(name);
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
        self.executor.set_password(password);
    }

    pub fn set_listener(&mut self, listener: Box<dyn ClientListener>) {
        self.executor.listener = Some(listener);
    }

    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.executor.set_auto_reconnect(auto_reconnect);
    }

    /// Installs the collaborator that consumes spawn-baseline records.
    pub fn set_baseline_reader(&mut self, reader: Box<dyn BaselineReader>) {
        self.executor.baseline_reader = Some(reader);
    }

    /// Executes a textual command, e.g. `connect 127.0.0.1:44400` or
    /// `disconnect`.
    pub fn execute_command(&mut self, command: &str) {
        self.executor.execute_command_from_client(command);
    }

    /// Tears the connection state down. The name, password and listener
    /// survive for the next connection attempt.
    pub fn reset(&mut self) {
        self.executor.reset();
        self.executor.set_name(&self.name);
        self.executor.set_password(&self.password);
    }

    /// Drains pending datagrams. Returns how many frames were processed.
    pub(crate) fn frame_io(&mut self) -> usize {
        self.executor.frame_io()
    }

    /// Runs resend and state timers. The System calls this every frame;
    /// standalone hosts may drive it directly.
    pub fn frame(&mut self) {
        self.executor.frame_io();
        self.executor.frame();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests_support::ManualClock;
    use wswc_common::console::NullConsole;

    fn test_client() -> Client {
        Client::new(Arc::new(NullConsole), Arc::new(ManualClock::new()))
    }

    #[test]
    fn reset_is_idempotent_and_keeps_identity() {
        let mut client = test_client();
        client.set_name("player one");
        client.execute_command("connect 127.0.0.1:44400");
        assert_eq!(client.state(), ClientState::Challenging);

        client.reset();
        assert_eq!(client.state(), ClientState::Disconnected);
        client.reset();
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn disconnect_without_a_connection_is_a_no_op() {
        let mut client = test_client();
        client.execute_command("disconnect");
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn frame_on_a_disconnected_client_does_nothing() {
        let mut client = test_client();
        client.frame();
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}
