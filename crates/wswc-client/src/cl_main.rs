// cl_main.rs -- protocol-22 executor
//
// Owns the connection state machine: eight states from Disconnected through
// Active, driven by frame ticks, server text commands and ingame sequenced
// data. Commands from the host and from the server dispatch through two
// hashed handler registries; per-connection server commands are registered
// under a bumped generation tag so reset() can purge them in bulk.

use std::sync::Arc;

use wswc_common::cmd::CommandParser;
use wswc_common::console::ConsoleRef;
use wswc_common::msg::Message;
use wswc_common::net::{AddressParseError, NetworkAddress};
use wswc_common::net_chan::{Channel, Ingress};
use wswc_common::qcommon::{
    CLC_MOVE, CLC_SVACK, DROP_FLAG_AUTORECONNECT, INACTIVE_TIME, MAX_CONFIGSTRINGS, PROTOCOL21,
    TIMEOUT,
};

use crate::cl_parse::{BaselineReader, ClientWorldState};
use crate::client::ClientListener;
use crate::command_buffer::CommandBuffer;
use crate::handlers::{CommandHandlersRegistry, Lookup};
use crate::system::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    Disconnected,
    Setup,
    Challenging,
    Connecting,
    Loading,
    Configuring,
    Entering,
    Active,
}

pub struct ProtocolExecutor {
    pub(crate) console: ConsoleRef,
    clock: Arc<dyn Clock>,
    pub(crate) listener: Option<Box<dyn ClientListener>>,

    pub(crate) channel: Channel,
    pub(crate) command_buffer: CommandBuffer,

    server_command_handlers: CommandHandlersRegistry,
    client_command_handlers: CommandHandlersRegistry,

    pub(crate) world: ClientWorldState,
    pub(crate) baseline_reader: Option<Box<dyn BaselineReader>>,

    client_state: ClientState,
    protocol_version: i32,
    auto_reconnect: bool,

    resend_at: i64,
    pub(crate) last_sent_at: i64,

    curr_server_address: Option<NetworkAddress>,

    name: String,
    password: String,
    challenge: String,
    session: String,

    // Ingame parse state
    pub(crate) last_frame: i64,
    pub(crate) server_time: u64,
    pub(crate) last_cmd_ack: i64,
    pub(crate) last_executed_server_cmd_num: i64,
}

impl ProtocolExecutor {
    pub fn new(console: ConsoleRef, clock: Arc<dyn Clock>) -> Self {
        let mut server_command_handlers =
            CommandHandlersRegistry::new(console.clone(), "trying to execute a server command");
        let mut client_command_handlers =
            CommandHandlersRegistry::new(console.clone(), "trying to execute a command");

        // Persistent server commands (generation tag 0)
        server_command_handlers.register("challenge", Some(Self::server_command_challenge));
        server_command_handlers.register("client_connect", Some(Self::server_command_client_connect));
        server_command_handlers.register("cs", Some(Self::server_command_cs));
        server_command_handlers.register("cmd", Some(Self::server_command_cmd));
        server_command_handlers.register("precache", Some(Self::server_command_precache));
        server_command_handlers.register("disconnect", Some(Self::server_command_disconnect));
        server_command_handlers.register("reject", Some(Self::server_command_reject));
        server_command_handlers.register("forcereconnect", Some(Self::server_command_forcereconnect));
        server_command_handlers.register("reconnect", Some(Self::server_command_reconnect));

        server_command_handlers.register("pr", Some(Self::server_command_pr));
        server_command_handlers.register("print", Some(Self::server_command_print));
        server_command_handlers.register("ch", Some(Self::server_command_ch));
        server_command_handlers.register("tch", Some(Self::server_command_tch));
        server_command_handlers.register("tvch", Some(Self::server_command_tvch));
        server_command_handlers.register("motd", Some(Self::server_command_motd));

        for name in [
            "mm", "mapmsg", "plstats", "scb", "obry", "ti", "cvarinfo", "demoget", "cha", "chr",
            "mecu", "meop", "memo", "changing", "cp", "cpf", "aw", "qm",
        ] {
            server_command_handlers.register(name, None);
        }

        server_command_handlers.new_generation_tag();

        for name in ["dstart", "dstop", "dcancel", "cpc", "cpa"] {
            server_command_handlers.register(name, None);
        }

        // Persistent client commands
        client_command_handlers.register("connect", Some(Self::command_connect));
        client_command_handlers.register("disconnect", Some(Self::command_disconnect));

        client_command_handlers.new_generation_tag();

        Self {
            channel: Channel::new(console.clone()),
            command_buffer: CommandBuffer::new(),
            server_command_handlers,
            client_command_handlers,
            world: ClientWorldState::new(),
            baseline_reader: None,
            console,
            clock,
            listener: None,
            client_state: ClientState::Disconnected,
            protocol_version: PROTOCOL21,
            auto_reconnect: false,
            resend_at: 0,
            last_sent_at: 0,
            curr_server_address: None,
            name: String::new(),
            password: String::new(),
            challenge: String::new(),
            session: String::new(),
            last_frame: -1,
            server_time: 0,
            last_cmd_ack: -1,
            last_executed_server_cmd_num: 0,
        }
    }

    pub fn state(&self) -> ClientState {
        self.client_state
    }

    /// The session token assigned by the server during the handshake.
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.auto_reconnect = auto_reconnect;
    }

    fn millis(&self) -> i64 {
        self.clock.millis()
    }

    fn set_state(&mut self, client_state: ClientState, resend_at: i64) {
        self.client_state = client_state;
        self.resend_at = resend_at;
    }

    fn send(&mut self) {
        self.channel.send();
        self.last_sent_at = self.millis();
    }

    // ========================================================
    // Command dispatch
    // ========================================================

    pub fn execute_command_from_client(&mut self, command: &str) {
        let mut parser = CommandParser::new(command);
        self.handle_command(false, &mut parser);
    }

    pub fn execute_command_from_server(&mut self, command: &str) {
        let mut parser = CommandParser::new(command);
        self.handle_command(true, &mut parser);
    }

    fn handle_command(&mut self, from_server: bool, parser: &mut CommandParser) -> bool {
        let registry = if from_server {
            &self.server_command_handlers
        } else {
            &self.client_command_handlers
        };
        let purpose = registry.purpose();

        let Some(token) = parser.get_command() else {
            self.console.vprintf(format_args!("{}: no command has been supplied\n", purpose));
            return false;
        };

        if token.is_empty() {
            return true;
        }

        match registry.find(&token) {
            Lookup::Found(handler) => {
                if let Some(handler) = handler {
                    handler(self, parser);
                }
                true
            }
            Lookup::Missing => {
                self.console.vprintf(format_args!("{}: unknown command {}\n", purpose, token.text));
                false
            }
        }
    }

    // ========================================================
    // Ingress
    // ========================================================

    /// Drains the channel socket and processes every surviving frame.
    /// Returns the number of frames processed.
    pub fn frame_io(&mut self) -> usize {
        let events = self.channel.receive_pending();
        let count = events.len();

        for ingress in events {
            self.process_ingress(ingress);
        }
        count
    }

    pub(crate) fn process_ingress(&mut self, ingress: Ingress) {
        match ingress {
            Ingress::Sequenced(mut message) => self.parse_message(&mut message),
            Ingress::NonSequenced(mut message) => {
                let command = message.read_string();
                let mut parser = CommandParser::new(&command);
                self.handle_command(true, &mut parser);
            }
        }
    }

    // ========================================================
    // Client commands
    // ========================================================

    fn command_connect(&mut self, parser: &mut CommandParser) {
        let Some(arg) = parser.get_arg() else {
            self.console.printf("Cannot execute `connect` command: the address is not specified\n");
            return;
        };

        match NetworkAddress::parse(&arg.text) {
            Ok(address) => self.connect_to_address(&address),
            Err(AddressParseError::Malformed(_)) => {
                self.console.vprintf(format_args!(
                    "Cannot execute `connect` command: illegal address `{}`\n",
                    arg.text
                ));
            }
            Err(AddressParseError::Unresolved(_)) => {
                self.console.printf("Cannot execute `connect` command: DNS address resolution is not supported yet\n");
            }
        }
    }

    pub(crate) fn connect_to_address(&mut self, address: &NetworkAddress) {
        if !self.channel.prepare_for_address(address) {
            return;
        }

        self.curr_server_address = Some(*address);
        self.channel.start_listening();
        self.do_challenge_request();
    }

    fn command_disconnect(&mut self, _parser: &mut CommandParser) {
        self.disconnect();
    }

    pub fn disconnect(&mut self) {
        if self.client_state == ClientState::Disconnected {
            return;
        }

        self.do_disconnect_request();
        self.channel.stop_listening();
    }

    // ========================================================
    // Handshake requests
    // ========================================================

    fn do_challenge_request(&mut self) {
        self.console.printf("Requesting challenge...\n");
        let message = self.channel.prepare_non_sequenced_outgoing_message();
        message.write_string("getchallenge");
        self.send();
        let resend_at = self.millis() + TIMEOUT;
        self.set_state(ClientState::Challenging, resend_at);
    }

    fn do_connect_request(&mut self) {
        self.console.printf("Sending connection request...\n");
        let protocol_version = self.protocol_version;
        let port = self.channel.nat_punchthrough_port();
        let request = format!(
            "connect {} {} {} \"\\name\\{}\\password\\{}\" 0",
            protocol_version, port, self.challenge, self.name, self.password
        );
        let message = self.channel.prepare_non_sequenced_outgoing_message();
        message.printf(format_args!("{}", request));
        self.send();
        let resend_at = self.millis() + TIMEOUT;
        self.set_state(ClientState::Connecting, resend_at);
    }

    fn do_disconnect_request(&mut self) {
        self.console.printf("Disconnecting...\n");

        for _ in 0..3 {
            let message = self.channel.prepare_non_sequenced_outgoing_message();
            message.write_string("disconnect");
            self.send();
        }
        self.set_state(ClientState::Disconnected, 0);
    }

    // ========================================================
    // Server commands
    // ========================================================

    fn server_command_challenge(&mut self, parser: &mut CommandParser) {
        let Some(token) = parser.get_command() else {
            self.console.printf("Cannot execute server `challenge` command: missing an argument\n");
            return;
        };

        self.challenge = token.text;
        self.do_connect_request();
    }

    fn server_command_client_connect(&mut self, parser: &mut CommandParser) {
        let Some(token) = parser.get_command() else {
            self.console.printf("Cannot execute server `client_connect` command: missing an argument\n");
            return;
        };

        self.session = token.text;
        self.client_connect_action();
    }

    fn client_connect_action(&mut self) {
        self.console.printf("Sending serverdata request...\n");
        self.enqueue_command("new");
        self.set_state(ClientState::Loading, 0);
    }

    fn server_command_cs(&mut self, parser: &mut CommandParser) {
        loop {
            let Some(num_token) = parser.get_arg() else {
                break;
            };

            let index = match num_token.text.parse::<i64>() {
                Ok(index) if index >= 0 && (index as usize) < MAX_CONFIGSTRINGS => index as usize,
                _ => {
                    self.console.vprintf(format_args!(
                        "Cannot execute server `cs` command: illegal configstring number {}\n",
                        num_token.text
                    ));
                    break;
                }
            };

            let Some(value_token) = parser.get_arg() else {
                self.console.vprintf(format_args!(
                    "Cannot execute server `cs` command: missing configstring value for string #{}\n",
                    index
                ));
                break;
            };

            self.world.set_config_string(index, &value_token.text);
        }
    }

    fn server_command_cmd(&mut self, parser: &mut CommandParser) {
        let Some(first) = parser.get_arg() else {
            self.console.printf("Cannot execute server `cmd` command: an argument is missing\n");
            return;
        };

        let mut buffer = first.text;

        while let Some(token) = parser.get_arg() {
            if buffer.len() + token.len() + 3 >= wswc_common::qcommon::MAX_STRING_CHARS {
                self.console.printf("Cannot execute server `cmd` command: the command is too long\n");
                return;
            }
            buffer.push(' ');
            buffer.push('"');
            buffer.push_str(&token.text);
            buffer.push('"');
        }

        self.enqueue_command(&buffer);
        self.resend_at = self.millis() + TIMEOUT;
    }

    fn server_command_precache(&mut self, _parser: &mut CommandParser) {
        if self.client_state != ClientState::Configuring {
            return;
        }

        let has_base_configstring = self
            .world
            .config_string(0)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_base_configstring {
            return;
        }

        self.enter();
    }

    fn enter(&mut self) {
        self.console.printf("Entering the game...\n");
        let command = format!("begin {}", self.world.spawn_count);
        self.enqueue_command(&command);
        self.set_state(ClientState::Entering, 0);
    }

    fn server_command_disconnect(&mut self, parser: &mut CommandParser) {
        if self.auto_reconnect {
            self.server_command_reconnect(parser);
        } else {
            self.disconnect();
        }
    }

    fn server_command_reject(&mut self, parser: &mut CommandParser) {
        if self.client_state > ClientState::Connecting {
            return;
        }

        let Some(drop_type_token) = parser.get_command() else {
            self.console.printf("Cannot execute server `reject` command: missing the drop type\n");
            return;
        };
        let Ok(_drop_type) = drop_type_token.text.parse::<u32>() else {
            self.console.printf("Cannot execute server `reject` command: illegal drop type token\n");
            return;
        };

        let Some(drop_flags_token) = parser.get_command() else {
            self.console.printf("Cannot execute server `reject` command: missing the drop flags\n");
            return;
        };
        let Ok(drop_flags) = drop_flags_token.text.parse::<u32>() else {
            self.console.printf("Cannot execute server `reject` command: illegal drop flags token\n");
            return;
        };

        let Some(reason) = parser.get_command() else {
            self.console.printf("Cannot execute server `reject` command: missing the drop reason string\n");
            return;
        };

        self.console.vprintf(format_args!("Rejected: {}\n", reason.text));
        self.disconnect();

        if (drop_flags as i32) & DROP_FLAG_AUTORECONNECT != 0 || self.auto_reconnect {
            self.client_connect_action();
        }
    }

    fn server_command_forcereconnect(&mut self, _parser: &mut CommandParser) {
        let address = self.curr_server_address;

        self.reset();

        if let Some(address) = address {
            self.connect_to_address(&address);
        }
    }

    fn server_command_reconnect(&mut self, _parser: &mut CommandParser) {
        self.disconnect();
        self.client_connect_action();
    }

    fn server_command_pr(&mut self, parser: &mut CommandParser) {
        if let Some(token) = parser.get_arg() {
            self.console.printf(&token.text);
        }
    }

    fn server_command_print(&mut self, parser: &mut CommandParser) {
        if let Some(token) = parser.get_arg() {
            self.notify_centered_message(&token.text);
        }
    }

    fn server_command_ch(&mut self, parser: &mut CommandParser) {
        if let Some((from, message)) = Self::parse_chat_args(parser) {
            self.notify_chat_message(&from, &message);
        }
    }

    fn server_command_tch(&mut self, parser: &mut CommandParser) {
        if let Some((from, message)) = Self::parse_chat_args(parser) {
            self.notify_team_chat_message(&from, &message);
        }
    }

    fn server_command_tvch(&mut self, parser: &mut CommandParser) {
        if let Some((from, message)) = Self::parse_chat_args(parser) {
            self.notify_tv_chat_message(&from, &message);
        }
    }

    fn parse_chat_args(parser: &mut CommandParser) -> Option<(String, String)> {
        let from = parser.get_arg()?;
        let message = parser.get_arg()?;
        Some((from.text, message.text))
    }

    fn server_command_motd(&mut self, parser: &mut CommandParser) {
        if let Some(token) = parser.get_arg() {
            self.notify_message_of_the_day(&token.text);
        }
    }

    // ========================================================
    // Listener notifications
    // ========================================================

    fn print_missing_listener_warning(&self, function: &str) {
        self.console.vprintf(format_args!("Warning: {}: client listener is not set\n", function));
    }

    pub(crate) fn notify_shown_player_name(&mut self, name: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.set_shown_player_name(name);
        } else {
            self.print_missing_listener_warning("notify_shown_player_name()");
            self.console.vprintf(format_args!("Shown player name: `{}`\n", name));
        }
    }

    pub(crate) fn notify_message_of_the_day(&mut self, motd: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.set_message_of_the_day(motd);
        } else {
            self.print_missing_listener_warning("notify_message_of_the_day()");
            self.console.vprintf(format_args!("Message of the day: `{}`\n", motd));
        }
    }

    pub(crate) fn notify_centered_message(&mut self, message: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.print_centered_message(message);
        } else {
            self.print_missing_listener_warning("notify_centered_message()");
            self.console.vprintf(format_args!("Centered message: `{}`\n", message));
        }
    }

    pub(crate) fn notify_chat_message(&mut self, from: &str, message: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.print_chat_message(from, message);
        } else {
            self.print_missing_listener_warning("notify_chat_message()");
            self.console.vprintf(format_args!("Chat from `{}`: `{}`\n", from, message));
        }
    }

    pub(crate) fn notify_team_chat_message(&mut self, from: &str, message: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.print_team_chat_message(from, message);
        } else {
            self.print_missing_listener_warning("notify_team_chat_message()");
            self.console.vprintf(format_args!("Team chat from `{}`: `{}`\n", from, message));
        }
    }

    pub(crate) fn notify_tv_chat_message(&mut self, from: &str, message: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.print_tv_chat_message(from, message);
        } else {
            self.print_missing_listener_warning("notify_tv_chat_message()");
            self.console.vprintf(format_args!("TV chat from `{}`: `{}`\n", from, message));
        }
    }

    // ========================================================
    // Acks and moves
    // ========================================================

    pub(crate) fn send_command_ack(&mut self, ack_num: i64) {
        if ack_num > i32::MAX as i64 {
            self.console.printf("ProtocolExecutor::send_command_ack(): integer overflow\n");
            return;
        }

        let message = self.channel.prepare_sequenced_outgoing_message();
        message.write_byte(CLC_SVACK as i32);
        message.write_long(ack_num as i32);
        self.send();
    }

    pub(crate) fn send_frame_ack(&mut self, last_frame: i64, server_time: u64) {
        if last_frame > i32::MAX as i64 {
            self.console.printf("ProtocolExecutor::send_frame_ack(): integer overflow on `last_frame` arg\n");
            return;
        }
        if server_time > i32::MAX as u64 {
            self.console.printf("ProtocolExecutor::send_frame_ack(): integer overflow on `server_time` arg\n");
            return;
        }

        self.last_frame = last_frame;
        self.server_time = server_time;

        let message = self.channel.prepare_sequenced_outgoing_message();
        Self::add_move(message, last_frame, server_time);
        self.send();
    }

    pub(crate) fn try_acknowledge(&mut self, ack_num: i64) {
        let now = self.clock.millis();
        self.command_buffer.try_acknowledge(&mut self.channel, now, ack_num);
    }

    /// The minimal user-command stand-in acknowledging a server frame.
    fn add_move(message: &mut Message, last_frame: i64, server_time: u64) {
        message.write_byte(CLC_MOVE as i32);
        message.write_long(last_frame as i32);
        message.write_long(2);
        message.write_byte(1);
        message.write_byte(0);
        message.write_long(server_time as i32);
    }

    pub(crate) fn activate(&mut self) {
        if self.client_state != ClientState::Entering {
            return;
        }

        self.set_state(ClientState::Active, 0);

        let name = self.name.clone();
        self.notify_shown_player_name(&name);
    }

    // ========================================================
    // Command queueing
    // ========================================================

    pub(crate) fn enqueue_command(&mut self, command: &str) {
        if self.client_state < ClientState::Setup {
            self.console.printf("ProtocolExecutor::enqueue_command(): not connected\n");
            return;
        }

        if self.world.is_connection_reliable() {
            self.command_buffer.enqueue_for_reliable_connection(&self.channel, command);
            self.last_sent_at = self.millis();
        } else {
            let now = self.millis();
            if self
                .command_buffer
                .enqueue_for_unreliable_connection(&mut self.channel, now, command)
                .is_err()
            {
                self.console.vprintf(format_args!(
                    "ProtocolExecutor::enqueue_command(): dropped `{}`: the command ring is full\n",
                    command
                ));
            }
        }
    }

    // ========================================================
    // Lifecycle
    // ========================================================

    pub fn reset(&mut self) {
        self.client_state = ClientState::Disconnected;

        self.world.clear();

        let server_tag = self.server_command_handlers.curr_generation_tag();
        self.server_command_handlers.clear(server_tag);
        let client_tag = self.client_command_handlers.curr_generation_tag();
        self.client_command_handlers.clear(client_tag);

        self.channel.reset();
        self.command_buffer.reset();
    }

    pub fn frame(&mut self) {
        if self.client_state == ClientState::Disconnected {
            return;
        }

        let now = self.millis();
        self.command_buffer.resend_buffered_messages(&mut self.channel, now);

        match self.client_state {
            ClientState::Challenging => {
                if now >= self.resend_at {
                    self.do_challenge_request();
                }
            }
            ClientState::Connecting => {
                if now >= self.resend_at {
                    self.do_connect_request();
                }
            }
            ClientState::Loading => {
                if self.world.player_num == 0 {
                    return;
                }
                self.console.printf("Requesting configstrings...\n");
                let command = format!("configstrings {} 0", self.world.spawn_count);
                self.enqueue_command(&command);
                self.set_state(ClientState::Configuring, 0);
            }
            ClientState::Active => {
                if now >= self.last_sent_at + INACTIVE_TIME {
                    let last_frame = self.last_frame;
                    let server_time = self.server_time;
                    let message = self.channel.prepare_sequenced_outgoing_message();
                    Self::add_move(message, last_frame, server_time);
                    self.send();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests_support::ManualClock;
    use std::sync::{Arc, Mutex};
    use wswc_common::console::NullConsole;

    #[derive(Default)]
    pub struct RecordingListener {
        pub events: Arc<Mutex<Vec<String>>>,
    }

    impl ClientListener for RecordingListener {
        fn set_shown_player_name(&mut self, name: &str) {
            self.events.lock().unwrap().push(format!("name:{}", name));
        }
        fn set_message_of_the_day(&mut self, motd: &str) {
            self.events.lock().unwrap().push(format!("motd:{}", motd));
        }
        fn print_centered_message(&mut self, message: &str) {
            self.events.lock().unwrap().push(format!("center:{}", message));
        }
        fn print_chat_message(&mut self, from: &str, message: &str) {
            self.events.lock().unwrap().push(format!("chat:{}:{}", from, message));
        }
        fn print_team_chat_message(&mut self, from: &str, message: &str) {
            self.events.lock().unwrap().push(format!("tchat:{}:{}", from, message));
        }
        fn print_tv_chat_message(&mut self, from: &str, message: &str) {
            self.events.lock().unwrap().push(format!("tvchat:{}:{}", from, message));
        }
    }

    fn test_executor() -> (ProtocolExecutor, Arc<ManualClock>, Arc<Mutex<Vec<String>>>) {
        let clock = Arc::new(ManualClock::new());
        let mut executor = ProtocolExecutor::new(Arc::new(NullConsole), clock.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        executor.listener = Some(Box::new(RecordingListener { events: events.clone() }));
        (executor, clock, events)
    }

    #[test]
    fn connect_command_transitions_to_challenging() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        assert_eq!(executor.state(), ClientState::Challenging);
        assert!(executor.curr_server_address.is_some());
    }

    #[test]
    fn connect_with_bad_address_stays_disconnected() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect not.a.numeric.host");
        assert_eq!(executor.state(), ClientState::Disconnected);
        executor.execute_command_from_client("connect");
        assert_eq!(executor.state(), ClientState::Disconnected);
    }

    #[test]
    fn challenge_reply_moves_to_connecting() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge XYZ");
        assert_eq!(executor.state(), ClientState::Connecting);
        assert_eq!(executor.challenge, "XYZ");
    }

    #[test]
    fn client_connect_reply_moves_to_loading() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge XYZ");
        executor.execute_command_from_server("client_connect sess-77");
        assert_eq!(executor.state(), ClientState::Loading);
        assert_eq!(executor.session, "sess-77");
        assert_eq!(executor.command_buffer.num_buffered(), 1);
    }

    #[test]
    fn loading_waits_for_player_num_then_requests_configstrings() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge XYZ");
        executor.execute_command_from_server("client_connect sess");

        executor.frame();
        assert_eq!(executor.state(), ClientState::Loading);

        executor.world.player_num = 3;
        executor.world.spawn_count = 8;
        executor.frame();
        assert_eq!(executor.state(), ClientState::Configuring);
    }

    #[test]
    fn precache_requires_the_base_configstring() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge XYZ");
        executor.execute_command_from_server("client_connect sess");
        executor.world.player_num = 1;
        executor.frame();
        assert_eq!(executor.state(), ClientState::Configuring);

        executor.execute_command_from_server("precache");
        assert_eq!(executor.state(), ClientState::Configuring);

        executor.execute_command_from_server("cs 0 \"basewsw\"");
        executor.execute_command_from_server("precache");
        assert_eq!(executor.state(), ClientState::Entering);
    }

    #[test]
    fn activate_fires_only_from_entering() {
        let (mut executor, _, events) = test_executor();
        executor.set_name("tester");
        executor.activate();
        assert_eq!(executor.state(), ClientState::Disconnected);

        executor.set_state(ClientState::Entering, 0);
        executor.activate();
        assert_eq!(executor.state(), ClientState::Active);
        assert_eq!(events.lock().unwrap().as_slice(), ["name:tester"]);
    }

    #[test]
    fn resend_timer_reissues_the_challenge() {
        let (mut executor, clock, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        let first_deadline = executor.resend_at;

        clock.set(TIMEOUT - 1);
        executor.frame();
        assert_eq!(executor.resend_at, first_deadline);

        clock.set(TIMEOUT);
        executor.frame();
        assert_eq!(executor.state(), ClientState::Challenging);
        assert_eq!(executor.resend_at, TIMEOUT + TIMEOUT);
    }

    #[test]
    fn cs_command_updates_configstrings_and_stops_on_garbage() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_server("cs 1 \"one\" 2 \"two\"");
        assert_eq!(executor.world.config_string(1), Some("one"));
        assert_eq!(executor.world.config_string(2), Some("two"));

        executor.execute_command_from_server("cs 3 \"three\" bogus \"ignored\"");
        assert_eq!(executor.world.config_string(3), Some("three"));

        executor.execute_command_from_server("cs 9999 \"out of range\"");
        executor.execute_command_from_server("cs -1 \"negative\"");
    }

    #[test]
    fn cmd_command_requotes_and_enqueues() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge X");
        executor.execute_command_from_server("client_connect sess");
        let buffered_before = executor.command_buffer.num_buffered();

        executor.execute_command_from_server("cmd usercount total");
        assert_eq!(executor.command_buffer.num_buffered(), buffered_before + 1);
    }

    #[test]
    fn chat_and_motd_reach_the_listener() {
        let (mut executor, _, events) = test_executor();
        executor.execute_command_from_server("ch Player \"hello all\"");
        executor.execute_command_from_server("tch Mate \"push mid\"");
        executor.execute_command_from_server("tvch Zor \"nice move\"");
        executor.execute_command_from_server("motd \"welcome to the grid\"");
        executor.execute_command_from_server("print \"round over\"");

        let events = events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            [
                "chat:Player:hello all",
                "tchat:Mate:push mid",
                "tvchat:Zor:nice move",
                "motd:welcome to the grid",
                "center:round over",
            ]
        );
    }

    #[test]
    fn unknown_server_command_is_reported_not_fatal() {
        let (mut executor, _, _) = test_executor();
        let mut parser = CommandParser::new("nosuchcommand arg");
        assert!(!executor.handle_command(true, &mut parser));
    }

    #[test]
    fn noop_server_commands_are_accepted() {
        let (mut executor, _, _) = test_executor();
        let mut parser = CommandParser::new("plstats 1 2 3");
        assert!(executor.handle_command(true, &mut parser));
    }

    #[test]
    fn reject_with_autoreconnect_flag_reconnects() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge X");
        assert_eq!(executor.state(), ClientState::Connecting);

        executor.execute_command_from_server("reject 0 1 full");
        // The autoreconnect flag re-enters the loading path
        assert_eq!(executor.state(), ClientState::Loading);
    }

    #[test]
    fn reject_without_flags_disconnects() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge X");

        executor.execute_command_from_server("reject 0 0 banned");
        assert_eq!(executor.state(), ClientState::Disconnected);
    }

    #[test]
    fn reject_is_ignored_after_connecting() {
        let (mut executor, _, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.execute_command_from_server("challenge X");
        executor.execute_command_from_server("client_connect sess");
        assert_eq!(executor.state(), ClientState::Loading);

        executor.execute_command_from_server("reject 0 0 late");
        assert_eq!(executor.state(), ClientState::Loading);
    }

    #[test]
    fn reset_purges_per_session_handlers_but_keeps_persistent_ones() {
        let (mut executor, _, _) = test_executor();
        let mut parser = CommandParser::new("dstart");
        assert!(executor.handle_command(true, &mut parser));

        executor.reset();

        let mut parser = CommandParser::new("dstart");
        assert!(!executor.handle_command(true, &mut parser));
        let mut parser = CommandParser::new("challenge X");
        assert!(executor.handle_command(true, &mut parser));
    }

    #[test]
    fn keepalive_move_is_sent_when_idle() {
        let (mut executor, clock, _) = test_executor();
        executor.execute_command_from_client("connect 127.0.0.1:44400");
        executor.set_state(ClientState::Active, 0);
        executor.last_sent_at = 0;

        clock.set(INACTIVE_TIME);
        executor.frame();
        // last_sent_at advanced by the keepalive send
        assert_eq!(executor.last_sent_at, INACTIVE_TIME);
    }
}
