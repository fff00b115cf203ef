// cl_parse.rs -- server-to-client message parsing and client world state
//
// Sequenced frames carry a stream of SVC_* sub-commands. This parser decodes
// the ones that drive the connection: command acks, embedded text commands,
// the serverdata block and frame headers. Entity and player-state deltas are
// an opaque game format this client has no use for; frames are skipped via
// the snapshot length in their header, and spawn baselines are handed to a
// host-supplied reader since they carry no length of their own.

use wswc_common::msg::Message;
use wswc_common::qcommon::{MAX_CONFIGSTRINGS, MAX_CONFIGSTRING_CHARS, MAX_SERVER_CLIENTS};

use crate::cl_main::ProtocolExecutor;

pub const PS_MAX_STATS: usize = 64;

pub const SV_BITFLAGS_RELIABLE: i32 = 1 << 1;
pub const SV_BITFLAGS_HTTP: i32 = 1 << 3;
pub const SV_BITFLAGS_BASEURL: i32 = 1 << 4;

// Server-to-client sub-command prefixes
pub const SVC_BAD: i32 = 0;
pub const SVC_NOP: i32 = 1;
pub const SVC_SERVERCMD: i32 = 2;
pub const SVC_SERVERDATA: i32 = 3;
pub const SVC_SPAWNBASELINE: i32 = 4;
pub const SVC_DOWNLOAD: i32 = 5;
pub const SVC_PLAYERINFO: i32 = 6;
pub const SVC_PACKETENTITIES: i32 = 7;
pub const SVC_GAMECOMMANDS: i32 = 8;
pub const SVC_MATCH: i32 = 9;
pub const SVC_CLACK: i32 = 10;
pub const SVC_SERVERCS: i32 = 11;
pub const SVC_FRAME: i32 = 12;
pub const SVC_DEMOINFO: i32 = 13;
pub const SVC_EXTENSION: i32 = 14;

const FRAMESNAP_FLAG_MULTIPOV: i32 = 1 << 2;

/// Consumes spawn-baseline entity records. Baselines use the delta entity
/// encoding this client does not decode; a host that needs the connection to
/// survive the loading phase against a full server installs one.
pub trait BaselineReader: Send {
    fn read_baseline(&mut self, message: &mut Message);
}

// ============================================================
// Client world state
// ============================================================

pub struct ClientWorldState {
    pub protocol: i32,
    pub player_num: i32,
    pub spawn_count: i32,
    pub bit_flags: i32,

    pub download_port: u16,
    pub download_url: String,

    pub motd: String,
    pub game: String,
    pub level: String,

    stats: Vec<[i16; PS_MAX_STATS]>,
    config_strings: Vec<String>,
}

impl ClientWorldState {
    pub fn new() -> Self {
        Self {
            protocol: 0,
            player_num: 0,
            spawn_count: 0,
            bit_flags: 0,
            download_port: 0,
            download_url: String::new(),
            motd: String::new(),
            game: String::new(),
            level: String::new(),
            stats: vec![[0; PS_MAX_STATS]; MAX_SERVER_CLIENTS],
            config_strings: vec![String::new(); MAX_CONFIGSTRINGS],
        }
    }

    pub fn clear(&mut self) {
        self.protocol = 0;
        self.player_num = 0;
        self.spawn_count = 0;
        self.bit_flags = 0;
        self.download_port = 0;
        self.download_url.clear();
        self.motd.clear();
        self.game.clear();
        self.level.clear();

        for row in &mut self.stats {
            *row = [0; PS_MAX_STATS];
        }
        for config_string in &mut self.config_strings {
            config_string.clear();
        }
    }

    pub fn is_connection_reliable(&self) -> bool {
        self.bit_flags & SV_BITFLAGS_RELIABLE != 0
    }

    pub fn config_string(&self, index: usize) -> Option<&str> {
        self.config_strings.get(index).map(String::as_str)
    }

    pub fn set_config_string(&mut self, index: usize, value: &str) {
        if index >= MAX_CONFIGSTRINGS {
            return;
        }
        let mut value = value.to_string();
        value.truncate(MAX_CONFIGSTRING_CHARS - 1);
        self.config_strings[index] = value;
    }

    pub fn stat(&self, player: usize, index: usize) -> i16 {
        self.stats[player][index]
    }

    pub fn set_stat(&mut self, player: usize, index: usize, value: i16) {
        if player < MAX_SERVER_CLIENTS && index < PS_MAX_STATS {
            self.stats[player][index] = value;
        }
    }
}

impl Default for ClientWorldState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Message parsing
// ============================================================

impl ProtocolExecutor {
    pub(crate) fn parse_message(&mut self, message: &mut Message) {
        loop {
            if message.bytes_left() == 0 {
                return;
            }
            let cmd_prefix = message.read_byte();

            match cmd_prefix {
                SVC_DEMOINFO => self.parse_demo_info(message),
                SVC_CLACK => self.parse_client_ack(message),
                SVC_SERVERCMD => self.parse_server_cmd(message),
                SVC_SERVERCS => self.parse_server_cs(message),
                SVC_SERVERDATA => self.parse_server_data(message),
                SVC_SPAWNBASELINE => self.parse_spawn_baseline(message),
                SVC_FRAME => self.parse_frame(message),
                _ => {
                    self.console.vprintf(format_args!("Unknown server command prefix {}\n", cmd_prefix));
                    panic!("ProtocolExecutor::parse_message(): unknown server command prefix");
                }
            }
        }
    }

    fn parse_demo_info(&mut self, message: &mut Message) {
        message.read_long();
        message.read_long();
        let meta_data_real_size = message.read_long() as i64;
        let meta_data_max_size = message.read_long() as i64;
        let end = message.read_count() as i64 + meta_data_real_size;

        while (message.read_count() as i64) < end {
            let key = message.read_string();
            let value = message.read_string();
            self.console.vprintf(format_args!("Demo info: {} {}\n", key, value));
        }

        let bytes_to_skip = meta_data_max_size - meta_data_real_size + end - message.read_count() as i64;
        if bytes_to_skip > 0 {
            message.skip(bytes_to_skip as usize);
        }
    }

    fn parse_client_ack(&mut self, message: &mut Message) {
        let ack = message.read_long() as i64;

        if ack > self.last_cmd_ack {
            self.try_acknowledge(ack);
            self.last_cmd_ack = ack;
        }
        message.read_long();
        self.activate();
    }

    fn parse_server_cmd(&mut self, message: &mut Message) {
        if !self.world.is_connection_reliable() {
            let cmd_num = message.read_long() as i64;

            if cmd_num <= self.last_executed_server_cmd_num {
                // A duplicate, skip the command text and move on
                message.read_string();
                return;
            }
            self.last_executed_server_cmd_num = cmd_num;
            self.send_command_ack(cmd_num);
        }

        self.parse_server_cs(message);
    }

    fn parse_server_cs(&mut self, message: &mut Message) {
        let command = message.read_string();
        self.execute_command_from_server(&command);
    }

    fn parse_server_data(&mut self, message: &mut Message) {
        self.world.protocol = message.read_long();
        self.world.spawn_count = message.read_long();
        message.read_short(); // snap frametime
        message.read_string(); // base game

        self.world.game = message.read_string();
        self.world.player_num = message.read_short() + 1;
        self.world.level = message.read_string();

        let bit_flags = message.read_byte();
        self.world.bit_flags = bit_flags;

        if bit_flags & SV_BITFLAGS_HTTP != 0 {
            if bit_flags & SV_BITFLAGS_BASEURL != 0 {
                self.world.download_url = message.read_string();
            } else {
                self.world.download_port = message.read_short() as u16;
            }
        }

        // Pure pak names and checksums, read and discarded
        let pure_num = message.read_short();
        for _ in 0..pure_num {
            message.read_string();
            message.read_long();
        }
    }

    fn parse_spawn_baseline(&mut self, message: &mut Message) {
        let mut reader = match self.baseline_reader.take() {
            Some(reader) => reader,
            None => {
                self.console.printf("ProtocolExecutor::parse_spawn_baseline(): no baseline reader is installed\n");
                panic!("ProtocolExecutor::parse_spawn_baseline(): cannot consume a spawn baseline");
            }
        };
        reader.read_baseline(message);
        self.baseline_reader = Some(reader);
    }

    fn parse_frame(&mut self, message: &mut Message) {
        if message.bytes_left() < 2 {
            self.console.printf("Can't read snapshot length\n");
            panic!("ProtocolExecutor::parse_frame(): can't read snapshot length");
        }

        let start_pos = message.read_count() + 2;

        // Frame header
        let length = message.read_short();
        let server_time = message.read_long() as i64 as u64;
        let frame = message.read_long() as i64;
        message.read_long(); // delta frame number
        message.read_long(); // ucmd executed
        let flags = message.read_byte() & 0xFF;
        message.read_byte(); // suppress count

        self.parse_game_commands(message, frame, flags);

        // The rest of the snapshot (area bits, game state, player states,
        // packet entities) is opaque here; the header length bounds it
        let consumed = message.read_count() - start_pos;
        if length as usize > consumed {
            message.skip(length as usize - consumed);
        }

        if frame > self.last_frame {
            self.send_frame_ack(frame, server_time);
        }
        self.last_frame = frame;
        self.server_time = server_time;
    }

    fn parse_game_commands(&mut self, message: &mut Message, frame: i64, flags: i32) {
        let prefix = message.read_byte();
        if prefix != SVC_GAMECOMMANDS {
            self.console.vprintf(format_args!(
                "ProtocolExecutor::parse_game_commands(): expected SVC_GAMECOMMANDS, got {}\n",
                prefix
            ));
            panic!("ProtocolExecutor::parse_game_commands(): stream is out of sync");
        }

        loop {
            let frame_diff = message.read_short();
            if frame_diff == -1 {
                break;
            }

            let command = message.read_string();
            let mut num_targets = 0usize;

            if flags & FRAMESNAP_FLAG_MULTIPOV != 0 {
                let mut targets = [0u8; MAX_SERVER_CLIENTS / 8];
                num_targets = (message.read_byte() & 0xFF) as usize;
                let targets_len = targets.len();
                message.read_data(&mut targets[..num_targets.min(targets_len)]);
            }

            if frame > self.last_frame + frame_diff as i64 {
                if num_targets == 0 {
                    self.execute_command_from_server(&command);
                } else {
                    self.console.printf("Multiple targets are not supported\n");
                    panic!("ProtocolExecutor::parse_game_commands(): multiple targets are not supported");
                }
            }
        }
    }
}
