// server_info.rs -- parsed game server snapshots
//
// An info/status response body is a `\key\value\...` sequence with an
// optional player-line section. Keys dispatch through a small hashed handler
// table; unknown keys are accepted silently. Every response must carry a
// `challenge` strictly greater than the last one the server was credited
// with, otherwise the whole record is rejected.

use wswc_common::cmd::add_char_to_hash;
use wswc_common::console::ConsoleRef;
use wswc_common::msg::Message;

use crate::pool::{Handle, Pool};

pub const MAX_SERVER_NAME_CHARS: usize = 63;
pub const MAX_SHORT_INFO_CHARS: usize = 31;
pub const MAX_PLAYER_NAME_CHARS: usize = 31;

// ============================================================
// Records
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchTime {
    pub time_minutes: i32,
    pub limit_minutes: i32,
    pub time_seconds: i8,
    pub limit_seconds: i8,
    pub is_warmup: bool,
    pub is_countdown: bool,
    pub is_finished: bool,
    pub is_overtime: bool,
    pub is_sudden_death: bool,
    pub is_timeout: bool,
}

impl MatchTime {
    pub fn clear(&mut self) {
        *self = MatchTime::default();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamScore {
    pub score: i32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchScore {
    pub scores: [TeamScore; 2],
}

impl MatchScore {
    pub fn alpha_score(&self) -> &TeamScore {
        &self.scores[0]
    }

    pub fn beta_score(&self) -> &TeamScore {
        &self.scores[1]
    }

    pub fn clear(&mut self) {
        self.scores[0] = TeamScore::default();
        self.scores[1] = TeamScore::default();
    }
}

#[derive(Debug, Default)]
pub struct PlayerInfo {
    pub score: i32,
    pub name: String,
    pub ping: u16,
    pub team: u8,

    pub(crate) prev_in_list: Option<Handle<PlayerInfo>>,
    pub(crate) next_in_list: Option<Handle<PlayerInfo>>,
}

impl PlayerInfo {
    /// Field equality, links aside. Cheap comparisons first.
    fn same_as(&self, that: &PlayerInfo) -> bool {
        if self.score != that.score || self.ping != that.ping || self.team != that.team {
            return false;
        }
        self.name == that.name
    }
}

#[derive(Debug, Default)]
pub struct ServerInfo {
    pub server_name: String,
    pub gametype: String,
    pub modname: String,
    pub mapname: String,

    pub time: MatchTime,
    pub score: MatchScore,

    pub max_clients: u8,
    pub num_clients: u8,
    pub num_bots: u8,

    pub need_password: bool,

    /// Whether an extended player info section is present.
    pub has_player_info: bool,
    /// May be empty even when extended player info is present.
    pub player_info_head: Option<Handle<PlayerInfo>>,
}

impl ServerInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change detection against the previous snapshot, ordered by how often
    /// each field changes in practice.
    pub fn matches_old(&self, old_info: &ServerInfo, players: &Pool<PlayerInfo>) -> bool {
        if self.time != old_info.time {
            return false;
        }

        if self.num_clients != old_info.num_clients {
            return false;
        }

        if self.has_player_info && old_info.has_player_info {
            let mut this_handle = self.player_info_head;
            let mut that_handle = old_info.player_info_head;

            loop {
                match (this_handle, that_handle) {
                    (None, None) => break,
                    (Some(_), None) | (None, Some(_)) => return false,
                    (Some(this), Some(that)) => {
                        let this_info = players.get(this);
                        let that_info = players.get(that);
                        if !this_info.same_as(that_info) {
                            return false;
                        }
                        this_handle = this_info.next_in_list;
                        that_handle = that_info.next_in_list;
                    }
                }
            }
        } else if self.has_player_info != old_info.has_player_info {
            return false;
        }

        if self.score != old_info.score {
            return false;
        }

        if self.mapname != old_info.mapname {
            return false;
        }

        if self.gametype != old_info.gametype {
            return false;
        }

        if self.num_bots != old_info.num_bots {
            return false;
        }

        // These never change until a server restart

        if self.server_name != old_info.server_name {
            return false;
        }

        if self.modname != old_info.modname {
            return false;
        }

        self.max_clients == old_info.max_clients && self.need_password == old_info.need_password
    }
}

// ============================================================
// Lexical helpers shared with the player-line parser
// ============================================================

/// strtol-style integer scan: leading whitespace, optional sign, digits.
/// Trailing bytes are left to the caller. Returns the value and the index
/// of the first unconsumed byte.
pub(crate) fn scan_int(bytes: &[u8], mut pos: usize) -> Option<(i64, usize)> {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }

    let mut negative = false;
    if pos < bytes.len() && (bytes[pos] == b'-' || bytes[pos] == b'+') {
        negative = bytes[pos] == b'-';
        pos += 1;
    }

    let digits_start = pos;
    let mut value: i64 = 0;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        value = value.saturating_mul(10).saturating_add((bytes[pos] - b'0') as i64);
        pos += 1;
    }

    if pos == digits_start {
        return None;
    }

    Some((if negative { -value } else { value }, pos))
}

fn scan_u64(bytes: &[u8]) -> Option<u64> {
    let mut pos = 0;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }

    let digits_start = pos;
    let mut value: u64 = 0;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        value = value.saturating_mul(10).saturating_add((bytes[pos] - b'0') as u64);
        pos += 1;
    }

    if pos == digits_start {
        return None;
    }
    Some(value)
}

fn scan_minutes_and_seconds(bytes: &[u8], pos: usize) -> Option<(i32, i8, usize)> {
    let (minutes, pos) = scan_int(bytes, pos)?;
    if pos >= bytes.len() || bytes[pos] != b':' {
        return None;
    }
    let (seconds, pos) = scan_int(bytes, pos + 1)?;

    if minutes < 0 {
        return None;
    }
    if !(0..=60).contains(&seconds) {
        return None;
    }
    Some((minutes as i32, seconds as i8, pos))
}

// ============================================================
// Key/value handlers
// ============================================================

struct KvContext<'a> {
    console: &'a ConsoleRef,
    info: &'a mut ServerInfo,
    last_acknowledged_challenge: u64,
    parsed_challenge: u64,
}

type KeyHandler = fn(&mut KvContext<'_>, &[u8]) -> bool;

fn handle_bounded_string(context: &KvContext<'_>, value: &[u8], capacity: usize) -> Option<String> {
    if value.len() > u8::MAX as usize || value.len() >= capacity {
        context.console.vprintf(format_args!(
            "Warning: ServerInfoParser: the value `{}` exceeds a result capacity {}\n",
            String::from_utf8_lossy(value),
            capacity
        ));
        return None;
    }
    Some(String::from_utf8_lossy(value).into_owned())
}

fn handle_challenge(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    let Some(challenge) = scan_u64(value) else {
        return false;
    };
    context.parsed_challenge = challenge;
    challenge > context.last_acknowledged_challenge
}

fn handle_hostname(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match handle_bounded_string(context, value, MAX_SERVER_NAME_CHARS + 1) {
        Some(name) => {
            context.info.server_name = name;
            true
        }
        None => false,
    }
}

fn handle_mapname(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match handle_bounded_string(context, value, MAX_SHORT_INFO_CHARS + 1) {
        Some(mapname) => {
            context.info.mapname = mapname;
            true
        }
        None => false,
    }
}

fn handle_game_fs(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match handle_bounded_string(context, value, MAX_SHORT_INFO_CHARS + 1) {
        Some(modname) => {
            context.info.modname = modname;
            true
        }
        None => false,
    }
}

fn handle_gametype(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match handle_bounded_string(context, value, MAX_SHORT_INFO_CHARS + 1) {
        Some(gametype) => {
            context.info.gametype = gametype;
            true
        }
        None => false,
    }
}

fn handle_max_clients(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match scan_int(value, 0) {
        Some((parsed, _)) => {
            context.info.max_clients = parsed as u8;
            true
        }
        None => false,
    }
}

fn handle_num_clients(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match scan_int(value, 0) {
        Some((parsed, _)) => {
            context.info.num_clients = parsed as u8;
            true
        }
        None => false,
    }
}

fn handle_num_bots(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match scan_int(value, 0) {
        Some((parsed, _)) => {
            context.info.num_bots = parsed as u8;
            true
        }
        None => false,
    }
}

fn handle_need_pass(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    match scan_int(value, 0) {
        Some((parsed, _)) => {
            context.info.need_password = parsed != 0;
            true
        }
        None => false,
    }
}

fn handle_match_time(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    let time = &mut context.info.time;

    match value {
        b"Warmup" => {
            time.is_warmup = true;
            return true;
        }
        b"Finished" => {
            time.is_finished = true;
            return true;
        }
        b"Countdown" => {
            time.is_countdown = true;
            return true;
        }
        _ => {}
    }

    let Some((minutes, seconds, mut pos)) = scan_minutes_and_seconds(value, 0) else {
        return false;
    };
    time.time_minutes = minutes;
    time.time_seconds = seconds;

    if pos == value.len() {
        return true;
    }

    if value[pos] != b' ' {
        return false;
    }
    pos += 1;

    if pos < value.len() && value[pos] == b'/' {
        pos += 1;
        if pos >= value.len() || value[pos] != b' ' {
            return false;
        }
        pos += 1;

        let Some((limit_minutes, limit_seconds, after_limit)) = scan_minutes_and_seconds(value, pos) else {
            return false;
        };
        time.limit_minutes = limit_minutes;
        time.limit_seconds = limit_seconds;
        pos = after_limit;

        if pos == value.len() {
            return true;
        }
        if value[pos] == b' ' {
            pos += 1;
        }
    }

    // A free-order suffix of status flags
    loop {
        if pos >= value.len() {
            return true;
        }

        let rest = &value[pos..];
        if rest.starts_with(b"overtime") {
            time.is_overtime = true;
            pos += "overtime".len();
        } else if rest.starts_with(b"suddendeath") {
            time.is_sudden_death = true;
            pos += "suddendeath".len();
        } else if rest.starts_with(b"(in timeout)") {
            time.is_timeout = true;
            pos += "(in timeout)".len();
        } else if rest[0] == b' ' {
            pos += 1;
        } else if rest[0] == b'/' {
            return true;
        } else {
            return false;
        }
    }
}

fn handle_match_score(context: &mut KvContext<'_>, value: &[u8]) -> bool {
    context.info.score.clear();

    if value.is_empty() {
        return true;
    }

    let mut scores = [0i32; 2];
    let mut names: [&[u8]; 2] = [b"", b""];
    let mut pos = 0usize;

    for i in 0..2 {
        while pos < value.len() && value[pos] == b' ' {
            pos += 1;
        }
        let name_start = pos;

        while pos < value.len() && value[pos] != b':' {
            pos += 1;
        }
        if pos >= value.len() {
            return false;
        }

        let name_length = pos - name_start;
        if name_length >= MAX_SHORT_INFO_CHARS {
            return false;
        }
        names[i] = &value[name_start..pos];
        pos += 1;

        if pos >= value.len() || value[pos] != b' ' {
            return false;
        }
        pos += 1;

        let Some((score, after_score)) = scan_int(value, pos) else {
            return false;
        };
        scores[i] = score as i32;
        pos = after_score;
    }

    for i in 0..2 {
        let team_score = &mut context.info.score.scores[i];
        team_score.score = scores[i];
        team_score.name = String::from_utf8_lossy(names[i]).into_owned();
    }

    true
}

// ============================================================
// Parser
// ============================================================

struct HandlerEntry {
    key: &'static str,
    key_hash: u32,
    key_length: usize,
    handler: KeyHandler,
    next_in_hash_bin: Option<u8>,
}

const HASH_MAP_SIZE: usize = 17;
const MAX_HANDLERS: usize = 16;

pub struct ServerInfoParser {
    console: ConsoleRef,
    handlers: Vec<HandlerEntry>,
    hash_map: [Option<u8>; HASH_MAP_SIZE],
}

impl ServerInfoParser {
    pub fn new(console: ConsoleRef) -> Self {
        let mut parser = Self {
            console,
            handlers: Vec::with_capacity(MAX_HANDLERS),
            hash_map: [None; HASH_MAP_SIZE],
        };

        parser.add_handler("challenge", handle_challenge);
        parser.add_handler("sv_hostname", handle_hostname);
        parser.add_handler("sv_maxclients", handle_max_clients);
        parser.add_handler("mapname", handle_mapname);
        parser.add_handler("g_match_time", handle_match_time);
        parser.add_handler("g_match_score", handle_match_score);
        parser.add_handler("fs_game", handle_game_fs);
        parser.add_handler("gametype", handle_gametype);
        parser.add_handler("bots", handle_num_bots);
        parser.add_handler("clients", handle_num_clients);
        parser.add_handler("g_needpass", handle_need_pass);

        parser
    }

    fn add_handler(&mut self, key: &'static str, handler: KeyHandler) {
        if self.handlers.len() >= MAX_HANDLERS {
            self.console.printf("ServerInfoParser::add_handler(): too many handlers\n");
            panic!("ServerInfoParser::add_handler(): too many handlers");
        }

        let (key_hash, key_length) = wswc_common::cmd::string_hash_and_length(key);
        let hash_bin_index = (key_hash % HASH_MAP_SIZE as u32) as usize;

        let entry_index = self.handlers.len() as u8;
        self.handlers.push(HandlerEntry {
            key,
            key_hash,
            key_length,
            handler,
            next_in_hash_bin: self.hash_map[hash_bin_index],
        });
        self.hash_map[hash_bin_index] = Some(entry_index);
    }

    fn find_handler(&self, key: &[u8], key_hash: u32) -> Option<KeyHandler> {
        let mut entry_index = self.hash_map[(key_hash % HASH_MAP_SIZE as u32) as usize];

        while let Some(index) = entry_index {
            let entry = &self.handlers[index as usize];
            if entry.key_hash == key_hash && entry.key_length == key.len() && entry.key.as_bytes() == key {
                return Some(entry.handler);
            }
            entry_index = entry.next_in_hash_bin;
        }
        None
    }

    /// Parses a `\key\value\...` body out of `message` into `info`.
    /// On success returns the parsed challenge (guaranteed greater than
    /// `last_acknowledged_challenge`) and leaves the read cursor after the
    /// terminating newline, or at the end of data.
    pub fn parse(
        &self,
        message: &mut Message,
        info: &mut ServerInfo,
        last_acknowledged_challenge: u64,
    ) -> Option<u64> {
        let mut context = KvContext {
            console: &self.console,
            info,
            last_acknowledged_challenge,
            parsed_challenge: 0,
        };

        let start = message.read_count();
        let consumed;

        {
            let chars = message.remaining().to_vec();
            let bytes_left = chars.len();
            let mut i = 0usize;

            loop {
                if i >= bytes_left {
                    if context.parsed_challenge == 0 {
                        self.console.printf("Warning: ServerInfoParser::parse(): missing a challenge\n");
                        return None;
                    }
                    consumed = bytes_left;
                    break;
                }

                // Expect a new '\'
                if chars[i] != b'\\' {
                    return None;
                }
                i += 1;

                // Expect a key
                let mut key_hash = 0u32;
                let key_start = i;
                while i < bytes_left && chars[i] != b'\\' {
                    add_char_to_hash(&mut key_hash, chars[i]);
                    i += 1;
                }

                if i >= bytes_left {
                    return None;
                }
                let key_end = i;
                i += 1;

                // Expect a value
                let value_start = i;
                while i < bytes_left && chars[i] != b'\\' && chars[i] != b'\n' {
                    i += 1;
                }
                let value_end = i;

                let key = &chars[key_start..key_end];
                let value = &chars[value_start..value_end];

                if let Some(handler) = self.find_handler(key, key_hash) {
                    if !handler(&mut context, value) {
                        return None;
                    }
                }
                // An unknown key is accepted silently

                if i < bytes_left && chars[i] == b'\n' {
                    if context.parsed_challenge == 0 {
                        self.console.printf("Warning: ServerInfoParser::parse(): missing a challenge\n");
                        return None;
                    }
                    consumed = i + 1;
                    break;
                }
            }
        }

        message.set_read_count(start + consumed);
        Some(context.parsed_challenge)
    }
}
