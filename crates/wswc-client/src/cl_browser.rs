// cl_browser.rs -- master-server polling and game-server list
//
// Discovery pipeline: every 750 ms one master server (round-robin) is asked
// for addresses; every known game server is polled for info or status every
// 300 ms with a millisecond-clock challenge; responses are parsed, compared
// against the previous snapshot and reported to the listener as added /
// updated; servers that stop answering for 5 seconds are evicted.
//
// Records live in index-handle pools (see pool.rs); the servers list and the
// 97-bucket address table are handle-linked through the records themselves.

use wswc_common::console::ConsoleRef;
use wswc_common::msg::Message;
use wswc_common::net::{NetworkAddress, Socket};
use wswc_common::qcommon::MAX_MSGLEN;

use crate::pool::{Handle, Pool};
use crate::server_info::{scan_int, PlayerInfo, ServerInfo, ServerInfoParser, MAX_PLAYER_NAME_CHARS};

const HASH_MAP_SIZE: usize = 97;

const MAX_POLLED_SERVERS: usize = 256;
const MAX_SERVER_INFOS: usize = 768;
const MAX_PLAYER_INFOS: usize = 2048;

/// How often one master server gets polled, milliseconds.
const MASTER_POLL_INTERVAL: i64 = 750;
/// How often each game server gets polled, milliseconds.
const GAME_SERVER_POLL_INTERVAL: i64 = 300;

pub struct PolledGameServer {
    network_address: NetworkAddress,
    address_hash: u32,
    hash_bin_index: usize,

    curr_info: Option<Handle<ServerInfo>>,
    old_info: Option<Handle<ServerInfo>>,

    last_info_request_sent_at: i64,
    last_info_received_at: i64,

    last_acknowledged_challenge: u64,

    instance_id: u32,

    prev_in_list: Option<Handle<PolledGameServer>>,
    next_in_list: Option<Handle<PolledGameServer>>,
    prev_in_bin: Option<Handle<PolledGameServer>>,
    next_in_bin: Option<Handle<PolledGameServer>>,
}

impl PolledGameServer {
    fn new(network_address: NetworkAddress) -> Self {
        Self {
            network_address,
            address_hash: 0,
            hash_bin_index: 0,
            curr_info: None,
            old_info: None,
            last_info_request_sent_at: 0,
            last_info_received_at: 0,
            last_acknowledged_challenge: 0,
            instance_id: 0,
            prev_in_list: None,
            next_in_list: None,
            prev_in_bin: None,
            next_in_bin: None,
        }
    }

    pub fn address(&self) -> &NetworkAddress {
        &self.network_address
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }
}

/// A borrowed view of one server record handed to listener callbacks.
/// The core owns the storage; the view is valid for the callback only.
pub struct ServerView<'a> {
    server: &'a PolledGameServer,
    info: &'a ServerInfo,
    players: &'a Pool<PlayerInfo>,
}

impl<'a> ServerView<'a> {
    pub fn address(&self) -> &NetworkAddress {
        self.server.address()
    }

    pub fn instance_id(&self) -> u32 {
        self.server.instance_id()
    }

    pub fn info(&self) -> &'a ServerInfo {
        self.info
    }

    pub fn players(&self) -> PlayerInfoIter<'a> {
        PlayerInfoIter {
            players: self.players,
            curr: self.info.player_info_head,
        }
    }
}

pub struct PlayerInfoIter<'a> {
    players: &'a Pool<PlayerInfo>,
    curr: Option<Handle<PlayerInfo>>,
}

impl<'a> Iterator for PlayerInfoIter<'a> {
    type Item = &'a PlayerInfo;

    fn next(&mut self) -> Option<&'a PlayerInfo> {
        let handle = self.curr?;
        let player = self.players.get(handle);
        self.curr = player.next_in_list;
        Some(player)
    }
}

pub trait ServerListListener: Send {
    fn on_server_added(&mut self, server: &ServerView<'_>);
    fn on_server_removed(&mut self, server: &ServerView<'_>);
    fn on_server_updated(&mut self, server: &ServerView<'_>);
}

enum Notification {
    Added,
    Removed,
    Updated,
}

pub struct ServerList {
    console: ConsoleRef,
    message: Message,

    ipv4_socket: Socket,
    ipv6_socket: Socket,
    recv_buffer: Vec<u8>,

    listener: Box<dyn ServerListListener>,

    servers_head: Option<Handle<PolledGameServer>>,
    servers_hash_bins: [Option<Handle<PolledGameServer>>; HASH_MAP_SIZE],

    server_pool: Pool<PolledGameServer>,
    info_pool: Pool<ServerInfo>,
    player_pool: Pool<PlayerInfo>,

    info_parser: ServerInfoParser,

    last_master_servers_poll_at: i64,
    last_master_server_index: usize,

    server_instance_id_counter: u32,
    protocol: i32,

    show_empty_servers: bool,
    show_player_info: bool,
}

impl ServerList {
    pub fn new(console: ConsoleRef, listener: Box<dyn ServerListListener>, protocol: i32) -> Option<Self> {
        let ipv4_socket = Socket::new(true, &console)?;
        let ipv6_socket = Socket::new(false, &console)?;

        Some(Self {
            message: Message::new(),
            ipv4_socket,
            ipv6_socket,
            recv_buffer: vec![0u8; MAX_MSGLEN],
            listener,
            servers_head: None,
            servers_hash_bins: [None; HASH_MAP_SIZE],
            server_pool: Pool::new(MAX_POLLED_SERVERS),
            info_pool: Pool::new(MAX_SERVER_INFOS),
            player_pool: Pool::new(MAX_PLAYER_INFOS),
            info_parser: ServerInfoParser::new(console.clone()),
            console,
            last_master_servers_poll_at: 0,
            last_master_server_index: 0,
            server_instance_id_counter: 0,
            protocol,
            show_empty_servers: false,
            show_player_info: false,
        })
    }

    pub fn set_options(&mut self, show_empty_servers: bool, show_player_info: bool) {
        self.show_empty_servers = show_empty_servers;
        self.show_player_info = show_player_info;
    }

    // ========================================================
    // Frame driving
    // ========================================================

    pub fn frame(&mut self, now: i64, master_servers: &[NetworkAddress]) {
        self.drop_timed_out_servers(now);
        self.emit_poll_master_servers_packets(now, master_servers);
        self.emit_poll_game_servers_packets(now);
    }

    /// Drains both sockets. Returns the number of datagrams processed.
    pub fn frame_io(&mut self, now: i64) -> usize {
        let mut count = 0;

        for socket_index in 0..2 {
            loop {
                let received = {
                    let socket = if socket_index == 0 { &self.ipv4_socket } else { &self.ipv6_socket };
                    match socket.recv_datagram(&mut self.recv_buffer) {
                        Ok(received) => received,
                        Err(error) => {
                            self.console.vprintf(format_args!("ServerList::frame_io(): recv failed: {}\n", error));
                            break;
                        }
                    }
                };

                let Some((size, from)) = received else { break };
                let data = self.recv_buffer[..size].to_vec();
                self.parse_ingoing_data(&from, &data, now);
                count += 1;
            }
        }
        count
    }

    // ========================================================
    // Ingress parsing
    // ========================================================

    pub(crate) fn parse_ingoing_data(&mut self, from: &NetworkAddress, data: &[u8], now: i64) {
        const FUNCTION: &str = "ServerList::parse_ingoing_data()";

        if data.len() < 5 {
            self.console.vprintf(format_args!("{}: Warning: too few ingoing bytes\n", FUNCTION));
            return;
        }

        self.message.load(data);

        let prefix = self.message.read_long();
        if prefix != -1 {
            self.console.vprintf(format_args!("{}: Warning: bad ingoing data prefix: {}\n", FUNCTION, prefix));
            return;
        }

        let byte = self.message.read_byte();
        match byte as u8 {
            b'g' | b'G' => self.parse_get_servers_ext_response(),
            b'i' | b'I' => self.parse_info_response(from, now),
            b's' | b'S' => self.parse_get_status_response(from, now),
            _ => {
                self.console.vprintf(format_args!("Unknown response prefix: {}\n", byte));
            }
        }
    }

    fn parse_get_servers_ext_response(&mut self) {
        const FUNCTION: &str = "ServerList::parse_get_servers_ext_response()";

        let prefix_len = "getserversExtResponse".len() - 1;
        if self.message.bytes_left() <= prefix_len {
            self.console.vprintf(format_args!("{}: Too few bytes in message for the expected prefix\n", FUNCTION));
            return;
        }
        self.message.skip(prefix_len);

        loop {
            if self.message.bytes_left() == 0 {
                self.console.vprintf(format_args!("{}: No bytes left in message\n", FUNCTION));
                return;
            }
            let start_prefix = self.message.read_byte() as u8;

            if start_prefix == b'\\' {
                if self.message.bytes_left() < 6 {
                    self.console.vprintf(format_args!(
                        "{}: Warning: Too few bytes in message for an IPv4 address\n",
                        FUNCTION
                    ));
                    return;
                }
                let remaining = self.message.remaining();
                let mut address_bytes = [0u8; 4];
                address_bytes.copy_from_slice(&remaining[0..4]);
                let port_bytes = [remaining[4], remaining[5]];

                // A zero port terminates the stream
                if port_bytes[0] | port_bytes[1] == 0 {
                    return;
                }
                self.on_server_address_received(NetworkAddress::from_ipv4_data(&address_bytes, &port_bytes));
                self.message.skip(6);
            } else if start_prefix == b'/' {
                if self.message.bytes_left() < 18 {
                    self.console.vprintf(format_args!(
                        "{}: Warning: Too few bytes in message for an IPv6 address\n",
                        FUNCTION
                    ));
                    return;
                }
                let remaining = self.message.remaining();
                let mut address_bytes = [0u8; 16];
                address_bytes.copy_from_slice(&remaining[0..16]);
                let port_bytes = [remaining[16], remaining[17]];

                if port_bytes[0] | port_bytes[1] == 0 {
                    return;
                }
                self.on_server_address_received(NetworkAddress::from_ipv6_data(&address_bytes, &port_bytes));
                self.message.skip(18);
            } else {
                self.console.vprintf(format_args!(
                    "{}: Warning: Illegal address prefix `{}`\n",
                    FUNCTION, start_prefix as char
                ));
                return;
            }
        }
    }

    fn on_server_address_received(&mut self, address: NetworkAddress) {
        let address_hash = address.hash();
        let hash_bin_index = (address_hash % HASH_MAP_SIZE as u32) as usize;

        // Duplicates are ignored
        let mut handle = self.servers_hash_bins[hash_bin_index];
        while let Some(server_handle) = handle {
            let server = self.server_pool.get(server_handle);
            if server.address_hash == address_hash && server.network_address == address {
                return;
            }
            handle = server.next_in_bin;
        }

        let Some(server_handle) = self.server_pool.alloc(PolledGameServer::new(address)) else {
            return;
        };

        self.server_instance_id_counter += 1;
        self.server_pool.get_mut(server_handle).instance_id = self.server_instance_id_counter;

        self.link_server_to_list(server_handle);
        self.link_server_to_hash_bin(server_handle, address_hash, hash_bin_index);
    }

    fn find_server_by_address(&self, address: &NetworkAddress) -> Option<Handle<PolledGameServer>> {
        let address_hash = address.hash();
        let hash_bin_index = (address_hash % HASH_MAP_SIZE as u32) as usize;

        let mut handle = self.servers_hash_bins[hash_bin_index];
        while let Some(server_handle) = handle {
            let server = self.server_pool.get(server_handle);
            if server.address_hash == address_hash && server.network_address == *address {
                return Some(server_handle);
            }
            handle = server.next_in_bin;
        }
        None
    }

    fn expect_prefix(&mut self, prefix_length: usize, caller: &str) -> bool {
        if self.message.bytes_left() <= prefix_length {
            self.console.vprintf(format_args!("{}: Too few bytes in message for the expected prefix\n", caller));
            return false;
        }

        self.message.skip(prefix_length);

        if self.message.read_byte() != b'\n' as i32 {
            self.console.vprintf(format_args!("{}: Expected a '\\n' terminator of the prefix\n", caller));
            return false;
        }
        true
    }

    fn parse_info_response(&mut self, from: &NetworkAddress, now: i64) {
        const FUNCTION: &str = "ServerList::parse_info_response()";

        // Silence is fine here: a server may time out and answer afterwards
        let Some(server_handle) = self.find_server_by_address(from) else {
            return;
        };

        if !self.expect_prefix("nfoResponse".len(), FUNCTION) {
            return;
        }

        let Some(info_handle) = self.parse_server_info(server_handle) else {
            return;
        };

        if self.message.bytes_left() > 0 {
            self.console.vprintf(format_args!("Warning: {}: there are extra bytes in the message\n", FUNCTION));
            self.free_server_info(info_handle);
            return;
        }

        self.info_pool.get_mut(info_handle).has_player_info = false;
        self.on_new_server_info(server_handle, info_handle, now);
    }

    fn parse_get_status_response(&mut self, from: &NetworkAddress, now: i64) {
        const FUNCTION: &str = "ServerList::parse_get_status_response()";

        let Some(server_handle) = self.find_server_by_address(from) else {
            return;
        };

        if !self.expect_prefix("tatusResponse".len(), FUNCTION) {
            return;
        }

        let Some(info_handle) = self.parse_server_info(server_handle) else {
            return;
        };

        // An empty player section with a non-zero client count is a
        // malformed response
        if self.info_pool.get(info_handle).num_clients > 0 {
            match self.parse_player_info() {
                Some(players_head) => {
                    self.info_pool.get_mut(info_handle).player_info_head = Some(players_head);
                }
                None => {
                    self.free_server_info(info_handle);
                    return;
                }
            }
        }

        self.info_pool.get_mut(info_handle).has_player_info = true;
        self.on_new_server_info(server_handle, info_handle, now);
    }

    fn parse_server_info(&mut self, server_handle: Handle<PolledGameServer>) -> Option<Handle<ServerInfo>> {
        let info_handle = self.info_pool.alloc(ServerInfo::new())?;
        let last_acknowledged_challenge = self.server_pool.get(server_handle).last_acknowledged_challenge;

        let parsed_challenge = {
            let Self { message, info_parser, info_pool, .. } = self;
            info_parser.parse(message, info_pool.get_mut(info_handle), last_acknowledged_challenge)
        };

        match parsed_challenge {
            Some(challenge) => {
                self.server_pool.get_mut(server_handle).last_acknowledged_challenge = challenge;
                Some(info_handle)
            }
            None => {
                self.info_pool.free(info_handle);
                None
            }
        }
    }

    /// Parses zero or more `SCORE PING "NAME" TEAM\n` lines into a pooled
    /// list. Any malformed line frees everything parsed so far.
    fn parse_player_info(&mut self) -> Option<Handle<PlayerInfo>> {
        let chars = self.message.remaining().to_vec();

        let mut allocated: Vec<Handle<PlayerInfo>> = Vec::new();
        let mut head: Option<Handle<PlayerInfo>> = None;
        let mut tail: Option<Handle<PlayerInfo>> = None;

        let failed = 'parse: {
            let mut s = 0usize;

            // Skip a leading '\n' if any
            if s < chars.len() && chars[s] == b'\n' {
                s += 1;
            }

            loop {
                if s >= chars.len() || chars[s] == b'\n' {
                    break 'parse false;
                }

                let Some((score, after_score)) = scan_int(&chars, s) else {
                    break 'parse true;
                };
                s = after_score + 1;
                if s >= chars.len() {
                    break 'parse true;
                }

                let Some((ping, after_ping)) = scan_int(&chars, s) else {
                    break 'parse true;
                };
                s = after_ping + 1;
                if s >= chars.len() {
                    break 'parse true;
                }

                if chars[s] != b'"' {
                    break 'parse true;
                }
                s += 1;

                let name_start = s;
                loop {
                    if s >= chars.len() {
                        break 'parse true;
                    }
                    if chars[s] == b'"' {
                        break;
                    }
                    s += 1;
                }
                let name_length = s - name_start;
                if name_length > MAX_PLAYER_NAME_CHARS {
                    break 'parse true;
                }
                s += 1;
                if s >= chars.len() {
                    break 'parse true;
                }

                let Some((team, after_team)) = scan_int(&chars, s) else {
                    break 'parse true;
                };
                s = after_team;
                if s >= chars.len() || chars[s] != b'\n' {
                    break 'parse true;
                }

                let player = PlayerInfo {
                    score: score as i32,
                    name: String::from_utf8_lossy(&chars[name_start..name_start + name_length]).into_owned(),
                    ping: ping as u16,
                    team: team as u8,
                    prev_in_list: None,
                    next_in_list: None,
                };

                let Some(player_handle) = self.player_pool.alloc(player) else {
                    break 'parse true;
                };
                allocated.push(player_handle);

                match tail {
                    Some(tail_handle) => {
                        self.player_pool.get_mut(tail_handle).next_in_list = Some(player_handle);
                        self.player_pool.get_mut(player_handle).prev_in_list = Some(tail_handle);
                    }
                    None => head = Some(player_handle),
                }
                tail = Some(player_handle);

                s += 1;
            }
        };

        if failed {
            for player_handle in allocated {
                self.player_pool.free(player_handle);
            }
            return None;
        }

        head
    }

    // ========================================================
    // Change detection
    // ========================================================

    fn on_new_server_info(
        &mut self,
        server_handle: Handle<PolledGameServer>,
        new_info_handle: Handle<ServerInfo>,
        now: i64,
    ) {
        let (previous_old, previous_curr) = {
            let server = self.server_pool.get_mut(server_handle);
            let previous_old = server.old_info.take();
            let previous_curr = server.curr_info;
            server.old_info = previous_curr;
            server.curr_info = Some(new_info_handle);
            server.last_info_received_at = now;
            (previous_old, previous_curr)
        };

        if let Some(stale_handle) = previous_old {
            self.free_server_info(stale_handle);
        }

        let changed = match previous_curr {
            Some(old_handle) => {
                let new_info = self.info_pool.get(new_info_handle);
                let old_info = self.info_pool.get(old_handle);
                !new_info.matches_old(old_info, &self.player_pool)
            }
            // The listener learns about a server only once its first info
            // arrives; until then there is nothing to show
            None => true,
        };

        if changed {
            if previous_curr.is_some() {
                self.notify(server_handle, Notification::Updated);
            } else {
                self.notify(server_handle, Notification::Added);
            }
        }
    }

    fn notify(&mut self, server_handle: Handle<PolledGameServer>, notification: Notification) {
        let Self { listener, server_pool, info_pool, player_pool, .. } = self;

        let server = server_pool.get(server_handle);
        let info = info_pool.get(server.curr_info.expect("notifying about a server with no info"));
        let view = ServerView { server, info, players: player_pool };

        match notification {
            Notification::Added => listener.on_server_added(&view),
            Notification::Removed => listener.on_server_removed(&view),
            Notification::Updated => listener.on_server_updated(&view),
        }
    }

    // ========================================================
    // Polling and eviction
    // ========================================================

    fn emit_poll_master_servers_packets(&mut self, now: i64, master_servers: &[NetworkAddress]) {
        if now - self.last_master_servers_poll_at < MASTER_POLL_INTERVAL {
            return;
        }

        // The no-masters warning obeys the timer too, to keep the console
        // readable
        if !master_servers.is_empty() {
            self.last_master_server_index = (self.last_master_server_index + 1) % master_servers.len();
            let address = master_servers[self.last_master_server_index];
            let request = format!(
                "getserversExt Warsow {} full{}",
                self.protocol,
                if self.show_empty_servers { " empty" } else { "" }
            );
            if !self.send_packet(&address, &request) {
                self.console.printf("Warning: ServerList::emit_poll_master_servers_packets() failure\n");
            }
        } else {
            self.console.printf("Warning: ServerList::emit_poll_master_servers_packets(): there are no master servers\n");
        }

        self.last_master_servers_poll_at = now;
    }

    fn emit_poll_game_servers_packets(&mut self, now: i64) {
        let mut due = Vec::new();

        let mut handle = self.servers_head;
        while let Some(server_handle) = handle {
            let server = self.server_pool.get(server_handle);
            handle = server.next_in_list;

            if now - server.last_info_request_sent_at >= GAME_SERVER_POLL_INTERVAL {
                due.push((server_handle, server.network_address));
            }
        }

        for (server_handle, address) in due {
            let challenge = now as u64;
            let request = if self.show_player_info {
                format!("getstatus {}", challenge)
            } else {
                format!("getinfo {}", challenge)
            };

            if !self.send_packet(&address, &request) {
                self.console.printf("Warning: ServerList::emit_poll_game_servers_packets() failure\n");
            }
            self.server_pool.get_mut(server_handle).last_info_request_sent_at = now;
        }
    }

    fn drop_timed_out_servers(&mut self, now: i64) {
        let mut timed_out = Vec::new();

        let mut handle = self.servers_head;
        while let Some(server_handle) = handle {
            let server = self.server_pool.get(server_handle);
            handle = server.next_in_list;

            // Evict only while a recent request is outstanding, and only
            // once a server that used to answer has gone quiet for 5 s
            if now - server.last_info_request_sent_at < 1000
                && server.last_info_received_at != 0
                && now - server.last_info_received_at > 5000
            {
                timed_out.push(server_handle);
            }
        }

        for server_handle in timed_out {
            self.drop_server(server_handle);
        }
    }

    fn drop_server(&mut self, server_handle: Handle<PolledGameServer>) {
        self.notify(server_handle, Notification::Removed);

        self.unlink_server_from_hash_bin(server_handle);
        self.unlink_server_from_list(server_handle);

        let (curr_info, old_info) = {
            let server = self.server_pool.get_mut(server_handle);
            (server.curr_info.take(), server.old_info.take())
        };
        if let Some(info_handle) = curr_info {
            self.free_server_info(info_handle);
        }
        if let Some(info_handle) = old_info {
            self.free_server_info(info_handle);
        }

        self.server_pool.free(server_handle);
    }

    /// Releases an info record together with its player chain.
    fn free_server_info(&mut self, info_handle: Handle<ServerInfo>) {
        let mut player_handle = self.info_pool.get(info_handle).player_info_head;
        while let Some(handle) = player_handle {
            player_handle = self.player_pool.get(handle).next_in_list;
            self.player_pool.free(handle);
        }
        self.info_pool.free(info_handle);
    }

    // ========================================================
    // Linked list maintenance
    // ========================================================

    fn link_server_to_list(&mut self, server_handle: Handle<PolledGameServer>) {
        let old_head = self.servers_head;

        if let Some(head_handle) = old_head {
            self.server_pool.get_mut(head_handle).prev_in_list = Some(server_handle);
        }
        let server = self.server_pool.get_mut(server_handle);
        server.prev_in_list = None;
        server.next_in_list = old_head;
        self.servers_head = Some(server_handle);
    }

    fn unlink_server_from_list(&mut self, server_handle: Handle<PolledGameServer>) {
        let (prev, next) = {
            let server = self.server_pool.get_mut(server_handle);
            (server.prev_in_list.take(), server.next_in_list.take())
        };

        if let Some(next_handle) = next {
            self.server_pool.get_mut(next_handle).prev_in_list = prev;
        }
        match prev {
            Some(prev_handle) => self.server_pool.get_mut(prev_handle).next_in_list = next,
            None => {
                debug_assert_eq!(self.servers_head, Some(server_handle));
                self.servers_head = next;
            }
        }
    }

    fn link_server_to_hash_bin(
        &mut self,
        server_handle: Handle<PolledGameServer>,
        address_hash: u32,
        hash_bin_index: usize,
    ) {
        let old_head = self.servers_hash_bins[hash_bin_index];

        if let Some(head_handle) = old_head {
            self.server_pool.get_mut(head_handle).prev_in_bin = Some(server_handle);
        }
        let server = self.server_pool.get_mut(server_handle);
        server.address_hash = address_hash;
        server.hash_bin_index = hash_bin_index;
        server.prev_in_bin = None;
        server.next_in_bin = old_head;
        self.servers_hash_bins[hash_bin_index] = Some(server_handle);
    }

    fn unlink_server_from_hash_bin(&mut self, server_handle: Handle<PolledGameServer>) {
        let (prev, next, hash_bin_index) = {
            let server = self.server_pool.get_mut(server_handle);
            (server.prev_in_bin.take(), server.next_in_bin.take(), server.hash_bin_index)
        };

        if let Some(next_handle) = next {
            self.server_pool.get_mut(next_handle).prev_in_bin = prev;
        }
        match prev {
            Some(prev_handle) => self.server_pool.get_mut(prev_handle).next_in_bin = next,
            None => {
                debug_assert_eq!(self.servers_hash_bins[hash_bin_index], Some(server_handle));
                self.servers_hash_bins[hash_bin_index] = next;
            }
        }
    }

    // ========================================================
    // Packet emission
    // ========================================================

    fn send_packet(&mut self, address: &NetworkAddress, body: &str) -> bool {
        self.message.clear();
        self.message.write_long(-1);
        self.message.write_string(body);

        let socket = if address.is_ipv4() { &self.ipv4_socket } else { &self.ipv6_socket };
        socket.send_datagram(address, self.message.data())
    }
}
