// qcommon.rs -- definitions shared between the client and the server browser

// ============================================================
// Limits
// ============================================================

/// Max fake client instances a single `System` drives.
pub const MAX_FAKE_CLIENT_INSTANCES: usize = 4;

/// Max clients on a game server.
pub const MAX_SERVER_CLIENTS: usize = 256;

/// Max master servers a `System` polls.
pub const MAX_MASTER_SERVERS: usize = 4;

pub const MAX_MSGLEN: usize = 65536;

pub const MAX_STRING_CHARS: usize = 2048;
pub const MAX_MSG_STRING_CHARS: usize = 2048;

pub const MAX_CONFIGSTRING_CHARS: usize = 512;
pub const MAX_CONFIGSTRINGS: usize = 4256;

// ============================================================
// Protocol
// ============================================================

/// The only wire protocol this library speaks.
pub const PROTOCOL21: i32 = 22;

/// Port assumed when an address string carries none.
pub const DEFAULT_PORT: u16 = 44400;

/// Reliable command resend period, milliseconds.
pub const TIMEOUT: i64 = 1800;

/// Keepalive period for an otherwise idle active connection, milliseconds.
pub const INACTIVE_TIME: i64 = 30000;

/// Bit 31 of a sequence number marks a fragmented packet.
pub const FRAGMENT_BIT: u32 = 1 << 31;

/// Top bit of a fragment length marks the final fragment.
pub const FRAGMENT_LAST: u32 = 1 << 14;

// Client-to-server command opcodes
pub const CLC_BAD: u8 = 0;
pub const CLC_NOP: u8 = 1;
pub const CLC_MOVE: u8 = 2;
pub const CLC_SVACK: u8 = 3;
pub const CLC_CLIENT_COMMAND: u8 = 4;

// `reject` drop types
pub const DROP_TYPE_GENERAL: i32 = 0;
pub const DROP_TYPE_PASSWORD: i32 = 1;
pub const DROP_TYPE_RECONNECT: i32 = 2;

/// Set in `reject` drop flags when the server wants the client back.
pub const DROP_FLAG_AUTORECONNECT: i32 = 1;
