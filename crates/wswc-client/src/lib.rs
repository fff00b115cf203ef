// wswc-client -- headless Warsow protocol-22 client and server browser.
//
// A host creates a System, obtains Client instances from it and feeds them
// textual commands ("connect <address>", "disconnect"); chat, centered
// messages and the message of the day come back through a ClientListener.
// Independently, the System can run the master-server browser and report
// discovered game servers through a ServerListListener.

pub mod cl_browser;
pub mod cl_main;
pub mod cl_parse;
pub mod client;
pub mod command_buffer;
pub mod handlers;
pub mod pool;
pub mod server_info;
pub mod system;

pub use cl_browser::{PlayerInfoIter, PolledGameServer, ServerListListener, ServerView};
pub use cl_main::ClientState;
pub use cl_parse::{BaselineReader, ClientWorldState};
pub use client::{Client, ClientListener};
pub use server_info::{MatchScore, MatchTime, PlayerInfo, ServerInfo, TeamScore};
pub use system::{Clock, System};
