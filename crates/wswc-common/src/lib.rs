// wswc-common -- plumbing shared by the fake client and the server browser.
//
// Nothing in this crate knows about the protocol-22 state machine; it only
// provides the message buffer, the command tokenizer, network addresses,
// UDP sockets and the datagram channel the client crate builds upon.

pub mod cmd;
pub mod compression;
pub mod console;
pub mod msg;
pub mod net;
pub mod net_chan;
pub mod qcommon;
