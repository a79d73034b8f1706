//! Minimal IRC client transport: message model, line codec and a
//! reconnectable connection.

mod codec;
mod connection;
mod message;

pub use codec::{CodecError, IrcCodec, MAX_LINE_LENGTH};
pub use connection::{IrcConfig, IrcConnector, IrcEvent, IrcHandle};
pub use message::{Message, ParseError, is_channel};
