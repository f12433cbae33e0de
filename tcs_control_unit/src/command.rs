//! CommandDispatcher: text commands in, numbered replies out.

pub mod channel;
pub mod dispatch;
pub mod parse;
pub mod transport;

pub use channel::ChannelId;
pub use dispatch::{Dispatcher, Pending, Reply, Role};
pub use parse::{AxisMask, Command, DomeCommand, ParseError, parse_command};
pub use transport::{ChannelTransport, FifoTransport, MemoryChannels, MemoryTransport, TransportError};
