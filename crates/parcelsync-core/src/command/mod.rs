//! Commands pushed to a user through the server inbox

mod codec;
mod manager;

pub use codec::{CommandDecoder, IncomingCommand, OutgoingCommand};
pub use manager::{CommandListener, IncomingCommandManager, ListenerId};
