//! Server side: portal, handlers, sessions and stores
//!
//! | Piece               | Role                                               |
//! |---------------------|----------------------------------------------------|
//! | [`Portal`]          | dispatches requests to handlers by method          |
//! | [`Session`]         | per-connection login state and claimed tokens      |
//! | [`AccountStore`]    | salted password hashes and KDF parameters          |
//! | [`InboxStore`]      | enveloped commands waiting for their receiver      |
//! | [`PortalConnector`] | in-process [`TransportFactory`](crate::remote::TransportFactory) |

mod accounts;
mod handlers;
mod portal;
mod session;
mod transport;

pub use accounts::{Account, AccountStore, InboxStore};
pub use portal::{parse_params, Portal, Reply, RequestHandler, ServerState};
pub use session::Session;
pub use transport::{InMemoryTransport, PortalConnector};
