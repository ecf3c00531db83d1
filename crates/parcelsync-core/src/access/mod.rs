//! Access control: tokens, the server-side token registry and per-request checks

mod control;
mod store;
mod token;

pub use control::{AccessControl, AccessDenied, AccessVia, BranchAccess};
pub use store::{AccessStore, RegisteredToken};
pub use token::{AccessRight, AccessRights, AccessToken};
