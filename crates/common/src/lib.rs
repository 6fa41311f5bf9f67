//! Shared types for the vgit mount daemon and its clients.
//!
//! The daemon and any git-side tooling that talks to it agree on three things:
//! how working-tree paths are normalized, what a valid object id looks like,
//! and the line-oriented control protocol spoken over the mount socket.

pub mod client;
pub mod content_id;
pub mod exit_code;
pub mod paths;
pub mod protocol;

pub mod prelude {
    pub use crate::client::{ClientError, MountClient};
    pub use crate::content_id::{ContentId, ContentIdError};
    pub use crate::exit_code::ReturnCode;
    pub use crate::protocol::{LockData, Message, ProtocolError};
}
