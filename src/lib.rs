//! agent-presence: rich presence daemon for AI coding sessions

pub mod client;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod liveness;
pub mod messages;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod session;

pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use resolver::{Activity, resolve};
pub use session::{ActivityUpdate, Session, SessionStatus, SmallImage, StartRequest, UpdatePriority};
