//! The application layer: control messages, end-user client links,
//! server-to-server relay links, and the hub that routes between them.

pub mod c2s;
pub mod client;
pub mod ctrl;
pub mod server;

pub use c2s::{C2sCredentials, MsgC2s, MsgC2sObserver};
pub use client::{Credentials, MsgClient, MsgClientObserver};
pub use ctrl::CtrlMessage;
pub use server::{HubListener, MsgServer};
