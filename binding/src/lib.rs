//! Client-side field binding for the collabxr sync protocol.
//!
//! A [`SyncContext`] mirrors one room: who owns which field, the remote
//! records waiting to be applied, the entity collections and the
//! broadcast-event handlers. [`BoundField`] and [`BoundObject`] wrap local
//! values and are polled once per frame with `sync`, which registers them,
//! applies values written by other sessions and sends local changes for the
//! fields this session owns.
//!
//! The context never touches a socket directly; it sends through a
//! [`Transport`]. [`Connection::connect`] provides one backed by a
//! tokio-tungstenite websocket.

pub mod binding;
pub mod context;
pub mod error;
pub mod net;
pub mod transport;

pub use binding::{BoundField, BoundObject, SyncValue};
pub use context::SyncContext;
pub use error::BindingError;
pub use net::Connection;
pub use transport::{ChannelTransport, Transport};
