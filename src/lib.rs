//! DragonBus - Shared message contract for a game-server network
//!
//! The message catalog exchanged between game server nodes and the central
//! queue, party, friend and instance services, with the registry that decodes
//! it and the correlation layer that runs RPC over publish/subscribe.

pub mod bus;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod rpc;

pub use bus::{InMemoryBus, Transport};
pub use config::Config;
pub use protocol::{Envelope, Message, MessageKind, Request, Variant};
pub use registry::{Registry, RegistryBuilder};
pub use rpc::{Messenger, PendingRequest, RpcError};
