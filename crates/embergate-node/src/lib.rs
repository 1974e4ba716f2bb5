//! Node lifecycle management.
//!
//! [`NodeManager`] owns the light-client service handle and the RPC client
//! built for it, and is the single serialization point between lifecycle
//! transitions and in-flight calls. Every other component reaches the node
//! through its accessors and must tolerate "no node" at any call site.
//!
//! # Modules
//!
//! - [`service`] — the light-client seam (`NodeService`) and the bundled
//!   in-process [`service::DevNode`].
//! - [`manager`] — the lifecycle state machine.

pub mod manager;
pub mod service;

pub use manager::{NodeManager, StartedWaiter, StoppedWaiter};
pub use service::{DevNode, NodeService};
