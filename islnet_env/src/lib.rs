//! islnet Environment Abstraction Layer
//!
//! This crate provides the abstraction that lets the islnet engines drive
//! either a **real emulated substrate** (Open vSwitch + network namespaces)
//! or an **in-memory substrate** used for tests and dry runs.
//!
//! # Core Concept
//!
//! Everything the engines need from the outside world goes through two traits:
//! - [`SimulationContext`]: time (`now()`, `cpu_time()`, `sleep()`) and task spawning
//! - [`NetworkControl`]: link add/remove, interface up/down, host commands
//!
//! # Example
//!
//! ```ignore
//! use islnet_env::{NetworkControl, NodeId, SimulationContext};
//!
//! async fn tick<Ctx: SimulationContext, Net: NetworkControl>(ctx: &Ctx, net: &Net) {
//!     let link = net.add_link(NodeId(0), NodeId(1)).await?;
//!     for iface in link.interfaces() {
//!         net.activate_interface(iface).await?;
//!     }
//!     ctx.sleep(Duration::from_secs(60)).await;
//! }
//! ```

mod context;
mod control;
mod types;
mod error;
mod tokio_impl;
pub mod memory;
pub mod ovs;

pub use context::SimulationContext;
pub use control::{InterfaceHandle, LinkHandle, NetworkControl};
pub use types::{Edge, NodeId};
pub use error::ControlError;
pub use tokio_impl::TokioContext;
pub use memory::{ControlOp, MemoryNetwork};
pub use ovs::{OvsConfig, OvsControl};
