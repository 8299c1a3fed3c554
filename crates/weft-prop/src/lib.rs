#![forbid(unsafe_code)]

//! Hierarchical property graph with ordered change notification.
//!
//! The property graph is the single source of truth a view binds to. Nodes
//! hold a scalar state (void, int, float, string, link) or act as
//! directories with ordered children. Consumers subscribe to individual
//! nodes and receive [`PropEvent`]s describing every mutation, in the order
//! the mutations were applied.
//!
//! The graph itself is single-threaded; mutations from other threads enter
//! through the [`Courier`], which marshals path-addressed operations onto
//! the owning thread. See the `courier` module docs for the delivery
//! contract.

pub mod courier;
pub mod event;
pub mod node;
pub mod value;

pub use courier::{Courier, CourierSender, Notification};
pub use event::{AddFlags, PropEvent};
pub use node::{GraphSubId, Prop, PropId, SubHandle, WeakProp};
pub use value::{PropValue, StrKind};
