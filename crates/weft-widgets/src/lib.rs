#![forbid(unsafe_code)]

//! Widget tree for the weft binding engine.
//!
//! Widgets are pure structure: a class, ordered children, an attribute
//! store, and focus/activity/selection state. No rendering or layout is
//! assumed; an embedder drives activity and reads attributes.

pub mod attr;
pub mod class;
pub mod tree;

pub use attr::AttrValue;
pub use class::{WidgetClass, class_by_name};
pub use tree::{Widget, WidgetFlags, WidgetId, WidgetTree};
