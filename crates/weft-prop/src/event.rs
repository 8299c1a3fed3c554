#![forbid(unsafe_code)]

//! Change notifications delivered to subscribers.

use crate::node::Prop;
use crate::value::StrKind;
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// Flags attached to a child insertion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AddFlags: u8 {
        /// The inserted child is the collection's selected entry.
        const SELECTED = 1 << 0;
    }
}

/// One mutation of a subscribed node.
///
/// Scalar events mirror the node's own state; child events describe the
/// node's collection. Events for a given subscription are always delivered
/// in the order the mutations were applied; no ordering holds across
/// different subscriptions.
#[derive(Debug, Clone)]
pub enum PropEvent {
    SetVoid,
    SetInt(i64),
    SetFloat(f64),
    SetStr(Rc<str>, StrKind),
    SetLink { title: Rc<str>, url: Rc<str> },
    SetDirectory,
    AddChild {
        child: Prop,
        before: Option<Prop>,
        flags: AddFlags,
    },
    AddChildren {
        children: Vec<Prop>,
        before: Option<Prop>,
    },
    MoveChild {
        child: Prop,
        before: Option<Prop>,
    },
    DelChild {
        child: Prop,
    },
    SelectChild {
        child: Option<Prop>,
        extra: Option<Prop>,
    },
    SuggestFocus {
        child: Prop,
    },
    /// Upstream hint: more children may (or may not) exist beyond the ones
    /// already present.
    HaveMore(bool),
    /// A subscriber asked the upstream source to produce more children.
    WantMore,
    /// The subscribed node was destroyed. No further events follow.
    Destroyed,
}
