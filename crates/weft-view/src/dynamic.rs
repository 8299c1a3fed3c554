#![forbid(unsafe_code)]

//! Dynamic re-evaluation scheduling.
//!
//! Every evaluation pass reports *why* it would need to run again as a
//! [`DynFlags`] set. Chains whose flag set is non-empty are retained on the
//! owning widget as live expressions; widget signals and the frame tick
//! re-run only the chains whose flags match. A re-run replaces the chain's
//! flag set, so an expression that stops producing flags is discarded —
//! unless it declared `KEEP_ALIVE`, which pins expressions holding
//! externally visible side state (settings bindings and the like).

use crate::bridge::SubId;
use crate::chain::Chain;
use crate::eval::Scopes;
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// Reasons an expression must be re-evaluated later.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DynFlags: u8 {
        /// A subscription was read; the bridge re-runs the chain on change.
        const PROP = 1 << 0;
        /// Re-run on every frame tick.
        const EVERY_FRAME = 1 << 1;
        /// Re-run when the focus path through the widget changes.
        const FOCUS = 1 << 2;
        /// Re-run when the widget's layout path changes.
        const LAYOUT = 1 << 3;
        /// Re-run when widget metadata (readiness, scrollability) changes.
        const WIDGET_META = 1 << 4;
        /// Never discard, even with no other flags set.
        const KEEP_ALIVE = 1 << 5;
    }
}

/// Widget-level signals that can re-run live expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    FocusChange,
    LayoutChange,
    WidgetMeta,
}

impl Signal {
    pub fn mask(self) -> DynFlags {
        match self {
            Signal::FocusChange => DynFlags::FOCUS,
            Signal::LayoutChange => DynFlags::LAYOUT,
            Signal::WidgetMeta => DynFlags::WIDGET_META,
        }
    }
}

/// A retained expression chain plus the context it re-runs in.
pub(crate) struct LiveExpr {
    pub chain: Rc<Chain>,
    pub flags: DynFlags,
    pub scopes: Scopes,
}

/// Per-widget binding state: live expressions and owned subscriptions.
#[derive(Default)]
pub(crate) struct WidgetBinding {
    pub dynamic: Vec<LiveExpr>,
    pub mask: DynFlags,
    pub subs: Vec<SubId>,
}

impl WidgetBinding {
    pub fn recompute_mask(&mut self) {
        self.mask = self
            .dynamic
            .iter()
            .fold(DynFlags::empty(), |acc, e| acc | e.flags);
    }

    /// Replace the flag set of `chain` after a re-run, dropping it when it
    /// produced nothing and is not pinned.
    pub fn update_flags(&mut self, chain: &Rc<Chain>, flags: DynFlags) {
        if let Some(idx) = self
            .dynamic
            .iter()
            .position(|e| Rc::ptr_eq(&e.chain, chain))
        {
            if flags.is_empty() {
                tracing::trace!("live expression drained, dropping");
                self.dynamic.remove(idx);
            } else {
                self.dynamic[idx].flags = flags;
            }
            self.recompute_mask();
        }
    }
}
