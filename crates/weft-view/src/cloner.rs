#![forbid(unsafe_code)]

//! Cloner state: the collection-level controller behind list
//! materialization.
//!
//! Until the template body is known, arriving children are parked on a FIFO
//! pending queue that honors relative insertion order. Once bound, every
//! child materializes immediately as a widget plus a private clone-root
//! property scope. Entry positions are resequenced lazily behind a dirty
//! flag, and must be valid before the active-range bounds are read (they
//! feed the pagination predicate).

use crate::chain::Block;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::rc::Rc;
use weft_prop::{Prop, PropId};
use weft_widgets::{WidgetClass, WidgetId, WidgetTree};

/// One materialized list item.
pub(crate) struct CloneEntry {
    pub widget: WidgetId,
    pub prop: Prop,
    /// Private scope for values the template declares locally.
    pub clone_root: Prop,
    pub pos: usize,
}

/// Upstream's answer to "are there more children than you have seen".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HaveMore {
    /// Nothing signaled yet; treated as "may exist".
    Unknown,
    Yes,
    No,
}

pub(crate) struct ClonerState {
    pub body: Option<Rc<Block>>,
    pub class: Option<&'static dyn WidgetClass>,
    pub parent_widget: WidgetId,
    /// Hidden placeholder marking the insertion point among the parent's
    /// children.
    pub anchor: Option<WidgetId>,
    pub originating: Option<Prop>,
    pub view: Option<Prop>,
    pub args: Option<Prop>,
    pub entries: FxHashMap<PropId, CloneEntry>,
    pub by_widget: FxHashMap<WidgetId, PropId>,
    pending: VecDeque<Prop>,
    pub pending_select: Option<Prop>,
    pub positions_valid: bool,
    pub lowest_active: usize,
    pub highest_active: usize,
    pub have_more: HaveMore,
    pub pending_more: bool,
}

impl ClonerState {
    pub fn new(
        parent_widget: WidgetId,
        originating: Option<Prop>,
        view: Option<Prop>,
        args: Option<Prop>,
    ) -> ClonerState {
        ClonerState {
            body: None,
            class: None,
            parent_widget,
            anchor: None,
            originating,
            view,
            args,
            entries: FxHashMap::default(),
            by_widget: FxHashMap::default(),
            pending: VecDeque::new(),
            pending_select: None,
            positions_valid: true,
            lowest_active: 0,
            highest_active: 0,
            have_more: HaveMore::Unknown,
            pending_more: false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.body.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Park a child until the template is known, keeping relative order.
    pub fn queue_pending(&mut self, prop: Prop, before: Option<PropId>, selected: bool) {
        let idx = before
            .and_then(|b| self.pending.iter().position(|p| p.id() == b))
            .unwrap_or(self.pending.len());
        if selected {
            self.pending_select = Some(prop.clone());
        }
        self.pending.insert(idx, prop);
    }

    pub fn move_pending(&mut self, prop: PropId, before: Option<PropId>) {
        let Some(cur) = self.pending.iter().position(|p| p.id() == prop) else {
            return;
        };
        let Some(moved) = self.pending.remove(cur) else {
            return;
        };
        let idx = before
            .and_then(|b| self.pending.iter().position(|p| p.id() == b))
            .unwrap_or(self.pending.len());
        self.pending.insert(idx, moved);
    }

    /// Drop a queued child. Returns whether it was queued.
    pub fn remove_pending(&mut self, prop: PropId) -> bool {
        if self.pending_select.as_ref().is_some_and(|p| p.id() == prop) {
            self.pending_select = None;
        }
        let Some(cur) = self.pending.iter().position(|p| p.id() == prop) else {
            return false;
        };
        self.pending.remove(cur);
        true
    }

    /// Drain the queue for materialization, in arrival order, together
    /// with the deferred selection marker.
    pub fn take_pending(&mut self) -> (Vec<Prop>, Option<Prop>) {
        (self.pending.drain(..).collect(), self.pending_select.take())
    }

    /// Recompute entry positions from the parent's child order.
    pub fn resequence(&mut self, tree: &WidgetTree) {
        let mut pos = 0;
        for child in tree.children(self.parent_widget) {
            if let Some(pid) = self.by_widget.get(&child) {
                if let Some(e) = self.entries.get_mut(pid) {
                    e.pos = pos;
                }
            }
            pos += 1;
        }
        self.positions_valid = true;
    }

    /// Track the active (visible) position range. Positions must have been
    /// resequenced first.
    pub fn note_activity(&mut self, pos: usize, active: bool) {
        if active {
            if pos < self.lowest_active {
                self.lowest_active = pos;
            }
            if pos > self.highest_active {
                self.highest_active = pos;
            }
        } else {
            if pos >= self.lowest_active && pos < self.highest_active {
                self.lowest_active = pos + 1;
            }
            if pos <= self.highest_active && pos > self.lowest_active {
                self.highest_active = pos - 1;
            }
        }
    }

    pub fn on_have_more(&mut self, yes: bool) {
        self.have_more = if yes { HaveMore::Yes } else { HaveMore::No };
        self.pending_more = false;
    }

    /// The pagination predicate: latch a want-more request when the
    /// highest active entry crosses into the top `1 - threshold` of the
    /// collection (or is the last entry), while upstream may still have
    /// more. Returns true exactly when the request should be issued.
    pub fn pagination_check(&mut self, threshold: f64) -> bool {
        if self.pending_more || self.have_more == HaveMore::No {
            return false;
        }
        let n = self.entries.len();
        if n == 0 {
            return false;
        }
        if (self.highest_active + 1) as f64 >= n as f64 * threshold
            || self.highest_active == n - 1
        {
            self.pending_more = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_widgets::class_by_name;

    fn state() -> ClonerState {
        let mut tree = WidgetTree::new();
        let parent = tree.create_root(class_by_name("list").unwrap());
        ClonerState::new(parent, None, None, None)
    }

    #[test]
    fn pending_keeps_fifo_order() {
        let mut s = state();
        let a = Prop::named_root("a");
        let b = Prop::named_root("b");
        s.queue_pending(a.clone(), None, false);
        s.queue_pending(b.clone(), None, false);
        let (drained, select) = s.take_pending();
        assert_eq!(drained, vec![a, b]);
        assert!(select.is_none());
    }

    #[test]
    fn pending_honors_before() {
        let mut s = state();
        let a = Prop::named_root("a");
        let b = Prop::named_root("b");
        s.queue_pending(a.clone(), None, false);
        s.queue_pending(b.clone(), Some(a.id()), false);
        let (drained, _) = s.take_pending();
        assert_eq!(drained, vec![b, a]);
    }

    #[test]
    fn pending_select_marker_survives_queue() {
        let mut s = state();
        let a = Prop::named_root("a");
        s.queue_pending(a.clone(), None, true);
        let (_, select) = s.take_pending();
        assert_eq!(select, Some(a));
    }

    #[test]
    fn removing_selected_pending_clears_marker() {
        let mut s = state();
        let a = Prop::named_root("a");
        s.queue_pending(a.clone(), None, true);
        assert!(s.remove_pending(a.id()));
        assert!(s.pending_select.is_none());
        assert_eq!(s.pending_len(), 0);
    }

    #[test]
    fn resequence_assigns_widget_order_and_is_idempotent() {
        let mut tree = WidgetTree::new();
        let parent = tree.create_root(class_by_name("list").unwrap());
        let mut s = ClonerState::new(parent, None, None, None);
        let mut widgets = Vec::new();
        for i in 0..4 {
            let p = Prop::root();
            let w = tree.create(class_by_name("item").unwrap(), parent, None);
            widgets.push(w);
            s.by_widget.insert(w, p.id());
            s.entries.insert(
                p.id(),
                CloneEntry {
                    widget: w,
                    prop: p,
                    clone_root: Prop::root(),
                    pos: 99,
                },
            );
        }
        // A move scrambles widget order; positions are stale until the
        // next resequence.
        tree.move_before(widgets[3], Some(widgets[0]));
        s.positions_valid = false;
        s.resequence(&tree);
        let positions = |s: &ClonerState| {
            let mut v: Vec<(WidgetId, usize)> = s
                .entries
                .values()
                .map(|e| (e.widget, e.pos))
                .collect();
            v.sort_by_key(|(_, pos)| *pos);
            v
        };
        let first = positions(&s);
        assert_eq!(
            first.iter().map(|(w, _)| *w).collect::<Vec<_>>(),
            vec![widgets[3], widgets[0], widgets[1], widgets[2]]
        );
        assert_eq!(
            first.iter().map(|(_, p)| *p).collect::<Vec<_>>(),
            vec![0, 1, 2, 3],
            "positions are contiguous from zero"
        );

        // Nothing moved since: resequencing again is a no-op.
        s.resequence(&tree);
        assert_eq!(positions(&s), first);
    }

    #[test]
    fn pagination_fires_once_at_95_percent() {
        let mut s = state();
        let mut tree = WidgetTree::new();
        let parent = tree.create_root(class_by_name("list").unwrap());
        s.parent_widget = parent;
        for i in 0..100 {
            let p = Prop::root();
            let w = tree.create(class_by_name("item").unwrap(), parent, None);
            s.by_widget.insert(w, p.id());
            s.entries.insert(
                p.id(),
                CloneEntry {
                    widget: w,
                    prop: p.clone(),
                    clone_root: Prop::root(),
                    pos: i,
                },
            );
        }
        let mut fired = 0;
        for pos in 0..100 {
            s.note_activity(pos, true);
            if s.pagination_check(0.95) {
                fired += 1;
                assert_eq!(pos, 94, "want-more must first fire at position 94");
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn pagination_fires_on_last_entry() {
        let mut s = state();
        let p = Prop::root();
        s.entries.insert(
            p.id(),
            CloneEntry {
                widget: s.parent_widget,
                prop: p,
                clone_root: Prop::root(),
                pos: 0,
            },
        );
        s.note_activity(0, true);
        assert!(s.pagination_check(0.95), "single entry is the last entry");
        assert!(!s.pagination_check(0.95), "latched until have-more rearms");
        s.on_have_more(true);
        assert!(s.pagination_check(0.95));
    }

    #[test]
    fn pagination_silent_when_upstream_is_done() {
        let mut s = state();
        let p = Prop::root();
        s.entries.insert(
            p.id(),
            CloneEntry {
                widget: s.parent_widget,
                prop: p,
                clone_root: Prop::root(),
                pos: 0,
            },
        );
        s.on_have_more(false);
        s.note_activity(0, true);
        assert!(!s.pagination_check(0.95));
    }
}
