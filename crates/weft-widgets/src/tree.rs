#![forbid(unsafe_code)]

//! Generational widget arena.
//!
//! Widgets are addressed by [`WidgetId`] (index + generation); a stale id
//! simply resolves to nothing. Holding ids instead of references is what
//! lets the binding engine keep back-references from subscriptions to
//! widgets without reference cycles: teardown is "drop the slot".

use crate::attr::AttrValue;
use crate::class::WidgetClass;
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use std::rc::Rc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WidgetFlags: u8 {
        /// Excluded from focus and from visible ordering.
        const HIDDEN = 1 << 0;
        /// Currently inside the embedder's active (visible) range.
        const ACTIVE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WidgetId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
pub struct Widget {
    pub class: &'static dyn WidgetClass,
    parent: Option<WidgetId>,
    children: Vec<WidgetId>,
    pub attrs: FxHashMap<Rc<str>, AttrValue>,
    pub flags: WidgetFlags,
    selected: Option<WidgetId>,
    /// Readiness as reported by the embedder (images loaded, etc).
    pub ready: bool,
}

impl Widget {
    fn new(class: &'static dyn WidgetClass, parent: Option<WidgetId>) -> Widget {
        Widget {
            class,
            parent,
            children: Vec::new(),
            attrs: FxHashMap::default(),
            flags: WidgetFlags::empty(),
            selected: None,
            ready: true,
        }
    }

    pub fn parent(&self) -> Option<WidgetId> {
        self.parent
    }

    pub fn children(&self) -> &[WidgetId] {
        &self.children
    }

    pub fn selected(&self) -> Option<WidgetId> {
        self.selected
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    widget: Option<Widget>,
}

#[derive(Debug, Default)]
pub struct WidgetTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    focus: Option<WidgetId>,
}

impl WidgetTree {
    pub fn new() -> WidgetTree {
        WidgetTree::default()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.widget.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn alloc(&mut self, widget: Widget) -> WidgetId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.widget = Some(widget);
            WidgetId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                widget: Some(widget),
            });
            WidgetId {
                index,
                generation: 0,
            }
        }
    }

    /// Create a parentless widget.
    pub fn create_root(&mut self, class: &'static dyn WidgetClass) -> WidgetId {
        self.alloc(Widget::new(class, None))
    }

    /// Create a widget under `parent`, inserted before `before` (or
    /// appended). A stale `before` appends.
    pub fn create(
        &mut self,
        class: &'static dyn WidgetClass,
        parent: WidgetId,
        before: Option<WidgetId>,
    ) -> WidgetId {
        let id = self.alloc(Widget::new(class, Some(parent)));
        if let Some(pw) = self.get_mut(parent) {
            let idx = before
                .and_then(|b| pw.children.iter().position(|c| *c == b))
                .unwrap_or(pw.children.len());
            pw.children.insert(idx, id);
        }
        id
    }

    pub fn contains(&self, id: WidgetId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: WidgetId) -> Option<&Widget> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.widget.as_ref()
    }

    pub fn get_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.widget.as_mut()
    }

    pub fn parent(&self, id: WidgetId) -> Option<WidgetId> {
        self.get(id).and_then(|w| w.parent)
    }

    pub fn children(&self, id: WidgetId) -> Vec<WidgetId> {
        self.get(id).map(|w| w.children.clone()).unwrap_or_default()
    }

    pub fn index_in_parent(&self, id: WidgetId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.get(parent)?.children.iter().position(|c| *c == id)
    }

    /// Move `id` before `before` among its siblings (or to the end).
    pub fn move_before(&mut self, id: WidgetId, before: Option<WidgetId>) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let Some(pw) = self.get_mut(parent) else {
            return;
        };
        let Some(cur) = pw.children.iter().position(|c| *c == id) else {
            return;
        };
        pw.children.remove(cur);
        let idx = before
            .and_then(|b| pw.children.iter().position(|c| *c == b))
            .unwrap_or(pw.children.len());
        pw.children.insert(idx, id);
    }

    pub fn set_hidden(&mut self, id: WidgetId, hidden: bool) {
        if let Some(w) = self.get_mut(id) {
            w.flags.set(WidgetFlags::HIDDEN, hidden);
        }
    }

    pub fn set_active(&mut self, id: WidgetId, active: bool) {
        if let Some(w) = self.get_mut(id) {
            w.flags.set(WidgetFlags::ACTIVE, active);
        }
    }

    pub fn focus(&self) -> Option<WidgetId> {
        self.focus
    }

    pub fn set_focus(&mut self, id: Option<WidgetId>) {
        self.focus = match id {
            Some(id) if self.contains(id) => Some(id),
            _ => None,
        };
    }

    /// Whether `id` lies on the focus path (is the focused widget or one of
    /// its ancestors).
    pub fn is_focused(&self, id: WidgetId) -> bool {
        let mut cur = self.focus;
        while let Some(c) = cur {
            if c == id {
                return true;
            }
            cur = self.parent(c);
        }
        false
    }

    /// Set the selected child of a selection-capable widget.
    pub fn select_child(&mut self, parent: WidgetId, child: Option<WidgetId>) {
        let Some(pw) = self.get(parent) else {
            return;
        };
        if !pw.class.selectable() {
            tracing::trace!(class = pw.class.name(), "select on non-selectable class ignored");
            return;
        }
        if let Some(pw) = self.get_mut(parent) {
            pw.selected = child;
        }
    }

    pub fn selected(&self, parent: WidgetId) -> Option<WidgetId> {
        self.get(parent).and_then(|w| w.selected)
    }

    /// Remove a widget and its subtree. If the focused widget is inside the
    /// removed subtree, focus moves to the removed widget's next
    /// non-hidden sibling, else its previous one, else its parent.
    ///
    /// Returns every destroyed id, children before parents, so callers can
    /// tear down per-widget bindings.
    pub fn retire(&mut self, id: WidgetId) -> Vec<WidgetId> {
        if !self.contains(id) {
            return Vec::new();
        }

        if self.is_focused(id) {
            let heir = self.focus_heir(id);
            self.focus = heir;
        }

        if let Some(parent) = self.parent(id) {
            if let Some(pw) = self.get_mut(parent) {
                pw.children.retain(|c| *c != id);
                if pw.selected == Some(id) {
                    pw.selected = None;
                }
            }
        }

        let mut destroyed = Vec::new();
        self.destroy_rec(id, &mut destroyed);
        destroyed
    }

    fn focus_heir(&self, id: WidgetId) -> Option<WidgetId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        let visible = |w: &WidgetId| {
            self.get(*w)
                .is_some_and(|w| !w.flags.contains(WidgetFlags::HIDDEN))
        };
        siblings[pos + 1..]
            .iter()
            .find(|c| visible(c))
            .or_else(|| siblings[..pos].iter().rev().find(|c| visible(c)))
            .copied()
            .or(Some(parent))
    }

    fn destroy_rec(&mut self, id: WidgetId, destroyed: &mut Vec<WidgetId>) {
        for child in self.children(id) {
            self.destroy_rec(child, destroyed);
        }
        let slot = &mut self.slots[id.index as usize];
        if slot.generation == id.generation && slot.widget.is_some() {
            slot.widget = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            destroyed.push(id);
        }
        if self.focus == Some(id) {
            self.focus = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Container, Item, List, class_by_name};

    fn tree_with_list() -> (WidgetTree, WidgetId) {
        let mut t = WidgetTree::new();
        let root = t.create_root(&List);
        (t, root)
    }

    #[test]
    fn create_appends_in_order() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        let b = t.create(&Item, root, None);
        assert_eq!(t.children(root), vec![a, b]);
    }

    #[test]
    fn create_before_inserts_at_position() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        let b = t.create(&Item, root, Some(a));
        assert_eq!(t.children(root), vec![b, a]);
    }

    #[test]
    fn stale_id_resolves_to_nothing() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        t.retire(a);
        assert!(t.get(a).is_none());
        // Slot reuse bumps the generation.
        let b = t.create(&Item, root, None);
        assert!(t.get(b).is_some());
        assert!(t.get(a).is_none());
    }

    #[test]
    fn retire_returns_subtree_children_first() {
        let mut t = WidgetTree::new();
        let root = t.create_root(&Container);
        let mid = t.create(&Container, root, None);
        let leaf = t.create(&Item, mid, None);
        let gone = t.retire(mid);
        assert_eq!(gone, vec![leaf, mid]);
        assert!(t.children(root).is_empty());
    }

    #[test]
    fn focus_moves_to_successor_on_retire() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        let b = t.create(&Item, root, None);
        let c = t.create(&Item, root, None);
        t.set_focus(Some(b));
        t.retire(b);
        assert_eq!(t.focus(), Some(c));
        assert_eq!(t.children(root), vec![a, c]);
    }

    #[test]
    fn focus_moves_to_predecessor_when_last_is_retired() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        let b = t.create(&Item, root, None);
        t.set_focus(Some(b));
        t.retire(b);
        assert_eq!(t.focus(), Some(a));
    }

    #[test]
    fn focus_skips_hidden_siblings() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        let b = t.create(&Item, root, None);
        let anchor = t.create(class_by_name("dummy").unwrap(), root, None);
        t.set_hidden(anchor, true);
        t.set_focus(Some(b));
        t.retire(b);
        assert_eq!(t.focus(), Some(a));
    }

    #[test]
    fn focus_falls_back_to_parent() {
        let (mut t, root) = tree_with_list();
        let only = t.create(&Item, root, None);
        t.set_focus(Some(only));
        t.retire(only);
        assert_eq!(t.focus(), Some(root));
    }

    #[test]
    fn focus_path_includes_ancestors() {
        let mut t = WidgetTree::new();
        let root = t.create_root(&Container);
        let mid = t.create(&Container, root, None);
        let leaf = t.create(&Item, mid, None);
        t.set_focus(Some(leaf));
        assert!(t.is_focused(root));
        assert!(t.is_focused(mid));
        assert!(t.is_focused(leaf));
    }

    #[test]
    fn select_child_respects_class_capability() {
        let mut t = WidgetTree::new();
        let list = t.create_root(&List);
        let item = t.create(&Item, list, None);
        t.select_child(list, Some(item));
        assert_eq!(t.selected(list), Some(item));

        let plain = t.create_root(&Item);
        let child = t.create(&Item, plain, None);
        t.select_child(plain, Some(child));
        assert_eq!(t.selected(plain), None);
    }

    #[test]
    fn retire_clears_selection() {
        let mut t = WidgetTree::new();
        let list = t.create_root(&List);
        let item = t.create(&Item, list, None);
        t.select_child(list, Some(item));
        t.retire(item);
        assert_eq!(t.selected(list), None);
    }

    #[test]
    fn move_before_reorders_siblings() {
        let (mut t, root) = tree_with_list();
        let a = t.create(&Item, root, None);
        let b = t.create(&Item, root, None);
        let c = t.create(&Item, root, None);
        t.move_before(c, Some(a));
        assert_eq!(t.children(root), vec![c, a, b]);
        t.move_before(c, None);
        assert_eq!(t.children(root), vec![a, b, c]);
    }
}
