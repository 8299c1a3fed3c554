#![forbid(unsafe_code)]

//! Property nodes and subscriptions.
//!
//! [`Prop`] is a cheap ref-counted handle to one node. Handles stay valid
//! after the node is destroyed; operations on a destroyed node are no-ops.
//! [`WeakProp`] is the non-owning variant used for back-references.

use crate::courier::{Courier, Notification, NotifyQueue};
use crate::event::{AddFlags, PropEvent};
use crate::value::{PropValue, StrKind};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique node id, usable as a hash key ("tag map" idiom).
pub type PropId = u64;

/// Graph-side subscription id, allocated by the courier.
pub type GraphSubId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn alloc_id() -> PropId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

struct SubEntry {
    id: GraphSubId,
    queue: NotifyQueue,
}

pub(crate) struct PropNode {
    id: PropId,
    name: Option<Rc<str>>,
    parent: RefCell<Weak<PropNode>>,
    value: RefCell<PropValue>,
    children: RefCell<Vec<Prop>>,
    subs: RefCell<Vec<SubEntry>>,
    selected: Cell<Option<PropId>>,
    have_more: Cell<Option<bool>>,
    destroyed: Cell<bool>,
}

/// Owning handle to a property node.
#[derive(Clone)]
pub struct Prop {
    node: Rc<PropNode>,
}

/// Non-owning handle to a property node.
#[derive(Clone)]
pub struct WeakProp {
    node: Weak<PropNode>,
}

impl WeakProp {
    pub fn upgrade(&self) -> Option<Prop> {
        self.node.upgrade().map(|node| Prop { node })
    }
}

impl std::fmt::Debug for Prop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prop")
            .field("id", &self.node.id)
            .field("name", &self.node.name)
            .finish()
    }
}

impl std::fmt::Debug for WeakProp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.upgrade() {
            Some(p) => write!(f, "WeakProp({:?})", p),
            None => write!(f, "WeakProp(<gone>)"),
        }
    }
}

impl PartialEq for Prop {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for Prop {}

impl Prop {
    /// Create a new anonymous root node.
    pub fn root() -> Prop {
        Self::new_node(None)
    }

    /// Create a new root node with a name.
    pub fn named_root(name: &str) -> Prop {
        Self::new_node(Some(Rc::from(name)))
    }

    fn new_node(name: Option<Rc<str>>) -> Prop {
        Prop {
            node: Rc::new(PropNode {
                id: alloc_id(),
                name,
                parent: RefCell::new(Weak::new()),
                value: RefCell::new(PropValue::Void),
                children: RefCell::new(Vec::new()),
                subs: RefCell::new(Vec::new()),
                selected: Cell::new(None),
                have_more: Cell::new(None),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> PropId {
        self.node.id
    }

    pub fn name(&self) -> Option<Rc<str>> {
        self.node.name.clone()
    }

    pub fn downgrade(&self) -> WeakProp {
        WeakProp {
            node: Rc::downgrade(&self.node),
        }
    }

    pub fn parent(&self) -> Option<Prop> {
        self.node.parent.borrow().upgrade().map(|node| Prop { node })
    }

    /// Current scalar state (clone).
    pub fn value(&self) -> PropValue {
        self.node.value.borrow().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.node.destroyed.get()
    }

    pub fn children(&self) -> Vec<Prop> {
        self.node.children.borrow().clone()
    }

    pub fn child_count(&self) -> usize {
        self.node.children.borrow().len()
    }

    /// Find a direct child by name.
    pub fn child_by_name(&self, name: &str) -> Option<Prop> {
        self.node
            .children
            .borrow()
            .iter()
            .find(|c| c.node.name.as_deref() == Some(name))
            .cloned()
    }

    /// Walk an existing path of named children. Does not create.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Option<Prop> {
        let mut cur = self.clone();
        for seg in path {
            cur = cur.child_by_name(seg.as_ref())?;
        }
        Some(cur)
    }

    /// Get or create a named child. Converts this node to a directory if it
    /// was a scalar.
    pub fn create(&self, name: &str) -> Prop {
        if let Some(c) = self.child_by_name(name) {
            return c;
        }
        let child = Self::new_node(Some(Rc::from(name)));
        self.attach(&child, None, AddFlags::empty());
        child
    }

    /// Get or create a path of named children.
    pub fn create_path<S: AsRef<str>>(&self, path: &[S]) -> Prop {
        let mut cur = self.clone();
        for seg in path {
            cur = cur.create(seg.as_ref());
        }
        cur
    }

    fn notify(&self, ev: PropEvent) {
        let subs = self.node.subs.borrow();
        for entry in subs.iter() {
            entry.queue.borrow_mut().push_back(Notification {
                sub: entry.id,
                event: ev.clone(),
            });
        }
    }

    fn become_directory(&self) {
        let was_dir = self.node.value.borrow().is_directory();
        if !was_dir {
            *self.node.value.borrow_mut() = PropValue::Directory;
            self.notify(PropEvent::SetDirectory);
        }
    }

    fn set_scalar(&self, v: PropValue, ev: PropEvent) {
        if self.node.destroyed.get() {
            return;
        }
        if self.node.value.borrow().is_directory() {
            // Becoming a scalar destroys the collection.
            let children = self.children();
            for c in children {
                c.destroy();
            }
        }
        *self.node.value.borrow_mut() = v;
        self.notify(ev);
    }

    pub fn set_void(&self) {
        self.set_scalar(PropValue::Void, PropEvent::SetVoid);
    }

    pub fn set_int(&self, v: i64) {
        self.set_scalar(PropValue::Int(v), PropEvent::SetInt(v));
    }

    pub fn set_float(&self, v: f64) {
        self.set_scalar(PropValue::Float(v), PropEvent::SetFloat(v));
    }

    pub fn set_str(&self, s: &str) {
        let rc: Rc<str> = Rc::from(s);
        self.set_scalar(
            PropValue::Str(rc.clone(), StrKind::Plain),
            PropEvent::SetStr(rc, StrKind::Plain),
        );
    }

    /// Set a string carrying rich inline markup.
    pub fn set_rich(&self, s: &str) {
        let rc: Rc<str> = Rc::from(s);
        self.set_scalar(
            PropValue::Str(rc.clone(), StrKind::Rich),
            PropEvent::SetStr(rc, StrKind::Rich),
        );
    }

    pub fn set_link(&self, title: &str, url: &str) {
        let title: Rc<str> = Rc::from(title);
        let url: Rc<str> = Rc::from(url);
        self.set_scalar(
            PropValue::Link {
                title: title.clone(),
                url: url.clone(),
            },
            PropEvent::SetLink { title, url },
        );
    }

    fn attach(&self, child: &Prop, before: Option<&Prop>, flags: AddFlags) {
        if self.node.destroyed.get() || child.node.destroyed.get() {
            return;
        }
        self.become_directory();
        if flags.contains(AddFlags::SELECTED) {
            self.node.selected.set(Some(child.id()));
        }
        *child.node.parent.borrow_mut() = Rc::downgrade(&self.node);
        {
            let mut children = self.node.children.borrow_mut();
            let idx = before
                .and_then(|b| children.iter().position(|c| c == b))
                .unwrap_or(children.len());
            children.insert(idx, child.clone());
        }
        self.notify(PropEvent::AddChild {
            child: child.clone(),
            before: before.cloned(),
            flags,
        });
    }

    /// Append a child.
    pub fn add(&self, child: &Prop) {
        self.attach(child, None, AddFlags::empty());
    }

    /// Insert a child before another (or append when `before` is `None`).
    pub fn add_before(&self, child: &Prop, before: Option<&Prop>) {
        self.attach(child, before, AddFlags::empty());
    }

    pub fn add_with_flags(&self, child: &Prop, before: Option<&Prop>, flags: AddFlags) {
        self.attach(child, before, flags);
    }

    /// Insert several children as one notification.
    pub fn add_many(&self, children: &[Prop], before: Option<&Prop>) {
        if self.node.destroyed.get() || children.is_empty() {
            return;
        }
        self.become_directory();
        {
            let mut list = self.node.children.borrow_mut();
            let idx = before
                .and_then(|b| list.iter().position(|c| c == b))
                .unwrap_or(list.len());
            for (i, child) in children.iter().enumerate() {
                *child.node.parent.borrow_mut() = Rc::downgrade(&self.node);
                list.insert(idx + i, child.clone());
            }
        }
        self.notify(PropEvent::AddChildren {
            children: children.to_vec(),
            before: before.cloned(),
        });
    }

    /// Move an existing child before another (or to the end).
    pub fn move_before(&self, child: &Prop, before: Option<&Prop>) {
        if self.node.destroyed.get() {
            return;
        }
        {
            let mut children = self.node.children.borrow_mut();
            let Some(cur) = children.iter().position(|c| c == child) else {
                return;
            };
            children.remove(cur);
            let idx = before
                .and_then(|b| children.iter().position(|c| c == b))
                .unwrap_or(children.len());
            children.insert(idx, child.clone());
        }
        self.notify(PropEvent::MoveChild {
            child: child.clone(),
            before: before.cloned(),
        });
    }

    /// Detach a child without destroying it.
    pub fn remove(&self, child: &Prop) {
        let removed = {
            let mut children = self.node.children.borrow_mut();
            match children.iter().position(|c| c == child) {
                Some(i) => {
                    children.remove(i);
                    true
                }
                None => false,
            }
        };
        if removed {
            if self.node.selected.get() == Some(child.id()) {
                self.node.selected.set(None);
            }
            *child.node.parent.borrow_mut() = Weak::new();
            self.notify(PropEvent::DelChild {
                child: child.clone(),
            });
        }
    }

    /// Destroy this node and its subtree. Subscribers of the node receive
    /// `Destroyed`; subscribers of the parent receive `DelChild`.
    pub fn destroy(&self) {
        if self.node.destroyed.get() {
            return;
        }
        let children = self.children();
        for c in children {
            c.destroy();
        }
        self.node.destroyed.set(true);
        self.notify(PropEvent::Destroyed);
        if let Some(parent) = self.parent() {
            parent.remove(self);
        }
    }

    /// Mark a child as the collection's selected entry. The selection is
    /// part of the node state, so late subscribers see it in their
    /// snapshot.
    pub fn select(&self, child: Option<&Prop>, extra: Option<&Prop>) {
        if self.node.destroyed.get() {
            return;
        }
        self.node.selected.set(child.map(|c| c.id()));
        self.notify(PropEvent::SelectChild {
            child: child.cloned(),
            extra: extra.cloned(),
        });
    }

    pub fn selected_child(&self) -> Option<Prop> {
        let id = self.node.selected.get()?;
        self.node
            .children
            .borrow()
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Ask the view side to move focus to a child's materialization.
    pub fn suggest_focus(&self, child: &Prop) {
        if self.node.destroyed.get() {
            return;
        }
        self.notify(PropEvent::SuggestFocus {
            child: child.clone(),
        });
    }

    /// Record (and announce) whether more children may exist upstream.
    pub fn set_have_more(&self, yes: bool) {
        self.node.have_more.set(Some(yes));
        self.notify(PropEvent::HaveMore(yes));
    }

    pub fn have_more(&self) -> Option<bool> {
        self.node.have_more.get()
    }

    /// Ask upstream producers for more children.
    pub fn want_more(&self) {
        self.notify(PropEvent::WantMore);
    }

    /// Subscribe to this node. Returns the handle plus a synchronous
    /// snapshot of the node's current state (scalar event, or directory +
    /// one `AddChild` per existing child, plus the have-more hint if known).
    /// All later events arrive through the courier.
    pub fn subscribe(&self, courier: &Courier) -> (SubHandle, Vec<PropEvent>) {
        let id = courier.alloc_sub_id();
        self.node.subs.borrow_mut().push(SubEntry {
            id,
            queue: courier.queue(),
        });
        tracing::trace!(prop = self.node.id, sub = id, "subscribed");
        let snapshot = self.snapshot_events();
        (
            SubHandle {
                node: self.downgrade(),
                id,
            },
            snapshot,
        )
    }

    fn snapshot_events(&self) -> Vec<PropEvent> {
        let mut out = Vec::new();
        match self.value() {
            PropValue::Void => out.push(PropEvent::SetVoid),
            PropValue::Int(v) => out.push(PropEvent::SetInt(v)),
            PropValue::Float(v) => out.push(PropEvent::SetFloat(v)),
            PropValue::Str(s, k) => out.push(PropEvent::SetStr(s, k)),
            PropValue::Link { title, url } => out.push(PropEvent::SetLink { title, url }),
            PropValue::Directory => {
                out.push(PropEvent::SetDirectory);
                let selected = self.node.selected.get();
                for child in self.children() {
                    let flags = if selected == Some(child.id()) {
                        AddFlags::SELECTED
                    } else {
                        AddFlags::empty()
                    };
                    out.push(PropEvent::AddChild {
                        child,
                        before: None,
                        flags,
                    });
                }
            }
        }
        if let Some(more) = self.node.have_more.get() {
            out.push(PropEvent::HaveMore(more));
        }
        out
    }

    fn unsubscribe(&self, id: GraphSubId) {
        self.node.subs.borrow_mut().retain(|e| e.id != id);
        tracing::trace!(prop = self.node.id, sub = id, "unsubscribed");
    }
}

/// Live subscription handle. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubHandle {
    node: WeakProp,
    id: GraphSubId,
}

impl SubHandle {
    pub fn id(&self) -> GraphSubId {
        self.id
    }
}

impl Drop for SubHandle {
    fn drop(&mut self) {
        if let Some(prop) = self.node.upgrade() {
            prop.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::Courier;

    fn drain(courier: &Courier) -> Vec<PropEvent> {
        courier.pump().into_iter().map(|n| n.event).collect()
    }

    #[test]
    fn scalar_set_round_trip() {
        let p = Prop::root();
        p.set_int(5);
        assert_eq!(p.value(), PropValue::Int(5));
        p.set_str("x");
        assert!(matches!(p.value(), PropValue::Str(_, StrKind::Plain)));
    }

    #[test]
    fn create_converts_to_directory() {
        let p = Prop::root();
        p.set_int(1);
        let c = p.create("child");
        assert!(p.value().is_directory());
        assert_eq!(p.child_by_name("child"), Some(c));
    }

    #[test]
    fn subscribe_snapshot_reflects_scalar() {
        let courier = Courier::new();
        let p = Prop::root();
        p.set_int(7);
        let (_h, snap) = p.subscribe(&courier);
        assert!(matches!(snap.as_slice(), [PropEvent::SetInt(7)]));
    }

    #[test]
    fn subscribe_snapshot_reflects_directory() {
        let courier = Courier::new();
        let p = Prop::root();
        p.create("a");
        p.create("b");
        let (_h, snap) = p.subscribe(&courier);
        assert!(matches!(snap[0], PropEvent::SetDirectory));
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn events_delivered_in_mutation_order() {
        let courier = Courier::new();
        let p = Prop::root();
        let (_h, _snap) = p.subscribe(&courier);
        p.set_int(5);
        p.set_void();
        p.set_int(5);
        let evs = drain(&courier);
        assert_eq!(evs.len(), 3);
        assert!(matches!(evs[0], PropEvent::SetInt(5)));
        assert!(matches!(evs[1], PropEvent::SetVoid));
        assert!(matches!(evs[2], PropEvent::SetInt(5)));
    }

    #[test]
    fn add_before_orders_children() {
        let p = Prop::root();
        let a = Prop::named_root("a");
        let b = Prop::named_root("b");
        let c = Prop::named_root("c");
        p.add(&a);
        p.add(&c);
        p.add_before(&b, Some(&c));
        let names: Vec<_> = p
            .children()
            .iter()
            .map(|c| c.name().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn move_before_reorders() {
        let p = Prop::root();
        let a = Prop::named_root("a");
        let b = Prop::named_root("b");
        p.add(&a);
        p.add(&b);
        p.move_before(&b, Some(&a));
        let names: Vec<_> = p
            .children()
            .iter()
            .map(|c| c.name().unwrap().to_string())
            .collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn destroy_notifies_parent_subscribers() {
        let courier = Courier::new();
        let p = Prop::root();
        let a = Prop::named_root("a");
        p.add(&a);
        let (_h, _snap) = p.subscribe(&courier);
        a.destroy();
        let evs = drain(&courier);
        assert!(evs.iter().any(|e| matches!(e, PropEvent::DelChild { .. })));
        assert!(a.is_destroyed());
        assert_eq!(p.child_count(), 0);
    }

    #[test]
    fn destroy_notifies_own_subscribers() {
        let courier = Courier::new();
        let p = Prop::root();
        let (_h, _snap) = p.subscribe(&courier);
        p.destroy();
        let evs = drain(&courier);
        assert!(matches!(evs.as_slice(), [PropEvent::Destroyed]));
    }

    #[test]
    fn scalar_set_on_directory_destroys_children() {
        let courier = Courier::new();
        let p = Prop::root();
        let a = p.create("a");
        let (_h, _snap) = p.subscribe(&courier);
        p.set_int(1);
        let evs = drain(&courier);
        assert!(evs.iter().any(|e| matches!(e, PropEvent::DelChild { .. })));
        assert!(evs.iter().any(|e| matches!(e, PropEvent::SetInt(1))));
        assert!(a.is_destroyed());
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let courier = Courier::new();
        let p = Prop::root();
        let (h, _snap) = p.subscribe(&courier);
        drop(h);
        p.set_int(1);
        assert!(drain(&courier).is_empty());
    }

    #[test]
    fn want_more_reaches_subscribers() {
        let courier = Courier::new();
        let p = Prop::root();
        let (_h, _snap) = p.subscribe(&courier);
        p.want_more();
        let evs = drain(&courier);
        assert!(matches!(evs.as_slice(), [PropEvent::WantMore]));
    }

    #[test]
    fn selection_survives_into_snapshots() {
        let courier = Courier::new();
        let p = Prop::root();
        let a = p.create("a");
        let b = p.create("b");
        p.select(Some(&b), None);
        assert_eq!(p.selected_child(), Some(b.clone()));

        let (_h, snap) = p.subscribe(&courier);
        let selected: Vec<bool> = snap
            .iter()
            .filter_map(|e| match e {
                PropEvent::AddChild { flags, .. } => Some(flags.contains(AddFlags::SELECTED)),
                _ => None,
            })
            .collect();
        assert_eq!(selected, [false, true]);

        b.destroy();
        assert_eq!(p.selected_child(), None);
        let _ = a;
    }

    #[test]
    fn resolve_walks_named_path() {
        let p = Prop::root();
        let leaf = p.create_path(&["a", "b", "c"]);
        assert_eq!(p.resolve(&["a", "b", "c"]), Some(leaf));
        assert_eq!(p.resolve(&["a", "x"]), None);
    }
}
