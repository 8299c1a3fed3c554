#![forbid(unsafe_code)]

//! The courier marshals property mutations and notifications onto the
//! single evaluation thread.
//!
//! Two ingress paths feed one ordered delivery queue:
//!
//! 1. Mutations applied directly on the owning thread queue their
//!    notifications immediately.
//! 2. Mutations from other threads enter as path-addressed operations
//!    through a [`CourierSender`] and are applied during [`Courier::pump`],
//!    which then drains the delivery queue.
//!
//! Notifications for one subscription always come out in mutation order.
//! Evaluator code must only run against drained notifications, never from
//! inside a mutation.

use crate::event::PropEvent;
use crate::node::{GraphSubId, Prop};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc;

/// Shared delivery queue handed to every subscription.
pub(crate) type NotifyQueue = Rc<RefCell<VecDeque<Notification>>>;

/// One queued notification: which subscription, what happened.
#[derive(Debug, Clone)]
pub struct Notification {
    pub sub: GraphSubId,
    pub event: PropEvent,
}

#[derive(Debug)]
enum RemoteMutation {
    SetVoid,
    SetInt(i64),
    SetFloat(f64),
    SetStr(String),
    SetLink { title: String, url: String },
    AddChild { name: String },
    DelChild { name: String },
}

#[derive(Debug)]
struct RemoteOp {
    path: String,
    op: RemoteMutation,
}

/// Single-consumer notification hub. Lives on the evaluation thread.
pub struct Courier {
    queue: NotifyQueue,
    ingress_tx: mpsc::Sender<RemoteOp>,
    ingress_rx: mpsc::Receiver<RemoteOp>,
    roots: RefCell<FxHashMap<String, Prop>>,
    next_sub: Cell<GraphSubId>,
}

impl Courier {
    pub fn new() -> Courier {
        let (ingress_tx, ingress_rx) = mpsc::channel();
        Courier {
            queue: Rc::new(RefCell::new(VecDeque::new())),
            ingress_tx,
            ingress_rx,
            roots: RefCell::new(FxHashMap::default()),
            next_sub: Cell::new(1),
        }
    }

    pub(crate) fn queue(&self) -> NotifyQueue {
        self.queue.clone()
    }

    pub(crate) fn alloc_sub_id(&self) -> GraphSubId {
        let id = self.next_sub.get();
        self.next_sub.set(id + 1);
        id
    }

    /// Make a root reachable from remote senders under `name`.
    pub fn register_root(&self, name: &str, prop: &Prop) {
        self.roots.borrow_mut().insert(name.to_owned(), prop.clone());
    }

    /// A cloneable, `Send` handle other threads use to mutate the graph.
    pub fn sender(&self) -> CourierSender {
        CourierSender {
            tx: self.ingress_tx.clone(),
        }
    }

    /// Number of undelivered notifications.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Apply queued remote operations, then drain and return every pending
    /// notification in order.
    pub fn pump(&self) -> Vec<Notification> {
        while let Ok(op) = self.ingress_rx.try_recv() {
            self.apply_remote(op);
        }
        self.queue.borrow_mut().drain(..).collect()
    }

    fn apply_remote(&self, op: RemoteOp) {
        let mut segs = op.path.split('.');
        let Some(root_name) = segs.next() else {
            return;
        };
        let root = match self.roots.borrow().get(root_name) {
            Some(r) => r.clone(),
            None => {
                tracing::debug!(path = %op.path, "remote op for unregistered root dropped");
                return;
            }
        };
        let rest: Vec<&str> = segs.collect();
        match op.op {
            RemoteMutation::SetVoid => root.create_path(&rest).set_void(),
            RemoteMutation::SetInt(v) => root.create_path(&rest).set_int(v),
            RemoteMutation::SetFloat(v) => root.create_path(&rest).set_float(v),
            RemoteMutation::SetStr(s) => root.create_path(&rest).set_str(&s),
            RemoteMutation::SetLink { title, url } => {
                root.create_path(&rest).set_link(&title, &url)
            }
            RemoteMutation::AddChild { name } => {
                root.create_path(&rest).create(&name);
            }
            RemoteMutation::DelChild { name } => {
                let Some(parent) = root.resolve(&rest) else {
                    return;
                };
                if let Some(child) = parent.child_by_name(&name) {
                    child.destroy();
                }
            }
        }
    }
}

impl Default for Courier {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-thread mutation handle. Paths are dot-separated, starting with a
/// root name registered via [`Courier::register_root`].
#[derive(Clone)]
pub struct CourierSender {
    tx: mpsc::Sender<RemoteOp>,
}

impl CourierSender {
    fn send(&self, path: &str, op: RemoteMutation) {
        let _ = self.tx.send(RemoteOp {
            path: path.to_owned(),
            op,
        });
    }

    pub fn set_void(&self, path: &str) {
        self.send(path, RemoteMutation::SetVoid);
    }

    pub fn set_int(&self, path: &str, v: i64) {
        self.send(path, RemoteMutation::SetInt(v));
    }

    pub fn set_float(&self, path: &str, v: f64) {
        self.send(path, RemoteMutation::SetFloat(v));
    }

    pub fn set_str(&self, path: &str, s: &str) {
        self.send(path, RemoteMutation::SetStr(s.to_owned()));
    }

    pub fn set_link(&self, path: &str, title: &str, url: &str) {
        self.send(
            path,
            RemoteMutation::SetLink {
                title: title.to_owned(),
                url: url.to_owned(),
            },
        );
    }

    pub fn add_child(&self, path: &str, name: &str) {
        self.send(
            path,
            RemoteMutation::AddChild {
                name: name.to_owned(),
            },
        );
    }

    pub fn del_child(&self, path: &str, name: &str) {
        self.send(
            path,
            RemoteMutation::DelChild {
                name: name.to_owned(),
            },
        );
    }
}
