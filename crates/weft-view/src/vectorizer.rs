#![forbid(unsafe_code)]

//! The vectorizer flattens a node's children into one vector token.
//!
//! Elements live in a slab with prev/next indices, so insert, remove and
//! move are O(1) neighbor splices. The aggregate token is rebuilt lazily:
//! mutations only set a dirty bit, and the engine rebuilds when the cached
//! token is next read.

use crate::token::{Token, VecItem};
use rustc_hash::FxHashMap;
use std::rc::Rc;
use weft_prop::{Prop, PropId, SubHandle};

pub(crate) struct VecElement {
    pub prop: Prop,
    pub handle: SubHandle,
    pub token: Token,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
pub(crate) struct VectorizerState {
    slab: Vec<Option<VecElement>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    by_prop: FxHashMap<PropId, usize>,
    selected: Option<usize>,
    dirty: bool,
}

impl VectorizerState {
    pub fn new() -> VectorizerState {
        VectorizerState::default()
    }

    pub fn len(&self) -> usize {
        self.by_prop.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn index_of(&self, prop: PropId) -> Option<usize> {
        self.by_prop.get(&prop).copied()
    }

    fn alloc(&mut self, e: VecElement) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = Some(e);
            idx
        } else {
            self.slab.push(Some(e));
            self.slab.len() - 1
        }
    }

    fn link_before(&mut self, idx: usize, before: Option<usize>) {
        match before {
            Some(b) => {
                let prev = self.slab[b].as_ref().and_then(|e| e.prev);
                if let Some(e) = self.slab[idx].as_mut() {
                    e.prev = prev;
                    e.next = Some(b);
                }
                if let Some(e) = self.slab[b].as_mut() {
                    e.prev = Some(idx);
                }
                match prev {
                    Some(p) => {
                        if let Some(e) = self.slab[p].as_mut() {
                            e.next = Some(idx);
                        }
                    }
                    None => self.head = Some(idx),
                }
            }
            None => {
                let old_tail = self.tail;
                if let Some(e) = self.slab[idx].as_mut() {
                    e.prev = old_tail;
                    e.next = None;
                }
                match old_tail {
                    Some(t) => {
                        if let Some(e) = self.slab[t].as_mut() {
                            e.next = Some(idx);
                        }
                    }
                    None => self.head = Some(idx),
                }
                self.tail = Some(idx);
            }
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slab[idx].as_ref() {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(e) = self.slab[p].as_mut() {
                    e.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = self.slab[n].as_mut() {
                    e.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(e) = self.slab[idx].as_mut() {
            e.prev = None;
            e.next = None;
        }
    }

    /// Insert an element before `before` (or append). Returns its index.
    pub fn insert(
        &mut self,
        prop: Prop,
        before: Option<PropId>,
        handle: SubHandle,
        token: Token,
        selected: bool,
    ) -> usize {
        let idx = self.alloc(VecElement {
            prop: prop.clone(),
            handle,
            token,
            prev: None,
            next: None,
        });
        let before_idx = before.and_then(|b| self.by_prop.get(&b).copied());
        self.link_before(idx, before_idx);
        self.by_prop.insert(prop.id(), idx);
        if selected {
            self.selected = Some(idx);
        }
        self.dirty = true;
        idx
    }

    /// Remove an element, handing back its graph handle for route cleanup.
    pub fn remove(&mut self, prop: PropId) -> Option<SubHandle> {
        let idx = self.by_prop.remove(&prop)?;
        self.unlink(idx);
        if self.selected == Some(idx) {
            self.selected = None;
        }
        let e = self.slab[idx].take()?;
        self.free.push(idx);
        self.dirty = true;
        Some(e.handle)
    }

    pub fn move_before(&mut self, prop: PropId, before: Option<PropId>) {
        let Some(idx) = self.by_prop.get(&prop).copied() else {
            return;
        };
        self.unlink(idx);
        let before_idx = before.and_then(|b| self.by_prop.get(&b).copied());
        self.link_before(idx, before_idx);
        self.dirty = true;
    }

    /// Mark one element as selected. Returns false when it already was.
    pub fn select(&mut self, prop: PropId) -> bool {
        let idx = self.by_prop.get(&prop).copied();
        if idx == self.selected {
            return false;
        }
        self.selected = idx;
        self.dirty = true;
        true
    }

    pub fn set_token(&mut self, idx: usize, token: Token) {
        if let Some(e) = self.slab[idx].as_mut() {
            e.token = token;
            self.dirty = true;
        }
    }

    /// Drop every element, handing back the graph handles.
    pub fn clear(&mut self) -> Vec<SubHandle> {
        let mut handles = Vec::with_capacity(self.by_prop.len());
        for slot in self.slab.iter_mut() {
            if let Some(e) = slot.take() {
                handles.push(e.handle);
            }
        }
        self.slab.clear();
        self.free.clear();
        self.by_prop.clear();
        self.head = None;
        self.tail = None;
        self.selected = None;
        self.dirty = true;
        handles
    }

    /// Rebuild the aggregate vector token in list order and clear the
    /// dirty bit.
    pub fn rebuild(&mut self) -> Token {
        let mut items = Vec::with_capacity(self.by_prop.len());
        let mut cur = self.head;
        while let Some(idx) = cur {
            let Some(e) = self.slab[idx].as_ref() else {
                break;
            };
            items.push(VecItem {
                value: e.token.clone(),
                selected: self.selected == Some(idx),
            });
            cur = e.next;
        }
        self.dirty = false;
        Token::Vector(Rc::new(items))
    }
}
