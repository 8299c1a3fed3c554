#![forbid(unsafe_code)]

//! The binding engine.
//!
//! Owns the widget tree, the subscription arena and the courier, and wires
//! the three together: evaluation passes create subscriptions, the courier
//! pump delivers graph notifications to them, and deliveries re-run the
//! chains that depend on the changed data. Everything happens on one
//! thread; deliveries never nest inside an evaluation pass because
//! mutations only queue notifications.

use crate::bridge::{SubArena, SubId, SubKind, scalar_event_token};
use crate::chain::{Block, Chain};
use crate::cloner::{CloneEntry, ClonerState};
use crate::dynamic::{DynFlags, LiveExpr, Signal, WidgetBinding};
use crate::error::EvalError;
use crate::eval::{self, EvalCtx, Scopes};
use crate::token::Token;
use crate::vectorizer::VectorizerState;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use weft_prop::{Courier, GraphSubId, Prop, PropEvent};
use weft_widgets::{WidgetClass, WidgetId, WidgetTree};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Fraction of the entry count the highest active position must cross
    /// before a want-more request is issued upstream.
    pub pagination_threshold: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            pagination_threshold: 0.95,
        }
    }
}

/// Where a graph notification is routed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SubTarget {
    Main(SubId),
    VecElement(SubId, usize),
}

pub struct Engine {
    tree: WidgetTree,
    courier: Courier,
    global: Prop,
    pub(crate) subs: SubArena,
    pub(crate) routes: FxHashMap<GraphSubId, SubTarget>,
    bindings: FxHashMap<WidgetId, WidgetBinding>,
    clone_backlinks: FxHashMap<WidgetId, SubId>,
    frame_start: u64,
    refresh_at: Option<u64>,
    events_out: Vec<Rc<str>>,
    options: EngineOptions,
}

impl Engine {
    pub fn new() -> Engine {
        Engine::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Engine {
        let courier = Courier::new();
        let global = Prop::root();
        courier.register_root("global", &global);
        Engine {
            tree: WidgetTree::new(),
            courier,
            global,
            subs: SubArena::default(),
            routes: FxHashMap::default(),
            bindings: FxHashMap::default(),
            clone_backlinks: FxHashMap::default(),
            frame_start: 0,
            refresh_at: None,
            events_out: Vec::new(),
            options,
        }
    }

    /// The global fallback root property paths resolve against.
    pub fn global(&self) -> &Prop {
        &self.global
    }

    pub fn courier(&self) -> &Courier {
        &self.courier
    }

    pub fn tree(&self) -> &WidgetTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut WidgetTree {
        &mut self.tree
    }

    /// Current frame-start timestamp in microseconds.
    pub fn now(&self) -> u64 {
        self.frame_start
    }

    /// Earliest outstanding refresh deadline, for precise embedder sleeps.
    pub fn next_refresh(&self) -> Option<u64> {
        self.refresh_at
    }

    pub(crate) fn schedule_refresh(&mut self, deadline: u64) {
        self.refresh_at = Some(match self.refresh_at {
            Some(d) => d.min(deadline),
            None => deadline,
        });
    }

    pub(crate) fn push_event(&mut self, action: Rc<str>) {
        self.events_out.push(action);
    }

    /// Drain actions fired by `fireEvent()` since the last call.
    pub fn take_events(&mut self) -> Vec<Rc<str>> {
        std::mem::take(&mut self.events_out)
    }

    pub fn create_root_widget(&mut self, class: &'static dyn WidgetClass) -> WidgetId {
        self.tree.create_root(class)
    }

    pub(crate) fn binding_mut(&mut self, w: WidgetId) -> &mut WidgetBinding {
        self.bindings.entry(w).or_default()
    }

    /// Evaluate one statement chain, retaining it as a live expression when
    /// the pass produced re-evaluation flags.
    pub fn eval(&mut self, chain: &Rc<Chain>, ctx: &mut EvalCtx) -> Result<(), EvalError> {
        ctx.dyn_flags = DynFlags::empty();
        eval::eval_chain(self, chain, ctx)?;
        let flags = ctx.dyn_flags;
        if !ctx.passive && !flags.is_empty() {
            if let Some(w) = ctx.widget {
                let scopes = ctx.scopes.clone();
                let binding = self.binding_mut(w);
                match binding
                    .dynamic
                    .iter_mut()
                    .find(|e| Rc::ptr_eq(&e.chain, chain))
                {
                    Some(e) => e.flags = flags,
                    None => {
                        tracing::trace!(?flags, "retaining live expression");
                        binding.dynamic.push(LiveExpr {
                            chain: chain.clone(),
                            flags,
                            scopes,
                        });
                    }
                }
                binding.recompute_mask();
            }
        }
        Ok(())
    }

    /// Evaluate a statement block; the sole entry point for view bodies.
    /// An error aborts the remaining statements.
    pub fn eval_block(&mut self, block: &Rc<Block>, ctx: &mut EvalCtx) -> Result<(), EvalError> {
        for chain in block.exprs() {
            self.eval(chain, ctx)?;
        }
        Ok(())
    }

    /// Apply queued mutations and deliver every pending notification, in
    /// order, until the queue is quiet.
    pub fn pump(&mut self) {
        loop {
            let notes = self.courier.pump();
            if notes.is_empty() {
                return;
            }
            for note in notes {
                match self.routes.get(&note.sub).copied() {
                    Some(SubTarget::Main(id)) => self.deliver_to(id, note.event),
                    Some(SubTarget::VecElement(id, idx)) => {
                        self.deliver_vec_element(id, idx, note.event)
                    }
                    None => {}
                }
            }
        }
    }

    /// Advance the frame clock, re-run per-frame expressions, then pump.
    pub fn frame(&mut self, dt_micros: u64) {
        self.frame_start += dt_micros;
        if self.refresh_at.is_some_and(|d| d <= self.frame_start) {
            self.refresh_at = None;
        }
        let targets: Vec<(WidgetId, Rc<Chain>, Scopes)> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.mask.contains(DynFlags::EVERY_FRAME))
            .flat_map(|(w, b)| {
                b.dynamic
                    .iter()
                    .filter(|e| e.flags.contains(DynFlags::EVERY_FRAME))
                    .map(|e| (*w, e.chain.clone(), e.scopes.clone()))
            })
            .collect();
        for (w, chain, scopes) in targets {
            if self.tree.contains(w) {
                self.reeval_chain(w, chain, scopes);
            }
        }
        self.pump();
    }

    /// Re-run the widget's live expressions that subscribed to `sig`.
    pub fn signal(&mut self, w: WidgetId, sig: Signal) {
        let mask = sig.mask();
        let targets: Vec<(Rc<Chain>, Scopes)> = match self.bindings.get(&w) {
            Some(b) if b.mask.intersects(mask) => b
                .dynamic
                .iter()
                .filter(|e| e.flags.intersects(mask))
                .map(|e| (e.chain.clone(), e.scopes.clone()))
                .collect(),
            _ => return,
        };
        for (chain, scopes) in targets {
            self.reeval_chain(w, chain, scopes);
        }
    }

    /// Move focus and deliver focus-change signals to every widget whose
    /// focus-path membership changed.
    pub fn set_focus(&mut self, id: Option<WidgetId>) {
        let path = |tree: &WidgetTree, mut cur: Option<WidgetId>| {
            let mut out = Vec::new();
            while let Some(c) = cur {
                out.push(c);
                cur = tree.parent(c);
            }
            out
        };
        let old = path(&self.tree, self.tree.focus());
        self.tree.set_focus(id);
        let new = path(&self.tree, self.tree.focus());
        for w in old.iter().chain(new.iter()) {
            let was = old.contains(w);
            let is = new.contains(w);
            if was != is {
                self.signal(*w, Signal::FocusChange);
            }
        }
    }

    /// Embedder-reported readiness; fires the widget-meta signal.
    pub fn set_widget_ready(&mut self, w: WidgetId, ready: bool) {
        if let Some(widget) = self.tree.get_mut(w) {
            widget.ready = ready;
        }
        self.signal(w, Signal::WidgetMeta);
    }

    /// Embedder-reported visibility. Clone entries feed the pagination
    /// predicate from here.
    pub fn set_widget_active(&mut self, w: WidgetId, active: bool) {
        self.tree.set_active(w, active);
        let Some(&sub_id) = self.clone_backlinks.get(&w) else {
            return;
        };
        let st = {
            let Some(sub) = self.subs.get(sub_id) else {
                return;
            };
            let SubKind::Cloner(st) = &sub.kind else {
                return;
            };
            st.clone()
        };
        {
            let mut s = st.borrow_mut();
            if !s.positions_valid {
                s.resequence(&self.tree);
            }
            let Some(pid) = s.by_widget.get(&w).copied() else {
                return;
            };
            let Some(pos) = s.entries.get(&pid).map(|e| e.pos) else {
                return;
            };
            s.note_activity(pos, active);
        }
        self.cloner_check_pagination(sub_id, &st);
    }

    /// Destroy a widget subtree: every subscription, live expression,
    /// cached token and clone entry reachable from it goes synchronously.
    pub fn retire_widget(&mut self, id: WidgetId) {
        let destroyed = self.tree.retire(id);
        for d in destroyed {
            if let Some(sub_id) = self.clone_backlinks.remove(&d) {
                self.detach_clone_entry(sub_id, d);
            }
            if let Some(binding) = self.bindings.remove(&d) {
                for sub_id in binding.subs {
                    self.remove_sub(sub_id);
                }
            }
        }
    }

    /// A clone entry widget destroyed from outside the cloner detaches
    /// from its controller.
    fn detach_clone_entry(&mut self, sub_id: SubId, widget: WidgetId) {
        let Some(sub) = self.subs.get(sub_id) else {
            return;
        };
        let SubKind::Cloner(st) = &sub.kind else {
            return;
        };
        let st = st.clone();
        let mut s = st.borrow_mut();
        if let Some(pid) = s.by_widget.remove(&widget) {
            if let Some(e) = s.entries.remove(&pid) {
                e.clone_root.destroy();
            }
            s.positions_valid = false;
        }
    }

    fn remove_sub(&mut self, id: SubId) {
        let Some(sub) = self.subs.remove(id) else {
            return;
        };
        self.routes.remove(&sub.handle.id());
        tracing::trace!(kind = sub.kind.name(), "destroying subscription");
        match &sub.kind {
            SubKind::Cloner(st) => {
                let entries: Vec<CloneEntry> = {
                    let mut s = st.borrow_mut();
                    let v = s.entries.drain().map(|(_, e)| e).collect();
                    s.by_widget.clear();
                    let _ = s.take_pending();
                    v
                };
                for e in entries {
                    e.clone_root.destroy();
                    self.clone_backlinks.remove(&e.widget);
                    if self.tree.contains(e.widget) {
                        self.retire_widget(e.widget);
                    }
                }
            }
            SubKind::Vectorizer(st) => {
                for h in st.borrow_mut().clear() {
                    self.routes.remove(&h.id());
                }
            }
            SubKind::Value | SubKind::Counter { .. } => {}
        }
    }

    // --- notification delivery -------------------------------------------

    pub(crate) fn deliver_to(&mut self, id: SubId, ev: PropEvent) {
        enum Kind {
            Scalarish,
            Counter,
            Cloner(Rc<RefCell<ClonerState>>),
            Vectorizer(Rc<RefCell<VectorizerState>>),
        }
        let kind = {
            let Some(sub) = self.subs.get(id) else {
                return;
            };
            match &sub.kind {
                SubKind::Value => Kind::Scalarish,
                SubKind::Counter { .. } => Kind::Counter,
                SubKind::Cloner(st) => Kind::Cloner(st.clone()),
                SubKind::Vectorizer(st) => Kind::Vectorizer(st.clone()),
            }
        };
        match kind {
            Kind::Scalarish => self.deliver_value(id, ev),
            Kind::Counter => self.deliver_counter(id, ev),
            Kind::Cloner(st) => self.deliver_cloner(id, st, ev),
            Kind::Vectorizer(st) => self.deliver_vectorizer(id, st, ev),
        }
    }

    fn set_cached(&mut self, id: SubId, t: Token) {
        if let Some(sub) = self.subs.get_mut(id) {
            sub.cached = t;
        }
    }

    fn deliver_value(&mut self, id: SubId, ev: PropEvent) {
        // Every mirrored mutation triggers re-evaluation, including
        // value-identical ones; child events are not value state.
        if let Some(t) = scalar_event_token(&ev) {
            self.set_cached(id, t);
            self.reeval_sub(id);
        }
    }

    fn deliver_counter(&mut self, id: SubId, ev: PropEvent) {
        {
            let Some(sub) = self.subs.get_mut(id) else {
                return;
            };
            let SubKind::Counter { entries } = &mut sub.kind else {
                return;
            };
            match &ev {
                PropEvent::SetVoid
                | PropEvent::SetInt(_)
                | PropEvent::SetFloat(_)
                | PropEvent::SetStr(..)
                | PropEvent::SetLink { .. }
                | PropEvent::SetDirectory
                | PropEvent::Destroyed => *entries = 0,
                PropEvent::AddChild { .. } => *entries += 1,
                PropEvent::AddChildren { children, .. } => *entries += children.len() as i64,
                PropEvent::DelChild { .. } => *entries -= 1,
                _ => {}
            }
            sub.cached = Token::Int(*entries);
        }
        self.reeval_sub(id);
    }

    fn deliver_cloner(&mut self, id: SubId, st: Rc<RefCell<ClonerState>>, ev: PropEvent) {
        match ev {
            PropEvent::SetVoid
            | PropEvent::SetInt(_)
            | PropEvent::SetFloat(_)
            | PropEvent::SetStr(..)
            | PropEvent::SetLink { .. } => {
                self.set_cached(id, Token::Void);
                self.reeval_sub(id);
            }
            PropEvent::SetDirectory => {
                self.set_cached(id, Token::Directory);
                self.reeval_sub(id);
            }
            PropEvent::AddChild {
                child,
                before,
                flags,
            } => {
                let selected = flags.contains(weft_prop::AddFlags::SELECTED);
                self.cloner_add(id, &st, child, before, selected);
            }
            PropEvent::AddChildren { children, before } => {
                for c in children {
                    self.cloner_add(id, &st, c, before.clone(), false);
                }
            }
            PropEvent::MoveChild { child, before } => self.cloner_move(&st, child, before),
            PropEvent::DelChild { child } => self.cloner_del(&st, child),
            PropEvent::SelectChild { child, .. } => self.cloner_select(&st, child),
            PropEvent::SuggestFocus { child } => self.cloner_suggest(&st, child),
            PropEvent::HaveMore(yes) => {
                st.borrow_mut().on_have_more(yes);
                if yes {
                    self.cloner_check_pagination(id, &st);
                }
            }
            PropEvent::Destroyed => {
                self.cloner_discard(&st);
                self.set_cached(id, Token::Void);
                self.reeval_sub(id);
            }
            PropEvent::WantMore => {}
        }
    }

    fn cloner_add(
        &mut self,
        id: SubId,
        st: &Rc<RefCell<ClonerState>>,
        child: Prop,
        before: Option<Prop>,
        selected: bool,
    ) {
        if !st.borrow().is_bound() {
            st.borrow_mut()
                .queue_pending(child, before.map(|b| b.id()), selected);
            return;
        }
        self.cloner_materialize(id, st, child, before, selected);
    }

    pub(crate) fn cloner_materialize(
        &mut self,
        id: SubId,
        st: &Rc<RefCell<ClonerState>>,
        child: Prop,
        before: Option<Prop>,
        selected: bool,
    ) {
        let (class, parent_w, anchor, body, originating, view, args, before_w, pos) = {
            let mut s = st.borrow_mut();
            let (Some(class), Some(body)) = (s.class, s.body.clone()) else {
                return;
            };
            let before_w = before
                .as_ref()
                .and_then(|b| s.entries.get(&b.id()).map(|e| e.widget));
            if before.is_some() {
                s.positions_valid = false;
            }
            let pos = s.entries.len();
            (
                class,
                s.parent_widget,
                s.anchor,
                body,
                s.originating.clone(),
                s.view.clone(),
                s.args.clone(),
                before_w,
                pos,
            )
        };
        let w = self.tree.create(class, parent_w, before_w.or(anchor));
        let clone_root = Prop::root();
        {
            let mut s = st.borrow_mut();
            s.entries.insert(
                child.id(),
                CloneEntry {
                    widget: w,
                    prop: child.clone(),
                    clone_root: clone_root.clone(),
                    pos,
                },
            );
            s.by_widget.insert(w, child.id());
        }
        self.clone_backlinks.insert(w, id);
        if selected {
            self.tree.select_child(parent_w, Some(w));
        }

        let fresh = body.fresh_copy();
        let scopes = Scopes {
            self_: Some(child),
            parent: originating,
            view,
            clone: Some(clone_root),
            args,
        };
        let mut ctx = EvalCtx {
            widget: Some(w),
            scopes,
            passive: false,
            dyn_flags: DynFlags::empty(),
            target: None,
        };
        if let Err(e) = self.eval_block(&fresh, &mut ctx) {
            tracing::debug!(error = %e, "clone template evaluation failed");
        }
    }

    fn cloner_move(&mut self, st: &Rc<RefCell<ClonerState>>, child: Prop, before: Option<Prop>) {
        if !st.borrow().is_bound() {
            st.borrow_mut()
                .move_pending(child.id(), before.map(|b| b.id()));
            return;
        }
        let (widget, before_w, anchor) = {
            let mut s = st.borrow_mut();
            let Some(e) = s.entries.get(&child.id()) else {
                return;
            };
            let widget = e.widget;
            let before_w = before
                .as_ref()
                .and_then(|b| s.entries.get(&b.id()).map(|e| e.widget));
            s.positions_valid = false;
            (widget, before_w, s.anchor)
        };
        self.tree.move_before(widget, before_w.or(anchor));
    }

    fn cloner_del(&mut self, st: &Rc<RefCell<ClonerState>>, child: Prop) {
        if st.borrow_mut().remove_pending(child.id()) {
            return;
        }
        let entry = {
            let mut s = st.borrow_mut();
            let Some(e) = s.entries.remove(&child.id()) else {
                return;
            };
            s.by_widget.remove(&e.widget);
            e
        };
        let has_next = self
            .tree
            .index_in_parent(entry.widget)
            .and_then(|i| {
                let parent = self.tree.parent(entry.widget)?;
                Some(i + 1 < self.tree.children(parent).len())
            })
            .unwrap_or(false);
        if has_next {
            st.borrow_mut().positions_valid = false;
        }
        entry.clone_root.destroy();
        self.retire_widget(entry.widget);
    }

    fn cloner_select(&mut self, st: &Rc<RefCell<ClonerState>>, child: Option<Prop>) {
        let parent_w = st.borrow().parent_widget;
        match child {
            None => self.tree.select_child(parent_w, None),
            Some(p) => {
                let found = st.borrow().entries.get(&p.id()).map(|e| e.widget);
                match found {
                    Some(w) => {
                        self.tree.select_child(parent_w, Some(w));
                        st.borrow_mut().pending_select = None;
                    }
                    None => st.borrow_mut().pending_select = Some(p),
                }
            }
        }
    }

    fn cloner_suggest(&mut self, st: &Rc<RefCell<ClonerState>>, child: Prop) {
        let found = st.borrow().entries.get(&child.id()).map(|e| e.widget);
        if let Some(w) = found {
            self.set_focus(Some(w));
        }
    }

    fn cloner_discard(&mut self, st: &Rc<RefCell<ClonerState>>) {
        let entries: Vec<CloneEntry> = {
            let mut s = st.borrow_mut();
            let v = s.entries.drain().map(|(_, e)| e).collect();
            s.by_widget.clear();
            let _ = s.take_pending();
            v
        };
        for e in entries {
            e.clone_root.destroy();
            self.clone_backlinks.remove(&e.widget);
            if self.tree.contains(e.widget) {
                self.retire_widget(e.widget);
            }
        }
    }

    /// Install the template and drain the pending queue in arrival order.
    pub(crate) fn cloner_bind(
        &mut self,
        id: SubId,
        st: &Rc<RefCell<ClonerState>>,
        class: &'static dyn WidgetClass,
        body: Rc<Block>,
        anchor: WidgetId,
    ) {
        tracing::debug!("binding cloner template");
        self.cloner_discard(st);
        let (pending, select) = {
            let mut s = st.borrow_mut();
            s.anchor = Some(anchor);
            s.class = Some(class);
            s.body = Some(body);
            s.take_pending()
        };
        for p in pending {
            let selected = select.as_ref().is_some_and(|sel| *sel == p);
            self.cloner_materialize(id, st, p, None, selected);
        }
    }

    pub(crate) fn cloner_state(&self, id: SubId) -> Option<(bool, Rc<RefCell<ClonerState>>)> {
        let sub = self.subs.get(id)?;
        let SubKind::Cloner(st) = &sub.kind else {
            return None;
        };
        Some((matches!(sub.cached, Token::Directory), st.clone()))
    }

    fn cloner_check_pagination(&mut self, id: SubId, st: &Rc<RefCell<ClonerState>>) {
        let fire = st
            .borrow_mut()
            .pagination_check(self.options.pagination_threshold);
        if fire {
            tracing::debug!("requesting more children upstream");
            if let Some(sub) = self.subs.get(id) {
                sub.target.want_more();
            }
        }
    }

    fn deliver_vectorizer(&mut self, id: SubId, st: Rc<RefCell<VectorizerState>>, ev: PropEvent) {
        match ev {
            PropEvent::SetVoid
            | PropEvent::SetInt(_)
            | PropEvent::SetFloat(_)
            | PropEvent::SetStr(..)
            | PropEvent::SetLink { .. } => {
                for h in st.borrow_mut().clear() {
                    self.routes.remove(&h.id());
                }
                if let Some(t) = scalar_event_token(&ev) {
                    self.set_cached(id, t);
                }
                self.reeval_sub(id);
            }
            PropEvent::SetDirectory => {
                let tok = st.borrow_mut().rebuild();
                self.set_cached(id, tok);
            }
            PropEvent::AddChild {
                child,
                before,
                flags,
            } => {
                let selected = flags.contains(weft_prop::AddFlags::SELECTED);
                self.vec_add(id, &st, child, before, selected);
            }
            PropEvent::AddChildren { children, before } => {
                for c in children {
                    self.vec_add(id, &st, c, before.clone(), false);
                }
            }
            PropEvent::MoveChild { child, before } => {
                st.borrow_mut()
                    .move_before(child.id(), before.map(|b| b.id()));
                self.reeval_sub(id);
            }
            PropEvent::DelChild { child } => {
                if let Some(h) = st.borrow_mut().remove(child.id()) {
                    self.routes.remove(&h.id());
                }
                self.reeval_sub(id);
            }
            PropEvent::SelectChild {
                child: Some(child), ..
            } => {
                if st.borrow_mut().select(child.id()) {
                    self.reeval_sub(id);
                }
            }
            PropEvent::Destroyed => {
                for h in st.borrow_mut().clear() {
                    self.routes.remove(&h.id());
                }
                let tok = st.borrow_mut().rebuild();
                self.set_cached(id, tok);
                self.reeval_sub(id);
            }
            _ => {}
        }
    }

    fn vec_add(
        &mut self,
        id: SubId,
        st: &Rc<RefCell<VectorizerState>>,
        child: Prop,
        before: Option<Prop>,
        selected: bool,
    ) {
        let (handle, snapshot) = child.subscribe(&self.courier);
        let gid = handle.id();
        let mut token = Token::Void;
        for ev in &snapshot {
            if let Some(t) = scalar_event_token(ev) {
                token = match t {
                    Token::Directory => Token::Void,
                    other => other,
                };
            }
        }
        let idx = st
            .borrow_mut()
            .insert(child, before.map(|b| b.id()), handle, token, selected);
        self.routes.insert(gid, SubTarget::VecElement(id, idx));
        self.reeval_sub(id);
    }

    fn deliver_vec_element(&mut self, id: SubId, idx: usize, ev: PropEvent) {
        let st = {
            let Some(sub) = self.subs.get(id) else {
                return;
            };
            let SubKind::Vectorizer(st) = &sub.kind else {
                return;
            };
            st.clone()
        };
        let Some(t) = scalar_event_token(&ev) else {
            return;
        };
        let t = match t {
            Token::Directory => Token::Void,
            other => other,
        };
        st.borrow_mut().set_token(idx, t);
        self.reeval_sub(id);
    }

    // --- re-evaluation ----------------------------------------------------

    pub(crate) fn reeval_sub(&mut self, id: SubId) {
        let (owner, chain, scopes) = {
            let Some(sub) = self.subs.get(id) else {
                return;
            };
            let Some(chain) = sub.chain.clone() else {
                return;
            };
            (sub.owner, chain, sub.scopes.clone())
        };
        if !self.tree.contains(owner) {
            return;
        }
        self.reeval_chain(owner, chain, scopes);
    }

    fn reeval_chain(&mut self, owner: WidgetId, chain: Rc<Chain>, scopes: Scopes) {
        let mut ctx = EvalCtx {
            widget: Some(owner),
            scopes,
            passive: false,
            dyn_flags: DynFlags::empty(),
            target: None,
        };
        if let Err(e) = eval::eval_chain(self, &chain, &mut ctx) {
            tracing::debug!(error = %e, "dynamic re-evaluation failed");
        }
        if let Some(b) = self.bindings.get_mut(&owner) {
            b.update_flags(&chain, ctx.dyn_flags);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
