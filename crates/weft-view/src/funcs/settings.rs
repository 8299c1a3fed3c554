#![forbid(unsafe_code)]

//! The settings binding: `multiopt`.
//!
//! Materializes a radio-style option group under a settings node and keeps
//! it synchronized with a dynamic candidate set across calls: options are
//! mark-swept by value, the user's stored choice wins over the default
//! first option, and the chosen value is mirrored into the destination
//! property. The call site stays alive through `KEEP_ALIVE` even when no
//! other flag is produced.

use super::{FnResult, arg_as_prop, with_state};
use crate::chain::{Chain, OpNode};
use crate::dynamic::DynFlags;
use crate::engine::Engine;
use crate::eval::{self, EvalCtx, Operand};
use crate::token::Token;
use std::rc::Rc;
use weft_prop::Prop;

#[derive(Debug)]
struct MultioptItem {
    value: Rc<str>,
    title: Rc<str>,
    prop: Option<Prop>,
    mark: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MultioptState {
    settings: Option<Prop>,
    opts: Option<Prop>,
    title: Option<Prop>,
    current_title: Option<Prop>,
    value: Option<Prop>,
    storage: Option<Prop>,
    items: Vec<MultioptItem>,
}

impl Drop for MultioptState {
    fn drop(&mut self) {
        for item in &self.items {
            if let Some(p) = &item.prop {
                p.destroy();
            }
        }
    }
}

/// Candidate option gathered from the arguments, in priority order.
struct Candidate {
    value: Rc<str>,
    title: Rc<str>,
}

fn push_candidate(out: &mut Vec<Candidate>, value: &Rc<str>, title: &Rc<str>) {
    if out.iter().any(|c| c.value == *value) {
        return;
    }
    out.push(Candidate {
        value: value.clone(),
        title: title.clone(),
    });
}

pub(crate) fn f_multiopt(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let dst = arg_as_prop(engine, ctx, chain, "multiopt", node, &args[0])?;
    let settings = arg_as_prop(engine, ctx, chain, "multiopt", node, &args[1])?;
    let title_tok = eval::resolve_value(engine, ctx, chain, args[2].clone(), &node.pos)?;
    let storage = arg_as_prop(engine, ctx, chain, "multiopt", node, &args[3])?;

    // Gather candidates. Links count directly; vectors contribute their
    // selected link first, then the rest. A vector whose selected element
    // is not a link only contributes unselected links, after everything
    // else.
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut deferred: Vec<Token> = Vec::new();
    for arg in &args[4..] {
        let d = eval::resolve_value(engine, ctx, chain, arg.clone(), &node.pos)?;
        match &d {
            Token::Link { title, url } => push_candidate(&mut candidates, url, title),
            Token::Vector(items) => {
                let selected_is_link = items
                    .iter()
                    .all(|i| !i.selected || matches!(i.value, Token::Link { .. }));
                if !selected_is_link {
                    deferred.push(d.clone());
                    continue;
                }
                for i in items.iter().filter(|i| i.selected) {
                    if let Token::Link { title, url } = &i.value {
                        push_candidate(&mut candidates, url, title);
                    }
                }
                for i in items.iter().filter(|i| !i.selected) {
                    if let Token::Link { title, url } = &i.value {
                        push_candidate(&mut candidates, url, title);
                    }
                }
            }
            _ => {}
        }
    }
    for d in &deferred {
        if let Token::Vector(items) = d {
            for i in items.iter().filter(|i| !i.selected) {
                if let Token::Link { title, url } = &i.value {
                    push_candidate(&mut candidates, url, title);
                }
            }
        }
    }

    let userval: Option<Rc<str>> = storage
        .value()
        .as_str()
        .map(Rc::from);

    with_state::<MultioptState, _>(node, "multiopt", |st| {
        if st.settings.as_ref() != Some(&settings) {
            // New settings target: forget the previously materialized
            // subtree.
            for item in &mut st.items {
                if let Some(p) = item.prop.take() {
                    p.destroy();
                }
            }
            st.title = Some(settings.create("metadata").create("title"));
            settings.create("type").set_str("multiopt");
            st.opts = Some(settings.create("options"));
            st.current_title = Some(settings.create("current").create("title"));
            st.value = Some(settings.create("value"));
            st.settings = Some(settings.clone());
        }
        if st.storage.as_ref() != Some(&storage) {
            st.storage = Some(storage.clone());
        }

        if let (Some(tp), Some(title)) = (&st.title, title_tok.as_str()) {
            tp.set_str(title);
        }

        // Mark-sweep merge of the candidate set.
        for item in &mut st.items {
            item.mark = true;
        }
        for c in &candidates {
            match st.items.iter_mut().find(|i| i.value == c.value) {
                Some(item) => {
                    item.mark = false;
                    item.title = c.title.clone();
                }
                None => st.items.push(MultioptItem {
                    value: c.value.clone(),
                    title: c.title.clone(),
                    prop: None,
                    mark: false,
                }),
            }
        }
        st.items.retain(|item| {
            if item.mark {
                if let Some(p) = &item.prop {
                    p.destroy();
                }
                false
            } else {
                true
            }
        });

        // Materialize under the options directory, preserving item order.
        if let Some(opts) = &st.opts {
            for item in &mut st.items {
                match &item.prop {
                    None => {
                        let q = opts.create(&item.value);
                        q.create("title").set_str(&item.title);
                        item.prop = Some(q);
                    }
                    Some(p) => opts.move_before(p, None),
                }
            }
        }

        // User preference wins; otherwise the first candidate.
        let cur = st
            .items
            .iter()
            .find(|i| userval.as_ref().is_some_and(|u| *u == i.value))
            .or_else(|| st.items.first());
        if let Some(cur) = cur {
            if let Some(v) = &st.value {
                v.set_str(&cur.value);
            }
            if let Some(t) = &st.current_title {
                t.set_str(&cur.title);
            }
            if let (Some(opts), Some(p)) = (&st.opts, &cur.prop) {
                opts.select(Some(p), None);
            }
            dst.set_str(&cur.value);
        }
    })?;

    ctx.dyn_flags |= DynFlags::KEEP_ALIVE;
    Ok(None)
}
