#![forbid(unsafe_code)]

//! Subscription bridge types.
//!
//! A [`Sub`] connects one property-graph location to one point in an
//! expression chain. Four disciplines share the record: a plain value
//! mirror, a child counter, the cloner (which drives list
//! materialization), and the vectorizer (which flattens children into one
//! vector token). Event dispatch lives on the engine; this module holds
//! the data model and the scalar-event mapping shared by the disciplines.

use crate::chain::Chain;
use crate::cloner::ClonerState;
use crate::error::Pos;
use crate::eval::Scopes;
use crate::token::Token;
use crate::vectorizer::VectorizerState;
use std::cell::RefCell;
use std::rc::Rc;
use weft_prop::{Prop, PropEvent, SubHandle};
use weft_widgets::WidgetId;

/// Handle to one bridge subscription (index + generation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl SubId {
    /// Sentinel that never resolves; used by tests.
    pub(crate) const DANGLING: SubId = SubId {
        index: u32::MAX,
        generation: u32::MAX,
    };
}

pub(crate) enum SubKind {
    Value,
    Counter { entries: i64 },
    Cloner(Rc<RefCell<ClonerState>>),
    Vectorizer(Rc<RefCell<VectorizerState>>),
}

impl SubKind {
    pub fn name(&self) -> &'static str {
        match self {
            SubKind::Value => "value",
            SubKind::Counter { .. } => "counter",
            SubKind::Cloner(_) => "cloner",
            SubKind::Vectorizer(_) => "vectorizer",
        }
    }
}

/// Requested discipline when a path op is first resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubDiscipline {
    Value,
    Counter,
    Cloner,
    Vectorizer,
}

pub(crate) struct Sub {
    pub kind: SubKind,
    pub owner: WidgetId,
    /// The subscribed node; kept for upstream requests (want-more).
    pub target: Prop,
    pub handle: SubHandle,
    /// Last known value. Survives passes until superseded.
    pub cached: Token,
    /// Chain to re-run on change; `None` for passive evaluation.
    pub chain: Option<Rc<Chain>>,
    pub scopes: Scopes,
    pub pos: Pos,
}

#[derive(Default)]
struct SubSlot {
    generation: u32,
    sub: Option<Sub>,
}

/// Generational arena of bridge subscriptions.
#[derive(Default)]
pub(crate) struct SubArena {
    slots: Vec<SubSlot>,
    free: Vec<u32>,
}

impl SubArena {
    pub fn insert(&mut self, sub: Sub) -> SubId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.sub = Some(sub);
            SubId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(SubSlot {
                generation: 0,
                sub: Some(sub),
            });
            SubId {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, id: SubId) -> Option<&Sub> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.sub.as_ref()
    }

    pub fn get_mut(&mut self, id: SubId) -> Option<&mut Sub> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.sub.as_mut()
    }

    pub fn remove(&mut self, id: SubId) -> Option<Sub> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let sub = slot.sub.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(sub)
    }
}

/// Map a scalar mutation event onto its mirrored token, if it is one.
/// `Destroyed` degrades to void.
pub(crate) fn scalar_event_token(ev: &PropEvent) -> Option<Token> {
    match ev {
        PropEvent::SetVoid => Some(Token::Void),
        PropEvent::SetInt(v) => Some(Token::Int(*v)),
        PropEvent::SetFloat(v) => Some(Token::Float(*v)),
        PropEvent::SetStr(s, k) => Some(Token::Str(s.clone(), *k)),
        PropEvent::SetLink { title, url } => Some(Token::Link {
            title: title.clone(),
            url: url.clone(),
        }),
        PropEvent::SetDirectory => Some(Token::Directory),
        PropEvent::Destroyed => Some(Token::Void),
        _ => None,
    }
}
