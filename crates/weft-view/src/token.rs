#![forbid(unsafe_code)]

//! The token model.
//!
//! A [`Token`] is the value/result unit of the evaluator: every literal,
//! intermediate and cached subscription value is one of these. Tokens
//! produced during a pass live on the pass's operand stack and die with it;
//! tokens moved into a subscription cache persist until superseded.

use crate::bridge::SubId;
use crate::chain::Block;
use std::rc::Rc;
use weft_prop::{Prop, PropValue, StrKind};

/// Float vector of one to four elements, arity-carrying.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatVec {
    elems: [f64; 4],
    len: u8,
}

impl FloatVec {
    /// Build from a slice. Returns `None` outside 1..=4 elements.
    pub fn from_slice(v: &[f64]) -> Option<FloatVec> {
        if v.is_empty() || v.len() > 4 {
            return None;
        }
        let mut elems = [0.0; 4];
        elems[..v.len()].copy_from_slice(v);
        Some(FloatVec {
            elems,
            len: v.len() as u8,
        })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.elems[..self.len as usize]
    }
}

/// One element of a generic vector token. The vectorizer marks the
/// collection's selected entry.
#[derive(Debug, Clone)]
pub struct VecItem {
    pub value: Token,
    pub selected: bool,
}

/// A freshly created property root owned by the token. The root is
/// destroyed when the last owner clone is dropped; clones share the single
/// ownership unit rather than duplicating it.
#[derive(Debug, Clone)]
pub struct PropOwner {
    guard: Rc<OwnerGuard>,
}

#[derive(Debug)]
struct OwnerGuard {
    prop: Prop,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        self.prop.destroy();
    }
}

impl PropOwner {
    pub fn new(prop: Prop) -> PropOwner {
        PropOwner {
            guard: Rc::new(OwnerGuard { prop }),
        }
    }

    pub fn prop(&self) -> &Prop {
        &self.guard.prop
    }
}

#[derive(Debug, Clone)]
pub enum Token {
    Void,
    Int(i64),
    Float(f64),
    Str(Rc<str>, StrKind),
    Link { title: Rc<str>, url: Rc<str> },
    VecFloat(FloatVec),
    Vector(Rc<Vec<VecItem>>),
    PropRef(Prop),
    PropOwner(PropOwner),
    Directory,
    /// Deferred action descriptor produced by `event()`.
    Event(Rc<str>),
    /// Unevaluated sub-expression.
    Block(Rc<Block>),
    Identifier(Rc<str>),
    /// Widget attribute name (assignment target).
    Attr(Rc<str>),
    /// Handle to a bridge subscription; intermediate resolution product.
    SubRef(SubId),
}

impl Token {
    pub fn type_name(&self) -> &'static str {
        match self {
            Token::Void => "void",
            Token::Int(_) => "int",
            Token::Float(_) => "float",
            Token::Str(..) => "string",
            Token::Link { .. } => "link",
            Token::VecFloat(_) => "float-vector",
            Token::Vector(_) => "vector",
            Token::PropRef(_) => "property",
            Token::PropOwner(_) => "property-owner",
            Token::Directory => "directory",
            Token::Event(_) => "event",
            Token::Block(_) => "block",
            Token::Identifier(_) => "identifier",
            Token::Attr(_) => "attribute",
            Token::SubRef(_) => "subscription",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Token::Int(_) | Token::Float(_))
    }

    /// Numeric coercion; non-numerics read as 0.
    pub fn as_float(&self) -> f64 {
        match self {
            Token::Int(v) => *v as f64,
            Token::Float(v) => *v,
            _ => 0.0,
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Token::Int(v) => *v,
            Token::Float(v) => *v as i64,
            _ => 0,
        }
    }

    /// String content. Links yield their title.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Token::Str(s, _) => Some(s),
            Token::Link { title, .. } => Some(title),
            _ => None,
        }
    }

    /// Truthiness: void is false, strings by non-emptiness, numbers by
    /// non-zero, the identifier `true` is true, everything else is true.
    pub fn truthy(&self) -> bool {
        match self {
            Token::Void => false,
            Token::Int(v) => *v != 0,
            Token::Float(v) => *v != 0.0,
            Token::Str(s, _) => !s.is_empty(),
            Token::Identifier(s) => &**s == "true",
            _ => true,
        }
    }

    /// Mirror a property scalar state into a token.
    pub fn from_prop_value(v: &PropValue) -> Token {
        match v {
            PropValue::Void => Token::Void,
            PropValue::Int(i) => Token::Int(*i),
            PropValue::Float(f) => Token::Float(*f),
            PropValue::Str(s, k) => Token::Str(s.clone(), *k),
            PropValue::Link { title, url } => Token::Link {
                title: title.clone(),
                url: url.clone(),
            },
            PropValue::Directory => Token::Directory,
        }
    }
}
