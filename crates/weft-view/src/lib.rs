#![forbid(unsafe_code)]

//! weft-view: the reactive view-binding engine.
//!
//! Compiled expression chains evaluate against the live property graph
//! ([`weft_prop`]) and keep a widget tree ([`weft_widgets`]) in sync.
//! Expressions subscribe to the data they read, cache the last known value
//! as a typed token, and are selectively re-evaluated when dependencies
//! change — the whole view never re-runs.
//!
//! The interesting pieces:
//!
//! - [`Token`]: the tagged value unit flowing through evaluation.
//! - [`ChainBuilder`] / [`BlockBuilder`]: construct RPN chains (the view
//!   compiler that would emit these is not part of this crate).
//! - [`Engine`]: owns the widget tree and subscription arena, pumps the
//!   courier, and re-runs live expressions.
//! - The subscription bridge's four disciplines: scalar value mirror,
//!   child counter, list cloner, and vectorizer.

pub mod bridge;
pub mod chain;
mod cloner;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod eval;
pub mod funcs;
pub mod token;
mod vectorizer;

pub use bridge::{SubDiscipline, SubId};
pub use chain::{Block, BlockBuilder, Chain, ChainBuilder, Op, PropPath};
pub use dynamic::{DynFlags, Signal};
pub use engine::{Engine, EngineOptions};
pub use error::{ErrorKind, EvalError, Pos};
pub use eval::{EvalCtx, Operand, Scopes};
pub use funcs::{Arity, FuncDef, lookup, registered_names};
pub use token::{FloatVec, PropOwner, Token, VecItem};
