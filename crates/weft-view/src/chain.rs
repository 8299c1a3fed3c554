#![forbid(unsafe_code)]

//! Compiled expression chains.
//!
//! A [`Chain`] is one statement in flat RPN order; a [`Block`] is an ordered
//! list of chains. The view-language compiler that would produce these is
//! out of scope, so chains are built through [`ChainBuilder`] /
//! [`BlockBuilder`].
//!
//! Each op node carries a private state slot: the cached subscription id of
//! a property path, or the persistent per-call-site state of a stateful
//! registry function. State never survives [`Chain::fresh_copy`], which is
//! how clones of a template get their own subscriptions and filter state.

use crate::error::{ErrorKind, EvalError, Pos};
use crate::funcs::{self, FuncDef};
use crate::token::Token;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use weft_prop::Prop;

/// A property path, resolved against the named scope roots at evaluation
/// time. The head segment selects the root (`self`, `parent`, `view`,
/// `clone`, `args`); any other head falls back to the global root.
#[derive(Debug, Clone)]
pub struct PropPath {
    pub segments: smallvec::SmallVec<[Rc<str>; 4]>,
}

impl PropPath {
    pub fn new(segments: &[&str]) -> PropPath {
        PropPath {
            segments: segments.iter().map(|s| Rc::from(*s)).collect(),
        }
    }
}

impl fmt::Display for PropPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{s}")?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub enum Op {
    /// Push a literal.
    Const(Token),
    /// Push a property path (subscribed on first resolve).
    Path(PropPath),
    /// Push a widget attribute name.
    Attr(Rc<str>),
    /// Push an identifier.
    Ident(Rc<str>),
    /// Push an unevaluated block.
    BlockVal(Rc<Block>),
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Xor,
    Not,
    Eq,
    Ne,
    Lt,
    Gt,
    /// `??`: right side if the left resolves to void.
    Coalesce,
    /// `=` / `?=`. The conditional form ignores a void right side.
    Assign { conditional: bool },
    /// Pop `n` operands into a vector.
    MakeVector(usize),
    Call { func: &'static FuncDef, argc: usize },
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Const(t) => write!(f, "Const({})", t.type_name()),
            Op::Path(p) => write!(f, "Path({p})"),
            Op::Attr(a) => write!(f, "Attr({a})"),
            Op::Ident(i) => write!(f, "Ident({i})"),
            Op::BlockVal(_) => write!(f, "Block"),
            Op::Call { func, argc } => write!(f, "Call({}, {argc})", func.name),
            Op::Assign { conditional } => write!(f, "Assign(conditional={conditional})"),
            Op::MakeVector(n) => write!(f, "MakeVector({n})"),
            other => write!(f, "{}", op_name(other)),
        }
    }
}

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::Add => "Add",
        Op::Subtract => "Subtract",
        Op::Multiply => "Multiply",
        Op::Divide => "Divide",
        Op::Modulo => "Modulo",
        Op::And => "And",
        Op::Or => "Or",
        Op::Xor => "Xor",
        Op::Not => "Not",
        Op::Eq => "Eq",
        Op::Ne => "Ne",
        Op::Lt => "Lt",
        Op::Gt => "Gt",
        Op::Coalesce => "Coalesce",
        _ => "Op",
    }
}

/// Per-node private state.
pub(crate) enum OpState {
    Empty,
    /// Cached subscription for a `Path` op.
    Sub(crate::bridge::SubId),
    /// Persistent call-site state of a stateful function.
    Func(Box<dyn Any>),
}

pub struct OpNode {
    pub op: Op,
    pub pos: Pos,
    pub(crate) state: RefCell<OpState>,
}

impl OpNode {
    fn new(op: Op, pos: Pos) -> OpNode {
        let state = match &op {
            Op::Call { func, .. } => match func.ctor {
                Some(ctor) => OpState::Func(ctor()),
                None => OpState::Empty,
            },
            _ => OpState::Empty,
        };
        OpNode {
            op,
            pos,
            state: RefCell::new(state),
        }
    }

    pub(crate) fn cached_sub(&self) -> Option<crate::bridge::SubId> {
        match &*self.state.borrow() {
            OpState::Sub(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Debug for OpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.op, self.pos)
    }
}

/// One RPN-ordered statement.
#[derive(Debug)]
pub struct Chain {
    pub(crate) ops: Vec<OpNode>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Deep copy with all per-node state reset. Clones of a cloner template
    /// go through this so every materialized entry owns its subscriptions
    /// and filter state.
    pub fn fresh_copy(self: &Rc<Chain>) -> Rc<Chain> {
        Rc::new(Chain {
            ops: self
                .ops
                .iter()
                .map(|n| {
                    let op = match &n.op {
                        Op::BlockVal(b) => Op::BlockVal(b.fresh_copy()),
                        other => other.clone(),
                    };
                    OpNode::new(op, n.pos.clone())
                })
                .collect(),
        })
    }
}

/// An ordered list of statements, evaluated top to bottom.
#[derive(Debug)]
pub struct Block {
    pub(crate) exprs: Vec<Rc<Chain>>,
}

impl Block {
    pub fn exprs(&self) -> &[Rc<Chain>] {
        &self.exprs
    }

    pub fn fresh_copy(self: &Rc<Block>) -> Rc<Block> {
        Rc::new(Block {
            exprs: self.exprs.iter().map(|c| c.fresh_copy()).collect(),
        })
    }
}

enum PendingOp {
    Ready(Op),
    Call { name: String, argc: usize },
}

/// Builder for one statement chain.
pub struct ChainBuilder {
    pos: Pos,
    ops: Vec<(PendingOp, Pos)>,
}

impl ChainBuilder {
    pub fn new(file: &str, line: u32) -> ChainBuilder {
        ChainBuilder {
            pos: Pos::new(file, line),
            ops: Vec::new(),
        }
    }

    fn push(mut self, op: Op) -> Self {
        let pos = self.pos.clone();
        self.ops.push((PendingOp::Ready(op), pos));
        self
    }

    /// Advance the recorded source line for subsequent ops.
    pub fn line(mut self, line: u32) -> Self {
        self.pos.line = line;
        self
    }

    pub fn void(self) -> Self {
        self.push(Op::Const(Token::Void))
    }

    pub fn int(self, v: i64) -> Self {
        self.push(Op::Const(Token::Int(v)))
    }

    pub fn float(self, v: f64) -> Self {
        self.push(Op::Const(Token::Float(v)))
    }

    pub fn str(self, s: &str) -> Self {
        self.push(Op::Const(Token::Str(
            Rc::from(s),
            weft_prop::StrKind::Plain,
        )))
    }

    /// String literal carrying rich inline markup.
    pub fn rich(self, s: &str) -> Self {
        self.push(Op::Const(Token::Str(Rc::from(s), weft_prop::StrKind::Rich)))
    }

    pub fn link(self, title: &str, url: &str) -> Self {
        self.push(Op::Const(Token::Link {
            title: Rc::from(title),
            url: Rc::from(url),
        }))
    }

    pub fn prop_ref(self, prop: &Prop) -> Self {
        self.push(Op::Const(Token::PropRef(prop.clone())))
    }

    pub fn ident(self, name: &str) -> Self {
        self.push(Op::Ident(Rc::from(name)))
    }

    pub fn attr(self, name: &str) -> Self {
        self.push(Op::Attr(Rc::from(name)))
    }

    pub fn path(self, segments: &[&str]) -> Self {
        self.push(Op::Path(PropPath::new(segments)))
    }

    pub fn block(self, block: Rc<Block>) -> Self {
        self.push(Op::BlockVal(block))
    }

    pub fn add(self) -> Self {
        self.push(Op::Add)
    }

    pub fn subtract(self) -> Self {
        self.push(Op::Subtract)
    }

    pub fn multiply(self) -> Self {
        self.push(Op::Multiply)
    }

    pub fn divide(self) -> Self {
        self.push(Op::Divide)
    }

    pub fn modulo(self) -> Self {
        self.push(Op::Modulo)
    }

    pub fn and(self) -> Self {
        self.push(Op::And)
    }

    pub fn or(self) -> Self {
        self.push(Op::Or)
    }

    pub fn xor(self) -> Self {
        self.push(Op::Xor)
    }

    pub fn not(self) -> Self {
        self.push(Op::Not)
    }

    pub fn eq(self) -> Self {
        self.push(Op::Eq)
    }

    pub fn ne(self) -> Self {
        self.push(Op::Ne)
    }

    pub fn lt(self) -> Self {
        self.push(Op::Lt)
    }

    pub fn gt(self) -> Self {
        self.push(Op::Gt)
    }

    pub fn coalesce(self) -> Self {
        self.push(Op::Coalesce)
    }

    pub fn assign(self) -> Self {
        self.push(Op::Assign { conditional: false })
    }

    pub fn assign_if_set(self) -> Self {
        self.push(Op::Assign { conditional: true })
    }

    pub fn make_vector(self, n: usize) -> Self {
        self.push(Op::MakeVector(n))
    }

    pub fn call(mut self, name: &str, argc: usize) -> Self {
        let pos = self.pos.clone();
        self.ops.push((
            PendingOp::Call {
                name: name.to_owned(),
                argc,
            },
            pos,
        ));
        self
    }

    /// Resolve function names and produce the chain. Unknown names and
    /// arity violations fail here, before anything evaluates.
    pub fn build(self) -> Result<Rc<Chain>, EvalError> {
        let mut ops = Vec::with_capacity(self.ops.len());
        for (op, pos) in self.ops {
            let op = match op {
                PendingOp::Ready(op) => op,
                PendingOp::Call { name, argc } => {
                    let func = funcs::lookup(&name).ok_or_else(|| {
                        EvalError::new(ErrorKind::UnknownFunction(name.clone()), pos.clone())
                    })?;
                    if !func.arity.accepts(argc) {
                        return Err(EvalError::new(
                            ErrorKind::ArityMismatch {
                                func: func.name,
                                expected: func.arity.to_string(),
                                got: argc,
                            },
                            pos,
                        ));
                    }
                    Op::Call { func, argc }
                }
            };
            ops.push(OpNode::new(op, pos));
        }
        Ok(Rc::new(Chain { ops }))
    }
}

/// Builder for a statement block.
#[derive(Default)]
pub struct BlockBuilder {
    exprs: Vec<Rc<Chain>>,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        BlockBuilder::default()
    }

    pub fn expr(mut self, chain: Rc<Chain>) -> Self {
        self.exprs.push(chain);
        self
    }

    pub fn build(self) -> Rc<Block> {
        Rc::new(Block { exprs: self.exprs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_ops_in_order() {
        let chain = ChainBuilder::new("t.view", 1)
            .int(1)
            .int(2)
            .add()
            .build()
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert!(matches!(chain.ops[2].op, Op::Add));
    }

    #[test]
    fn unknown_function_fails_at_build() {
        let err = ChainBuilder::new("t.view", 3)
            .int(1)
            .call("nosuchfn", 1)
            .build()
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownFunction(_)));
        assert_eq!(err.pos.line, 3);
    }

    #[test]
    fn arity_checked_at_build() {
        let err = ChainBuilder::new("t.view", 1)
            .int(1)
            .call("isVoid", 2)
            .build()
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ArityMismatch { .. }));
    }

    #[test]
    fn fresh_copy_resets_state() {
        let chain = ChainBuilder::new("t.view", 1)
            .path(&["self", "x"])
            .build()
            .unwrap();
        // Simulate a resolved path by poking state.
        *chain.ops[0].state.borrow_mut() = OpState::Sub(crate::bridge::SubId::DANGLING);
        let copy = chain.fresh_copy();
        assert!(copy.ops[0].cached_sub().is_none());
        assert!(chain.ops[0].cached_sub().is_some());
    }

    #[test]
    fn line_tracks_positions_per_op() {
        let chain = ChainBuilder::new("t.view", 1)
            .int(1)
            .line(7)
            .int(2)
            .build()
            .unwrap();
        assert_eq!(chain.ops[0].pos.line, 1);
        assert_eq!(chain.ops[1].pos.line, 7);
    }
}
