#![forbid(unsafe_code)]

//! The stack-machine evaluator.
//!
//! One pass walks a flat RPN chain left to right with a small operand
//! stack. Operands stay unresolved (a chain-node reference for property
//! paths) until a consumer forces them; forcing a path creates the
//! subscription with the discipline the consumer asks for and reads the
//! cached token. Numeric promotion: int op int stays int except division,
//! any float makes it float, void reads as zero. Vector arithmetic
//! requires equal arity.

use crate::bridge::{Sub, SubDiscipline, SubId, SubKind};
use crate::chain::{Chain, Op, OpNode, OpState, PropPath};
use crate::cloner::ClonerState;
use crate::dynamic::DynFlags;
use crate::engine::{Engine, SubTarget};
use crate::error::{ErrorKind, EvalError, Pos};
use crate::token::{FloatVec, PropOwner, Token, VecItem};
use crate::vectorizer::VectorizerState;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use weft_prop::{Prop, StrKind};
use weft_widgets::{AttrValue, WidgetId};

/// The five named property scopes an expression resolves against.
#[derive(Debug, Clone, Default)]
pub struct Scopes {
    pub self_: Option<Prop>,
    pub parent: Option<Prop>,
    pub view: Option<Prop>,
    pub clone: Option<Prop>,
    pub args: Option<Prop>,
}

impl Scopes {
    pub fn new() -> Scopes {
        Scopes::default()
    }

    pub fn with_self(mut self, p: &Prop) -> Self {
        self.self_ = Some(p.clone());
        self
    }

    pub fn with_parent(mut self, p: &Prop) -> Self {
        self.parent = Some(p.clone());
        self
    }

    pub fn with_view(mut self, p: &Prop) -> Self {
        self.view = Some(p.clone());
        self
    }

    pub fn with_clone(mut self, p: &Prop) -> Self {
        self.clone = Some(p.clone());
        self
    }

    pub fn with_args(mut self, p: &Prop) -> Self {
        self.args = Some(p.clone());
        self
    }
}

/// Context of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EvalCtx {
    /// Widget the pass binds against; property mapping needs one.
    pub widget: Option<WidgetId>,
    pub scopes: Scopes,
    /// Passive passes never register long-lived subscriptions; used for
    /// one-shot event-triggered evaluation.
    pub passive: bool,
    /// Output: why this pass must re-run later.
    pub dyn_flags: DynFlags,
    /// Where block-local identifier declarations land.
    pub target: Option<Prop>,
}

impl EvalCtx {
    pub fn new() -> EvalCtx {
        EvalCtx::default()
    }

    pub fn for_widget(widget: WidgetId) -> EvalCtx {
        EvalCtx {
            widget: Some(widget),
            ..EvalCtx::default()
        }
    }

    pub fn with_scopes(mut self, scopes: Scopes) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// A stack operand: either an already-produced token or a reference to a
/// path op whose subscription is created on first use. Registry function
/// implementations receive their arguments in this form so they can pick
/// the subscription discipline themselves.
#[derive(Debug, Clone)]
pub enum Operand {
    Tok(Token),
    Node(usize),
}

type Stack = SmallVec<[Operand; 16]>;

fn err(kind: ErrorKind, pos: &Pos) -> EvalError {
    EvalError::new(kind, pos.clone())
}

fn pop(stack: &mut Stack, node: &OpNode) -> Result<Operand, EvalError> {
    stack
        .pop()
        .ok_or_else(|| err(ErrorKind::MissingOperand, &node.pos))
}

/// Evaluate one chain. Errors abort the pass; prior committed state is
/// untouched.
pub(crate) fn eval_chain(
    engine: &mut Engine,
    chain: &Rc<Chain>,
    ctx: &mut EvalCtx,
) -> Result<(), EvalError> {
    let mut stack: Stack = SmallVec::new();
    for (i, node) in chain.ops.iter().enumerate() {
        match &node.op {
            Op::Const(t) => stack.push(Operand::Tok(t.clone())),
            Op::Path(_) => stack.push(Operand::Node(i)),
            Op::Attr(n) => stack.push(Operand::Tok(Token::Attr(n.clone()))),
            Op::Ident(n) => stack.push(Operand::Tok(Token::Identifier(n.clone()))),
            Op::BlockVal(b) => stack.push(Operand::Tok(Token::Block(b.clone()))),
            Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Modulo => {
                arith(engine, ctx, chain, node, &mut stack)?;
            }
            Op::And | Op::Or | Op::Xor => boolean(engine, ctx, chain, node, &mut stack)?,
            Op::Not => {
                let a = resolve_value(engine, ctx, chain, pop(&mut stack, node)?, &node.pos)?;
                stack.push(Operand::Tok(Token::Int(i64::from(!a.truthy()))));
            }
            Op::Eq | Op::Ne => equality(engine, ctx, chain, node, &mut stack)?,
            Op::Lt | Op::Gt => compare(engine, ctx, chain, node, &mut stack)?,
            Op::Coalesce => {
                let b = pop(&mut stack, node)?;
                let a = pop(&mut stack, node)?;
                let a = resolve_value(engine, ctx, chain, a, &node.pos)?;
                let b = resolve_value(engine, ctx, chain, b, &node.pos)?;
                let r = if matches!(a, Token::Void) { b } else { a };
                stack.push(Operand::Tok(r));
            }
            Op::Assign { conditional } => {
                assign(engine, ctx, chain, node, *conditional, &mut stack)?;
            }
            Op::MakeVector(n) => make_vector(engine, ctx, chain, node, *n, &mut stack)?,
            Op::Call { func, argc } => {
                if stack.len() < *argc {
                    return Err(err(ErrorKind::MissingOperand, &node.pos));
                }
                let split = stack.len() - *argc;
                let mut args: Vec<Operand> = stack.drain(split..).collect();
                if let Some(t) = (func.eval)(engine, ctx, chain, node, &mut args)? {
                    stack.push(Operand::Tok(t));
                }
            }
        }
    }
    Ok(())
}

/// Resolve a path against the named scope roots. The head segment picks
/// the root; unknown heads resolve against the global root.
fn scope_root<'a>(
    engine: &Engine,
    ctx: &EvalCtx,
    path: &'a PropPath,
) -> Option<(Prop, &'a [Rc<str>])> {
    let segs = &path.segments[..];
    let first = segs.first()?;
    match &**first {
        "self" => ctx.scopes.self_.clone().map(|r| (r, &segs[1..])),
        "parent" => ctx.scopes.parent.clone().map(|r| (r, &segs[1..])),
        "view" => ctx.scopes.view.clone().map(|r| (r, &segs[1..])),
        "clone" => ctx.scopes.clone.clone().map(|r| (r, &segs[1..])),
        "args" => ctx.scopes.args.clone().map(|r| (r, &segs[1..])),
        _ => Some((engine.global().clone(), segs)),
    }
}

fn resolve_path(engine: &Engine, ctx: &EvalCtx, path: &PropPath) -> Option<Prop> {
    let (root, rest) = scope_root(engine, ctx, path)?;
    root.resolve(rest)
}

fn resolve_path_create(engine: &Engine, ctx: &EvalCtx, path: &PropPath) -> Option<Prop> {
    let (root, rest) = scope_root(engine, ctx, path)?;
    Some(root.create_path(rest))
}

/// Turn a path op into a live subscription of the requested discipline,
/// reusing the one cached on the node. The graph's state snapshot is
/// applied synchronously, before the chain back-reference is installed, so
/// no re-entrant evaluation happens here.
pub(crate) fn subscribe_path(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    idx: usize,
    disc: SubDiscipline,
) -> Result<SubId, EvalError> {
    let node = &chain.ops[idx];
    if let Some(id) = node.cached_sub() {
        return Ok(id);
    }
    let Op::Path(path) = &node.op else {
        return Err(err(ErrorKind::MissingOperand, &node.pos));
    };
    let widget = ctx
        .widget
        .ok_or_else(|| err(ErrorKind::WrongScope("property mapping"), &node.pos))?;
    let prop = resolve_path(engine, ctx, path)
        .ok_or_else(|| err(ErrorKind::UnresolvedProperty(path.to_string()), &node.pos))?;

    let (handle, snapshot) = prop.subscribe(engine.courier());
    let gid = handle.id();
    let kind = match disc {
        SubDiscipline::Value => SubKind::Value,
        SubDiscipline::Counter => SubKind::Counter { entries: 0 },
        SubDiscipline::Cloner => SubKind::Cloner(Rc::new(RefCell::new(ClonerState::new(
            widget,
            ctx.scopes.self_.clone(),
            ctx.scopes.view.clone(),
            ctx.scopes.args.clone(),
        )))),
        SubDiscipline::Vectorizer => {
            SubKind::Vectorizer(Rc::new(RefCell::new(VectorizerState::new())))
        }
    };
    tracing::debug!(path = %path, kind = kind.name(), "creating subscription");
    let sub = Sub {
        kind,
        owner: widget,
        target: prop,
        handle,
        cached: Token::Void,
        chain: None,
        scopes: ctx.scopes.clone(),
        pos: node.pos.clone(),
    };
    let id = engine.subs.insert(sub);
    engine.routes.insert(gid, SubTarget::Main(id));
    engine.binding_mut(widget).subs.push(id);

    for ev in snapshot {
        engine.deliver_to(id, ev);
    }

    if !ctx.passive {
        if let Some(s) = engine.subs.get_mut(id) {
            s.chain = Some(chain.clone());
        }
    }
    *node.state.borrow_mut() = OpState::Sub(id);
    Ok(id)
}

/// Read a subscription's cached token, rebuilding a dirty vectorizer
/// aggregate first.
pub(crate) fn deref_cached(engine: &mut Engine, id: SubId) -> Token {
    let dirty_vec = match engine.subs.get(id) {
        Some(sub) => match &sub.kind {
            SubKind::Vectorizer(st) if st.borrow().is_dirty() => Some(st.clone()),
            _ => None,
        },
        None => return Token::Void,
    };
    if let Some(st) = dirty_vec {
        let tok = st.borrow_mut().rebuild();
        if let Some(s) = engine.subs.get_mut(id) {
            s.cached = tok.clone();
        }
        return tok;
    }
    engine
        .subs
        .get(id)
        .map(|s| s.cached.clone())
        .unwrap_or(Token::Void)
}

/// Force an operand to a value token. Paths become value subscriptions;
/// blocks materialize into a fresh owned property root.
pub(crate) fn resolve_value(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    operand: Operand,
    _pos: &Pos,
) -> Result<Token, EvalError> {
    match operand {
        Operand::Node(i) => {
            let id = subscribe_path(engine, ctx, chain, i, SubDiscipline::Value)?;
            ctx.dyn_flags |= DynFlags::PROP;
            Ok(deref_cached(engine, id))
        }
        Operand::Tok(Token::SubRef(id)) => {
            ctx.dyn_flags |= DynFlags::PROP;
            Ok(deref_cached(engine, id))
        }
        Operand::Tok(Token::Block(b)) => {
            let root = Prop::root();
            let fresh = b.fresh_copy();
            let mut sub_ctx = EvalCtx {
                widget: ctx.widget,
                scopes: ctx.scopes.clone(),
                passive: ctx.passive,
                dyn_flags: DynFlags::empty(),
                target: Some(root.clone()),
            };
            engine.eval_block(&fresh, &mut sub_ctx)?;
            ctx.dyn_flags |= sub_ctx.dyn_flags;
            Ok(Token::PropOwner(PropOwner::new(root)))
        }
        Operand::Tok(t) => Ok(t),
    }
}

/// Force an operand to a subscription of the given discipline.
pub(crate) fn resolve_sub(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    operand: &Operand,
    disc: SubDiscipline,
    pos: &Pos,
) -> Result<SubId, EvalError> {
    match operand {
        Operand::Node(i) => subscribe_path(engine, ctx, chain, *i, disc),
        Operand::Tok(Token::SubRef(id)) => Ok(*id),
        Operand::Tok(t) => Err(err(
            ErrorKind::TypeMismatch {
                expected: "property",
                got: t.type_name(),
            },
            pos,
        )),
    }
}

fn is_rich(t: &Token) -> bool {
    matches!(t, Token::Str(_, StrKind::Rich))
}

/// Escape markup-significant characters of a plain string so it can join
/// rich text.
pub(crate) fn escape_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// `"#rgb"` / `"#rrggbb"` strings act as color vectors in arithmetic.
fn hex_color_to_vec(t: Token) -> Token {
    let Token::Str(s, _) = &t else {
        return t;
    };
    let Some(hex) = s.strip_prefix('#') else {
        return t;
    };
    let bytes = hex.as_bytes();
    if bytes.iter().any(|b| hex_nibble(*b).is_none()) {
        return t;
    }
    let rgb = match bytes.len() {
        3 => [
            hex_nibble(bytes[0]).unwrap_or(0) as f64 / 15.0,
            hex_nibble(bytes[1]).unwrap_or(0) as f64 / 15.0,
            hex_nibble(bytes[2]).unwrap_or(0) as f64 / 15.0,
        ],
        6 => {
            let byte = |i: usize| {
                (hex_nibble(bytes[i]).unwrap_or(0) * 16 + hex_nibble(bytes[i + 1]).unwrap_or(0))
                    as f64
                    / 255.0
            };
            [byte(0), byte(2), byte(4)]
        }
        _ => return t,
    };
    match FloatVec::from_slice(&rgb) {
        Some(v) => Token::VecFloat(v),
        None => t,
    }
}

fn zero_if_void(t: Token) -> Token {
    match t {
        Token::Void => Token::Int(0),
        other => other,
    }
}

fn arith(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    stack: &mut Stack,
) -> Result<(), EvalError> {
    let b = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let a = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let a = hex_color_to_vec(zero_if_void(a));
    let b = hex_color_to_vec(zero_if_void(b));

    if matches!(node.op, Op::Add) {
        if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
            let rich = is_rich(&a) || is_rich(&b);
            let mut out = String::new();
            if rich && !is_rich(&a) {
                out.push_str(&escape_entities(x));
            } else {
                out.push_str(x);
            }
            if rich && !is_rich(&b) {
                out.push_str(&escape_entities(y));
            } else {
                out.push_str(y);
            }
            let kind = if rich { StrKind::Rich } else { StrKind::Plain };
            stack.push(Operand::Tok(Token::Str(Rc::from(out.as_str()), kind)));
            return Ok(());
        }
    }

    let int_op = |x: i64, y: i64| -> Option<i64> {
        match node.op {
            Op::Add => Some(x.wrapping_add(y)),
            Op::Subtract => Some(x.wrapping_sub(y)),
            Op::Multiply => Some(x.wrapping_mul(y)),
            Op::Modulo => Some(if y == 0 { 0 } else { x.wrapping_rem(y) }),
            _ => None,
        }
    };
    let float_op = |x: f64, y: f64| -> f64 {
        match node.op {
            Op::Add => x + y,
            Op::Subtract => x - y,
            Op::Multiply => x * y,
            Op::Divide => x / y,
            Op::Modulo => {
                let yi = y as i64;
                if yi == 0 {
                    0.0
                } else {
                    ((x as i64).wrapping_rem(yi)) as f64
                }
            }
            _ => 0.0,
        }
    };

    let result = match (&a, &b) {
        (Token::Int(x), Token::Int(y)) => match int_op(*x, *y) {
            Some(v) => Token::Int(v),
            None => Token::Float(float_op(*x as f64, *y as f64)),
        },
        _ if a.is_numeric() && b.is_numeric() => Token::Float(float_op(a.as_float(), b.as_float())),
        (Token::VecFloat(x), Token::VecFloat(y)) => {
            if x.len() != y.len() {
                return Err(err(
                    ErrorKind::InvalidArgument {
                        func: "vector arithmetic",
                        reason: "operation is invalid for non-equal sized vectors".into(),
                    },
                    &node.pos,
                ));
            }
            let elems: Vec<f64> = x
                .as_slice()
                .iter()
                .zip(y.as_slice())
                .map(|(p, q)| float_op(*p, *q))
                .collect();
            FloatVec::from_slice(&elems).map(Token::VecFloat).unwrap_or(Token::Void)
        }
        (Token::VecFloat(x), _) if b.is_numeric() => {
            let v = b.as_float();
            let elems: Vec<f64> = x.as_slice().iter().map(|p| float_op(*p, v)).collect();
            FloatVec::from_slice(&elems).map(Token::VecFloat).unwrap_or(Token::Void)
        }
        (_, Token::VecFloat(y)) if a.is_numeric() => {
            let v = a.as_float();
            let elems: Vec<f64> = y.as_slice().iter().map(|q| float_op(v, *q)).collect();
            FloatVec::from_slice(&elems).map(Token::VecFloat).unwrap_or(Token::Void)
        }
        _ => Token::Void,
    };
    stack.push(Operand::Tok(result));
    Ok(())
}

fn boolean(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    stack: &mut Stack,
) -> Result<(), EvalError> {
    let b = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let a = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let x = a.truthy();
    let y = b.truthy();
    let r = match node.op {
        Op::And => x && y,
        Op::Or => x || y,
        Op::Xor => x ^ y,
        _ => false,
    };
    stack.push(Operand::Tok(Token::Int(i64::from(r))));
    Ok(())
}

/// Equality across mixed types: strings as strings, int/float numerically,
/// void equals void, anything else compares unequal across types.
pub(crate) fn token_eq(a: &Token, b: &Token) -> bool {
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return x == y;
    }
    match (a, b) {
        (Token::Int(x), Token::Float(y)) => *x as f64 == *y,
        (Token::Float(x), Token::Int(y)) => *x == *y as f64,
        (Token::Int(x), Token::Int(y)) => x == y,
        (Token::Float(x), Token::Float(y)) => x == y,
        (Token::Void, Token::Void) => true,
        _ => false,
    }
}

fn equality(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    stack: &mut Stack,
) -> Result<(), EvalError> {
    let b = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let a = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let eq = token_eq(&a, &b);
    let r = if matches!(node.op, Op::Ne) { !eq } else { eq };
    stack.push(Operand::Tok(Token::Int(i64::from(r))));
    Ok(())
}

fn compare(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    stack: &mut Stack,
) -> Result<(), EvalError> {
    let b = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let a = resolve_value(engine, ctx, chain, pop(stack, node)?, &node.pos)?;
    let r = if matches!(node.op, Op::Gt) {
        a.as_float() > b.as_float()
    } else {
        a.as_float() < b.as_float()
    };
    stack.push(Operand::Tok(Token::Int(i64::from(r))));
    Ok(())
}

fn make_vector(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    n: usize,
    stack: &mut Stack,
) -> Result<(), EvalError> {
    if stack.len() < n {
        return Err(err(ErrorKind::MissingOperand, &node.pos));
    }
    let split = stack.len() - n;
    let operands: Vec<Operand> = stack.drain(split..).collect();
    let mut tokens = Vec::with_capacity(n);
    for op in operands {
        tokens.push(resolve_value(engine, ctx, chain, op, &node.pos)?);
    }
    let numerics = tokens.iter().filter(|t| t.is_numeric()).count();
    let strings = tokens
        .iter()
        .filter(|t| matches!(t, Token::Str(..) | Token::Link { .. }))
        .count();

    if strings > numerics {
        let items: Vec<VecItem> = tokens
            .into_iter()
            .map(|value| VecItem {
                value,
                selected: false,
            })
            .collect();
        stack.push(Operand::Tok(Token::Vector(Rc::new(items))));
        return Ok(());
    }

    let elems: Vec<f64> = tokens.iter().map(|t| t.as_float()).collect();
    match FloatVec::from_slice(&elems) {
        Some(v) => {
            stack.push(Operand::Tok(Token::VecFloat(v)));
            Ok(())
        }
        None => Err(err(
            ErrorKind::InvalidArgument {
                func: "vector",
                reason: format!("invalid numeric vector length ({n})"),
            },
            &node.pos,
        )),
    }
}

pub(crate) enum Target {
    Attr(Rc<str>),
    Prop(Prop),
}

pub(crate) fn resolve_target(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    operand: &Operand,
    node: &OpNode,
) -> Result<Target, EvalError> {
    match operand {
        Operand::Tok(Token::Attr(n)) => Ok(Target::Attr(n.clone())),
        Operand::Tok(Token::Identifier(n)) => {
            let t = ctx.target.as_ref().ok_or_else(|| {
                err(ErrorKind::WrongScope("declaration outside a block"), &node.pos)
            })?;
            Ok(Target::Prop(t.create(n)))
        }
        Operand::Tok(Token::PropRef(p)) => Ok(Target::Prop(p.clone())),
        Operand::Node(i) => {
            let Op::Path(path) = &chain.ops[*i].op else {
                return Err(err(ErrorKind::MissingOperand, &node.pos));
            };
            let p = resolve_path_create(engine, ctx, path).ok_or_else(|| {
                err(ErrorKind::UnresolvedProperty(path.to_string()), &node.pos)
            })?;
            Ok(Target::Prop(p))
        }
        Operand::Tok(t) => Err(err(
            ErrorKind::TypeMismatch {
                expected: "assignable target",
                got: t.type_name(),
            },
            &node.pos,
        )),
    }
}

fn token_to_attr(t: &Token) -> Result<AttrValue, ErrorKind> {
    match t {
        Token::Void => Ok(AttrValue::Void),
        Token::Int(v) => Ok(AttrValue::Int(*v)),
        Token::Float(v) => Ok(AttrValue::Float(*v)),
        Token::Str(s, _) => Ok(AttrValue::Str(s.clone())),
        Token::Link { title, url } => Ok(AttrValue::Link {
            title: title.clone(),
            url: url.clone(),
        }),
        Token::VecFloat(v) => Ok(AttrValue::VecFloat(v.as_slice().to_vec())),
        other => Err(ErrorKind::TypeMismatch {
            expected: "attribute value",
            got: other.type_name(),
        }),
    }
}

pub(crate) fn set_prop_from_token(
    prop: &Prop,
    t: &Token,
    pos: &Pos,
) -> Result<(), EvalError> {
    match t {
        Token::Str(s, StrKind::Plain) => prop.set_str(s),
        Token::Str(s, StrKind::Rich) => prop.set_rich(s),
        Token::Int(v) => prop.set_int(*v),
        Token::Float(v) => prop.set_float(*v),
        Token::Link { title, url } => prop.set_link(title, url),
        Token::Void => prop.set_void(),
        Token::PropRef(_) | Token::PropOwner(_) => {
            return Err(err(
                ErrorKind::TypeMismatch {
                    expected: "scalar value",
                    got: t.type_name(),
                },
                pos,
            ));
        }
        _ => prop.set_void(),
    }
    Ok(())
}

fn assign(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    conditional: bool,
    stack: &mut Stack,
) -> Result<(), EvalError> {
    let right = pop(stack, node)?;
    let left = pop(stack, node)?;

    // A block on the right of a property target evaluates straight into
    // the target: declarations inside the block land there.
    if let Operand::Tok(Token::Block(b)) = &right {
        match resolve_target(engine, ctx, chain, &left, node)? {
            Target::Prop(p) => {
                let fresh = b.fresh_copy();
                let mut sub_ctx = EvalCtx {
                    widget: ctx.widget,
                    scopes: ctx.scopes.clone(),
                    passive: ctx.passive,
                    dyn_flags: DynFlags::empty(),
                    target: Some(p.clone()),
                };
                engine.eval_block(&fresh, &mut sub_ctx)?;
                ctx.dyn_flags |= sub_ctx.dyn_flags;
                stack.push(Operand::Tok(Token::PropRef(p)));
                return Ok(());
            }
            Target::Attr(_) => {
                return Err(err(
                    ErrorKind::TypeMismatch {
                        expected: "property target for a block",
                        got: "attribute",
                    },
                    &node.pos,
                ));
            }
        }
    }

    let rtok = resolve_value(engine, ctx, chain, right, &node.pos)?;
    if conditional && matches!(rtok, Token::Void) {
        stack.push(Operand::Tok(Token::Void));
        return Ok(());
    }

    match resolve_target(engine, ctx, chain, &left, node)? {
        Target::Attr(name) => {
            let w = ctx
                .widget
                .ok_or_else(|| err(ErrorKind::WrongScope("attribute assignment"), &node.pos))?;
            let value = token_to_attr(&rtok).map_err(|k| err(k, &node.pos))?;
            if let Some(widget) = engine.tree_mut().get_mut(w) {
                widget.attrs.insert(name, value);
            }
        }
        Target::Prop(p) => set_prop_from_token(&p, &rtok, &node.pos)?,
    }
    stack.push(Operand::Tok(rtok));
    Ok(())
}
