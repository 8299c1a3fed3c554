#![forbid(unsafe_code)]

//! The function registry.
//!
//! An immutable static table built once; call sites hold `&'static`
//! descriptors after chain construction. Stateful functions declare a
//! constructor that allocates a private state block on the call-site op
//! node; the state dies with the chain (teardown is `Drop`).

mod filters;
mod settings;

use crate::bridge::SubDiscipline;
use crate::chain::{Chain, OpNode, OpState};
use crate::dynamic::DynFlags;
use crate::engine::Engine;
use crate::error::{ErrorKind, EvalError, Pos};
use crate::eval::{self, EvalCtx, Operand, Target};
use crate::token::Token;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

pub(crate) use filters::{ChangedState, DelayState, IirState, ScurveState};
pub(crate) use settings::MultioptState;

/// Accepted argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == *k,
            Arity::AtLeast(k) => n >= *k,
            Arity::Range(a, b) => (*a..=*b).contains(&n),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "{k}"),
            Arity::AtLeast(k) => write!(f, "{k}+"),
            Arity::Range(a, b) => write!(f, "{a}..{b}"),
        }
    }
}

pub type FnResult = Result<Option<Token>, EvalError>;

pub type FuncEval =
    fn(&mut Engine, &mut EvalCtx, &Rc<Chain>, &OpNode, &mut [Operand]) -> FnResult;

pub struct FuncDef {
    pub name: &'static str,
    pub arity: Arity,
    pub eval: FuncEval,
    /// Builds the per-call-site state block, when the function keeps one.
    pub ctor: Option<fn() -> Box<dyn Any>>,
}

impl fmt::Debug for FuncDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncDef({}, {})", self.name, self.arity)
    }
}

static FUNCTIONS: &[FuncDef] = &[
    FuncDef {
        name: "widget",
        arity: Arity::Exact(2),
        eval: f_widget,
        ctor: None,
    },
    FuncDef {
        name: "cloner",
        arity: Arity::Exact(3),
        eval: f_cloner,
        ctor: Some(|| Box::new(ClonerAnchor::default())),
    },
    FuncDef {
        name: "count",
        arity: Arity::Exact(1),
        eval: f_count,
        ctor: None,
    },
    FuncDef {
        name: "vectorize",
        arity: Arity::Exact(1),
        eval: f_vectorize,
        ctor: None,
    },
    FuncDef {
        name: "changed",
        arity: Arity::Range(2, 3),
        eval: filters::f_changed,
        ctor: Some(|| Box::new(ChangedState::default())),
    },
    FuncDef {
        name: "iir",
        arity: Arity::Range(2, 3),
        eval: filters::f_iir,
        ctor: Some(|| Box::new(IirState::default())),
    },
    FuncDef {
        name: "scurve",
        arity: Arity::Range(2, 3),
        eval: filters::f_scurve,
        ctor: Some(|| Box::new(ScurveState::default())),
    },
    FuncDef {
        name: "delay",
        arity: Arity::Exact(3),
        eval: filters::f_delay,
        ctor: Some(|| Box::new(DelayState::default())),
    },
    FuncDef {
        name: "multiopt",
        arity: Arity::AtLeast(4),
        eval: settings::f_multiopt,
        ctor: Some(|| Box::new(MultioptState::default())),
    },
    FuncDef {
        name: "isSet",
        arity: Arity::Exact(1),
        eval: f_is_set,
        ctor: None,
    },
    FuncDef {
        name: "isVoid",
        arity: Arity::Exact(1),
        eval: f_is_void,
        ctor: None,
    },
    FuncDef {
        name: "int",
        arity: Arity::Exact(1),
        eval: f_int,
        ctor: None,
    },
    FuncDef {
        name: "abs",
        arity: Arity::Exact(1),
        eval: f_abs,
        ctor: None,
    },
    FuncDef {
        name: "clamp",
        arity: Arity::Exact(3),
        eval: f_clamp,
        ctor: None,
    },
    FuncDef {
        name: "join",
        arity: Arity::AtLeast(1),
        eval: f_join,
        ctor: None,
    },
    FuncDef {
        name: "translate",
        arity: Arity::AtLeast(2),
        eval: f_translate,
        ctor: None,
    },
    FuncDef {
        name: "select",
        arity: Arity::Exact(3),
        eval: f_select,
        ctor: None,
    },
    FuncDef {
        name: "selectedElement",
        arity: Arity::Exact(1),
        eval: f_selected_element,
        ctor: None,
    },
    FuncDef {
        name: "event",
        arity: Arity::Exact(1),
        eval: f_event,
        ctor: None,
    },
    FuncDef {
        name: "fireEvent",
        arity: Arity::Exact(1),
        eval: f_fire_event,
        ctor: None,
    },
    FuncDef {
        name: "isFocused",
        arity: Arity::Exact(0),
        eval: f_is_focused,
        ctor: None,
    },
    FuncDef {
        name: "isReady",
        arity: Arity::Exact(0),
        eval: f_is_ready,
        ctor: None,
    },
    FuncDef {
        name: "suggestFocus",
        arity: Arity::Exact(1),
        eval: f_suggest_focus,
        ctor: None,
    },
    FuncDef {
        name: "monotime",
        arity: Arity::Exact(0),
        eval: f_monotime,
        ctor: None,
    },
];

/// Registry lookup by name.
pub fn lookup(name: &str) -> Option<&'static FuncDef> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Names of every registered function, for tooling.
pub fn registered_names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|f| f.name)
}

fn err(kind: ErrorKind, pos: &Pos) -> EvalError {
    EvalError::new(kind, pos.clone())
}

fn invalid(func: &'static str, reason: impl Into<String>, pos: &Pos) -> EvalError {
    err(
        ErrorKind::InvalidArgument {
            func,
            reason: reason.into(),
        },
        pos,
    )
}

/// Run a closure against the call-site state block of type `T`.
pub(crate) fn with_state<T: 'static, R>(
    node: &OpNode,
    func: &'static str,
    f: impl FnOnce(&mut T) -> R,
) -> Result<R, EvalError> {
    let mut st = node.state.borrow_mut();
    let OpState::Func(bx) = &mut *st else {
        return Err(invalid(func, "call-site state missing", &node.pos));
    };
    let Some(t) = bx.downcast_mut::<T>() else {
        return Err(invalid(func, "call-site state has the wrong type", &node.pos));
    };
    Ok(f(t))
}

/// Anchor widget of one cloner call site.
#[derive(Default)]
struct ClonerAnchor {
    anchor: Option<weft_widgets::WidgetId>,
}

fn f_widget(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    _chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let parent = ctx
        .widget
        .ok_or_else(|| err(ErrorKind::WrongScope("widget creation"), &node.pos))?;
    let Operand::Tok(Token::Identifier(class_name)) = &args[0] else {
        return Err(invalid("widget", "first argument must be a widget class", &node.pos));
    };
    let Operand::Tok(Token::Block(body)) = &args[1] else {
        return Err(invalid("widget", "second argument must be a block", &node.pos));
    };
    let class = weft_widgets::class_by_name(class_name)
        .ok_or_else(|| invalid("widget", format!("no such widget: {class_name}"), &node.pos))?;

    let w = engine.tree_mut().create(class, parent, None);
    let fresh = body.fresh_copy();
    let mut sub_ctx = EvalCtx {
        widget: Some(w),
        scopes: ctx.scopes.clone(),
        passive: ctx.passive,
        dyn_flags: DynFlags::empty(),
        target: None,
    };
    engine.eval_block(&fresh, &mut sub_ctx)?;
    Ok(None)
}

fn f_cloner(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let parent = ctx
        .widget
        .ok_or_else(|| err(ErrorKind::WrongScope("cloner"), &node.pos))?;
    let sub_id = eval::resolve_sub(engine, ctx, chain, &args[0], SubDiscipline::Cloner, &node.pos)?;
    ctx.dyn_flags |= DynFlags::PROP;

    let Operand::Tok(Token::Identifier(class_name)) = &args[1] else {
        return Err(invalid("cloner", "second argument must be a widget class", &node.pos));
    };
    let Operand::Tok(Token::Block(body)) = &args[2] else {
        return Err(invalid("cloner", "third argument must be a block", &node.pos));
    };
    let class = weft_widgets::class_by_name(class_name)
        .ok_or_else(|| invalid("cloner", format!("no such widget: {class_name}"), &node.pos))?;

    let parent_can_hide = engine
        .tree()
        .get(parent)
        .is_some_and(|w| w.class.can_hide_children());
    if !parent_can_hide {
        return Err(invalid("cloner", "parent class cannot hide children", &node.pos));
    }

    let cached_anchor = with_state::<ClonerAnchor, _>(node, "cloner", |s| s.anchor)?;
    let anchor = match cached_anchor {
        Some(a) if engine.tree().contains(a) => a,
        _ => {
            let dummy = weft_widgets::class_by_name("dummy")
                .ok_or_else(|| invalid("cloner", "anchor class missing", &node.pos))?;
            let a = engine.tree_mut().create(dummy, parent, None);
            engine.tree_mut().set_hidden(a, true);
            with_state::<ClonerAnchor, _>(node, "cloner", |s| s.anchor = Some(a))?;
            a
        }
    };

    let bind = match engine.cloner_state(sub_id) {
        Some((is_dir, st)) => is_dir.then_some(st),
        None => {
            return Err(invalid("cloner", "target is not a collection subscription", &node.pos));
        }
    };
    if let Some(st) = bind {
        engine.cloner_bind(sub_id, &st, class, body.clone(), anchor);
    }
    Ok(None)
}

fn f_count(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let id = eval::resolve_sub(engine, ctx, chain, &args[0], SubDiscipline::Counter, &node.pos)?;
    ctx.dyn_flags |= DynFlags::PROP;
    Ok(Some(eval::deref_cached(engine, id)))
}

fn f_vectorize(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let id = eval::resolve_sub(engine, ctx, chain, &args[0], SubDiscipline::Vectorizer, &node.pos)?;
    ctx.dyn_flags |= DynFlags::PROP;
    Ok(Some(eval::deref_cached(engine, id)))
}

fn f_is_set(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    Ok(Some(Token::Int(i64::from(!matches!(a, Token::Void)))))
}

fn f_is_void(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    Ok(Some(Token::Int(i64::from(matches!(a, Token::Void)))))
}

fn f_int(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    Ok(Some(Token::Int(a.as_int())))
}

fn f_abs(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let r = match a {
        Token::Int(v) => Token::Int(v.wrapping_abs()),
        Token::Float(v) => Token::Float(v.abs()),
        _ => Token::Void,
    };
    Ok(Some(r))
}

fn f_clamp(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let x = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let lo = eval::resolve_value(engine, ctx, chain, args[1].clone(), &node.pos)?;
    let hi = eval::resolve_value(engine, ctx, chain, args[2].clone(), &node.pos)?;
    let r = match (&x, &lo, &hi) {
        (Token::Int(v), Token::Int(a), Token::Int(b)) => Token::Int((*v).max(*a).min(*b)),
        _ => Token::Float(x.as_float().max(lo.as_float()).min(hi.as_float())),
    };
    Ok(Some(r))
}

fn f_join(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let sep_tok = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let Some(sep) = sep_tok.as_str().map(str::to_owned) else {
        return Err(err(
            ErrorKind::TypeMismatch {
                expected: "string separator",
                got: sep_tok.type_name(),
            },
            &node.pos,
        ));
    };
    let mut parts = Vec::new();
    for arg in &args[1..] {
        let t = eval::resolve_value(engine, ctx, chain, arg.clone(), &node.pos)?;
        match &t {
            Token::Void => {}
            Token::Int(v) => parts.push(v.to_string()),
            Token::Float(v) => parts.push(v.to_string()),
            other => {
                if let Some(s) = other.as_str() {
                    parts.push(s.to_owned());
                }
            }
        }
    }
    Ok(Some(Token::Str(
        Rc::from(parts.join(&sep).as_str()),
        weft_prop::StrKind::Plain,
    )))
}

fn f_translate(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    if (args.len() - 2) % 2 != 0 {
        return Err(invalid("translate", "mapping arguments must come in pairs", &node.pos));
    }
    let v = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let mut i = 2;
    while i + 1 < args.len() {
        let key = eval::resolve_value(engine, ctx, chain, args[i].clone(), &node.pos)?;
        if eval::token_eq(&v, &key) {
            let out = eval::resolve_value(engine, ctx, chain, args[i + 1].clone(), &node.pos)?;
            return Ok(Some(out));
        }
        i += 2;
    }
    let default = eval::resolve_value(engine, ctx, chain, args[1].clone(), &node.pos)?;
    Ok(Some(default))
}

fn f_select(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let cond = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let chosen = if cond.truthy() { &args[1] } else { &args[2] };
    let out = eval::resolve_value(engine, ctx, chain, chosen.clone(), &node.pos)?;
    Ok(Some(out))
}

fn f_selected_element(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let v = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    match v {
        Token::Vector(items) => Ok(Some(
            items
                .iter()
                .find(|i| i.selected)
                .map(|i| i.value.clone())
                .unwrap_or(Token::Void),
        )),
        Token::Void => Ok(Some(Token::Void)),
        other => Err(err(
            ErrorKind::TypeMismatch {
                expected: "vector",
                got: other.type_name(),
            },
            &node.pos,
        )),
    }
}

fn f_event(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let r = match a.as_str() {
        Some(action) => Token::Event(Rc::from(action)),
        None => Token::Void,
    };
    Ok(Some(r))
}

fn f_fire_event(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    match a {
        Token::Event(action) => {
            engine.push_event(action);
            Ok(None)
        }
        other => Err(err(
            ErrorKind::TypeMismatch {
                expected: "event",
                got: other.type_name(),
            },
            &node.pos,
        )),
    }
}

fn f_is_focused(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    _chain: &Rc<Chain>,
    node: &OpNode,
    _args: &mut [Operand],
) -> FnResult {
    let w = ctx
        .widget
        .ok_or_else(|| err(ErrorKind::WrongScope("isFocused"), &node.pos))?;
    ctx.dyn_flags |= DynFlags::FOCUS;
    Ok(Some(Token::Int(i64::from(engine.tree().is_focused(w)))))
}

fn f_is_ready(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    _chain: &Rc<Chain>,
    node: &OpNode,
    _args: &mut [Operand],
) -> FnResult {
    let w = ctx
        .widget
        .ok_or_else(|| err(ErrorKind::WrongScope("isReady"), &node.pos))?;
    ctx.dyn_flags |= DynFlags::WIDGET_META;
    let ready = engine.tree().get(w).is_some_and(|w| w.ready);
    Ok(Some(Token::Int(i64::from(ready))))
}

fn f_suggest_focus(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let w = ctx
        .widget
        .ok_or_else(|| err(ErrorKind::WrongScope("suggestFocus"), &node.pos))?;
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    if a.truthy() {
        engine.set_focus(Some(w));
    }
    Ok(None)
}

fn f_monotime(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    _chain: &Rc<Chain>,
    _node: &OpNode,
    _args: &mut [Operand],
) -> FnResult {
    ctx.dyn_flags |= DynFlags::EVERY_FRAME;
    Ok(Some(Token::Float(engine.now() as f64 / 1_000_000.0)))
}

/// Resolve an argument that must name a property.
pub(crate) fn arg_as_prop(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    func: &'static str,
    node: &OpNode,
    arg: &Operand,
) -> Result<weft_prop::Prop, EvalError> {
    match eval::resolve_target(engine, ctx, chain, arg, node)? {
        Target::Prop(p) => Ok(p),
        Target::Attr(_) => Err(invalid(func, "argument is not a property", &node.pos)),
    }
}
