#![forbid(unsafe_code)]

//! Stateful filter functions: change detection and time-based smoothing.
//!
//! All of these live across frames through their call-site state block and
//! re-arm themselves by setting `EVERY_FRAME` while a transition is in
//! flight, plus a precise refresh deadline so an embedder can sleep until
//! the next visible change.

use super::{FnResult, err, invalid, with_state};
use crate::chain::{Chain, OpNode};
use crate::dynamic::DynFlags;
use crate::engine::Engine;
use crate::error::ErrorKind;
use crate::eval::{self, EvalCtx, Operand};
use crate::token::Token;
use std::rc::Rc;
use weft_prop::PropId;

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) enum ChangedVal {
    /// Nothing observed yet.
    #[default]
    Start,
    Void,
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Prop(PropId),
}

#[derive(Debug, Default)]
pub(crate) struct ChangedState {
    last: ChangedVal,
    deadline: u64,
    transitioned: bool,
}

/// `changed(value, holdSeconds, suppressFirstChange?)`: 1.0 for
/// `holdSeconds` after the value changes identity or content, else 0.0.
/// The first observed value counts as a change unless suppression is on.
pub(crate) fn f_changed(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let b = eval::resolve_value(engine, ctx, chain, args[1].clone(), &node.pos)?;
    let supp_first = if args.len() == 3 {
        eval::resolve_value(engine, ctx, chain, args[2].clone(), &node.pos)?.truthy()
    } else {
        false
    };

    if !b.is_numeric() {
        return Err(invalid("changed", "second operand must be a scalar hold time", &node.pos));
    }
    let hold = b.as_float();

    let observed = match &a {
        Token::Void => ChangedVal::Void,
        Token::Int(v) => ChangedVal::Int(*v),
        Token::Float(v) => ChangedVal::Float(*v),
        Token::Str(s, _) => ChangedVal::Str(s.clone()),
        Token::PropRef(p) => ChangedVal::Prop(p.id()),
        other => {
            return Err(invalid(
                "changed",
                format!("invalid first operand ({})", other.type_name()),
                &node.pos,
            ));
        }
    };

    let now = engine.now();
    let deadline = with_state::<ChangedState, _>(node, "changed", |st| {
        if st.last != observed {
            st.last = observed;
            if st.transitioned || !supp_first {
                st.deadline = now + (hold * 1_000_000.0) as u64;
            }
            st.transitioned = true;
        }
        st.deadline
    })?;

    let out = if deadline > now {
        ctx.dyn_flags |= DynFlags::EVERY_FRAME;
        engine.schedule_refresh(deadline);
        1.0
    } else {
        0.0
    };
    Ok(Some(Token::Float(out)))
}

#[derive(Debug, Default)]
pub(crate) struct IirState {
    value: f64,
}

/// `iir(value, smoothing, springMode?)`: exponential low-pass with a
/// 1/1000 quantization cutoff that snaps to the target once movement
/// becomes invisible. Spring mode passes rising values through instantly.
pub(crate) fn f_iir(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let b = eval::resolve_value(engine, ctx, chain, args[1].clone(), &node.pos)?;
    let spring = if args.len() == 3 {
        eval::resolve_value(engine, ctx, chain, args[2].clone(), &node.pos)?.truthy()
    } else {
        false
    };

    if !matches!(a, Token::Float(_) | Token::Int(_) | Token::Str(..) | Token::Void) {
        return Err(invalid("iir", "invalid first operand", &node.pos));
    }
    let target = if a.is_numeric() { a.as_float() } else { 0.0 };
    if !b.is_numeric() || b.as_float() == 0.0 {
        return Err(invalid("iir", "invalid second operand", &node.pos));
    }
    let alpha = 1.0 / b.as_float();

    let (value, moving) = with_state::<IirState, _>(node, "iir", |st| {
        let before = (st.value * 1000.0) as i64;
        if spring && target > st.value {
            st.value = target;
        } else {
            let out = st.value + alpha * (target - st.value);
            if (out * 1000.0) as i64 == before {
                st.value = target;
            } else {
                st.value = out;
            }
        }
        let after = (st.value * 1000.0) as i64;
        (st.value, before != after)
    })?;

    if moving {
        ctx.dyn_flags |= DynFlags::EVERY_FRAME;
    }
    Ok(Some(Token::Float(value)))
}

#[derive(Debug, Default)]
pub(crate) struct ScurveState {
    startval: f64,
    current: f64,
    target: f64,
    time_up: f64,
    time_down: f64,
    starttime: u64,
    deadline: u64,
    total: u64,
}

fn s_shape(x: f64) -> f64 {
    let phase = -std::f64::consts::FRAC_PI_2 + x * std::f64::consts::PI;
    phase.sin() * 0.5 + 0.5
}

/// `scurve(target, riseTime, fallTime?)`: sinusoidal ease between the
/// previous and new target; duration picked by the direction of change.
pub(crate) fn f_scurve(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let b = eval::resolve_value(engine, ctx, chain, args[1].clone(), &node.pos)?;
    let c = if args.len() == 3 {
        Some(eval::resolve_value(engine, ctx, chain, args[2].clone(), &node.pos)?)
    } else {
        None
    };
    let target = a.as_float();
    let time_up = b.as_float();
    let time_down = c.map(|t| t.as_float()).unwrap_or(time_up);

    let now = engine.now();
    let (current, deadline, animating) = with_state::<ScurveState, _>(node, "scurve", |st| {
        if st.target != target || st.time_up != time_up || st.time_down != time_down {
            st.startval = st.target;
            st.target = target;
            st.time_up = time_up;
            st.time_down = time_down;
            let t = if st.target < st.startval {
                time_down
            } else {
                time_up
            };
            st.starttime = now;
            st.total = ((1_000_000.0 * t) as u64).max(1);
            st.deadline = now + st.total;
        }
        if now < st.deadline {
            let x = (now - st.starttime) as f64 / st.total as f64;
            st.current = st.startval + s_shape(x) * (st.target - st.startval);
            (st.current, st.deadline, true)
        } else {
            st.current = st.target;
            (st.current, st.deadline, false)
        }
    })?;

    if animating {
        ctx.dyn_flags |= DynFlags::EVERY_FRAME;
        engine.schedule_refresh(deadline);
    }
    Ok(Some(Token::Float(current)))
}

#[derive(Debug, Default)]
pub(crate) struct DelayState {
    cur: f64,
    old: f64,
    deadline: u64,
}

/// `delay(value, riseDelaySeconds, fallDelaySeconds)`: keeps returning the
/// previous value for a directional delay after a transition.
pub(crate) fn f_delay(
    engine: &mut Engine,
    ctx: &mut EvalCtx,
    chain: &Rc<Chain>,
    node: &OpNode,
    args: &mut [Operand],
) -> FnResult {
    let a = eval::resolve_value(engine, ctx, chain, args[0].clone(), &node.pos)?;
    let rise = eval::resolve_value(engine, ctx, chain, args[1].clone(), &node.pos)?;
    let fall = eval::resolve_value(engine, ctx, chain, args[2].clone(), &node.pos)?;
    if !rise.is_numeric() || !fall.is_numeric() {
        return Err(err(
            ErrorKind::TypeMismatch {
                expected: "numeric delay",
                got: if rise.is_numeric() {
                    fall.type_name()
                } else {
                    rise.type_name()
                },
            },
            &node.pos,
        ));
    }

    let now = engine.now();
    let value = a.as_float();
    let held = with_state::<DelayState, _>(node, "delay", |st| {
        if value != st.cur {
            st.old = st.cur;
            let d = if value >= st.cur {
                rise.as_float()
            } else {
                fall.as_float()
            };
            st.deadline = now + (d * 1_000_000.0) as u64;
            st.cur = value;
        }
        if st.deadline > now {
            Some((st.old, st.deadline))
        } else {
            None
        }
    })?;

    match held {
        Some((old, deadline)) => {
            ctx.dyn_flags |= DynFlags::EVERY_FRAME;
            engine.schedule_refresh(deadline);
            Ok(Some(Token::Float(old)))
        }
        None => Ok(Some(a)),
    }
}
