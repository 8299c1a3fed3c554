#![forbid(unsafe_code)]

//! Live-expression scheduling and the stateful filter functions, driven
//! by a deterministic 60 fps frame clock.

use weft_prop::{Prop, PropValue};
use weft_view::{ChainBuilder, DynFlags, Engine, EvalCtx};
use weft_widgets::class_by_name;

/// One frame at 60 fps, in microseconds.
const FRAME: u64 = 16_667;

fn engine_with_widget() -> (Engine, weft_widgets::WidgetId) {
    let mut e = Engine::new();
    let w = e.create_root_widget(class_by_name("container").unwrap());
    (e, w)
}

fn float_of(p: &Prop) -> f64 {
    match p.value() {
        PropValue::Float(v) => v,
        PropValue::Int(v) => v as f64,
        other => panic!("not numeric: {other:?}"),
    }
}

#[test]
fn changed_holds_for_exactly_120_frames_at_60fps() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_int(0);

    // out = changed($src, 2, true): the first observation is suppressed.
    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(2.0)
        .int(1)
        .call("changed", 3)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();
    assert_eq!(float_of(&out), 0.0, "first observation is not a change");

    src.set_int(1);
    e.pump();
    assert_eq!(float_of(&out), 1.0, "transition frame");

    let mut ones = 1;
    loop {
        e.frame(FRAME);
        if float_of(&out) == 1.0 {
            ones += 1;
            assert!(ones <= 120, "changed() must drop back after 120 frames");
        } else {
            break;
        }
    }
    assert_eq!(ones, 120);
    // Stays off afterwards.
    e.frame(FRAME);
    assert_eq!(float_of(&out), 0.0);
}

#[test]
fn changed_without_suppression_counts_first_value() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_int(7);

    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(0.5)
        .call("changed", 2)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();
    assert_eq!(float_of(&out), 1.0, "first value counts as a change");
}

#[test]
fn changed_schedules_a_refresh_deadline() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_int(0);
    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(1.0)
        .call("changed", 2)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    assert_eq!(e.next_refresh(), Some(1_000_000));
}

#[test]
fn iir_converges_and_snaps_to_target() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_float(0.0);

    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(4.0)
        .call("iir", 2)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();

    src.set_float(1.0);
    e.pump();
    let first = float_of(&out);
    assert!(first > 0.0 && first < 1.0, "filter moves gradually: {first}");

    let mut prev = first;
    for _ in 0..200 {
        e.frame(FRAME);
        let v = float_of(&out);
        assert!(v >= prev, "low-pass output must rise monotonically");
        prev = v;
        if v == 1.0 {
            break;
        }
    }
    assert_eq!(prev, 1.0, "quantization cutoff snaps to the target");
}

#[test]
fn iir_spring_mode_snaps_rising_values() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_float(0.0);

    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(4.0)
        .int(1)
        .call("iir", 3)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();

    src.set_float(1.0);
    e.pump();
    assert_eq!(float_of(&out), 1.0, "rising values pass through instantly");

    src.set_float(0.0);
    e.pump();
    let v = float_of(&out);
    assert!(v > 0.0 && v < 1.0, "falling values still decay: {v}");
}

#[test]
fn scurve_eases_between_targets() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_float(0.0);

    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(1.0)
        .call("scurve", 2)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();

    src.set_float(1.0);
    e.pump();

    // Half-way through a one-second transition the sinusoidal ease sits at
    // its midpoint.
    for _ in 0..30 {
        e.frame(FRAME);
    }
    let mid = float_of(&out);
    assert!((mid - 0.5).abs() < 0.05, "midpoint near 0.5, got {mid}");

    for _ in 0..40 {
        e.frame(FRAME);
    }
    assert_eq!(float_of(&out), 1.0, "transition completes at the target");
}

#[test]
fn delay_returns_previous_value_until_deadline() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_float(0.0);

    // Half a second rise delay, quarter second fall delay.
    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(0.5)
        .float(0.25)
        .call("delay", 3)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();

    src.set_float(1.0);
    e.pump();
    assert_eq!(float_of(&out), 0.0, "old value holds through the delay");

    let mut held = 1;
    loop {
        e.frame(FRAME);
        if float_of(&out) == 0.0 {
            held += 1;
            assert!(held <= 31);
        } else {
            break;
        }
    }
    assert_eq!(float_of(&out), 1.0);
    assert_eq!(held, 30, "0.5s at 60 fps");
}

#[test]
fn monotime_follows_the_frame_clock() {
    let (mut e, w) = engine_with_widget();
    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["t"])
        .call("monotime", 0)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    assert!(ctx.dyn_flags.contains(DynFlags::EVERY_FRAME));

    let t = e.global().resolve(&["t"]).unwrap();
    assert_eq!(float_of(&t), 0.0);

    e.frame(1_000_000);
    assert!((float_of(&t) - 1.0).abs() < 1e-9);
}

#[test]
fn widget_meta_signal_reruns_is_ready() {
    let (mut e, w) = engine_with_widget();
    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["ready"])
        .call("isReady", 0)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    assert!(ctx.dyn_flags.contains(DynFlags::WIDGET_META));

    let ready = e.global().resolve(&["ready"]).unwrap();
    assert_eq!(ready.value(), PropValue::Int(1));

    e.set_widget_ready(w, false);
    assert_eq!(ready.value(), PropValue::Int(0));

    e.set_widget_ready(w, true);
    assert_eq!(ready.value(), PropValue::Int(1));
}

#[test]
fn multiopt_materializes_settings_and_remembers_user_choice() {
    let (mut e, w) = engine_with_widget();
    e.global().create("dst");
    e.global().create("cfg");
    e.global().create("storage");

    let chain = ChainBuilder::new("settings.view", 1)
        .path(&["dst"])
        .path(&["cfg"])
        .str("Audio mode")
        .path(&["storage"])
        .link("Stereo", "stereo")
        .link("Surround", "surround")
        .call("multiopt", 6)
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    assert!(ctx.dyn_flags.contains(DynFlags::KEEP_ALIVE));

    let cfg = e.global().resolve(&["cfg"]).unwrap();
    assert_eq!(
        cfg.resolve(&["metadata", "title"]).unwrap().value().as_str(),
        Some("Audio mode")
    );
    assert_eq!(cfg.resolve(&["type"]).unwrap().value().as_str(), Some("multiopt"));
    assert_eq!(
        cfg.resolve(&["value"]).unwrap().value().as_str(),
        Some("stereo"),
        "first option is the default"
    );
    assert_eq!(
        cfg.resolve(&["current", "title"]).unwrap().value().as_str(),
        Some("Stereo")
    );
    assert_eq!(
        e.global().resolve(&["dst"]).unwrap().value().as_str(),
        Some("stereo")
    );
    let opts = cfg.resolve(&["options"]).unwrap();
    assert_eq!(opts.child_count(), 2);

    // The user's stored choice wins on re-evaluation, even when the
    // candidate set changes.
    e.global().resolve(&["storage"]).unwrap().set_str("surround");
    let chain2 = ChainBuilder::new("settings.view", 1)
        .path(&["dst"])
        .path(&["cfg"])
        .str("Audio mode")
        .path(&["storage"])
        .link("Stereo", "stereo")
        .link("Surround", "surround")
        .link("Mono", "mono")
        .call("multiopt", 7)
        .build()
        .unwrap();
    // Same call-site state is not shared between chains, but the stored
    // preference lives in the graph and is honored by any instance.
    let mut ctx2 = EvalCtx::for_widget(w);
    e.eval(&chain2, &mut ctx2).unwrap();
    assert_eq!(
        cfg.resolve(&["value"]).unwrap().value().as_str(),
        Some("surround")
    );
    assert_eq!(
        e.global().resolve(&["dst"]).unwrap().value().as_str(),
        Some("surround")
    );
    assert_eq!(opts.child_count(), 3);
}

#[test]
fn drained_expressions_stop_consuming_frames() {
    let (mut e, w) = engine_with_widget();
    let src = e.global().create("src");
    src.set_float(0.0);

    let chain = ChainBuilder::new("dyn.view", 1)
        .path(&["out"])
        .path(&["src"])
        .float(4.0)
        .call("iir", 2)
        .assign()
        .build()
        .unwrap();
    let mut ctx = EvalCtx::for_widget(w);
    e.eval(&chain, &mut ctx).unwrap();
    let out = e.global().resolve(&["out"]).unwrap();

    src.set_float(1.0);
    e.pump();
    for _ in 0..300 {
        e.frame(FRAME);
    }
    assert_eq!(float_of(&out), 1.0);

    // Once settled the expression keeps only its property dependency; a
    // new value change still re-runs it.
    src.set_float(2.0);
    e.pump();
    let v = float_of(&out);
    assert!(v > 1.0 && v < 2.0);
}
