#![forbid(unsafe_code)]

//! Cloner ordering under arbitrary mutation replay, and the pagination
//! trigger observed through the property graph.

use proptest::prelude::*;
use std::rc::Rc;
use weft_prop::{Courier, Prop, PropEvent};
use weft_view::{Block, BlockBuilder, ChainBuilder, Engine, EvalCtx};
use weft_widgets::{AttrValue, WidgetId, class_by_name};

fn item(name: &str) -> Prop {
    let p = Prop::root();
    p.create("name").set_str(name);
    p
}

fn cloner_chain() -> Rc<weft_view::Chain> {
    let template: Rc<Block> = BlockBuilder::new()
        .expr(
            ChainBuilder::new("order.view", 2)
                .attr("title")
                .path(&["self", "name"])
                .assign()
                .build()
                .unwrap(),
        )
        .build();
    ChainBuilder::new("order.view", 1)
        .path(&["items"])
        .ident("item")
        .block(template)
        .call("cloner", 3)
        .build()
        .unwrap()
}

fn entry_widgets(engine: &Engine, list: WidgetId) -> Vec<WidgetId> {
    engine
        .tree()
        .children(list)
        .into_iter()
        .filter(|c| {
            engine
                .tree()
                .get(*c)
                .is_some_and(|w| !w.flags.contains(weft_widgets::WidgetFlags::HIDDEN))
        })
        .collect()
}

fn titles(engine: &Engine, list: WidgetId) -> Vec<String> {
    entry_widgets(engine, list)
        .into_iter()
        .filter_map(|c| match engine.tree().get(c)?.attr("title") {
            Some(AttrValue::Str(s)) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Action {
    /// Insert a new item before the entry at (b % (len+1)); len means
    /// append.
    Add(u8),
    /// Remove the entry at (i % len).
    Del(u8),
    /// Move entry (i % len) before entry (b % (len+1)).
    Move(u8, u8),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        any::<u8>().prop_map(Action::Add),
        any::<u8>().prop_map(Action::Del),
        (any::<u8>(), any::<u8>()).prop_map(|(a, b)| Action::Move(a, b)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Replaying any add/del/move sequence against the cloner yields the
    /// same order as replaying it against a plain list.
    #[test]
    fn entry_order_matches_reference_model(actions in prop::collection::vec(action_strategy(), 1..40)) {
        let mut engine = Engine::new();
        let list = engine.create_root_widget(class_by_name("list").unwrap());
        let items = engine.global().create("items");

        let chain = cloner_chain();
        let mut ctx = EvalCtx::for_widget(list);
        engine.eval(&chain, &mut ctx).unwrap();

        // Reference model: names in order, alongside the live props.
        let mut model: Vec<(String, Prop)> = Vec::new();
        let mut serial = 0u32;

        for action in actions {
            match action {
                Action::Add(b) => {
                    let name = format!("n{serial}");
                    serial += 1;
                    let p = item(&name);
                    let slot = (b as usize) % (model.len() + 1);
                    let before = model.get(slot).map(|(_, p)| p.clone());
                    items.add_before(&p, before.as_ref());
                    model.insert(slot, (name, p));
                }
                Action::Del(i) => {
                    if model.is_empty() {
                        continue;
                    }
                    let idx = (i as usize) % model.len();
                    let (_, p) = model.remove(idx);
                    p.destroy();
                }
                Action::Move(i, b) => {
                    if model.is_empty() {
                        continue;
                    }
                    let idx = (i as usize) % model.len();
                    let entry = model.remove(idx);
                    let slot = (b as usize) % (model.len() + 1);
                    let before = model.get(slot).map(|(_, p)| p.clone());
                    items.move_before(&entry.1, before.as_ref());
                    model.insert(slot, entry);
                }
            }
            engine.pump();
            let expected: Vec<String> = model.iter().map(|(n, _)| n.clone()).collect();
            prop_assert_eq!(titles(&engine, list), expected);
        }
    }
}

#[test]
fn want_more_fires_exactly_once_at_95_percent() {
    let mut engine = Engine::new();
    let list = engine.create_root_widget(class_by_name("list").unwrap());
    let items = engine.global().create("items");
    for i in 0..100 {
        items.add(&item(&format!("n{i}")));
    }
    items.set_have_more(true);

    let chain = cloner_chain();
    let mut ctx = EvalCtx::for_widget(list);
    engine.eval(&chain, &mut ctx).unwrap();
    engine.pump();

    // Watch the collection through an independent courier for the
    // upstream want-more request.
    let probe = Courier::new();
    let (_h, _snap) = items.subscribe(&probe);
    let _ = probe.pump();
    let want_more_count = |probe: &Courier| {
        probe
            .pump()
            .into_iter()
            .filter(|n| matches!(n.event, PropEvent::WantMore))
            .count()
    };

    let entries = entry_widgets(&engine, list);
    assert_eq!(entries.len(), 100);

    // Scroll: entries become active one by one.
    let mut fired_at = None;
    for (pos, w) in entries.iter().enumerate() {
        engine.set_widget_active(*w, true);
        engine.pump();
        let fired = want_more_count(&probe);
        if fired > 0 {
            assert_eq!(fired, 1);
            assert!(fired_at.is_none(), "want-more fired twice");
            fired_at = Some(pos);
        }
    }
    assert_eq!(fired_at, Some(94), "0-indexed 95% of 100 entries");
}

#[test]
fn want_more_fires_for_the_last_entry_of_a_short_list() {
    let mut engine = Engine::new();
    let list = engine.create_root_widget(class_by_name("list").unwrap());
    let items = engine.global().create("items");
    for i in 0..3 {
        items.add(&item(&format!("n{i}")));
    }
    items.set_have_more(true);

    let chain = cloner_chain();
    let mut ctx = EvalCtx::for_widget(list);
    engine.eval(&chain, &mut ctx).unwrap();
    engine.pump();

    let probe = Courier::new();
    let (_h, _snap) = items.subscribe(&probe);
    let _ = probe.pump();

    let entries = entry_widgets(&engine, list);
    engine.set_widget_active(entries[2], true);
    engine.pump();

    let fired = probe
        .pump()
        .into_iter()
        .filter(|n| matches!(n.event, PropEvent::WantMore))
        .count();
    assert_eq!(fired, 1, "last entry active must request more");
}

#[test]
fn no_want_more_after_upstream_says_done() {
    let mut engine = Engine::new();
    let list = engine.create_root_widget(class_by_name("list").unwrap());
    let items = engine.global().create("items");
    for i in 0..2 {
        items.add(&item(&format!("n{i}")));
    }
    items.set_have_more(false);

    let chain = cloner_chain();
    let mut ctx = EvalCtx::for_widget(list);
    engine.eval(&chain, &mut ctx).unwrap();
    engine.pump();

    let probe = Courier::new();
    let (_h, _snap) = items.subscribe(&probe);
    let _ = probe.pump();

    for w in entry_widgets(&engine, list) {
        engine.set_widget_active(w, true);
    }
    engine.pump();

    let fired = probe
        .pump()
        .into_iter()
        .filter(|n| matches!(n.event, PropEvent::WantMore))
        .count();
    assert_eq!(fired, 0);
}
