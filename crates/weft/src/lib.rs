#![forbid(unsafe_code)]

//! Public facade for the weft binding engine.
//!
//! Re-exports the property graph, the widget tree and the view engine
//! under one roof. Most embedders want [`prelude`].

pub use weft_prop as prop;
pub use weft_view as view;
pub use weft_widgets as widgets;

pub mod prelude {
    pub use weft_prop::{Courier, CourierSender, Prop, PropEvent, PropValue, StrKind};
    pub use weft_view::{
        Block, BlockBuilder, Chain, ChainBuilder, DynFlags, Engine, EngineOptions, EvalCtx,
        EvalError, Scopes, Signal, Token,
    };
    pub use weft_widgets::{AttrValue, WidgetId, WidgetTree, class_by_name};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn facade_builds_a_working_engine() {
        let mut engine = Engine::new();
        let root = engine.create_root_widget(class_by_name("container").unwrap());
        let chain = ChainBuilder::new("smoke.view", 1)
            .path(&["out"])
            .int(2)
            .int(3)
            .multiply()
            .assign()
            .build()
            .unwrap();
        let mut ctx = EvalCtx::for_widget(root);
        engine.eval(&chain, &mut ctx).unwrap();
        let out = engine.global().resolve(&["out"]).unwrap();
        assert_eq!(out.value(), PropValue::Int(6));
    }
}
