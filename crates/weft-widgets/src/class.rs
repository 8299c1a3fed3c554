#![forbid(unsafe_code)]

//! Widget classes.
//!
//! A class is a small closed capability set: whether the widget supports a
//! single selected child, and whether it may host hidden children (a
//! requirement for list materialization, which parks a hidden anchor among
//! the children).

use std::fmt;

pub trait WidgetClass: Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Supports a single selected ("active") child.
    fn selectable(&self) -> bool {
        false
    }

    /// May host hidden children (cloner anchors).
    fn can_hide_children(&self) -> bool {
        false
    }
}

/// Generic vertical/horizontal grouping widget.
#[derive(Debug)]
pub struct Container;

impl WidgetClass for Container {
    fn name(&self) -> &'static str {
        "container"
    }

    fn can_hide_children(&self) -> bool {
        true
    }
}

/// Scrollable collection with one selected child.
#[derive(Debug)]
pub struct List;

impl WidgetClass for List {
    fn name(&self) -> &'static str {
        "list"
    }

    fn selectable(&self) -> bool {
        true
    }

    fn can_hide_children(&self) -> bool {
        true
    }
}

/// One entry of a list.
#[derive(Debug)]
pub struct Item;

impl WidgetClass for Item {
    fn name(&self) -> &'static str {
        "item"
    }
}

/// Leaf text widget.
#[derive(Debug)]
pub struct Label;

impl WidgetClass for Label {
    fn name(&self) -> &'static str {
        "label"
    }
}

/// Invisible placeholder, used as the cloner insertion anchor.
#[derive(Debug)]
pub struct Dummy;

impl WidgetClass for Dummy {
    fn name(&self) -> &'static str {
        "dummy"
    }
}

static CLASSES: &[&dyn WidgetClass] = &[&Container, &List, &Item, &Label, &Dummy];

/// Look up a class by its registered name.
pub fn class_by_name(name: &str) -> Option<&'static dyn WidgetClass> {
    CLASSES.iter().find(|c| c.name() == name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_all_builtins() {
        for name in ["container", "list", "item", "label", "dummy"] {
            assert!(class_by_name(name).is_some(), "missing class {name}");
        }
    }

    #[test]
    fn lookup_unknown_is_none() {
        assert!(class_by_name("carousel").is_none());
    }

    #[test]
    fn list_is_selectable_item_is_not() {
        assert!(class_by_name("list").unwrap().selectable());
        assert!(!class_by_name("item").unwrap().selectable());
    }
}
