#![forbid(unsafe_code)]

//! Scalar node state.

use std::rc::Rc;

/// String payload kind. Rich strings carry inline markup and must be
/// entity-escaped before being concatenated with plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrKind {
    Plain,
    Rich,
}

/// The scalar state of a property node.
///
/// A node is either a scalar leaf or a directory with ordered children;
/// setting a scalar on a directory destroys its children first.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Void,
    Int(i64),
    Float(f64),
    Str(Rc<str>, StrKind),
    Link { title: Rc<str>, url: Rc<str> },
    Directory,
}

impl PropValue {
    pub fn is_directory(&self) -> bool {
        matches!(self, PropValue::Directory)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, PropValue::Void)
    }

    /// String content, if this is a string-bearing state. Links yield their
    /// title.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s, _) => Some(s),
            PropValue::Link { title, .. } => Some(title),
            _ => None,
        }
    }
}

impl Default for PropValue {
    fn default() -> Self {
        PropValue::Void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_void() {
        assert!(PropValue::default().is_void());
    }

    #[test]
    fn as_str_reads_strings_and_link_titles() {
        let s = PropValue::Str("hello".into(), StrKind::Plain);
        assert_eq!(s.as_str(), Some("hello"));

        let l = PropValue::Link {
            title: "Home".into(),
            url: "page:home".into(),
        };
        assert_eq!(l.as_str(), Some("Home"));

        assert_eq!(PropValue::Int(3).as_str(), None);
    }
}
