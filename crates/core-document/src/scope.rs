//! Prefix-restricted views over a document store.
//!
//! A `DocScope` holds a shared reference to a [`Document`] plus a dotted
//! prefix; every operation translates `k` into `prefix.k` before touching the
//! store. Scopes nest (a child scope concatenates prefixes) and, since the
//! store is reference-counted, a shared scope may outlive the call that
//! created it.

use std::sync::Arc;

use thiserror::Error;

use crate::cell::CellRef;
use crate::document::{Document, MemberKind};
use crate::value::{DocValue, SimpleValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope `{requested}` does not extend `{own}`")]
    OutsideScope { own: String, requested: String },
}

#[derive(Clone)]
pub struct DocScope {
    doc: Arc<Document>,
    /// Dotted prefix without a trailing dot; empty means root.
    prefix: String,
}

impl DocScope {
    pub fn new(doc: Arc<Document>, prefix: impl Into<String>) -> Self {
        Self {
            doc,
            prefix: prefix.into(),
        }
    }

    pub fn root(doc: Arc<Document>) -> Self {
        Self::new(doc, "")
    }

    pub fn doc(&self) -> &Arc<Document> {
        &self.doc
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A child scope whose prefix extends this one.
    pub fn sub_scope(&self, suffix: &str) -> DocScope {
        DocScope::new(self.doc.clone(), self.translate(suffix))
    }

    /// Translates a scope-relative key into a store key.
    pub fn translate(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else if key.is_empty() {
            self.prefix.clone()
        } else if key.starts_with('[') {
            format!("{}{}", self.prefix, key)
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    /// Validates that an explicitly-scoped key falls inside this scope and
    /// returns it relative to the scope root. A key scoped to `p2.` handed to
    /// a view with prefix `p1.` must satisfy `p2.` starts with `p1.`.
    pub fn rebase(&self, absolute_key: &str) -> Result<String, ScopeError> {
        if self.prefix.is_empty() {
            return Ok(absolute_key.to_string());
        }
        absolute_key
            .strip_prefix(&self.prefix)
            .map(|rest| rest.trim_start_matches('.').to_string())
            .ok_or_else(|| ScopeError::OutsideScope {
                own: self.prefix.clone(),
                requested: absolute_key.to_string(),
            })
    }

    //------------------------------------------------------------------
    // Forwarded store operations

    pub fn get<T: DocValue>(&self, key: &str, default: T) -> T {
        self.doc.get(&self.translate(key), default)
    }

    pub fn variant(&self, key: &str) -> Option<SimpleValue> {
        self.doc.variant(&self.translate(key))
    }

    pub fn set<T: DocValue>(&self, key: &str, value: T) {
        self.doc.set(&self.translate(key), value);
    }

    pub fn set_add(&self, key: &str, delta: f64) {
        self.doc.set_add(&self.translate(key), delta);
    }

    pub fn set_multiply(&self, key: &str, factor: f64) {
        self.doc.set_multiply(&self.translate(key), factor);
    }

    pub fn set_concat(&self, key: &str, suffix: &str) {
        self.doc.set_concat(&self.translate(key), suffix);
    }

    pub fn sub_doc(&self, key: &str) -> Document {
        self.doc.sub_doc(&self.translate(key))
    }

    pub fn set_sub_doc(&self, key: &str, child: &Document) {
        self.doc.set_sub_doc(&self.translate(key), child);
    }

    pub fn set_empty_array(&self, key: &str) {
        self.doc.set_empty_array(&self.translate(key));
    }

    pub fn remove_key(&self, key: &str) {
        self.doc.remove_key(&self.translate(key));
    }

    pub fn member_kind(&self, key: &str) -> MemberKind {
        self.doc.member_kind(&self.translate(key))
    }

    pub fn member_size(&self, key: &str) -> usize {
        self.doc.member_size(&self.translate(key))
    }

    pub fn stable_cell(&self, key: &str) -> CellRef {
        self.doc.stable_cell(&self.translate(key))
    }

    pub fn serialize(&self, key: &str) -> String {
        self.doc.serialize(&self.translate(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_through_prefix() {
        let doc = Arc::new(Document::new());
        let scope = DocScope::new(doc.clone(), "renderer");
        scope.set("fps", 60.0);
        assert_eq!(doc.get("renderer.fps", 0.0), 60.0);
        assert_eq!(scope.get("fps", 0.0), 60.0);
    }

    #[test]
    fn nesting_concatenates_prefixes() {
        let doc = Arc::new(Document::new());
        let outer = DocScope::new(doc.clone(), "a");
        let inner = outer.sub_scope("b");
        inner.set("c", 1.0);
        assert_eq!(doc.get("a.b.c", 0.0), 1.0);
    }

    #[test]
    fn rebase_enforces_scope_compatibility() {
        let doc = Arc::new(Document::new());
        let scope = DocScope::new(doc, "a.b");
        assert_eq!(scope.rebase("a.b.c").unwrap(), "c");
        assert!(scope.rebase("other.c").is_err());
    }

    #[test]
    fn shared_scope_outlives_creator() {
        let doc = Arc::new(Document::new());
        let scope = {
            let temp = DocScope::new(doc.clone(), "kept");
            temp.sub_scope("alive")
        };
        scope.set("x", 2.0);
        assert_eq!(doc.get("kept.alive.x", 0.0), 2.0);
    }
}
