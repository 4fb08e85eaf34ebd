//! Process-wide cache of external JSON(C) documents.
//!
//! Loads are lazy and memoized; reloads are explicit. Cached documents are
//! reference-counted, so expressions that bind cells against a cached
//! document keep it alive for as long as they exist.
//!
//! Resource keys combine a path and a document key with a colon:
//! `Resources/Data/constants.jsonc:physics.gravity`.

use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::document::Document;
use crate::jsonc;
use crate::value::DocValue;

pub struct DocumentCache {
    docs: Mutex<AHashMap<String, Arc<Document>>>,
    raw: Mutex<AHashMap<String, Arc<String>>>,
}

impl DocumentCache {
    fn new() -> Self {
        Self {
            docs: Mutex::new(AHashMap::new()),
            raw: Mutex::new(AHashMap::new()),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static DocumentCache {
        static CACHE: OnceLock<DocumentCache> = OnceLock::new();
        CACHE.get_or_init(DocumentCache::new)
    }

    /// Raw text of the document at `path` (comments intact), memoized.
    /// Returns an empty string when the file cannot be read.
    pub fn doc_string(&self, path: &str) -> Arc<String> {
        if let Some(text) = self.raw.lock().get(path).cloned() {
            return text;
        }
        let loaded = Arc::new(std::fs::read_to_string(path).unwrap_or_default());
        self.raw
            .lock()
            .entry(path.to_string())
            .or_insert(loaded)
            .clone()
    }

    /// Parsed document at `path`, memoized. Missing files parse to an empty
    /// document; the entry is still cached so retries stay cheap.
    pub fn doc(&self, path: &str) -> Arc<Document> {
        if let Some(doc) = self.docs.lock().get(path).cloned() {
            return doc;
        }
        debug!(target: "document.cache", path, "loading external document");
        let text = self.doc_string(path);
        let doc = Arc::new(Document::new());
        if !text.is_empty() {
            doc.deserialize(&text);
        }
        self.docs
            .lock()
            .entry(path.to_string())
            .or_insert(doc)
            .clone()
    }

    /// Reads a value through a `path:key` resource link.
    pub fn get<T: DocValue>(&self, link: &str, default: T) -> T {
        let (path, key) = split_link(link);
        self.doc(path).get(key, default)
    }

    /// Drops the memoized entries for `path`; the next access reloads.
    pub fn reload(&self, path: &str) {
        self.docs.lock().remove(path);
        self.raw.lock().remove(path);
    }
}

/// Splits a resource link into `(path, key)`. Without a colon the whole link
/// is the path and the key is the document root.
pub fn split_link(link: &str) -> (&str, &str) {
    match link.split_once(':') {
        Some((path, key)) => (path, key),
        None => (link, ""),
    }
}

/// True if `link` denotes a JSON or JSONC file (by extension or content).
pub fn is_json_link(link: &str) -> bool {
    link.ends_with(".json") || link.ends_with(".jsonc") || jsonc::is_json_text(link)
}
