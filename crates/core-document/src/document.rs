//! The document store: a JSON tree with a stable-cell cache.
//!
//! Every key that has been read or written through the cache owns a
//! [`CacheEntry`] holding the semantic value, a stable [`NumCell`] and the
//! last numeric value observed through that cell. The protocol:
//!
//! * Reads consult the cache first; a cell whose bits drifted from
//!   `last_synced` promotes the entry to `Dirty` and re-synchronises the
//!   semantic value from the cell.
//! * `flush` writes every dirty entry back into the tree and marks it clean.
//! * Structural writes (new keys, sub-document insertion, array rebuilds)
//!   flush first, then mark every descendant entry `Deleted`.
//! * `Malformed` entries (piped keys handed to cell resolution) never
//!   synchronise; their cell reads a stable zero.
//!
//! A reentrant mutex serialises all access; `lock()` hands out a scoped
//! handle so callers can make compound operations atomic.

use std::cell::RefCell;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::cell::{CellRef, NumCell};
use crate::jsonc;
use crate::key::{self, Segment};
use crate::transform;
use crate::value::{DocValue, SimpleValue};

/// Change-detection threshold for cell writes.
pub const EPSILON: f64 = f64::EPSILON;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Clean,
    Dirty,
    /// Created for cell resolution of a key absent from the tree; the cell is
    /// live but the tree holds no value yet.
    Derived,
    Deleted,
    Malformed,
}

/// Classification of a key's target, as reported by [`Document::member_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Null,
    Value,
    Array,
    Object,
}

/// Hook invoked for command tokens in deserialize pipelines and the `nebs`
/// transformation. Installed by the layer that owns command dispatch.
pub type CommandHook = Arc<dyn Fn(&Document, &str) -> bool + Send + Sync>;

struct CacheEntry {
    value: SimpleValue,
    cell: CellRef,
    last_synced: f64,
    state: EntryState,
}

impl CacheEntry {
    fn zeroed(state: EntryState) -> Self {
        Self {
            value: SimpleValue::Float(0.0),
            cell: Arc::new(NumCell::new(0.0)),
            last_synced: 0.0,
            state,
        }
    }
}

struct Inner {
    root: Value,
    cache: AHashMap<String, CacheEntry>,
    /// Ordered cell lists built per expression fingerprint; see
    /// [`Document::ordered_cells`].
    ordered_cells: AHashMap<u64, Arc<Vec<CellRef>>>,
    hook: Option<CommandHook>,
}

/// Scoped lock handle over a document; holding it makes a sequence of
/// operations atomic with respect to other threads.
pub struct DocumentLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<Inner>>,
}

pub struct Document {
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(root: Value) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                root,
                cache: AHashMap::new(),
                ordered_cells: AHashMap::new(),
                hook: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }

    pub fn lock(&self) -> DocumentLock<'_> {
        DocumentLock {
            _guard: self.inner.lock(),
        }
    }

    pub fn set_command_hook(&self, hook: CommandHook) {
        self.with(|inner| inner.hook = Some(hook));
    }

    fn hook(&self) -> Option<CommandHook> {
        self.with(|inner| inner.hook.clone())
    }

    /// Runs `command` through the installed command hook, if any.
    pub fn run_hook(&self, command: &str) -> bool {
        match self.hook() {
            Some(hook) => hook(self, command),
            None => {
                warn!(target: "document", command, "command hook not installed");
                false
            }
        }
    }

    //------------------------------------------------------------------
    // Reads

    pub fn get<T: DocValue>(&self, key: &str, default: T) -> T {
        if key.contains('|') {
            return match self.transformed(key) {
                Some(scratch) => scratch
                    .with(|inner| get_value_locked::<T>(inner, ""))
                    .unwrap_or(default),
                None => default,
            };
        }
        self.with(|inner| get_value_locked::<T>(inner, key))
            .unwrap_or(default)
    }

    pub fn variant(&self, key: &str) -> Option<SimpleValue> {
        if key.contains('|') {
            return self
                .transformed(key)
                .and_then(|scratch| scratch.with(|inner| variant_locked(inner, "")));
        }
        self.with(|inner| variant_locked(inner, key))
    }

    /// Clones the sub-tree at `key` into a fresh document. Missing keys
    /// yield an empty document; piped keys run the transformation pipeline.
    pub fn sub_doc(&self, key: &str) -> Document {
        if key.contains('|') {
            return self.transformed(key).unwrap_or_default();
        }
        let value = self.with(|inner| {
            flush_locked(inner);
            traverse(&inner.root, key).cloned()
        });
        match value {
            Some(v) => Document::from_value(v),
            None => Document::new(),
        }
    }

    /// Returns the stable cell for `key`, creating a `Derived` (or, for
    /// piped keys, `Malformed`) entry when the key cannot be resolved.
    pub fn stable_cell(&self, key: &str) -> CellRef {
        self.with(|inner| {
            if key.contains('|') {
                error!(target: "document.cache", key, "transformations are not supported in cell resolution; registering malformed entry");
                return inner
                    .cache
                    .entry(key.to_string())
                    .or_insert_with(|| CacheEntry::zeroed(EntryState::Malformed))
                    .cell
                    .clone();
            }
            if let Some(entry) = inner.cache.get_mut(key) {
                if entry.state == EntryState::Deleted {
                    let refreshed = traverse(&inner.root, key)
                        .and_then(SimpleValue::from_json)
                        .map_or(0.0, |sv| sv.as_f64());
                    entry.cell.set(refreshed);
                    entry.last_synced = refreshed;
                    entry.value = SimpleValue::Float(refreshed);
                    entry.state = EntryState::Derived;
                }
                return entry.cell.clone();
            }
            if let Some(sv) = traverse(&inner.root, key).and_then(SimpleValue::from_json) {
                let numeric = sv.as_f64();
                let entry = CacheEntry {
                    value: sv,
                    cell: Arc::new(NumCell::new(numeric)),
                    last_synced: numeric,
                    state: EntryState::Clean,
                };
                return inner
                    .cache
                    .entry(key.to_string())
                    .or_insert(entry)
                    .cell
                    .clone();
            }
            inner
                .cache
                .entry(key.to_string())
                .or_insert_with(|| CacheEntry::zeroed(EntryState::Derived))
                .cell
                .clone()
        })
    }

    pub fn member_kind(&self, key: &str) -> MemberKind {
        if key.contains('|') {
            return match self.transformed(key) {
                Some(scratch) => scratch.member_kind(""),
                None => MemberKind::Null,
            };
        }
        self.with(|inner| {
            if let Some(entry) = inner.cache.get(key) {
                if !matches!(entry.state, EntryState::Deleted | EntryState::Malformed) {
                    return MemberKind::Value;
                }
            }
            flush_locked(inner);
            match traverse(&inner.root, key) {
                None | Some(Value::Null) => MemberKind::Null,
                Some(Value::Array(_)) => MemberKind::Array,
                Some(Value::Object(_)) => MemberKind::Object,
                Some(_) => MemberKind::Value,
            }
        })
    }

    pub fn member_size(&self, key: &str) -> usize {
        if key.contains('|') {
            return match self.transformed(key) {
                Some(scratch) => scratch.member_size(""),
                None => 0,
            };
        }
        match self.member_kind(key) {
            MemberKind::Null => 0,
            MemberKind::Value | MemberKind::Object => 1,
            MemberKind::Array => self.with(|inner| {
                flush_locked(inner);
                traverse(&inner.root, key)
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len)
            }),
        }
    }

    //------------------------------------------------------------------
    // Writes

    pub fn set<T: DocValue>(&self, key: &str, value: T) {
        let sv = value.into_simple();
        self.with(|inner| set_variant_locked(inner, key, sv));
    }

    pub fn set_sub_doc(&self, key: &str, child: &Document) {
        let child_value = child.to_value();
        self.with(|inner| {
            flush_locked(inner);
            match ensure_path(&mut inner.root, key) {
                Some(slot) => {
                    *slot = child_value;
                    invalidate_children(inner, key);
                }
                None => error!(target: "document", key, "failed to create or access path"),
            }
        });
    }

    pub fn set_empty_array(&self, key: &str) {
        self.with(|inner| {
            flush_locked(inner);
            match ensure_path(&mut inner.root, key) {
                Some(slot) => {
                    *slot = Value::Array(Vec::new());
                    invalidate_children(inner, key);
                }
                None => error!(target: "document", key, "failed to create or access path"),
            }
        });
    }

    pub fn remove_key(&self, key: &str) {
        self.with(|inner| {
            flush_locked(inner);
            inner.cache.remove(key);
            invalidate_children(inner, key);
            remove_member(&mut inner.root, key);
        });
    }

    //------------------------------------------------------------------
    // Threadsafe increments
    //
    // Once a cache entry exists these go cell-direct; the semantic value
    // re-synchronises on the next read through the change-detection path.

    pub fn set_add(&self, key: &str, delta: f64) {
        self.numeric_rmw(key, |cur| cur + delta);
    }

    pub fn set_multiply(&self, key: &str, factor: f64) {
        self.numeric_rmw(key, |cur| cur * factor);
    }

    fn numeric_rmw(&self, key: &str, f: impl Fn(f64) -> f64) {
        self.with(|inner| {
            let has_live_entry = inner
                .cache
                .get(key)
                .is_some_and(|e| !matches!(e.state, EntryState::Deleted | EntryState::Malformed));
            if has_live_entry {
                let current = variant_locked(inner, key).map_or(0.0, |sv| sv.as_f64());
                if let Some(entry) = inner.cache.get_mut(key) {
                    entry.cell.set(f(current));
                }
            } else {
                let current = get_value_locked::<f64>(inner, key).unwrap_or(0.0);
                set_variant_locked(inner, key, SimpleValue::Float(f(current)));
            }
        });
    }

    pub fn set_concat(&self, key: &str, suffix: &str) {
        self.with(|inner| {
            let current = get_value_locked::<String>(inner, key).unwrap_or_default();
            set_variant_locked(inner, key, SimpleValue::Str(current + suffix));
            // Strings read zero through the cell.
            if let Some(entry) = inner.cache.get_mut(key) {
                entry.cell.set(0.0);
                entry.last_synced = 0.0;
            }
        });
    }

    //------------------------------------------------------------------
    // Flush / serialize

    /// Writes every dirty entry back into the JSON tree, marking it clean.
    pub fn flush(&self) {
        self.with(flush_locked);
    }

    pub fn serialize(&self, key: &str) -> String {
        if key.is_empty() {
            return self.with(|inner| {
                flush_locked(inner);
                serde_json::to_string_pretty(&inner.root).unwrap_or_else(|_| "{}".to_string())
            });
        }
        self.sub_doc(key).serialize("")
    }

    /// Flushes and clones the backing JSON value.
    pub fn to_value(&self) -> Value {
        self.with(|inner| {
            flush_locked(inner);
            inner.root.clone()
        })
    }

    /// Loads the document from a serialized form, a file path, or a load
    /// specifier with a `|cmd|cmd` pipeline tail. Existing cache entries are
    /// marked deleted and their cells refreshed from the new tree.
    pub fn deserialize(&self, source: &str) {
        let (head, commands): (&str, Vec<&str>) = if jsonc::is_json_text(source) {
            (source, Vec::new())
        } else {
            let mut parts = source.split('|');
            let head = parts.next().unwrap_or_default();
            (head, parts.collect())
        };

        let text = if jsonc::is_json_text(head) {
            head.to_string()
        } else {
            match std::fs::read_to_string(head.trim()) {
                Ok(text) => text,
                Err(err) => {
                    error!(target: "document", path = head.trim(), %err, "failed to read document");
                    String::new()
                }
            }
        };
        let parsed: Value = if text.is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str(&jsonc::strip_comments(&text)) {
                Ok(v) => v,
                Err(err) => {
                    error!(target: "document", %err, "failed to parse document");
                    Value::Object(Map::new())
                }
            }
        };

        self.with(|inner| {
            inner.root = parsed;
            for entry in inner.cache.values_mut() {
                entry.state = EntryState::Deleted;
            }
            // Refresh cells from the new tree so live expression bindings
            // observe the loaded values.
            let Inner { root, cache, .. } = inner;
            for (key, entry) in cache.iter_mut() {
                let refreshed = traverse(root, key)
                    .and_then(SimpleValue::from_json)
                    .map_or(0.0, |sv| sv.as_f64());
                entry.cell.set(refreshed);
                entry.last_synced = refreshed;
                entry.value = SimpleValue::Float(refreshed);
            }
        });

        // Pipeline tail runs outside the borrow so hooks may re-enter.
        for command in commands {
            let command = command.trim();
            if command.is_empty() {
                continue;
            }
            if let Some((k, v)) = command.split_once('=') {
                self.set::<String>(k.trim(), v.trim().to_string());
            } else if !self.run_hook(command) {
                warn!(target: "document", command, "deserialize pipeline command failed");
            }
        }
    }

    //------------------------------------------------------------------
    // Expression support

    /// Returns the ordered cell list for an expression fingerprint, building
    /// it from `keys` on first use. The list is built once per
    /// (expression, document) pair and then reused on every evaluation.
    pub fn ordered_cells(&self, fingerprint: u64, keys: &[String]) -> Arc<Vec<CellRef>> {
        if let Some(existing) = self.with(|inner| inner.ordered_cells.get(&fingerprint).cloned()) {
            return existing;
        }
        let built: Arc<Vec<CellRef>> = Arc::new(keys.iter().map(|k| self.stable_cell(k)).collect());
        self.with(|inner| {
            inner
                .ordered_cells
                .entry(fingerprint)
                .or_insert(built)
                .clone()
        })
    }

    //------------------------------------------------------------------
    // Transformation pipelines

    fn transformed(&self, piped_key: &str) -> Option<Document> {
        let mut parts = piped_key.split('|');
        let base = parts.next().unwrap_or_default().trim();
        let steps: Vec<&str> = parts.map(str::trim).collect();
        if !key::is_valid(base) {
            error!(target: "document", key = piped_key, "malformed base key in transformation pipeline");
            return None;
        }
        let scratch = self.sub_doc(base);
        if let Some(hook) = self.hook() {
            scratch.set_command_hook(hook);
        }
        if transform::apply_steps(&scratch, &steps) {
            Some(scratch)
        } else {
            None
        }
    }
}

//----------------------------------------------------------------------
// Locked helpers (free functions over `Inner` so field borrows split)

fn variant_locked(inner: &mut Inner, key: &str) -> Option<SimpleValue> {
    if let Some(entry) = inner.cache.get_mut(key) {
        match entry.state {
            EntryState::Malformed => {
                warn!(target: "document.cache", key, "read of malformed cache entry");
                return None;
            }
            EntryState::Deleted => {}
            _ => {
                let current = entry.cell.get();
                if (current - entry.last_synced).abs() > EPSILON {
                    entry.last_synced = current;
                    entry.value = SimpleValue::Float(current);
                    entry.state = EntryState::Dirty;
                }
                return Some(entry.value.clone());
            }
        }
    }
    let sv = traverse(&inner.root, key).and_then(SimpleValue::from_json)?;
    let numeric = sv.as_f64();
    let entry = inner
        .cache
        .entry(key.to_string())
        .or_insert_with(|| CacheEntry::zeroed(EntryState::Clean));
    entry.value = sv.clone();
    entry.state = EntryState::Clean;
    entry.cell.set(numeric);
    entry.last_synced = numeric;
    Some(sv)
}

fn get_value_locked<T: DocValue>(inner: &mut Inner, key: &str) -> Option<T> {
    if let Some(sv) = variant_locked(inner, key) {
        return T::from_simple(&sv);
    }
    // Containers and null have no simple form; convert straight from the
    // tree after flushing pending cell writes.
    flush_locked(inner);
    T::from_json(traverse(&inner.root, key)?)
}

fn set_variant_locked(inner: &mut Inner, key: &str, sv: SimpleValue) {
    if !key::is_valid(key) {
        error!(target: "document", key, "invalid key");
        return;
    }
    if key.contains('|') {
        error!(target: "document", key, "transformations are not supported in set()");
        return;
    }
    if let Some(entry) = inner.cache.get_mut(key) {
        let numeric = sv.as_f64();
        entry.value = sv;
        entry.state = EntryState::Dirty;
        entry.cell.set(numeric);
        entry.last_synced = numeric;
    } else {
        invalidate_children(inner, key);
        let numeric = sv.as_f64();
        let entry = CacheEntry {
            value: sv,
            cell: Arc::new(NumCell::new(numeric)),
            last_synced: numeric,
            state: EntryState::Dirty,
        };
        inner.cache.insert(key.to_string(), entry);
        // New keys flush immediately so the tree gains the parent
        // object/array structure.
        flush_locked(inner);
    }
}

fn flush_locked(inner: &mut Inner) {
    let Inner { root, cache, .. } = inner;
    for (key, entry) in cache.iter_mut() {
        if entry.state == EntryState::Malformed {
            continue;
        }
        let current = entry.cell.get();
        if (current - entry.last_synced).abs() > EPSILON {
            entry.state = EntryState::Dirty;
            entry.last_synced = current;
            entry.value = SimpleValue::Float(current);
        }
        if entry.state == EntryState::Dirty {
            match ensure_path(root, key) {
                Some(slot) => *slot = entry.value.to_json(),
                None => {
                    error!(target: "document", key, "failed to flush cache entry");
                    continue;
                }
            }
            entry.state = EntryState::Clean;
        }
    }
}

fn invalidate_children(inner: &mut Inner, parent: &str) {
    for (key, entry) in inner.cache.iter_mut() {
        let is_child = if parent.is_empty() {
            true
        } else {
            key.starts_with(&format!("{parent}.")) || key.starts_with(&format!("{parent}["))
        };
        if is_child {
            entry.state = EntryState::Deleted;
            entry.value = SimpleValue::Float(0.0);
            entry.cell.set(0.0);
            entry.last_synced = 0.0;
        }
    }
}

//----------------------------------------------------------------------
// Tree traversal

pub(crate) fn traverse<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let segments = key::parse(key)?;
    let mut current = root;
    for segment in segments {
        current = match segment {
            Segment::Member(name) => current.as_object()?.get(name)?,
            Segment::Index(index) => current.as_array()?.get(index)?,
        };
    }
    Some(current)
}

pub(crate) fn ensure_path<'a>(root: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let segments = key::parse(key)?;
    let mut current = root;
    for segment in segments {
        match segment {
            Segment::Member(name) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let Value::Object(map) = current else {
                    return None;
                };
                current = map.entry(name.to_string()).or_insert(Value::Null);
            }
            Segment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let Value::Array(items) = current else {
                    return None;
                };
                while items.len() <= index {
                    items.push(Value::Null);
                }
                current = &mut items[index];
            }
        }
    }
    Some(current)
}

fn remove_member(root: &mut Value, key: &str) {
    let Some(segments) = key::parse(key) else {
        return;
    };
    let Some((last, parents)) = segments.split_last() else {
        // Removing the root resets it to an empty object.
        *root = Value::Object(Map::new());
        return;
    };
    let mut current = root;
    for segment in parents {
        current = match segment {
            Segment::Member(name) => match current.as_object_mut().and_then(|m| m.get_mut(*name)) {
                Some(v) => v,
                None => return,
            },
            Segment::Index(index) => match current.as_array_mut().and_then(|a| a.get_mut(*index)) {
                Some(v) => v,
                None => return,
            },
        };
    }
    match last {
        Segment::Member(name) => {
            if let Some(map) = current.as_object_mut() {
                map.remove(*name);
            }
        }
        Segment::Index(index) => {
            if let Some(items) = current.as_array_mut()
                && *index < items.len()
            {
                items.remove(*index);
            }
        }
    }
}
