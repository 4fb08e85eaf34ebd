//! Pure transformation pipeline for piped read queries.
//!
//! `doc.get("arr|at 1|add 0.5|toInt", …)` clones the sub-document at `arr`
//! into a scratch document and runs each step against the scratch root (the
//! empty key). A step that fails leaves the scratch unchanged and aborts the
//! pipeline; the caller then falls back to its default value.

use tracing::warn;

use crate::capture;
use crate::document::{Document, MemberKind};

/// The synthetic root key transformations operate on.
const ROOT: &str = "";

/// Applies every step in order; `false` aborts the pipeline.
pub(crate) fn apply_steps(doc: &Document, steps: &[&str]) -> bool {
    steps.iter().all(|step| apply_one(doc, step))
}

fn apply_one(doc: &Document, step: &str) -> bool {
    let tokens: Vec<&str> = step.split_whitespace().collect();
    let Some((&name, args)) = tokens.split_first() else {
        return false;
    };
    match name {
        // Arithmetic
        "add" => fold_numeric(doc, args, |cur, n| cur + n),
        "multiply" => fold_numeric(doc, args, |cur, n| cur * n),
        "mod" => modulo(doc, args),
        "pow" => power(doc, args),
        // Array-related
        "ensureArray" => ensure_array(doc),
        "at" => at(doc, args),
        "length" => length(doc),
        "reverse" => reverse(doc),
        "first" => first(doc),
        "last" => last(doc),
        // Assertions
        "assertNonEmpty" => {
            let ok = doc.member_kind(ROOT) != MemberKind::Null;
            if !ok {
                capture::err("assertNonEmpty: value is null");
            }
            ok
        }
        // Casting
        "toInt" => {
            let v = doc.get(ROOT, 0.0);
            doc.set(ROOT, v as i64);
            true
        }
        "toString" => {
            let v = doc.get(ROOT, String::new());
            doc.set(ROOT, v);
            true
        }
        "toDouble" => {
            let v = doc.get(ROOT, 0.0);
            doc.set(ROOT, v);
            true
        }
        "toBool" => to_bool(doc),
        "toBoolString" => {
            let v = doc.get(ROOT, false);
            doc.set(ROOT, (if v { "true" } else { "false" }).to_string());
            true
        }
        // Collection
        "map" => map(doc, args),
        "get" => get(doc, args),
        // Debugging
        "echo" => {
            capture::out(args.join(" "));
            true
        }
        "print" => {
            let key = args.first().copied().unwrap_or(ROOT);
            capture::out(doc.serialize(key));
            true
        }
        // Domain passthrough
        "nebs" => doc.run_hook(&args.join(" ")),
        // Type-related
        "typeAsNumber" => {
            let n = match doc.member_kind(ROOT) {
                MemberKind::Null => 0i64,
                MemberKind::Value => 1,
                MemberKind::Array => 2,
                MemberKind::Object => 3,
            };
            doc.set(ROOT, n);
            true
        }
        "typeAsString" => {
            let s = match doc.member_kind(ROOT) {
                MemberKind::Null => "null",
                MemberKind::Value => "value",
                MemberKind::Array => "array",
                MemberKind::Object => "object",
            };
            doc.set(ROOT, s.to_string());
            true
        }
        other => {
            warn!(target: "document.transform", transformation = other, "unknown transformation");
            false
        }
    }
}

fn parse_number(arg: &str) -> Option<f64> {
    arg.parse::<f64>().ok()
}

fn fold_numeric(doc: &Document, args: &[&str], f: impl Fn(f64, f64) -> f64) -> bool {
    if args.is_empty() {
        return false;
    }
    for arg in args {
        let Some(n) = parse_number(arg) else {
            return false;
        };
        let current = doc.get(ROOT, 0.0);
        doc.set(ROOT, f(current, n));
    }
    true
}

fn modulo(doc: &Document, args: &[&str]) -> bool {
    let [arg] = args else { return false };
    let Some(divisor) = parse_number(arg) else {
        return false;
    };
    if divisor.abs() < f64::EPSILON {
        return false;
    }
    let current = doc.get(ROOT, 0.0);
    doc.set(ROOT, current % divisor);
    true
}

fn power(doc: &Document, args: &[&str]) -> bool {
    let [arg] = args else { return false };
    let Some(exponent) = parse_number(arg) else {
        return false;
    };
    let current = doc.get(ROOT, 0.0);
    doc.set(ROOT, current.powf(exponent));
    true
}

/// Wraps a scalar root into a one-element array; arrays pass through.
fn ensure_array(doc: &Document) -> bool {
    if doc.member_kind(ROOT) != MemberKind::Array {
        let wrapped = doc.sub_doc(ROOT);
        doc.set_empty_array(ROOT);
        doc.set_sub_doc("[0]", &wrapped);
    }
    doc.member_kind(ROOT) == MemberKind::Array
}

fn at(doc: &Document, args: &[&str]) -> bool {
    let [arg] = args else { return false };
    let Ok(index) = arg.parse::<usize>() else {
        return false;
    };
    if !ensure_array(doc) {
        return false;
    }
    if index >= doc.member_size(ROOT) {
        return false;
    }
    let element = doc.sub_doc(&format!("[{index}]"));
    doc.set_sub_doc(ROOT, &element);
    true
}

fn length(doc: &Document) -> bool {
    if !ensure_array(doc) {
        return false;
    }
    let len = doc.member_size(ROOT);
    doc.set(ROOT, len as f64);
    true
}

fn reverse(doc: &Document) -> bool {
    if !ensure_array(doc) {
        return false;
    }
    let size = doc.member_size(ROOT);
    let source = doc.sub_doc(ROOT);
    for i in 0..size {
        let element = source.sub_doc(&format!("[{}]", size - 1 - i));
        doc.set_sub_doc(&format!("[{i}]"), &element);
    }
    true
}

fn first(doc: &Document) -> bool {
    at(doc, &["0"])
}

fn last(doc: &Document) -> bool {
    if !ensure_array(doc) {
        return false;
    }
    let size = doc.member_size(ROOT);
    if size == 0 {
        return false;
    }
    at(doc, &[&(size - 1).to_string()])
}

fn to_bool(doc: &Document) -> bool {
    let text = doc.get(ROOT, String::new()).to_lowercase();
    let value = match text.as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => doc.get(ROOT, false),
    };
    doc.set(ROOT, value);
    true
}

/// Applies one transformation to each element of the root array. Scalars are
/// wrapped first. Elements whose transformation fails become null.
fn map(doc: &Document, args: &[&str]) -> bool {
    if doc.member_kind(ROOT) == MemberKind::Value && !ensure_array(doc) {
        return false;
    }
    if doc.member_kind(ROOT) != MemberKind::Array {
        return false;
    }
    let inner_step = args.join(" ");
    let size = doc.member_size(ROOT);
    for i in 0..size {
        let element_key = format!("[{i}]");
        let element = doc.sub_doc(&element_key);
        if !apply_one(&element, &inner_step) {
            element.remove_key(ROOT);
        }
        doc.set_sub_doc(&element_key, &element);
    }
    true
}

fn get(doc: &Document, args: &[&str]) -> bool {
    let [key] = args else { return false };
    let sub = doc.sub_doc(key);
    doc.set_sub_doc(ROOT, &sub);
    true
}
