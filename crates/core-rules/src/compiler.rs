//! Ruleset compilation from an entity's `invokes[]` array.
//!
//! Each entry is one of:
//!
//! * `"::name"` — a static ruleset looked up in the registry,
//! * an inline ruleset object,
//! * a path to an external ruleset JSON(C), loaded through the document
//!   cache.
//!
//! Inline/external objects carry `topic` (default `"all"`, empty ⇒ local),
//! `logicalArg` (array entries are AND-joined with `*`; wrapped in `$(…)`
//! unless already wrapped), `exprs[]`, and the three `functioncalls.*`
//! lists. Self/other function calls are evaluated and dispatched inline at
//! apply time; global calls are deferred to the script queue.

use std::sync::Arc;

use core_document::{Document, DocumentCache, MemberKind, capture};
use core_expr::{ExprContext, PooledExpr};

use crate::assignment::Assignment;
use crate::ruleset::{Ruleset, RulesetParts, static_ruleset};
use crate::target::RuleTarget;

pub struct CompiledRulesets {
    pub local: Vec<Arc<Ruleset>>,
    pub global: Vec<Arc<Ruleset>>,
}

/// Parses and compiles the owner's rulesets. Entries that fail to parse are
/// skipped with a diagnostic; the remainder still compile.
pub fn compile(owner: &Arc<dyn RuleTarget>, global_doc: &Arc<Document>) -> CompiledRulesets {
    let mut local: Vec<Ruleset> = Vec::new();
    let mut global: Vec<Ruleset> = Vec::new();
    let doc = owner.doc();
    if doc.member_kind("invokes") != MemberKind::Array {
        return CompiledRulesets {
            local: Vec::new(),
            global: Vec::new(),
        };
    }
    let ctx = ExprContext::new(doc.clone(), global_doc.clone());

    for idx in 0..doc.member_size("invokes") {
        let key = format!("invokes[{idx}]");
        let parts = match doc.member_kind(&key) {
            MemberKind::Object => parse_entry(&doc.sub_doc(&key), &ctx),
            MemberKind::Value => {
                let spec = doc.get(&key, String::new());
                if let Some(name) = spec.strip_prefix("::") {
                    match static_ruleset(name) {
                        Some(def) => Some(RulesetParts {
                            topic: def.topic.clone(),
                            condition: PooledExpr::parse("1", ctx.clone()),
                            always_true: true,
                            assignments: Vec::new(),
                            calls_self: Vec::new(),
                            calls_other: Vec::new(),
                            calls_global: Vec::new(),
                            static_fn: Some(def.func),
                        }),
                        None => {
                            capture::err(format!("unknown static ruleset: ::{name}"));
                            None
                        }
                    }
                } else {
                    let text = DocumentCache::global().doc_string(&spec);
                    if text.is_empty() {
                        capture::err(format!("could not load ruleset file: {spec}"));
                        None
                    } else {
                        let entry = Document::new();
                        entry.deserialize(&text);
                        parse_entry(&entry, &ctx)
                    }
                }
            }
            _ => None,
        };
        let Some(parts) = parts else { continue };
        let ruleset = Ruleset::from_parts(
            parts,
            Arc::downgrade(owner),
            global_doc.clone(),
        );
        if ruleset.is_local() {
            local.push(ruleset);
        } else {
            global.push(ruleset);
        }
    }

    finalize(owner, global_doc, &mut local);
    finalize(owner, global_doc, &mut global);
    CompiledRulesets {
        local: local.into_iter().map(Arc::new).collect(),
        global: global.into_iter().map(Arc::new).collect(),
    }
}

fn parse_entry(entry: &Document, ctx: &ExprContext) -> Option<RulesetParts> {
    let topic = entry.get("topic", "all".to_string()).trim().to_string();
    let logical_src = build_logical_arg(entry);
    let always_true = logical_src.trim() == "$(1)";
    let condition = PooledExpr::parse(&logical_src, ctx.clone());

    // A ruleset with no expression list is considered malformed and skipped;
    // function-call-only rulesets still need an (empty) array.
    if entry.member_kind("exprs") != MemberKind::Array {
        return None;
    }
    let mut assignments = Vec::new();
    for j in 0..entry.member_size("exprs") {
        let line = entry.get(&format!("exprs[{j}]"), String::new());
        match Assignment::parse(&line, ctx) {
            Some(assignment) => assignments.push(assignment),
            None => capture::err(format!("skipping malformed ruleset expression: {line}")),
        }
    }

    Some(RulesetParts {
        topic,
        condition,
        always_true,
        assignments,
        calls_self: parse_calls(entry, "functioncalls.self", ctx),
        calls_other: parse_calls(entry, "functioncalls.other", ctx),
        calls_global: parse_calls(entry, "functioncalls.global", ctx),
        static_fn: None,
    })
}

/// Scalar `logicalArg` is used directly; arrays AND-join with `*`. Either
/// form is wrapped in `$(…)` unless the author already did.
fn build_logical_arg(entry: &Document) -> String {
    let logical = if entry.member_kind("logicalArg") == MemberKind::Array {
        let size = entry.member_size("logicalArg");
        let mut joined = String::new();
        for j in 0..size {
            let part = entry.get(&format!("logicalArg[{j}]"), "0".to_string());
            joined.push('(');
            joined.push_str(&part);
            joined.push(')');
            if j + 1 < size {
                joined.push('*');
            }
        }
        joined
    } else {
        entry.get("logicalArg", "0".to_string())
    };
    let logical = logical.trim();
    if logical.starts_with("$(") {
        logical.to_string()
    } else {
        format!("$({logical})")
    }
}

fn parse_calls(entry: &Document, key: &str, ctx: &ExprContext) -> Vec<PooledExpr> {
    if entry.member_kind(key) != MemberKind::Array {
        return Vec::new();
    }
    (0..entry.member_size(key))
        .map(|j| entry.get(&format!("{key}[{j}]"), String::new()))
        .filter(|line| !line.is_empty())
        .map(|line| PooledExpr::parse(&line, ctx.clone()))
        .collect()
}

fn finalize(owner: &Arc<dyn RuleTarget>, global_doc: &Arc<Document>, rulesets: &mut [Ruleset]) {
    let self_doc = owner.doc().clone();
    for (index, ruleset) in rulesets.iter_mut().enumerate() {
        ruleset.owner_id = owner.id();
        ruleset.index = index as u32;
        for assignment in ruleset.assignments_mut() {
            assignment.optimize(&self_doc, global_doc);
        }
    }
}
