//! A single `target op= expression` acting on self, other, or global.
//!
//! Assignment sources are the entries of a ruleset's `exprs[]` array:
//!
//! ```text
//! self.x = $(self.x + 1)
//! global.score += 1
//! other.msg |= hit
//! ```
//!
//! The left-hand prefix fixes the target document, the operator is the first
//! of `+=`, `*=`, `|=`, `=` found in the line. Numeric assignments to self
//! or global with statically-known keys resolve a stable cell at compile
//! time and skip document dispatch entirely on the hot path.

use std::sync::Arc;

use core_document::value::is_numeric_str;
use core_document::{CellRef, Document, capture};
use core_expr::{ExprContext, PooledExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    SelfDoc,
    Other,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Multiply,
    Concat,
}

impl AssignOp {
    fn is_numeric(self) -> bool {
        !matches!(self, AssignOp::Concat)
    }
}

enum TargetKey {
    Static(String),
    /// Keys containing `{…}` or `$(…)` re-evaluate per application.
    Dynamic(PooledExpr),
}

pub struct Assignment {
    target: TargetKind,
    key: TargetKey,
    op: AssignOp,
    value: PooledExpr,
    resolved_cell: Option<CellRef>,
}

enum Evaluated {
    Num(f64),
    Text(String),
}

impl Assignment {
    /// Parses one `exprs[]` line. Returns `None` when the line has no valid
    /// target prefix or operator.
    pub fn parse(line: &str, ctx: &ExprContext) -> Option<Assignment> {
        let line = line.trim();
        let (target, rest) = if let Some(rest) = line.strip_prefix("self.") {
            (TargetKind::SelfDoc, rest)
        } else if let Some(rest) = line.strip_prefix("other.") {
            (TargetKind::Other, rest)
        } else if let Some(rest) = line.strip_prefix("global.") {
            (TargetKind::Global, rest)
        } else {
            return None;
        };

        let (op, key_part, value_part) = if let Some(pos) = rest.find("+=") {
            (AssignOp::Add, &rest[..pos], &rest[pos + 2..])
        } else if let Some(pos) = rest.find("*=") {
            (AssignOp::Multiply, &rest[..pos], &rest[pos + 2..])
        } else if let Some(pos) = rest.find("|=") {
            (AssignOp::Concat, &rest[..pos], &rest[pos + 2..])
        } else if let Some(pos) = rest.find('=') {
            (AssignOp::Set, &rest[..pos], &rest[pos + 1..])
        } else {
            return None;
        };

        let key_src = key_part.trim();
        let key = if key_src.contains('{') || key_src.contains('$') {
            TargetKey::Dynamic(PooledExpr::parse(key_src, ctx.clone()))
        } else {
            TargetKey::Static(key_src.to_string())
        };
        Some(Assignment {
            target,
            key,
            op,
            value: PooledExpr::parse(value_part.trim(), ctx.clone()),
            resolved_cell: None,
        })
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    pub fn op(&self) -> AssignOp {
        self.op
    }

    pub fn has_resolved_cell(&self) -> bool {
        self.resolved_cell.is_some()
    }

    /// Resolves the stable target cell for numeric self/global assignments
    /// with static keys.
    pub fn optimize(&mut self, self_doc: &Arc<Document>, global: &Arc<Document>) {
        if !self.op.is_numeric() {
            return;
        }
        if let TargetKey::Static(key) = &self.key {
            self.resolved_cell = match self.target {
                TargetKind::SelfDoc => Some(self_doc.stable_cell(key)),
                TargetKind::Global => Some(global.stable_cell(key)),
                TargetKind::Other => None,
            };
        }
    }

    pub fn cost(&self) -> u64 {
        let key_cost = match &self.key {
            TargetKey::Static(_) => 0,
            TargetKey::Dynamic(expr) => expr.variable_count() as u64,
        };
        self.value.variable_count() as u64 + key_cost + 1
    }

    pub fn apply(
        &self,
        self_doc: &Arc<Document>,
        other: Option<&Arc<Document>>,
        global: &Arc<Document>,
    ) {
        let evaluated = match self.op {
            AssignOp::Concat => Evaluated::Text(self.value.eval(other)),
            _ if self.value.is_returnable_as_double() => {
                Evaluated::Num(self.value.eval_as_double(other))
            }
            _ => {
                let text = self.value.eval(other);
                if is_numeric_str(&text) {
                    Evaluated::Num(text.trim().parse().unwrap_or(0.0))
                } else {
                    Evaluated::Text(text)
                }
            }
        };

        // Fast path: write straight through the resolved cell; the cache
        // synchronises on the next read.
        if let (Some(cell), Evaluated::Num(n)) = (&self.resolved_cell, &evaluated) {
            match self.op {
                AssignOp::Set => cell.set(*n),
                AssignOp::Add => {
                    cell.update(|c| c + n);
                }
                AssignOp::Multiply => {
                    cell.update(|c| c * n);
                }
                AssignOp::Concat => {}
            }
            if self.op != AssignOp::Concat {
                return;
            }
        }

        let key = match &self.key {
            TargetKey::Static(key) => key.clone(),
            TargetKey::Dynamic(expr) => expr.eval(other),
        };
        let doc = match self.target {
            TargetKind::SelfDoc => self_doc,
            TargetKind::Global => global,
            TargetKind::Other => match other {
                Some(doc) => doc,
                None => {
                    capture::err(format!("assignment to other.{key} with no other context"));
                    return;
                }
            },
        };
        match (&self.op, evaluated) {
            (AssignOp::Set, Evaluated::Num(n)) => doc.set(&key, n),
            (AssignOp::Set, Evaluated::Text(t)) => doc.set(&key, t),
            (AssignOp::Add, Evaluated::Num(n)) => doc.set_add(&key, n),
            (AssignOp::Add, Evaluated::Text(_)) => doc.set_add(&key, 0.0),
            (AssignOp::Multiply, Evaluated::Num(n)) => doc.set_multiply(&key, n),
            (AssignOp::Multiply, Evaluated::Text(_)) => doc.set_multiply(&key, 0.0),
            (AssignOp::Concat, Evaluated::Num(n)) => {
                doc.set_concat(&key, &n.to_string());
            }
            (AssignOp::Concat, Evaluated::Text(t)) => doc.set_concat(&key, &t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExprContext {
        ExprContext::new(Arc::new(Document::new()), Arc::new(Document::new()))
    }

    #[test]
    fn parses_each_operator() {
        let c = ctx();
        let a = Assignment::parse("self.x = $(1+1)", &c).unwrap();
        assert_eq!((a.target(), a.op()), (TargetKind::SelfDoc, AssignOp::Set));
        let a = Assignment::parse("global.score += 1", &c).unwrap();
        assert_eq!((a.target(), a.op()), (TargetKind::Global, AssignOp::Add));
        let a = Assignment::parse("other.v *= $(2)", &c).unwrap();
        assert_eq!((a.target(), a.op()), (TargetKind::Other, AssignOp::Multiply));
        let a = Assignment::parse("other.msg |= hit", &c).unwrap();
        assert_eq!((a.target(), a.op()), (TargetKind::Other, AssignOp::Concat));
        assert!(Assignment::parse("x = 1", &c).is_none());
        assert!(Assignment::parse("self.x", &c).is_none());
    }

    #[test]
    fn optimized_numeric_set_goes_through_cell() {
        let c = ctx();
        c.self_doc.set("x", 1.0);
        let mut a = Assignment::parse("self.x += $(2)", &c).unwrap();
        a.optimize(&c.self_doc, &c.global);
        assert!(a.has_resolved_cell());
        a.apply(&c.self_doc, None, &c.global);
        a.apply(&c.self_doc, None, &c.global);
        assert_eq!(c.self_doc.get("x", 0.0), 5.0);
    }

    #[test]
    fn unoptimized_other_assignment_dispatches() {
        let c = ctx();
        let other = Arc::new(Document::new());
        other.set("hp", 5.0);
        let mut a = Assignment::parse("other.hp += -1", &c).unwrap();
        a.optimize(&c.self_doc, &c.global);
        assert!(!a.has_resolved_cell());
        a.apply(&c.self_doc, Some(&other), &c.global);
        assert_eq!(other.get("hp", 0.0), 4.0);
    }

    #[test]
    fn string_set_and_concat() {
        let c = ctx();
        let mut a = Assignment::parse("self.msg = hello", &c).unwrap();
        a.optimize(&c.self_doc, &c.global);
        a.apply(&c.self_doc, None, &c.global);
        assert_eq!(c.self_doc.get("msg", String::new()), "hello");

        let a = Assignment::parse("self.msg |= !", &c).unwrap();
        a.apply(&c.self_doc, None, &c.global);
        assert_eq!(c.self_doc.get("msg", String::new()), "hello!");
    }

    #[test]
    fn dynamic_target_key_re_resolves() {
        let c = ctx();
        c.self_doc.set("slot", 2.0);
        let a = Assignment::parse("self.arr[{self.slot}] = $(9)", &c).unwrap();
        a.apply(&c.self_doc, None, &c.global);
        assert_eq!(c.self_doc.get("arr[2]", 0.0), 9.0);
    }

    #[test]
    fn value_with_interpolation_assigns_evaluated_number() {
        let c = ctx();
        c.global.set("base", 10.0);
        let mut a = Assignment::parse("self.y = $(global.base * 3)", &c).unwrap();
        a.optimize(&c.self_doc, &c.global);
        a.apply(&c.self_doc, None, &c.global);
        assert_eq!(c.self_doc.get("y", 0.0), 30.0);
    }
}
