//! Thread-local pool of compiled expressions.
//!
//! Compiled expressions hold internally-buffered bindings and are therefore
//! not shareable across threads. A [`PooledExpr`] is the shareable handle:
//! it carries the source, the remanent context, and the fingerprint; each
//! thread that evaluates it materialises (once) its own compiled instance in
//! a thread-local map. Evaluating the same expression text from many worker
//! threads touches no shared mutable state and no locks.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashMap;
use core_document::Document;

use crate::expression::{ExprContext, Expression, fingerprint_for};

thread_local! {
    static POOL: RefCell<AHashMap<u64, Rc<Expression>>> = RefCell::new(AHashMap::new());
}

/// Shareable handle to a pooled compiled expression.
#[derive(Clone)]
pub struct PooledExpr {
    source: String,
    ctx: ExprContext,
    fingerprint: u64,
    returnable_as_double: bool,
    always_true: bool,
    variable_count: usize,
}

impl PooledExpr {
    /// Parses `source` once on the calling thread (seeding its pool slot)
    /// and records the derived evaluation flags.
    pub fn parse(source: &str, ctx: ExprContext) -> PooledExpr {
        let fingerprint = fingerprint_for(source, &ctx);
        let expr = pooled_instance(fingerprint, source, &ctx);
        PooledExpr {
            source: source.to_string(),
            ctx,
            fingerprint,
            returnable_as_double: expr.is_returnable_as_double(),
            always_true: expr.is_always_true(),
            variable_count: expr.variable_count(),
        }
    }

    fn with_expr<R>(&self, f: impl FnOnce(&Expression) -> R) -> R {
        let expr = pooled_instance(self.fingerprint, &self.source, &self.ctx);
        f(&expr)
    }

    pub fn eval(&self, other: Option<&Arc<Document>>) -> String {
        self.with_expr(|e| e.eval(other))
    }

    pub fn eval_as_double(&self, other: Option<&Arc<Document>>) -> f64 {
        self.with_expr(|e| e.eval_as_double(other))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn is_returnable_as_double(&self) -> bool {
        self.returnable_as_double
    }

    pub fn is_always_true(&self) -> bool {
        self.always_true
    }

    /// Number of registered variables; the ruleset cost heuristic.
    pub fn variable_count(&self) -> usize {
        self.variable_count
    }
}

fn pooled_instance(fingerprint: u64, source: &str, ctx: &ExprContext) -> Rc<Expression> {
    POOL.with(|pool| {
        if let Some(existing) = pool.borrow().get(&fingerprint) {
            return existing.clone();
        }
        let compiled = Rc::new(Expression::parse(source, ctx.clone()));
        pool.borrow_mut().insert(fingerprint, compiled.clone());
        compiled
    })
}
