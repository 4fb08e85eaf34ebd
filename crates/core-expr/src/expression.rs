//! Parsed, compiled text-with-eval strings.
//!
//! An expression source mixes three component kinds:
//!
//! * plain text,
//! * `{ctx.key}` variable references (`ctx` ∈ self | other | global, anything
//!   else resolves through the resource document cache),
//! * `$[format](…)` arithmetic regions, whose nested `{…}` references are
//!   rewritten to generated temporaries before compilation.
//!
//! Variables split by context into remanent bindings (self/global with
//! static keys — they alias the host document's stable cells) and
//! non-remanent bindings (other-context, dynamic keys, resource links) that
//! are refreshed before every evaluation. Other-context variables with
//! static keys are refreshed through an ordered cell list cached on the
//! other document, one tight copy loop per evaluation.

use std::sync::Arc;

use core_document::value::is_numeric_str;
use core_document::{Document, DocumentCache, capture};
use tracing::error;

use crate::ast::{self, Node};
use crate::format::{self, Cast, Format};
use crate::virtual_double::VirtualDouble;

/// Bound on nested `{…$(){…}}` resolution.
pub const MAX_RECURSION_DEPTH: u16 = 10;

/// The remanent documents an expression compiles against.
#[derive(Clone)]
pub struct ExprContext {
    pub self_doc: Arc<Document>,
    pub global: Arc<Document>,
}

impl ExprContext {
    pub fn new(self_doc: Arc<Document>, global: Arc<Document>) -> Self {
        Self { self_doc, global }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarContext {
    SelfDoc,
    Other,
    Global,
    Resource,
}

fn get_context(key: &str) -> VarContext {
    if key.starts_with("self.") {
        VarContext::SelfDoc
    } else if key.starts_with("other.") {
        VarContext::Other
    } else if key.starts_with("global.") {
        VarContext::Global
    } else {
        VarContext::Resource
    }
}

fn strip_context(key: &str) -> &str {
    for prefix in ["self.", "other.", "global."] {
        if let Some(stripped) = key.strip_prefix(prefix) {
            return stripped;
        }
    }
    key
}

struct Variable {
    /// Inner brace content as written, context prefix included.
    raw: String,
    /// Context-stripped key; resource keys keep the full link.
    key: String,
    context: VarContext,
    /// Static keys bind once; dynamic keys (containing `{`, `$` or `|`)
    /// re-resolve on every evaluation.
    stable: bool,
    binding: VirtualDouble,
}

enum Component {
    Text(String),
    Variable { inner: String },
    Eval { node: Node, format: Format },
}

pub struct Expression {
    source: String,
    fingerprint: u64,
    ctx: ExprContext,
    components: Vec<Component>,
    vars: Vec<Variable>,
    /// Slot indices (and keys, in the same order) of other-context variables
    /// refreshable through an ordered cell list.
    other_stable_slots: Vec<usize>,
    other_stable_keys: Vec<String>,
    returnable_as_double: bool,
    always_true: bool,
}

/// Identity of a compiled expression: source text plus the remanent documents
/// it binds against.
pub fn fingerprint_for(source: &str, ctx: &ExprContext) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x1000_0000_01b3;
    let mut hash = OFFSET;
    let mut step = |byte: u8| {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    };
    for b in source.bytes() {
        step(b);
    }
    for b in (Arc::as_ptr(&ctx.self_doc) as usize as u64).to_le_bytes() {
        step(b);
    }
    for b in (Arc::as_ptr(&ctx.global) as usize as u64).to_le_bytes() {
        step(b);
    }
    hash
}

impl Expression {
    pub fn parse(source: &str, ctx: ExprContext) -> Expression {
        let mut expr = Expression {
            source: source.to_string(),
            fingerprint: fingerprint_for(source, &ctx),
            ctx,
            components: Vec::new(),
            vars: Vec::new(),
            other_stable_slots: Vec::new(),
            other_stable_keys: Vec::new(),
            returnable_as_double: false,
            always_true: false,
        };
        expr.parse_into_components(source);
        for (slot, var) in expr.vars.iter().enumerate() {
            if var.context == VarContext::Other && var.stable {
                expr.other_stable_slots.push(slot);
                expr.other_stable_keys.push(var.key.clone());
            }
        }
        expr.returnable_as_double = matches!(
            expr.components.as_slice(),
            [Component::Eval { format, .. }] if format.cast == Cast::None
        );
        let trimmed = source.trim();
        expr.always_true = trimmed == "1" || trimmed == "$(1)";
        expr
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// True iff the expression is a single unformatted `$(…)` region, whose
    /// arithmetic result can be returned without string conversion.
    pub fn is_returnable_as_double(&self) -> bool {
        self.returnable_as_double
    }

    /// True for the literal condition `1`, which callers may short-circuit.
    pub fn is_always_true(&self) -> bool {
        self.always_true
    }

    pub fn variable_count(&self) -> usize {
        self.vars.len()
    }

    //------------------------------------------------------------------
    // Parsing

    fn parse_into_components(&mut self, source: &str) {
        let mut tokens: Vec<String> = Vec::new();
        for token in split_keep_dollar(source) {
            if token.starts_with('$') && token.contains('(') {
                let pos = token.find('(').unwrap_or(token.len());
                let head = &token[..pos];
                let mut groups = split_on_same_depth(&token[pos..], '(');
                if let Some(first) = groups.first_mut() {
                    *first = format!("{head}{first}");
                }
                tokens.extend(groups);
            } else {
                tokens.push(token);
            }
        }
        for token in tokens {
            if token.is_empty() {
                continue;
            }
            if token.starts_with('$') {
                self.parse_eval_token(&token);
            } else {
                self.parse_text_token(&token);
            }
        }
    }

    fn parse_eval_token(&mut self, token: &str) {
        let Some(pos) = token.find('(') else {
            self.components.push(Component::Text(token.to_string()));
            return;
        };
        let fmt = format::parse_format(&token[1..pos]);
        // Rewrite nested `{…}` references to generated slot names, then hand
        // the rewritten region to the arithmetic compiler. Bare dotted
        // identifiers (`self.hp`) register as variables during compilation.
        let mut compiled_src = String::new();
        for sub in split_on_same_depth(&token[pos..], '{') {
            if sub.starts_with('{') && sub.ends_with('}') {
                let slot = register_variable_in(&mut self.vars, &self.ctx, &sub[1..sub.len() - 1]);
                compiled_src.push_str(&format!("v{slot}"));
            } else {
                compiled_src.push_str(&sub);
            }
        }
        let vars = &mut self.vars;
        let ctx = &self.ctx;
        let node = match ast::compile(&compiled_src, &mut |name| {
            if let Some(slot) = name
                .strip_prefix('v')
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|slot| *slot < vars.len())
            {
                return Some(slot);
            }
            if name.contains('.') {
                return Some(register_variable_in(vars, ctx, name));
            }
            None
        }) {
            Ok(node) => node,
            Err(err) => {
                error!(
                    target: "expr",
                    expression = compiled_src,
                    %err,
                    "failed to compile arithmetic region; it will evaluate to NaN. \
                     When passing expressions through the shell, quote them so spaces survive."
                );
                Node::nan()
            }
        };
        self.components.push(Component::Eval { node, format: fmt });
    }

    fn parse_text_token(&mut self, token: &str) {
        for sub in split_on_same_depth(token, '{') {
            if sub.starts_with('{') && sub.ends_with('}') {
                self.components.push(Component::Variable {
                    inner: sub[1..sub.len() - 1].to_string(),
                });
            } else if !sub.is_empty() {
                self.components.push(Component::Text(sub));
            }
        }
    }

    //------------------------------------------------------------------
    // Evaluation

    pub fn eval(&self, other: Option<&Arc<Document>>) -> String {
        self.eval_depth(other, MAX_RECURSION_DEPTH)
    }

    pub(crate) fn eval_depth(&self, other: Option<&Arc<Document>>, depth: u16) -> String {
        self.update_caches(other, depth);
        let mut result = String::new();
        for component in &self.components {
            match component {
                Component::Text(text) => result.push_str(text),
                Component::Variable { inner } => {
                    match self.eval_variable(inner, other, depth) {
                        Some(token) => result.push_str(&token),
                        None => return "null".to_string(),
                    }
                }
                Component::Eval { node, format } => {
                    let value = node.eval(&|slot| self.vars[slot].binding.get());
                    result.push_str(&format::apply(value, format));
                }
            }
        }
        result
    }

    /// Defined iff [`Self::is_returnable_as_double`]; otherwise NaN.
    pub fn eval_as_double(&self, other: Option<&Arc<Document>>) -> f64 {
        self.update_caches(other, MAX_RECURSION_DEPTH);
        match self.components.first() {
            Some(Component::Eval { node, .. }) => node.eval(&|slot| self.vars[slot].binding.get()),
            _ => f64::NAN,
        }
    }

    fn eval_variable(
        &self,
        inner: &str,
        other: Option<&Arc<Document>>,
        depth: u16,
    ) -> Option<String> {
        let (context, key) = if inner.contains('$') || inner.contains('{') {
            if depth == 0 {
                capture::err(format!(
                    "maximum recursion depth reached while resolving variable: {inner}"
                ));
                return None;
            }
            let resolved = Expression::parse(inner, self.ctx.clone()).eval_depth(other, depth - 1);
            (get_context(&resolved), strip_context(&resolved).to_string())
        } else {
            (get_context(inner), strip_context(inner).to_string())
        };
        match context {
            VarContext::SelfDoc => Some(self.ctx.self_doc.get(&key, "null".to_string())),
            VarContext::Other => match other {
                Some(doc) => Some(doc.get(&key, "null".to_string())),
                None => {
                    capture::err(format!("null `other` reference in expression: {key}"));
                    None
                }
            },
            VarContext::Global => Some(self.ctx.global.get(&key, "null".to_string())),
            VarContext::Resource => Some(DocumentCache::global().get(&key, "null".to_string())),
        }
    }

    /// Refreshes every non-remanent binding so the compiled arithmetic reads
    /// current values.
    fn update_caches(&self, other: Option<&Arc<Document>>, depth: u16) {
        for var in &self.vars {
            match (var.context, var.stable) {
                // Remanent: the binding aliases a stable cell.
                (VarContext::SelfDoc, true) | (VarContext::Global, true) => {}
                // Other-stable is bulk-refreshed below.
                (VarContext::Other, true) => {}
                (VarContext::SelfDoc, false) => {
                    let key = self.resolve_dynamic_key(&var.key, other, depth);
                    var.binding.set_direct(self.ctx.self_doc.get(&key, 0.0));
                }
                (VarContext::Other, false) => {
                    let value = match other {
                        Some(doc) => {
                            let key = self.resolve_dynamic_key(&var.key, other, depth);
                            doc.get(&key, 0.0)
                        }
                        None => 0.0,
                    };
                    var.binding.set_direct(value);
                }
                (VarContext::Global, false) => {
                    let key = self.resolve_dynamic_key(&var.key, other, depth);
                    var.binding.set_direct(self.ctx.global.get(&key, 0.0));
                }
                (VarContext::Resource, true) => {
                    var.binding
                        .set_direct(DocumentCache::global().get(&var.key, 0.0));
                }
                (VarContext::Resource, false) => {
                    let key = self.resolve_dynamic_key(&var.key, other, depth);
                    var.binding
                        .set_direct(DocumentCache::global().get(&key, 0.0));
                }
            }
        }
        if !self.other_stable_slots.is_empty() {
            match other {
                Some(doc) => {
                    let cells = doc.ordered_cells(self.fingerprint, &self.other_stable_keys);
                    for (n, slot) in self.other_stable_slots.iter().enumerate() {
                        self.vars[*slot].binding.set_direct(cells[n].get());
                    }
                }
                None => {
                    for slot in &self.other_stable_slots {
                        self.vars[*slot].binding.set_direct(0.0);
                    }
                }
            }
        }
    }

    fn resolve_dynamic_key(
        &self,
        raw_key: &str,
        other: Option<&Arc<Document>>,
        depth: u16,
    ) -> String {
        if !(raw_key.contains('{') || raw_key.contains('$')) {
            return raw_key.to_string();
        }
        if depth == 0 {
            capture::err(format!(
                "maximum recursion depth reached while resolving key: {raw_key}"
            ));
            return String::new();
        }
        Expression::parse(raw_key, self.ctx.clone()).eval_depth(other, depth - 1)
    }
}

/// Transient boolean evaluation: parses, evaluates, and tests
/// `|result| > ε` and not-NaN.
pub fn eval_as_bool(source: &str, ctx: &ExprContext) -> bool {
    let expr = Expression::parse(source, ctx.clone());
    let value = if expr.is_returnable_as_double() {
        expr.eval_as_double(None)
    } else {
        let text = expr.eval(None);
        if is_numeric_str(&text) {
            text.trim().parse().unwrap_or(f64::NAN)
        } else {
            f64::NAN
        }
    };
    !value.is_nan() && value.abs() > f64::EPSILON
}

/// Registers `inner` (the brace content or a bare dotted identifier, context
/// prefix included) as a variable, deduplicating by raw spelling. Returns
/// the slot index.
fn register_variable_in(vars: &mut Vec<Variable>, ctx: &ExprContext, inner: &str) -> usize {
    if let Some(slot) = vars.iter().position(|v| v.raw == inner) {
        return slot;
    }
    let context = get_context(inner);
    let key = match context {
        VarContext::Resource => inner.to_string(),
        _ => strip_context(inner).to_string(),
    };
    let stable = !(key.contains('{') || key.contains('$') || key.contains('|'));
    let binding = match (context, stable) {
        (VarContext::SelfDoc, true) => VirtualDouble::external(ctx.self_doc.stable_cell(&key)),
        (VarContext::Global, true) => VirtualDouble::external(ctx.global.stable_cell(&key)),
        _ => VirtualDouble::internal(),
    };
    vars.push(Variable {
        raw: inner.to_string(),
        key,
        context,
        stable,
        binding,
    });
    vars.len() - 1
}

//----------------------------------------------------------------------
// Lexical helpers

/// Splits on `$`, keeping the delimiter at the start of each token:
/// `"abc$def$ghi"` → `["abc", "$def", "$ghi"]`.
fn split_keep_dollar(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in input.chars() {
        if c == '$' {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current.push('$');
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Splits a string into top-level groups of the given bracket pair plus the
/// runs between them:
/// `"a {b} {c{d}} e"` → `["a ", "{b}", " ", "{c{d}}", " e"]`.
fn split_on_same_depth(input: &str, open: char) -> Vec<String> {
    let close = match open {
        '(' => ')',
        '{' => '}',
        '[' => ']',
        _ => return vec![input.to_string()],
    };
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in input.chars() {
        if c == open {
            if depth == 0 && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            depth += 1;
            current.push(c);
        } else if c == close && depth > 0 {
            depth -= 1;
            current.push(c);
            if depth == 0 {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExprContext {
        ExprContext::new(Arc::new(Document::new()), Arc::new(Document::new()))
    }

    #[test]
    fn split_on_same_depth_examples() {
        assert_eq!(
            split_on_same_depth("This is a text {with} {some}{!} nested {{paranthesis}}", '{'),
            vec![
                "This is a text ",
                "{with}",
                " ",
                "{some}",
                "{!}",
                " nested ",
                "{{paranthesis}}"
            ]
        );
    }

    #[test]
    fn plain_text_round_trips() {
        let e = Expression::parse("hello world", ctx());
        assert_eq!(e.eval(None), "hello world");
        assert!(!e.is_returnable_as_double());
    }

    #[test]
    fn mixed_text_variable_eval() {
        let c = ctx();
        c.self_doc.set("name", "Ada".to_string());
        c.self_doc.set("hp", 10.0);
        c.global.set("buff", 3.0);
        let e = Expression::parse("Player {self.name} has $i(self.hp + 2*global.buff) HP", c);
        assert_eq!(e.eval(None), "Player Ada has 16 HP");
    }

    #[test]
    fn remanent_bindings_follow_document_writes() {
        let c = ctx();
        c.self_doc.set("x", 1.0);
        let e = Expression::parse("$(self.x * 10)", c.clone());
        assert_eq!(e.eval_as_double(None), 10.0);
        c.self_doc.set("x", 2.5);
        assert_eq!(e.eval_as_double(None), 25.0);
    }

    #[test]
    fn other_context_reads_through_ordered_cells() {
        let c = ctx();
        let other = Arc::new(Document::new());
        other.set("hp", 5.0);
        let e = Expression::parse("$(other.hp - 1)", c);
        assert_eq!(e.eval_as_double(Some(&other)), 4.0);
        other.set("hp", 3.0);
        assert_eq!(e.eval_as_double(Some(&other)), 2.0);
        // A different other document resolves independently.
        let other2 = Arc::new(Document::new());
        other2.set("hp", 100.0);
        assert_eq!(e.eval_as_double(Some(&other2)), 99.0);
    }

    #[test]
    fn returnable_classification() {
        assert!(Expression::parse("$(1+1)", ctx()).is_returnable_as_double());
        assert!(!Expression::parse("$i(1+1)", ctx()).is_returnable_as_double());
        assert!(!Expression::parse("x $(1+1)", ctx()).is_returnable_as_double());
        assert!(!Expression::parse("1 + 1", ctx()).is_returnable_as_double());
    }

    #[test]
    fn always_true_detection() {
        assert!(Expression::parse("1", ctx()).is_always_true());
        assert!(Expression::parse("$(1)", ctx()).is_always_true());
        assert!(!Expression::parse("$(2)", ctx()).is_always_true());
    }

    #[test]
    fn format_specs_apply() {
        let e = Expression::parse("$05.3f(1/3)", ctx());
        assert_eq!(e.eval(None), "0.333");
        let e = Expression::parse("$08.3f(1/3)", ctx());
        assert_eq!(e.eval(None), "0000.333");
        let e = Expression::parse("$i(7.9)", ctx());
        assert_eq!(e.eval(None), "7");
    }

    #[test]
    fn compile_error_yields_nan() {
        let e = Expression::parse("$(1 +* 2)", ctx());
        assert!(e.eval_as_double(None).is_nan());
    }

    #[test]
    fn nested_variable_resolves_to_temporary() {
        let c = ctx();
        c.self_doc.set("i", 1.0);
        c.self_doc.set("arr[0]", 10.0);
        c.self_doc.set("arr[1]", 20.0);
        let e = Expression::parse("$(self.arr[{self.i}])", c);
        assert_eq!(e.eval_as_double(None), 20.0);
    }

    #[test]
    fn dynamic_text_variable_re_resolves(){
        let c = ctx();
        c.global.set("which", "a".to_string());
        c.global.set("a", "left".to_string());
        c.global.set("b", "right".to_string());
        let e = Expression::parse("{global.{global.which}}", c.clone());
        assert_eq!(e.eval(None), "left");
        c.global.set("which", "b".to_string());
        assert_eq!(e.eval(None), "right");
    }

    #[test]
    fn eval_as_bool_semantics() {
        let c = ctx();
        assert!(eval_as_bool("$(1+1)", &c));
        assert!(!eval_as_bool("$(0)", &c));
        assert!(!eval_as_bool("$(0/0)", &c), "NaN is false");
        assert!(!eval_as_bool("plain text", &c));
        assert!(eval_as_bool("1", &c));
    }

    #[test]
    fn missing_variables_read_as_null_text_and_zero_number() {
        let c = ctx();
        let e = Expression::parse("{self.absent}", c.clone());
        assert_eq!(e.eval(None), "null");
        let e = Expression::parse("$(self.absent + 1)", c);
        assert_eq!(e.eval_as_double(None), 1.0);
    }
}
