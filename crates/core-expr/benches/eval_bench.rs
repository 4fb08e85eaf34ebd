use std::sync::Arc;

use core_document::Document;
use core_expr::{ExprContext, Expression};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_eval(c: &mut Criterion) {
    let self_doc = Arc::new(Document::new());
    let global = Arc::new(Document::new());
    self_doc.set("hp", 10.0);
    self_doc.set("name", "Ada".to_string());
    global.set("buff", 3.0);
    let ctx = ExprContext::new(self_doc, global);

    let other = Arc::new(Document::new());
    other.set("hp", 5.0);

    let remanent = Expression::parse("$(self.hp + 2*global.buff)", ctx.clone());
    c.bench_function("eval_as_double remanent", |b| {
        b.iter(|| black_box(remanent.eval_as_double(None)))
    });

    let with_other = Expression::parse("$(other.hp - 1)", ctx.clone());
    c.bench_function("eval_as_double other-cached", |b| {
        b.iter(|| black_box(with_other.eval_as_double(Some(&other))))
    });

    let mixed = Expression::parse("Player {self.name} has $i(self.hp + 2*global.buff) HP", ctx);
    c.bench_function("eval mixed text", |b| b.iter(|| black_box(mixed.eval(None))));
}

criterion_group!(benches, bench_eval);
criterion_main!(benches);
