//! Frame semantics of the pair engine: registration in frame N, application
//! in frame N+1, exactly once per listener.

use std::sync::Arc;

use core_document::Document;
use core_rules::{
    InvokeConfig, InvokeEngine, RuleTarget, StaticContext, StaticRulesetDef, compile,
    register_static_ruleset,
};
use core_runtime::CommandResult;
use parking_lot::Mutex;

struct TestTarget {
    id: u32,
    doc: Arc<Document>,
    dispatched: Mutex<Vec<String>>,
}

impl TestTarget {
    fn new(id: u32) -> Arc<TestTarget> {
        let doc = Arc::new(Document::new());
        doc.set("id", id as f64);
        Arc::new(TestTarget {
            id,
            doc,
            dispatched: Mutex::new(Vec::new()),
        })
    }
}

impl RuleTarget for TestTarget {
    fn id(&self) -> u32 {
        self.id
    }
    fn doc(&self) -> &Arc<Document> {
        &self.doc
    }
    fn dispatch(&self, command: &str) -> CommandResult {
        self.dispatched.lock().push(command.to_string());
        Ok(())
    }
}

fn hit_broadcaster(id: u32) -> Arc<TestTarget> {
    let target = TestTarget::new(id);
    target.doc.deserialize(
        r#"{
            "id": ID,
            "invokes": [{
                "topic": "hit",
                "logicalArg": "other.hp > 0",
                "exprs": ["other.hp += -1"]
            }]
        }"#
        .replace("ID", &id.to_string())
        .as_str(),
    );
    target
}

/// One engine frame as the scene loop drives it: entities broadcast and
/// listen during their update, then the pair set is processed.
fn run_frame(
    engine: &InvokeEngine,
    broadcasts: &[(&Arc<TestTarget>, &[Arc<core_rules::Ruleset>])],
    listeners: &[(&Arc<TestTarget>, &str)],
) {
    for (_, rulesets) in broadcasts {
        for ruleset in *rulesets {
            engine.broadcast(ruleset);
        }
    }
    for (listener, topic) in listeners {
        let target: Arc<dyn RuleTarget> = (*listener).clone();
        engine.listen(&target, topic, listener.id());
    }
    engine.update();
}

#[test]
fn broadcast_applies_on_the_following_frame() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let a = hit_broadcaster(1);
    let b = TestTarget::new(2);
    b.doc.set("hp", 5.0);

    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);
    assert_eq!(compiled.global.len(), 1);
    assert!(compiled.local.is_empty());

    // Frame 1: registration only.
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "hit")]);
    assert_eq!(b.doc.get("hp", 0.0), 5.0);

    // Frame 2: the pair from frame 1 applies exactly once.
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "hit")]);
    assert_eq!(b.doc.get("hp", 0.0), 4.0);

    // Frame 3.
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "hit")]);
    assert_eq!(b.doc.get("hp", 0.0), 3.0);
}

#[test]
fn listener_whose_condition_fails_is_skipped() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let a = hit_broadcaster(1);
    let b = TestTarget::new(2);
    b.doc.set("hp", 0.0);

    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);
    for _ in 0..3 {
        run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "hit")]);
    }
    assert_eq!(b.doc.get("hp", 0.0), 0.0);
}

#[test]
fn every_listener_receives_exactly_one_application() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let a = hit_broadcaster(1);
    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);

    let listeners: Vec<Arc<TestTarget>> = (2..12).map(TestTarget::new).collect();
    for listener in &listeners {
        listener.doc.set("hp", 10.0);
    }
    let listen_pairs: Vec<(&Arc<TestTarget>, &str)> =
        listeners.iter().map(|l| (l, "hit")).collect();

    for frame in 0..4 {
        run_frame(&engine, &[(&a, &compiled.global)], &listen_pairs);
        for listener in &listeners {
            let expected = 10.0 - frame as f64;
            assert_eq!(listener.doc.get("hp", 0.0), expected);
        }
    }
}

#[test]
fn broadcaster_does_not_pair_with_itself() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let a = hit_broadcaster(1);
    a.doc.set("hp", 5.0);
    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);

    for _ in 0..3 {
        run_frame(&engine, &[(&a, &compiled.global)], &[(&a, "hit")]);
    }
    assert_eq!(a.doc.get("hp", 0.0), 5.0);
}

#[test]
fn stale_broadcasters_stop_applying() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let a = hit_broadcaster(1);
    let b = TestTarget::new(2);
    b.doc.set("hp", 10.0);

    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "hit")]);
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "hit")]);
    assert_eq!(b.doc.get("hp", 0.0), 9.0);

    // The broadcaster goes quiet: its old entries must not fire again.
    run_frame(&engine, &[], &[(&b, "hit")]);
    run_frame(&engine, &[], &[(&b, "hit")]);
    assert_eq!(b.doc.get("hp", 0.0), 8.0, "only the already-paired frame applies");
}

#[test]
fn function_calls_dispatch_to_the_right_parties() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let a = TestTarget::new(1);
    a.doc.deserialize(
        r#"{
            "id": 1,
            "invokes": [{
                "topic": "greet",
                "logicalArg": "1",
                "exprs": [],
                "functioncalls": {
                    "self": ["mark self-{other.id}"],
                    "other": ["mark other"],
                    "global": ["echo from-global"]
                }
            }]
        }"#,
    );
    let b = TestTarget::new(2);

    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "greet")]);
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "greet")]);

    assert_eq!(a.dispatched.lock().as_slice(), ["mark self-2"]);
    assert_eq!(b.dispatched.lock().as_slice(), ["mark other"]);
    assert_eq!(engine.drain_global_calls(), vec!["echo from-global".to_string()]);
}

#[test]
fn reparsed_ruleset_applies_observationally_equally() {
    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());

    let original = hit_broadcaster(1);
    // Serialize the owner's document and rebuild a second broadcaster from
    // the round-tripped form.
    let round_tripped = TestTarget::new(3);
    round_tripped.doc.deserialize(&original.doc.serialize(""));
    round_tripped.doc.set("id", 3.0);

    let listener_a = TestTarget::new(10);
    let listener_b = TestTarget::new(11);
    listener_a.doc.set("hp", 8.0);
    listener_b.doc.set("hp", 8.0);

    let original_dyn: Arc<dyn RuleTarget> = original.clone();
    let round_dyn: Arc<dyn RuleTarget> = round_tripped.clone();
    let compiled_a = compile(&original_dyn, &global);
    let compiled_b = compile(&round_dyn, &global);

    let engine_b = InvokeEngine::new(InvokeConfig::default());
    for _ in 0..3 {
        run_frame(&engine, &[(&original, &compiled_a.global)], &[(&listener_a, "hit")]);
        run_frame(
            &engine_b,
            &[(&round_tripped, &compiled_b.global)],
            &[(&listener_b, "hit")],
        );
    }
    assert_eq!(
        listener_a.doc.get("hp", 0.0),
        listener_b.doc.get("hp", 0.0),
        "round-tripped ruleset must behave identically"
    );
    assert_eq!(listener_a.doc.get("hp", 0.0), 6.0);
}

#[test]
fn static_rulesets_run_registered_code() {
    fn tag_other(ctx: &StaticContext<'_>) {
        ctx.other.doc().set("tagged", 1.0);
        ctx.global.set_add("static.applications", 1.0);
    }
    register_static_ruleset(
        "tag-other",
        StaticRulesetDef {
            topic: "all".to_string(),
            func: tag_other,
        },
    );

    let global = Arc::new(Document::new());
    let engine = InvokeEngine::new(InvokeConfig::default());
    let a = TestTarget::new(1);
    a.doc
        .deserialize(r#"{"id": 1, "invokes": ["::tag-other"]}"#);
    let b = TestTarget::new(2);

    let a_dyn: Arc<dyn RuleTarget> = a.clone();
    let compiled = compile(&a_dyn, &global);
    assert_eq!(compiled.global.len(), 1);
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "all")]);
    run_frame(&engine, &[(&a, &compiled.global)], &[(&b, "all")]);

    assert_eq!(b.doc.get("tagged", 0.0), 1.0);
    assert_eq!(global.get("static.applications", 0.0), 1.0);
}
