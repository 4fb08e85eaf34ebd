//! Scene objects: the renderable entities driven by the rule engine.
//!
//! A scene object is a document plus a thin layer of cached state: compiled
//! rulesets, frequently-used stable cells (position, sprite, text), pending
//! flags, and the derived geometry rects. All per-frame behavior flows
//! through the document — expressions bind its cells, rulesets mutate it,
//! and the object's own function tree offers data commands plus lifecycle
//! commands (`delete`, `update-text`, `reload-invokes`, the mirror family).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use core_document::{Document, MemberKind, capture};
use core_rules::{InvokeEngine, RuleTarget, Ruleset};
use core_runtime::data_commands::register_data_commands;
use core_runtime::{CommandResult, EngineError, FuncTree};
use parking_lot::Mutex;
use tracing::trace;

/// Document keys of the entity schema.
pub mod keys {
    pub const ID: &str = "id";
    pub const POS_X: &str = "posX";
    pub const POS_Y: &str = "posY";
    pub const LAYER: &str = "layer";
    pub const SPRITE_LINK: &str = "sprite.link";
    pub const SPRITE_SIZE_X: &str = "sprite.sizeX";
    pub const SPRITE_SIZE_Y: &str = "sprite.sizeY";
    pub const SHEET_IS: &str = "sprite.spritesheet.isSpritesheet";
    pub const SHEET_SIZE_X: &str = "sprite.spritesheet.sizeX";
    pub const SHEET_SIZE_Y: &str = "sprite.spritesheet.sizeY";
    pub const SHEET_OFFSET_X: &str = "sprite.spritesheet.offsetX";
    pub const SHEET_OFFSET_Y: &str = "sprite.spritesheet.offsetY";
    pub const TEXT_STR: &str = "text.str";
    pub const TEXT_FONT_SIZE: &str = "text.fontSize";
    pub const TEXT_DX: &str = "text.dx";
    pub const TEXT_DY: &str = "text.dy";
    pub const TEXT_COLOR_R: &str = "text.color.R";
    pub const TEXT_COLOR_G: &str = "text.color.G";
    pub const TEXT_COLOR_B: &str = "text.color.B";
    pub const TEXT_COLOR_A: &str = "text.color.A";
    pub const INVOKES: &str = "invokes";
    pub const SUBSCRIPTIONS: &str = "invokeSubscriptions";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Stable cells for the hot-path fields.
struct FrequentCells {
    id: core_document::CellRef,
    pos_x: core_document::CellRef,
    pos_y: core_document::CellRef,
    size_x: core_document::CellRef,
    size_y: core_document::CellRef,
    sheet_is: core_document::CellRef,
    sheet_size_x: core_document::CellRef,
    sheet_size_y: core_document::CellRef,
    sheet_offset_x: core_document::CellRef,
    sheet_offset_y: core_document::CellRef,
    font_size: core_document::CellRef,
    text_dx: core_document::CellRef,
    text_dy: core_document::CellRef,
}

impl FrequentCells {
    fn link(doc: &Document) -> FrequentCells {
        FrequentCells {
            id: doc.stable_cell(keys::ID),
            pos_x: doc.stable_cell(keys::POS_X),
            pos_y: doc.stable_cell(keys::POS_Y),
            size_x: doc.stable_cell(keys::SPRITE_SIZE_X),
            size_y: doc.stable_cell(keys::SPRITE_SIZE_Y),
            sheet_is: doc.stable_cell(keys::SHEET_IS),
            sheet_size_x: doc.stable_cell(keys::SHEET_SIZE_X),
            sheet_size_y: doc.stable_cell(keys::SHEET_SIZE_Y),
            sheet_offset_x: doc.stable_cell(keys::SHEET_OFFSET_X),
            sheet_offset_y: doc.stable_cell(keys::SHEET_OFFSET_Y),
            font_size: doc.stable_cell(keys::TEXT_FONT_SIZE),
            text_dx: doc.stable_cell(keys::TEXT_DX),
            text_dy: doc.stable_cell(keys::TEXT_DY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MirrorMode {
    #[default]
    Off,
    On,
    Once,
}

#[derive(Default)]
struct RuleState {
    local: Vec<Arc<Ruleset>>,
    global: Vec<Arc<Ruleset>>,
    subscription_count: usize,
}

#[derive(Default)]
struct Rects {
    dst: Rect,
    src: Option<Rect>,
    text: Rect,
}

pub struct SceneObject {
    doc: Arc<Document>,
    global: Arc<Document>,
    refs: FrequentCells,
    reload_invokes: AtomicBool,
    recalc_text: AtomicBool,
    delete_from_scene: AtomicBool,
    mirror: Mutex<MirrorMode>,
    rules: Mutex<RuleState>,
    rects: Mutex<Rects>,
}

impl SceneObject {
    /// A fresh object with the default entity schema.
    pub fn new(global: Arc<Document>) -> Arc<SceneObject> {
        let doc = Arc::new(Document::new());
        write_defaults(&doc);
        Self::wrap(doc, global)
    }

    /// Builds an object from a serialized form, a file path, or a load
    /// specifier with a `|cmd` pipeline tail (`spawn file.jsonc|set a b`).
    pub fn from_spec(spec: &str, global: Arc<Document>) -> Arc<SceneObject> {
        let object = Self::new(global);
        object.deserialize(spec);
        object
    }

    fn wrap(doc: Arc<Document>, global: Arc<Document>) -> Arc<SceneObject> {
        let refs = FrequentCells::link(&doc);
        let object = Arc::new(SceneObject {
            doc,
            global,
            refs,
            reload_invokes: AtomicBool::new(true),
            recalc_text: AtomicBool::new(true),
            delete_from_scene: AtomicBool::new(false),
            mirror: Mutex::new(MirrorMode::Off),
            rules: Mutex::new(RuleState::default()),
            rects: Mutex::new(Rects::default()),
        });
        // Deserialize pipeline commands dispatch onto the object's own tree.
        let weak = Arc::downgrade(&object);
        object.doc.set_command_hook(Arc::new(move |_, command| {
            weak.upgrade()
                .map(|object| object.dispatch(command).is_ok())
                .unwrap_or(false)
        }));
        object
    }

    pub fn doc(&self) -> &Arc<Document> {
        &self.doc
    }

    pub fn object_id(&self) -> u32 {
        self.refs.id.get() as u32
    }

    pub fn set_object_id(&self, id: u32) {
        self.doc.set(keys::ID, u64::from(id));
    }

    pub fn position(&self) -> (f64, f64) {
        (self.refs.pos_x.get(), self.refs.pos_y.get())
    }

    pub fn layer(&self) -> usize {
        self.doc.get(keys::LAYER, 0i64).clamp(0, 4) as usize
    }

    /// Tile coordinate for a display resolution; one tile is one screen.
    pub fn tile_pos(&self, resolution: (u32, u32)) -> (i16, i16) {
        let (x, y) = self.position();
        (
            (x / f64::from(resolution.0.max(1))).floor() as i16,
            (y / f64::from(resolution.1.max(1))).floor() as i16,
        )
    }

    pub fn mark_for_deletion(&self) {
        self.delete_from_scene.store(true, Ordering::Relaxed);
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.delete_from_scene.load(Ordering::Relaxed)
    }

    pub fn request_ruleset_reload(&self) {
        self.reload_invokes.store(true, Ordering::Relaxed);
    }

    /// Sum of compiled-expression complexities; the tile batcher's weight.
    pub fn estimated_cost(self: &Arc<Self>) -> u64 {
        self.reload_rulesets_if_needed();
        let rules = self.rules.lock();
        rules
            .local
            .iter()
            .chain(&rules.global)
            .map(|r| r.estimated_cost)
            .sum::<u64>()
            .max(1)
    }

    pub fn serialize(&self) -> String {
        self.doc.serialize("")
    }

    pub fn deserialize(&self, spec: &str) {
        self.doc.deserialize(spec);
        self.reload_invokes.store(true, Ordering::Relaxed);
        self.recalc_text.store(true, Ordering::Relaxed);
    }

    fn reload_rulesets_if_needed(self: &Arc<Self>) {
        if !self.reload_invokes.swap(false, Ordering::Relaxed) {
            return;
        }
        let dyn_self: Arc<dyn RuleTarget> = self.clone();
        let compiled = core_rules::compile(&dyn_self, &self.global);
        trace!(
            target: "scene.object",
            id = self.object_id(),
            local = compiled.local.len(),
            global = compiled.global.len(),
            "rulesets compiled"
        );
        let mut rules = self.rules.lock();
        rules.local = compiled.local;
        rules.global = compiled.global;
        rules.subscription_count = self.doc.member_size(keys::SUBSCRIPTIONS);
    }

    /// Per-frame update: evaluate local rulesets, register as listener for
    /// the subscribed topics, broadcast global rulesets, refresh geometry.
    pub fn update(self: &Arc<Self>, invoke: &InvokeEngine) {
        self.reload_rulesets_if_needed();
        let dyn_self: Arc<dyn RuleTarget> = self.clone();
        let sink = invoke.global_call_sink();
        {
            let rules = self.rules.lock();
            // Local rulesets resolve immediately, with the owner standing in
            // as its own interaction partner.
            for ruleset in &rules.local {
                if ruleset.evaluate_condition(&self.doc) {
                    ruleset.apply(&dyn_self, &sink);
                }
            }
            for index in 0..rules.subscription_count {
                let topic = self
                    .doc
                    .get(&format!("{}[{index}]", keys::SUBSCRIPTIONS), String::new());
                if !topic.is_empty() {
                    invoke.listen(&dyn_self, &topic, self.object_id());
                }
            }
            for ruleset in &rules.global {
                invoke.broadcast(ruleset);
            }
        }
        self.refresh_rects();
        self.update_mirror();
    }

    //------------------------------------------------------------------
    // Geometry

    fn refresh_rects(&self) {
        let mut rects = self.rects.lock();
        rects.dst = Rect {
            x: self.refs.pos_x.get().floor() as i32,
            y: self.refs.pos_y.get().floor() as i32,
            w: self.refs.size_x.get().floor() as i32,
            h: self.refs.size_y.get().floor() as i32,
        };
        rects.src = if self.refs.sheet_is.get() > f64::EPSILON {
            Some(Rect {
                x: self.refs.sheet_offset_x.get() as i32,
                y: self.refs.sheet_offset_y.get() as i32,
                w: self.refs.sheet_size_x.get() as i32,
                h: self.refs.sheet_size_y.get() as i32,
            })
        } else {
            None
        };
        if self.recalc_text.swap(false, Ordering::Relaxed) {
            let text = self.doc.get(keys::TEXT_STR, String::new());
            let font_size = self.refs.font_size.get();
            rects.text = Rect {
                x: (self.refs.pos_x.get() + self.refs.text_dx.get()) as i32,
                y: (self.refs.pos_y.get() + self.refs.text_dy.get()) as i32,
                w: (font_size * text.chars().count() as f64) as i32,
                h: (font_size * 1.5) as i32,
            };
        }
    }

    pub fn dst_rect(&self) -> Rect {
        self.rects.lock().dst
    }

    pub fn src_rect(&self) -> Option<Rect> {
        self.rects.lock().src
    }

    pub fn text_rect(&self) -> Rect {
        self.rects.lock().text
    }

    //------------------------------------------------------------------
    // Mirror

    fn mirror_key(&self) -> String {
        format!("mirror.object{}", self.object_id())
    }

    fn update_mirror(&self) {
        let mut mode = self.mirror.lock();
        match *mode {
            MirrorMode::Off => {}
            MirrorMode::On => self.global.set_sub_doc(&self.mirror_key(), &self.doc.sub_doc("")),
            MirrorMode::Once => {
                self.global
                    .set_sub_doc(&self.mirror_key(), &self.doc.sub_doc(""));
                *mode = MirrorMode::Off;
            }
        }
    }
}

fn write_defaults(doc: &Document) {
    doc.set(keys::ID, 0u64);
    doc.set(keys::POS_X, 0.0);
    doc.set(keys::POS_Y, 0.0);
    doc.set(keys::LAYER, 0i64);
    doc.set(keys::SPRITE_LINK, String::new());
    doc.set(keys::SPRITE_SIZE_X, 32.0);
    doc.set(keys::SPRITE_SIZE_Y, 32.0);
    doc.set(keys::SHEET_IS, false);
    doc.set(keys::SHEET_SIZE_X, 0.0);
    doc.set(keys::SHEET_SIZE_Y, 0.0);
    doc.set(keys::SHEET_OFFSET_X, 0.0);
    doc.set(keys::SHEET_OFFSET_Y, 0.0);
    doc.set(keys::TEXT_STR, String::new());
    doc.set(keys::TEXT_FONT_SIZE, 0.0);
    doc.set(keys::TEXT_DX, 0.0);
    doc.set(keys::TEXT_DY, 0.0);
    doc.set(keys::TEXT_COLOR_R, 255i64);
    doc.set(keys::TEXT_COLOR_G, 255i64);
    doc.set(keys::TEXT_COLOR_B, 255i64);
    doc.set(keys::TEXT_COLOR_A, 255i64);
    doc.set_empty_array(keys::INVOKES);
    doc.set(&format!("{}[0]", keys::SUBSCRIPTIONS), "all".to_string());
}

//----------------------------------------------------------------------
// Command tree

fn object_tree() -> &'static FuncTree<SceneObject> {
    static TREE: LazyLock<FuncTree<SceneObject>> = LazyLock::new(|| {
        let mut tree = FuncTree::new("SceneObject");
        register_data_commands(&mut tree, "delete-key", |object: &SceneObject| {
            object.doc.clone()
        });

        tree.register_in("lifecycle", "delete", "Remove this object from the scene", |object, _| {
            object.mark_for_deletion();
            Ok(())
        });
        tree.register_in(
            "lifecycle",
            "update-text",
            "Recalculate the text rect on the next update",
            |object, _| {
                object.recalc_text.store(true, Ordering::Relaxed);
                Ok(())
            },
        );
        tree.register_in(
            "rulesets",
            "reload-invokes",
            "Recompile rulesets from the document on the next update",
            |object, _| {
                object.reload_invokes.store(true, Ordering::Relaxed);
                Ok(())
            },
        );
        tree.register_in(
            "rulesets",
            "add-invoke",
            "Append a ruleset reference: add-invoke <path-or-::name>",
            |object, args| {
                let [spec] = args else {
                    return Err(EngineError::TooFewArgs("add-invoke".into()));
                };
                let size = object.doc.member_size(keys::INVOKES);
                object
                    .doc
                    .set(&format!("{}[{size}]", keys::INVOKES), spec.clone());
                object.request_ruleset_reload();
                Ok(())
            },
        );
        tree.register_in(
            "rulesets",
            "remove-all-invokes",
            "Drop every ruleset reference",
            |object, _| {
                object.doc.set_empty_array(keys::INVOKES);
                object.request_ruleset_reload();
                Ok(())
            },
        );
        tree.register_in(
            "rulesets",
            "remove-invoke",
            "Remove a ruleset reference by index: remove-invoke <index>",
            |object, args| {
                let [index] = args else {
                    return Err(EngineError::TooFewArgs("remove-invoke".into()));
                };
                let index: usize = index.parse().map_err(|_| EngineError::InvalidArg {
                    arg: index.clone(),
                    reason: "expected an index".to_string(),
                })?;
                if index >= object.doc.member_size(keys::INVOKES) {
                    return Err(EngineError::UnknownArg(format!("invoke index {index}")));
                }
                object.doc.remove_key(&format!("{}[{index}]", keys::INVOKES));
                object.request_ruleset_reload();
                Ok(())
            },
        );

        tree.register_in("mirror", "mirror on", "Mirror this object into the global store each frame", |object, _| {
            *object.mirror.lock() = MirrorMode::On;
            Ok(())
        });
        tree.register_in("mirror", "mirror off", "Stop mirroring", |object, _| {
            *object.mirror.lock() = MirrorMode::Off;
            Ok(())
        });
        tree.register_in("mirror", "mirror once", "Mirror on the next update only", |object, _| {
            *object.mirror.lock() = MirrorMode::Once;
            Ok(())
        });
        tree.register_in(
            "mirror",
            "mirror delete",
            "Drop this object's mirror entry",
            |object, _| {
                object.global.remove_key(&object.mirror_key());
                Ok(())
            },
        );
        tree.register_in(
            "mirror",
            "mirror fetch",
            "Overwrite this object's document from its mirror entry",
            |object, _| {
                if object.global.member_kind(&object.mirror_key()) != MemberKind::Object {
                    return Err(EngineError::UnknownArg(format!(
                        "no mirror entry for object {}",
                        object.object_id()
                    )));
                }
                let mirrored = object.global.sub_doc(&object.mirror_key());
                object.deserialize(&mirrored.serialize(""));
                Ok(())
            },
        );
        tree
    });
    &TREE
}

impl RuleTarget for SceneObject {
    fn id(&self) -> u32 {
        self.object_id()
    }

    fn doc(&self) -> &Arc<Document> {
        &self.doc
    }

    fn dispatch(&self, command: &str) -> CommandResult {
        let result = object_tree().parse_str(self, command);
        if let Err(err) = &result {
            capture::err(format!(
                "object {} command `{command}` failed: {err}",
                self.object_id()
            ));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> Arc<Document> {
        Arc::new(Document::new())
    }

    #[test]
    fn defaults_match_the_entity_schema() {
        let object = SceneObject::new(global());
        assert_eq!(object.doc().get(keys::SPRITE_SIZE_X, 0.0), 32.0);
        assert_eq!(object.doc().get(keys::TEXT_COLOR_R, 0i64), 255);
        assert_eq!(
            object.doc().get("invokeSubscriptions[0]", String::new()),
            "all"
        );
        assert_eq!(object.layer(), 0);
    }

    #[test]
    fn tile_position_floors() {
        let object = SceneObject::new(global());
        object.doc().set(keys::POS_X, 150.0);
        object.doc().set(keys::POS_Y, -10.0);
        assert_eq!(object.tile_pos((100, 100)), (1, -1));
    }

    #[test]
    fn data_commands_operate_on_the_document() {
        let object = SceneObject::new(global());
        object.dispatch("set hp 10").unwrap();
        assert_eq!(object.doc().get("hp", 0.0), 10.0);
        object.dispatch("delete-key hp").unwrap();
        assert_eq!(object.doc().member_kind("hp"), MemberKind::Null);
    }

    #[test]
    fn delete_command_flags_scene_removal() {
        let object = SceneObject::new(global());
        assert!(!object.is_marked_for_deletion());
        object.dispatch("delete").unwrap();
        assert!(object.is_marked_for_deletion());
    }

    #[test]
    fn spec_pipeline_applies_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.jsonc");
        std::fs::write(&path, "{\"posX\": 10} // entity\n").unwrap();
        let object = SceneObject::from_spec(
            &format!("{}|posY=25|set text.str hello", path.display()),
            global(),
        );
        assert_eq!(object.doc().get(keys::POS_X, 0.0), 10.0);
        assert_eq!(object.doc().get(keys::POS_Y, 0.0), 25.0);
        assert_eq!(object.doc().get(keys::TEXT_STR, String::new()), "hello");
    }

    #[test]
    fn mirror_round_trip() {
        let g = global();
        let object = SceneObject::new(g.clone());
        object.set_object_id(7);
        object.doc().set("hp", 3.0);
        object.dispatch("mirror once").unwrap();
        object.update_mirror();
        assert_eq!(g.get("mirror.object7.hp", 0.0), 3.0);

        g.set("mirror.object7.hp", 99.0);
        object.dispatch("mirror fetch").unwrap();
        assert_eq!(object.doc().get("hp", 0.0), 99.0);
    }
}
