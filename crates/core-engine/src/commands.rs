//! The engine command surface.
//!
//! Every command dispatches through the engine's function tree; rulesets,
//! task files, and the command line all share this one entry point. Data
//! commands act on the global store; scene commands manage the environment
//! and the headless display state; control-flow commands (`if`, `for`,
//! `wait`, `task`, `always`) drive deterministic scripting.

use std::path::Path;

use core_document::{Document, capture};
use core_expr::{Expression, eval_as_bool};
use core_runtime::data_commands::register_data_commands;
use core_runtime::{CommandResult, EngineError, FuncTree, Severity};
use core_rules::RuleTarget;
use core_scene::SceneObject;

use crate::engine::{Engine, keys};

pub fn register_all(tree: &mut FuncTree<Engine>) {
    register_data_commands(tree, "delete", |engine: &Engine| engine.global().clone());
    register_general(tree);
    register_control_flow(tree);
    register_logging(tree);
    register_scene(tree);
    register_display(tree);
}

//----------------------------------------------------------------------
// General

fn register_general(tree: &mut FuncTree<Engine>) {
    tree.register(
        "eval",
        "Resolve $(…) and {…} in the arguments, then run the result as a command",
        |engine, args| {
            let template = args.join(" ");
            let evaluated = Expression::parse(&template, engine.expr_context()).eval(None);
            engine.parse_str(&evaluated)
        },
    );

    tree.register("exit", "Stop the engine loop", |engine, _| {
        engine.tasks.always.clear();
        engine.tasks.internal.clear();
        engine.tasks.script.clear();
        engine.request_quit();
        Ok(())
    });

    tree.register("nop", "Do nothing", |_, _| Ok(()));
}

//----------------------------------------------------------------------
// Control flow

fn register_control_flow(tree: &mut FuncTree<Engine>) {
    tree.register_in(
        "control",
        "wait",
        "Suspend the script queue for n frames: wait <n>",
        |engine, args| {
            let [frames] = args else {
                return Err(if args.is_empty() {
                    EngineError::TooFewArgs("wait".into())
                } else {
                    EngineError::TooManyArgs("wait".into())
                });
            };
            let frames: u64 = frames.parse().map_err(|_| EngineError::InvalidArg {
                arg: frames.clone(),
                reason: "expected a frame count".to_string(),
            })?;
            engine.tasks.script.increment_wait_counter(frames);
            Ok(())
        },
    );

    tree.register_in(
        "control",
        "task",
        "Queue every line of a task file, in file order: task <file.nebs>",
        |engine, args| {
            // Loading a script must not consume randomness.
            engine.rng_module().rollback();
            let [path] = args else {
                return Err(if args.is_empty() {
                    EngineError::TooFewArgs("task".into())
                } else {
                    EngineError::TooManyArgs("task".into())
                });
            };
            if !path.ends_with(".nebs") {
                capture::err(format!(
                    "Warning: unexpected file ending for task file '{path}', expected '.nebs'. Trying to load anyway."
                ));
            }
            let text = std::fs::read_to_string(path)
                .map_err(|_| EngineError::InvalidFile(path.clone()))?;
            capture::out(format!("Loading task list from file: {path}"));
            let lines: Vec<&str> = text
                .lines()
                .map(|line| line.split('#').next().unwrap_or("").trim())
                .filter(|line| !line.is_empty())
                .collect();
            for line in lines.into_iter().rev() {
                engine.tasks.script.push_front(line);
            }
            Ok(())
        },
    );

    tree.register_in(
        "control",
        "always",
        "Enqueue commands replayed every frame: always <cmd;cmd;…>",
        |engine, args| {
            for command in args.join(" ").split(';') {
                let command = command.trim();
                if !command.is_empty() {
                    engine.tasks.always.push_back(command);
                }
            }
            Ok(())
        },
    );

    tree.register_in("control", "always-clear", "Drop every always command", |engine, _| {
        engine.tasks.always.clear();
        Ok(())
    });

    let run_if = |engine: &Engine, args: &[String]| -> CommandResult {
        if args.len() < 2 {
            return Err(EngineError::TooFewArgs("if".into()));
        }
        if !eval_as_bool(&args[0], &engine.expr_context()) {
            return Ok(());
        }
        engine.parse_str(&args[1..].join(" "))
    };
    tree.register_in("control", "if", "Run a command when a condition holds: if \"$(cond)\" <cmd>", run_if);
    tree.register_in("control", "func_if", "Alias of if", run_if);

    let run_assert = |engine: &Engine, args: &[String]| -> CommandResult {
        let [condition] = args else {
            return Err(if args.is_empty() {
                EngineError::TooFewArgs("assert".into())
            } else {
                EngineError::TooManyArgs("assert".into())
            });
        };
        if !(condition.starts_with("$(") && condition.ends_with(')')) {
            return Err(EngineError::UnknownArg(format!(
                "assert expects a $(…) condition, got `{condition}`"
            )));
        }
        if eval_as_bool(condition, &engine.expr_context()) {
            Ok(())
        } else {
            Err(EngineError::Critical(format!(
                "assertion failed: {condition} is not true"
            )))
        }
    };
    tree.register_in("control", "assert", "Stop critically unless a condition holds", run_assert);
    tree.register_in("control", "func_assert", "Alias of assert", run_assert);

    let run_return = |_: &Engine, args: &[String]| -> CommandResult {
        Err(EngineError::Critical(args.join(" ")))
    };
    tree.register_in("control", "return", "Stop the loop with a message", run_return);
    tree.register_in("control", "func_return", "Alias of return", run_return);

    let run_for = |engine: &Engine, args: &[String]| -> CommandResult {
        if args.len() < 4 {
            return Err(EngineError::TooFewArgs("for".into()));
        }
        let var = &args[0];
        let low = eval_to_int(engine, &args[1])?;
        let high = eval_to_int(engine, &args[2])?;
        let body = args[3..].join(" ");
        for i in low..=high {
            let command = body.replace(&format!("{{{var}}}"), &i.to_string());
            match engine.parse_str(&command) {
                Ok(()) => {}
                Err(err) if err.severity() == Severity::Critical => return Err(err),
                Err(err) => capture::out(err.to_string()),
            }
        }
        Ok(())
    };
    tree.register_in("control", "for", "Loop a command: for <var> <lo> <hi> <cmd>", run_for);
    tree.register_in("control", "func_for", "Alias of for", run_for);
}

fn eval_to_int(engine: &Engine, arg: &str) -> Result<i64, EngineError> {
    if let Ok(n) = arg.parse::<i64>() {
        return Ok(n);
    }
    let evaluated = Expression::parse(arg, engine.expr_context()).eval(None);
    evaluated
        .trim()
        .parse::<f64>()
        .map(|v| v as i64)
        .map_err(|_| EngineError::InvalidArg {
            arg: arg.to_string(),
            reason: "expected an integer or $(…) expression".to_string(),
        })
}

//----------------------------------------------------------------------
// Output and logging

fn register_logging(tree: &mut FuncTree<Engine>) {
    tree.register_in("output", "echo", "Print the arguments", |_, args| {
        capture::out(args.join(" "));
        Ok(())
    });
    tree.register_in("output", "error", "Report a non-critical error", |_, args| {
        Err(EngineError::UserError(args.join(" ")))
    });
    tree.register_in("output", "warn", "Report a warning", |_, args| {
        Err(EngineError::Warning(args.join(" ")))
    });
    tree.register_in("output", "critical", "Report a critical error", |_, args| {
        Err(EngineError::Critical(args.join(" ")))
    });
    tree.register_in("output", "clear", "Discard captured output", |_, _| {
        capture::take_out();
        capture::take_err();
        Ok(())
    });

    tree.register_in(
        "output",
        "log global",
        "Write the global store to a file: log global [path]",
        |engine, args| {
            let path = args.first().map(String::as_str).unwrap_or("global_state.json");
            std::fs::write(path, engine.global().serialize(""))
                .map_err(|err| EngineError::InvalidFile(format!("{path}: {err}")))
        },
    );

    tree.register_in(
        "output",
        "log state",
        "Write the whole engine state to a file: log state [path]",
        |engine, args| {
            let path = args.first().map(String::as_str).unwrap_or("state.json");
            let state = Document::new();
            state.set_sub_doc("global", &engine.global().sub_doc(""));
            let scene = Document::new();
            scene.deserialize(&engine.with_env(|env| env.serialize()));
            state.set_sub_doc("scene", &scene);
            std::fs::write(path, state.serialize(""))
                .map_err(|err| EngineError::InvalidFile(format!("{path}: {err}")))
        },
    );

    tree.register_in(
        "output",
        "errorlog",
        "Mirror error output into errors.log: errorlog on|off",
        |_, args| match args.first().map(String::as_str) {
            Some("on") => capture::enable_error_log(Path::new("errors.log"))
                .map_err(|err| EngineError::SymlinkRefused(err.to_string())),
            Some("off") => capture::disable_error_log()
                .map_err(|err| EngineError::InvalidFile(err.to_string())),
            _ => Err(EngineError::UnknownArg("errorlog expects on|off".into())),
        },
    );
}

//----------------------------------------------------------------------
// Scene

fn register_scene(tree: &mut FuncTree<Engine>) {
    tree.register_in(
        "scene",
        "env load",
        "Replace the scene with a scene file: env load <path>",
        |engine, args| {
            let [path] = args else {
                return Err(EngineError::TooFewArgs("env load".into()));
            };
            let text = std::fs::read_to_string(path)
                .map_err(|_| EngineError::InvalidFile(path.clone()))?;
            let resolution = engine.resolution();
            let global = engine.global().clone();
            engine.with_env(|env| {
                env.purge();
                env.deserialize(&text, resolution, &global, || engine.allocate_id());
            });
            engine.activate_display();
            Ok(())
        },
    );

    tree.register_in("scene", "env deload", "Clear the scene", |engine, _| {
        engine.with_env(|env| env.purge());
        Ok(())
    });

    tree.register_in(
        "scene",
        "spawn",
        "Spawn an object: spawn <path>[|k=v|cmd …]",
        |engine, args| {
            if args.is_empty() {
                return Err(EngineError::TooFewArgs("spawn".into()));
            }
            engine.spawn_object(&args.join(" ")).map(|_| ())
        },
    );

    tree.register_in(
        "scene",
        "selected-object get",
        "Select an object by id: selected-object get <id>",
        |engine, args| {
            let [id] = args else {
                return Err(EngineError::TooFewArgs("selected-object get".into()));
            };
            let id: u32 = id.parse().map_err(|_| EngineError::InvalidArg {
                arg: id.clone(),
                reason: "expected an object id".to_string(),
            })?;
            let object = engine
                .find_object(id)
                .ok_or_else(|| EngineError::UnknownArg(format!("no object with id {id}")))?;
            *engine.selected_slot().lock() = Some(object);
            Ok(())
        },
    );

    tree.register_in(
        "scene",
        "selected-object parse",
        "Run a command on the selected object",
        |engine, args| {
            let selected = engine.selected_slot().lock().clone();
            match selected {
                Some(object) => object.dispatch(&args.join(" ")),
                None => Err(EngineError::UnknownArg("no object selected".into())),
            }
        },
    );

    tree.register_in(
        "scene",
        "draft parse",
        "Run a command on the draft object, creating it on first use",
        |engine, args| {
            let mut draft = engine.draft_slot().lock();
            let object =
                draft.get_or_insert_with(|| SceneObject::new(engine.global().clone()));
            object.dispatch(&args.join(" "))
        },
    );

    tree.register_in(
        "scene",
        "draft spawn",
        "Spawn a copy of the draft object",
        |engine, _| {
            let draft = engine.draft_slot().lock().clone();
            let Some(draft) = draft else {
                return Err(EngineError::UnknownArg("no draft object".into()));
            };
            let object = SceneObject::from_spec(&draft.serialize(), engine.global().clone());
            object.set_object_id(engine.allocate_id());
            let resolution = engine.resolution();
            engine.with_env(|env| env.append(object, resolution));
            engine.activate_display();
            Ok(())
        },
    );

    tree.register_in("scene", "draft reset", "Discard the draft object", |engine, _| {
        *engine.draft_slot().lock() = None;
        Ok(())
    });
}

//----------------------------------------------------------------------
// Display state

fn register_display(tree: &mut FuncTree<Engine>) {
    tree.register_in(
        "display",
        "cam set",
        "Place the camera: cam set <x> <y> [c]",
        |engine, args| {
            if args.len() < 2 {
                return Err(EngineError::TooFewArgs("cam set".into()));
            }
            let x = parse_number(&args[0])?;
            let y = parse_number(&args[1])?;
            let (res_x, res_y) = engine.resolution();
            let centered = args.get(2).map(String::as_str) == Some("c");
            let (x, y) = if centered {
                (x - f64::from(res_x) / 2.0, y - f64::from(res_y) / 2.0)
            } else {
                (x, y)
            };
            engine.global().set(keys::CAM_X, x);
            engine.global().set(keys::CAM_Y, y);
            Ok(())
        },
    );

    tree.register_in(
        "display",
        "cam move",
        "Move the camera by a delta: cam move <dx> <dy>",
        |engine, args| {
            if args.len() < 2 {
                return Err(EngineError::TooFewArgs("cam move".into()));
            }
            engine.global().set_add(keys::CAM_X, parse_number(&args[0])?);
            engine.global().set_add(keys::CAM_Y, parse_number(&args[1])?);
            Ok(())
        },
    );

    tree.register_in(
        "display",
        "set-res",
        "Set the display resolution: set-res <w> <h> [scale]",
        |engine, args| {
            if args.len() < 2 {
                return Err(EngineError::TooFewArgs("set-res".into()));
            }
            let width = parse_number(&args[0])?.max(1.0) as u64;
            let height = parse_number(&args[1])?.max(1.0) as u64;
            engine.global().set(keys::DISPLAY_RES_X, width);
            engine.global().set(keys::DISPLAY_RES_Y, height);
            if let Some(scale) = args.get(2) {
                engine.global().set(keys::DISPLAY_SCALE, parse_number(scale)?);
            }
            let resolution = engine.resolution();
            engine.with_env(|env| env.reinsert_all(resolution));
            engine.activate_display();
            Ok(())
        },
    );

    tree.register_in(
        "display",
        "set-fps",
        "Set the frame-rate target: set-fps <n>",
        |engine, args| {
            let [fps] = args else {
                return Err(EngineError::TooFewArgs("set-fps".into()));
            };
            let fps = parse_number(fps)?.clamp(1.0, 1000.0) as u64;
            engine.global().set(keys::DISPLAY_FPS, fps);
            engine.activate_display();
            Ok(())
        },
    );

    tree.register_in(
        "display",
        "show-fps",
        "Toggle the fps overlay flag: show-fps on|off",
        |engine, args| match args.first().map(String::as_str) {
            Some("on") => {
                engine.global().set(keys::DISPLAY_SHOW_FPS, true);
                Ok(())
            }
            Some("off") => {
                engine.global().set(keys::DISPLAY_SHOW_FPS, false);
                Ok(())
            }
            _ => Err(EngineError::UnknownArg("show-fps expects on|off".into())),
        },
    );

    tree.register_in(
        "display",
        "snapshot",
        "Serialize the scene to a file: snapshot [path]",
        |engine, args| {
            let path = args.first().map(String::as_str).unwrap_or("snapshot.json");
            let serialized = engine.with_env(|env| env.serialize());
            std::fs::write(path, serialized)
                .map_err(|err| EngineError::Renderer(format!("snapshot failed: {err}")))
        },
    );

    tree.register_in("display", "beep", "Emit an audible beep", |_, _| {
        // The audio bus is an external collaborator; headless builds just
        // report the beep.
        capture::out("beep");
        Ok(())
    });
}

fn parse_number(arg: &str) -> Result<f64, EngineError> {
    arg.parse::<f64>().map_err(|_| EngineError::InvalidArg {
        arg: arg.to_string(),
        reason: "expected a number".to_string(),
    })
}
