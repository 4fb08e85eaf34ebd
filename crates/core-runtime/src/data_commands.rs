//! Document data commands, registered on any domain that fronts a document.
//!
//! The same command set manipulates the global store and each scene object's
//! document; the host supplies an accessor from itself to the backing
//! document. Values are stored as strings — numeric reads parse on demand.

use std::sync::Arc;

use core_document::{Document, MemberKind};

use crate::error::{CommandResult, EngineError};
use crate::functree::FuncTree;

/// Registers `set`, `move`, `copy`, `delete`/`delete-key`, `ensureArray` and
/// the push/pop family on `tree`. `delete_name` lets hosts whose `delete`
/// means something else (scene objects) rebind key deletion.
pub fn register_data_commands<T, F>(tree: &mut FuncTree<T>, delete_name: &str, doc_of: F)
where
    T: 'static,
    F: Fn(&T) -> Arc<Document> + Clone + Send + Sync + 'static,
{
    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "set",
        "Set a key to a value: set <key> <value>",
        move |host, args| {
            if args.len() < 2 {
                return Err(EngineError::TooFewArgs("set".into()));
            }
            doc(host).set(&args[0], args[1..].join(" "));
            Ok(())
        },
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "move",
        "Move a subtree: move <src> <dst>",
        move |host, args| transfer(&doc(host), args, true),
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "copy",
        "Copy a subtree: copy <src> <dst>",
        move |host, args| transfer(&doc(host), args, false),
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        delete_name,
        "Delete a key and its descendants",
        move |host, args| {
            let [key] = args else {
                return Err(EngineError::TooFewArgs("delete".into()));
            };
            doc(host).remove_key(key);
            Ok(())
        },
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "ensureArray",
        "Wrap a scalar value into a one-element array",
        move |host, args| {
            let [key] = args else {
                return Err(EngineError::TooFewArgs("ensureArray".into()));
            };
            ensure_array(&doc(host), key)
        },
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "push_back",
        "Append a value to an array: push_back <key> [value]",
        move |host, args| {
            let (key, value) = split_push_args("push_back", args)?;
            let doc = doc(host);
            ensure_array(&doc, key)?;
            let size = doc.member_size(key);
            doc.set(&format!("{key}[{size}]"), value);
            Ok(())
        },
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "push_front",
        "Prepend a value to an array: push_front <key> [value]",
        move |host, args| {
            let (key, value) = split_push_args("push_front", args)?;
            let doc = doc(host);
            ensure_array(&doc, key)?;
            let size = doc.member_size(key);
            // Shift existing elements up by one.
            let snapshot = doc.sub_doc(key);
            for i in (0..size).rev() {
                let element = snapshot.sub_doc(&format!("[{i}]"));
                doc.set_sub_doc(&format!("{key}[{}]", i + 1), &element);
            }
            doc.set(&format!("{key}[0]"), value);
            Ok(())
        },
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "pop_back",
        "Remove the last element of an array",
        move |host, args| {
            let [key] = args else {
                return Err(EngineError::TooFewArgs("pop_back".into()));
            };
            let doc = doc(host);
            ensure_array(&doc, key)?;
            let size = doc.member_size(key);
            if size > 0 {
                doc.remove_key(&format!("{key}[{}]", size - 1));
            }
            Ok(())
        },
    );

    let doc = doc_of.clone();
    tree.register_in(
        "data",
        "pop_front",
        "Remove the first element of an array",
        move |host, args| {
            let [key] = args else {
                return Err(EngineError::TooFewArgs("pop_front".into()));
            };
            let doc = doc(host);
            ensure_array(&doc, key)?;
            if doc.member_size(key) > 0 {
                doc.remove_key(&format!("{key}[0]"));
            }
            Ok(())
        },
    );
}

fn split_push_args<'a>(name: &str, args: &'a [String]) -> Result<(&'a str, String), EngineError> {
    match args {
        [] => Err(EngineError::TooFewArgs(name.into())),
        [key] => Ok((key, String::new())),
        [key, value] => Ok((key, value.clone())),
        _ => Err(EngineError::TooManyArgs(name.into())),
    }
}

fn ensure_array(doc: &Arc<Document>, key: &str) -> CommandResult {
    match doc.member_kind(key) {
        MemberKind::Array => Ok(()),
        MemberKind::Value => {
            let existing = doc.get(key, String::new());
            doc.remove_key(key);
            doc.set(&format!("{key}[0]"), existing);
            Ok(())
        }
        MemberKind::Null => {
            doc.set_empty_array(key);
            Ok(())
        }
        MemberKind::Object => Err(EngineError::InvalidArg {
            arg: key.to_string(),
            reason: "objects cannot be converted to arrays".to_string(),
        }),
    }
}

fn transfer(doc: &Arc<Document>, args: &[String], remove_source: bool) -> CommandResult {
    let [src, dst] = args else {
        return Err(EngineError::TooFewArgs(
            if remove_source { "move" } else { "copy" }.into(),
        ));
    };
    match doc.member_kind(src) {
        MemberKind::Null => {
            return Err(EngineError::UnknownArg(format!(
                "source key `{src}` does not exist"
            )));
        }
        MemberKind::Object | MemberKind::Array => {
            let sub = doc.sub_doc(src);
            doc.remove_key(dst);
            doc.set_sub_doc(dst, &sub);
        }
        MemberKind::Value => {
            let value = doc.get(src, String::new());
            doc.remove_key(dst);
            doc.set(dst, value);
        }
    }
    if remove_source {
        doc.remove_key(src);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Host {
        doc: Arc<Document>,
    }

    fn setup() -> (FuncTree<Host>, Host) {
        let mut tree = FuncTree::new("data-test");
        register_data_commands(&mut tree, "delete", |h: &Host| h.doc.clone());
        (
            tree,
            Host {
                doc: Arc::new(Document::new()),
            },
        )
    }

    #[test]
    fn set_and_delete() {
        let (tree, host) = setup();
        tree.parse_str(&host, "set a.b 12").unwrap();
        assert_eq!(host.doc.get("a.b", 0.0), 12.0);
        tree.parse_str(&host, "set msg hello world").unwrap();
        assert_eq!(host.doc.get("msg", String::new()), "hello world");
        tree.parse_str(&host, "delete a.b").unwrap();
        assert_eq!(host.doc.member_kind("a.b"), MemberKind::Null);
    }

    #[test]
    fn move_and_copy() {
        let (tree, host) = setup();
        host.doc.set("src.inner", 5.0);
        tree.parse_str(&host, "copy src dst").unwrap();
        assert_eq!(host.doc.get("dst.inner", 0.0), 5.0);
        assert_eq!(host.doc.get("src.inner", 0.0), 5.0);
        tree.parse_str(&host, "move dst moved").unwrap();
        assert_eq!(host.doc.get("moved.inner", 0.0), 5.0);
        assert_eq!(host.doc.member_kind("dst"), MemberKind::Null);
        assert!(tree.parse_str(&host, "move nothing there").is_err());
    }

    #[test]
    fn array_pipeline() {
        let (tree, host) = setup();
        tree.parse_str(&host, "push_back list a").unwrap();
        tree.parse_str(&host, "push_back list b").unwrap();
        tree.parse_str(&host, "push_front list front").unwrap();
        assert_eq!(host.doc.member_size("list"), 3);
        assert_eq!(host.doc.get("list[0]", String::new()), "front");
        assert_eq!(host.doc.get("list[2]", String::new()), "b");
        tree.parse_str(&host, "pop_front list").unwrap();
        assert_eq!(host.doc.get("list[0]", String::new()), "a");
        tree.parse_str(&host, "pop_back list").unwrap();
        assert_eq!(host.doc.member_size("list"), 1);
    }

    #[test]
    fn ensure_array_wraps_existing_scalar() {
        let (tree, host) = setup();
        host.doc.set("v", 7.0);
        tree.parse_str(&host, "ensureArray v").unwrap();
        assert_eq!(host.doc.member_size("v"), 1);
        assert_eq!(host.doc.get("v[0]", 0.0), 7.0);
    }
}
