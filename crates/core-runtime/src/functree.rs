//! Hierarchical command dispatcher.
//!
//! A function tree is a set of named commands organised into categories.
//! Command names may contain spaces (`cam set`, `env load`); dispatch
//! performs a longest-prefix match over the space-separated registered
//! names, so `debug print-src-rect` resolves before `debug`. Tokenization
//! respects single- and double-quoted runs (with a warning on unclosed
//! quotes). Help output is derived from the tree.

use core_document::capture;
use tracing::trace;

use crate::error::{CommandResult, EngineError, Severity};

pub type CommandFn<T> = Box<dyn Fn(&T, &[String]) -> CommandResult + Send + Sync>;
pub type PreParseFn<T> = Box<dyn Fn(&T) -> CommandResult + Send + Sync>;

struct CommandEntry<T> {
    name: String,
    words: Vec<String>,
    category: String,
    description: String,
    run: CommandFn<T>,
}

pub struct FuncTree<T> {
    name: String,
    entries: Vec<CommandEntry<T>>,
    pre_parse: Option<PreParseFn<T>>,
}

impl<T> FuncTree<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            pre_parse: None,
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        run: impl Fn(&T, &[String]) -> CommandResult + Send + Sync + 'static,
    ) {
        self.register_in("general", name, description, run);
    }

    pub fn register_in(
        &mut self,
        category: &str,
        name: &str,
        description: &str,
        run: impl Fn(&T, &[String]) -> CommandResult + Send + Sync + 'static,
    ) {
        self.entries.push(CommandEntry {
            name: name.to_string(),
            words: name.split_whitespace().map(str::to_string).collect(),
            category: category.to_string(),
            description: description.to_string(),
            run: Box::new(run),
        });
    }

    /// Hook invoked once per `parse_str` before dispatch; a critical error
    /// aborts the command.
    pub fn set_pre_parse(&mut self, hook: impl Fn(&T) -> CommandResult + Send + Sync + 'static) {
        self.pre_parse = Some(Box::new(hook));
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn parse_str(&self, host: &T, line: &str) -> CommandResult {
        let raw = parse_quoted_arguments(line);
        let tokens: Vec<String> = raw.into_iter().filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return Ok(());
        }
        if tokens[0] == "help" {
            capture::out(self.help());
            return Ok(());
        }
        if let Some(hook) = &self.pre_parse
            && let Err(err) = hook(host)
        {
            if err.severity() == Severity::Critical {
                return Err(err);
            }
            capture::err(err.to_string());
        }

        // Longest-prefix match over registered names.
        let mut best: Option<&CommandEntry<T>> = None;
        for entry in &self.entries {
            if entry.words.len() <= tokens.len()
                && entry
                    .words
                    .iter()
                    .zip(&tokens)
                    .all(|(word, token)| word == token)
                && best.is_none_or(|b| entry.words.len() > b.words.len())
            {
                best = Some(entry);
            }
        }
        match best {
            Some(entry) => {
                trace!(target: "runtime.functree", tree = self.name, command = entry.name, "dispatch");
                (entry.run)(host, &tokens[entry.words.len()..])
            }
            None => Err(EngineError::UnknownCommand(tokens[0].clone())),
        }
    }

    pub fn help(&self) -> String {
        let mut lines = vec![format!("{} — available commands:", self.name)];
        let mut categories: Vec<&str> = self.entries.iter().map(|e| e.category.as_str()).collect();
        categories.sort_unstable();
        categories.dedup();
        for category in categories {
            lines.push(format!("[{category}]"));
            let mut in_category: Vec<&CommandEntry<T>> = self
                .entries
                .iter()
                .filter(|e| e.category == category)
                .collect();
            in_category.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in in_category {
                let summary = entry.description.lines().next().unwrap_or("");
                lines.push(format!("  {:<24} {}", entry.name, summary));
            }
        }
        lines.join("\n")
    }
}

/// Tokenises a command respecting single- and double-quoted runs. Quote
/// characters are stripped; empty tokens produced by multi-space runs are
/// preserved so formatting survives recombination. Unclosed quotes warn.
pub fn parse_quoted_arguments(cmd: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut quote: Option<char> = None;
    for token in cmd.split(' ') {
        match quote {
            None => {
                let first = token.chars().next();
                if let Some(q) = first.filter(|c| *c == '"' || *c == '\'') {
                    let body = &token[1..];
                    if body.len() >= q.len_utf8() && body.ends_with(q) {
                        result.push(body[..body.len() - 1].to_string());
                    } else {
                        quote = Some(q);
                        result.push(body.to_string());
                    }
                } else {
                    result.push(token.to_string());
                }
            }
            Some(q) => {
                let closes = token.ends_with(q);
                let body = if closes {
                    &token[..token.len() - 1]
                } else {
                    token
                };
                if let Some(last) = result.last_mut() {
                    last.push(' ');
                    last.push_str(body);
                }
                if closes {
                    quote = None;
                }
            }
        }
    }
    if quote.is_some() {
        capture::err(format!("Warning: unclosed quote in command: {cmd}"));
    }
    result
}

/// Joins arguments back into a single command string.
pub fn recombine_args(args: &[String]) -> String {
    args.join(" ")
}
