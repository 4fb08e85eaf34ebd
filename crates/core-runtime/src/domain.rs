//! Domain composition.
//!
//! A domain is an object that hosts a function tree and composes
//! [`DomainModule`]s: small capability units that add commands and per-frame
//! behavior. Modules are constructed in declared order, updated in that
//! order each frame, and re-initialised after a deserialize so they can
//! re-link stable cells.
//!
//! Modules must not reach for process-wide state from their constructors;
//! the [`init_guard`] depth counter makes violations loud.

use crate::error::{CommandResult, Severity};

pub trait DomainModule<T: ?Sized>: Send + Sync {
    /// Stable identifier for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Per-frame update. Non-critical failures are reported but do not stop
    /// the frame.
    fn update(&self, _host: &T) -> CommandResult {
        Ok(())
    }

    /// Re-links internal state (stable cells, cached sizes) after the
    /// backing document was replaced wholesale.
    fn reinit(&self, _host: &T) {}
}

/// Ordered collection of modules attached to a domain.
pub struct ModuleSet<T: ?Sized> {
    modules: Vec<Box<dyn DomainModule<T>>>,
}

impl<T: ?Sized> Default for ModuleSet<T> {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
        }
    }
}

impl<T: ?Sized> ModuleSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, module: impl DomainModule<T> + 'static) {
        self.modules.push(Box::new(module));
    }

    /// Updates every module in declared order; returns the first critical
    /// error, logging non-critical ones.
    pub fn update_all(&self, host: &T) -> CommandResult {
        for module in &self.modules {
            if let Err(err) = module.update(host) {
                if err.severity() == Severity::Critical {
                    return Err(err);
                }
                core_document::capture::err(format!("module {}: {err}", module.name()));
            }
        }
        Ok(())
    }

    pub fn reinit_all(&self, host: &T) {
        for module in &self.modules {
            module.reinit(host);
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}

/// Init-depth tracking used to detect global-state access from module
/// constructors.
pub mod init_guard {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tracing::error;

    static DEPTH: AtomicU32 = AtomicU32::new(0);

    /// Marks a module-construction region; dropped when construction ends.
    pub struct InitGuard(());

    pub fn enter() -> InitGuard {
        DEPTH.fetch_add(1, Ordering::Relaxed);
        InitGuard(())
    }

    impl Drop for InitGuard {
        fn drop(&mut self) {
            DEPTH.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Called by process-wide accessors; complains when used during module
    /// construction (an init-order cycle in the making).
    pub fn check_global_access(what: &str) {
        if DEPTH.load(Ordering::Relaxed) > 0 {
            error!(
                target: "runtime.domain",
                what,
                "global accessor used during module construction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter {
        hits: AtomicU32,
    }

    impl DomainModule<()> for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }
        fn update(&self, _host: &()) -> CommandResult {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Failing;

    impl DomainModule<()> for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn update(&self, _host: &()) -> CommandResult {
            Err(EngineError::Critical("down".into()))
        }
    }

    #[test]
    fn updates_run_in_order_until_critical() {
        let mut set = ModuleSet::new();
        set.attach(Counter {
            hits: AtomicU32::new(0),
        });
        set.attach(Failing);
        set.attach(Counter {
            hits: AtomicU32::new(0),
        });
        assert!(set.update_all(&()).is_err());
        assert_eq!(set.names(), vec!["counter", "failing", "counter"]);
    }

    #[test]
    fn init_guard_nesting() {
        let outer = init_guard::enter();
        {
            let _inner = init_guard::enter();
            init_guard::check_global_access("test");
        }
        drop(outer);
        init_guard::check_global_access("test");
    }
}
