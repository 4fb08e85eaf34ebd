//! Engine configuration loading and parsing.
//!
//! Parses `tessera.toml` (or an override path provided by the binary).
//! Unknown fields are ignored so configurations can evolve forward without
//! warnings; every field has a default and values are clamped to sane
//! ranges in `EngineConfig::apply`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InvokeSection {
    /// Worker slot count of the pair engine.
    pub workers: usize,
    /// Denominator N of the 1/N inactive-listener sweep probability.
    pub sweep_denominator: u32,
}

impl Default for InvokeSection {
    fn default() -> Self {
        Self {
            workers: core_rules::DEFAULT_WORKERS,
            sweep_denominator: core_rules::DEFAULT_SWEEP_DENOMINATOR,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SceneSection {
    pub batch_cost_goal: u64,
}

impl Default for SceneSection {
    fn default() -> Self {
        Self {
            batch_cost_goal: core_scene::DEFAULT_BATCH_COST_GOAL,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplaySection {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 1000,
            fps: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResourceSection {
    /// Fallback directories tried by `spawn` when the given path is absent.
    pub object_dirs: Vec<String>,
}

impl Default for ResourceSection {
    fn default() -> Self {
        Self {
            object_dirs: vec![
                "./Resources/RenderObjects".to_string(),
                "./Resources/Renderobjects".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub invoke: InvokeSection,
    pub scene: SceneSection,
    pub display: DisplaySection,
    pub resources: ResourceSection,
}

impl EngineConfig {
    /// Clamps parsed values to usable ranges.
    pub fn apply(mut self) -> EngineConfig {
        self.invoke.workers = self.invoke.workers.clamp(1, 64);
        self.invoke.sweep_denominator = self.invoke.sweep_denominator.max(1);
        self.scene.batch_cost_goal = self.scene.batch_cost_goal.max(1);
        self.display.width = self.display.width.max(1);
        self.display.height = self.display.height.max(1);
        self.display.fps = self.display.fps.clamp(1, 1000);
        self
    }
}

/// Loads from `path`; a missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        info!(target: "engine.config", path = %path.display(), "no config file, using defaults");
        return Ok(EngineConfig::default().apply());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let parsed: EngineConfig =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    info!(target: "engine.config", path = %path.display(), "config loaded");
    Ok(parsed.apply())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default().apply();
        assert_eq!(config.invoke.workers, 4);
        assert_eq!(config.invoke.sweep_denominator, 100);
        assert_eq!(config.display.fps, 60);
        assert_eq!(config.resources.object_dirs.len(), 2);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(&path, "[invoke]\nworkers = 8\n\n[display]\nfps = 30\n").unwrap();
        let config = load_from(&path).unwrap();
        assert_eq!(config.invoke.workers, 8);
        assert_eq!(config.display.fps, 30);
        assert_eq!(config.scene.batch_cost_goal, core_scene::DEFAULT_BATCH_COST_GOAL);
    }

    #[test]
    fn values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(&path, "[invoke]\nworkers = 0\nsweep_denominator = 0\n").unwrap();
        let config = load_from(&path).unwrap();
        assert_eq!(config.invoke.workers, 1);
        assert_eq!(config.invoke.sweep_denominator, 1);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(&path, "[display]\nfps = 10\nfuture_option = true\n").unwrap();
        assert!(load_from(&path).is_ok());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_from(Path::new("definitely/not/here.toml")).unwrap();
        assert_eq!(config.display.width, 1000);
    }
}
