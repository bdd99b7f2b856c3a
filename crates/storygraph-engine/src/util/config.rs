use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::placement::{Bounds, PlacementParams};
use crate::render::{ForceParams, LayoutConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    #[default]
    Preset,
    Force,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub snapshot_cache_size: usize,
    /// Lifetime of chapter caches in the key-value store; 0 keeps them forever.
    pub store_ttl_secs: u64,
    pub max_prefetch_events: u32,
    pub label_max_chars: usize,
    pub min_query_len: usize,
    pub persist_positions: bool,
    pub layout_mode: LayoutMode,
    pub canvas: Bounds,
    pub placement: PlacementParams,
    pub force: ForceParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_cache_size: 32,
            store_ttl_secs: 7 * 24 * 3600,
            max_prefetch_events: 256,
            label_max_chars: 14,
            min_query_len: 2,
            persist_positions: true,
            layout_mode: LayoutMode::Preset,
            canvas: Bounds::default(),
            placement: PlacementParams::default(),
            force: ForceParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn store_ttl(&self) -> Option<Duration> {
        (self.store_ttl_secs > 0).then(|| Duration::from_secs(self.store_ttl_secs))
    }

    pub fn layout_config(&self) -> LayoutConfig {
        let padding = self.placement.padding;
        match self.layout_mode {
            LayoutMode::Preset => LayoutConfig::Preset {
                bounds: self.canvas,
                padding,
            },
            LayoutMode::Force => LayoutConfig::Force {
                params: self.force.clone(),
                bounds: self.canvas,
                padding,
            },
        }
    }
}

fn config_file_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "storygraph")?;
    Some(proj.config_dir().join("engine.toml"))
}

pub fn load_or_default() -> EngineConfig {
    let Some(path) = config_file_path() else {
        return EngineConfig::default();
    };
    load_or_default_from_path(&path)
}

pub fn load_or_default_from_path(path: &Path) -> EngineConfig {
    let Ok(contents) = fs::read_to_string(path) else {
        return EngineConfig::default();
    };
    toml::from_str(&contents).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "invalid engine config, using defaults");
        EngineConfig::default()
    })
}

pub fn save(cfg: &EngineConfig) -> anyhow::Result<()> {
    let Some(path) = config_file_path() else {
        return Err(anyhow::anyhow!("no config directory available"));
    };
    save_to_path(cfg, &path)
}

pub fn save_to_path(cfg: &EngineConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let data = toml::to_string_pretty(cfg).context("failed to serialize engine config")?;
    fs::write(path, data)
        .with_context(|| format!("failed to write engine config {}", path.display()))?;
    Ok(())
}
