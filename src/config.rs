// src/config.rs

use crate::source::RigidTransform;
use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::warn;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config: Config =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing config {}", path))?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            warn!("{} not found, using default configuration", path);
            Ok(Self::default())
        }
    }

    /// Structural checks that must pass before the first frame.
    pub fn validate(&self) -> Result<()> {
        self.tracking.kalman.validate()?;
        self.transform()?;
        if self.runtime.tick_ms == 0 {
            anyhow::bail!("runtime.tick_ms must be > 0");
        }
        Ok(())
    }

    pub fn transform(&self) -> Result<RigidTransform> {
        Ok(RigidTransform::from_row_major(
            self.sources.transform.as_deref(),
        )?)
    }
}
