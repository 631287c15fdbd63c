use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveTime;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::due_date::DueDateCalculator;
use crate::models::{TaskAttributes, COMPLETION_DATE_ATTRIBUTE, DUE_DATE_ATTRIBUTE};

const APP_NAME: &str = "tasksync";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_DUE_TIME: &str = "07:00";

/// Settings shared by every tree the engine watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Attribute whose presence makes a node a task (from TASKSYNC_DUE_ATTRIBUTE)
    pub due_date_attribute: String,
    /// Attribute marking a task complete (from TASKSYNC_COMPLETION_ATTRIBUTE)
    pub completion_attribute: String,
    /// Hour used for new due dates, as `HH:MM` (from TASKSYNC_DEFAULT_DUE_TIME)
    pub default_due_time: String,
    /// How many unparsable due-date values one node may produce before the
    /// fault is escalated from a warning to an error.
    pub invalid_value_escalation_threshold: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            due_date_attribute: DUE_DATE_ATTRIBUTE.to_string(),
            completion_attribute: COMPLETION_DATE_ATTRIBUTE.to_string(),
            default_due_time: DEFAULT_DUE_TIME.to_string(),
            invalid_value_escalation_threshold: 2,
        }
    }
}

impl TaskConfig {
    /// Load configuration from the user's config directory, then apply
    /// environment overrides. Returns defaults if the file is missing or
    /// fails to parse.
    pub fn load() -> Self {
        let config = match get_config_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = std::env::var("TASKSYNC_DUE_ATTRIBUTE") {
            self.due_date_attribute = name;
        }
        if let Ok(name) = std::env::var("TASKSYNC_COMPLETION_ATTRIBUTE") {
            self.completion_attribute = name;
        }
        if let Ok(time) = std::env::var("TASKSYNC_DEFAULT_DUE_TIME") {
            self.default_due_time = time;
        }
        self
    }

    pub fn attributes(&self) -> TaskAttributes {
        TaskAttributes {
            due_date: self.due_date_attribute.clone(),
            completion: self.completion_attribute.clone(),
        }
    }

    /// Calculator using the configured default hour, or 07:00 when the
    /// setting does not parse.
    pub fn calculator(&self) -> DueDateCalculator {
        match NaiveTime::parse_from_str(&self.default_due_time, "%H:%M") {
            Ok(time) => DueDateCalculator::new(time),
            Err(_) => {
                tracing::warn!(
                    value = %self.default_due_time,
                    "Invalid default due time, falling back to {}",
                    DEFAULT_DUE_TIME
                );
                DueDateCalculator::default()
            }
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
