//! Converter configuration module.
//!
//! Handles loading, validating, and merging `doxconv.toml`. Stock defaults are
//! overridden by a user file in the working directory (or one passed with
//! `--config`), and command-line flags override both.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [detection]
//! order = ["apt", "fml", "xdoc", "xhtml5", "markdown"]  # first match wins
//! strict = false            # true: files matching several rules are rejected
//!
//! [batch]
//! excludes = [".git", ".svn", ".hg", ".bzr", "CVS", "_darcs", "target"]
//!
//! [output]
//! pretty = false            # beautify XML outputs (xdoc, xhtml5)
//! preserve_velocity = false # keep Velocity statements as raw text
//!
//! [vcs]
//! program = "git"
//! commit_message = "Rename sources to their converted names"
//! temp_suffix = ".tmp"
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [detection]
//! order = ["xhtml5", "xdoc", "apt", "markdown"]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::format::Format;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "doxconv.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Converter configuration loaded from `doxconv.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterConfig {
    /// Format auto-detection rules.
    pub detection: DetectionConfig,
    /// Directory traversal settings.
    pub batch: BatchConfig,
    /// Output rendering settings.
    pub output: OutputConfig,
    /// Version-control commands used by the rename post-process policy.
    pub vcs: VcsConfig,
}

impl ConverterConfig {
    /// Validate config values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.order.is_empty() {
            return Err(ConfigError::Validation(
                "detection.order must name at least one format".into(),
            ));
        }
        let mut seen = HashSet::new();
        for format in &self.detection.order {
            if !seen.insert(*format) {
                return Err(ConfigError::Validation(format!(
                    "detection.order lists {format} more than once"
                )));
            }
        }
        if self.vcs.program.trim().is_empty() {
            return Err(ConfigError::Validation("vcs.program must not be empty".into()));
        }
        if self.vcs.temp_suffix.is_empty() {
            return Err(ConfigError::Validation(
                "vcs.temp_suffix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Format auto-detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// Rule precedence. Formats missing from the list are never detected.
    pub order: Vec<Format>,
    /// Reject files that match more than one rule instead of taking the first.
    pub strict: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            order: Format::ALL.to_vec(),
            strict: false,
        }
    }
}

/// Directory traversal settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Directory names skipped while walking an input tree.
    pub excludes: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            excludes: crate::batch::DEFAULT_EXCLUDES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Output rendering settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Re-indent XML outputs after conversion.
    pub pretty: bool,
    /// Emit Velocity directives and references as raw text.
    pub preserve_velocity: bool,
}

/// Version-control settings for the rename post-process policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VcsConfig {
    /// Executable invoked as `<program> mv <from> <to>` and
    /// `<program> commit -m <message>`.
    pub program: String,
    /// Message of the commit recording the renames.
    pub commit_message: String,
    /// Suffix appended to a converted file while the rename is pending.
    pub temp_suffix: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            commit_message: "Rename sources to their converted names".to_string(),
            temp_suffix: ".tmp".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ConverterConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key by key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut table), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                let merged = match table.remove(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => value,
                };
                table.insert(key, merged);
            }
            toml::Value::Table(table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ConverterConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ConverterConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `doxconv.toml` from the given directory, falling back to defaults.
pub fn load_config(dir: &Path) -> Result<ConverterConfig, ConfigError> {
    let overlay = load_raw_config(&dir.join(CONFIG_FILENAME))?;
    resolve_config(stock_defaults_value(), overlay)
}

/// Load an explicit config file. Unlike [`load_config`], the file must exist.
pub fn load_config_file(path: &Path) -> Result<ConverterConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let overlay: toml::Value = toml::from_str(&content)?;
    resolve_config(stock_defaults_value(), Some(overlay))
}

/// Returns a fully-commented stock `doxconv.toml`.
///
/// Printed by `doxconv --gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# doxconv configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.
# Command-line flags override these values.

# ---------------------------------------------------------------------------
# Format auto-detection (--from auto)
# ---------------------------------------------------------------------------
[detection]
# Rule precedence: XML formats match on their root element, the others on
# the file extension. The first matching format wins.
order = ["apt", "fml", "xdoc", "xhtml5", "markdown"]

# Reject files matching more than one rule instead of taking the first.
strict = false

# ---------------------------------------------------------------------------
# Directory conversion
# ---------------------------------------------------------------------------
[batch]
# Directory names never descended into.
excludes = [".git", ".svn", ".hg", ".bzr", "CVS", "_darcs", "target"]

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Re-indent XML outputs (xdoc, xhtml5). Same as --format.
pretty = false

# Keep Velocity directives and $references as raw text.
# Same as --preserve-velocity.
preserve_velocity = false

# ---------------------------------------------------------------------------
# Version control (--vcs-mv)
# ---------------------------------------------------------------------------
[vcs]
program = "git"
commit_message = "Rename sources to their converted names"

# Converted files wait under <name><temp_suffix> until the rename commit.
temp_suffix = ".tmp"
"##
}
