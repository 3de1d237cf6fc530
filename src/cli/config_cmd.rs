//! Config command for cortex.
//!
//! Shows the effective configuration after every layer has been applied,
//! or writes it out as a project config to edit.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::render;
use crate::config::{cortex_home, project_config_path, Config};

/// Actions available in config.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigAction {
    Show,
    /// Write `.cortex/config.toml` in the working directory.
    Init { force: bool },
}

/// Options for the config command.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Output format for the config command.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOutput {
    pub success: bool,
    pub action: String,
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cortex_home: Option<PathBuf>,
    pub project_config: PathBuf,
    /// Whether the project config file exists after the action.
    pub project_config_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    /// Rendered TOML for human output.
    #[serde(skip)]
    pub toml: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The config command implementation.
pub struct ConfigCommand {
    config: Config,
    cwd: PathBuf,
}

impl ConfigCommand {
    pub fn new(config: Config, cwd: impl AsRef<Path>) -> Self {
        Self {
            config,
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn run(&self, action: &ConfigAction, _options: &ConfigOptions) -> ConfigOutput {
        let project_config = project_config_path(&self.cwd);
        let mut output = ConfigOutput {
            success: true,
            action: match action {
                ConfigAction::Show => "show",
                ConfigAction::Init { .. } => "init",
            }
            .to_string(),
            data_dir: self.config.data_dir(),
            cortex_home: cortex_home(),
            project_config_exists: project_config.exists(),
            project_config,
            config: None,
            toml: String::new(),
            error: None,
        };

        match action {
            ConfigAction::Show => match self.config.to_toml() {
                Ok(toml) => {
                    output.toml = toml;
                    output.config = Some(self.config.clone());
                }
                Err(e) => {
                    output.success = false;
                    output.error = Some(e.to_string());
                }
            },
            ConfigAction::Init { force } => {
                if output.project_config_exists && !force {
                    output.success = false;
                    output.error = Some(format!(
                        "{} already exists (use --force to overwrite)",
                        output.project_config.display()
                    ));
                } else if let Err(e) = self.config.save_project(&self.cwd) {
                    output.success = false;
                    output.error = Some(e.to_string());
                } else {
                    tracing::info!(path = %output.project_config.display(), "project config written");
                    output.project_config_exists = true;
                }
            }
        }
        output
    }

    pub fn format_output(&self, output: &ConfigOutput, options: &ConfigOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_human_readable(output: &ConfigOutput) -> String {
    if let Some(error) = &output.error {
        return format!("Config {} failed: {}", output.action, error);
    }
    if output.action == "init" {
        return format!("Wrote {}", output.project_config.display());
    }

    let mut lines = vec![
        format!("# data_dir: {}", output.data_dir.display()),
        format!(
            "# cortex_home: {}",
            output
                .cortex_home
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        ),
        format!(
            "# project config: {}{}",
            output.project_config.display(),
            if output.project_config_exists { "" } else { " (missing)" }
        ),
        String::new(),
    ];
    lines.push(output.toml.trim_end().to_string());
    lines.join("\n")
}
