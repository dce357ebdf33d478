//! Per-task agent-server settings
//!
//! Builds the `RunnerSettings` document a Runner hands to the
//! agent-server at session creation, resolving `${VAR}` tokens from the
//! process environment before the document ever reaches the Workspace
//! Manager.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SettingsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    pub model: String,
    pub max_turns: u32,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_turns: 50,
            mcp_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsManager;

impl SettingsManager {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the settings document for a task, substituting `${VAR}`
    /// tokens in every string field from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::MissingVariable` if a token references an
    /// environment variable that is not set.
    pub fn build(&self, mut settings: RunnerSettings) -> Result<RunnerSettings, SettingsError> {
        settings.model = substitute(&settings.model)?;
        for server in &mut settings.mcp_servers {
            server.command = substitute(&server.command)?;
            server.args = server
                .args
                .iter()
                .map(|a| substitute(a))
                .collect::<Result<_, _>>()?;
            for value in server.env.values_mut() {
                *value = substitute(value)?;
            }
        }
        Ok(settings)
    }
}

/// Replace every `${VAR}` occurrence in `input` with the value of the
/// process environment variable `VAR`.
fn substitute(input: &str) -> Result<String, SettingsError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            output.push_str(rest);
            return Ok(output);
        };
        output.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        let value = std::env::var(var_name)
            .map_err(|_| SettingsError::MissingVariable(var_name.to_string()))?;
        output.push_str(&value);
        rest = &rest[start + end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}
