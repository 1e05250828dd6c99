//! The deployment environment's key/value store.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::command::{run_command, CommandError};

#[derive(Debug, Error)]
pub enum EnvStoreError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Unexpected environment store output: {0}")]
    InvalidOutput(String),
}

pub trait EnvStore {
    /// All values of the current environment.
    fn get_values(&self) -> Result<BTreeMap<String, String>, EnvStoreError>;

    /// A single value. Empty values are reported as absent.
    fn get(&self, key: &str) -> Result<Option<String>, EnvStoreError> {
        Ok(self
            .get_values()?
            .remove(key)
            .filter(|v| !v.trim().is_empty()))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvStoreError>;

    fn unset(&mut self, key: &str) -> Result<(), EnvStoreError>;
}

/// Store backed by the `azd env` commands.
#[derive(Debug, Clone)]
pub struct AzdEnvStore {
    program: String,
    environment: Option<String>,
}

impl Default for AzdEnvStore {
    fn default() -> Self {
        Self {
            program: "azd".to_string(),
            environment: None,
        }
    }
}

impl AzdEnvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets a named environment instead of the default one.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    fn run(&self, args: &[&str]) -> Result<String, EnvStoreError> {
        let mut full_args: Vec<&str> = vec!["env"];
        full_args.extend_from_slice(args);
        if let Some(environment) = &self.environment {
            full_args.push("--environment");
            full_args.push(environment);
        }
        Ok(run_command(&self.program, &full_args)?)
    }
}

/// Parses the output of `azd env get-values --output json`. Non-string
/// values are kept in their JSON text form.
pub(crate) fn parse_values_json(output: &str) -> Result<BTreeMap<String, String>, EnvStoreError> {
    let values: BTreeMap<String, Value> = serde_json::from_str(output.trim())
        .map_err(|e| EnvStoreError::InvalidOutput(e.to_string()))?;
    Ok(values
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

impl EnvStore for AzdEnvStore {
    fn get_values(&self) -> Result<BTreeMap<String, String>, EnvStoreError> {
        let output = self.run(&["get-values", "--output", "json"])?;
        parse_values_json(&output)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvStoreError> {
        debug!("azd env set {}", key);
        self.run(&["set", key, value])?;
        Ok(())
    }

    fn unset(&mut self, key: &str) -> Result<(), EnvStoreError> {
        debug!("azd env unset {}", key);
        self.run(&["unset", key])?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnvStore {
    values: BTreeMap<String, String>,
    fail_unset: bool,
}

impl MemoryEnvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Makes every `unset` fail, like an `azd` without the `unset` command.
    pub fn failing_unset(mut self) -> Self {
        self.fail_unset = true;
        self
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

impl EnvStore for MemoryEnvStore {
    fn get_values(&self) -> Result<BTreeMap<String, String>, EnvStoreError> {
        Ok(self.values.clone())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvStoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&mut self, key: &str) -> Result<(), EnvStoreError> {
        if self.fail_unset {
            return Err(EnvStoreError::InvalidOutput(format!(
                "cannot unset {}",
                key
            )));
        }
        self.values.remove(key);
        Ok(())
    }
}
