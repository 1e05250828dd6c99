//! Post-deploy hook: points the static OpenAPI document at the deployed
//! container app.
//!
//! Every failure is a soft skip. The deployment has already succeeded by
//! the time this runs, so a stale `servers:` entry is only worth a warning.

use std::path::PathBuf;

use tracing::{info, warn};

use super::command::{run_command, CommandError};
use super::env_store::EnvStore;

pub const RESOURCE_GROUP_KEY: &str = "AZURE_RESOURCE_GROUP";
pub const CONTAINER_APP_NAME_KEY: &str = "AZURE_CONTAINER_APP_NAME";
pub const SERVICE_NAME_KEY: &str = "SERVICE_MCP_SERVER_NAME";

const SERVERS_KEY: &str = "servers:";

/// Looks up the public hostname of a deployed app.
pub trait HostResolver {
    /// `Ok(None)` when the app exists but exposes no ingress.
    fn resolve_fqdn(&self, resource_group: &str, app_name: &str)
        -> Result<Option<String>, CommandError>;
}

/// Resolver backed by `az containerapp show`.
#[derive(Debug, Clone, Default)]
pub struct AzCliHostResolver;

impl HostResolver for AzCliHostResolver {
    fn resolve_fqdn(
        &self,
        resource_group: &str,
        app_name: &str,
    ) -> Result<Option<String>, CommandError> {
        let output = run_command(
            "az",
            &[
                "containerapp",
                "show",
                "--name",
                app_name,
                "--resource-group",
                resource_group,
                "--query",
                "properties.configuration.ingress.fqdn",
                "-o",
                "tsv",
            ],
        )?;
        let fqdn = output.trim();
        Ok(if fqdn.is_empty() {
            None
        } else {
            Some(fqdn.to_string())
        })
    }
}

#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub resource_group: Option<String>,
    pub app_name: Option<String>,
    pub document: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched { url: String },
    Skipped { reason: String },
}

impl PatchOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("Skipping OpenAPI patch: {}", reason);
        PatchOutcome::Skipped { reason }
    }
}

fn is_top_level_servers_key(line: &str) -> bool {
    line.strip_prefix(SERVERS_KEY)
        .map(|rest| {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#') || rest.starts_with('[')
        })
        .unwrap_or(false)
}

fn continues_block(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t') || line.starts_with('-')
}

/// Replaces the document's top-level `servers:` block with a single entry
/// for `url`, or inserts one at the top when there is none. Everything else
/// is kept byte for byte.
pub fn rewrite_servers_block(document: &str, url: &str) -> String {
    let block = format!("{}\n  - url: {}\n", SERVERS_KEY, url);

    let lines: Vec<&str> = document.split_inclusive('\n').collect();
    let content = |line: &str| line.trim_end_matches(['\n', '\r']).to_string();

    let start = match lines.iter().position(|l| is_top_level_servers_key(&content(*l))) {
        Some(index) => index,
        None => return format!("{}{}", block, document),
    };

    let mut end = start + 1;
    for (index, line) in lines.iter().enumerate().skip(start + 1) {
        let line = content(*line);
        if line.trim().is_empty() {
            continue;
        }
        if continues_block(&line) {
            end = index + 1;
        } else {
            break;
        }
    }

    let mut rewritten = String::with_capacity(document.len() + block.len());
    for line in &lines[..start] {
        rewritten.push_str(line);
    }
    rewritten.push_str(&block);
    for line in &lines[end..] {
        rewritten.push_str(line);
    }
    rewritten
}

fn lookup(store: &dyn EnvStore, keys: &[&str]) -> Option<String> {
    for key in keys {
        match store.get(key) {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => warn!("Could not read {} from the environment store: {}", key, e),
        }
    }
    None
}

pub fn patch_openapi(
    store: &dyn EnvStore,
    resolver: &dyn HostResolver,
    request: &PatchRequest,
) -> PatchOutcome {
    let resource_group = match request
        .resource_group
        .clone()
        .or_else(|| lookup(store, &[RESOURCE_GROUP_KEY]))
    {
        Some(rg) => rg,
        None => return PatchOutcome::skipped(format!("{} is not set", RESOURCE_GROUP_KEY)),
    };

    let app_name = match request
        .app_name
        .clone()
        .or_else(|| lookup(store, &[CONTAINER_APP_NAME_KEY, SERVICE_NAME_KEY]))
    {
        Some(name) => name,
        None => {
            return PatchOutcome::skipped(format!(
                "neither {} nor {} is set",
                CONTAINER_APP_NAME_KEY, SERVICE_NAME_KEY
            ))
        }
    };

    let document = match std::fs::read_to_string(&request.document) {
        Ok(document) => document,
        Err(e) => {
            return PatchOutcome::skipped(format!(
                "cannot read {}: {}",
                request.document.display(),
                e
            ))
        }
    };

    let fqdn = match resolver.resolve_fqdn(&resource_group, &app_name) {
        Ok(Some(fqdn)) => fqdn,
        Ok(None) => {
            return PatchOutcome::skipped(format!("app {} has no public hostname", app_name))
        }
        Err(e) => {
            return PatchOutcome::skipped(format!(
                "cannot resolve hostname of {} in {}: {}",
                app_name, resource_group, e
            ))
        }
    };

    let url = format!("https://{}", fqdn);
    let patched = rewrite_servers_block(&document, &url);

    if let Err(e) = std::fs::write(&request.document, patched) {
        return PatchOutcome::skipped(format!(
            "cannot write {}: {}",
            request.document.display(),
            e
        ));
    }

    info!("Updated {} to {}", request.document.display(), url);
    PatchOutcome::Patched { url }
}
