//! Deployment lifecycle hooks.
//!
//! Both hooks talk to the outside world only through small traits
//! ([`EnvStore`], [`HostResolver`]) so they run against in-memory fakes in
//! tests and against the `azd` / `az` CLIs in production.

mod command;
pub mod credentials_hook;
pub mod env_store;
pub mod openapi_patch;

pub use command::CommandError;
pub use credentials_hook::{
    candidate_sources, provision_credentials, CredentialSource, ExistingValuePolicy, HookError,
    ProvisionOutcome,
};
pub use env_store::{AzdEnvStore, EnvStore, EnvStoreError, MemoryEnvStore};
pub use openapi_patch::{
    patch_openapi, rewrite_servers_block, AzCliHostResolver, HostResolver, PatchOutcome,
    PatchRequest,
};
