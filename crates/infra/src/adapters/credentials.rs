//! Credential resolvers
//!
//! Definitions carry opaque references such as `env:GITHUB_TOKEN`; the secret
//! itself is looked up only when a fetch starts.

use std::collections::HashMap;

use async_trait::async_trait;
use dora_core::CredentialResolver;
use dora_domain::AdapterError;
use parking_lot::RwLock;

const ENV_PREFIX: &str = "env:";

/// Resolves `env:NAME` references from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialResolver;

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, reference: &str) -> Result<String, AdapterError> {
        let Some(name) = reference.strip_prefix(ENV_PREFIX) else {
            return Err(AdapterError::permanent(format!(
                "unsupported credential reference '{reference}' (expected env:NAME)"
            )));
        };
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(AdapterError::auth(format!("credential environment variable {name} is not set"))),
        }
    }
}

/// In-memory reference → secret map
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(reference, secret);
        self
    }

    pub fn insert(&self, reference: impl Into<String>, secret: impl Into<String>) {
        self.secrets.write().insert(reference.into(), secret.into());
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, reference: &str) -> Result<String, AdapterError> {
        self.secrets
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| AdapterError::auth(format!("no credential for reference '{reference}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_resolver_reads_prefixed_variables() {
        std::env::set_var("DORA_TEST_CREDENTIAL_PRESENT", "s3cret\n");
        std::env::remove_var("DORA_TEST_CREDENTIAL_ABSENT");

        let resolver = EnvCredentialResolver;
        assert_eq!(resolver.resolve("env:DORA_TEST_CREDENTIAL_PRESENT").await.unwrap(), "s3cret");
        assert!(matches!(
            resolver.resolve("env:DORA_TEST_CREDENTIAL_ABSENT").await,
            Err(AdapterError::Auth(_))
        ));
        assert!(matches!(
            resolver.resolve("vault:kv/github").await,
            Err(AdapterError::PermanentConfig(_))
        ));

        std::env::remove_var("DORA_TEST_CREDENTIAL_PRESENT");
    }

    #[tokio::test]
    async fn static_resolver_misses_are_auth_errors() {
        let resolver = StaticCredentialResolver::new().with("env:GITHUB_TOKEN", "ghp_test");
        assert_eq!(resolver.resolve("env:GITHUB_TOKEN").await.unwrap(), "ghp_test");
        assert!(matches!(resolver.resolve("env:OTHER").await, Err(AdapterError::Auth(_))));
    }
}
