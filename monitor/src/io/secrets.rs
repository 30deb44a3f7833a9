//! Credential sources for the gateways and the blob store.

use std::env;

use anyhow::{Context, Result, bail};

/// Supplies a secret value on demand.
pub trait SecretProvider {
    fn secret(&self) -> Result<String>;
}

/// Reads the secret from an environment variable each time it is requested.
#[derive(Debug, Clone)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretProvider for EnvSecret {
    fn secret(&self) -> Result<String> {
        let value = env::var(&self.var).with_context(|| format!("env {} not set", self.var))?;
        if value.trim().is_empty() {
            bail!("env {} is empty", self.var);
        }
        Ok(value)
    }
}

/// Fixed secret, for tests and tooling.
#[derive(Clone)]
pub struct StaticSecret(pub String);

impl SecretProvider for StaticSecret {
    fn secret(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
