//! Named configuration values resolved from an injected provider.
//!
//! Values are resolved once at bootstrap into an [`ExtensionConfig`] and passed
//! to the components that need them. Nothing here is process-global.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

pub const EXTENSION_SECRET: &str = "EXTENSION_SECRET";
pub const AUTH0_DOMAIN: &str = "AUTH0_DOMAIN";
pub const AUTH0_RTA: &str = "AUTH0_RTA";
pub const PUBLIC_WT_URL: &str = "PUBLIC_WT_URL";
pub const WT_URL: &str = "WT_URL";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid configuration value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Source of named configuration values.
pub trait ConfigProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads values from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProvider;

impl ConfigProvider for EnvProvider {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl ConfigProvider for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

impl ConfigProvider for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        BTreeMap::get(self, name).cloned()
    }
}

/// Thin lookup layer over a provider. Empty strings are treated as unset.
#[derive(Clone)]
pub struct ConfigResolver {
    provider: Arc<dyn ConfigProvider>,
}

impl ConfigResolver {
    pub fn new(provider: Arc<dyn ConfigProvider>) -> Self {
        Self { provider }
    }

    /// The value exactly as provided; only an empty string counts as unset.
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.provider.get(name).filter(|v| !v.is_empty())
    }

    pub fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.resolve(name).ok_or(ConfigError::Missing(name))
    }
}

/// Configuration resolved once at bootstrap; immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionConfig {
    /// Signing secret for admin session tokens.
    pub secret: String,
    /// Tenant domain, e.g. `example.auth0.com`.
    pub domain: String,
    /// Authorization server host with any `https://` prefix removed.
    pub rta: String,
    /// Public base URL of the extension, without a trailing slash.
    pub base_url: String,
}

impl ExtensionConfig {
    pub fn resolve(provider: Arc<dyn ConfigProvider>) -> Result<Self, ConfigError> {
        Self::from_resolver(&ConfigResolver::new(provider))
    }

    pub fn from_resolver(resolver: &ConfigResolver) -> Result<Self, ConfigError> {
        let secret = resolver.require(EXTENSION_SECRET)?;
        let domain = resolver.require(AUTH0_DOMAIN)?;
        let rta = resolver.require(AUTH0_RTA)?;
        let rta = rta.strip_prefix("https://").unwrap_or(&rta).to_owned();
        if rta.is_empty() {
            return Err(ConfigError::Invalid {
                name: AUTH0_RTA,
                reason: "host is empty".into(),
            });
        }

        let base_url = match resolver.resolve(PUBLIC_WT_URL) {
            Some(url) => url,
            None => resolver.require(WT_URL)?,
        };

        Ok(Self {
            secret,
            domain,
            rta,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}
