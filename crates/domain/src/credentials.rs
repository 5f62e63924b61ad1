//! Store credential acquisition as an ordered provider chain.

use std::{fmt, fs, io, path::PathBuf};

use thiserror::Error;
use tracing::error;

/// A single source of the store password.
///
/// `Ok(None)` means "not configured here", letting the chain move on.
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn credential(&self) -> Result<Option<String>, CredentialError>;
}

/// Reads the password from a mounted secret file, trimming surrounding
/// whitespace.
#[derive(Debug, Clone)]
pub struct SecretFile {
    path: PathBuf,
}

impl SecretFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for SecretFile {
    fn name(&self) -> &'static str {
        "secret_file"
    }

    fn credential(&self) -> Result<Option<String>, CredentialError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(non_empty(&contents))
    }
}

/// A password handed over directly, usually from `REDIS_PASSWORD`.
#[derive(Clone)]
pub struct LiteralSecret {
    value: Option<String>,
}

impl LiteralSecret {
    pub fn new(value: Option<String>) -> Self {
        Self { value }
    }
}

impl fmt::Debug for LiteralSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiteralSecret")
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialProvider for LiteralSecret {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn credential(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.value.as_deref().and_then(non_empty))
    }
}

/// Ordered list of providers; the first one yielding a credential wins.
#[derive(Debug, Default)]
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Walks the chain. Provider failures are logged and treated as "no
    /// credential from this provider".
    pub fn resolve(&self) -> Option<String> {
        for provider in &self.providers {
            match provider.credential() {
                Ok(Some(secret)) => return Some(secret),
                Ok(None) => continue,
                Err(err) => {
                    error!(
                        provider = provider.name(),
                        error = %err,
                        "Could not read Redis credential"
                    );
                }
            }
        }
        None
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("could not read credential file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
