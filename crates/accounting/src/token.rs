use async_trait::async_trait;

use crate::error::{AccountingError, Result};

/// Source of a currently valid bearer token.
///
/// Acquisition and refresh happen elsewhere; the client only asks for a
/// token right before each call.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// A fixed token, e.g. injected through the environment.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var)
            .map_err(|_| AccountingError::Config(format!("{} not set", var)))?;
        if token.trim().is_empty() {
            return Err(AccountingError::Config(format!("{} is empty", var)));
        }
        Ok(Self::new(token.trim()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}
