//! Bearer token wiring for checker uploads
//!
//! Token derivation from the node's serial number happens in the backend
//! auth subsystem; the agent only carries the resulting credential.

use async_trait::async_trait;
use edgelink_bandwidth::{BearerTokenProvider, TokenError};

/// Serves the credential handed to the agent at startup
pub struct StaticTokens {
    token: String,
}

impl StaticTokens {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl BearerTokenProvider for StaticTokens {
    async fn bearer_token(&self) -> Result<String, TokenError> {
        if self.token.is_empty() {
            return Err(TokenError("no upload credential configured".to_string()));
        }
        Ok(self.token.clone())
    }
}
