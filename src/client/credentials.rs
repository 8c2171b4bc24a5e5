use secrecy::{ExposeSecret, SecretString};

use crate::error::ConverseError;

/// Supplies the bearer token for each call. Acquiring and refreshing it happens elsewhere.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> Result<SecretString, ConverseError>;
}

/// A fixed token, typically taken from [`crate::client::Config`].
pub struct StaticCredentials {
    token: SecretString,
}

impl StaticCredentials {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

impl CredentialProvider for StaticCredentials {
    fn access_token(&self) -> Result<SecretString, ConverseError> {
        if self.token.expose_secret().is_empty() {
            return Err(ConverseError::Authentication {
                message: "no access token configured".to_string(),
            });
        }
        Ok(self.token.clone())
    }
}
