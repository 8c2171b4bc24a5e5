use std::time::Duration;

use secrecy::SecretString;

use crate::client::consts::{
    ASSISTANT_ACCESS_TOKEN, ASSISTANT_DEADLINE_SECS, ASSISTANT_ENDPOINT, BASE_URL,
    DEFAULT_CAPACITY, DEFAULT_DEADLINE_SECS,
};
use crate::error::ConfigError;

pub struct Config {
    endpoint: String,
    access_token: SecretString,
    deadline: Duration,
    capacity: usize,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = endpoint.to_string();
        self
    }

    pub fn with_access_token(mut self, access_token: &str) -> Self {
        self.config.access_token = SecretString::from(access_token.to_string());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    /// Capacity of the request and response channels of each call.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults, with the endpoint and access token taken from the environment when set.
    pub fn new() -> Self {
        Self {
            endpoint: std::env::var(ASSISTANT_ENDPOINT).unwrap_or_else(|_| BASE_URL.to_string()),
            access_token: std::env::var(ASSISTANT_ACCESS_TOKEN)
                .unwrap_or_default()
                .into(),
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Like [`Config::new`], but loads `.env` first and rejects a malformed deadline.
    ///
    /// *   `ASSISTANT_ENDPOINT`: (Optional) WebSocket URL of the converse endpoint.
    /// *   `ASSISTANT_ACCESS_TOKEN`: OAuth access token sent as a bearer token.
    /// *   `ASSISTANT_DEADLINE_SECS`: (Optional) per-call deadline. Defaults to 185.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::new();
        if let Ok(deadline) = std::env::var(ASSISTANT_DEADLINE_SECS) {
            let secs = deadline.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue(ASSISTANT_DEADLINE_SECS.to_string(), e.to_string())
            })?;
            config.deadline = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::builder()
            .with_endpoint("ws://127.0.0.1:9000/converse")
            .with_access_token("token")
            .with_deadline(Duration::from_secs(5))
            .with_capacity(0)
            .build();

        assert_eq!(config.endpoint(), "ws://127.0.0.1:9000/converse");
        assert_eq!(config.access_token().expose_secret(), "token");
        assert_eq!(config.deadline(), Duration::from_secs(5));
        assert_eq!(config.capacity(), 1);
    }

    #[test]
    fn default_deadline_is_185_seconds() {
        assert_eq!(Config::new().deadline(), Duration::from_secs(185));
    }
}
