pub const ASSISTANT_ACCESS_TOKEN: &str = "ASSISTANT_ACCESS_TOKEN";
pub const ASSISTANT_ENDPOINT: &str = "ASSISTANT_ENDPOINT";
pub const ASSISTANT_DEADLINE_SECS: &str = "ASSISTANT_DEADLINE_SECS";

pub const BASE_URL: &str = "wss://embeddedassistant.googleapis.com/v1alpha1/converse";
pub const DEFAULT_DEADLINE_SECS: u64 = 60 * 3 + 5;
pub const DEFAULT_CAPACITY: usize = 64;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
