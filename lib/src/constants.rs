use std::time::Duration;

pub const DEFAULT_CONTEXT_LABEL: &str = "anonset-identity-v1";
pub const DEFAULT_ISSUER: &str = "anonset";
pub const DEFAULT_CLIENT_ID: &str = "anonset";

pub const DEFAULT_DATA_DIR: &str = "./data/group";
pub const DEFAULT_GROUP_ID: u64 = 1;
pub const DEFAULT_TREE_DEPTH: u8 = 20;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Shortest app secret accepted in production.
pub const MIN_APP_SECRET_LENGTH: usize = 32;

pub const AUDIT_LOG_FILE: &str = "identity-audit.jsonl";
