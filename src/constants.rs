// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://quillgate.db?mode=rwc";

// Token lifetimes
pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 30;
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 15;
pub const MAX_ACCESS_TOKEN_MINUTES: i64 = 24 * 60;
pub const MAX_REFRESH_TOKEN_DAYS: i64 = 365;
pub const DEFAULT_LEEWAY_SECS: u64 = 30;
pub const DEFAULT_TOKEN_ISSUER: &str = "quillgate";
pub const CLAIMS_VERSION: u8 = 1;

// Refresh token transport
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
pub const REFRESH_COOKIE_PATH: &str = "/auth";

// Google identity
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
pub const DEFAULT_JWKS_CACHE_SECS: u64 = 3600;
/// Floor between JWKS refetches triggered by unknown key ids
pub const JWKS_MIN_REFRESH_SECS: u64 = 60;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 5;

// Credential rules
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;
pub const DEFAULT_MIN_AUTH_MILLIS: u64 = 100;
