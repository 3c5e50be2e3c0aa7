use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    pub page_size: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parse_var("PORT").unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/softdesk.db?mode=rwc".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            token_ttl_hours: parse_var("TOKEN_TTL_HOURS").unwrap_or(24),
            cache_ttl_secs: parse_var("CACHE_TTL_SECS").unwrap_or(300),
            cache_capacity: parse_var("CACHE_CAPACITY").unwrap_or(10_000),
            page_size: parse_var::<i64>("PAGE_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(10),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
