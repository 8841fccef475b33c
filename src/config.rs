use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub notify_channel_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours: parse_or("SESSION_TTL_HOURS", 24),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10),
            run_migrations: parse_or("RUN_MIGRATIONS", true),
            notify_channel_size: parse_or("NOTIFY_CHANNEL_SIZE", 256),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_values_fall_back_to_default() {
        // Keys are unique to this test so parallel tests don't race on them.
        unsafe {
            env::set_var("DCS_TEST_TTL", "not-a-number");
            env::set_var("DCS_TEST_FLAG", " false ");
        }
        assert_eq!(parse_or("DCS_TEST_TTL", 24i64), 24);
        assert!(!parse_or("DCS_TEST_FLAG", true));
        assert_eq!(parse_or("DCS_TEST_MISSING", 7usize), 7);
    }
}
