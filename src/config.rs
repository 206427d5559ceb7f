use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub media_root: PathBuf,
    pub media_url: String,
    pub cors_allow_origin: Option<String>,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: optional("DATABASE_URL"),
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:8000")?,
            db_max_connections: try_load("DB_MAX_CONNECTIONS", "5")?,
            media_root: try_load("MEDIA_ROOT", "media")?,
            media_url: try_load("MEDIA_URL", "/media/")?,
            cors_allow_origin: optional("CORS_ALLOW_ORIGIN"),
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", "26214400")?,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|err| anyhow::anyhow!("invalid {key} value `{raw}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let port: u32 = try_load("GUIDANCE_TEST_UNSET_VALUE", "8000").unwrap();
        assert_eq!(port, 8000);
    }

    #[test]
    fn unparsable_values_name_the_variable() {
        let err = try_load::<u32>("GUIDANCE_TEST_UNSET_VALUE", "many").unwrap_err();
        assert!(err.to_string().contains("GUIDANCE_TEST_UNSET_VALUE"));
    }
}
