//! Process-wide configuration, loaded once at startup from the environment.
//!
//! Mirrors the teacher's `Config` extraction in `App::new`: a `figment::Figment`
//! merging `Env` over struct defaults, with `dotenvy::dotenv()` loaded first so
//! a local `.env` file behaves the same as real environment variables.

use serde::Deserialize;

fn default_zk_port() -> u16 {
    4370
}

fn default_cleanup_interval_seconds() -> u64 {
    14_400
}

fn default_cleanup_threshold_hours() -> i64 {
    16
}

fn default_log_level() -> String {
    "INFO".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mssql_server: String,
    pub mssql_database: String,
    pub mssql_user: String,
    pub mssql_password: String,

    /// Retained for operational parity with the legacy ODBC tooling; unused
    /// by the `tiberius` store, which speaks TDS directly. Logged at DEBUG
    /// if set, so an operator migrating an old `.env` notices it's inert.
    pub mssql_odbc_driver: Option<String>,

    #[serde(default = "default_zk_port")]
    pub zk_port: u16,

    /// Raw value as read from the environment; validated and defaulted to 0
    /// by [`Config::tz_offset_hours`] rather than at deserialize time, so a
    /// malformed value is reported instead of silently failing extraction.
    #[serde(default)]
    pub attendance_tz_offset: Option<String>,

    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    #[serde(default = "default_cleanup_threshold_hours")]
    pub cleanup_threshold_hours: i64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        use anyhow::Context;
        use figment::Figment;
        use figment::providers::Env;

        dotenvy::dotenv().ok();

        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("failed to load configuration from environment")
    }

    /// Hours added to a raw device timestamp. An unparseable
    /// `ATTENDANCE_TZ_OFFSET` is reported and treated as 0, per §4.1.
    pub fn tz_offset_hours(&self) -> i64 {
        match &self.attendance_tz_offset {
            None => 0,
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|_| {
                tracing::warn!(
                    raw = %raw,
                    "invalid ATTENDANCE_TZ_OFFSET; falling back to 0"
                );
                0
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            mssql_server: "srv".into(),
            mssql_database: "db".into(),
            mssql_user: "u".into(),
            mssql_password: "p".into(),
            mssql_odbc_driver: None,
            zk_port: 4370,
            attendance_tz_offset: None,
            cleanup_interval_seconds: 14_400,
            cleanup_threshold_hours: 16,
            log_level: "INFO".into(),
            log_format: None,
        }
    }

    #[test]
    fn missing_tz_offset_defaults_to_zero() {
        assert_eq!(base_config().tz_offset_hours(), 0);
    }

    #[test]
    fn valid_tz_offset_parses() {
        let mut c = base_config();
        c.attendance_tz_offset = Some("7".into());
        assert_eq!(c.tz_offset_hours(), 7);
    }

    #[test]
    fn invalid_tz_offset_falls_back_to_zero() {
        let mut c = base_config();
        c.attendance_tz_offset = Some("not-a-number".into());
        assert_eq!(c.tz_offset_hours(), 0);
    }
}
