use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TrackerError};

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token (`TOKEN`).
    pub discord_token: String,
    /// Guild whose online members are counted (`GUILD_ID`).
    pub guild_id: u64,
    /// Spreadsheet document that receives the samples (`SHEET_ID`).
    pub sheet_id: String,
    /// Sheet tab the rows land in (`SHEET_TAB`).
    pub sheet_tab: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_redirect_uri: String,
    /// Where the OAuth token set is persisted (`TOKEN_FILE`).
    pub token_file: PathBuf,
    /// Time between metric collections (`COLLECT_INTERVAL_SECS`).
    pub collect_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let guild_id: u64 = required("GUILD_ID")?
            .parse()
            .map_err(|e: std::num::ParseIntError| TrackerError::InvalidConfig {
                name: "GUILD_ID".to_string(),
                message: e.to_string(),
            })?;
        if guild_id == 0 {
            return Err(TrackerError::InvalidConfig {
                name: "GUILD_ID".to_string(),
                message: "guild id must be non-zero".to_string(),
            });
        }

        Ok(Self {
            discord_token: required("TOKEN")?,
            guild_id,
            sheet_id: required("SHEET_ID")?,
            sheet_tab: std::env::var("SHEET_TAB").unwrap_or_else(|_| "Astro".to_string()),
            oauth_client_id: required("GOOGLE_OAUTH_CLIENT_ID")?,
            oauth_client_secret: required("GOOGLE_OAUTH_CLIENT_SECRET")?,
            oauth_redirect_uri: required("GOOGLE_OAUTH_REDIRECT_URI")?,
            token_file: std::env::var("TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tokens.json")),
            collect_interval: parse_interval(std::env::var("COLLECT_INTERVAL_SECS").ok())?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| TrackerError::MissingEnv {
        name: name.to_string(),
    })
}

/// Collection period from `COLLECT_INTERVAL_SECS`, one hour when unset.
///
/// A present value must parse as a positive number of seconds. Zero is
/// rejected here; the interval timer requires a non-zero period.
fn parse_interval(raw: Option<String>) -> Result<Duration> {
    let secs: u64 = match raw {
        Some(raw) => raw
            .parse()
            .map_err(|e: std::num::ParseIntError| TrackerError::InvalidConfig {
                name: "COLLECT_INTERVAL_SECS".to_string(),
                message: e.to_string(),
            })?,
        None => 3600,
    };
    if secs == 0 {
        return Err(TrackerError::InvalidConfig {
            name: "COLLECT_INTERVAL_SECS".to_string(),
            message: "interval must be non-zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so each test uses its own names via the
    // helper instead of mutating the real ones.
    #[test]
    fn test_required_missing_var() {
        let err = required("PRESENCE_TRACKER_TEST_UNSET_VAR").unwrap_err();
        assert!(matches!(err, TrackerError::MissingEnv { name } if name == "PRESENCE_TRACKER_TEST_UNSET_VAR"));
    }

    #[test]
    fn test_required_present_var() {
        std::env::set_var("PRESENCE_TRACKER_TEST_SET_VAR", "value");
        assert_eq!(
            required("PRESENCE_TRACKER_TEST_SET_VAR").unwrap(),
            "value"
        );
        std::env::remove_var("PRESENCE_TRACKER_TEST_SET_VAR");
    }

    #[test]
    fn test_interval_defaults_when_unset() {
        assert_eq!(parse_interval(None).unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_interval_parses_seconds() {
        assert_eq!(
            parse_interval(Some("900".to_string())).unwrap(),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_interval_rejects_zero() {
        let err = parse_interval(Some("0".to_string())).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::InvalidConfig { name, .. } if name == "COLLECT_INTERVAL_SECS"
        ));
    }

    #[test]
    fn test_interval_rejects_garbage() {
        assert!(parse_interval(Some("hourly".to_string())).is_err());
    }
}
