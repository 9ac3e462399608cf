/// Configuration management
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the real-time chat service
    pub server_url: String,

    /// Local user id (supplied by the login flow)
    pub user_id: String,

    /// Local display name
    pub display_name: String,

    /// Local avatar reference, used as the notification icon
    pub avatar: String,

    /// Base URL of the user search endpoint (defaults to the server URL)
    pub search_url: Option<String>,

    /// Delay before a search query is sent
    pub search_debounce: Duration,

    /// How long a request waits for its acknowledgement
    pub ack_timeout: Duration,

    /// First reconnect delay
    pub reconnect_delay: Duration,

    /// Upper bound for the reconnect backoff
    pub max_reconnect_delay: Duration,

    /// Max reconnect attempts after a drop (0 = retry forever)
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            user_id: String::new(),
            display_name: String::new(),
            avatar: String::new(),
            search_url: None,
            search_debounce: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 0,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Search endpoint base, falling back to the chat server
    pub fn search_base(&self) -> &str {
        self.search_url.as_deref().unwrap_or(&self.server_url)
    }

    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            return Err(SyncError::Config(format!(
                "Usage: {} <server-url> <user-id> [--name <name>] [--avatar <url>] [--search-url <url>] [--ack-timeout-ms <ms>] [--debounce-ms <ms>] [--max-reconnects <n>] [--config <file>]",
                args.first().map(String::as_str).unwrap_or("chatsync")
            )));
        }

        let mut config = Config::default();

        // A config file is applied first so that explicit flags win over it
        if let Some(pos) = args.iter().position(|a| a == "--config") {
            let path = args
                .get(pos + 1)
                .ok_or_else(|| SyncError::Config("--config requires a path argument".to_string()))?;
            config = Config::from_file(Path::new(path))?;
        }

        config.server_url = args[1].clone();
        config.user_id = args[2].clone();

        let mut i = 3;
        while i < args.len() {
            match args[i].as_str() {
                "--name" => {
                    config.display_name = flag_value(args, i, "--name")?.to_string();
                    i += 2;
                }
                "--avatar" => {
                    config.avatar = flag_value(args, i, "--avatar")?.to_string();
                    i += 2;
                }
                "--search-url" => {
                    config.search_url = Some(flag_value(args, i, "--search-url")?.to_string());
                    i += 2;
                }
                "--ack-timeout-ms" => {
                    config.ack_timeout = Duration::from_millis(parse_number(args, i, "--ack-timeout-ms")?);
                    i += 2;
                }
                "--debounce-ms" => {
                    config.search_debounce = Duration::from_millis(parse_number(args, i, "--debounce-ms")?);
                    i += 2;
                }
                "--max-reconnects" => {
                    config.max_reconnect_attempts = parse_number(args, i, "--max-reconnects")?;
                    i += 2;
                }
                "--config" => {
                    i += 2;
                }
                other => {
                    return Err(SyncError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("CHATSYNC_SEARCH_URL") {
            config.search_url = Some(url);
        }
        if let Some(ms) = std::env::var("CHATSYNC_ACK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = std::env::var("CHATSYNC_MAX_RECONNECTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            config.max_reconnect_attempts = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(SyncError::Config("user id must not be empty".to_string()));
        }
        url::Url::parse(&self.server_url)
            .map_err(|e| SyncError::Config(format!("Invalid server URL '{}': {}", self.server_url, e)))?;
        if self.ack_timeout.is_zero() {
            return Err(SyncError::Config("ack timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| SyncError::Config(format!("{} requires an argument", flag)))
}

/// Parse a flag value straight into the target type, so out-of-range values are errors
fn parse_number<N: FromStr>(args: &[String], i: usize, flag: &str) -> Result<N> {
    flag_value(args, i, flag)?
        .parse::<N>()
        .map_err(|_| SyncError::Config(format!("{} must be a valid number", flag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args_positional() {
        let config = Config::from_args(&args(&["chatsync", "http://chat.local:3000", "u-1"])).unwrap();
        assert_eq!(config.server_url, "http://chat.local:3000");
        assert_eq!(config.user_id, "u-1");
        assert_eq!(config.search_base(), "http://chat.local:3000");
        assert_eq!(config.search_debounce, Duration::from_millis(500));
    }

    #[test]
    fn test_from_args_flags() {
        let config = Config::from_args(&args(&[
            "chatsync",
            "http://chat.local:3000",
            "u-1",
            "--name",
            "Ann",
            "--ack-timeout-ms",
            "2500",
            "--search-url",
            "http://api.local",
        ]))
        .unwrap();
        assert_eq!(config.display_name, "Ann");
        assert_eq!(config.ack_timeout, Duration::from_millis(2500));
        assert_eq!(config.search_base(), "http://api.local");
    }

    #[test]
    fn test_from_args_rejects_missing_user() {
        assert!(Config::from_args(&args(&["chatsync", "http://chat.local"])).is_err());
        assert!(Config::from_args(&args(&["chatsync", "http://chat.local", "u", "--debounce-ms"])).is_err());
        assert!(Config::from_args(&args(&["chatsync", "not a url", "u"])).is_err());
    }

    #[test]
    fn test_max_reconnects_out_of_range_is_rejected() {
        let with = |n: &str| Config::from_args(&args(&["chatsync", "http://chat.local:3000", "u-1", "--max-reconnects", n]));
        assert_eq!(with("4294967295").unwrap().max_reconnect_attempts, u32::MAX);
        assert!(with("4294967296").is_err());
        assert!(with("-1").is_err());
    }

    #[test]
    fn test_from_file_with_flag_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chatsync.json");
        std::fs::write(&path, r#"{"display_name":"From File","max_reconnect_attempts":7}"#).unwrap();

        let config = Config::from_args(&args(&[
            "chatsync",
            "http://chat.local:3000",
            "u-2",
            "--config",
            path.to_str().unwrap(),
            "--name",
            "From Flag",
        ]))
        .unwrap();
        assert_eq!(config.display_name, "From Flag");
        assert_eq!(config.max_reconnect_attempts, 7);
        assert_eq!(config.user_id, "u-2");
    }
}
