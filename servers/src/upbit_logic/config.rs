use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lib_common::core::BackoffConfig;
use lib_common::ingestors::UpbitWssConfig;

/// Config file read when `--config-path` / `CONFIG_PATH` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_upbit.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Every knob of the broadcaster. All fields are optional so that defaults,
/// the JSON config file and CLI/env can be layered.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Upbit trade stream to ZeroMQ broadcaster", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ZMQ_PORT", help = "Port the ZeroMQ PUB socket binds on all interfaces.")]
    pub zmq_port: Option<u16>,

    #[clap(long, env = "TOP_TICKERS", help = "Number of top KRW markets by 24h turnover to subscribe.")]
    pub top_tickers: Option<usize>,

    #[clap(long, env = "MINUTE_INTERVAL", help = "Minutes between ranking refreshes, aligned to the hour.")]
    pub minute_interval: Option<u32>,

    #[clap(long = "app-version", env = "VERSION", help = "Version string announced on startup.")]
    #[serde(rename = "version")]
    pub app_version: Option<String>,

    #[clap(long, env = "MATTERMOST_URL", help = "Incoming webhook URL for notifications.")]
    pub mattermost_url: Option<String>,

    #[clap(long, env = "UPBIT_WS_URL", help = "Upstream Upbit WebSocket URL.")]
    pub upbit_ws_url: Option<String>,

    #[clap(long, env = "UPBIT_REST_URL", help = "Upbit REST API base URL.")]
    pub upbit_rest_url: Option<String>,

    #[clap(long, env = "RECONNECT_BASE_DELAY_MS", help = "First delay in milliseconds between upstream reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between upstream reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "PING_INTERVAL_SECONDS", help = "Seconds between keep-alive pings.")]
    pub ping_interval_seconds: Option<u64>,

    #[clap(long, env = "PING_TIMEOUT_SECONDS", help = "Seconds of silence after a ping before the session is failed.")]
    pub ping_timeout_seconds: Option<u64>,

    #[clap(long, env = "CLOSE_TIMEOUT_SECONDS", help = "Upper bound in seconds for a clean WebSocket close.")]
    pub close_timeout_seconds: Option<u64>,

    #[clap(long, env = "STATUS_PORT", help = "Port of the /health and /status HTTP endpoint.")]
    pub status_port: Option<u16>,
}

impl Config {
    pub fn defaults() -> Config {
        Config {
            log_level: Some("info".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            zmq_port: Some(11555),
            top_tickers: Some(30),
            minute_interval: Some(10),
            app_version: Some("?".to_string()),
            upbit_ws_url: Some("wss://api.upbit.com/websocket/v1".to_string()),
            upbit_rest_url: Some(lib_common::markets::UPBIT_REST_URL.to_string()),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(30000),
            ping_interval_seconds: Some(30),
            ping_timeout_seconds: Some(10),
            close_timeout_seconds: Some(5),
            status_port: Some(11556),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' wherever it has a value
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_level: other.log_level.or(self.log_level),
            log_dir: other.log_dir.or(self.log_dir),
            zmq_port: other.zmq_port.or(self.zmq_port),
            top_tickers: other.top_tickers.or(self.top_tickers),
            minute_interval: other.minute_interval.or(self.minute_interval),
            app_version: other.app_version.or(self.app_version),
            mattermost_url: other.mattermost_url.or(self.mattermost_url),
            upbit_ws_url: other.upbit_ws_url.or(self.upbit_ws_url),
            upbit_rest_url: other.upbit_rest_url.or(self.upbit_rest_url),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            ping_interval_seconds: other.ping_interval_seconds.or(self.ping_interval_seconds),
            ping_timeout_seconds: other.ping_timeout_seconds.or(self.ping_timeout_seconds),
            close_timeout_seconds: other.close_timeout_seconds.or(self.close_timeout_seconds),
            status_port: other.status_port.or(self.status_port),
        }
    }

    /// Reads a JSON config file with camelCase keys.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the config file, then `cli` (which already carries env).
    ///
    /// An explicitly named config file must exist; the default one is optional.
    pub fn layered(cli: Config) -> Result<Config, ConfigError> {
        let file = match &cli.config_path {
            Some(path) => Some(Config::from_file(path)?),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Some(Config::from_file(path)?)
                } else {
                    None
                }
            }
        };

        let mut config = Config::defaults();
        if let Some(file) = file {
            config = config.merge(file);
        }
        Ok(config.merge(cli))
    }

    /// Validates the merged config.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let defaults = Config::defaults();
        let pick = |value: Option<u64>, default: Option<u64>| value.or(default).unwrap_or_default();

        let top_tickers = self.top_tickers.or(defaults.top_tickers).unwrap_or_default();
        if top_tickers == 0 {
            return Err(invalid("topTickers", "must be at least 1"));
        }

        let minute_interval = self.minute_interval.or(defaults.minute_interval).unwrap_or_default();
        if !(1..=60).contains(&minute_interval) {
            return Err(invalid("minuteInterval", format!("{minute_interval} is outside 1..=60")));
        }

        let base = pick(self.reconnect_base_delay_ms, defaults.reconnect_base_delay_ms);
        let max = pick(self.reconnect_max_delay_ms, defaults.reconnect_max_delay_ms);
        if base == 0 {
            return Err(invalid("reconnectBaseDelayMs", "must be positive"));
        }
        if max < base {
            return Err(invalid(
                "reconnectMaxDelayMs",
                format!("{max} is below the base delay {base}"),
            ));
        }

        let ping_interval = pick(self.ping_interval_seconds, defaults.ping_interval_seconds);
        if ping_interval == 0 {
            return Err(invalid("pingIntervalSeconds", "must be positive"));
        }
        let ping_timeout = pick(self.ping_timeout_seconds, defaults.ping_timeout_seconds);
        let close_timeout = pick(self.close_timeout_seconds, defaults.close_timeout_seconds);

        let mattermost_url = self
            .mattermost_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Ok(Settings {
            log_level: self.log_level.or(defaults.log_level).unwrap_or_default(),
            log_dir: self.log_dir.or(defaults.log_dir).unwrap_or_default(),
            zmq_port: self.zmq_port.or(defaults.zmq_port).unwrap_or_default(),
            top_tickers,
            minute_interval,
            version: self.app_version.or(defaults.app_version).unwrap_or_default(),
            mattermost_url,
            upbit_ws_url: self.upbit_ws_url.or(defaults.upbit_ws_url).unwrap_or_default(),
            upbit_rest_url: self.upbit_rest_url.or(defaults.upbit_rest_url).unwrap_or_default(),
            backoff: BackoffConfig::from_millis(base, max),
            ping_interval: Duration::from_secs(ping_interval),
            ping_timeout: Duration::from_secs(ping_timeout),
            close_timeout: Duration::from_secs(close_timeout),
            status_port: self.status_port.or(defaults.status_port).unwrap_or_default(),
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// The validated runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub zmq_port: u16,
    pub top_tickers: usize,
    pub minute_interval: u32,
    pub version: String,
    /// `None` disables notifications.
    pub mattermost_url: Option<String>,
    pub upbit_ws_url: String,
    pub upbit_rest_url: String,
    pub backoff: BackoffConfig,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub close_timeout: Duration,
    /// 0 disables the status endpoint.
    pub status_port: u16,
}

impl Settings {
    pub fn wss_config(&self) -> UpbitWssConfig {
        UpbitWssConfig {
            url: self.upbit_ws_url.clone(),
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            close_timeout: self.close_timeout,
            ..UpbitWssConfig::default()
        }
    }
}

/// Loads `.env` files, parses CLI/env and resolves the layered config.
pub fn load_config() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();
    let dotenv_os = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::from_filename(dotenv_os).ok();

    Config::layered(Config::parse())?.resolve()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["upbit_broadcaster"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    fn config_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_resolve() {
        let settings = Config::defaults().resolve().unwrap();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.zmq_port, 11555);
        assert_eq!(settings.top_tickers, 30);
        assert_eq!(settings.minute_interval, 10);
        assert_eq!(settings.version, "?");
        assert_eq!(settings.backoff, BackoffConfig::default());
        assert_eq!(settings.ping_interval, Duration::from_secs(30));
        assert_eq!(settings.ping_timeout, Duration::from_secs(10));
        assert_eq!(settings.close_timeout, Duration::from_secs(5));
        assert_eq!(settings.mattermost_url, None);
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let file = config_file(r#"{"topTickers": 5, "zmqPort": 12000, "version": "1.2.3"}"#);
        let path = file.path().to_str().unwrap();

        let settings = Config::layered(cli(&["--config-path", path, "--zmq-port", "13000"]))
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(settings.top_tickers, 5);
        assert_eq!(settings.zmq_port, 13000);
        assert_eq!(settings.version, "1.2.3");
        assert_eq!(settings.minute_interval, 10);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let err = Config::layered(cli(&["--config-path", "/nonexistent/server_upbit.conf"])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let file = config_file("{ not json");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_zero_top_and_bad_interval() {
        let zero_top = Config {
            top_tickers: Some(0),
            ..Config::defaults()
        };
        assert!(matches!(
            zero_top.resolve(),
            Err(ConfigError::Invalid { field: "topTickers", .. })
        ));

        for minutes in [0, 61] {
            let bad = Config {
                minute_interval: Some(minutes),
                ..Config::defaults()
            };
            assert!(matches!(
                bad.resolve(),
                Err(ConfigError::Invalid { field: "minuteInterval", .. })
            ));
        }
    }

    #[test]
    fn rejects_inverted_backoff_and_zero_ping() {
        let inverted = Config {
            reconnect_base_delay_ms: Some(5000),
            reconnect_max_delay_ms: Some(1000),
            ..Config::defaults()
        };
        assert!(matches!(
            inverted.resolve(),
            Err(ConfigError::Invalid { field: "reconnectMaxDelayMs", .. })
        ));

        let no_ping = Config {
            ping_interval_seconds: Some(0),
            ..Config::defaults()
        };
        assert!(matches!(
            no_ping.resolve(),
            Err(ConfigError::Invalid { field: "pingIntervalSeconds", .. })
        ));
    }

    #[test]
    fn blank_webhook_disables_notifications() {
        let settings = Config {
            mattermost_url: Some("  ".into()),
            ..Config::defaults()
        }
        .resolve()
        .unwrap();
        assert_eq!(settings.mattermost_url, None);
    }

    #[test]
    fn wss_config_carries_timings() {
        let settings = Config {
            ping_interval_seconds: Some(15),
            upbit_ws_url: Some("ws://127.0.0.1:9000".into()),
            ..Config::defaults()
        }
        .resolve()
        .unwrap();
        let wss = settings.wss_config();
        assert_eq!(wss.url, "ws://127.0.0.1:9000");
        assert_eq!(wss.ping_interval, Duration::from_secs(15));
    }
}
