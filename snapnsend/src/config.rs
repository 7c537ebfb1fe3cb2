//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `SNAPNSEND_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `SNAPNSEND_` override YAML values
//! 3. **Provider keys** - `PERPLEXITY_API_KEY` and `UNSPLASH_ACCESS_KEY` override `llm.api_key`
//!    and `image_search.access_key` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `SNAPNSEND_EMAIL__TYPE=smtp` sets the `email.type` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use snapnsend::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `api_prefix` - HTTP server binding and route prefix
//! - **Database**: `database.url` - SQLite database holding registered users
//! - **Email**: `email.type` (`smtp` or `file`), `email.from_email` - outgoing mail
//! - **LLM**: `llm.base_url`, `llm.api_key`, `llm.model` - search term extraction
//! - **Image search**: `image_search.access_key` - live image search (synthetic without a key)
//! - **Downloads**: `downloads.root` - where materialized images are written
//! - **Logging**: `log.format`, `log.filter`

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SNAPNSEND_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty or missing YAML file yields a runnable development setup
/// (file-based email, synthetic image search, passthrough term extraction).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Service name reported by the root endpoint and used in outgoing emails
    pub app_name: String,
    /// Deployment environment label (development, production, testing)
    pub environment: String,
    /// Prefix under which the JSON API is mounted
    pub api_prefix: String,
    /// SQLite database holding registered users
    pub database: DatabaseConfig,
    /// Outgoing email configuration
    pub email: EmailConfig,
    /// LLM used to turn prompts into search terms
    pub llm: LlmConfig,
    /// Image search provider
    pub image_search: ImageSearchConfig,
    /// Local storage for materialized images
    pub downloads: DownloadsConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Log output configuration
    pub log: LogConfig,
}

/// SQLite connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite connection URL, e.g. `sqlite://users.db`. The file is created if missing.
    pub url: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Maximum time to wait for a pooled connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://users.db".to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Email configuration for registration confirmations and result delivery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// Note: Cannot use deny_unknown_fields here due to #[serde(flatten)] on transport
pub struct EmailConfig {
    /// Email transport method
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        /// SMTP server hostname
        host: String,
        /// SMTP server port
        port: u16,
        /// SMTP authentication username
        username: String,
        /// SMTP authentication password
        password: String,
        /// Use TLS encryption
        use_tls: bool,
        /// Timeout for the whole SMTP exchange
        #[serde(default = "default_smtp_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
    /// Write emails to files (for development/testing)
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

fn default_smtp_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "noreply@snapnsend.local".to_string(),
            from_name: "The SnapNSend Team".to_string(),
        }
    }
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File {
            path: "./emails".to_string(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint used for search term extraction.
///
/// Without an `api_key` the prompt itself is used as the only search term.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Base URL; `chat/completions` is appended
    pub base_url: Url,
    /// Bearer token for the endpoint
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name sent with each request
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.perplexity.ai").expect("static URL is valid"),
            api_key: None,
            model: "sonar-pro".to_string(),
            temperature: 0.2,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Unsplash-compatible image search configuration.
///
/// Without an `access_key` every image reference is a synthetic placeholder.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSearchConfig {
    /// Base URL; `search/photos` is appended
    pub base_url: Url,
    /// Access key sent as `Authorization: Client-ID <key>`
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    /// Upper bound on `per_page` for a single search call
    pub per_page_cap: u32,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ImageSearchConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.unsplash.com").expect("static URL is valid"),
            access_key: None,
            per_page_cap: 10,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Where and how images are written to disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadsConfig {
    /// Root directory; files go to `<root>/<user_id>/<request_id>/`
    pub root: PathBuf,
    /// Edge length in pixels of generated placeholder images
    pub placeholder_size: u32,
    /// Per-download timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("downloads"),
            placeholder_size: 224,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, multi-line output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Log configuration. `RUST_LOG` takes precedence over `filter` when set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            app_name: "SnapNSend API".to_string(),
            environment: "development".to_string(),
            api_prefix: "/v1".to_string(),
            database: DatabaseConfig::default(),
            email: EmailConfig::default(),
            llm: LlmConfig::default(),
            image_search: ImageSearchConfig::default(),
            downloads: DownloadsConfig::default(),
            cors: CorsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // Blank keys coming from an empty env var mean "not configured"
        config.llm.api_key = config.llm.api_key.filter(|k| !k.trim().is_empty());
        config.image_search.access_key = config.image_search.access_key.filter(|k| !k.trim().is_empty());

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if !self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/') {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: api_prefix must start with '/' and must not end with '/', got '{}'",
                    self.api_prefix
                ),
            });
        }

        if self.database.max_connections == 0 {
            return Err(Error::Internal {
                operation: "Config validation: database.max_connections must be at least 1".to_string(),
            });
        }

        if self.image_search.per_page_cap == 0 || self.image_search.per_page_cap > 30 {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: image_search.per_page_cap must be between 1 and 30, got {}",
                    self.image_search.per_page_cap
                ),
            });
        }

        if self.downloads.placeholder_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: downloads.placeholder_size must be at least 1".to_string(),
            });
        }

        for (name, timeout) in [
            ("llm.request_timeout", self.llm.request_timeout),
            ("image_search.request_timeout", self.image_search.request_timeout),
            ("downloads.request_timeout", self.downloads.request_timeout),
            ("database.acquire_timeout", self.database.acquire_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Internal {
                    operation: format!("Config validation: {name} must be greater than zero"),
                });
            }
        }

        // tower-http refuses to combine credentials with a wildcard origin
        if self.cors.allow_credentials && self.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
            return Err(Error::Internal {
                operation: "Config validation: cors.allow_credentials cannot be used with a wildcard origin".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("SNAPNSEND_").split("__"))
            // Provider keys under the names the providers document
            .merge(Env::raw().only(&["PERPLEXITY_API_KEY"]).map(|_| "llm.api_key".into()))
            .merge(Env::raw().only(&["UNSPLASH_ACCESS_KEY"]).map(|_| "image_search.access_key".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
