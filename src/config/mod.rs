use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub orchestrator: OrchestratorConfig,
    pub segmentation: SegmentationConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe names used by the LLM-backed agents
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub sentiment: String,
    pub examples: String,
    pub subtopic_themes: String,
}

/// Knobs for a single analysis run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Width of the per-topic semaphore.
    pub max_concurrent_topics: usize,
    /// Persist a weekly snapshot at the end of every run.
    pub auto_save_snapshot: bool,
    /// Upper bound on examples extracted per topic.
    pub examples_per_topic: usize,
    /// Conversations sent to the sentiment pipe per topic.
    pub sentiment_sample_size: usize,
}

/// Inputs to the tier-first segmentation cascade.
#[derive(Debug, Clone, Default)]
pub struct SegmentationConfig {
    /// Email domains of the first tier-1 support vendor.
    pub vendor_a_domains: Vec<String>,
    /// Email domains of the second tier-1 support vendor.
    pub vendor_b_domains: Vec<String>,
    /// Admin names that mark a conversation as escalated.
    pub escalation_names: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/snapshots.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            sentiment: env::var("PIPE_SENTIMENT")
                .unwrap_or_else(|_| "topic-sentiment-v1".to_string()),
            examples: env::var("PIPE_EXAMPLES")
                .unwrap_or_else(|_| "example-extraction-v1".to_string()),
            subtopic_themes: env::var("PIPE_SUBTOPIC_THEMES")
                .unwrap_or_else(|_| "subtopic-themes-v1".to_string()),
        };

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            max_concurrent_topics: parse_env("MAX_CONCURRENT_TOPICS", defaults.max_concurrent_topics)
                .max(1),
            auto_save_snapshot: env::var("SNAPSHOT_AUTO_SAVE")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(defaults.auto_save_snapshot),
            examples_per_topic: parse_env("EXAMPLES_PER_TOPIC", defaults.examples_per_topic),
            sentiment_sample_size: parse_env(
                "SENTIMENT_SAMPLE_SIZE",
                defaults.sentiment_sample_size,
            ),
        };

        let segmentation = SegmentationConfig {
            vendor_a_domains: parse_list("VENDOR_A_DOMAINS"),
            vendor_b_domains: parse_list("VENDOR_B_DOMAINS"),
            escalation_names: parse_list("ESCALATION_NAMES"),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            orchestrator,
            segmentation,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            sentiment: "topic-sentiment-v1".to_string(),
            examples: "example-extraction-v1".to_string(),
            subtopic_themes: "subtopic-themes-v1".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_topics: 5,
            auto_save_snapshot: true,
            examples_per_topic: 3,
            sentiment_sample_size: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_topics, 5);
        assert!(config.auto_save_snapshot);
        assert_eq!(config.examples_per_topic, 3);
    }

    #[test]
    fn test_parse_env_falls_back_on_garbage() {
        env::set_var("SUPPORT_INSIGHTS_TEST_NUMBER", "not-a-number");
        assert_eq!(parse_env("SUPPORT_INSIGHTS_TEST_NUMBER", 7u32), 7);
        env::remove_var("SUPPORT_INSIGHTS_TEST_NUMBER");
    }

    #[test]
    fn test_parse_list_trims_and_lowercases() {
        env::set_var("SUPPORT_INSIGHTS_TEST_LIST", " Vendor.com, ,other.IO ");
        assert_eq!(
            parse_list("SUPPORT_INSIGHTS_TEST_LIST"),
            vec!["vendor.com".to_string(), "other.io".to_string()]
        );
        env::remove_var("SUPPORT_INSIGHTS_TEST_LIST");
    }
}
