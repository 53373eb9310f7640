//! Configuration management for the research job orchestrator (SPEC_FULL.md §6).
//!
//! Centralizes the defaults named throughout the module specs (queue
//! concurrency, lease/heartbeat/sweep timing, iteration caps, agent
//! selection) and overlays environment variables on top of them.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::agents::LiteratureSource;
use crate::executor::ExecutorConfig;
use crate::worker::{QueueWorkerConfig, WorkerPoolConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Top-level configuration assembled from defaults, then overridden by
/// environment variables via [`OrchestratorConfig::from_env`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub iterations: IterationConfig,
    pub workers: WorkerPoolConfig,
    pub agents: AgentSelectionConfig,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            iterations: IterationConfig::default(),
            workers: WorkerPoolConfig::default(),
            agents: AgentSelectionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Iteration-cap and executor timing defaults (§6).
#[derive(Debug, Clone, Copy)]
pub struct IterationConfig {
    pub semi_autonomous_cap: u32,
    pub literature_timeout: Duration,
    pub analysis_timeout: Duration,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            semi_autonomous_cap: 5,
            literature_timeout: Duration::from_secs(30 * 60),
            analysis_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl IterationConfig {
    pub fn to_executor_config(self, poll_interval: Duration) -> ExecutorConfig {
        ExecutorConfig {
            semi_autonomous_cap: self.semi_autonomous_cap,
            literature_timeout: self.literature_timeout,
            analysis_timeout: self.analysis_timeout,
            poll_interval,
        }
    }
}

/// Which remote agents to wire in for literature and analysis (§4.5, §6).
#[derive(Debug, Clone)]
pub struct AgentSelectionConfig {
    pub primary_literature: LiteratureSource,
    pub primary_analysis: String,
    pub openscholar_api_url: Option<String>,
    pub knowledge_docs_path: Option<String>,
}

impl Default for AgentSelectionConfig {
    fn default() -> Self {
        Self {
            primary_literature: LiteratureSource::Edison,
            primary_analysis: "bio".to_string(),
            openscholar_api_url: None,
            knowledge_docs_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl OrchestratorConfig {
    /// Load defaults, then overlay recognized environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = env::var("MAX_AUTO_ITERATIONS") {
            config.iterations.semi_autonomous_cap = parse_env("MAX_AUTO_ITERATIONS", &v)?;
        }

        if let Ok(v) = env::var("DEEP_RESEARCH_QUEUE_CONCURRENCY") {
            config.workers.deep_research.concurrency = parse_env("DEEP_RESEARCH_QUEUE_CONCURRENCY", &v)?;
        }
        if let Ok(v) = env::var("CHAT_QUEUE_CONCURRENCY") {
            config.workers.chat.concurrency = parse_env("CHAT_QUEUE_CONCURRENCY", &v)?;
        }
        if let Ok(v) = env::var("FILE_PROCESS_CONCURRENCY") {
            config.workers.file_ingest.concurrency = parse_env("FILE_PROCESS_CONCURRENCY", &v)?;
        }
        if let Ok(v) = env::var("PAPER_GENERATION_CONCURRENCY") {
            config.workers.paper.concurrency = parse_env("PAPER_GENERATION_CONCURRENCY", &v)?;
        }

        apply_queue_timing_overrides(&mut config.workers.deep_research, "DEEP_RESEARCH")?;
        apply_queue_timing_overrides(&mut config.workers.chat, "CHAT")?;
        apply_queue_timing_overrides(&mut config.workers.file_ingest, "FILE_INGEST")?;
        apply_queue_timing_overrides(&mut config.workers.paper, "PAPER")?;

        if let Ok(v) = env::var("PRIMARY_LITERATURE_AGENT") {
            config.agents.primary_literature = parse_literature_source(&v)?;
        }
        if let Ok(v) = env::var("PRIMARY_ANALYSIS_AGENT") {
            config.agents.primary_analysis = v;
        }
        if let Ok(v) = env::var("OPENSCHOLAR_API_URL") {
            config.agents.openscholar_api_url = Some(v);
        }
        if let Ok(v) = env::var("KNOWLEDGE_DOCS_PATH") {
            config.agents.knowledge_docs_path = Some(v);
        }

        if let Ok(v) = env::var("LOG_LEVEL") {
            config.logging.level = v;
        }

        Ok(config)
    }
}

fn apply_queue_timing_overrides(cfg: &mut QueueWorkerConfig, prefix: &str) -> Result<(), ConfigError> {
    if let Ok(v) = env::var(format!("{prefix}_LEASE_SECONDS")) {
        cfg.lease_duration = Duration::from_secs(parse_env(&format!("{prefix}_LEASE_SECONDS"), &v)?);
    }
    if let Ok(v) = env::var(format!("{prefix}_HEARTBEAT_SECONDS")) {
        cfg.heartbeat_interval = Duration::from_secs(parse_env(&format!("{prefix}_HEARTBEAT_SECONDS"), &v)?);
    }
    if let Ok(v) = env::var(format!("{prefix}_STALLED_SWEEP_SECONDS")) {
        cfg.stalled_sweep_interval = Duration::from_secs(parse_env(&format!("{prefix}_STALLED_SWEEP_SECONDS"), &v)?);
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("could not parse '{value}'"),
    })
}

fn parse_literature_source(value: &str) -> Result<LiteratureSource, ConfigError> {
    match value {
        "edison" => Ok(LiteratureSource::Edison),
        "biolitdeep" => Ok(LiteratureSource::BioLitDeep),
        "biolit" => Ok(LiteratureSource::BioLit),
        "openscholar" => Ok(LiteratureSource::OpenScholar),
        "knowledge" => Ok(LiteratureSource::Knowledge),
        other => Err(ConfigError::InvalidValue {
            key: "PRIMARY_LITERATURE_AGENT".to_string(),
            reason: format!("unknown literature source '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_match_spec() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.iterations.semi_autonomous_cap, 5);
        assert_eq!(config.workers.deep_research.concurrency, 3);
        assert_eq!(config.workers.chat.concurrency, 5);
        assert_eq!(config.workers.file_ingest.concurrency, 5);
        assert_eq!(config.workers.paper.concurrency, 1);
    }

    #[test]
    #[serial]
    fn from_env_overrides_concurrency_and_cap() {
        env::set_var("MAX_AUTO_ITERATIONS", "8");
        env::set_var("DEEP_RESEARCH_QUEUE_CONCURRENCY", "7");
        env::set_var("PRIMARY_LITERATURE_AGENT", "openscholar");

        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.iterations.semi_autonomous_cap, 8);
        assert_eq!(config.workers.deep_research.concurrency, 7);
        assert!(matches!(config.agents.primary_literature, LiteratureSource::OpenScholar));

        env::remove_var("MAX_AUTO_ITERATIONS");
        env::remove_var("DEEP_RESEARCH_QUEUE_CONCURRENCY");
        env::remove_var("PRIMARY_LITERATURE_AGENT");
    }

    #[test]
    #[serial]
    fn from_env_rejects_unparseable_value() {
        env::set_var("MAX_AUTO_ITERATIONS", "not-a-number");
        let result = OrchestratorConfig::from_env();
        env::remove_var("MAX_AUTO_ITERATIONS");
        assert!(result.is_err());
    }
}
