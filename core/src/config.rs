use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty disables CORS entirely.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// 32-byte master key, base64-encoded. Wraps every per-org DEK.
    pub master_key: String,
}

impl SecurityConfig {
    /// Decode and validate the master key. The process must refuse to start
    /// when this fails.
    pub fn master_key_bytes(&self) -> Result<[u8; 32], ConfigError> {
        let decoded = BASE64
            .decode(self.master_key.trim())
            .map_err(|e| ConfigError::Message(format!("master_key is not valid base64: {}", e)))?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            ConfigError::Message(format!("master_key must decode to 32 bytes, got {}", v.len()))
        })?;
        Ok(bytes)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider identifier: "nomic", "jina", "openai" or "deterministic".
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    /// Global embedding dimensionality D; all stored vectors carry it.
    pub dimension: usize,
    #[serde(default = "default_embed_batch")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionProviderConfig {
    /// Provider identifier: "groq", "openai" or any OpenAI-compatible host.
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: String,
    pub model_fast: String,
    pub model_quality: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    pub primary: CompletionProviderConfig,
    /// Tried in order when the primary fails before the first token.
    #[serde(default)]
    pub fallbacks: Vec<CompletionProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// When set, per-document-type parameters override the defaults above.
    #[serde(default)]
    pub adaptive: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            adaptive: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Worker pool size; defaults to the number of cores at startup.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Soft deadline per ingestion job, in seconds.
    #[serde(default = "default_soft_deadline")]
    pub soft_deadline_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_depth: default_queue_depth(),
            soft_deadline_secs: default_soft_deadline(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("QUARRY").separator("__"));

        builder.build()?.try_deserialize()
    }
}

fn default_embed_batch() -> usize {
    50
}

fn default_chunk_tokens() -> usize {
    800
}

fn default_overlap_tokens() -> usize {
    150
}

fn default_queue_depth() -> usize {
    64
}

fn default_soft_deadline() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_key_round_trips() {
        let cfg = SecurityConfig {
            master_key: BASE64.encode([7u8; 32]),
        };
        assert_eq!(cfg.master_key_bytes().unwrap(), [7u8; 32]);
    }

    #[test]
    fn short_master_key_is_rejected() {
        let cfg = SecurityConfig {
            master_key: BASE64.encode([7u8; 16]),
        };
        assert!(cfg.master_key_bytes().is_err());
    }

    #[test]
    fn garbage_master_key_is_rejected() {
        let cfg = SecurityConfig {
            master_key: "not base64 at all!!".to_string(),
        };
        assert!(cfg.master_key_bytes().is_err());
    }
}
