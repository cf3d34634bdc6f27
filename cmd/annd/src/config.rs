//! Daemon configuration loading.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use logosearch_embed::EmbedConfig;
use logosearch_vecstore::{BuildParams, Metric};

/// Build parameter section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let p = BuildParams::default();
        Self {
            m: p.m,
            ef_construction: p.ef_construction,
            ef_search: p.ef_search,
            seed: p.seed,
        }
    }
}

impl HnswConfig {
    pub fn params(&self) -> BuildParams {
        BuildParams {
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            seed: self.seed,
        }
    }
}

/// Configuration file format (YAML).
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Listen address, e.g. ":8080" or "127.0.0.1:8080".
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory holding the embedding database and index files.
    pub data_dir: PathBuf,

    /// Model version this daemon serves.
    pub model_version: String,

    #[serde(default)]
    pub metric: Metric,

    #[serde(default)]
    pub hnsw: HnswConfig,

    /// Search-effort default applied to queries that leave precision
    /// unset; overrides `hnsw.ef_search` when present.
    #[serde(default)]
    pub precision_default: Option<usize>,

    /// Rebuild the index on this interval; absent means rebuilds happen
    /// only on request.
    #[serde(default)]
    pub rebuild_interval_secs: Option<u64>,

    /// Remote embedding service; absent disables image registrations.
    #[serde(default)]
    pub embedder: Option<EmbedConfig>,
}

fn default_listen() -> String {
    ":8080".to_string()
}

impl Config {
    /// Load a config file, expanding `$VAR` references in the embedder
    /// API key.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut cfg: Config = serde_yaml::from_slice(&data)?;
        if let Some(embedder) = cfg.embedder.as_mut() {
            embedder.api_key = expand_env(&embedder.api_key);
        }
        Ok(cfg)
    }

    /// Effective build parameters.
    pub fn build_params(&self) -> BuildParams {
        let mut params = self.hnsw.params();
        if let Some(p) = self.precision_default {
            params.ef_search = p;
        }
        params
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("embeddings.redb")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}

/// Expand environment variables in a string.
fn expand_env(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }

    if s.starts_with('$') {
        // $VAR or ${VAR}
        let var_name = if s.starts_with("${") && s.ends_with('}') {
            &s[2..s.len() - 1]
        } else {
            &s[1..]
        };
        std::env::var(var_name).unwrap_or_default()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let cfg: Config = serde_yaml::from_str(
            r#"
data_dir: /var/lib/logosearch
model_version: efficientnet-b0
"#,
        )
        .unwrap();
        assert_eq!(cfg.listen, ":8080");
        assert_eq!(cfg.metric, Metric::Euclidean);
        assert_eq!(cfg.hnsw.m, 16);
        assert_eq!(cfg.hnsw.ef_search, 50);
        assert!(cfg.rebuild_interval_secs.is_none());
        assert!(cfg.embedder.is_none());
        assert_eq!(cfg.db_path(), PathBuf::from("/var/lib/logosearch/embeddings.redb"));
    }

    #[test]
    fn test_full_config() {
        let cfg: Config = serde_yaml::from_str(
            r#"
listen: "127.0.0.1:9000"
data_dir: /data
model_version: m2
metric: cosine
hnsw:
  m: 32
  ef_construction: 400
  ef_search: 100
  seed: 7
precision_default: 80
rebuild_interval_secs: 600
embedder:
  base_url: http://embed:9090
  dimension: 1280
"#,
        )
        .unwrap();
        assert_eq!(cfg.metric, Metric::Cosine);
        assert_eq!(cfg.hnsw.params().seed, 7);
        assert_eq!(cfg.build_params().ef_search, 80);
        assert_eq!(cfg.rebuild_interval_secs, Some(600));
        assert_eq!(cfg.embedder.unwrap().dimension, 1280);
    }

    #[test]
    fn test_expand_env() {
        assert_eq!(expand_env("plain"), "plain");
        assert_eq!(expand_env(""), "");
        unsafe { std::env::set_var("ANND_TEST_KEY", "secret") };
        assert_eq!(expand_env("$ANND_TEST_KEY"), "secret");
        assert_eq!(expand_env("${ANND_TEST_KEY}"), "secret");
        assert_eq!(expand_env("$ANND_TEST_MISSING"), "");
    }
}
