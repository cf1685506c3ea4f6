use anyhow::{Context, Result};
use docpool_core::cluster::PlannerConfig;
use docpool_core::index::IndexConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Directory that receives the deduplicated copies.
    pub root: PathBuf,
    /// Default source directory for `ingest`.
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    [".txt", ".md", ".pdf", ".docx", ".pptx", ".xlsx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FingerprintConfig {
    #[serde(default = "default_block_chars")]
    pub block_chars: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            block_chars: default_block_chars(),
        }
    }
}

fn default_block_chars() -> usize {
    docpool_core::fingerprint::DEFAULT_BLOCK_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default)]
    pub stopwords: Vec<String>,
    #[serde(default = "default_keywords_per_label")]
    pub keywords_per_label: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
            stopwords: Vec::new(),
            keywords_per_label: default_keywords_per_label(),
        }
    }
}

fn default_max_features() -> usize {
    docpool_core::index::DEFAULT_MAX_FEATURES
}
fn default_keywords_per_label() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_dir_name_chars")]
    pub max_dir_name_chars: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            similarity_threshold: default_similarity_threshold(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
            max_dir_name_chars: default_max_dir_name_chars(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_seed() -> u64 {
    42
}
fn default_max_iterations() -> usize {
    300
}
fn default_max_dir_name_chars() -> usize {
    docpool_core::naming::DEFAULT_MAX_DIR_NAME_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Where search exports go; defaults to `<workspace>/../exports`.
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            export_dir: None,
        }
    }
}

fn default_top_n() -> usize {
    10
}

impl Config {
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            max_features: self.features.max_features,
            stopwords: self.features.stopwords.clone(),
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            seed: self.clustering.seed,
            max_iterations: self.clustering.max_iterations,
            keywords_per_label: self.features.keywords_per_label,
            max_dir_name_chars: self.clustering.max_dir_name_chars,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.executor.max_attempts,
            base_delay: Duration::from_millis(self.executor.base_delay_ms),
        }
    }

    /// Export root for keyword search results.
    pub fn export_root(&self) -> PathBuf {
        match &self.search.export_dir {
            Some(dir) => dir.clone(),
            None => self
                .workspace
                .root
                .parent()
                .map(|p| p.join("exports"))
                .unwrap_or_else(|| PathBuf::from("exports")),
        }
    }
}

/// Similarity thresholds are cosine scores in `(0.0, 1.0]`.
pub fn validate_threshold(threshold: f32) -> Result<f32> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        anyhow::bail!("similarity threshold must be in (0.0, 1.0], got {threshold}");
    }
    Ok(threshold)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Extensions compare lowercase with a leading dot
    for ext in &mut config.workspace.extensions {
        let trimmed = ext.trim().trim_start_matches('.').to_lowercase();
        *ext = format!(".{trimmed}");
    }
    if config.workspace.extensions.iter().any(|e| e == ".") {
        anyhow::bail!("workspace.extensions must not contain empty entries");
    }

    if config.fingerprint.block_chars == 0 {
        anyhow::bail!("fingerprint.block_chars must be > 0");
    }

    if config.features.max_features == 0 {
        anyhow::bail!("features.max_features must be > 0");
    }
    if config.features.keywords_per_label == 0 {
        anyhow::bail!("features.keywords_per_label must be > 0");
    }

    if config.clustering.k == 0 {
        anyhow::bail!("clustering.k must be > 0");
    }
    validate_threshold(config.clustering.similarity_threshold)
        .context("clustering.similarity_threshold")?;
    if config.clustering.max_iterations == 0 {
        anyhow::bail!("clustering.max_iterations must be > 0");
    }
    if config.clustering.max_dir_name_chars == 0 {
        anyhow::bail!("clustering.max_dir_name_chars must be > 0");
    }

    if config.executor.max_attempts == 0 {
        anyhow::bail!("executor.max_attempts must be >= 1");
    }

    if config.search.top_n == 0 {
        anyhow::bail!("search.top_n must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[db]
path = "./data/docpool.sqlite"

[workspace]
root = "./data/workspace"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.fingerprint.block_chars, 2048);
        assert_eq!(config.features.max_features, 5000);
        assert_eq!(config.clustering.k, 5);
        assert!((config.clustering.similarity_threshold - 0.85).abs() < 1e-6);
        assert_eq!(config.executor.max_attempts, 3);
        assert!(config.workspace.extensions.contains(&".docx".to_string()));
        assert_eq!(config.export_root(), PathBuf::from("./data/exports"));
    }

    #[test]
    fn extensions_are_normalized() {
        let file = write_config(&format!(
            "{MINIMAL}extensions = [\"TXT\", \".Md\"]\n"
        ));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.workspace.extensions, vec![".txt", ".md"]);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let file = write_config(&format!(
            "{MINIMAL}\n[clustering]\nsimilarity_threshold = 1.5\n"
        ));
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn threshold_bounds() {
        assert!(validate_threshold(1.0).is_ok());
        assert!(validate_threshold(0.5).is_ok());
        assert!(validate_threshold(0.0).is_err());
        assert!(validate_threshold(1.5).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
    }

    #[test]
    fn rejects_zero_k() {
        let file = write_config(&format!("{MINIMAL}\n[clustering]\nk = 0\n"));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn config_maps_to_core_settings() {
        let file = write_config(&format!(
            "{MINIMAL}\n[features]\nstopwords = [\"draft\"]\nkeywords_per_label = 2\n\n[executor]\nbase_delay_ms = 50\n"
        ));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.index_config().stopwords, vec!["draft"]);
        assert_eq!(config.planner_config().keywords_per_label, 2);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(50));
    }
}
