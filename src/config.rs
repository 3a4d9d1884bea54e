//! Configuration for coursepack.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (COURSEPACK_HOME, COURSEPACK_ACCESS_TOKEN, service URLs)
//! 2. Config file (.coursepack/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .coursepack/config.yaml

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::adapters::retry::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub conversion: Option<ConversionSettings>,
    #[serde(default)]
    pub publish: Option<PublishSettings>,
    #[serde(default)]
    pub services: Option<ServiceEndpoints>,
}

/// Limits and filters applied while converting a package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Maximum length of a topic (grouping label)
    #[serde(default = "default_max_topic_len")]
    pub max_topic_len: usize,

    /// Maximum length of an item's plain-text summary
    #[serde(default = "default_max_summary_len")]
    pub max_summary_len: usize,

    /// Glob patterns of package files that are never attached
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

fn default_max_topic_len() -> usize {
    100
}
fn default_max_summary_len() -> usize {
    30_000
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "__MACOSX/**".to_string(),
        "**/.DS_Store".to_string(),
        "**/Thumbs.db".to_string(),
        "**/desktop.ini".to_string(),
    ]
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            max_topic_len: default_max_topic_len(),
            max_summary_len: default_max_summary_len(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

impl ConversionSettings {
    /// Check if a package path matches any ignore pattern
    pub fn is_ignored(&self, path: &str) -> bool {
        for pattern_str in &self.ignore_patterns {
            if let Ok(pattern) = Pattern::new(pattern_str) {
                if pattern.matches(path) {
                    return true;
                }
            }
        }
        false
    }
}

/// Settings for materializing artifacts in external services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Storage folder all topic folders are created under
    #[serde(default = "default_root_folder")]
    pub root_folder_id: String,

    /// Number of items whose external I/O may run at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Retry policy for every external call
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Convert rich HTML items into hosted documents
    #[serde(default = "default_true")]
    pub create_documents: bool,
}

fn default_root_folder() -> String {
    "root".to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_http_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            root_folder_id: default_root_folder(),
            concurrency: default_concurrency(),
            http_timeout_seconds: default_http_timeout(),
            retry: RetryPolicy::default(),
            create_documents: true,
        }
    }
}

impl PublishSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

/// Base URLs of the external services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(default = "default_storage_url")]
    pub storage_url: String,

    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    #[serde(default = "default_forms_url")]
    pub forms_url: String,

    #[serde(default = "default_script_url")]
    pub script_url: String,

    /// Deployment id of the item-insertion script
    #[serde(default)]
    pub script_id: Option<String>,

    /// Bearer token (acquisition is handled outside this tool)
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

fn default_storage_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_upload_url() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}
fn default_forms_url() -> String {
    "https://forms.googleapis.com/v1".to_string()
}
fn default_script_url() -> String {
    "https://script.googleapis.com/v1".to_string()
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            storage_url: default_storage_url(),
            upload_url: default_upload_url(),
            forms_url: default_forms_url(),
            script_url: default_script_url(),
            script_id: None,
            access_token: None,
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to coursepack home (logs, scratch output)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub conversion: ConversionSettings,
    pub publish: PublishSettings,
    pub services: ServiceEndpoints,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".coursepack").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Overlay environment variables on the endpoint settings
fn apply_env(services: &mut ServiceEndpoints) {
    let overrides: [(&str, &mut String); 4] = [
        ("COURSEPACK_STORAGE_URL", &mut services.storage_url),
        ("COURSEPACK_UPLOAD_URL", &mut services.upload_url),
        ("COURSEPACK_FORMS_URL", &mut services.forms_url),
        ("COURSEPACK_SCRIPT_URL", &mut services.script_url),
    ];
    for (var, slot) in overrides {
        if let Ok(value) = std::env::var(var) {
            *slot = value;
        }
    }
    if let Ok(script_id) = std::env::var("COURSEPACK_SCRIPT_ID") {
        services.script_id = Some(script_id);
    }
    if let Ok(token) = std::env::var("COURSEPACK_ACCESS_TOKEN") {
        services.access_token = Some(token);
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".coursepack");

    let config_file = find_config_file();

    let (home, conversion, publish, mut services) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;
        let config_dir = config_path.parent().unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("COURSEPACK_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.home {
            resolve_path(config_dir, home_path)
        } else {
            default_home.clone()
        };

        (
            home,
            config.conversion.unwrap_or_default(),
            config.publish.unwrap_or_default(),
            config.services.unwrap_or_default(),
        )
    } else {
        let home = std::env::var("COURSEPACK_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        (
            home,
            ConversionSettings::default(),
            PublishSettings::default(),
            ServiceEndpoints::default(),
        )
    };

    apply_env(&mut services);

    Ok(ResolvedConfig {
        home,
        config_file,
        conversion,
        publish,
        services,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
