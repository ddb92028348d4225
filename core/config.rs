use crate::cost::Rates;
use crate::error::{AppError, Result};
use log;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_DIR: &str = ".xtools/xask";
pub const DEFAULT_CONFIG_FILENAME: &str = "xask.toml";
pub const DEFAULT_OUTPUT_FILE: &str = "response.md";
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pricing: Rates,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub use_gitignore: bool,
    #[serde(default = "default_true")]
    pub enable_builtin_ignore: bool,
    /// Request documents looked up in order; the first one found is used.
    #[serde(default = "default_request_files")]
    pub request_files: Vec<PathBuf>,
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
    #[serde(default)]
    pub remote_token_count: bool,
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    /// Replaces the embedded mode-selection system prompt.
    #[serde(default)]
    pub system: Option<String>,
    /// Globs selecting repository rule files injected ahead of the tree.
    #[serde(default = "default_rule_patterns")]
    pub rules: Vec<String>,
    #[serde(default = "default_true")]
    pub split_by_recency: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SummaryConfig {
    #[serde(default = "default_top_files")]
    pub top_files: usize,
    #[serde(default = "default_token_correction")]
    pub token_correction: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub confirm: bool,
    #[serde(default = "default_false")]
    pub write_output: bool,
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_request_files() -> Vec<PathBuf> {
    vec![PathBuf::from("prompt.md"), PathBuf::from("query.md")]
}
fn default_output_file() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_FILE)
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}
fn default_max_tokens() -> u32 {
    32_000
}
fn default_thinking_budget() -> u32 {
    16_000
}
fn default_context_limit() -> usize {
    200_000
}
fn default_rule_patterns() -> Vec<String> {
    vec![
        "CLAUDE.md".to_string(),
        ".cursorrules".to_string(),
        ".xtools/xask/rules/**/*.md".to_string(),
    ]
}
fn default_top_files() -> usize {
    10
}
fn default_token_correction() -> f64 {
    crate::tokens::DEFAULT_CORRECTION
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            use_gitignore: default_true(),
            enable_builtin_ignore: default_true(),
            request_files: default_request_files(),
            output_file: default_output_file(),
        }
    }
}
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            key_env: default_key_env(),
            max_tokens: default_max_tokens(),
            thinking_budget: default_thinking_budget(),
            remote_token_count: false,
            context_limit: default_context_limit(),
        }
    }
}
impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: None,
            rules: default_rule_patterns(),
            split_by_recency: default_true(),
        }
    }
}
impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            top_files: default_top_files(),
            token_correction: default_token_correction(),
        }
    }
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confirm: default_true(),
            write_output: default_false(),
        }
    }
}

impl Config {
    pub fn determine_project_root(cli_project_root: Option<&PathBuf>) -> Result<PathBuf> {
        let path_str_opt = cli_project_root
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| env::var("PROJECT_ROOT").ok().filter(|s| !s.is_empty()));

        let path_to_resolve = match path_str_opt {
            Some(p_str) => PathBuf::from(shellexpand::tilde(&p_str).as_ref()),
            None => env::current_dir().map_err(AppError::Io)?,
        };

        path_to_resolve.canonicalize().map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to canonicalize project root '{}': {}",
                    path_to_resolve.display(),
                    e
                ),
            ))
        })
    }

    pub fn resolve_config_path(
        project_root: &Path,
        cli_config_file: Option<&String>,
        cli_disable_config: bool,
    ) -> Result<Option<PathBuf>> {
        if cli_disable_config {
            log::debug!("Config file loading disabled via CLI flag.");
            return Ok(None);
        }

        let path_to_check = match cli_config_file {
            Some(p_str) => {
                let expanded_path_cow = shellexpand::tilde(p_str);
                let mut path = PathBuf::from(expanded_path_cow.as_ref());
                let looks_like_path = path.is_absolute()
                    || path.components().count() > 1
                    || p_str.contains(['/', '\\']);

                if looks_like_path {
                    if !path.exists() && path.extension().is_none() {
                        path.set_extension("toml");
                    }
                    if !path.exists() {
                        return Err(AppError::Config(format!(
                            "Specified config file not found at path: {}",
                            path.display()
                        )));
                    }
                    log::debug!("Using specified config file path: {}", path.display());
                    Some(path)
                } else {
                    let filename = if path.extension().is_none_or(|e| e != "toml") {
                        format!("{}.toml", path.to_string_lossy())
                    } else {
                        path.to_string_lossy().to_string()
                    };
                    let full_path = project_root.join(DEFAULT_CONFIG_DIR).join(filename);
                    if !full_path.exists() {
                        return Err(AppError::Config(format!(
                            "Specified config file '{}' not found in default directory: {}",
                            path.display(),
                            project_root.join(DEFAULT_CONFIG_DIR).display()
                        )));
                    }
                    log::debug!(
                        "Using specified config filename in default directory: {}",
                        full_path.display()
                    );
                    Some(full_path)
                }
            }
            None => {
                let default_path = project_root
                    .join(DEFAULT_CONFIG_DIR)
                    .join(DEFAULT_CONFIG_FILENAME);
                if default_path.exists() {
                    log::debug!("Using default config file path: {}", default_path.display());
                    Some(default_path)
                } else {
                    log::debug!(
                        "No config file specified and default not found at: {}",
                        default_path.display()
                    );
                    None
                }
            }
        };
        Ok(path_to_check)
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        log::info!("Loading configuration from: {}", config_path.display());
        let toml_content = fs::read_to_string(config_path).map_err(|e| AppError::FileRead {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        let config = toml::from_str::<Config>(&toml_content).map_err(|e| {
            AppError::TomlParse(format!(
                "Error parsing config file '{}': {}. Check TOML syntax and structure.",
                config_path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let correction = self.summary.token_correction;
        if !(crate::tokens::MIN_CORRECTION..=crate::tokens::MAX_CORRECTION).contains(&correction)
        {
            return Err(AppError::Config(format!(
                "summary.token_correction must be between {} and {}, got {}",
                crate::tokens::MIN_CORRECTION,
                crate::tokens::MAX_CORRECTION,
                correction
            )));
        }
        if self.api.thinking_budget >= self.api.max_tokens {
            return Err(AppError::Config(format!(
                "api.thinking_budget ({}) must be lower than api.max_tokens ({})",
                self.api.thinking_budget, self.api.max_tokens
            )));
        }
        if self.general.request_files.is_empty() {
            return Err(AppError::Config(
                "general.request_files must name at least one request document".to_string(),
            ));
        }
        Ok(())
    }

    /// First configured request document that exists under `project_root`.
    pub fn find_request_file(&self, project_root: &Path) -> Option<PathBuf> {
        self.general
            .request_files
            .iter()
            .map(|name| project_root.join(name))
            .find(|path| {
                let found = path.is_file();
                log::trace!("Request document candidate {}: {}", path.display(), found);
                found
            })
    }

    pub fn output_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.general.output_file)
    }

    pub fn system_prompt(&self) -> &str {
        self.prompt
            .system
            .as_deref()
            .unwrap_or_else(|| crate::defaults::get_default_system_prompt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.general.output_file, PathBuf::from("response.md"));
        assert_eq!(config.pricing.output, 15.0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<Config>("[general]\nuse_gitignor = false\n");
        assert!(err.is_err());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            "[api]\nmodel = \"claude-opus-4-1\"\n[pricing]\ninput = 15.0\noutput = 75.0\n",
        )
        .unwrap();
        assert_eq!(config.api.model, "claude-opus-4-1");
        assert_eq!(config.api.key_env, DEFAULT_API_KEY_ENV);
        assert_eq!(config.pricing.input, 15.0);
        assert_eq!(config.pricing.cache_read, 0.30);
    }

    #[test]
    fn validate_rejects_out_of_range_correction() {
        let mut config = Config::default();
        config.summary.token_correction = 0.5;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_thinking_budget_above_max_tokens() {
        let mut config = Config::default();
        config.api.thinking_budget = config.api.max_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn request_file_lookup_uses_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("query.md"), "q").unwrap();
        let config = Config::default();
        assert_eq!(
            config.find_request_file(dir.path()),
            Some(dir.path().join("query.md"))
        );
        fs::write(dir.path().join("prompt.md"), "p").unwrap();
        assert_eq!(
            config.find_request_file(dir.path()),
            Some(dir.path().join("prompt.md"))
        );
    }

    #[test]
    fn config_path_resolution_finds_default_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::resolve_config_path(dir.path(), None, false).unwrap(), None);
        let config_dir = dir.path().join(DEFAULT_CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(DEFAULT_CONFIG_FILENAME), "").unwrap();
        assert_eq!(
            Config::resolve_config_path(dir.path(), None, false).unwrap(),
            Some(config_dir.join(DEFAULT_CONFIG_FILENAME))
        );
        assert_eq!(Config::resolve_config_path(dir.path(), None, true).unwrap(), None);
    }
}
