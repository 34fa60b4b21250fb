use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::generate::BrandVoiceProfile;
use crate::images::StorageMode;

const LOCAL_CONFIG_FILE: &str = "repurposer.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// OpenAI-compatible backend settings
    pub openai: OpenAiConfig,

    /// Copy generation settings
    pub generation: GenerationConfig,

    /// Speech-to-text settings
    pub transcription: TranscriptionConfig,

    /// Carousel image settings
    pub images: ImagesConfig,

    /// Request rate limiting
    pub rate_limit: RateLimitConfig,

    /// Application settings
    pub app: AppConfig,

    /// Voice used when a request does not carry one
    pub brand_voice: Option<BrandVoiceProfile>,

    /// Secrets, read from the environment only
    #[serde(skip)]
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub speech_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on one generation call
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Source language passed to the speech backend
    pub language: String,
    pub temperature: f32,
    /// Largest media file accepted, in bytes
    pub max_bytes: u64,
    /// Directory for the scoped media file (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,
}

/// Where generated images end up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Files under `output_dir`
    Fs,
    /// Inline `data:` URLs
    Data,
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageKind::Fs),
            "data" | "inline" => Ok(StorageKind::Data),
            other => anyhow::bail!("Unknown image storage mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Generate slide images right after the copy
    pub auto_generate: bool,
    /// Attach an image prompt to every slide
    pub synthesize_prompts: bool,
    pub storage: StorageKind,
    pub output_dir: PathBuf,
    /// URL prefix under which `output_dir` is served
    pub public_path: String,
    pub size: String,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Count in process memory when no shared store is configured
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Simulated latency of the mock paths
    pub mock_latency_ms: u64,
}

/// Credentials; never written to disk
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub meta_access_token: Option<String>,
    pub youtube_api_key: Option<String>,
    pub upstash_url: Option<String>,
    pub upstash_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &self.openai_api_key.is_some())
            .field("meta_access_token", &self.meta_access_token.is_some())
            .field("youtube_api_key", &self.youtube_api_key.is_some())
            .field("upstash_url", &self.upstash_url.is_some())
            .field("upstash_token", &self.upstash_token.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            text_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            speech_model: "whisper-1".to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2500,
            timeout_secs: 30,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            temperature: 0.0,
            max_bytes: 25 * 1024 * 1024,
            temp_dir: None,
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            auto_generate: false,
            synthesize_prompts: true,
            storage: StorageKind::Fs,
            output_dir: PathBuf::from("public/generated-images"),
            public_path: "/generated-images".to_string(),
            size: "1024x1024".to_string(),
            concurrency: 2,
            timeout_secs: 45,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_secs: 3600,
            in_memory: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mock_latency_ms: 500,
        }
    }
}

impl ImagesConfig {
    /// Resolve the configured storage kind into a concrete mode
    pub fn storage_mode(&self) -> StorageMode {
        match self.storage {
            StorageKind::Fs => StorageMode::Filesystem {
                dir: self.output_dir.clone(),
                public_path: self.public_path.clone(),
            },
            StorageKind::Data => StorageMode::DataUrl,
        }
    }
}

impl Config {
    /// Load configuration from the first file found, then apply the environment.
    ///
    /// An explicit path must exist; the implicit locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit)? {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;
        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file does not exist: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }

        // First try current directory for easy testing
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Ok(Some(local_config));
        }

        Ok(Self::user_config_path().filter(|path| path.exists()))
    }

    /// Per-user configuration file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("repurposer").join("config.yaml"))
    }

    /// Write this configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Write the defaults to the per-user path unless a file is already there
    pub fn init() -> Result<PathBuf> {
        let path = Self::user_config_path().context("Could not determine config directory")?;
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }
        Self::default().save(&path)?;
        Ok(path)
    }

    /// Read credentials and runtime toggles from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Read credentials and runtime toggles through `lookup`; blank values count as unset
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        self.credentials = Credentials {
            openai_api_key: get("OPENAI_API_KEY"),
            meta_access_token: get("META_ACCESS_TOKEN"),
            youtube_api_key: get("YOUTUBE_API_KEY"),
            upstash_url: get("UPSTASH_REDIS_REST_URL"),
            upstash_token: get("UPSTASH_REDIS_REST_TOKEN"),
        };

        if let Some(flag) = get("AUTO_IMAGE_GEN") {
            self.images.auto_generate = flag.trim().eq_ignore_ascii_case("true");
        }

        // Ephemeral deployments have a read-only filesystem apart from /tmp
        if get("VERCEL").is_some() {
            self.images.storage = StorageKind::Data;
            self.transcription.temp_dir = Some(PathBuf::from("/tmp"));
        }

        if let Some(mode) = get("IMAGE_STORAGE") {
            match mode.parse() {
                Ok(kind) => self.images.storage = kind,
                Err(e) => tracing::warn!("Ignoring IMAGE_STORAGE: {}", e),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            anyhow::bail!("rate_limit.max_requests must be at least 1");
        }
        if self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.window_secs must be at least 1");
        }
        if self.images.concurrency == 0 {
            anyhow::bail!("images.concurrency must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!("generation.temperature must be between 0 and 2");
        }
        if self.generation.timeout_secs == 0 {
            anyhow::bail!("generation.timeout_secs must be at least 1");
        }
        if self.transcription.max_bytes == 0 {
            anyhow::bail!("transcription.max_bytes must be at least 1");
        }
        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        let set = |present: bool| if present { "set" } else { "not set (mock mode)" };
        let creds = &self.credentials;

        println!("Current Configuration:");
        println!("  Bind Address: {}", self.server.bind);
        println!("  OpenAI Base URL: {}", self.openai.base_url);
        println!(
            "  Models: text={} image={} speech={}",
            self.openai.text_model, self.openai.image_model, self.openai.speech_model
        );
        println!(
            "  Generation: temperature={} max_tokens={} timeout={}s",
            self.generation.temperature, self.generation.max_tokens, self.generation.timeout_secs
        );
        println!(
            "  Transcription: language={} max_size={}",
            self.transcription.language,
            crate::utils::format_file_size(self.transcription.max_bytes)
        );
        println!(
            "  Images: auto={} storage={:?} concurrency={} timeout={}s",
            self.images.auto_generate,
            self.images.storage,
            self.images.concurrency,
            self.images.timeout_secs
        );
        println!(
            "  Rate Limit: {} per {}s (in-memory fallback: {})",
            self.rate_limit.max_requests, self.rate_limit.window_secs, self.rate_limit.in_memory
        );
        if let Some(voice) = &self.brand_voice {
            println!("  Brand Voice: {}", voice.name);
        }
        println!("  OPENAI_API_KEY: {}", set(creds.openai_api_key.is_some()));
        println!("  META_ACCESS_TOKEN: {}", set(creds.meta_access_token.is_some()));
        println!("  YOUTUBE_API_KEY: {}", set(creds.youtube_api_key.is_some()));
        println!(
            "  Upstash Redis: {}",
            set(creds.upstash_url.is_some() && creds.upstash_token.is_some())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.generation.max_tokens, 2500);
        assert_eq!(config.transcription.max_bytes, 26_214_400);
        assert_eq!(config.rate_limit.max_requests, 30);
        assert_eq!(config.images.concurrency, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "rate_limit:\n  in_memory: true\nimages:\n  storage: data\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.rate_limit.in_memory);
        assert_eq!(config.rate_limit.max_requests, 30);
        assert_eq!(config.images.storage, StorageKind::Data);
        assert_eq!(config.images.size, "1024x1024");
    }

    #[test]
    fn test_credentials_come_from_env() {
        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("YOUTUBE_API_KEY", "   "),
            ("AUTO_IMAGE_GEN", "true"),
        ]));

        assert_eq!(config.credentials.openai_api_key.as_deref(), Some("sk-test"));
        assert!(config.credentials.youtube_api_key.is_none());
        assert!(config.images.auto_generate);

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-test"));
    }

    #[test]
    fn test_ephemeral_deployment_switches_storage() {
        let mut config = Config::default();
        config.apply_env_from(env(&[("VERCEL", "1")]));
        assert_eq!(config.images.storage, StorageKind::Data);
        assert_eq!(config.transcription.temp_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(config.images.storage_mode(), StorageMode::DataUrl);

        let mut config = Config::default();
        config.apply_env_from(env(&[("VERCEL", "1"), ("IMAGE_STORAGE", "fs")]));
        assert_eq!(config.images.storage, StorageKind::Fs);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.images.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.server.bind = "127.0.0.1:8080".into();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/repurposer.yaml"))).is_err());
    }
}
