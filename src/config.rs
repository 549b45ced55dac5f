use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "growcery_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub classifier: ClassifierConfig,
    pub backend: BackendConfig,
    #[serde(skip)]
    pub config_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingPreference {
    Environment,
    User,
    Any,
}

/// How the mirror flag of a session is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Derive from track metadata.
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub facing: FacingPreference,
    pub mirror: MirrorMode,
    pub metadata_timeout_ms: u64,
    /// Size of the generated pattern when no image file backs the camera.
    pub pattern_width: u32,
    pub pattern_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierShape {
    /// Classification and attribute synthesis in one request.
    Combined,
    /// Classification hop followed by an enrichment hop.
    TwoHop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub shape: ClassifierShape,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_endpoint: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                facing: FacingPreference::Environment,
                mirror: MirrorMode::Auto,
                metadata_timeout_ms: 3000,
                pattern_width: 640,
                pattern_height: 480,
            },
            classifier: ClassifierConfig {
                shape: ClassifierShape::Combined,
                endpoint: "http://localhost:8000/api/image/classify".to_string(),
                enrichment_endpoint: None,
                timeout_secs: 30,
            },
            backend: BackendConfig {
                base_url: "http://localhost:54321".to_string(),
                api_key: String::new(),
            },
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save()?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;
        config.config_file = path.as_ref().to_path_buf();

        config.validate()?;
        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.metadata_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Metadata timeout must be positive"));
        }

        if self.camera.pattern_width == 0 || self.camera.pattern_height == 0 {
            return Err(anyhow::anyhow!(
                "Invalid test pattern dimensions: {}x{}",
                self.camera.pattern_width,
                self.camera.pattern_height
            ));
        }

        if self.classifier.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Classifier endpoint is not set"));
        }

        if self.classifier.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Classifier timeout must be positive"));
        }

        if self.classifier.shape == ClassifierShape::TwoHop
            && self
                .classifier
                .enrichment_endpoint
                .as_deref()
                .map_or(true, |e| e.trim().is_empty())
        {
            return Err(anyhow::anyhow!("Two-hop classification requires an enrichment endpoint"));
        }

        if self.backend.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Backend base URL is not set"));
        }

        Ok(())
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn facing(mut self, facing: FacingPreference) -> Self {
        self.config.camera.facing = facing;
        self
    }

    pub fn mirror(mut self, mode: MirrorMode) -> Self {
        self.config.camera.mirror = mode;
        self
    }

    pub fn metadata_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.camera.metadata_timeout_ms = timeout;
        self
    }

    pub fn classifier_endpoint(mut self, endpoint: &str) -> Self {
        self.config.classifier.endpoint = endpoint.to_string();
        self
    }

    pub fn two_hop(mut self, enrichment_endpoint: &str) -> Self {
        self.config.classifier.shape = ClassifierShape::TwoHop;
        self.config.classifier.enrichment_endpoint = Some(enrichment_endpoint.to_string());
        self
    }

    pub fn backend(mut self, base_url: &str, api_key: &str) -> Self {
        self.config.backend.base_url = base_url.to_string();
        self.config.backend.api_key = api_key.to_string();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Environment-specific presets
impl Config {
    pub fn local_development() -> Self {
        Config {
            camera: CameraConfig {
                facing: FacingPreference::Any,
                mirror: MirrorMode::Always,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }

    pub fn agent_pipeline() -> Self {
        Config {
            classifier: ClassifierConfig {
                shape: ClassifierShape::TwoHop,
                endpoint: "http://localhost:8001/classify".to_string(),
                enrichment_endpoint: Some("http://localhost:8009/orchestrate".to_string()),
                timeout_secs: 60,
            },
            ..Default::default()
        }
    }
}
