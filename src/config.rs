use serde::Deserialize;
use std::{collections::HashSet, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub device: Device,
    pub model_id: String,
    pub model_dir: PathBuf,
    pub visual_onnx: String,
    pub textual_onnx: String,
    pub tokenizer_file: String,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_prediction_threshold")]
    pub prediction_threshold: f32,
    #[serde(default = "default_image_output")]
    pub image_output: String,
    #[serde(default = "default_text_output")]
    pub text_output: String,
}

fn default_image_size() -> u32 {
    224
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_prediction_threshold() -> f32 {
    0.25
}

fn default_image_output() -> String {
    "image_embeds".into()
}

fn default_text_output() -> String {
    "text_embeds".into()
}

impl ModelConfig {
    pub fn get_visual_path(&self) -> PathBuf {
        self.model_dir.join(&self.visual_onnx)
    }

    pub fn get_textual_path(&self) -> PathBuf {
        self.model_dir.join(&self.textual_onnx)
    }

    pub fn get_tokenizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.tokenizer_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        for path in [
            self.get_visual_path(),
            self.get_textual_path(),
            self.get_tokenizer_path(),
        ] {
            if !path.exists() {
                return Err(format!("Model file not found: {:?}", path));
            }
        }
        if !(0.0..=1.0).contains(&self.prediction_threshold) {
            return Err(format!(
                "prediction_threshold must be within [0, 1], got {}",
                self.prediction_threshold
            ));
        }
        if self.num_instances == 0 {
            return Err("num_instances must be at least 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels: Vec<String>,
    #[serde(default = "default_label")]
    pub default_label: String,
    #[serde(default = "default_safe_labels")]
    pub safe_labels: Vec<String>,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_label() -> String {
    "Unknown".into()
}

fn default_safe_labels() -> Vec<String> {
    [
        "Unknown",
        "people walking",
        "buildings",
        "road",
        "cars on a road",
        "car parking area",
        "cars",
        "office environment",
        "people talking",
        "group of people",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_prompt_template() -> String {
    "a photo of {label}".into()
}

impl LabelsConfig {
    pub fn prompt_for(&self, label: &str) -> String {
        self.prompt_template.replace("{label}", label)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.labels.is_empty() {
            return Err("label catalog is empty".into());
        }
        let mut seen = HashSet::new();
        for label in &self.labels {
            if !seen.insert(label.as_str()) {
                return Err(format!("duplicate label in catalog: {}", label));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl AlertsConfig {
    pub fn get_cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_telegram_timeout_secs() -> u64 {
    10
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            bot_token: None,
            chat_id: None,
            timeout_secs: default_telegram_timeout_secs(),
        }
    }
}

// Keeps the bot token out of the startup log.
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "***"))
            .field("chat_id", &self.chat_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl TelegramConfig {
    /// Returns the token and chat id only when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.bot_token.as_deref(), self.chat_id.as_deref()) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Some((token, chat_id))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub s3: S3Config,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub bucket: Option<String>,
    pub region: Option<String>,
    #[serde(default = "default_s3_prefix")]
    pub prefix: String,
    pub endpoint_url: Option<String>,
}

fn default_s3_prefix() -> String {
    "uploads".into()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            prefix: default_s3_prefix(),
            endpoint_url: None,
        }
    }
}

impl StorageConfig {
    pub fn get_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backend == StorageBackend::S3
            && self.s3.bucket.as_deref().map_or(true, str::is_empty)
        {
            return Err("storage.backend is `s3` but no bucket is configured".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("telegram.bot_token", std::env::var("TELEGRAM_BOT_TOKEN").ok())?
        .set_override_option("telegram.chat_id", std::env::var("TELEGRAM_CHAT_ID").ok())?
        .set_override_option("storage.s3.bucket", std::env::var("S3_BUCKET_NAME").ok())?
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    config
        .validate()
        .map_err(|e| config::ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.labels.validate()?;
        self.storage.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> LabelsConfig {
        LabelsConfig {
            labels: names.iter().map(|s| s.to_string()).collect(),
            default_label: default_label(),
            safe_labels: default_safe_labels(),
            prompt_template: default_prompt_template(),
        }
    }

    #[test]
    fn test_prompt_template() {
        let cfg = labels(&["fire"]);
        assert_eq!(cfg.prompt_for("fire"), "a photo of fire");
    }

    #[test]
    fn test_label_catalog_validation() {
        assert!(labels(&["fire", "violence"]).validate().is_ok());
        assert!(labels(&[]).validate().is_err());
        assert!(labels(&["fire", "fire"]).validate().is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        let level: LogLevel = "INFO".to_string().try_into().unwrap();
        assert_eq!(level.as_str(), "info");
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_telegram_credentials_require_both_values() {
        let mut cfg = TelegramConfig::default();
        assert!(cfg.credentials().is_none());

        cfg.bot_token = Some("token".into());
        assert!(cfg.credentials().is_none());

        cfg.chat_id = Some("".into());
        assert!(cfg.credentials().is_none());

        cfg.chat_id = Some("42".into());
        assert_eq!(cfg.credentials(), Some(("token", "42")));
        assert!(!format!("{:?}", cfg).contains("token\""));
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let mut storage = StorageConfig {
            backend: StorageBackend::S3,
            ..Default::default()
        };
        assert!(storage.validate().is_err());

        storage.s3.bucket = Some("uploads-bucket".into());
        assert!(storage.validate().is_ok());
    }

    #[test]
    fn test_yaml_deserialization_applies_defaults() {
        let yaml = r#"
server:
  host: 0.0.0.0
  port: 5000
log_level: info
model:
  device: cpu
  model_id: ViT-B/32
  model_dir: models
  visual_onnx: visual.onnx
  textual_onnx: textual.onnx
  tokenizer_file: tokenizer.json
labels:
  labels: [fire, violence]
"#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.model.device, Device::Cpu);
        assert_eq!(config.model.image_size, 224);
        assert_eq!(config.labels.default_label, "Unknown");
        assert_eq!(config.alerts.cooldown_secs, 60);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert!(config.telegram.credentials().is_none());
        assert_eq!(config.server.get_address(), "0.0.0.0:5000");
    }
}
