use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub handler: HandlerConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("File not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    FullResult,
    LabelFile,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandlerConfig {
    #[serde(default = "default_image_key")]
    pub image_key: String,
    #[serde(default = "default_variant")]
    pub variant: Variant,
    /// Function key the handler is registered under; `None` matches every task.
    #[serde(default)]
    pub func_key: Option<String>,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_run_name")]
    pub run_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,
    /// Age after which outputs in the run directory are pruned; `0` keeps them.
    #[serde(default = "default_output_retention_secs")]
    pub output_retention_secs: u64,
}

fn default_image_key() -> String {
    "image".to_string()
}

fn default_variant() -> Variant {
    Variant::LabelFile
}

fn default_run_name() -> String {
    "predict".to_string()
}

fn default_chunk_size() -> usize {
    1024
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_inference_timeout_secs() -> u64 {
    60
}

fn default_output_retention_secs() -> u64 {
    3600
}

impl HandlerConfig {
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.run_name)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn output_retention(&self) -> Option<Duration> {
        (self.output_retention_secs > 0).then(|| Duration::from_secs(self.output_retention_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(5)
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_num_classes() -> usize {
    80
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LabelsConfig {
    /// Optional `label,red,green,blue` file; the COCO catalog is used without it.
    pub labels_file: Option<PathBuf>,
}

#[derive(Debug)]
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

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "{} is not a supported minimum log level. Use one of `trace`, `debug`, `info`, `warn` or `error`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = load_configuration(&configuration_directory, &environment)?;

    if let Err(e) = config.model.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

/// Layers `base.yaml`, the environment file and `APP_*` variables. The bare
/// `IMAGE_KEY` and `LOG_LEVEL` variables win over everything else.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
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
        .set_override_option("handler.image_key", std::env::var("IMAGE_KEY").ok())?
        .set_override_option("log_level", std::env::var("LOG_LEVEL").ok())?
        .build()?;

    config.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BASE: &str = r#"
log_level: info
server:
  host: 127.0.0.1
  port: 8080
handler:
  work_dir: ./tmp
  output_dir: ./runs/detect
model:
  onnx_file: yolov8n.onnx
  model_dir: ./models
  num_instances: 2
"#;

    #[test]
    fn test_load_configuration_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), BASE).unwrap();

        let config = load_configuration(dir.path(), &Environment::Local).unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:8080");
        assert_eq!(config.handler.variant, Variant::LabelFile);
        assert_eq!(config.handler.run_dir(), PathBuf::from("./runs/detect/predict"));
        assert_eq!(config.handler.chunk_size, 1024);
        assert_eq!(
            config.handler.output_retention(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.model.num_instances, 2);
        assert_eq!(config.model.num_classes, 80);
        assert_eq!(
            config.model.get_path(),
            PathBuf::from("./models/yolov8n.onnx")
        );
        assert!(config.labels.labels_file.is_none());
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.yaml"), BASE).unwrap();
        fs::write(
            dir.path().join("production.yaml"),
            "server:\n  host: 0.0.0.0\nhandler:\n  variant: full_result\n",
        )
        .unwrap();

        let config = load_configuration(dir.path(), &Environment::Production).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.handler.variant, Variant::FullResult);
        assert_eq!(config.handler.work_dir, PathBuf::from("./tmp"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::try_from("WARNING".to_string()), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::try_from("Debug".to_string()), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::try_from("error".to_string()), Ok(LogLevel::Error));
        assert_eq!(LogLevel::Error.as_str(), "error");
        assert!(LogLevel::try_from("verbose".to_string()).is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert!(Environment::try_from("PRODUCTION".to_string()).is_ok());
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
