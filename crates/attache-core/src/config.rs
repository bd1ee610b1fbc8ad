//! Storage configuration.
//!
//! Configuration is loaded from a TOML file (path from `ATTACHE_CONFIG`,
//! default `attache.toml`) or, when no file exists, from environment
//! variables. `${VAR}` placeholders in the file are replaced with the
//! environment value before parsing, so secrets stay out of the file.
//!
//! ```toml
//! root = "/srv/app"
//! env = "production"
//! file_permissions = 0o644
//!
//! [s3]
//! bucket = "assets"
//! region = "eu-west-1"
//! access_key_id = "${AWS_ACCESS_KEY_ID}"
//! secret_access_key = "${AWS_SECRET_ACCESS_KEY}"
//! url = "https://assets.s3.amazonaws.com/:class/:attachment/:id_partition/:style/:filename"
//!
//! [fog]
//! endpoint = "https://storage.googleapis.com"
//! directory = "assets-mirror"
//!
//! [[attachments]]
//! record_type = "Image"
//! name = "photo"
//!
//! [attachments.styles.thumb]
//! geometry = "100x100#"
//! format = "jpg"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults;
use crate::geometry::Geometry;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern"));

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        crate::Error::Config(e.to_string())
    }
}

/// S3 backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Public URL template for objects in the bucket.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_region() -> String {
    defaults::S3_REGION.to_string()
}

/// Generic object store configuration (GCS-style XML API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FogConfig {
    /// Base URL of the service, e.g. `https://storage.googleapis.com`.
    pub endpoint: String,
    /// Bucket / directory objects are written into.
    pub directory: String,
    /// Bearer token sent with each request.
    #[serde(default)]
    pub access_token: Option<String>,
}

/// One named rendition of an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleDefinition {
    /// Target geometry, e.g. `100x100#`.
    pub geometry: String,
    /// Output format (file extension); keeps the source format when unset.
    #[serde(default)]
    pub format: Option<String>,
    /// Raw options appended to the conversion command.
    #[serde(default)]
    pub convert_options: Option<String>,
    /// Raw options placed before the source file.
    #[serde(default)]
    pub source_file_options: Option<String>,
    #[serde(default = "default_true")]
    pub auto_orient: bool,
    /// Keep every frame of animated sources.
    #[serde(default)]
    pub save_animation: bool,
}

impl StyleDefinition {
    pub fn new(geometry: impl Into<String>) -> Self {
        Self {
            geometry: geometry.into(),
            format: None,
            convert_options: None,
            source_file_options: None,
            auto_orient: true,
            save_animation: false,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

fn default_true() -> bool {
    true
}

/// Attachment declared on a host record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDefinition {
    pub record_type: String,
    pub name: String,
    /// Styles derived from the original (the original itself is implicit).
    #[serde(default)]
    pub styles: BTreeMap<String, StyleDefinition>,
    #[serde(default = "default_filesystem_path")]
    pub filesystem_path: String,
    #[serde(default = "default_filesystem_url")]
    pub filesystem_url: String,
    /// Remote object key template (leading slashes are stripped on upload).
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    /// Processing happens later in a background step; writes made while the
    /// attachment is still dirty do not reset sync flags.
    #[serde(default)]
    pub delay_processing: bool,
    /// Fail assignments when a style cannot be produced.
    #[serde(default = "default_true")]
    pub whiny: bool,
    /// URL shown while delayed processing is pending.
    #[serde(default)]
    pub processing_url: Option<String>,
}

fn default_filesystem_path() -> String {
    defaults::FILESYSTEM_PATH.to_string()
}

fn default_filesystem_url() -> String {
    defaults::FILESYSTEM_URL.to_string()
}

fn default_remote_path() -> String {
    defaults::REMOTE_PATH.to_string()
}

impl AttachmentDefinition {
    pub fn new(record_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            name: name.into(),
            styles: BTreeMap::new(),
            filesystem_path: default_filesystem_path(),
            filesystem_url: default_filesystem_url(),
            remote_path: default_remote_path(),
            delay_processing: false,
            whiny: true,
            processing_url: None,
        }
    }

    pub fn with_style(mut self, name: impl Into<String>, style: StyleDefinition) -> Self {
        self.styles.insert(name.into(), style);
        self
    }

    /// Every style name including the original, original first.
    pub fn all_styles(&self) -> Vec<&str> {
        let mut names = vec![defaults::ORIGINAL_STYLE];
        names.extend(
            self.styles
                .keys()
                .map(String::as_str)
                .filter(|s| *s != defaults::ORIGINAL_STYLE),
        );
        names
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.record_type.is_empty() || self.name.is_empty() {
            return Err(ConfigError::Validation(
                "attachment record_type and name cannot be empty".to_string(),
            ));
        }
        for (style, def) in &self.styles {
            if Geometry::parse(&def.geometry).is_none() {
                return Err(ConfigError::Validation(format!(
                    "style {}.{}.{} has invalid geometry {:?}",
                    self.record_type, self.name, style, def.geometry
                )));
            }
        }
        Ok(())
    }
}

/// Top-level storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Substituted for `:rails_root` / `:root` in templates.
    #[serde(default = "default_root")]
    pub root: String,
    /// Substituted for `:rails_env` / `:env` in templates.
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_permissions")]
    pub file_permissions: u32,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub fog: Option<FogConfig>,
    #[serde(default)]
    pub attachments: Vec<AttachmentDefinition>,
}

fn default_root() -> String {
    defaults::FILESYSTEM_ROOT.to_string()
}

fn default_env() -> String {
    defaults::ENVIRONMENT.to_string()
}

fn default_permissions() -> u32 {
    defaults::FILE_PERMISSIONS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            env: default_env(),
            file_permissions: default_permissions(),
            s3: None,
            fog: None,
            attachments: Vec::new(),
        }
    }
}

impl StorageConfig {
    /// Config file location: `ATTACHE_CONFIG`, else `./attache.toml`.
    pub fn default_config_path() -> PathBuf {
        env::var("ATTACHE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("attache.toml"))
    }

    /// Load from the default path, falling back to environment variables.
    pub fn load() -> ConfigResult<Self> {
        let path = Self::default_config_path();

        if path.exists() {
            info!("Loading storage config from: {}", path.display());
            Self::from_file(&path)
        } else {
            debug!(
                "Config file not found at {}, using environment variables",
                path.display()
            );
            let config = Self::from_env();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let content = Self::substitute_env_vars(content);
        let config: StorageConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `ATTACHE_ROOT` | value of `:rails_root` |
    /// | `ATTACHE_ENV` | value of `:rails_env` |
    /// | `ATTACHE_FILE_PERMISSIONS` | octal mode, e.g. `644` |
    /// | `S3_BUCKET`, `S3_REGION`, `S3_ENDPOINT`, `S3_URL` | S3 backend |
    /// | `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` | S3 credentials |
    /// | `FOG_ENDPOINT`, `FOG_DIRECTORY`, `FOG_ACCESS_TOKEN` | generic object store |
    ///
    /// Attachment definitions can only come from a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = env::var("ATTACHE_ROOT") {
            config.root = root;
        }
        if let Ok(name) = env::var("ATTACHE_ENV") {
            config.env = name;
        }
        if let Some(mode) = env::var("ATTACHE_FILE_PERMISSIONS")
            .ok()
            .and_then(|v| u32::from_str_radix(v.trim_start_matches("0o"), 8).ok())
        {
            config.file_permissions = mode;
        }

        if let Ok(bucket) = env::var("S3_BUCKET") {
            config.s3 = Some(S3Config {
                bucket,
                region: env::var("S3_REGION").unwrap_or_else(|_| default_region()),
                endpoint: env::var("S3_ENDPOINT").ok(),
                access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
                url: env::var("S3_URL").ok(),
            });
        }

        if let (Ok(endpoint), Ok(directory)) = (env::var("FOG_ENDPOINT"), env::var("FOG_DIRECTORY"))
        {
            config.fog = Some(FogConfig {
                endpoint,
                directory,
                access_token: env::var("FOG_ACCESS_TOKEN").ok(),
            });
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.file_permissions > 0o7777 {
            return Err(ConfigError::Validation(format!(
                "file_permissions {:o} is not a valid mode",
                self.file_permissions
            )));
        }
        if let Some(s3) = &self.s3 {
            if s3.bucket.is_empty() {
                return Err(ConfigError::Validation(
                    "S3 bucket cannot be empty".to_string(),
                ));
            }
        }
        if let Some(fog) = &self.fog {
            if !fog.endpoint.starts_with("http://") && !fog.endpoint.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "fog endpoint must start with http:// or https://, got: {}",
                    fog.endpoint
                )));
            }
            if fog.directory.is_empty() {
                return Err(ConfigError::Validation(
                    "fog directory cannot be empty".to_string(),
                ));
            }
        }
        for attachment in &self.attachments {
            attachment.validate()?;
        }
        Ok(())
    }

    /// Look up the definition for `record_type.name`.
    pub fn attachment(&self, record_type: &str, name: &str) -> Option<&AttachmentDefinition> {
        self.attachments
            .iter()
            .find(|a| a.record_type == record_type && a.name == name)
    }

    /// Remote backends with configuration present.
    pub fn sync_targets(&self) -> Vec<crate::SyncTarget> {
        let mut targets = Vec::new();
        if self.s3.is_some() {
            targets.push(crate::SyncTarget::S3);
        }
        if self.fog.is_some() {
            targets.push(crate::SyncTarget::Fog);
        }
        targets
    }

    /// Substitute `${VAR}` placeholders with environment values.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN.replace_all(content, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncTarget;

    const SAMPLE: &str = r#"
root = "/srv/app"
env = "production"
file_permissions = 0o640

[s3]
bucket = "assets"
url = "https://assets.example.com/:class/:id/:style/:filename"

[[attachments]]
record_type = "Image"
name = "photo"

[attachments.styles.thumb]
geometry = "100x100#"
format = "jpg"

[attachments.styles.medium]
geometry = "640x480>"
"#;

    #[test]
    fn test_from_toml() {
        let config = StorageConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.root, "/srv/app");
        assert_eq!(config.file_permissions, 0o640);
        assert_eq!(config.s3.as_ref().unwrap().region, "us-east-1");
        assert!(config.fog.is_none());
        assert_eq!(config.sync_targets(), vec![SyncTarget::S3]);

        let photo = config.attachment("Image", "photo").unwrap();
        assert_eq!(photo.styles.len(), 2);
        assert_eq!(photo.styles["thumb"].format.as_deref(), Some("jpg"));
        assert!(photo.styles["medium"].auto_orient);
        assert!(photo.whiny);
        assert_eq!(photo.all_styles(), vec!["original", "medium", "thumb"]);
        assert_eq!(photo.filesystem_path, defaults::FILESYSTEM_PATH);
    }

    #[test]
    fn test_invalid_style_geometry_rejected() {
        let content = r#"
[[attachments]]
record_type = "Image"
name = "photo"

[attachments.styles.thumb]
geometry = "huge"
"#;
        let err = StorageConfig::from_toml(content).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_fog_endpoint_validated() {
        let mut config = StorageConfig::default();
        config.fog = Some(FogConfig {
            endpoint: "storage.googleapis.com".into(),
            directory: "bucket".into(),
            access_token: None,
        });
        assert!(config.validate().is_err());

        config.fog.as_mut().unwrap().endpoint = "https://storage.googleapis.com".into();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_targets(), vec![SyncTarget::Fog]);
    }

    #[test]
    fn test_env_var_substitution_missing() {
        let content = "token = \"${NONEXISTENT_ATTACHE_TEST_VAR_12345}\"";
        let result = StorageConfig::substitute_env_vars(content);
        assert_eq!(result, content);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attache.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.env, "production");
    }

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.file_permissions, 0o644);
        assert!(config.sync_targets().is_empty());
        assert!(config.validate().is_ok());
    }
}
