use std::env;
use std::time::Duration;

use crate::{PartError, PartResult};

/// Configuration for part coordination
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Part size producers should cut objects into (bytes)
    pub part_size_bytes: u64,

    /// Upper bound on concurrent `upload_part` calls for a single key
    pub max_concurrent_part_uploads: usize,

    /// Give up opening a transport after this long
    pub session_open_timeout: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size_bytes: 10 * 1024 * 1024, // 10MB
            max_concurrent_part_uploads: 2,
            session_open_timeout: None,
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set part size
    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size_bytes = bytes;
        self
    }

    /// Set per-key upload concurrency
    pub fn with_max_concurrent_part_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_part_uploads = max;
        self
    }

    /// Bound how long a transport open may take
    pub fn with_session_open_timeout(mut self, timeout: Duration) -> Self {
        self.session_open_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> PartResult<()> {
        if self.part_size_bytes == 0 {
            return Err(PartError::invalid("part_size_bytes must be greater than 0"));
        }
        if self.max_concurrent_part_uploads == 0 {
            return Err(PartError::invalid(
                "max_concurrent_part_uploads must be greater than 0",
            ));
        }
        if self.session_open_timeout == Some(Duration::ZERO) {
            return Err(PartError::invalid("session_open_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, RustFS, ...)
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    pub const ENV_PREFIX: &'static str = "DOG_PARTS_S3_";

    pub fn new<B: Into<String>, R: Into<String>>(bucket: B, region: R) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }

    /// Load from `DOG_PARTS_S3_*` environment variables.
    ///
    /// `BUCKET` and `REGION` are required. Credentials are optional; without
    /// them the default AWS provider chain is used.
    pub fn from_env() -> PartResult<Self> {
        fn required(name: &str) -> PartResult<String> {
            let key = format!("{}{}", S3Config::ENV_PREFIX, name);
            env::var(&key).map_err(|_| PartError::invalid(format!("{} environment variable required", key)))
        }

        fn optional(name: &str) -> Option<String> {
            env::var(format!("{}{}", S3Config::ENV_PREFIX, name))
                .ok()
                .filter(|v| !v.is_empty())
        }

        let force_path_style = match optional("FORCE_PATH_STYLE") {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
            None => false,
        };

        Ok(Self {
            bucket: required("BUCKET")?,
            region: required("REGION")?,
            access_key_id: optional("ACCESS_KEY_ID"),
            secret_access_key: optional("SECRET_ACCESS_KEY"),
            endpoint_url: optional("ENDPOINT_URL"),
            force_path_style,
        })
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(mut self, access_key_id: A, secret_access_key: S) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint_url: S) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_path_style(mut self) -> Self {
        self.force_path_style = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = UploadConfig::default();
        assert_eq!(config.part_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_concurrent_part_uploads, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        assert!(UploadConfig::new().with_part_size(0).validate().is_err());
        assert!(UploadConfig::new().with_max_concurrent_part_uploads(0).validate().is_err());
        assert!(UploadConfig::new()
            .with_session_open_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_s3_builder() {
        let config = S3Config::new("bucket", "us-east-1")
            .with_credentials("id", "secret")
            .with_endpoint("http://localhost:9000")
            .with_path_style();
        assert_eq!(config.access_key_id.as_deref(), Some("id"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);
    }
}
