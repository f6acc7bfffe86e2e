//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default upload directory, relative to the site URL.
pub const DEFAULT_UPLOAD_PATH: &str = "/wp-content/uploads";

/// Site options consulted when building attachment URLs.
///
/// These mirror the `siteurl`, `upload_path` and `upload_url_path` options
/// of the site. Looking them up is the caller's job; the loader only reads
/// the resolved values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteOptions {
    pub siteurl: String,
    #[serde(default)]
    pub upload_path: String,
    #[serde(default)]
    pub upload_url_path: String,
}

impl SiteOptions {
    pub fn new(siteurl: impl Into<String>) -> Self {
        Self {
            siteurl: siteurl.into(),
            ..Default::default()
        }
    }

    pub fn with_upload_path(mut self, path: impl Into<String>) -> Self {
        self.upload_path = path.into();
        self
    }

    pub fn with_upload_url_path(mut self, path: impl Into<String>) -> Self {
        self.upload_url_path = path.into();
        self
    }

    /// Base URL that attachment file names are appended to.
    ///
    /// An explicit `upload_url_path` wins; otherwise the site URL is joined
    /// with `upload_path` (or the default upload directory).
    pub fn upload_base_url(&self) -> String {
        if !self.upload_url_path.is_empty() {
            return self.upload_url_path.clone();
        }
        let dir = if self.upload_path.is_empty() {
            DEFAULT_UPLOAD_PATH
        } else {
            self.upload_path.as_str()
        };
        format!("{}{}", self.siteurl, dir)
    }
}

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Write freshly fetched entities back to the cache in the background.
    pub refill_enabled: bool,
    /// Site options used by the attachment decoder.
    pub site: SiteOptions,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            refill_enabled: true,
            site: SiteOptions::default(),
        }
    }
}

impl LoaderConfig {
    /// Build a configuration from `LOOKASIDE_*` environment variables.
    ///
    /// - `LOOKASIDE_REFILL` (`true`/`false`, default `true`)
    /// - `LOOKASIDE_SITEURL`
    /// - `LOOKASIDE_UPLOAD_PATH`
    /// - `LOOKASIDE_UPLOAD_URL_PATH`
    pub fn from_env() -> Result<Self, ConfigError> {
        let refill_enabled = match std::env::var("LOOKASIDE_REFILL") {
            Ok(raw) => parse_bool("LOOKASIDE_REFILL", &raw)?,
            Err(_) => true,
        };

        let config = Self {
            refill_enabled,
            site: SiteOptions {
                siteurl: std::env::var("LOOKASIDE_SITEURL").unwrap_or_default(),
                upload_path: std::env::var("LOOKASIDE_UPLOAD_PATH").unwrap_or_default(),
                upload_url_path: std::env::var("LOOKASIDE_UPLOAD_URL_PATH").unwrap_or_default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_refill(mut self, enabled: bool) -> Self {
        self.refill_enabled = enabled;
        self
    }

    pub fn with_site(mut self, site: SiteOptions) -> Self {
        self.site = site;
        self
    }

    /// Attachment URLs need somewhere to point: either a site URL or an
    /// explicit upload URL path must be set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.siteurl.is_empty() && self.site.upload_url_path.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "siteurl".to_string(),
            });
        }
        if !self.site.siteurl.is_empty() && self.site.siteurl.ends_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "siteurl".to_string(),
                value: self.site.siteurl.clone(),
                reason: "must not end with '/'".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
