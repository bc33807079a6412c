use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::fetch::{sources::CODE_PLACEHOLDER, FetcherOptions};
use crate::project::{CANONICAL_FIELDS, DEFAULT_VERSION_FIELD, FALLBACK_VERSION};
use crate::regions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run configuration. Every field has a default, so an empty YAML document
/// is a complete config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Mirrors, tried in order.
    pub base_urls: Vec<String>,
    /// File name patterns; `{code}` is replaced by the region code.
    pub name_variants: Vec<String>,
    pub member_suffix: String,
    pub out_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub max_time_secs: u64,
    /// Pause after each real network download.
    pub pause_between_downloads_ms: u64,
    pub user_agent: String,
    pub bypass_env_proxy: bool,
    pub keep_rejected_bodies: bool,
    pub write_raw_csv: bool,
    pub canonical_fields: Vec<String>,
    pub version_field: String,
    pub fallback_version: String,
    /// Empty means every known region.
    pub regions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_urls: vec![
                "https://www.ngs.noaa.gov/pub/DS_ARCHIVE/ShapeFiles/".into(),
                "https://geodesy.noaa.gov/pub/DS_ARCHIVE/ShapeFiles/".into(),
                "https://nweb.ngs.noaa.gov/pub/DS_ARCHIVE/ShapeFiles/".into(),
            ],
            name_variants: vec!["{code}.ZIP".into(), "{code}.zip".into()],
            member_suffix: ".dbf".into(),
            out_dir: PathBuf::from("ngs_sf_archive_downloads"),
            connect_timeout_secs: 20,
            max_time_secs: 300,
            pause_between_downloads_ms: 500,
            user_agent: FetcherOptions::default().user_agent,
            bypass_env_proxy: true,
            keep_rejected_bodies: true,
            write_raw_csv: true,
            canonical_fields: CANONICAL_FIELDS.iter().map(|f| f.to_string()).collect(),
            version_field: DEFAULT_VERSION_FIELD.into(),
            fallback_version: FALLBACK_VERSION.into(),
            regions: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        // An empty document deserialises as unit, not as an empty map.
        let cfg: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_urls.is_empty() {
            return Err(ConfigError::Invalid("base_urls is empty".into()));
        }
        if let Some(bad) = self.base_urls.iter().find(|u| url::Url::parse(u).is_err()) {
            return Err(ConfigError::Invalid(format!("base url {bad:?} does not parse")));
        }
        if self.name_variants.is_empty() {
            return Err(ConfigError::Invalid("name_variants is empty".into()));
        }
        if let Some(bad) = self
            .name_variants
            .iter()
            .find(|v| !v.contains(CODE_PLACEHOLDER))
        {
            return Err(ConfigError::Invalid(format!(
                "name variant {bad:?} lacks {CODE_PLACEHOLDER}"
            )));
        }
        if self.member_suffix.is_empty() {
            return Err(ConfigError::Invalid("member_suffix is empty".into()));
        }
        if self.canonical_fields.is_empty() {
            return Err(ConfigError::Invalid("canonical_fields is empty".into()));
        }
        if let Some(bad) = self
            .regions
            .iter()
            .find(|c| regions::region_name(c).is_none())
        {
            return Err(ConfigError::Invalid(format!("unknown region {bad:?}")));
        }
        Ok(())
    }

    /// Regions to process, upper-cased, in configured order.
    pub fn selected_regions(&self) -> Vec<String> {
        if self.regions.is_empty() {
            regions::all_codes()
        } else {
            self.regions.iter().map(|c| c.to_ascii_uppercase()).collect()
        }
    }

    pub fn pause_between_downloads(&self) -> Duration {
        Duration::from_millis(self.pause_between_downloads_ms)
    }

    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_time: Duration::from_secs(self.max_time_secs),
            user_agent: self.user_agent.clone(),
            bypass_env_proxy: self.bypass_env_proxy,
            rejected_dir: self
                .keep_rejected_bodies
                .then(|| self.out_dir.join("rejected")),
        }
    }
}
