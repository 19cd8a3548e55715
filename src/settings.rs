use crate::{
    consts::{
        CONFIG_ENV_PREFIX, CONFIG_PATH_ENV, DEFAULT_API_URL, DEFAULT_READY_TIMEOUT_SECS,
        DEFAULT_REQUEST_TIMEOUT_SECS,
    },
    style::StyleValue,
};
use anyhow::anyhow;
use config::{Config, File};
use serde::{de::IgnoredAny, Deserialize};
use std::{collections::HashMap, path::Path, time::Duration};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api: ApiSettings,
    pub connections: ConnectionSettings,
    pub render: RenderSettings,
    pub styles: HashMap<String, StyleValue>,

    pub config: IgnoredAny,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub url: Url,
    /// Seconds before the HTTP gateway gives up on a request.
    pub request_timeout: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            url: Url::try_from(DEFAULT_API_URL).expect("valid url"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Drop responses of requests that were superseded by a newer fetch
    /// of the same connection. Disable to get plain last-write-wins.
    pub discard_stale_responses: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            discard_stale_responses: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSettings {
    pub ready_timeout: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT_SECS,
        }
    }
}

impl RenderSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }
}

impl Settings {
    /// Reads the file named by `CUT_VISUALISER__CONFIG` (if any) and
    /// applies `CUT_VISUALISER__*` env overrides on top.
    pub fn new() -> anyhow::Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::build(config_path.as_deref().map(Path::new))
    }

    pub fn build(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(config_path) = config_path {
            builder = builder.add_source(File::from(config_path));
        };
        builder = builder
            .add_source(config::Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"));

        builder
            .build()?
            .try_deserialize()
            .map_err(|err| anyhow!(err))
    }
}
