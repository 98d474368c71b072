//! Platform configuration.
//!
//! This module defines what the host tells the script side about itself
//! ([`AppInfo`]) and where the platform finds its scripts and files
//! ([`PlatformConfig`]).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Description of the embedding application, published to script as
/// `_appInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppInfo {
    /// Version of the host integration.
    pub version: String,
    /// Name of the host integration, e.g. `adblockplus-android`.
    pub name: String,
    /// Application the integration runs in, e.g. `firefox`.
    pub application: String,
    pub application_version: String,
    pub locale: String,
    pub development_build: bool,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_application(
        mut self,
        application: impl Into<String>,
        application_version: impl Into<String>,
    ) -> Self {
        self.application = application.into();
        self.application_version = application_version.into();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_development_build(mut self, development_build: bool) -> Self {
        self.development_build = development_build;
        self
    }
}

/// Configuration for a [`crate::runtime::platform::Platform`].
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub app_info: AppInfo,
    /// Directory that relative script file paths resolve against.
    pub base_path: Option<PathBuf>,
    /// Script sources by filename.
    pub js_sources: IndexMap<String, String>,
    /// Scripts evaluated, in order, to bring up the filter engine.
    pub filter_engine_scripts: Vec<String>,
    /// How long to wait for the filter engine scripts to signal readiness.
    pub filter_engine_init_timeout: Option<Duration>,
    /// Scripts evaluated, in order, to bring up the updater.
    pub updater_scripts: Vec<String>,
}

impl PlatformConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_info(mut self, app_info: AppInfo) -> Self {
        self.app_info = app_info;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Register a script source under `filename`.
    pub fn with_js_source(mut self, filename: impl Into<String>, source: impl Into<String>) -> Self {
        self.js_sources.insert(filename.into(), source.into());
        self
    }

    /// Register a script and append it to the filter engine bootstrap list.
    pub fn with_filter_engine_script(
        mut self,
        filename: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        self.js_sources.insert(filename.clone(), source.into());
        self.filter_engine_scripts.push(filename);
        self
    }

    pub fn with_filter_engine_init_timeout(mut self, timeout: Duration) -> Self {
        self.filter_engine_init_timeout = Some(timeout);
        self
    }

    /// Register a script and append it to the updater bootstrap list.
    pub fn with_updater_script(
        mut self,
        filename: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        self.js_sources.insert(filename.clone(), source.into());
        self.updater_scripts.push(filename);
        self
    }
}
