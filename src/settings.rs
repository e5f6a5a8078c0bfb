use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::viewer::{
    DEFAULT_CACHE_SIZE, DEFAULT_DEBOUNCE, DEFAULT_MAX_PIXELS, DEFAULT_SCALE, ViewerConfig,
};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "folio";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Quiet period before a navigation request renders
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_render_scale")]
    pub render_scale: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_timeout_ms: Option<u64>,

    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Pages whose raster would exceed this many pixels fail to render
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_render_scale() -> f32 {
    DEFAULT_SCALE
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            debounce_ms: default_debounce_ms(),
            render_scale: default_render_scale(),
            load_timeout_ms: None,
            render_timeout_ms: None,
            cache_size: default_cache_size(),
            max_pixels: default_max_pixels(),
        }
    }
}

impl Settings {
    /// Controller configuration, with unusable values replaced by defaults
    #[must_use]
    pub fn viewer_config(&self) -> ViewerConfig {
        let scale = if self.render_scale.is_finite() && self.render_scale > 0.0 {
            self.render_scale
        } else {
            warn!(
                "Ignoring invalid render_scale {}, using {DEFAULT_SCALE}",
                self.render_scale
            );
            DEFAULT_SCALE
        };

        ViewerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            scale,
            load_timeout: self
                .load_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            render_timeout: self
                .render_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            cache_size: self.cache_size.max(1),
            max_pixels: self.max_pixels.max(1),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the user's config file into the global settings
pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    load_settings_from(&path);
}

/// Load a specific config file into the global settings
pub fn load_settings_from(path: &Path) {
    let settings = load_settings_file(path);
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings;
    }
}

/// Read `path`, creating it with defaults when missing and rewriting it
/// after a version migration. Unreadable files fall back to defaults.
pub fn load_settings_file(path: &Path) -> Settings {
    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        save_settings_to_file(&settings, path);
        return settings;
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                Settings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            Settings::default()
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Version 0 files predate the debounce setting and may carry 0 from
    // hand edits; treat that as unset.
    if settings.debounce_ms == 0 {
        settings.debounce_ms = default_debounce_ms();
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(SETTINGS_HEADER);
    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("debounce_ms: {}\n", settings.debounce_ms));
    content.push_str(&format!("render_scale: {}\n", settings.render_scale));
    match settings.load_timeout_ms {
        Some(ms) => content.push_str(&format!("load_timeout_ms: {ms}\n")),
        None => content.push_str("# load_timeout_ms: 30000\n"),
    }
    match settings.render_timeout_ms {
        Some(ms) => content.push_str(&format!("render_timeout_ms: {ms}\n")),
        None => content.push_str("# render_timeout_ms: 10000\n"),
    }
    content.push_str(&format!("cache_size: {}\n", settings.cache_size));
    content.push_str(&format!("max_pixels: {}\n", settings.max_pixels));

    content
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# folio viewer settings
# ============================================================================
# debounce_ms:        wait this long after the last page change before rendering
# render_scale:       pixels per PDF point
# load_timeout_ms:    give up opening a document after this long (unset = never)
# render_timeout_ms:  give up rendering a page after this long (unset = never)
# cache_size:         rendered pages kept in memory
# max_pixels:         largest page raster, in pixels, before a render fails

"#;

// Public API for accessing settings

#[must_use]
pub fn current() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

#[must_use]
pub fn viewer_config() -> ViewerConfig {
    current().viewer_config()
}

pub fn set_render_scale(scale: f32) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.render_scale = scale;
    }
}
