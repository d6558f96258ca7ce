//! Persistent browser configuration model and defaults.

use crate::tree::levels::Category;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BrowserConfig {
    /// Grouping levels from the top of the tree down.
    #[serde(default = "default_levels")]
    pub levels: Vec<Category>,
    #[serde(default)]
    pub layout: LayoutMode,
    #[serde(default)]
    pub show_track_numbers: bool,
    #[serde(default = "default_true")]
    pub show_years: bool,
    /// Queries finishing sooner than this never show a loading indicator.
    #[serde(default = "default_loading_animation_delay_ms")]
    pub loading_animation_delay_ms: u64,
    #[serde(default = "default_animation_tick_ms")]
    pub animation_tick_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How collections appear under the root.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// One top-level node per collection.
    #[default]
    Collections,
    /// First grouping level directly under the root, spanning all collections.
    Merged,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            layout: LayoutMode::Collections,
            show_track_numbers: false,
            show_years: true,
            loading_animation_delay_ms: default_loading_animation_delay_ms(),
            animation_tick_ms: default_animation_tick_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

pub fn default_levels() -> Vec<Category> {
    vec![Category::Artist, Category::Album]
}

fn default_loading_animation_delay_ms() -> u64 {
    150
}

fn default_animation_tick_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Repairs values a hand-edited file may have broken.
pub fn sanitize_config(config: BrowserConfig) -> BrowserConfig {
    let mut levels = Vec::with_capacity(config.levels.len());
    for level in config.levels {
        if !levels.contains(&level) {
            levels.push(level);
        }
    }
    if levels.is_empty() {
        levels = default_levels();
    }

    BrowserConfig {
        levels,
        animation_tick_ms: config.animation_tick_ms.clamp(50, 5_000),
        loading_animation_delay_ms: config.loading_animation_delay_ms.min(10_000),
        log_level: log_level_filter(&config.log_level)
            .map(|_| config.log_level.trim().to_lowercase())
            .unwrap_or_else(default_log_level),
        ..config
    }
}

pub fn log_level_filter(level: &str) -> Option<log::LevelFilter> {
    level.trim().parse::<log::LevelFilter>().ok()
}

#[cfg(test)]
mod tests {
    use super::{log_level_filter, sanitize_config, BrowserConfig, LayoutMode};
    use crate::tree::levels::Category;

    #[test]
    fn test_default_config_has_expected_values() {
        let config = BrowserConfig::default();

        assert_eq!(config.levels, vec![Category::Artist, Category::Album]);
        assert_eq!(config.layout, LayoutMode::Collections);
        assert!(!config.show_track_numbers);
        assert!(config.show_years);
        assert_eq!(config.loading_animation_delay_ms, 150);
        assert_eq!(config.animation_tick_ms, 500);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_config_fills_missing_fields_with_defaults() {
        let parsed: BrowserConfig = toml::from_str(
            r#"
levels = ["genre", "album_artist", "album"]
layout = "merged"
"#,
        )
        .expect("config should parse");

        assert_eq!(
            parsed.levels,
            vec![Category::Genre, Category::AlbumArtist, Category::Album]
        );
        assert_eq!(parsed.layout, LayoutMode::Merged);
        assert!(parsed.show_years);
        assert_eq!(parsed.animation_tick_ms, 500);
    }

    #[test]
    fn test_system_config_template_matches_default_values() {
        let parsed: BrowserConfig = toml::from_str(include_str!("../config/config.system.toml"))
            .expect("system config template should parse");
        assert_eq!(parsed, BrowserConfig::default());
    }

    #[test]
    fn test_sanitize_config_repairs_levels_and_ranges() {
        let config = sanitize_config(BrowserConfig {
            levels: vec![Category::Genre, Category::Genre, Category::Album],
            animation_tick_ms: 1,
            loading_animation_delay_ms: 60_000,
            log_level: "chatty".to_string(),
            ..BrowserConfig::default()
        });
        assert_eq!(config.levels, vec![Category::Genre, Category::Album]);
        assert_eq!(config.animation_tick_ms, 50);
        assert_eq!(config.loading_animation_delay_ms, 10_000);
        assert_eq!(config.log_level, "info");

        let empty = sanitize_config(BrowserConfig {
            levels: Vec::new(),
            ..BrowserConfig::default()
        });
        assert_eq!(empty.levels, vec![Category::Artist, Category::Album]);
    }

    #[test]
    fn test_log_level_filter_parses_names() {
        assert_eq!(log_level_filter("Debug"), Some(log::LevelFilter::Debug));
        assert_eq!(log_level_filter("warn"), Some(log::LevelFilter::Warn));
        assert_eq!(log_level_filter("loud"), None);
    }
}
