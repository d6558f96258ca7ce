use std::path::{Path, PathBuf};

use log::{info, warn};
use toml_edit::{value, Array, DocumentMut, Item, Table};

use crate::config::{sanitize_config, BrowserConfig, LayoutMode};
use crate::error::{BrowserError, Result};

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn set_table_scalar_if_changed<T, F>(
    table: &mut Table,
    key: &str,
    previous_value: T,
    next_value: T,
    to_item: F,
) where
    T: PartialEq + Copy,
    F: FnOnce(T) -> Item,
{
    if table.contains_key(key) && previous_value == next_value {
        return;
    }
    set_table_value_preserving_decor(table, key, to_item(next_value));
}

fn layout_name(layout: LayoutMode) -> &'static str {
    match layout {
        LayoutMode::Collections => "collections",
        LayoutMode::Merged => "merged",
    }
}

fn millis_item(millis: u64) -> Item {
    value(i64::try_from(millis).unwrap_or(i64::MAX))
}

fn write_config_to_document(
    document: &mut DocumentMut,
    previous: &BrowserConfig,
    config: &BrowserConfig,
) {
    let root = document.as_table_mut();

    if !root.contains_key("levels") || previous.levels != config.levels {
        let levels: Array = config
            .levels
            .iter()
            .map(|level| level.config_name())
            .collect();
        set_table_value_preserving_decor(root, "levels", value(levels));
    }
    set_table_scalar_if_changed(root, "layout", previous.layout, config.layout, |layout| {
        value(layout_name(layout))
    });
    set_table_scalar_if_changed(
        root,
        "show_track_numbers",
        previous.show_track_numbers,
        config.show_track_numbers,
        value,
    );
    set_table_scalar_if_changed(root, "show_years", previous.show_years, config.show_years, value);
    set_table_scalar_if_changed(
        root,
        "loading_animation_delay_ms",
        previous.loading_animation_delay_ms,
        config.loading_animation_delay_ms,
        millis_item,
    );
    set_table_scalar_if_changed(
        root,
        "animation_tick_ms",
        previous.animation_tick_ms,
        config.animation_tick_ms,
        millis_item,
    );
    if !root.contains_key("log_level") || previous.log_level != config.log_level {
        set_table_value_preserving_decor(root, "log_level", value(config.log_level.clone()));
    }
}

pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &BrowserConfig,
) -> std::result::Result<String, String> {
    let previous = toml::from_str::<BrowserConfig>(existing_text)
        .map_err(|err| format!("failed to parse existing config as BrowserConfig: {}", err))?;
    let mut document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse existing config as TOML document: {}", err))?;
    write_config_to_document(&mut document, &previous, config);
    Ok(document.to_string())
}

pub fn persist_config_file(config: &BrowserConfig, path: &Path) {
    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = if let Some(existing_text) = existing_text {
        match serialize_config_with_preserved_comments(&existing_text, config) {
            Ok(updated_text) => Some(updated_text),
            Err(err) => {
                warn!(
                    "Failed to preserve config comments for {} ({}). Falling back to plain serialization.",
                    path.display(),
                    err
                );
                toml::to_string(config).ok()
            }
        }
    } else {
        toml::to_string(config).ok()
    };

    let Some(config_text) = config_text else {
        log::error!("Failed to serialize config for {}", path.display());
        return;
    };

    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

pub fn system_config_template_text() -> &'static str {
    include_str!("../config/config.system.toml")
}

/// `<config dir>/catalog-browser/config.toml`, when the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|root| root.join("catalog-browser").join("config.toml"))
}

pub fn read_config_file(path: &Path) -> Result<BrowserConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<BrowserConfig>(&content).map_err(|err| {
        BrowserError::ConfigParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    Ok(sanitize_config(config))
}

/// Loads the config, writing the commented template first when none exists.
/// Unreadable or malformed files fall back to defaults.
pub fn load_config_file(path: &Path) -> BrowserConfig {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    err
                );
            }
        }
        if let Err(err) = std::fs::write(path, system_config_template_text()) {
            warn!(
                "Failed to write default config {}: {}",
                path.display(),
                err
            );
        }
    }

    match read_config_file(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to load config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            BrowserConfig::default()
        }
    }
}
