//! Configuration loading and management.
//! Uses injected `AppPaths` so platform shells control where files live.

use std::fs;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::menu::MenuKind;
use crate::platform::AppPaths;

/// Settings of an [`IndicatorArea`](crate::IndicatorArea).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// How long the owner thread waits for work before polling native events.
    pub poll_interval_ms: u64,
    /// How often a foreign thread blocked in `close()` logs that it is still
    /// waiting. The wait itself has no deadline.
    pub close_warn_interval_ms: u64,
    pub default_tooltip: String,
    /// Prefix of temp files created for transferred icons.
    pub temp_prefix: String,
    pub thread_name: String,
}

impl AreaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn close_warn_interval(&self) -> Duration {
        Duration::from_millis(self.close_warn_interval_ms.max(1))
    }
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            close_warn_interval_ms: 5_000,
            default_tooltip: "Dobbin".to_string(),
            temp_prefix: "dobbin".to_string(),
            thread_name: "DobbinTasks".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSection {
    /// Local path or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Label,
    Action,
    Checkbox,
    Separator,
}

impl From<ItemKind> for MenuKind {
    fn from(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Label => MenuKind::Label,
            ItemKind::Action => MenuKind::Action,
            ItemKind::Checkbox => MenuKind::Checkbox,
            ItemKind::Separator => MenuKind::Separator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItemConfig {
    pub kind: ItemKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub checked: bool,
    /// Program spawned when an action is activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Activating this entry ends the shell.
    #[serde(default)]
    pub quit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub area: AreaConfig,
    pub indicator: IndicatorSection,
    /// Menu entries keyed by name, in file order.
    #[serde(serialize_with = "serialize_items")]
    pub items: Vec<(String, MenuItemConfig)>,
}

fn serialize_items<S>(
    items: &[(String, MenuItemConfig)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(items.len()))?;
    for (key, item) in items {
        map.serialize_entry(key, item)?;
    }
    map.end()
}

impl Config {
    /// Load configuration from the provided paths. Creates a default file if missing.
    pub fn load_with(paths: &dyn AppPaths) -> Result<Self> {
        let config_path = paths.config_path();

        if !config_path.exists() {
            info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let default_config = Self::example();
            default_config.save_with(paths)?;
            return Ok(default_config);
        }

        debug!("Loading config from {:?}", config_path);
        let content = fs::read_to_string(&config_path)?;
        let config = Self::parse(&content)?;

        info!("Loaded {} menu entries", config.items.len());
        Ok(config)
    }

    /// Save configuration to the provided paths.
    pub fn save_with(&self, paths: &dyn AppPaths) -> Result<()> {
        let config_path = paths.config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;

        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Parse TOML text, keeping `[items]` in file order.
    pub fn parse(content: &str) -> Result<Self> {
        let value: toml::Value = content.parse()?;
        let table = value
            .as_table()
            .ok_or_else(|| Error::Config("root must be a table".to_string()))?;

        let area: AreaConfig = match table.get("area") {
            Some(area) => area.clone().try_into()?,
            None => AreaConfig::default(),
        };
        let indicator: IndicatorSection = match table.get("indicator") {
            Some(indicator) => indicator.clone().try_into()?,
            None => IndicatorSection::default(),
        };

        let mut items = Vec::new();
        if let Some(items_value) = table.get("items") {
            let items_table = items_value
                .as_table()
                .ok_or_else(|| Error::Config("[items] must be a table".to_string()))?;
            // With preserve_order feature, this iteration maintains order
            for (key, value) in items_table {
                let item: MenuItemConfig = value.clone().try_into()?;
                items.push((key.clone(), item));
            }
        }

        Ok(Config {
            area,
            indicator,
            items,
        })
    }

    /// Starter configuration written on first run.
    pub fn example() -> Self {
        let item = |kind, text: &str| MenuItemConfig {
            kind,
            text: text.to_string(),
            disabled: false,
            checked: false,
            command: None,
            args: Vec::new(),
            quit: false,
        };

        let items = vec![
            ("status".to_string(), item(ItemKind::Label, "Dobbin is running")),
            (
                "terminal".to_string(),
                MenuItemConfig {
                    command: Some("xterm".to_string()),
                    ..item(ItemKind::Action, "Open terminal")
                },
            ),
            (
                "busy".to_string(),
                item(ItemKind::Checkbox, "Show busy tooltip"),
            ),
            ("sep".to_string(), item(ItemKind::Separator, "")),
            (
                "quit".to_string(),
                MenuItemConfig {
                    quit: true,
                    ..item(ItemKind::Action, "Quit")
                },
            ),
        ];

        Self {
            area: AreaConfig::default(),
            indicator: IndicatorSection {
                icon: None,
                tooltip: Some("Dobbin".to_string()),
            },
            items,
        }
    }
}
