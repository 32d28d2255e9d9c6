//! Website settings document: metadata, theme colors and free-form styling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::{PodiumError, Result};

pub const MAX_META_TITLE_CHARS: usize = 70;
pub const MAX_META_DESCRIPTION_CHARS: usize = 160;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Metadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Theme {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: "#1d4ed8".to_string(),
            secondary: "#64748b".to_string(),
            accent: "#f59e0b".to_string(),
            background: "#ffffff".to_string(),
        }
    }
}

/// Settings stored alongside a website's blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WebsiteSettings {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_styling")]
    #[ts(type = "Record<string, unknown>")]
    pub styling: Map<String, Value>,
}

fn default_styling() -> Map<String, Value> {
    let mut styling = Map::new();
    styling.insert("fontFamily".into(), Value::String("Inter".into()));
    styling.insert("headingFontFamily".into(), Value::String("Inter".into()));
    styling.insert("borderRadius".into(), Value::String("md".into()));
    styling.insert("containerWidth".into(), Value::String("lg".into()));
    styling
}

impl Default for WebsiteSettings {
    fn default() -> Self {
        Self {
            metadata: Metadata::default(),
            theme: Theme::default(),
            styling: default_styling(),
        }
    }
}

impl WebsiteSettings {
    /// Settings for a new website of the given event.
    pub fn for_event(name: &str, description: Option<&str>) -> Self {
        Self {
            metadata: Metadata {
                title: name.to_string(),
                description: description.unwrap_or_default().to_string(),
            },
            ..Default::default()
        }
    }

    /// Merge incoming theme / styling documents. Returns whether anything changed.
    pub fn merge_documents(&mut self, theme: Option<&Value>, styling: Option<&Value>) -> Result<bool> {
        let mut current = serde_json::to_value(&*self)?;
        let mut incoming = Map::new();
        if let Some(theme) = theme {
            incoming.insert("theme".into(), theme.clone());
        }
        if let Some(styling) = styling {
            incoming.insert("styling".into(), styling.clone());
        }
        let changed = merge_settings(&mut current, &Value::Object(incoming));
        if changed {
            *self = serde_json::from_value(current)?;
        }
        Ok(changed)
    }

    /// Update the SEO title and description.
    pub fn set_meta(&mut self, title: Option<&str>, description: Option<&str>) -> Result<bool> {
        if let Some(title) = title {
            if title.chars().count() > MAX_META_TITLE_CHARS {
                return Err(PodiumError::Validation(format!(
                    "meta_title may not be greater than {} characters",
                    MAX_META_TITLE_CHARS
                )));
            }
        }
        if let Some(description) = description {
            if description.chars().count() > MAX_META_DESCRIPTION_CHARS {
                return Err(PodiumError::Validation(format!(
                    "meta_description may not be greater than {} characters",
                    MAX_META_DESCRIPTION_CHARS
                )));
            }
        }

        let mut changed = false;
        if let Some(title) = title.filter(|t| *t != self.metadata.title) {
            self.metadata.title = title.to_string();
            changed = true;
        }
        if let Some(description) = description.filter(|d| *d != self.metadata.description) {
            self.metadata.description = description.to_string();
            changed = true;
        }
        Ok(changed)
    }
}

/// Recursively copy values from `incoming` into `current`.
///
/// Only keys already present in `current` are touched; nested objects are
/// merged rather than replaced. Returns whether any value changed.
pub fn merge_settings(current: &mut Value, incoming: &Value) -> bool {
    let (Value::Object(current), Value::Object(incoming)) = (current, incoming) else {
        return false;
    };

    let mut changed = false;
    for (key, value) in incoming {
        let Some(existing) = current.get_mut(key) else {
            continue;
        };
        if existing.is_object() && value.is_object() {
            changed |= merge_settings(existing, value);
        } else if existing != value {
            *existing = value.clone();
            changed = true;
        }
    }
    changed
}
