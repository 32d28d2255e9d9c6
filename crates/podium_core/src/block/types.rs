//! Block types and their typed prop schemas.
//!
//! The props bag ([`Props`]) is what gets stored and transported. The typed
//! view ([`BlockContent`]) is derived from it for validation and defaults;
//! keys a schema does not know about are ignored by the typed view and kept
//! untouched in the bag.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use super::props::Props;
use crate::error::{PodiumError, Result};

/// Tag selecting a block's prop schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockType {
    Hero,
    Description,
    Countdown,
    Stats,
    AttendeesForm,
    ExhibitorShowcase,
    Canvas,
    /// A type this build does not know. Kept verbatim.
    Other(String),
}

impl BlockType {
    /// Every type the builder offers, in palette order.
    pub const KNOWN: [BlockType; 7] = [
        BlockType::Hero,
        BlockType::Description,
        BlockType::Countdown,
        BlockType::Stats,
        BlockType::AttendeesForm,
        BlockType::ExhibitorShowcase,
        BlockType::Canvas,
    ];

    pub fn parse(name: &str) -> Self {
        match name {
            "Hero" => BlockType::Hero,
            "Description" => BlockType::Description,
            "Countdown" => BlockType::Countdown,
            "Stats" => BlockType::Stats,
            "AttendeesForm" => BlockType::AttendeesForm,
            "ExhibitorShowcase" => BlockType::ExhibitorShowcase,
            "Canvas" => BlockType::Canvas,
            other => BlockType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BlockType::Hero => "Hero",
            BlockType::Description => "Description",
            BlockType::Countdown => "Countdown",
            BlockType::Stats => "Stats",
            BlockType::AttendeesForm => "AttendeesForm",
            BlockType::ExhibitorShowcase => "ExhibitorShowcase",
            BlockType::Canvas => "Canvas",
            BlockType::Other(name) => name,
        }
    }

    /// Whether the tag is blank (a descriptor with no type).
    pub fn is_missing(&self) -> bool {
        matches!(self, BlockType::Other(name) if name.trim().is_empty())
    }

    /// Default props for a freshly added block of this type.
    pub fn default_props(&self) -> Props {
        let content = match self {
            BlockType::Hero => BlockContent::Hero(HeroProps {
                alt_text: Some("Hero image description".into()),
                heading_text: Some("Headline Goes Here".into()),
                description_text: Some("Enter a catchy description...".into()),
                text_position: Some("middle".into()),
                heading_text_color: Some("#000000".into()),
                description_text_color: Some("#000000".into()),
                background_color: Some("#ffffff".into()),
                overlay_enabled: Some(false),
                overlay_color: Some("#000000".into()),
                device: Some(DeviceType::Desktop),
                ..Default::default()
            }),
            BlockType::Description => BlockContent::Description(DescriptionProps {
                title: Some("About Section".into()),
                description: Some(
                    "Provide details about your event or topic here. You can elaborate on the \
                     purpose, schedule, speakers, or any relevant information."
                        .into(),
                ),
                device: Some(DeviceType::Desktop),
                ..Default::default()
            }),
            BlockType::Countdown => BlockContent::Countdown(CountdownProps {
                title: Some("Event Starts In".into()),
                device: Some(DeviceType::Desktop),
                ..Default::default()
            }),
            BlockType::Stats => BlockContent::Stats(StatsProps {
                stats: Some(
                    (1..=4)
                        .map(|n| Stat {
                            title: format!("Statistic {}", n),
                            value: "00".into(),
                        })
                        .collect(),
                ),
                background_color: Some("#000000".into()),
                text_color: Some("#FFFFFF".into()),
                device: Some(DeviceType::Desktop),
            }),
            BlockType::AttendeesForm => BlockContent::AttendeesForm(AttendeesFormProps {
                title: Some("Register for the Event".into()),
                fields: Some(vec![
                    FormField::required("first_name", "First Name", "text"),
                    FormField::required("last_name", "Last Name", "text"),
                    FormField::required("email", "Email", "email"),
                ]),
                device: Some(DeviceType::Desktop),
                ..Default::default()
            }),
            BlockType::ExhibitorShowcase => BlockContent::ExhibitorShowcase(ExhibitorShowcaseProps {
                title: Some("Meet Our Exhibitors".into()),
                device: Some(DeviceType::Desktop),
                ..Default::default()
            }),
            BlockType::Canvas => BlockContent::Canvas(CanvasProps {
                device: Some(DeviceType::Desktop),
                ..Default::default()
            }),
            BlockType::Other(_) => return Props::new(),
        };
        content.to_props().unwrap_or_default()
    }
}

impl Default for BlockType {
    fn default() -> Self {
        BlockType::Other(String::new())
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BlockType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(BlockType::parse(&name))
    }
}

/// Preview device a block was configured for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Desktop,
    Tablet,
    Mobile,
}

/// Deserializes a value that should be a string, but may be a number or bool.
fn deserialize_string_lenient<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_event_dates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_days: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_hours: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_minutes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_seconds: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    #[serde(default, deserialize_with = "deserialize_string_lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_string_lenient")]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<Stat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

/// A registration form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FormField {
    fn required(name: &str, label: &str, field_type: &str) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type: field_type.into(),
            required: true,
            enabled: None,
            deletable: Some(false),
            options: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeesFormProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FormField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExhibitorShowcaseProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasProps {
    /// Base64 encoded drawing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
}

/// Typed view of a block's props, one variant per block type.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockContent {
    Hero(HeroProps),
    Description(DescriptionProps),
    Countdown(CountdownProps),
    Stats(StatsProps),
    AttendeesForm(AttendeesFormProps),
    ExhibitorShowcase(ExhibitorShowcaseProps),
    Canvas(CanvasProps),
    /// Forward-compatible fallback for types this build does not know.
    Unknown { block_type: String, props: Props },
}

impl BlockContent {
    /// Interpret a props bag according to its block type.
    ///
    /// Fails with [`PodiumError::Validation`] when a known schema field has
    /// the wrong shape (e.g. `stats` is not a list).
    pub fn parse(block_type: &BlockType, props: &Props) -> Result<Self> {
        fn typed<T: serde::de::DeserializeOwned>(block_type: &BlockType, props: &Props) -> Result<T> {
            let value = Value::Object(props.clone().into_iter().collect());
            serde_json::from_value(value).map_err(|e| {
                PodiumError::Validation(format!("invalid props for {} block: {}", block_type, e))
            })
        }

        Ok(match block_type {
            BlockType::Hero => BlockContent::Hero(typed(block_type, props)?),
            BlockType::Description => BlockContent::Description(typed(block_type, props)?),
            BlockType::Countdown => BlockContent::Countdown(typed(block_type, props)?),
            BlockType::Stats => BlockContent::Stats(typed(block_type, props)?),
            BlockType::AttendeesForm => BlockContent::AttendeesForm(typed(block_type, props)?),
            BlockType::ExhibitorShowcase => {
                BlockContent::ExhibitorShowcase(typed(block_type, props)?)
            }
            BlockType::Canvas => BlockContent::Canvas(typed(block_type, props)?),
            BlockType::Other(name) => BlockContent::Unknown {
                block_type: name.clone(),
                props: props.clone(),
            },
        })
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            BlockContent::Hero(_) => BlockType::Hero,
            BlockContent::Description(_) => BlockType::Description,
            BlockContent::Countdown(_) => BlockType::Countdown,
            BlockContent::Stats(_) => BlockType::Stats,
            BlockContent::AttendeesForm(_) => BlockType::AttendeesForm,
            BlockContent::ExhibitorShowcase(_) => BlockType::ExhibitorShowcase,
            BlockContent::Canvas(_) => BlockType::Canvas,
            BlockContent::Unknown { block_type, .. } => BlockType::Other(block_type.clone()),
        }
    }

    /// Serialize the typed view back into a props bag.
    pub fn to_props(&self) -> Result<Props> {
        let value = match self {
            BlockContent::Hero(p) => serde_json::to_value(p)?,
            BlockContent::Description(p) => serde_json::to_value(p)?,
            BlockContent::Countdown(p) => serde_json::to_value(p)?,
            BlockContent::Stats(p) => serde_json::to_value(p)?,
            BlockContent::AttendeesForm(p) => serde_json::to_value(p)?,
            BlockContent::ExhibitorShowcase(p) => serde_json::to_value(p)?,
            BlockContent::Canvas(p) => serde_json::to_value(p)?,
            BlockContent::Unknown { props, .. } => return Ok(props.clone()),
        };
        Ok(serde_json::from_value(value)?)
    }
}
