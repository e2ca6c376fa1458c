use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CrawlError;
use crate::normalize::normalize;

/// Output column order. `id` first, `missing_fields` last.
pub const RECORD_COLUMNS: [&str; 7] = [
    "id",
    "name",
    "url_key",
    "price",
    "description",
    "image_url",
    "missing_fields",
];

/// The five data fields tracked in `missing_fields`, in column order.
pub const DATA_FIELDS: [&str; 5] = ["name", "url_key", "price", "description", "image_url"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(u64);

impl ProductId {
    pub fn new(value: u64) -> Result<Self, CrawlError> {
        if value == 0 {
            return Err(CrawlError::InvalidProductId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProductId {
    type Err = CrawlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(parsed) = trimmed.parse::<u64>() {
            return Self::new(parsed);
        }
        // Spreadsheet exports often render integer columns as `123.0`.
        let whole = trimmed
            .split_once('.')
            .filter(|(int, frac)| {
                !int.is_empty()
                    && int.chars().all(|ch| ch.is_ascii_digit())
                    && frac.chars().all(|ch| ch == '0')
            })
            .and_then(|(int, _)| int.parse::<u64>().ok());
        match whole {
            Some(parsed) => Self::new(parsed),
            None => Err(CrawlError::InvalidProductId(value.to_string())),
        }
    }
}

/// Upstream price, kept as the JSON number text it arrived as.
#[derive(Debug, Clone, PartialEq)]
pub struct Price(String);

impl Price {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(number) => Some(Self(number.to_string())),
            serde_json::Value::String(text) if !text.trim().is_empty() => {
                Some(Self(text.trim().to_string()))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self(text))
    }
}

/// Raw upstream payload. Only the fields we persist are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url_key: Option<serde_json::Value>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<ImagePayload>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagePayload {
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: ProductId,
    pub name: Option<String>,
    pub url_key: Option<String>,
    pub price: Option<Price>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub missing_fields: String,
}

impl Record {
    /// The all-null row written when every attempt for `id` failed.
    pub fn failed(id: ProductId) -> Self {
        Self {
            id,
            name: None,
            url_key: None,
            price: None,
            description: None,
            image_url: None,
            missing_fields: String::new(),
        }
    }

    pub fn from_payload(id: ProductId, payload: &ProductPayload) -> Self {
        let mut record = Self {
            id,
            name: non_empty(normalize(payload.name.as_deref())),
            url_key: payload.url_key.as_ref().and_then(passthrough_text),
            price: payload.price.as_ref().and_then(Price::from_json),
            description: non_empty(normalize(payload.description.as_deref())),
            image_url: payload
                .images
                .as_ref()
                .and_then(|images| images.first())
                .and_then(|image| image.base_url.clone())
                .and_then(non_empty),
            missing_fields: String::new(),
        };
        record.missing_fields = record.missing().join(",");
        record
    }

    /// Names of the data fields that are null or empty right now.
    pub fn missing(&self) -> Vec<&'static str> {
        let present = [
            has_text(&self.name),
            has_text(&self.url_key),
            self.price
                .as_ref()
                .is_some_and(|price| !price.as_str().is_empty()),
            has_text(&self.description),
            has_text(&self.image_url),
        ];
        DATA_FIELDS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(field, _)| *field)
            .collect()
    }

    /// Number of entries recorded in `missing_fields`.
    pub fn missing_count(&self) -> usize {
        self.missing_fields
            .split(',')
            .filter(|field| !field.trim().is_empty())
            .count()
    }

    pub fn completeness(&self) -> Completeness {
        if self.missing().len() == DATA_FIELDS.len() {
            Completeness::Failure
        } else {
            Completeness::Complete
        }
    }

    pub fn is_failure(&self) -> bool {
        self.completeness() == Completeness::Failure
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|text| !text.is_empty())
}

/// Strings pass through as-is, numbers as their JSON text.
fn passthrough_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => non_empty(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
