//! Decoding and display of messages found on device queues.

use std::collections::BTreeMap;

use serde_json::Value;

const NA: &str = "N/A";

/// One message body from the data queue. Bodies that are not JSON are
/// classified as `RAW`.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Json(Value),
    Raw(String),
}

impl DeviceMessage {
    pub fn parse(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => DeviceMessage::Json(value),
            Err(_) => DeviceMessage::Raw(String::from_utf8_lossy(body).into_owned()),
        }
    }

    pub fn kind(&self) -> String {
        match self {
            DeviceMessage::Json(value) => text(value, "type").unwrap_or_else(|| "UNKNOWN".to_string()),
            DeviceMessage::Raw(_) => "RAW".to_string(),
        }
    }

    /// `None` for raw bodies; `UNKNOWN` for JSON without an `imei`.
    pub fn imei(&self) -> Option<String> {
        match self {
            DeviceMessage::Json(value) => {
                Some(text(value, "imei").unwrap_or_else(|| "UNKNOWN".to_string()))
            }
            DeviceMessage::Raw(_) => None,
        }
    }

    /// Raw bodies never match an IMEI filter.
    pub fn matches_imei(&self, target: Option<&str>) -> bool {
        match target {
            None => true,
            Some(target) => self.imei().as_deref() == Some(target),
        }
    }

    pub fn render(&self, label: &str, show_json: bool) -> Vec<String> {
        let value = match self {
            DeviceMessage::Raw(raw) => {
                return vec![format!("Message {label} (raw):"), format!("  Raw data: {raw}")];
            }
            DeviceMessage::Json(value) => value,
        };

        let kind = self.kind();
        let mut lines = vec![
            format!("Message {label}:"),
            format!("  Type: {kind}"),
            format!("  IMEI: {}", or_na(value, "imei")),
            format!("  Device: {}", or_na(value, "device")),
            format!("  Timestamp: {}", or_na(value, "timestamp")),
        ];

        let body = value.get("message").cloned().unwrap_or(Value::Null);
        match kind.as_str() {
            "CONNECTION" => {
                lines.push(format!("  Status: {}", or_na(&body, "status")));
                lines.push(format!("  Source: {}", or_na(&body, "source")));
            }
            "DATA" => {
                lines.push(format!(
                    "  Location: [{}, {}]",
                    or_na(&body, "lon"),
                    or_na(&body, "lat")
                ));
                lines.push(format!("  Speed: {} km/h", or_na(&body, "speed")));
                lines.push(format!("  Altitude: {} m", or_na(&body, "alt")));
                lines.push(format!("  Satellites: {}", or_na(&body, "sat_num")));
                lines.push(format!("  Bearing: {}°", or_na(&body, "bearing")));
                lines.push(format!("  Priority: {}", or_na(&body, "priority")));
            }
            "RAW" => {
                let hex = text(&body, "raw_data").unwrap_or_default();
                lines.push(format!("  Raw data length: {} characters", hex.len()));
                lines.push(format!("  Raw data preview: {}...", preview(&hex, 50)));
            }
            _ => {}
        }

        if show_json {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            lines.push(format!("  Full JSON: {pretty}"));
        }
        lines
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value.get(key).map(|field| match field {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

pub(crate) fn or_na(value: &Value, key: &str) -> String {
    text(value, key).unwrap_or_else(|| NA.to_string())
}

/// First `max` characters.
pub(crate) fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Message type counts (respecting the IMEI filter) and per-IMEI counts
/// over a sample of data queue bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBreakdown {
    pub types: BTreeMap<String, u32>,
    pub imeis: BTreeMap<String, u32>,
}

impl TypeBreakdown {
    pub fn count(&self, kind: &str) -> u32 {
        self.types.get(kind).copied().unwrap_or_default()
    }
}

pub fn analyze<'b, I>(bodies: I, target: Option<&str>) -> TypeBreakdown
where
    I: IntoIterator<Item = &'b [u8]>,
{
    let mut breakdown = TypeBreakdown::default();
    for body in bodies {
        let message = DeviceMessage::parse(body);
        match message.imei() {
            Some(imei) => {
                let counts_for_target = target.map_or(true, |t| t == imei);
                *breakdown.imeis.entry(imei).or_default() += 1;
                if counts_for_target {
                    *breakdown.types.entry(message.kind()).or_default() += 1;
                }
            }
            None => *breakdown.types.entry("RAW".to_string()).or_default() += 1,
        }
    }
    breakdown
}
