//! Datastore path layouts and the untrusted partial records read from them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    DeviceControls, DeviceKey, HistoricalDataPoint, HistoricalSensorData, LightStatus,
    ReportedChannels, SensorReadings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathLayout {
    /// `currentReadings/sensors` + `currentReadings/devices`.
    #[default]
    Nested,
    /// `SensorData` + `controls`.
    Flat,
}

impl PathLayout {
    pub fn paths(self) -> FeedPaths {
        match self {
            Self::Nested => FeedPaths {
                sensors: "currentReadings/sensors".into(),
                devices: "currentReadings/devices".into(),
                historical: "historicalData".into(),
            },
            Self::Flat => FeedPaths {
                sensors: "SensorData".into(),
                devices: "controls".into(),
                historical: "historicalData".into(),
            },
        }
    }
}

impl FromStr for PathLayout {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nested" => Ok(Self::Nested),
            "flat" => Ok(Self::Flat),
            other => Err(format!("unknown path layout '{other}', expected nested or flat")),
        }
    }
}

impl fmt::Display for PathLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nested => f.write_str("nested"),
            Self::Flat => f.write_str("flat"),
        }
    }
}

/// Where each logical subtree lives in the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPaths {
    pub sensors: String,
    pub devices: String,
    pub historical: String,
}

impl Default for FeedPaths {
    fn default() -> Self {
        PathLayout::default().paths()
    }
}

impl FeedPaths {
    pub fn device_path(&self, key: DeviceKey) -> String {
        format!("{}/{}", self.devices.trim_end_matches('/'), key.as_str())
    }
}

/// Sensor fields that survived validation. `None` means absent or unusable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorsSnapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub water_level: Option<f64>,
    pub ldr_brightness: Option<f64>,
    pub flame_detected: Option<bool>,
    pub water_shortage: Option<bool>,
    /// Keys that were present but could not be interpreted.
    pub rejected: Vec<&'static str>,
}

impl SensorsSnapshot {
    /// Reads a sensors subtree. Non-object values yield an empty snapshot.
    pub fn from_value(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self::default();
        };
        let mut rejected = Vec::new();
        Self {
            temperature: number_field(fields, "temperature", &mut rejected),
            humidity: number_field(fields, "humidity", &mut rejected),
            soil_moisture: number_field(fields, "soilMoisture", &mut rejected),
            water_level: number_field(fields, "waterLevel", &mut rejected),
            ldr_brightness: number_field(fields, "ldrBrightness", &mut rejected),
            flame_detected: flag_field(fields, "flameDetected", &mut rejected),
            water_shortage: flag_field(fields, "waterShortage", &mut rejected),
            rejected,
        }
    }

    pub fn reported(&self) -> ReportedChannels {
        ReportedChannels {
            temperature: self.temperature.is_some(),
            humidity: self.humidity.is_some(),
            soil_moisture: self.soil_moisture.is_some(),
            water_level: self.water_level.is_some(),
            ldr_brightness: self.ldr_brightness.is_some(),
            flame_detected: self.flame_detected.is_some(),
            water_shortage: self.water_shortage.is_some(),
        }
    }

    pub fn merge_into(&self, previous: &SensorReadings) -> SensorReadings {
        SensorReadings {
            temperature: self.temperature.unwrap_or(previous.temperature),
            humidity: self.humidity.unwrap_or(previous.humidity),
            soil_moisture: self.soil_moisture.unwrap_or(previous.soil_moisture),
            water_level: self.water_level.unwrap_or(previous.water_level),
            ldr_brightness: self.ldr_brightness.unwrap_or(previous.ldr_brightness),
            flame_detected: self.flame_detected.unwrap_or(previous.flame_detected),
            water_shortage: self.water_shortage.unwrap_or(previous.water_shortage),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicesSnapshot {
    pub light1: Option<LightStatus>,
    pub light2: Option<LightStatus>,
    pub light_ldr: Option<LightStatus>,
    pub ldr_intensity: Option<f64>,
    pub rejected: Vec<&'static str>,
}

impl DevicesSnapshot {
    pub fn from_value(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self::default();
        };
        let mut rejected = Vec::new();
        Self {
            light1: light_field(fields, "light1", &mut rejected),
            light2: light_field(fields, "light2", &mut rejected),
            light_ldr: light_field(fields, "lightLDR", &mut rejected),
            ldr_intensity: number_field(fields, "ldrIntensity", &mut rejected)
                .map(|intensity| intensity.clamp(0.0, 100.0)),
            rejected,
        }
    }

    pub fn merge_into(&self, base: &DeviceControls) -> DeviceControls {
        DeviceControls {
            light1: self.light1.unwrap_or(base.light1),
            light2: self.light2.unwrap_or(base.light2),
            light_ldr: self.light_ldr.unwrap_or(base.light_ldr),
            ldr_intensity: self.ldr_intensity.unwrap_or(base.ldr_intensity),
        }
    }
}

/// Reads the historical subtree. Channels may be JSON arrays or push-id keyed
/// objects; entries that do not decode as points are skipped.
pub fn historical_from_value(value: &Value) -> Option<HistoricalSensorData> {
    let channels = value.as_object()?;
    let mut data = HistoricalSensorData::new();
    for (channel, series) in channels {
        let entries: Vec<&Value> = match series {
            Value::Array(items) => items.iter().collect(),
            Value::Object(items) => items.values().collect(),
            _ => continue,
        };
        let points = entries
            .into_iter()
            .filter_map(|entry| HistoricalDataPoint::deserialize(entry).ok())
            .collect();
        data.insert(channel.clone(), points);
    }
    Some(data)
}

fn number_field(
    fields: &Map<String, Value>,
    key: &'static str,
    rejected: &mut Vec<&'static str>,
) -> Option<f64> {
    let raw = fields.get(key).filter(|raw| !raw.is_null())?;
    let parsed = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(number) if number.is_finite() => Some(number),
        _ => {
            rejected.push(key);
            None
        }
    }
}

fn flag_field(
    fields: &Map<String, Value>,
    key: &'static str,
    rejected: &mut Vec<&'static str>,
) -> Option<bool> {
    let raw = fields.get(key).filter(|raw| !raw.is_null())?;
    let parsed = match raw {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    };
    if parsed.is_none() {
        rejected.push(key);
    }
    parsed
}

fn light_field(
    fields: &Map<String, Value>,
    key: &'static str,
    rejected: &mut Vec<&'static str>,
) -> Option<LightStatus> {
    let raw = fields.get(key).filter(|raw| !raw.is_null())?;
    let parsed = raw.as_str().and_then(|text| text.parse::<LightStatus>().ok());
    if parsed.is_none() {
        rejected.push(key);
    }
    parsed
}
