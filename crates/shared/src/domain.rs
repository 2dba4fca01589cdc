use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightStatus {
    On,
    #[default]
    Off,
    Auto,
}

impl LightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for LightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightStatus {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            _ => Err(ValidationError::UnknownLightStatus(raw.to_string())),
        }
    }
}

/// Keys of the devices subtree, as written by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceKey {
    #[serde(rename = "light1")]
    Light1,
    #[serde(rename = "light2")]
    Light2,
    #[serde(rename = "lightLDR")]
    LightLdr,
    #[serde(rename = "ldrIntensity")]
    LdrIntensity,
}

impl DeviceKey {
    pub const ALL: [DeviceKey; 4] = [
        DeviceKey::Light1,
        DeviceKey::Light2,
        DeviceKey::LightLdr,
        DeviceKey::LdrIntensity,
    ];
    pub const LIGHTS: [DeviceKey; 3] = [DeviceKey::Light1, DeviceKey::Light2, DeviceKey::LightLdr];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light1 => "light1",
            Self::Light2 => "light2",
            Self::LightLdr => "lightLDR",
            Self::LdrIntensity => "ldrIntensity",
        }
    }

    pub fn is_light(self) -> bool {
        !matches!(self, Self::LdrIntensity)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKey {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == raw)
            .ok_or_else(|| ValidationError::UnknownDevice(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReadings {
    /// Degrees Celsius.
    pub temperature: f64,
    pub humidity: f64,
    /// 0-100, higher is wetter.
    pub soil_moisture: f64,
    pub water_level: f64,
    /// Raw light sensor units.
    pub ldr_brightness: f64,
    pub flame_detected: bool,
    pub water_shortage: bool,
}

pub const DEFAULT_LDR_INTENSITY: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceControls {
    pub light1: LightStatus,
    pub light2: LightStatus,
    #[serde(rename = "lightLDR")]
    pub light_ldr: LightStatus,
    /// Only meaningful while `light_ldr` is not off.
    #[serde(rename = "ldrIntensity")]
    pub ldr_intensity: f64,
}

impl Default for DeviceControls {
    fn default() -> Self {
        Self {
            light1: LightStatus::Off,
            light2: LightStatus::Off,
            light_ldr: LightStatus::Off,
            ldr_intensity: DEFAULT_LDR_INTENSITY,
        }
    }
}

impl DeviceControls {
    pub fn light(&self, key: DeviceKey) -> Option<LightStatus> {
        match key {
            DeviceKey::Light1 => Some(self.light1),
            DeviceKey::Light2 => Some(self.light2),
            DeviceKey::LightLdr => Some(self.light_ldr),
            DeviceKey::LdrIntensity => None,
        }
    }

    /// Number of lights that are not switched off.
    pub fn online_lights(&self) -> usize {
        DeviceKey::LIGHTS
            .into_iter()
            .filter_map(|key| self.light(key))
            .filter(|status| *status != LightStatus::Off)
            .count()
    }
}

/// Sensor channels the feed has reported at least once. A channel that was
/// never reported still reads as zero in `SensorReadings` and must not drive
/// alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportedChannels {
    pub temperature: bool,
    pub humidity: bool,
    pub soil_moisture: bool,
    pub water_level: bool,
    pub ldr_brightness: bool,
    pub flame_detected: bool,
    pub water_shortage: bool,
}

impl ReportedChannels {
    pub const ALL: Self = Self {
        temperature: true,
        humidity: true,
        soil_moisture: true,
        water_level: true,
        ldr_brightness: true,
        flame_detected: true,
        water_shortage: true,
    };

    pub fn union(self, other: Self) -> Self {
        Self {
            temperature: self.temperature || other.temperature,
            humidity: self.humidity || other.humidity,
            soil_moisture: self.soil_moisture || other.soil_moisture,
            water_level: self.water_level || other.water_level,
            ldr_brightness: self.ldr_brightness || other.ldr_brightness,
            flame_detected: self.flame_detected || other.flame_detected,
            water_shortage: self.water_shortage || other.water_shortage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AppData {
    pub sensors: SensorReadings,
    pub devices: DeviceControls,
    #[serde(skip)]
    pub reported: ReportedChannels,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Flag(bool),
    Number(f64),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDataPoint {
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub value: SensorValue,
}

/// Channel name to its series, ascending by timestamp as delivered by the producer.
pub type HistoricalSensorData = BTreeMap<String, Vec<HistoricalDataPoint>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertType {
    SoilMoisture,
    Flame,
    WaterShortage,
}

impl AlertType {
    /// Lower sorts first among alerts of equal severity.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Flame => 0,
            Self::WaterShortage => 1,
            Self::SoilMoisture => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// Lower is more severe.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Warning => 1,
            Self::Info => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub timestamp: i64,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_value: Option<SensorValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedIssue {
    pub sensor_type: String,
    pub predicted_issue: String,
    pub confidence_level: f64,
    pub suggested_action: String,
}
