//! Threshold rules that turn a sensor snapshot into alerts.
//!
//! Pure: no I/O, no clock reads inside [`derive_alerts_at`]. Alert ids depend
//! only on the rule that fired, so deriving twice from the same state yields
//! identical alert identity.

use chrono::Utc;
use shared::domain::{Alert, AlertType, AppData, SensorValue, Severity};

pub const SOIL_MOISTURE_CRITICAL_BELOW: f64 = 10.0;
pub const SOIL_MOISTURE_WARNING_BELOW: f64 = 20.0;

pub const SOIL_MOISTURE_CRITICAL_ID: &str = "soilMoistureCritical";
pub const SOIL_MOISTURE_WARNING_ID: &str = "soilMoistureWarning";
pub const FLAME_DETECTED_ID: &str = "flameDetected";
pub const WATER_SHORTAGE_ID: &str = "waterShortage";

/// Describes the channel behind an alert, for building summary requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRule {
    pub alert_type: AlertType,
    /// Key of the channel in the sensors and historical subtrees.
    pub channel: &'static str,
    pub sensor_label: &'static str,
    pub threshold: f64,
}

pub fn rule_for(alert: &Alert) -> AlertRule {
    match alert.alert_type {
        AlertType::SoilMoisture => AlertRule {
            alert_type: AlertType::SoilMoisture,
            channel: "soilMoisture",
            sensor_label: "Soil Moisture",
            threshold: if alert.severity == Severity::Critical {
                SOIL_MOISTURE_CRITICAL_BELOW
            } else {
                SOIL_MOISTURE_WARNING_BELOW
            },
        },
        AlertType::Flame => AlertRule {
            alert_type: AlertType::Flame,
            channel: "flameDetected",
            sensor_label: "Flame Sensor",
            threshold: 0.0,
        },
        AlertType::WaterShortage => AlertRule {
            alert_type: AlertType::WaterShortage,
            channel: "waterShortage",
            sensor_label: "Water Supply",
            threshold: 0.0,
        },
    }
}

pub fn derive_alerts(app_data: &AppData) -> Vec<Alert> {
    derive_alerts_at(app_data, Utc::now().timestamp_millis())
}

/// Evaluates every rule independently and orders the result most severe
/// first, then flame, water shortage, soil moisture. Rules whose channel the
/// feed never reported stay silent.
pub fn derive_alerts_at(app_data: &AppData, timestamp: i64) -> Vec<Alert> {
    let sensors = &app_data.sensors;
    let reported = app_data.reported;
    let mut alerts = Vec::new();

    let soil = sensors.soil_moisture;
    if reported.soil_moisture && soil < SOIL_MOISTURE_CRITICAL_BELOW {
        alerts.push(Alert {
            id: SOIL_MOISTURE_CRITICAL_ID.to_string(),
            alert_type: AlertType::SoilMoisture,
            title: "Low Soil Moisture!".to_string(),
            message: format!(
                "Soil moisture is critically low ({soil}%). Immediate watering needed."
            ),
            timestamp,
            severity: Severity::Critical,
            sensor_value: Some(SensorValue::Number(soil)),
        });
    } else if reported.soil_moisture && soil < SOIL_MOISTURE_WARNING_BELOW {
        alerts.push(Alert {
            id: SOIL_MOISTURE_WARNING_ID.to_string(),
            alert_type: AlertType::SoilMoisture,
            title: "Low Soil Moisture Warning".to_string(),
            message: format!("Soil moisture is low ({soil}%). Consider watering soon."),
            timestamp,
            severity: Severity::Warning,
            sensor_value: Some(SensorValue::Number(soil)),
        });
    }

    if reported.flame_detected && sensors.flame_detected {
        alerts.push(Alert {
            id: FLAME_DETECTED_ID.to_string(),
            alert_type: AlertType::Flame,
            title: "Flame Detected!".to_string(),
            message: "A flame has been detected! Take immediate action.".to_string(),
            timestamp,
            severity: Severity::Critical,
            sensor_value: Some(SensorValue::Flag(true)),
        });
    }

    if reported.water_shortage && sensors.water_shortage {
        alerts.push(Alert {
            id: WATER_SHORTAGE_ID.to_string(),
            alert_type: AlertType::WaterShortage,
            title: "Water Shortage!".to_string(),
            message: "Water supply is critically low. Check your main water source.".to_string(),
            timestamp,
            severity: Severity::Critical,
            sensor_value: Some(SensorValue::Flag(true)),
        });
    }

    alerts.sort_by_key(|alert| (alert.severity.rank(), alert.alert_type.precedence()));
    alerts
}

#[cfg(test)]
#[path = "tests/alerts_tests.rs"]
mod tests;
