//! Optional human-readable alert text from an external text generator.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::domain::{Alert, AlertType, HistoricalSensorData, PredictedIssue, SensorValue};
use tracing::warn;
use url::Url;

use crate::{alerts::rule_for, error::SummaryError};

pub const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(8);

/// Channels that get a trend prediction when enough history exists.
pub const PREDICTION_CHANNELS: [(&str, &str); 2] =
    [("temperature", "Temperature"), ("humidity", "Humidity")];
const MIN_PREDICTION_POINTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub sensor_type: String,
    pub sensor_value: Option<SensorValue>,
    pub threshold: f64,
    /// JSON text of the channel's series, `[]` when none is cached.
    pub historical_data: String,
}

impl SummaryRequest {
    pub fn for_alert(alert: &Alert, historical: Option<&HistoricalSensorData>) -> Self {
        let rule = rule_for(alert);
        Self {
            alert_id: alert.id.clone(),
            alert_type: alert.alert_type,
            sensor_type: rule.sensor_label.to_string(),
            sensor_value: alert.sensor_value,
            threshold: rule.threshold,
            historical_data: series_json(historical, rule.channel),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub sensor_type: String,
    pub historical_sensor_data: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_alert_summary(&self, request: &SummaryRequest) -> Result<String>;
    async fn predict_issue(&self, request: &PredictionRequest) -> Result<PredictedIssue>;
}

pub struct MissingTextGenerator;

#[async_trait]
impl TextGenerator for MissingTextGenerator {
    async fn generate_alert_summary(&self, request: &SummaryRequest) -> Result<String> {
        Err(anyhow!(
            "text generation is unavailable for alert {}",
            request.alert_id
        ))
    }

    async fn predict_issue(&self, request: &PredictionRequest) -> Result<PredictedIssue> {
        Err(anyhow!(
            "text generation is unavailable for {}",
            request.sensor_type
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionResponse {
    #[serde(default)]
    predicted_issue: String,
    #[serde(default)]
    confidence_level: f64,
    #[serde(default)]
    suggested_action: String,
}

/// Posts requests as JSON to `{endpoint}/alert-summary` and
/// `{endpoint}/predict-issues`.
pub struct HttpTextGenerator {
    http: Client,
    endpoint: Url,
}

impl HttpTextGenerator {
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid summary endpoint: {endpoint}"))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            endpoint,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate_alert_summary(&self, request: &SummaryRequest) -> Result<String> {
        let response: SummaryResponse = self
            .http
            .post(self.endpoint.join("alert-summary")?)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.summary)
    }

    async fn predict_issue(&self, request: &PredictionRequest) -> Result<PredictedIssue> {
        let response: PredictionResponse = self
            .http
            .post(self.endpoint.join("predict-issues")?)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(PredictedIssue {
            sensor_type: request.sensor_type.clone(),
            predicted_issue: response.predicted_issue,
            confidence_level: response.confidence_level,
            suggested_action: response.suggested_action,
        })
    }
}

/// Wraps a [`TextGenerator`] with a deadline and the templated fallback.
#[derive(Clone)]
pub struct SummaryAugmenter {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl SummaryAugmenter {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub async fn try_summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
        let generation = self.generator.generate_alert_summary(request);
        let summary = tokio::time::timeout(self.timeout, generation)
            .await
            .map_err(|_| SummaryError::Timeout(self.timeout))?
            .map_err(SummaryError::Generation)?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(SummaryError::Empty);
        }
        Ok(summary.to_string())
    }

    /// Never fails: any generator problem yields the alert's own message.
    pub async fn summarize(
        &self,
        alert: &Alert,
        historical: Option<&HistoricalSensorData>,
    ) -> String {
        let request = SummaryRequest::for_alert(alert, historical);
        match self.try_summarize(&request).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(alert_id = %alert.id, error = %err, "summary: using templated message");
                alert.message.clone()
            }
        }
    }

    /// Asks for trend predictions on the channels that have more than two
    /// points. Failed or empty predictions are dropped.
    pub async fn predict_issues(&self, historical: &HistoricalSensorData) -> Vec<PredictedIssue> {
        let requests: Vec<PredictionRequest> = PREDICTION_CHANNELS
            .iter()
            .filter(|(channel, _)| {
                historical
                    .get(*channel)
                    .is_some_and(|series| series.len() >= MIN_PREDICTION_POINTS)
            })
            .map(|(channel, label)| PredictionRequest {
                sensor_type: label.to_string(),
                historical_sensor_data: series_json(Some(historical), channel),
            })
            .collect();

        let outcomes = join_all(requests.iter().map(|request| async move {
            let outcome =
                tokio::time::timeout(self.timeout, self.generator.predict_issue(request)).await;
            (request, outcome)
        }))
        .await;

        outcomes
            .into_iter()
            .filter_map(|(request, outcome)| match outcome {
                Ok(Ok(mut issue)) if !issue.predicted_issue.trim().is_empty() => {
                    issue.confidence_level = issue.confidence_level.clamp(0.0, 1.0);
                    Some(issue)
                }
                Ok(Ok(_)) => None,
                Ok(Err(err)) => {
                    warn!(
                        sensor_type = %request.sensor_type,
                        error = %err,
                        "summary: prediction failed"
                    );
                    None
                }
                Err(_) => {
                    warn!(sensor_type = %request.sensor_type, "summary: prediction timed out");
                    None
                }
            })
            .collect()
    }
}

fn series_json(historical: Option<&HistoricalSensorData>, channel: &str) -> String {
    historical
        .and_then(|data| data.get(channel))
        .and_then(|series| serde_json::to_string(series).ok())
        .unwrap_or_else(|| "[]".to_string())
}

#[cfg(test)]
#[path = "tests/summary_tests.rs"]
mod tests;
