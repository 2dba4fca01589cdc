use super::*;
use std::{collections::BTreeMap, sync::Mutex};

use axum::{routing::post, Json, Router};
use serde_json::{json, Value};
use shared::domain::{AppData, HistoricalDataPoint, ReportedChannels, Severity};
use tokio::net::TcpListener;

use crate::alerts::derive_alerts_at;

enum Reply {
    Text(&'static str),
    Fail,
    Hang,
}

struct FakeGenerator {
    reply: Reply,
    requests: Mutex<Vec<SummaryRequest>>,
}

impl FakeGenerator {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate_alert_summary(&self, request: &SummaryRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Fail => Err(anyhow!("model overloaded")),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn predict_issue(&self, request: &PredictionRequest) -> Result<PredictedIssue> {
        match self.reply {
            Reply::Text(text) => Ok(PredictedIssue {
                sensor_type: request.sensor_type.clone(),
                predicted_issue: text.to_string(),
                confidence_level: if request.sensor_type == "Humidity" { 1.7 } else { 0.4 },
                suggested_action: "Check ventilation".into(),
            }),
            Reply::Fail => Err(anyhow!("model overloaded")),
            Reply::Hang => std::future::pending().await,
        }
    }
}

fn soil_alert(value: f64) -> Alert {
    let mut app_data = AppData {
        reported: ReportedChannels::ALL,
        ..AppData::default()
    };
    app_data.sensors.soil_moisture = value;
    derive_alerts_at(&app_data, 1_000)
        .into_iter()
        .next()
        .expect("soil alert")
}

fn series(len: usize) -> Vec<HistoricalDataPoint> {
    (0..len)
        .map(|index| HistoricalDataPoint {
            timestamp: index as i64 * 60_000,
            value: SensorValue::Number(20.0 + index as f64),
        })
        .collect()
}

fn augmenter(generator: Arc<FakeGenerator>) -> SummaryAugmenter {
    SummaryAugmenter::new(generator, Duration::from_millis(100))
}

#[tokio::test]
async fn request_describes_the_alert_channel() {
    let alert = soil_alert(4.0);
    let mut historical = BTreeMap::new();
    historical.insert("soilMoisture".to_string(), series(2));

    let request = SummaryRequest::for_alert(&alert, Some(&historical));
    assert_eq!(request.alert_id, "soilMoistureCritical");
    assert_eq!(request.sensor_type, "Soil Moisture");
    assert_eq!(request.threshold, 10.0);
    assert_eq!(request.sensor_value, Some(SensorValue::Number(4.0)));
    let parsed: Value = serde_json::from_str(&request.historical_data).expect("series json");
    assert_eq!(parsed.as_array().map(Vec::len), Some(2));

    let without_history = SummaryRequest::for_alert(&alert, None);
    assert_eq!(without_history.historical_data, "[]");
}

#[tokio::test]
async fn successful_summary_is_trimmed() {
    let generator = FakeGenerator::new(Reply::Text("  Water the beds today.\n"));
    let summary = augmenter(Arc::clone(&generator))
        .summarize(&soil_alert(4.0), None)
        .await;
    assert_eq!(summary, "Water the beds today.");
    assert_eq!(generator.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failures_fall_back_to_the_alert_message() {
    let alert = soil_alert(4.0);
    for reply in [Reply::Fail, Reply::Hang, Reply::Text("   ")] {
        let summary = augmenter(FakeGenerator::new(reply))
            .summarize(&alert, None)
            .await;
        assert_eq!(summary, alert.message);
    }
}

#[tokio::test]
async fn try_summarize_reports_the_failure_kind() {
    let request = SummaryRequest::for_alert(&soil_alert(4.0), None);

    let timeout = augmenter(FakeGenerator::new(Reply::Hang))
        .try_summarize(&request)
        .await
        .expect_err("timeout");
    assert!(matches!(timeout, SummaryError::Timeout(_)));

    let empty = augmenter(FakeGenerator::new(Reply::Text("")))
        .try_summarize(&request)
        .await
        .expect_err("empty");
    assert!(matches!(empty, SummaryError::Empty));

    let failed = augmenter(FakeGenerator::new(Reply::Fail))
        .try_summarize(&request)
        .await
        .expect_err("failed");
    assert!(matches!(failed, SummaryError::Generation(_)));
    assert_eq!(failed.code(), shared::error::ErrorCode::SummaryGeneration);
}

#[tokio::test]
async fn predictions_need_more_than_two_points() {
    let mut historical = BTreeMap::new();
    historical.insert("temperature".to_string(), series(2));
    historical.insert("humidity".to_string(), series(3));
    historical.insert("soilMoisture".to_string(), series(10));

    let issues = augmenter(FakeGenerator::new(Reply::Text("Rising humidity")))
        .predict_issues(&historical)
        .await;

    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].sensor_type, "Humidity");
    assert_eq!(issues[0].confidence_level, 1.0);
}

#[tokio::test]
async fn failed_predictions_are_dropped() {
    let mut historical = BTreeMap::new();
    historical.insert("temperature".to_string(), series(5));

    for reply in [Reply::Fail, Reply::Hang, Reply::Text(" ")] {
        let issues = augmenter(FakeGenerator::new(reply))
            .predict_issues(&historical)
            .await;
        assert!(issues.is_empty());
    }
}

#[tokio::test]
async fn missing_generator_always_falls_back() {
    let augmenter = SummaryAugmenter::new(Arc::new(MissingTextGenerator), DEFAULT_SUMMARY_TIMEOUT);
    let alert = soil_alert(15.0);
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(augmenter.summarize(&alert, None).await, alert.message);
}

async fn spawn_generator_server(seen: Arc<Mutex<Vec<Value>>>) -> String {
    let summary_seen = Arc::clone(&seen);
    let app = Router::new()
        .route(
            "/ai/alert-summary",
            post(move |Json(body): Json<Value>| {
                let seen = Arc::clone(&summary_seen);
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({ "summary": "Soil is drying out fast." }))
                }
            }),
        )
        .route(
            "/ai/predict-issues",
            post(move |Json(body): Json<Value>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({
                        "predictedIssue": "Overheating by evening",
                        "confidenceLevel": 0.8
                    }))
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/ai")
}

#[tokio::test]
async fn http_generator_posts_camel_case_requests() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let endpoint = spawn_generator_server(Arc::clone(&seen)).await;
    let generator = HttpTextGenerator::new(&endpoint).expect("endpoint");

    let request = SummaryRequest::for_alert(&soil_alert(4.0), None);
    let summary = generator
        .generate_alert_summary(&request)
        .await
        .expect("summary");
    assert_eq!(summary, "Soil is drying out fast.");

    let issue = generator
        .predict_issue(&PredictionRequest {
            sensor_type: "Temperature".into(),
            historical_sensor_data: "[]".into(),
        })
        .await
        .expect("prediction");
    assert_eq!(issue.sensor_type, "Temperature");
    assert_eq!(issue.predicted_issue, "Overheating by evening");
    assert_eq!(issue.suggested_action, "");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["alertId"], json!("soilMoistureCritical"));
    assert_eq!(seen[0]["sensorType"], json!("Soil Moisture"));
    assert_eq!(seen[0]["historicalData"], json!("[]"));
    assert_eq!(seen[1]["historicalSensorData"], json!("[]"));
}

#[tokio::test]
async fn http_generator_surfaces_unreachable_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let generator = HttpTextGenerator::new(&format!("http://{addr}")).expect("endpoint");
    let request = SummaryRequest::for_alert(&soil_alert(4.0), None);
    assert!(generator.generate_alert_summary(&request).await.is_err());
}
