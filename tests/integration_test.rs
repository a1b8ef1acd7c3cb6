//! HTTP tests against a running `linewatch` instance with the built-in
//! sensor ranges and the simulator enabled.
//!
//! Run with `BASE_URL=http://host:port cargo test -- --ignored`.

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
struct Sample {
    timestamp: String,
    value: f64,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore = "requires a running linewatch instance at BASE_URL"]
async fn live_data_rows_respect_sensor_bounds() -> Result<()> {
    // ---
    let url = format!("{}/api/live-data/line4", base_url());
    let body: Envelope<Value> = Client::new().get(&url).send().await?.json().await?;

    assert!(body.success);
    let row = body.data.as_object().expect("row should be a JSON object");

    let tz = row["timezone"].as_str().unwrap_or_default();
    assert!(tz == "+01" || tz == "+00", "unexpected timezone tag {tz}");
    assert_eq!(row["timestamp"].as_str().unwrap_or_default().len(), 19);

    // r01 on line4 is configured as [16.00, 258.00]
    let r01 = row["r01"].as_f64().expect("r01 should be numeric");
    assert!((16.0..=258.0).contains(&r01), "r01 out of bounds: {r01}");
    assert_eq!((r01 * 100.0).round() / 100.0, r01, "r01 has more than 2 decimals");

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running linewatch instance at BASE_URL"]
async fn historical_is_newest_first_and_limited() -> Result<()> {
    // ---
    let url = format!("{}/api/historical/line5/r17?length=5", base_url());
    let body: Envelope<Vec<Sample>> = Client::new().get(&url).send().await?.json().await?;

    assert!(body.success);
    assert!(body.data.len() <= 5, "length filter failed");
    for pair in body.data.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp, "not newest first");
    }
    for sample in &body.data {
        assert!((0.0..=241.0).contains(&sample.value));
    }

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running linewatch instance at BASE_URL"]
async fn unknown_identifiers_are_rejected() -> Result<()> {
    // ---
    let client = Client::new();
    let base = base_url();

    for path in [
        "/api/live-data/users",
        "/api/historical/line4/r99",
        "/api/sensor-data/line4/timestamp",
        "/api/forecasted-data/line9",
    ] {
        let resp = client.get(format!("{base}{path}")).send().await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path}");

        let body: Value = resp.json().await?;
        assert_eq!(body["success"], false);
    }

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running linewatch instance at BASE_URL"]
async fn health_reports_simulator() -> Result<()> {
    // ---
    let body: Value = Client::new()
        .get(format!("{}/health", base_url()))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["status"], "ok");
    assert_eq!(body["simulator"], "running");

    Ok(())
}
