//! OpenWeatherMap client tests against a mock server

use std::time::Duration;

use assert_matches::assert_matches;
use beacon::ConditionCode;
use beacon::clients::{WeatherClient, WeatherError, weather::OpenWeatherClient};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn current_weather() -> serde_json::Value {
    json!({
        "name": "Lisbon",
        "coord": { "lat": 38.72, "lon": -9.14 },
        "weather": [{ "id": 800, "main": "Clear", "description": "clear sky" }],
        "main": { "temp": 24.3, "feels_like": 24.1, "humidity": 52, "pressure": 1017 },
        "wind": { "speed": 4.6, "deg": 330 }
    })
}

async fn mount_current(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("units", "metric"))
        .and(query_param("appid", "test-key"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_lookup_parses_current_weather_and_uv() {
    let server = MockServer::start().await;
    mount_current(&server, 200, current_weather()).await;
    Mock::given(method("GET"))
        .and(path("/data/3.0/onecall"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "current": { "uvi": 6.2 } })))
        .mount(&server)
        .await;

    let client = OpenWeatherClient::new(server.uri(), "test-key");
    let snapshot = client
        .lookup("Lisbon", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(snapshot.location, "Lisbon");
    assert_eq!(snapshot.temperature, 24.3);
    assert_eq!(snapshot.humidity, 52);
    assert_eq!(snapshot.wind_speed, 4.6);
    assert_eq!(snapshot.condition, ConditionCode::CLEAR_SKY);
    assert_eq!(snapshot.description, "clear sky");
    assert_eq!(snapshot.uv_index, Some(6.2));
}

#[tokio::test]
async fn test_missing_uv_index_is_not_an_error() {
    let server = MockServer::start().await;
    mount_current(&server, 200, current_weather()).await;
    Mock::given(method("GET"))
        .and(path("/data/3.0/onecall"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = OpenWeatherClient::new(server.uri(), "test-key");
    let snapshot = client
        .lookup("Lisbon", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(snapshot.uv_index, None);
}

#[tokio::test]
async fn test_unknown_location() {
    let server = MockServer::start().await;
    mount_current(
        &server,
        404,
        json!({ "cod": "404", "message": "city not found" }),
    )
    .await;

    let client = OpenWeatherClient::new(server.uri(), "test-key");
    let err = client
        .lookup("Atlantis", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert_eq!(err, WeatherError::NotFound("Atlantis".to_string()));
}

#[tokio::test]
async fn test_server_error_is_transport_failure() {
    let server = MockServer::start().await;
    mount_current(&server, 500, json!({})).await;

    let client = OpenWeatherClient::new(server.uri(), "test-key");
    let err = client
        .lookup("Lisbon", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert_matches!(err, WeatherError::Transport(_));
}

#[tokio::test]
async fn test_malformed_body_is_transport_failure() {
    let server = MockServer::start().await;
    mount_current(&server, 200, json!({ "name": "Lisbon" })).await;

    let client = OpenWeatherClient::new(server.uri(), "test-key");
    let err = client
        .lookup("Lisbon", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert_matches!(err, WeatherError::Transport(_));
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(current_weather())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = OpenWeatherClient::new(server.uri(), "test-key");
    let err = client
        .lookup("Lisbon", Duration::from_millis(200))
        .await
        .unwrap_err();

    assert_eq!(err, WeatherError::Timeout);
}
