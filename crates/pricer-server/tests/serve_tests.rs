// End-to-end test over a real socket.

use std::path::PathBuf;

use pricer_core::PricePredictor;
use pricer_server::config::{ResponseLabels, ServerConfig};
use pricer_server::AppState;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn state() -> AppState {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../artifacts");
    let predictor = PricePredictor::load(
        &dir.join("preprocessor.json"),
        &dir.join("xgboost_model.json"),
    )
    .expect("demo artifacts should load");
    let labels = ResponseLabels {
        price_label: "price".into(),
        currency_label: "EGP".into(),
    };
    AppState::new(predictor, labels)
}

#[tokio::test]
async fn serves_predictions_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(pricer_server::serve(listener, state(), async {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/predict/"))
        .header("Origin", "http://localhost:3000")
        .json(&json!({
            "Area": 150,
            "Rooms": 3,
            "Bathrooms": 2,
            "Type": "Apartment",
            "Furnished": 1,
            "Finished": 1,
            "Feature": "Balcony",
            "City": "Alexandria",
            "District": "Smouha"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "price": "813,722 EGP" }));

    let response = client
        .post(format!("http://{addr}/predict/"))
        .json(&json!({ "Area": -3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["detail"].is_string());

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn binds_hostnames_and_ipv4() {
    for host in ["127.0.0.1", "localhost"] {
        let server = ServerConfig {
            host: host.into(),
            port: 0,
        };
        let listener = pricer_server::bind(&server).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}

#[tokio::test]
async fn binds_bare_ipv6_host() {
    // Hosts without IPv6 loopback have nothing to check.
    if TcpListener::bind("[::1]:0").await.is_err() {
        return;
    }
    let server = ServerConfig {
        host: "::1".into(),
        port: 0,
    };
    let listener = pricer_server::bind(&server).await.unwrap();
    assert!(listener.local_addr().unwrap().is_ipv6());
}
