use abac_decision_service::interface::routes;
use abac_decision_service::test_utils::create_test_app_state;
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn spawn_server() -> SocketAddr {
    let state = create_test_app_state().await;
    let app = routes().with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_full_decision_flow() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    // Etudiant cannot read the diploma yet.
    let resp = client
        .post(format!("{base}/isAuthorized"))
        .json(&json!({"subject": {"id": "etu-1"}, "resource": {"id": "dip-1"}, "operation": "lire"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["decision"], "Deny");

    // Unsupported operators are rejected before any reload.
    let resp = client
        .put(format!("{base}/policies"))
        .json(&json!([{
            "id": "tous-lisent",
            "effect": "Permit",
            "operation": "lire",
            "subject": [{"op": "regex", "attribute": "role", "pattern": "^prof"}]
        }]))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());

    // Grant etudiants read access with a new policy version.
    let resp = client
        .put(format!("{base}/policies"))
        .json(&json!([{
            "id": "tous-lisent",
            "effect": "Permit",
            "operation": "lire",
            "subject": [{"op": "in", "attribute": "role", "values": ["etudiant", "professeur"]}],
            "resource": [{"op": "equals", "attribute": "class", "value": "Diplome"}]
        }]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["policy_version"], 2);

    let body: Value = client
        .post(format!("{base}/whoAuthorized"))
        .json(&json!({"resource": {"id": "dip-1"}, "operation": "lire"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["subjects"], json!(["etu-1", "prof-1"]));
    assert_eq!(body["policy_version"], 2);

    let body: Value = client
        .post(format!("{base}/whichAuthorized"))
        .json(&json!({"subject": {"id": "etu-1"}, "operation": "lire"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["resources"], json!(["dip-1", "dip-2"]));
}

#[tokio::test]
async fn test_health_reports_counts() {
    let addr = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["policy_version"], 1);
    assert_eq!(body["subjects"], 4);
}
