use abac_decision_service::AppConfig;
use abac_decision_service::interface::{
    AppState, DecisionResponse, HealthResponse, LoadPolicyResponse, PolicySetResponse,
    WhichAuthorizedResponse, WhoAuthorizedResponse, routes,
};
use abac_decision_service::test_utils::{
    create_test_app_state, create_test_app_state_with_config,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn app(state: Arc<AppState>) -> Router {
    routes().with_state(state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn read_json<T: DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_is_authorized_permits_professeur() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({
            "subject": {"class": "Person", "role": "professeur"},
            "resource": {"class": "Diplome"},
            "operation": "lire"
        }),
    );
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = read_json(resp).await;
    assert_eq!(body["decision"], "Permit");
    assert_eq!(body["authorized"], true);
    assert_eq!(body["reason"], "permit_rule");
    assert_eq!(body["matched_rules"], json!(["professeur-lit-diplome"]));
}

#[tokio::test]
async fn test_is_authorized_denies_etudiant() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({
            "subject": {"class": "Person", "role": "etudiant"},
            "resource": {"class": "Diplome"},
            "operation": "lire"
        }),
    );
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: DecisionResponse = read_json(resp).await;
    assert!(!body.authorized);
    assert_eq!(
        serde_json::to_value(body.reason).unwrap(),
        json!("not_applicable")
    );
}

#[tokio::test]
async fn test_is_authorized_with_stored_ids() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({"subject": {"id": "prof-1"}, "resource": {"id": "dip-2"}, "operation": "lire"}),
    );
    let body: DecisionResponse = read_json(app(state.clone()).oneshot(req).await.unwrap()).await;
    assert!(body.authorized);

    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({"subject": {"id": "ghost"}, "resource": {"id": "dip-2"}, "operation": "lire"}),
    );
    let body: Value = read_json(app(state).oneshot(req).await.unwrap()).await;
    assert_eq!(body["authorized"], false);
    assert_eq!(body["reason"], "unknown_entity");
}

#[tokio::test]
async fn test_is_authorized_rejects_missing_class() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({
            "subject": {"role": "professeur"},
            "resource": {"class": "Diplome"},
            "operation": "lire"
        }),
    );
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = read_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("subject"));
}

#[tokio::test]
async fn test_is_authorized_rejects_empty_operation() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({
            "subject": {"class": "Person", "role": "professeur"},
            "resource": {"class": "Diplome"},
            "operation": "  "
        }),
    );
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_is_authorized_rejects_non_scalar_attribute() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/isAuthorized",
        json!({
            "subject": {"class": "Person", "role": ["professeur"]},
            "resource": {"class": "Diplome"},
            "operation": "lire"
        }),
    );
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_is_client_error() {
    let state = create_test_app_state().await;
    let req = Request::builder()
        .method("POST")
        .uri("/isAuthorized")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app(state).oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn test_who_authorized_lists_professeur_only() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/whoAuthorized",
        json!({"resource": {"class": "Diplome"}, "operation": "lire"}),
    );
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: WhoAuthorizedResponse = read_json(resp).await;
    assert_eq!(body.subjects, vec!["prof-1"]);
    assert_eq!(body.policy_version, 1);
}

#[tokio::test]
async fn test_which_authorized_lists_resources() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/whichAuthorized",
        json!({"subject": {"id": "prof-1"}, "operation": "lire"}),
    );
    let body: WhichAuthorizedResponse =
        read_json(app(state.clone()).oneshot(req).await.unwrap()).await;
    let mut resources = body.resources;
    resources.sort();
    assert_eq!(resources, vec!["dip-1", "dip-2"]);

    // Suspended auditor is caught by the deny rule.
    let req = json_request(
        "POST",
        "/whichAuthorized",
        json!({"subject": {"id": "aud-2"}, "operation": "lire"}),
    );
    let body: WhichAuthorizedResponse = read_json(app(state).oneshot(req).await.unwrap()).await;
    assert!(body.resources.is_empty());
}

#[tokio::test]
async fn test_policy_reload_and_rejection() {
    let state = create_test_app_state().await;
    let req = json_request(
        "PUT",
        "/policies",
        json!({"rules": [{
            "id": "etudiant-lit",
            "effect": "Permit",
            "operation": "lire",
            "subject": [{"op": "equals", "attribute": "role", "value": "etudiant"}],
            "resource": [{"op": "equals", "attribute": "class", "value": "Diplome"}]
        }]}),
    );
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: LoadPolicyResponse = read_json(resp).await;
    assert_eq!(body.policy_version, 2);
    assert_eq!(body.rule_count, 1);

    let req = json_request(
        "PUT",
        "/policies",
        json!([
            {"id": "dup", "effect": "Permit", "operation": "lire"},
            {"id": "dup", "effect": "Deny", "operation": "lire"}
        ]),
    );
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .uri("/policies")
        .body(Body::empty())
        .unwrap();
    let body: PolicySetResponse = read_json(app(state).oneshot(req).await.unwrap()).await;
    assert_eq!(body.policy_version, 2);
    assert_eq!(body.rules.len(), 1);
    assert_eq!(body.rules[0].id, "etudiant-lit");
}

#[tokio::test]
async fn test_subject_upsert_replaces_attributes_and_delete() {
    let state = create_test_app_state().await;
    let req = json_request("PUT", "/subjects/etu-1", json!({"role": "professeur"}));
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = json_request(
        "POST",
        "/whoAuthorized",
        json!({"resource": {"id": "dip-1"}, "operation": "lire"}),
    );
    let body: WhoAuthorizedResponse =
        read_json(app(state.clone()).oneshot(req).await.unwrap()).await;
    assert_eq!(body.subjects, vec!["etu-1", "prof-1"]);

    let req = Request::builder()
        .method("DELETE")
        .uri("/subjects/prof-1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app(state.clone()).oneshot(req).await.unwrap().status(),
        StatusCode::OK
    );
    assert!(state.subjects.get("prof-1").is_err());
}

#[tokio::test]
async fn test_resource_upsert_rejects_non_object() {
    let state = create_test_app_state().await;
    let req = json_request("PUT", "/resources/f-9", json!(["montant", 3]));
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_feed_ingest_is_accepted() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/feed",
        json!({"topic": "facture-attributes", "key": "f-2", "value": {"montant": 10}}),
    );
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    // The live consumer applies it in the background.
    for _ in 0..50 {
        if state.resources.get("f-2").is_ok() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("feed record was never applied");
}

#[tokio::test]
async fn test_subject_put_wins_over_earlier_feed_record() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/feed",
        json!({"topic": "user-attributes-compacted", "key": "etu-1", "value": {"role": "professeur"}}),
    );
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let req = json_request("PUT", "/subjects/etu-1", json!({"role": "etudiant"}));
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        state.subjects.get("etu-1").unwrap().attributes.get("role"),
        Some("etudiant")
    );

    // Nothing queued before the PUT may land after it.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(
        state.subjects.get("etu-1").unwrap().attributes.get("role"),
        Some("etudiant")
    );
}

#[tokio::test]
async fn test_subject_delete_wins_over_earlier_feed_grant() {
    let state = create_test_app_state().await;
    let req = json_request(
        "POST",
        "/feed",
        json!({"topic": "user-attributes-compacted", "key": "aud-2", "value": {"role": "auditeur"}}),
    );
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let req = Request::builder()
        .method("DELETE")
        .uri("/subjects/aud-2")
        .body(Body::empty())
        .unwrap();
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(state.subjects.get("aud-2").is_err());
}

#[tokio::test]
async fn test_api_key_enforced_except_health() {
    let config = AppConfig {
        api_keys: vec!["s3cret".to_string()],
        ..AppConfig::default()
    };
    let state = create_test_app_state_with_config(config).await;
    let body = json!({"resource": {"class": "Diplome"}, "operation": "lire"});

    let resp = app(state.clone())
        .oneshot(json_request("POST", "/whoAuthorized", body.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let mut req = json_request("POST", "/whoAuthorized", body.clone());
    req.headers_mut()
        .insert("x-api-key", "wrong".parse().unwrap());
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let mut req = json_request("POST", "/whoAuthorized", body);
    req.headers_mut()
        .insert("x-api-key", "s3cret".parse().unwrap());
    let resp = app(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = read_json(resp).await;
    assert_eq!(health.subjects, 4);
    assert_eq!(health.resources, 3);
    assert_eq!(health.enumeration_strategy, "indexed");
}

#[tokio::test]
async fn test_concurrent_decisions_during_reload() {
    let state = create_test_app_state().await;
    let decisions = (0..32).map(|i| {
        let state = state.clone();
        async move {
            let role = if i % 2 == 0 { "professeur" } else { "etudiant" };
            let req = json_request(
                "POST",
                "/isAuthorized",
                json!({
                    "subject": {"class": "Person", "role": role},
                    "resource": {"id": "dip-1"},
                    "operation": "lire"
                }),
            );
            let body: DecisionResponse = read_json(app(state).oneshot(req).await.unwrap()).await;
            (role, body)
        }
    });
    let reload = {
        let state = state.clone();
        async move {
            let req = json_request("PUT", "/policies", json!([]));
            app(state).oneshot(req).await.unwrap().status()
        }
    };

    let (results, status) = futures::join!(futures::future::join_all(decisions), reload);
    assert_eq!(status, StatusCode::OK);
    for (role, body) in results {
        // Version 1 has the professeur rule, version 2 has no rules at all.
        let expected = role == "professeur" && body.policy_version == 1;
        assert_eq!(body.authorized, expected);
    }
}
