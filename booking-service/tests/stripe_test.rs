mod common;

use booking_service::services::stripe::signature_header;
use common::{casual_user, TestApp, WEBHOOK_SECRET};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completed_event(reservation_id: i64, payment_id: Option<i64>) -> Vec<u8> {
    let mut metadata = json!({ "reservaId": reservation_id.to_string() });
    if let Some(payment_id) = payment_id {
        metadata["pagoId"] = json!(payment_id.to_string());
    }
    serde_json::to_vec(&json!({
        "id": "evt_test_1",
        "type": "checkout.session.completed",
        "created": chrono::Utc::now().timestamp(),
        "data": {
            "object": {
                "id": "cs_test_1",
                "payment_status": "paid",
                "status": "complete",
                "amount_total": 10000,
                "currency": "usd",
                "metadata": metadata
            }
        }
    }))
    .unwrap()
}

async fn pending_reservation(app: &TestApp) -> (i64, i64) {
    let area_id = app.create_area("Piscina", 50.0).await;
    let bundle = app.create_reservation(&casual_user("10"), area_id).await;
    (
        bundle["reserva"]["id"].as_i64().unwrap(),
        bundle["pago"]["id"].as_i64().unwrap(),
    )
}

async fn payment_state(app: &TestApp, payment_id: i64) -> Value {
    app.client
        .get(app.url(&format!("/api/pago-reserva/{}", payment_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn signed_completed_session_confirms_the_carried_payment() {
    let app = TestApp::spawn().await;
    let (reservation_id, payment_id) = pending_reservation(&app).await;

    let body = completed_event(reservation_id, Some(payment_id));
    let signature = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &body);

    let response = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .header("stripe-signature", signature)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["received"], true);

    let payment = payment_state(&app, payment_id).await;
    assert_eq!(payment["estado"], "ACCEPTED");
    assert!(payment["factura"]["numeroFactura"].is_string());
    assert_eq!(payment["reserva"]["estado"], "CONFIRMED");
}

#[tokio::test]
async fn completed_session_without_payment_id_uses_the_pending_payment() {
    let app = TestApp::spawn().await;
    let (reservation_id, payment_id) = pending_reservation(&app).await;

    let body = completed_event(reservation_id, None);
    let signature = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &body);

    let response = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .header("stripe-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(payment_state(&app, payment_id).await["estado"], "ACCEPTED");
}

#[tokio::test]
async fn tampered_webhook_is_rejected_and_not_processed() {
    let app = TestApp::spawn().await;
    let (reservation_id, payment_id) = pending_reservation(&app).await;

    let body = completed_event(reservation_id, Some(payment_id));
    let signature = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &body);
    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");

    let response = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .header("stripe-signature", signature)
        .body(tampered)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(payment_state(&app, payment_id).await["estado"], "PENDING");
}

#[tokio::test]
async fn stale_or_missing_signatures_are_rejected() {
    let app = TestApp::spawn().await;
    let (reservation_id, payment_id) = pending_reservation(&app).await;
    let body = completed_event(reservation_id, Some(payment_id));

    let missing = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    let stale = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp() - 3600, &body);
    let response = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .header("stripe-signature", stale)
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let extreme = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .header("stripe-signature", format!("t={},v1=00", i64::MIN))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(extreme.status(), 400);
    assert_eq!(payment_state(&app, payment_id).await["estado"], "PENDING");
}

#[tokio::test]
async fn other_events_are_acknowledged_without_changes() {
    let app = TestApp::spawn().await;
    let (_, payment_id) = pending_reservation(&app).await;

    let body = serde_json::to_vec(&json!({
        "id": "evt_test_2",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_test_1" } }
    }))
    .unwrap();
    let signature = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), &body);

    let response = app
        .client
        .post(app.url("/api/stripe/webhook"))
        .header("stripe-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(payment_state(&app, payment_id).await["estado"], "PENDING");
}

#[tokio::test]
async fn checkout_session_is_created_for_the_pending_payment() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("metadata%5BpagoId%5D"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_abc",
            "url": "https://checkout.stripe.com/c/pay/cs_test_abc",
            "status": "open",
            "payment_status": "unpaid",
            "amount_total": 10000,
            "currency": "usd",
            "metadata": {}
        })))
        .expect(1)
        .mount(&stripe)
        .await;

    let app = TestApp::spawn_with_stripe(Some(stripe.uri())).await;
    let (reservation_id, payment_id) = pending_reservation(&app).await;

    let response = app
        .client
        .post(app.url("/api/stripe/create-checkout-session"))
        .bearer_auth(casual_user("10"))
        .json(&json!({
            "reservaId": reservation_id,
            "descripcion": "Reserva de Piscina"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["sessionId"], "cs_test_abc");
    assert_eq!(
        body["checkoutUrl"],
        "https://checkout.stripe.com/c/pay/cs_test_abc"
    );
    assert_eq!(body["pagoId"].as_i64(), Some(payment_id));
}

#[tokio::test]
async fn checkout_amount_override_updates_the_pending_payment() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains(
            "line_items%5B0%5D%5Bprice_data%5D%5Bunit_amount%5D=7550",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_override",
            "url": "https://checkout.stripe.com/c/pay/cs_test_override",
            "metadata": {}
        })))
        .expect(1)
        .mount(&stripe)
        .await;

    let app = TestApp::spawn_with_stripe(Some(stripe.uri())).await;
    let (reservation_id, payment_id) = pending_reservation(&app).await;

    let response = app
        .client
        .post(app.url("/api/stripe/create-checkout-session"))
        .bearer_auth(casual_user("10"))
        .json(&json!({
            "reservaId": reservation_id,
            "monto": 75.50,
            "descripcion": "Reserva de Piscina"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pagoId"].as_i64(), Some(payment_id));

    let payment = payment_state(&app, payment_id).await;
    assert_eq!(payment["monto"].as_f64(), Some(75.5));
    assert_eq!(payment["estado"], "PENDING");
}

#[tokio::test]
async fn checkout_is_unavailable_without_stripe_keys() {
    let app = TestApp::spawn().await;
    let (reservation_id, _) = pending_reservation(&app).await;

    let response = app
        .client
        .post(app.url("/api/stripe/create-checkout-session"))
        .bearer_auth(casual_user("10"))
        .json(&json!({ "reservaId": reservation_id, "descripcion": "Reserva" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    let area_id = app.create_area("Cancha", 10.0).await;
    let with_stripe = app
        .client
        .post(app.url("/api/reserva/with-stripe"))
        .bearer_auth(casual_user("10"))
        .json(&json!({
            "areaId": area_id,
            "inicio": "2030-05-10T10:00:00Z",
            "fin": "2030-05-10T11:00:00Z"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(with_stripe.status(), 503);
}
