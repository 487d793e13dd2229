mod common;

use common::{casual_user, super_user, TestApp};
use serde_json::{json, Value};

async fn reservation_payment(app: &TestApp, token: &str) -> (i64, i64) {
    let area_id = app.create_area("Piscina", 50.0).await;
    let bundle = app.create_reservation(token, area_id).await;
    (
        bundle["reserva"]["id"].as_i64().unwrap(),
        bundle["pago"]["id"].as_i64().unwrap(),
    )
}

#[tokio::test]
async fn confirming_a_payment_confirms_the_reservation_and_issues_one_invoice() {
    let app = TestApp::spawn().await;
    let token = casual_user("10");
    let (reservation_id, payment_id) = reservation_payment(&app, &token).await;
    let confirm_url = app.url(&format!("/api/pago-reserva/confirmar/{}", payment_id));

    let response = app
        .client
        .post(&confirm_url)
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["estado"], "ACCEPTED");
    assert!(body["data"]["fechaPago"].is_string());
    let invoice_number = body["data"]["factura"]["numeroFactura"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(invoice_number.starts_with("FAC-"));

    // A second confirmation is a no-op
    let again: Value = app
        .client
        .post(&confirm_url)
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["data"]["factura"]["numeroFactura"], invoice_number);

    let invoices: Vec<Value> = app
        .client
        .get(app.url("/api/factura"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);

    let reservation: Value = app
        .client
        .get(app.url(&format!("/api/reserva/{}", reservation_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reservation["estado"], "CONFIRMED");
}

#[tokio::test]
async fn confirming_an_unknown_payment_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/api/pago-reserva/confirmar/999"))
        .bearer_auth(super_user())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn qr_payment_is_generated_and_confirmed_once() {
    let app = TestApp::spawn().await;
    let token = casual_user("10");
    let (reservation_id, _) = reservation_payment(&app, &token).await;

    let response = app
        .client
        .post(app.url(&format!("/api/pago-reserva/qr/generar/{}", reservation_id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let generated: Value = response.json().await.unwrap();
    let data = &generated["data"];
    assert!(data["referenciaPago"]
        .as_str()
        .unwrap()
        .starts_with(&format!("REF-{}-", reservation_id)));
    assert_eq!(data["instrucciones"].as_array().unwrap().len(), 4);
    assert_eq!(data["nit"], "1234567890123");
    let payment_id = data["pagoId"].as_i64().unwrap();
    let confirm_url = app.url(&format!("/api/pago-reserva/qr/confirmar/{}", payment_id));

    let confirmed: Value = app
        .client
        .post(&confirm_url)
        .bearer_auth(&token)
        .json(&json!({ "referenciaPago": "BNB-778812" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(confirmed["data"]["estado"], "ACCEPTED");
    assert_eq!(confirmed["data"]["referenciaPago"], "BNB-778812");

    let again = app
        .client
        .post(&confirm_url)
        .bearer_auth(&token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 400);
}

#[tokio::test]
async fn automatic_payment_needs_a_positive_amount() {
    let app = TestApp::spawn().await;
    let (reservation_id, _) = reservation_payment(&app, &casual_user("10")).await;

    let rejected = app
        .client
        .post(app.url(&format!("/api/pago-reserva/automatico/{}/0", reservation_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);

    let created = app
        .client
        .post(app.url(&format!(
            "/api/pago-reserva/automatico/{}/75.50",
            reservation_id
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let payment: Value = created.json().await.unwrap();
    assert_eq!(payment["metodo"], "AUTOMATICO");
    assert_eq!(payment["monto"].as_f64(), Some(75.5));

    let latest: Value = app
        .client
        .get(app.url(&format!("/api/pago-reserva/reserva/{}", reservation_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["id"], payment["id"]);
}

#[tokio::test]
async fn payment_status_reports_the_invoice_file() {
    let app = TestApp::spawn().await;
    let token = casual_user("10");
    let (_, payment_id) = reservation_payment(&app, &token).await;

    app.client
        .post(app.url(&format!("/api/pago-reserva/confirmar/{}", payment_id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    let status: Value = app
        .client
        .get(app.url(&format!("/api/pago-reserva/{}/estado", payment_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["pago"]["estado"], "ACCEPTED");
    assert_eq!(status["factura"]["archivoExiste"], true);
}
