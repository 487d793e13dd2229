#![allow(dead_code)]

use booking_service::config::{
    AuthConfig, BookingConfig, DatabaseConfig, InvoiceConfig, IssuerConfig, QrPaymentConfig,
    RepositoryBackend, StripeConfig,
};
use booking_service::startup::{AppState, Application};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use secrecy::Secret;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: Client,
    pub state: AppState,
    // Keeps the invoice directory alive for the lifetime of the test
    _invoice_dir: TempDir,
}

pub fn test_config(invoice_dir: &TempDir, stripe_api_base: Option<String>) -> BookingConfig {
    let stripe_configured = stripe_api_base.is_some();
    BookingConfig {
        common: service_core::config::Config {
            port: 0, // Random port
            ..Default::default()
        },
        database: DatabaseConfig {
            backend: RepositoryBackend::Memory,
            url: Secret::new(String::new()),
            max_connections: 1,
            min_connections: 1,
            run_migrations: false,
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(JWT_SECRET.to_string()),
            trust_gateway_headers: true,
        },
        stripe: StripeConfig {
            secret_key: Secret::new(if stripe_configured {
                "sk_test_123".to_string()
            } else {
                String::new()
            }),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: stripe_api_base.unwrap_or_else(|| "http://127.0.0.1:9".to_string()),
            frontend_url: "http://localhost:5173".to_string(),
            currency: "usd".to_string(),
            webhook_tolerance_secs: 300,
        },
        invoices: InvoiceConfig {
            directory: invoice_dir.path().to_path_buf(),
            number_prefix: "FAC".to_string(),
        },
        issuer: IssuerConfig::default(),
        qr_payment: QrPaymentConfig::default(),
        service_name: "booking-service".to_string(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_stripe(None).await
    }

    /// Spawns the service with Stripe pointed at `api_base` (a mock server) when given.
    pub async fn spawn_with_stripe(api_base: Option<String>) -> Self {
        let invoice_dir = tempfile::tempdir().expect("Failed to create invoice dir");
        let config = test_config(&invoice_dir, api_base);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let state = app.state();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{}/health", address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            address,
            port,
            client,
            state,
            _invoice_dir: invoice_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Creates an area through the API and returns its id.
    pub async fn create_area(&self, name: &str, hourly_rate: f64) -> i64 {
        let response = self
            .client
            .post(self.url("/api/booking"))
            .json(&json!({
                "nombre": name,
                "descripcion": "Área de prueba",
                "capacidad": 20,
                "costoHora": hourly_rate
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["id"].as_i64().expect("area id")
    }

    /// Creates a two-hour reservation for `token`'s user and returns the bundle.
    pub async fn create_reservation(&self, token: &str, area_id: i64) -> Value {
        let response = self
            .client
            .post(self.url("/api/reserva"))
            .bearer_auth(token)
            .json(&json!({
                "areaId": area_id,
                "inicio": "2030-05-10T10:00:00Z",
                "fin": "2030-05-10T12:00:00Z"
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 201);
        response.json().await.expect("Failed to parse JSON")
    }
}

/// HS256 token accepted by the service.
pub fn token(id: &str, name: &str, role: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    encode(
        &Header::default(),
        &json!({
            "sub": id,
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "role": role,
            "exp": exp
        }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode token")
}

pub fn super_user() -> String {
    token("1", "Admin", "SUPER_USER")
}

pub fn casual_user(id: &str) -> String {
    token(id, "Vecino", "USER_CASUAL")
}
