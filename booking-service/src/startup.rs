//! Application startup and lifecycle management.

use crate::config::{BookingConfig, RepositoryBackend};
use crate::handlers::{self, areas, audit, blocks, confirmations, invoices, payments, reservations, stripe};
use crate::middleware::{identify, require_admin, require_super_user, Authenticator};
use crate::services::{
    AuditService, BookingRepository, CheckoutService, DocumentRenderer, InMemoryRepository,
    InvoiceService, LocalStorage, PaymentService, PdfInvoiceRenderer, PgRepository,
    ReservationService, Storage, StripeClient,
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BookingConfig,
    pub repo: Arc<dyn BookingRepository>,
    pub reservations: ReservationService,
    pub payments: PaymentService,
    pub invoices: InvoiceService,
    pub checkout: CheckoutService,
    pub audit: AuditService,
    pub authenticator: Arc<Authenticator>,
}

impl AppState {
    pub async fn new(
        config: BookingConfig,
        repo: Arc<dyn BookingRepository>,
    ) -> Result<Self, AppError> {
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(&config.invoices.directory)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize invoice storage at {}: {}",
                        config.invoices.directory.display(),
                        e
                    );
                    e
                })?,
        );
        let renderer: Arc<dyn DocumentRenderer> = Arc::new(PdfInvoiceRenderer::new());

        let invoices = InvoiceService::new(
            repo.clone(),
            storage,
            renderer,
            config.issuer.clone(),
            config.invoices.number_prefix.clone(),
        );
        let payments =
            PaymentService::new(repo.clone(), invoices.clone(), config.qr_payment.clone());

        let stripe_client = StripeClient::new(config.stripe.clone());
        if stripe_client.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - checkout endpoints are disabled");
        }
        let checkout = CheckoutService::new(
            repo.clone(),
            stripe_client,
            payments.clone(),
            invoices.clone(),
        );
        let reservations = ReservationService::new(repo.clone(), checkout.clone());

        Ok(Self {
            authenticator: Arc::new(Authenticator::new(&config.auth)),
            audit: AuditService::new(repo.clone()),
            config,
            repo,
            reservations,
            payments,
            invoices,
            checkout,
        })
    }
}

async fn connect_repository(config: &BookingConfig) -> Result<Arc<dyn BookingRepository>, AppError> {
    match config.database.backend {
        RepositoryBackend::Postgres => {
            let repo = PgRepository::connect(
                config.database.url.expose_secret(),
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to PostgreSQL: {}", e);
                e
            })?;
            if config.database.run_migrations {
                repo.run_migrations().await?;
            }
            Ok(Arc::new(repo))
        }
        RepositoryBackend::Memory => {
            tracing::warn!("Using in-memory repository - data is lost on restart");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}

fn cors_layer(config: &BookingConfig) -> CorsLayer {
    let origin = config
        .stripe
        .frontend_url
        .parse::<HeaderValue>()
        .unwrap_or_else(|e| {
            tracing::error!(
                "Invalid CORS origin '{}': {}. Using fallback.",
                config.stripe.frontend_url,
                e
            );
            HeaderValue::from_static("*")
        });

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(crate::middleware::auth::USER_ID_HEADER),
            HeaderName::from_static(crate::middleware::auth::USER_NAME_HEADER),
            HeaderName::from_static(crate::middleware::auth::USER_EMAIL_HEADER),
            HeaderName::from_static(crate::middleware::auth::USER_ROLE_HEADER),
        ])
        .expose_headers([header::CONTENT_DISPOSITION])
}

/// Full HTTP surface of the service.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Areas
        .route(
            "/api/booking",
            post(areas::create_area).get(areas::list_areas),
        )
        .route(
            "/api/booking/:id",
            get(areas::get_area)
                .put(areas::update_area)
                .delete(areas::delete_area),
        )
        // Blocks
        .route(
            "/api/bloqueo",
            post(blocks::create_block).get(blocks::list_blocks),
        )
        .route(
            "/api/bloqueo/:id",
            get(blocks::get_block)
                .put(blocks::update_block)
                .delete(blocks::delete_block),
        )
        // Confirmations
        .route(
            "/api/confirmacion",
            post(confirmations::create_confirmation).get(confirmations::list_confirmations),
        )
        .route(
            "/api/confirmacion/:id",
            get(confirmations::get_confirmation)
                .put(confirmations::update_confirmation)
                .delete(confirmations::delete_confirmation),
        )
        .route(
            "/api/confirmacion/:id/verificar",
            axum::routing::put(confirmations::verify_confirmation),
        )
        .route(
            "/api/confirmacion/:id/cancelar",
            axum::routing::put(confirmations::cancel_confirmation),
        )
        // Reservations
        .route(
            "/api/reserva",
            post(reservations::create_reservation).get(reservations::list_reservations),
        )
        .route(
            "/api/reserva/with-stripe",
            post(reservations::create_reservation_with_stripe),
        )
        .route(
            "/api/reserva/reportes/ingresos",
            get(reservations::income_report),
        )
        .route(
            "/api/reserva/:id",
            get(reservations::get_reservation)
                .put(reservations::update_reservation)
                .merge(
                    delete(reservations::delete_reservation)
                        .route_layer(from_fn(require_super_user)),
                ),
        )
        .route(
            "/api/reserva/:id/with-factura",
            get(reservations::get_reservation_with_invoice),
        )
        // Payments
        .route(
            "/api/pago-reserva",
            post(payments::create_payment).get(payments::list_payments),
        )
        .route(
            "/api/pago-reserva/:id",
            get(payments::get_payment)
                .patch(payments::update_payment)
                .delete(payments::delete_payment),
        )
        .route("/api/pago-reserva/:id/estado", get(payments::payment_status))
        .route(
            "/api/pago-reserva/reserva/:id",
            get(payments::payment_by_reservation),
        )
        .route(
            "/api/pago-reserva/automatico/:id/:monto",
            post(payments::create_automatic_payment),
        )
        .route(
            "/api/pago-reserva/confirmar/:id",
            post(payments::confirm_payment),
        )
        .route(
            "/api/pago-reserva/qr/generar/:id",
            post(payments::generate_qr_payment),
        )
        .route(
            "/api/pago-reserva/qr/confirmar/:id",
            post(payments::confirm_qr_payment),
        )
        // Invoices
        .route("/api/factura", get(invoices::list_invoices))
        .route("/api/factura/generar/:id", post(invoices::generate_invoice))
        .route(
            "/api/factura/automatica/:id",
            post(invoices::generate_automatic_invoice),
        )
        .route("/api/factura/:id", get(invoices::get_invoice))
        .route("/api/factura/:id/descargar", get(invoices::download_invoice))
        .route(
            "/api/factura/:id/regenerar-pdf",
            post(invoices::regenerate_invoice_document),
        )
        .route(
            "/api/factura/debug/archivos-pdf",
            get(invoices::list_stored_files),
        )
        .route(
            "/api/factura/debug/info-facturas",
            get(invoices::invoice_file_report),
        )
        .route(
            "/api/factura/debug/descargar/:nombre",
            get(invoices::download_stored_file),
        )
        // Stripe
        .route(
            "/api/stripe/create-checkout-session",
            post(stripe::create_checkout_session),
        )
        .route("/api/stripe/verify-session/:id", get(stripe::verify_session))
        .route("/api/stripe/webhook", post(stripe::webhook))
        .route(
            "/api/stripe/generate-invoice/:id",
            post(stripe::generate_session_invoice),
        )
        // Audit
        .route(
            "/api/auditoria/logs",
            get(audit::list_audit_logs).route_layer(from_fn(require_admin)),
        )
        .layer(from_fn_with_state(state.authenticator.clone(), identify));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(api)
        .with_state(state.clone())
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BookingConfig) -> Result<Self, AppError> {
        let repo = connect_repository(&config).await?;
        Self::build_with_repository(config, repo).await
    }

    /// Build the application on top of an already constructed repository.
    pub async fn build_with_repository(
        config: BookingConfig,
        repo: Arc<dyn BookingRepository>,
    ) -> Result<Self, AppError> {
        let state = AppState::new(config.clone(), repo).await?;
        let app = router(state.clone());

        // Port 0 binds a random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("{} listening on port {}", config.service_name, port);

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        );

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}
