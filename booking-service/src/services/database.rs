//! Postgres-backed [`BookingRepository`].

use anyhow::anyhow;
use async_trait::async_trait;
use prometheus::HistogramTimer;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::models::{
    confirmation_code, payment_reference, Area, AreaChanges, AuditEntry, AuditFilter, Block,
    BlockChanges, ClientInfo, Confirmation, ConfirmationChanges, Invoice, InvoiceStatus,
    NewArea, NewAuditEntry, NewBlock, NewConfirmation, NewInvoice, NewPayment, NewReservation,
    Payment, PaymentAcceptance, PaymentChanges, PaymentStatus, Reservation, ReservationBundle,
    ReservationChanges, ReservationStatus, VerificationStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{AreaIncome, BookingRepository};

const AREA_COLUMNS: &str =
    "id, name, description, capacity, hourly_rate, active, created_at, updated_at";
const BLOCK_COLUMNS: &str = "id, area_id, starts_at, ends_at, reason, created_at";
const RESERVATION_COLUMNS: &str = "id, area_id, starts_at, ends_at, cost, user_id, user_name, \
     user_role, status, created_at, updated_at";
const CONFIRMATION_COLUMNS: &str = "id, reservation_id, qr_code, issued_at, status";
const PAYMENT_COLUMNS: &str = "id, reservation_id, method, amount, status, paid_at, \
     transaction_id, reference, qr_code, qr_url, user_id, user_name, created_at";
const INVOICE_COLUMNS: &str = "id, number, payment_id, issuer_nit, issuer_legal_name, \
     authorization_number, issuer_address, issuer_phone, branch, municipality, \
     economic_activity, client_name, client_email, client_document, client_complement, \
     control_code, issued_at, issue_deadline, subtotal, discount, gift_card_amount, total, \
     currency, exchange_rate, legend, qr_data_url, verification_url, file_path, file_hash, \
     created_by, status, created_at";
const AUDIT_COLUMNS: &str = "id, user_id, user_name, user_role, action, table_name, record_id, \
     previous_data, new_data, ip, user_agent, endpoint, method, request_id, created_at";

fn timer(operation: &str) -> HistogramTimer {
    DB_QUERY_DURATION
        .with_label_values(&[operation])
        .start_timer()
}

fn failed(action: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow!("Failed to {}: {}", action, e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    #[instrument(skip(database_url), fields(service = "booking-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_invoice_update(
        &self,
        id: i64,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, Invoice, sqlx::postgres::PgArguments>,
    ) -> Result<Invoice, AppError> {
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(failed("update invoice"))?
            .ok_or_else(|| AppError::NotFound(anyhow!("Factura {} no encontrada", id)))
    }
}

#[async_trait]
impl BookingRepository for PgRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Areas
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_area(&self, input: NewArea) -> Result<Area, AppError> {
        let _timer = timer("create_area");
        let area = sqlx::query_as::<_, Area>(&format!(
            "INSERT INTO areas (name, description, capacity, hourly_rate, active) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            AREA_COLUMNS
        ))
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.capacity)
        .bind(input.hourly_rate)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await
        .map_err(failed("create area"))?;

        info!(area_id = area.id, "Area created");
        Ok(area)
    }

    async fn list_areas(&self) -> Result<Vec<Area>, AppError> {
        let _timer = timer("list_areas");
        sqlx::query_as::<_, Area>(&format!("SELECT {} FROM areas ORDER BY id", AREA_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(failed("list areas"))
    }

    async fn find_area(&self, id: i64) -> Result<Option<Area>, AppError> {
        let _timer = timer("find_area");
        sqlx::query_as::<_, Area>(&format!("SELECT {} FROM areas WHERE id = $1", AREA_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(failed("get area"))
    }

    #[instrument(skip(self, changes))]
    async fn update_area(&self, id: i64, changes: AreaChanges) -> Result<Option<Area>, AppError> {
        let _timer = timer("update_area");
        sqlx::query_as::<_, Area>(&format!(
            "UPDATE areas SET name = COALESCE($2, name), \
             description = COALESCE($3, description), \
             capacity = COALESCE($4, capacity), \
             hourly_rate = COALESCE($5, hourly_rate), \
             active = COALESCE($6, active), \
             updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            AREA_COLUMNS
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.description)
        .bind(changes.capacity)
        .bind(changes.hourly_rate)
        .bind(changes.active)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("update area"))
    }

    #[instrument(skip(self))]
    async fn delete_area(&self, id: i64) -> Result<bool, AppError> {
        let _timer = timer("delete_area");
        let result = sqlx::query("DELETE FROM areas WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::Conflict(anyhow!(
                        "El área {} tiene reservas o bloqueos asociados",
                        id
                    ))
                } else {
                    failed("delete area")(e)
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Blocks
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(area_id = input.area_id))]
    async fn create_block(&self, input: NewBlock) -> Result<Block, AppError> {
        let _timer = timer("create_block");
        sqlx::query_as::<_, Block>(&format!(
            "INSERT INTO blocks (area_id, starts_at, ends_at, reason) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            BLOCK_COLUMNS
        ))
        .bind(input.area_id)
        .bind(input.starts_at)
        .bind(input.ends_at)
        .bind(&input.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow!("Área {} no encontrada", input.area_id))
            } else {
                failed("create block")(e)
            }
        })
    }

    async fn list_blocks(&self) -> Result<Vec<Block>, AppError> {
        let _timer = timer("list_blocks");
        sqlx::query_as::<_, Block>(&format!(
            "SELECT {} FROM blocks ORDER BY starts_at, id",
            BLOCK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list blocks"))
    }

    async fn find_block(&self, id: i64) -> Result<Option<Block>, AppError> {
        let _timer = timer("find_block");
        sqlx::query_as::<_, Block>(&format!(
            "SELECT {} FROM blocks WHERE id = $1",
            BLOCK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get block"))
    }

    async fn update_block(
        &self,
        id: i64,
        changes: BlockChanges,
    ) -> Result<Option<Block>, AppError> {
        let _timer = timer("update_block");
        sqlx::query_as::<_, Block>(&format!(
            "UPDATE blocks SET area_id = COALESCE($2, area_id), \
             starts_at = COALESCE($3, starts_at), \
             ends_at = COALESCE($4, ends_at), \
             reason = COALESCE($5, reason) \
             WHERE id = $1 RETURNING {}",
            BLOCK_COLUMNS
        ))
        .bind(id)
        .bind(changes.area_id)
        .bind(changes.starts_at)
        .bind(changes.ends_at)
        .bind(changes.reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("update block"))
    }

    async fn delete_block(&self, id: i64) -> Result<bool, AppError> {
        let _timer = timer("delete_block");
        let result = sqlx::query("DELETE FROM blocks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(failed("delete block"))?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Reservations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(area_id = input.area_id))]
    async fn create_reservation_bundle(
        &self,
        input: NewReservation,
        payment_method: &str,
    ) -> Result<ReservationBundle, AppError> {
        let _timer = timer("create_reservation_bundle");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(failed("begin transaction"))?;

        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            "INSERT INTO reservations \
             (area_id, starts_at, ends_at, cost, user_id, user_name, user_role, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            RESERVATION_COLUMNS
        ))
        .bind(input.area_id)
        .bind(input.starts_at)
        .bind(input.ends_at)
        .bind(input.cost)
        .bind(&input.user_id)
        .bind(&input.user_name)
        .bind(&input.user_role)
        .bind(input.status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow!("Área {} no encontrada", input.area_id))
            } else {
                failed("create reservation")(e)
            }
        })?;

        let now = reservation.created_at;
        let confirmation = sqlx::query_as::<_, Confirmation>(&format!(
            "INSERT INTO confirmations (reservation_id, qr_code, issued_at, status) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            CONFIRMATION_COLUMNS
        ))
        .bind(reservation.id)
        .bind(confirmation_code(reservation.id, now))
        .bind(now)
        .bind(VerificationStatus::Pending)
        .fetch_one(&mut *tx)
        .await
        .map_err(failed("create confirmation"))?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
             (reservation_id, method, amount, status, reference, user_id, user_name) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(reservation.id)
        .bind(payment_method)
        .bind(reservation.cost)
        .bind(PaymentStatus::Pending)
        .bind(payment_reference(reservation.id, now))
        .bind(&input.user_id)
        .bind(&input.user_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(failed("create payment"))?;

        tx.commit().await.map_err(failed("commit transaction"))?;

        info!(
            reservation_id = reservation.id,
            confirmation_id = confirmation.id,
            payment_id = payment.id,
            "Reservation bundle created"
        );

        Ok(ReservationBundle {
            reservation,
            confirmation,
            payment,
        })
    }

    async fn list_reservations(&self, owner: Option<&str>) -> Result<Vec<Reservation>, AppError> {
        let _timer = timer("list_reservations");
        sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {} FROM reservations \
             WHERE ($1::varchar IS NULL OR user_id = $1) ORDER BY id",
            RESERVATION_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list reservations"))
    }

    async fn find_reservation(&self, id: i64) -> Result<Option<Reservation>, AppError> {
        let _timer = timer("find_reservation");
        sqlx::query_as::<_, Reservation>(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get reservation"))
    }

    #[instrument(skip(self, changes))]
    async fn update_reservation(
        &self,
        id: i64,
        changes: ReservationChanges,
    ) -> Result<Option<Reservation>, AppError> {
        let _timer = timer("update_reservation");
        sqlx::query_as::<_, Reservation>(&format!(
            "UPDATE reservations SET area_id = COALESCE($2, area_id), \
             starts_at = COALESCE($3, starts_at), \
             ends_at = COALESCE($4, ends_at), \
             cost = COALESCE($5, cost), \
             status = COALESCE($6, status), \
             updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .bind(changes.area_id)
        .bind(changes.starts_at)
        .bind(changes.ends_at)
        .bind(changes.cost)
        .bind(changes.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("update reservation"))
    }

    async fn set_reservation_status(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Option<Reservation>, AppError> {
        self.update_reservation(
            id,
            ReservationChanges {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_reservation_cascade(&self, id: i64) -> Result<bool, AppError> {
        let _timer = timer("delete_reservation_cascade");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(failed("begin transaction"))?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(failed("lock reservation"))?;

        if exists.is_none() {
            tx.rollback().await.ok();
            return Ok(false);
        }

        let invoices = sqlx::query(
            "DELETE FROM invoices WHERE payment_id IN \
             (SELECT id FROM payments WHERE reservation_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(failed("delete invoices"))?;

        let payments = sqlx::query("DELETE FROM payments WHERE reservation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(failed("delete payments"))?;

        sqlx::query("DELETE FROM confirmations WHERE reservation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(failed("delete confirmation"))?;

        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(failed("delete reservation"))?;

        tx.commit().await.map_err(failed("commit transaction"))?;

        info!(
            reservation_id = id,
            invoices = invoices.rows_affected(),
            payments = payments.rows_affected(),
            "Reservation deleted with dependents"
        );
        Ok(true)
    }

    async fn income_by_area(&self) -> Result<Vec<AreaIncome>, AppError> {
        let _timer = timer("income_by_area");
        let rows = sqlx::query_as::<_, (i64, String, Decimal, i64)>(
            "SELECT a.id, a.name, COALESCE(SUM(p.amount), 0), COUNT(DISTINCT p.reservation_id) \
             FROM areas a \
             LEFT JOIN reservations r ON r.area_id = a.id \
             LEFT JOIN payments p ON p.reservation_id = r.id AND p.status = 'ACCEPTED' \
             GROUP BY a.id, a.name ORDER BY a.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(failed("compute income"))?;

        Ok(rows
            .into_iter()
            .map(|(area_id, area_name, total_income, reservation_count)| {
                let average_income = if reservation_count > 0 {
                    (total_income / Decimal::from(reservation_count)).round_dp(2)
                } else {
                    Decimal::ZERO
                };
                AreaIncome {
                    area_id,
                    area_name,
                    total_income,
                    reservation_count,
                    average_income,
                }
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Confirmations
    // -------------------------------------------------------------------------

    async fn create_confirmation(
        &self,
        input: NewConfirmation,
    ) -> Result<Confirmation, AppError> {
        let _timer = timer("create_confirmation");
        sqlx::query_as::<_, Confirmation>(&format!(
            "INSERT INTO confirmations (reservation_id, qr_code, issued_at, status) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            CONFIRMATION_COLUMNS
        ))
        .bind(input.reservation_id)
        .bind(&input.qr_code)
        .bind(input.issued_at)
        .bind(input.status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow!(
                    "La reserva {} ya tiene confirmación",
                    input.reservation_id
                ))
            } else if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow!("Reserva {} no encontrada", input.reservation_id))
            } else {
                failed("create confirmation")(e)
            }
        })
    }

    async fn list_confirmations(&self) -> Result<Vec<Confirmation>, AppError> {
        let _timer = timer("list_confirmations");
        sqlx::query_as::<_, Confirmation>(&format!(
            "SELECT {} FROM confirmations ORDER BY id",
            CONFIRMATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list confirmations"))
    }

    async fn find_confirmation(&self, id: i64) -> Result<Option<Confirmation>, AppError> {
        let _timer = timer("find_confirmation");
        sqlx::query_as::<_, Confirmation>(&format!(
            "SELECT {} FROM confirmations WHERE id = $1",
            CONFIRMATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get confirmation"))
    }

    async fn find_confirmation_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Confirmation>, AppError> {
        let _timer = timer("find_confirmation_by_reservation");
        sqlx::query_as::<_, Confirmation>(&format!(
            "SELECT {} FROM confirmations WHERE reservation_id = $1",
            CONFIRMATION_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get confirmation"))
    }

    async fn update_confirmation(
        &self,
        id: i64,
        changes: ConfirmationChanges,
    ) -> Result<Option<Confirmation>, AppError> {
        let _timer = timer("update_confirmation");
        sqlx::query_as::<_, Confirmation>(&format!(
            "UPDATE confirmations SET qr_code = COALESCE($2, qr_code), \
             issued_at = COALESCE($3, issued_at), \
             status = COALESCE($4, status) \
             WHERE id = $1 RETURNING {}",
            CONFIRMATION_COLUMNS
        ))
        .bind(id)
        .bind(changes.qr_code)
        .bind(changes.issued_at)
        .bind(changes.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("update confirmation"))
    }

    async fn set_confirmation_status(
        &self,
        id: i64,
        status: VerificationStatus,
    ) -> Result<Option<Confirmation>, AppError> {
        self.update_confirmation(
            id,
            ConfirmationChanges {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    async fn delete_confirmation(&self, id: i64) -> Result<bool, AppError> {
        let _timer = timer("delete_confirmation");
        let result = sqlx::query("DELETE FROM confirmations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(failed("delete confirmation"))?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(reservation_id = input.reservation_id))]
    async fn create_payment(&self, input: NewPayment) -> Result<Payment, AppError> {
        let _timer = timer("create_payment");
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
             (reservation_id, method, amount, status, transaction_id, reference, qr_code, \
              qr_url, user_id, user_name) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(input.reservation_id)
        .bind(&input.method)
        .bind(input.amount)
        .bind(input.status)
        .bind(&input.transaction_id)
        .bind(&input.reference)
        .bind(&input.qr_code)
        .bind(&input.qr_url)
        .bind(&input.user_id)
        .bind(&input.user_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow!("Reserva {} no encontrada", input.reservation_id))
            } else {
                failed("create payment")(e)
            }
        })
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        let _timer = timer("list_payments");
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments ORDER BY id",
            PAYMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list payments"))
    }

    async fn find_payment(&self, id: i64) -> Result<Option<Payment>, AppError> {
        let _timer = timer("find_payment");
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get payment"))
    }

    async fn list_payments_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Vec<Payment>, AppError> {
        let _timer = timer("list_payments_by_reservation");
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE reservation_id = $1 \
             ORDER BY created_at DESC, id DESC",
            PAYMENT_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list payments"))
    }

    async fn first_pending_payment(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Payment>, AppError> {
        let _timer = timer("first_pending_payment");
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE reservation_id = $1 AND status = 'PENDING' \
             ORDER BY created_at, id LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get pending payment"))
    }

    async fn update_payment(
        &self,
        id: i64,
        changes: PaymentChanges,
    ) -> Result<Option<Payment>, AppError> {
        let _timer = timer("update_payment");
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET method = COALESCE($2, method), \
             amount = COALESCE($3, amount), \
             reference = COALESCE($4, reference), \
             qr_code = COALESCE($5, qr_code), \
             qr_url = COALESCE($6, qr_url), \
             transaction_id = COALESCE($7, transaction_id) \
             WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(changes.method)
        .bind(changes.amount)
        .bind(changes.reference)
        .bind(changes.qr_code)
        .bind(changes.qr_url)
        .bind(changes.transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("update payment"))
    }

    #[instrument(skip(self, acceptance))]
    async fn accept_payment(
        &self,
        id: i64,
        acceptance: PaymentAcceptance,
    ) -> Result<Option<Payment>, AppError> {
        let _timer = timer("accept_payment");
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET status = 'ACCEPTED', paid_at = $2, transaction_id = $3, \
             reference = COALESCE($4, reference) \
             WHERE id = $1 AND status = 'PENDING' RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(acceptance.paid_at)
        .bind(&acceptance.transaction_id)
        .bind(&acceptance.reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("accept payment"))
    }

    #[instrument(skip(self))]
    async fn delete_payment(&self, id: i64) -> Result<bool, AppError> {
        let _timer = timer("delete_payment");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(failed("begin transaction"))?;

        sqlx::query("DELETE FROM invoices WHERE payment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(failed("delete invoice"))?;

        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(failed("delete payment"))?;

        tx.commit().await.map_err(failed("commit transaction"))?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    async fn last_invoice_number(&self) -> Result<Option<String>, AppError> {
        let _timer = timer("last_invoice_number");
        sqlx::query_scalar::<_, String>(
            "SELECT number FROM invoices ORDER BY number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("read last invoice number"))
    }

    #[instrument(skip(self, input), fields(number = %input.number, payment_id = input.payment_id))]
    async fn insert_invoice(&self, input: NewInvoice) -> Result<Invoice, AppError> {
        let _timer = timer("insert_invoice");
        sqlx::query_as::<_, Invoice>(&format!(
            "INSERT INTO invoices \
             (number, payment_id, issuer_nit, issuer_legal_name, authorization_number, \
              issuer_address, issuer_phone, branch, municipality, economic_activity, \
              client_name, client_email, client_document, client_complement, control_code, \
              issued_at, issue_deadline, subtotal, discount, gift_card_amount, total, \
              currency, exchange_rate, legend, created_by, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                     $16, $17, $18, 0, 0, $18, $19, 1, $20, $21, $22) \
             RETURNING {}",
            INVOICE_COLUMNS
        ))
        .bind(&input.number)
        .bind(input.payment_id)
        .bind(&input.issuer.nit)
        .bind(&input.issuer.legal_name)
        .bind(&input.issuer.authorization_number)
        .bind(&input.issuer.address)
        .bind(&input.issuer.phone)
        .bind(&input.issuer.branch)
        .bind(&input.issuer.municipality)
        .bind(&input.issuer.economic_activity)
        .bind(&input.client.name)
        .bind(&input.client.email)
        .bind(&input.client.document)
        .bind(&input.client.complement)
        .bind(&input.control_code)
        .bind(input.issued_at)
        .bind(input.issue_deadline)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(&input.legend)
        .bind(&input.created_by)
        .bind(InvoiceStatus::Generated)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow!(
                    "Factura duplicada (número {} o pago {})",
                    input.number,
                    input.payment_id
                ))
            } else {
                failed("insert invoice")(e)
            }
        })
    }

    async fn find_invoice(&self, id: i64) -> Result<Option<Invoice>, AppError> {
        let _timer = timer("find_invoice");
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get invoice"))
    }

    async fn find_invoice_by_payment(
        &self,
        payment_id: i64,
    ) -> Result<Option<Invoice>, AppError> {
        let _timer = timer("find_invoice_by_payment");
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE payment_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(failed("get invoice"))
    }

    async fn list_invoices(&self, skip: i64, take: i64) -> Result<Vec<Invoice>, AppError> {
        let _timer = timer("list_invoices");
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices ORDER BY issued_at DESC, id DESC OFFSET $1 LIMIT $2",
            INVOICE_COLUMNS
        ))
        .bind(skip.max(0))
        .bind(take.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list invoices"))
    }

    async fn set_invoice_qr(
        &self,
        id: i64,
        qr_data_url: &str,
        verification_url: &str,
    ) -> Result<Invoice, AppError> {
        let _timer = timer("set_invoice_qr");
        let sql = format!(
            "UPDATE invoices SET qr_data_url = $2, verification_url = $3 \
             WHERE id = $1 RETURNING {}",
            INVOICE_COLUMNS
        );
        let query = sqlx::query_as::<_, Invoice>(&sql)
            .bind(id)
            .bind(qr_data_url)
            .bind(verification_url);
        self.fetch_invoice_update(id, query).await
    }

    async fn set_invoice_client(&self, id: i64, client: &ClientInfo) -> Result<Invoice, AppError> {
        let _timer = timer("set_invoice_client");
        let sql = format!(
            "UPDATE invoices SET client_name = $2, client_email = $3, client_document = $4, \
             client_complement = $5 WHERE id = $1 RETURNING {}",
            INVOICE_COLUMNS
        );
        let query = sqlx::query_as::<_, Invoice>(&sql)
            .bind(id)
            .bind(&client.name)
            .bind(&client.email)
            .bind(&client.document)
            .bind(&client.complement);
        self.fetch_invoice_update(id, query).await
    }

    async fn set_invoice_file(
        &self,
        id: i64,
        file_path: &str,
        file_hash: &str,
        status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let _timer = timer("set_invoice_file");
        let sql = format!(
            "UPDATE invoices SET file_path = $2, file_hash = $3, status = $4 \
             WHERE id = $1 RETURNING {}",
            INVOICE_COLUMNS
        );
        let query = sqlx::query_as::<_, Invoice>(&sql)
            .bind(id)
            .bind(file_path)
            .bind(file_hash)
            .bind(status);
        self.fetch_invoice_update(id, query).await
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    async fn insert_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, AppError> {
        let _timer = timer("insert_audit");
        sqlx::query_as::<_, AuditEntry>(&format!(
            "INSERT INTO audit_logs \
             (user_id, user_name, user_role, action, table_name, record_id, previous_data, \
              new_data, ip, user_agent, endpoint, method, request_id) \
             VALUES ($1, COALESCE($2, 'Sistema'), COALESCE($3, 'SYSTEM'), $4, $5, $6, $7, $8, \
                     $9, $10, $11, $12, $13) \
             RETURNING {}",
            AUDIT_COLUMNS
        ))
        .bind(&entry.user_id)
        .bind(&entry.user_name)
        .bind(&entry.user_role)
        .bind(&entry.action)
        .bind(&entry.table_name)
        .bind(&entry.record_id)
        .bind(&entry.previous_data)
        .bind(&entry.new_data)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(&entry.endpoint)
        .bind(&entry.method)
        .bind(&entry.request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(failed("insert audit entry"))
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        let _timer = timer("list_audit");
        sqlx::query_as::<_, AuditEntry>(&format!(
            "SELECT {} FROM audit_logs \
             WHERE ($1::varchar IS NULL OR user_id = $1) \
               AND ($2::varchar IS NULL OR table_name = $2) \
               AND ($3::varchar IS NULL OR action = $3) \
               AND ($4::timestamptz IS NULL OR created_at >= $4) \
               AND ($5::timestamptz IS NULL OR created_at <= $5) \
             ORDER BY created_at DESC, id DESC LIMIT $6",
            AUDIT_COLUMNS
        ))
        .bind(&filter.user_id)
        .bind(&filter.table_name)
        .bind(&filter.action)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit())
        .fetch_all(&self.pool)
        .await
        .map_err(failed("list audit entries"))
    }
}
