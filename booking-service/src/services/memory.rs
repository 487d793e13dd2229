//! In-process [`BookingRepository`] used by tests and local runs without Postgres.
//!
//! All tables live behind a single lock. Multi-row operations stage their writes on a copy
//! of the state and swap it in only when every step succeeded.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::models::{
    confirmation_code, payment_reference, Area, AreaChanges, AuditEntry, AuditFilter, Block,
    BlockChanges, ClientInfo, Confirmation, ConfirmationChanges, Invoice, InvoiceStatus,
    NewArea, NewAuditEntry, NewBlock, NewConfirmation, NewInvoice, NewPayment, NewReservation,
    Payment, PaymentAcceptance, PaymentChanges, PaymentStatus, Reservation, ReservationBundle,
    ReservationChanges, ReservationStatus, VerificationStatus,
};
use crate::services::repository::{AreaIncome, BookingRepository};

#[derive(Debug, Clone, Default)]
struct Tables {
    last_id: i64,
    areas: BTreeMap<i64, Area>,
    blocks: BTreeMap<i64, Block>,
    reservations: BTreeMap<i64, Reservation>,
    confirmations: BTreeMap<i64, Confirmation>,
    payments: BTreeMap<i64, Payment>,
    invoices: BTreeMap<i64, Invoice>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn new_payment(&mut self, input: NewPayment) -> Payment {
        let payment = Payment {
            id: self.next_id(),
            reservation_id: input.reservation_id,
            method: input.method,
            amount: input.amount,
            status: input.status,
            paid_at: None,
            transaction_id: input.transaction_id,
            reference: input.reference,
            qr_code: input.qr_code,
            qr_url: input.qr_url,
            user_id: input.user_id,
            user_name: input.user_name,
            created_at: Utc::now(),
        };
        self.payments.insert(payment.id, payment.clone());
        payment
    }

    fn invoice_mut(&mut self, id: i64) -> Result<&mut Invoice, AppError> {
        self.invoices
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(anyhow!("Factura {} no encontrada", id)))
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
    #[cfg(test)]
    fail_cascade_at: std::sync::atomic::AtomicU8,
    #[cfg(test)]
    stale_number_reads: std::sync::atomic::AtomicU8,
    #[cfg(test)]
    hidden_invoice_lookups: std::sync::atomic::AtomicU8,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the cascade delete fail after the given step (1 = invoices, 2 = payments,
    /// 3 = confirmation).
    #[cfg(test)]
    fn fail_cascade_after(&self, step: u8) {
        self.fail_cascade_at
            .store(step, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn cascade_checkpoint(&self, step: u8) -> Result<(), AppError> {
        if self.fail_cascade_at.load(std::sync::atomic::Ordering::SeqCst) == step {
            return Err(AppError::DatabaseError(anyhow!(
                "injected failure after cascade step {}",
                step
            )));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn cascade_checkpoint(&self, _step: u8) -> Result<(), AppError> {
        Ok(())
    }

    /// The next `reads` calls to `last_invoice_number` report an empty table, as a reader
    /// racing another insert would.
    #[cfg(test)]
    pub(crate) fn stale_invoice_number_reads(&self, reads: u8) {
        self.stale_number_reads
            .store(reads, std::sync::atomic::Ordering::SeqCst);
    }

    /// The next `lookups` calls to `find_invoice_by_payment` miss, as if the invoice were
    /// inserted concurrently right after.
    #[cfg(test)]
    pub(crate) fn hide_invoice_lookups(&self, lookups: u8) {
        self.hidden_invoice_lookups
            .store(lookups, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_injected(counter: &std::sync::atomic::AtomicU8) -> bool {
        use std::sync::atomic::Ordering;
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BookingRepository for InMemoryRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_area(&self, input: NewArea) -> Result<Area, AppError> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let area = Area {
            id: t.next_id(),
            name: input.name,
            description: input.description,
            capacity: input.capacity,
            hourly_rate: input.hourly_rate,
            active: input.active,
            created_at: now,
            updated_at: now,
        };
        t.areas.insert(area.id, area.clone());
        Ok(area)
    }

    async fn list_areas(&self) -> Result<Vec<Area>, AppError> {
        Ok(self.tables.lock().await.areas.values().cloned().collect())
    }

    async fn find_area(&self, id: i64) -> Result<Option<Area>, AppError> {
        Ok(self.tables.lock().await.areas.get(&id).cloned())
    }

    async fn update_area(&self, id: i64, changes: AreaChanges) -> Result<Option<Area>, AppError> {
        let mut t = self.tables.lock().await;
        Ok(t.areas.get_mut(&id).map(|area| {
            area.apply(changes);
            area.clone()
        }))
    }

    async fn delete_area(&self, id: i64) -> Result<bool, AppError> {
        let mut t = self.tables.lock().await;
        if t.reservations.values().any(|r| r.area_id == id)
            || t.blocks.values().any(|b| b.area_id == id)
        {
            return Err(AppError::Conflict(anyhow!(
                "El área {} tiene reservas o bloqueos asociados",
                id
            )));
        }
        Ok(t.areas.remove(&id).is_some())
    }

    async fn create_block(&self, input: NewBlock) -> Result<Block, AppError> {
        let mut t = self.tables.lock().await;
        let block = Block {
            id: t.next_id(),
            area_id: input.area_id,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            reason: input.reason,
            created_at: Utc::now(),
        };
        t.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    async fn list_blocks(&self) -> Result<Vec<Block>, AppError> {
        Ok(self.tables.lock().await.blocks.values().cloned().collect())
    }

    async fn find_block(&self, id: i64) -> Result<Option<Block>, AppError> {
        Ok(self.tables.lock().await.blocks.get(&id).cloned())
    }

    async fn update_block(
        &self,
        id: i64,
        changes: BlockChanges,
    ) -> Result<Option<Block>, AppError> {
        let mut t = self.tables.lock().await;
        Ok(t.blocks.get_mut(&id).map(|block| {
            block.apply(changes);
            block.clone()
        }))
    }

    async fn delete_block(&self, id: i64) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.blocks.remove(&id).is_some())
    }

    async fn create_reservation_bundle(
        &self,
        input: NewReservation,
        payment_method: &str,
    ) -> Result<ReservationBundle, AppError> {
        let mut t = self.tables.lock().await;
        if !t.areas.contains_key(&input.area_id) {
            return Err(AppError::NotFound(anyhow!("Área {} no encontrada", input.area_id)));
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: t.next_id(),
            area_id: input.area_id,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            cost: input.cost,
            user_id: input.user_id.clone(),
            user_name: input.user_name.clone(),
            user_role: input.user_role,
            status: input.status,
            created_at: now,
            updated_at: now,
        };

        let confirmation = Confirmation {
            id: t.next_id(),
            reservation_id: reservation.id,
            qr_code: confirmation_code(reservation.id, now),
            issued_at: now,
            status: VerificationStatus::Pending,
        };

        let mut payment = NewPayment::pending(reservation.id, payment_method, reservation.cost);
        payment.reference = Some(payment_reference(reservation.id, now));
        payment.user_id = input.user_id;
        payment.user_name = input.user_name;

        t.reservations.insert(reservation.id, reservation.clone());
        t.confirmations.insert(confirmation.id, confirmation.clone());
        let payment = t.new_payment(payment);

        Ok(ReservationBundle {
            reservation,
            confirmation,
            payment,
        })
    }

    async fn list_reservations(&self, owner: Option<&str>) -> Result<Vec<Reservation>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.reservations
            .values()
            .filter(|r| owner.map_or(true, |o| r.user_id.as_deref() == Some(o)))
            .cloned()
            .collect())
    }

    async fn find_reservation(&self, id: i64) -> Result<Option<Reservation>, AppError> {
        Ok(self.tables.lock().await.reservations.get(&id).cloned())
    }

    async fn update_reservation(
        &self,
        id: i64,
        changes: ReservationChanges,
    ) -> Result<Option<Reservation>, AppError> {
        let mut t = self.tables.lock().await;
        Ok(t.reservations.get_mut(&id).map(|reservation| {
            reservation.apply(changes);
            reservation.clone()
        }))
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

    async fn delete_reservation_cascade(&self, id: i64) -> Result<bool, AppError> {
        let mut t = self.tables.lock().await;
        if !t.reservations.contains_key(&id) {
            return Ok(false);
        }

        let mut staged = t.clone();
        let payment_ids: Vec<i64> = staged
            .payments
            .values()
            .filter(|p| p.reservation_id == id)
            .map(|p| p.id)
            .collect();

        staged
            .invoices
            .retain(|_, invoice| !payment_ids.contains(&invoice.payment_id));
        self.cascade_checkpoint(1)?;
        staged.payments.retain(|_, p| p.reservation_id != id);
        self.cascade_checkpoint(2)?;
        staged.confirmations.retain(|_, c| c.reservation_id != id);
        self.cascade_checkpoint(3)?;
        staged.reservations.remove(&id);

        *t = staged;
        Ok(true)
    }

    async fn income_by_area(&self) -> Result<Vec<AreaIncome>, AppError> {
        let t = self.tables.lock().await;
        let mut report = Vec::new();
        for area in t.areas.values() {
            let mut total = Decimal::ZERO;
            let mut reservations = std::collections::BTreeSet::new();
            for payment in t.payments.values().filter(|p| p.is_accepted()) {
                let Some(reservation) = t.reservations.get(&payment.reservation_id) else {
                    continue;
                };
                if reservation.area_id == area.id {
                    total += payment.amount;
                    reservations.insert(reservation.id);
                }
            }
            let count = reservations.len() as i64;
            let average = if count > 0 {
                (total / Decimal::from(count)).round_dp(2)
            } else {
                Decimal::ZERO
            };
            report.push(AreaIncome {
                area_id: area.id,
                area_name: area.name.clone(),
                total_income: total,
                reservation_count: count,
                average_income: average,
            });
        }
        Ok(report)
    }

    async fn create_confirmation(
        &self,
        input: NewConfirmation,
    ) -> Result<Confirmation, AppError> {
        let mut t = self.tables.lock().await;
        if t.confirmations
            .values()
            .any(|c| c.reservation_id == input.reservation_id)
        {
            return Err(AppError::Conflict(anyhow!(
                "La reserva {} ya tiene confirmación",
                input.reservation_id
            )));
        }
        let confirmation = Confirmation {
            id: t.next_id(),
            reservation_id: input.reservation_id,
            qr_code: input.qr_code,
            issued_at: input.issued_at,
            status: input.status,
        };
        t.confirmations.insert(confirmation.id, confirmation.clone());
        Ok(confirmation)
    }

    async fn list_confirmations(&self) -> Result<Vec<Confirmation>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .confirmations
            .values()
            .cloned()
            .collect())
    }

    async fn find_confirmation(&self, id: i64) -> Result<Option<Confirmation>, AppError> {
        Ok(self.tables.lock().await.confirmations.get(&id).cloned())
    }

    async fn find_confirmation_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Confirmation>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.confirmations
            .values()
            .find(|c| c.reservation_id == reservation_id)
            .cloned())
    }

    async fn update_confirmation(
        &self,
        id: i64,
        changes: ConfirmationChanges,
    ) -> Result<Option<Confirmation>, AppError> {
        let mut t = self.tables.lock().await;
        Ok(t.confirmations.get_mut(&id).map(|confirmation| {
            confirmation.apply(changes);
            confirmation.clone()
        }))
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
        Ok(self.tables.lock().await.confirmations.remove(&id).is_some())
    }

    async fn create_payment(&self, input: NewPayment) -> Result<Payment, AppError> {
        let mut t = self.tables.lock().await;
        if !t.reservations.contains_key(&input.reservation_id) {
            return Err(AppError::NotFound(anyhow!(
                "Reserva {} no encontrada",
                input.reservation_id
            )));
        }
        Ok(t.new_payment(input))
    }

    async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        Ok(self.tables.lock().await.payments.values().cloned().collect())
    }

    async fn find_payment(&self, id: i64) -> Result<Option<Payment>, AppError> {
        Ok(self.tables.lock().await.payments.get(&id).cloned())
    }

    async fn list_payments_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Vec<Payment>, AppError> {
        let t = self.tables.lock().await;
        // Ids grow monotonically, so reverse key order is newest first.
        Ok(t.payments
            .values()
            .rev()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn first_pending_payment(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Payment>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.payments
            .values()
            .find(|p| p.reservation_id == reservation_id && p.status == PaymentStatus::Pending)
            .cloned())
    }

    async fn update_payment(
        &self,
        id: i64,
        changes: PaymentChanges,
    ) -> Result<Option<Payment>, AppError> {
        let mut t = self.tables.lock().await;
        Ok(t.payments.get_mut(&id).map(|payment| {
            payment.apply(changes);
            payment.clone()
        }))
    }

    async fn accept_payment(
        &self,
        id: i64,
        acceptance: PaymentAcceptance,
    ) -> Result<Option<Payment>, AppError> {
        let mut t = self.tables.lock().await;
        match t.payments.get_mut(&id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = PaymentStatus::Accepted;
                payment.paid_at = Some(acceptance.paid_at);
                payment.transaction_id = Some(acceptance.transaction_id);
                if acceptance.reference.is_some() {
                    payment.reference = acceptance.reference;
                }
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_payment(&self, id: i64) -> Result<bool, AppError> {
        let mut t = self.tables.lock().await;
        if t.payments.remove(&id).is_none() {
            return Ok(false);
        }
        t.invoices.retain(|_, invoice| invoice.payment_id != id);
        Ok(true)
    }

    async fn last_invoice_number(&self) -> Result<Option<String>, AppError> {
        #[cfg(test)]
        if Self::take_injected(&self.stale_number_reads) {
            return Ok(None);
        }
        let t = self.tables.lock().await;
        Ok(t.invoices.values().map(|i| i.number.clone()).max())
    }

    async fn insert_invoice(&self, input: NewInvoice) -> Result<Invoice, AppError> {
        let mut t = self.tables.lock().await;
        if t.invoices.values().any(|i| i.number == input.number) {
            return Err(AppError::Conflict(anyhow!(
                "El número de factura {} ya existe",
                input.number
            )));
        }
        if t.invoices.values().any(|i| i.payment_id == input.payment_id) {
            return Err(AppError::Conflict(anyhow!(
                "El pago {} ya tiene factura",
                input.payment_id
            )));
        }

        let invoice = Invoice {
            id: t.next_id(),
            number: input.number,
            payment_id: input.payment_id,
            issuer_nit: input.issuer.nit,
            issuer_legal_name: input.issuer.legal_name,
            authorization_number: input.issuer.authorization_number,
            issuer_address: input.issuer.address,
            issuer_phone: input.issuer.phone,
            branch: input.issuer.branch,
            municipality: input.issuer.municipality,
            economic_activity: input.issuer.economic_activity,
            client_name: input.client.name,
            client_email: input.client.email,
            client_document: input.client.document,
            client_complement: input.client.complement,
            control_code: input.control_code,
            issued_at: input.issued_at,
            issue_deadline: input.issue_deadline,
            subtotal: input.amount,
            discount: Decimal::ZERO,
            gift_card_amount: Decimal::ZERO,
            total: input.amount,
            currency: input.currency,
            exchange_rate: Decimal::ONE,
            legend: input.legend,
            qr_data_url: None,
            verification_url: None,
            file_path: None,
            file_hash: None,
            created_by: input.created_by,
            status: InvoiceStatus::Generated,
            created_at: Utc::now(),
        };
        t.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn find_invoice(&self, id: i64) -> Result<Option<Invoice>, AppError> {
        Ok(self.tables.lock().await.invoices.get(&id).cloned())
    }

    async fn find_invoice_by_payment(
        &self,
        payment_id: i64,
    ) -> Result<Option<Invoice>, AppError> {
        #[cfg(test)]
        if Self::take_injected(&self.hidden_invoice_lookups) {
            return Ok(None);
        }
        let t = self.tables.lock().await;
        Ok(t.invoices
            .values()
            .find(|i| i.payment_id == payment_id)
            .cloned())
    }

    async fn list_invoices(&self, skip: i64, take: i64) -> Result<Vec<Invoice>, AppError> {
        let t = self.tables.lock().await;
        let mut invoices: Vec<Invoice> = t.invoices.values().cloned().collect();
        invoices.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(b.id.cmp(&a.id)));
        Ok(invoices
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(take.max(0) as usize)
            .collect())
    }

    async fn set_invoice_qr(
        &self,
        id: i64,
        qr_data_url: &str,
        verification_url: &str,
    ) -> Result<Invoice, AppError> {
        let mut t = self.tables.lock().await;
        let invoice = t.invoice_mut(id)?;
        invoice.qr_data_url = Some(qr_data_url.to_string());
        invoice.verification_url = Some(verification_url.to_string());
        Ok(invoice.clone())
    }

    async fn set_invoice_client(&self, id: i64, client: &ClientInfo) -> Result<Invoice, AppError> {
        let mut t = self.tables.lock().await;
        let invoice = t.invoice_mut(id)?;
        invoice.set_client(client);
        Ok(invoice.clone())
    }

    async fn set_invoice_file(
        &self,
        id: i64,
        file_path: &str,
        file_hash: &str,
        status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let mut t = self.tables.lock().await;
        let invoice = t.invoice_mut(id)?;
        invoice.file_path = Some(file_path.to_string());
        invoice.file_hash = Some(file_hash.to_string());
        invoice.status = status;
        Ok(invoice.clone())
    }

    async fn insert_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, AppError> {
        let mut t = self.tables.lock().await;
        let entry = AuditEntry {
            id: t.next_id(),
            user_id: entry.user_id,
            user_name: entry.user_name.unwrap_or_else(|| "Sistema".to_string()),
            user_role: entry.user_role.unwrap_or_else(|| "SYSTEM".to_string()),
            action: entry.action,
            table_name: entry.table_name,
            record_id: entry.record_id,
            previous_data: entry.previous_data,
            new_data: entry.new_data,
            ip: entry.ip,
            user_agent: entry.user_agent,
            endpoint: entry.endpoint,
            method: entry.method,
            request_id: entry.request_id,
            created_at: Utc::now(),
        };
        t.audit.push(entry.clone());
        Ok(entry)
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.audit
            .iter()
            .rev()
            .filter(|entry| filter.matches(entry))
            .take(filter.limit() as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssuerInfo, DEFAULT_PAYMENT_METHOD};
    use chrono::Duration;

    async fn seeded() -> (InMemoryRepository, ReservationBundle) {
        let repo = InMemoryRepository::new();
        let area = repo
            .create_area(NewArea {
                name: "Piscina".to_string(),
                description: None,
                capacity: 20,
                hourly_rate: Decimal::from(50),
                active: true,
            })
            .await
            .unwrap();
        let start = Utc::now() + Duration::days(1);
        let bundle = repo
            .create_reservation_bundle(
                NewReservation {
                    area_id: area.id,
                    starts_at: start,
                    ends_at: start + Duration::hours(2),
                    cost: Decimal::from(100),
                    user_id: Some("u-1".to_string()),
                    user_name: Some("Ana".to_string()),
                    user_role: Some("USER_CASUAL".to_string()),
                    status: ReservationStatus::Pending,
                },
                DEFAULT_PAYMENT_METHOD,
            )
            .await
            .unwrap();
        (repo, bundle)
    }

    fn invoice_for(payment_id: i64, number: &str) -> NewInvoice {
        NewInvoice {
            number: number.to_string(),
            payment_id,
            issuer: IssuerInfo::from(&crate::config::IssuerConfig::default()),
            client: ClientInfo::general_public(),
            control_code: "0123456789ABCDEF".to_string(),
            issued_at: Utc::now(),
            issue_deadline: Utc::now() + Duration::days(365),
            amount: Decimal::from(100),
            currency: "BOB".to_string(),
            legend: "Ley N° 453".to_string(),
            created_by: "SISTEMA".to_string(),
        }
    }

    #[tokio::test]
    async fn bundle_creates_pending_dependents() {
        let (_, bundle) = seeded().await;
        assert_eq!(bundle.confirmation.reservation_id, bundle.reservation.id);
        assert_eq!(bundle.confirmation.status, VerificationStatus::Pending);
        assert!(bundle.confirmation.qr_code.starts_with(&format!("QR-{}-", bundle.reservation.id)));
        assert_eq!(bundle.payment.status, PaymentStatus::Pending);
        assert_eq!(bundle.payment.amount, bundle.reservation.cost);
        assert_eq!(bundle.payment.method, "QR_CODE");
    }

    #[tokio::test]
    async fn accept_payment_transitions_only_once() {
        let (repo, bundle) = seeded().await;
        let first = repo
            .accept_payment(bundle.payment.id, PaymentAcceptance::now(None))
            .await
            .unwrap();
        assert!(first.unwrap().is_accepted());

        let second = repo
            .accept_payment(bundle.payment.id, PaymentAcceptance::now(None))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn duplicate_invoice_number_or_payment_conflicts() {
        let (repo, bundle) = seeded().await;
        repo.insert_invoice(invoice_for(bundle.payment.id, "FAC-00000001"))
            .await
            .unwrap();

        let other = repo
            .create_payment(NewPayment::pending(bundle.reservation.id, "EFECTIVO", Decimal::ONE))
            .await
            .unwrap();
        assert!(matches!(
            repo.insert_invoice(invoice_for(other.id, "FAC-00000001")).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            repo.insert_invoice(invoice_for(bundle.payment.id, "FAC-00000002")).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn cascade_removes_reservation_and_dependents() {
        let (repo, bundle) = seeded().await;
        repo.insert_invoice(invoice_for(bundle.payment.id, "FAC-00000001"))
            .await
            .unwrap();

        assert!(repo.delete_reservation_cascade(bundle.reservation.id).await.unwrap());
        assert!(repo.find_reservation(bundle.reservation.id).await.unwrap().is_none());
        assert!(repo.find_payment(bundle.payment.id).await.unwrap().is_none());
        assert!(repo
            .find_confirmation(bundle.confirmation.id)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find_invoice_by_payment(bundle.payment.id)
            .await
            .unwrap()
            .is_none());
        assert!(!repo.delete_reservation_cascade(bundle.reservation.id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_cascade_leaves_everything_in_place() {
        let (repo, bundle) = seeded().await;
        let invoice = repo
            .insert_invoice(invoice_for(bundle.payment.id, "FAC-00000001"))
            .await
            .unwrap();

        for step in 1..=3 {
            repo.fail_cascade_after(step);
            assert!(repo.delete_reservation_cascade(bundle.reservation.id).await.is_err());

            assert!(repo.find_reservation(bundle.reservation.id).await.unwrap().is_some());
            assert!(repo.find_payment(bundle.payment.id).await.unwrap().is_some());
            assert!(repo
                .find_confirmation(bundle.confirmation.id)
                .await
                .unwrap()
                .is_some());
            assert!(repo.find_invoice(invoice.id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn income_counts_only_accepted_payments() {
        let (repo, bundle) = seeded().await;
        let report = repo.income_by_area().await.unwrap();
        assert_eq!(report[0].total_income, Decimal::ZERO);
        assert_eq!(report[0].reservation_count, 0);

        repo.accept_payment(bundle.payment.id, PaymentAcceptance::now(None))
            .await
            .unwrap();
        let report = repo.income_by_area().await.unwrap();
        assert_eq!(report[0].total_income, Decimal::from(100));
        assert_eq!(report[0].reservation_count, 1);
        assert_eq!(report[0].average_income, Decimal::from(100));
    }
}
