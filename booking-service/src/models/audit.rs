use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    #[serde(rename = "usuarioId")]
    pub user_id: String,
    #[serde(rename = "usuarioNombre")]
    pub user_name: String,
    #[serde(rename = "usuarioRol")]
    pub user_role: String,
    #[serde(rename = "accion")]
    pub action: String,
    #[serde(rename = "tabla")]
    pub table_name: String,
    #[serde(rename = "registroId")]
    pub record_id: Option<String>,
    #[serde(rename = "datosAnteriores")]
    pub previous_data: Option<serde_json::Value>,
    #[serde(rename = "datosNuevos")]
    pub new_data: Option<serde_json::Value>,
    pub ip: Option<String>,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    #[serde(rename = "metodo")]
    pub method: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "creadoEn")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry {
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_role: Option<String>,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<String>,
    pub previous_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub request_id: Option<String>,
}

/// Audited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Confirm,
    CreateCheckoutSession,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Confirm => "CONFIRM",
            Self::CreateCheckoutSession => "CREATE_CHECKOUT_SESSION",
        }
    }
}

impl NewAuditEntry {
    pub fn new(action: AuditAction, table_name: &str) -> Self {
        Self {
            user_id: "system".to_string(),
            action: action.as_str().to_string(),
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    pub fn actor(mut self, id: &str, name: Option<&str>, role: Option<&str>) -> Self {
        self.user_id = id.to_string();
        self.user_name = name.map(str::to_string);
        self.user_role = role.map(str::to_string);
        self
    }

    pub fn record(mut self, id: impl ToString) -> Self {
        self.record_id = Some(id.to_string());
        self
    }

    /// Row snapshot before the change.
    pub fn before<T: Serialize>(mut self, previous: &T) -> Self {
        self.previous_data = serde_json::to_value(previous).ok();
        self
    }

    /// Row snapshot after the change.
    pub fn after<T: Serialize>(mut self, new: &T) -> Self {
        self.new_data = serde_json::to_value(new).ok();
        self
    }

    pub fn request(
        mut self,
        ip: Option<String>,
        user_agent: Option<String>,
        endpoint: &str,
        method: &str,
    ) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self.endpoint = Some(endpoint.to_string());
        self.method = Some(method.to_string());
        self
    }

    /// `x-request-id` of the HTTP request that caused the change.
    pub fn correlation(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    #[serde(rename = "usuarioId")]
    pub user_id: Option<String>,
    #[serde(rename = "tabla")]
    pub table_name: Option<String>,
    #[serde(rename = "accion")]
    pub action: Option<String>,
    #[serde(rename = "fechaInicio")]
    pub from: Option<DateTime<Utc>>,
    #[serde(rename = "fechaFin")]
    pub to: Option<DateTime<Utc>>,
    #[serde(rename = "limite")]
    pub limit: Option<i64>,
}

impl AuditFilter {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 1000)
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self.table_name.as_ref().map_or(true, |t| &entry.table_name == t)
            && self.action.as_ref().map_or(true, |a| &entry.action == a)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(action: &str, table: &str, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: 1,
            user_id: "u-1".to_string(),
            user_name: "Ana".to_string(),
            user_role: "USER_CASUAL".to_string(),
            action: action.to_string(),
            table_name: table.to_string(),
            record_id: None,
            previous_data: None,
            new_data: None,
            ip: None,
            user_agent: None,
            endpoint: None,
            method: None,
            request_id: None,
            created_at: at,
        }
    }

    #[test]
    fn filter_matches_on_every_given_field() {
        let now = Utc::now();
        let filter = AuditFilter {
            table_name: Some("reserva".to_string()),
            action: Some("DELETE".to_string()),
            from: Some(now - Duration::hours(1)),
            ..Default::default()
        };

        assert!(filter.matches(&entry("DELETE", "reserva", now)));
        assert!(!filter.matches(&entry("CREATE", "reserva", now)));
        assert!(!filter.matches(&entry("DELETE", "pago_reserva", now)));
        assert!(!filter.matches(&entry("DELETE", "reserva", now - Duration::hours(2))));
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(AuditFilter::default().limit(), 100);
        let filter = AuditFilter {
            limit: Some(50_000),
            ..Default::default()
        };
        assert_eq!(filter.limit(), 1000);
    }

    #[test]
    fn builder_fills_actor_and_snapshots() {
        let entry = NewAuditEntry::new(AuditAction::Update, "booking")
            .actor("u-9", Some("Luis"), Some("SUPER_USER"))
            .record(42)
            .before(&serde_json::json!({"nombre": "a"}))
            .after(&serde_json::json!({"nombre": "b"}));

        assert_eq!(entry.action, "UPDATE");
        assert_eq!(entry.record_id.as_deref(), Some("42"));
        assert_eq!(entry.user_role.as_deref(), Some("SUPER_USER"));
        assert_eq!(entry.new_data.unwrap()["nombre"], "b");
    }
}
