//! Caller identity and role policies.
//!
//! [`identify`] runs on every request and stores a [`CurrentUser`] in the request
//! extensions when a valid bearer token (or, when trusted, gateway `x-user-*` headers) is
//! present. Handlers that need an identity take `CurrentUser`; handlers where it is
//! optional take `Option<CurrentUser>`. Role checks are route layers.

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::{header, request::Parts, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::models::{AuditAction, CurrentUser, NewAuditEntry};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Deserialize)]
struct Claims {
    sub: serde_json::Value,
    name: Option<String>,
    #[serde(rename = "firstName")]
    first_name: Option<String>,
    username: Option<String>,
    email: Option<String>,
    role: Option<String>,
}

/// Resolves callers from HS256 tokens or trusted gateway headers.
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
    trust_gateway_headers: bool,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.expose_secret().as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            trust_gateway_headers: config.trust_gateway_headers,
        }
    }

    /// Identity carried by a bearer token. Tokens lacking a subject, a name or a role are
    /// rejected.
    pub fn verify_token(&self, token: &str) -> Result<CurrentUser, AppError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;

        let id = match claims.sub {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        let name = claims
            .name
            .or(claims.first_name)
            .or(claims.username)
            .filter(|n| !n.is_empty());
        let role = claims.role.filter(|r| !r.is_empty());

        match (id.is_empty(), name, role) {
            (false, Some(name), Some(role)) => Ok(CurrentUser {
                id,
                name,
                email: claims.email,
                role,
            }),
            _ => Err(AppError::Unauthorized(anyhow::anyhow!(
                "Token inválido: faltan campos requeridos"
            ))),
        }
    }

    fn from_gateway_headers(&self, headers: &HeaderMap) -> Option<CurrentUser> {
        if !self.trust_gateway_headers {
            return None;
        }
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Some(CurrentUser {
            id: get(USER_ID_HEADER)?,
            name: get(USER_NAME_HEADER).unwrap_or_default(),
            email: get(USER_EMAIL_HEADER),
            role: get(USER_ROLE_HEADER)?,
        })
    }

    /// `Ok(None)` when the request carries no credentials at all.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Option<CurrentUser>, AppError> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match bearer {
            Some(token) => self.verify_token(token.trim()).map(Some),
            None => Ok(self.from_gateway_headers(headers)),
        }
    }
}

/// Attaches the caller identity, if any. A present but invalid token is rejected.
pub async fn identify(
    State(auth): State<Arc<Authenticator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(user) = auth.resolve(req.headers()).map_err(|e| {
        tracing::debug!(error = %e, "Rejected credentials");
        AppError::Unauthorized(anyhow::anyhow!("Token inválido o expirado"))
    })? {
        tracing::Span::current().record("user_id", user.id.as_str());
        req.extensions_mut().insert(user);
    }
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Token no proporcionado")))
    }
}

async fn require_role(
    req: Request,
    next: Next,
    allowed: fn(&CurrentUser) -> bool,
) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Token no proporcionado")))?;

    if !allowed(user) {
        tracing::warn!(user_id = %user.id, role = %user.role, path = %req.uri().path(), "Role check failed");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "No tienes permisos para realizar esta acción"
        )));
    }
    Ok(next.run(req).await)
}

pub async fn require_super_user(req: Request, next: Next) -> Result<Response, AppError> {
    require_role(req, next, CurrentUser::is_super_user).await
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    require_role(req, next, CurrentUser::is_admin).await
}

/// Request facts recorded in the audit trail.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub request_id: Option<String>,
}

impl RequestMeta {
    /// Audit entry for this request, attributed to `user` when known.
    pub fn audit(
        &self,
        action: AuditAction,
        table: &str,
        user: Option<&CurrentUser>,
    ) -> NewAuditEntry {
        let entry = NewAuditEntry::new(action, table)
            .request(
                self.ip.clone(),
                self.user_agent.clone(),
                &self.endpoint,
                &self.method,
            )
            .correlation(self.request_id.clone());
        match user {
            Some(user) => entry.actor(&user.id, Some(&user.name), Some(&user.role)),
            None => entry,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .or_else(|| header("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            });

        Ok(Self {
            ip,
            user_agent: header(header::USER_AGENT.as_str()),
            endpoint: parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
            method: parts.method.to_string(),
            request_id: parts
                .extensions
                .get::<RequestId>()
                .map(|RequestId(id)| id.clone()),
        })
    }
}
