use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use std::env;
use std::path::PathBuf;

#[derive(Deserialize, Clone, Debug)]
pub struct BookingConfig {
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub invoices: InvoiceConfig,
    pub issuer: IssuerConfig,
    pub qr_payment: QrPaymentConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for RepositoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(RepositoryBackend::Postgres),
            "memory" => Ok(RepositoryBackend::Memory),
            _ => Err(format!("Invalid repository backend: {}", s)),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: RepositoryBackend,
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: Secret<String>,
    /// Accept `x-user-*` identity headers set by the upstream gateway.
    pub trust_gateway_headers: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub frontend_url: String,
    pub currency: String,
    pub webhook_tolerance_secs: i64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct InvoiceConfig {
    pub directory: PathBuf,
    pub number_prefix: String,
}

/// Fiscal identity printed on every invoice.
#[derive(Deserialize, Clone, Debug)]
pub struct IssuerConfig {
    pub name: String,
    pub legal_name: String,
    pub nit: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub branch: String,
    pub municipality: String,
    pub economic_activity: String,
    pub authorization_number: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct QrPaymentConfig {
    pub base_url: String,
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
    pub expiry_minutes: i64,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            name: "CITYLIGHTS".to_string(),
            legal_name: "CITYLIGHTS S.R.L.".to_string(),
            nit: "1234567890123".to_string(),
            address: "Av. Principal #123, La Paz, Bolivia".to_string(),
            phone: "+591 2 2345678".to_string(),
            email: "facturas@citylights.com".to_string(),
            branch: "Casa Matriz".to_string(),
            municipality: "La Paz".to_string(),
            economic_activity:
                "631200 - Actividades de reserva y otras actividades conexas del turismo"
                    .to_string(),
            authorization_number: "29040011007".to_string(),
        }
    }
}

impl Default for QrPaymentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://qr-demo.citylights.bo".to_string(),
            bank_name: "Banco Nacional de Bolivia".to_string(),
            account_number: "1001234567".to_string(),
            account_holder: "CITYLIGHTS SRL".to_string(),
            expiry_minutes: 30,
        }
    }
}

impl BookingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let common = core_config::Config::load().map_err(|e| anyhow!("{}", e))?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let backend: RepositoryBackend = env::var("REPOSITORY_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .map_err(|e: String| anyhow!(e))?;

        let database_url = match backend {
            RepositoryBackend::Postgres => get_env("DATABASE_URL", None, is_prod)?,
            RepositoryBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let jwt_secret = get_env("JWT_SECRET", Some("dev-jwt-secret"), is_prod)?;

        let issuer_defaults = IssuerConfig::default();
        let issuer = IssuerConfig {
            name: env_or("ISSUER_NAME", &issuer_defaults.name),
            legal_name: env_or("ISSUER_LEGAL_NAME", &issuer_defaults.legal_name),
            nit: env_or("ISSUER_NIT", &issuer_defaults.nit),
            address: env_or("ISSUER_ADDRESS", &issuer_defaults.address),
            phone: env_or("ISSUER_PHONE", &issuer_defaults.phone),
            email: env_or("ISSUER_EMAIL", &issuer_defaults.email),
            branch: env_or("ISSUER_BRANCH", &issuer_defaults.branch),
            municipality: env_or("ISSUER_MUNICIPALITY", &issuer_defaults.municipality),
            economic_activity: env_or(
                "ISSUER_ECONOMIC_ACTIVITY",
                &issuer_defaults.economic_activity,
            ),
            authorization_number: env_or(
                "ISSUER_AUTHORIZATION_NUMBER",
                &issuer_defaults.authorization_number,
            ),
        };

        let qr_defaults = QrPaymentConfig::default();

        Ok(Self {
            common,
            database: DatabaseConfig {
                backend,
                url: Secret::new(database_url),
                max_connections: env_or("DB_MAX_CONNECTIONS", "10").parse()?,
                min_connections: env_or("DB_MIN_CONNECTIONS", "1").parse()?,
                run_migrations: env_or("DB_RUN_MIGRATIONS", "true").parse().unwrap_or(true),
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(jwt_secret),
                trust_gateway_headers: env_or("TRUST_GATEWAY_HEADERS", "true")
                    .parse()
                    .unwrap_or(true),
            },
            stripe: StripeConfig {
                secret_key: Secret::new(env::var("STRIPE_SECRET_KEY").unwrap_or_default()),
                webhook_secret: Secret::new(
                    env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
                ),
                api_base_url: env_or("STRIPE_API_BASE", "https://api.stripe.com"),
                frontend_url: env_or("FRONTEND_URL", "http://localhost:5173"),
                currency: env_or("STRIPE_CURRENCY", "usd"),
                webhook_tolerance_secs: env_or("STRIPE_WEBHOOK_TOLERANCE_SECS", "300").parse()?,
            },
            invoices: InvoiceConfig {
                directory: PathBuf::from(env_or("INVOICE_DIR", "facturas")),
                number_prefix: env_or("INVOICE_NUMBER_PREFIX", "FAC"),
            },
            issuer,
            qr_payment: QrPaymentConfig {
                base_url: env_or("QR_PAYMENT_BASE_URL", &qr_defaults.base_url),
                bank_name: env_or("QR_PAYMENT_BANK_NAME", &qr_defaults.bank_name),
                account_number: env_or("QR_PAYMENT_ACCOUNT", &qr_defaults.account_number),
                account_holder: env_or("QR_PAYMENT_HOLDER", &qr_defaults.account_holder),
                expiry_minutes: env_or("QR_PAYMENT_EXPIRY_MINUTES", "30").parse()?,
            },
            service_name: "booking-service".to_string(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(anyhow!("{} is required in production but not set", key))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(anyhow!("{} is required but not set", key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_backend_parses_case_insensitively() {
        assert_eq!(
            "Postgres".parse::<RepositoryBackend>().unwrap(),
            RepositoryBackend::Postgres
        );
        assert_eq!(
            "memory".parse::<RepositoryBackend>().unwrap(),
            RepositoryBackend::Memory
        );
        assert!("mongo".parse::<RepositoryBackend>().is_err());
    }

    #[test]
    fn issuer_defaults_match_the_registered_company() {
        let issuer = IssuerConfig::default();
        assert_eq!(issuer.nit, "1234567890123");
        assert_eq!(issuer.authorization_number, "29040011007");
    }
}
