use std::env;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub pipeline: PipelineConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Cron expression driving the recurring SLA scan.
    pub sla_cron: String,
    /// Product every bulk-created contract is booked against.
    pub default_product_id: Uuid,
    /// Divisor turning a contract value into its PB unit count.
    pub pb_divisor: f64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("SERVER_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("SERVER_PORT", raw))?,
            Err(_) => 8080,
        };

        let sla_cron = env::var("SLA_CRON").unwrap_or_else(|_| "0 0 * * * *".to_string());

        let default_product_id = match env::var("DEFAULT_PRODUCT_ID") {
            Ok(raw) => Uuid::parse_str(&raw)
                .map_err(|_| ConfigError::Invalid("DEFAULT_PRODUCT_ID", raw))?,
            Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, b"funnelserver/default-product"),
        };

        let pb_divisor = match env::var("PB_DIVISOR") {
            Ok(raw) => {
                let v = raw
                    .parse::<f64>()
                    .map_err(|_| ConfigError::Invalid("PB_DIVISOR", raw.clone()))?;
                if v <= 0.0 {
                    return Err(ConfigError::Invalid("PB_DIVISOR", raw));
                }
                v
            }
            Err(_) => 100.0,
        };

        Ok(Self {
            server: ServerConfig { host, port },
            database_url,
            pipeline: PipelineConfig {
                sla_cron,
                default_product_id,
                pb_divisor,
            },
        })
    }
}
