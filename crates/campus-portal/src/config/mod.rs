use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::workflows::admissions::{FeeSchedule, PortalPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub portal: PortalConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            portal: PortalConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Storage locations, fee rates and the seeded staff account.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub upload_dir: PathBuf,
    /// JSON snapshot backing the in-memory store; `None` keeps state in memory only.
    pub data_file: Option<PathBuf>,
    pub home_nationality: String,
    pub fees: FeeSchedule,
    pub admin_email: String,
}

impl PortalConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = FeeSchedule::default();

        let upload_dir = env::var("PORTAL_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static/uploads"));
        let data_file = env::var("PORTAL_DATA_FILE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let home_nationality =
            env::var("PORTAL_HOME_NATIONALITY").unwrap_or_else(|_| "Egyptian".to_string());
        let admin_email =
            env::var("PORTAL_ADMIN_EMAIL").unwrap_or_else(|_| "admin@example.com".to_string());

        let fees = FeeSchedule {
            local_application: fee_var("PORTAL_LOCAL_FEE", defaults.local_application)?,
            international_application: fee_var(
                "PORTAL_INTERNATIONAL_FEE",
                defaults.international_application,
            )?,
            certificate_per_copy: fee_var("PORTAL_CERTIFICATE_FEE", defaults.certificate_per_copy)?,
        };

        Ok(Self {
            upload_dir,
            data_file,
            home_nationality,
            fees,
            admin_email,
        })
    }

    pub fn policy(&self) -> PortalPolicy {
        PortalPolicy {
            fees: self.fees,
            home_nationality: self.home_nationality.clone(),
            ..PortalPolicy::default()
        }
    }
}

fn fee_var(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidFee { var }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidFee { var: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidFee { var } => {
                write!(f, "{var} must be a non-negative whole amount")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidFee { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
