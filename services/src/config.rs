use serde::Deserialize;
use std::env::vars;
use std::fmt::Display;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Env {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "test")]
    Test,
    #[serde(rename = "prod")]
    Prod,
}

impl Display for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Env::Local => write!(f, "local"),
            Env::Test => write!(f, "test"),
            Env::Prod => write!(f, "prod"),
        }
    }
}

/// How password reset mail leaves the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailTransport {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
    /// Writes every message as an `.eml` file; used for local development.
    File { dir: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MailTransportKind {
    Smtp,
    File,
}

// The final, validated configuration struct.
#[derive(Debug, Clone)]
pub struct Config {
    env: Env,
    database_url: String,
    server_addr: String,
    port: u16,
    jwt_secret_access: String,
    jwt_secret_refresh: String,
    // Signs the short-lived token that carries identity between reset steps.
    app_secret: String,
    api_key: Option<String>,
    // Lets the first admin register before any admin token exists.
    admin_bootstrap_key: Option<String>,
    cors_allowed_origins: Vec<String>,
    mail_transport: MailTransport,
    mail_from: String,
    mail_from_name: String,
}

// Intermediate struct mirroring the environment, everything optional that has
// an environment-aware default.
#[derive(Deserialize)]
struct RawConfig {
    env: Env,
    database_url: String,
    server_addr: Option<String>,
    port: Option<u16>,
    jwt_secret_access: Option<String>,
    jwt_secret_refresh: Option<String>,
    app_secret: Option<String>,
    api_key: Option<String>,
    admin_bootstrap_key: Option<String>,
    cors_allowed_origins: Option<String>,
    mail_transport: Option<MailTransportKind>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    mail_file_dir: Option<String>,
    mail_from: Option<String>,
    mail_from_name: Option<String>,
}

impl Config {
    /// Create a test configuration with default values.
    ///
    /// Available to unit and integration tests; never used by the binary.
    pub fn new_for_test() -> Self {
        Self {
            env: Env::Test,
            database_url: "postgres://localhost:5432/manna_test".to_owned(),
            server_addr: "127.0.0.1".to_owned(),
            port: 8080,
            jwt_secret_access: "test-access-secret".to_owned(),
            jwt_secret_refresh: "test-refresh-secret".to_owned(),
            app_secret: "test-app-secret".to_owned(),
            api_key: None,
            admin_bootstrap_key: None,
            cors_allowed_origins: vec!["http://localhost:3000".to_owned()],
            mail_transport: MailTransport::File {
                dir: PathBuf::from("target/test-emails"),
            },
            mail_from: "no-reply@manna.test".to_owned(),
            mail_from_name: "Manna".to_owned(),
        }
    }

    /// Test configuration that guards `/api` with the given key.
    pub fn new_for_test_with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::new_for_test()
        }
    }

    /// Test configuration that accepts `key` as the admin bootstrap key.
    pub fn new_for_test_with_admin_bootstrap_key(key: impl Into<String>) -> Self {
        Self {
            admin_bootstrap_key: Some(key.into()),
            ..Self::new_for_test()
        }
    }

    #[cfg(test)]
    pub(crate) fn set_mail_transport(&mut self, transport: MailTransport) {
        self.mail_transport = transport;
    }

    pub fn environment(&self) -> Env {
        self.env
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_local(&self) -> bool {
        matches!(self.env, Env::Local)
    }

    pub fn jwt_secret_access(&self) -> &str {
        &self.jwt_secret_access
    }

    pub fn jwt_secret_refresh(&self) -> &str {
        &self.jwt_secret_refresh
    }

    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn admin_bootstrap_key(&self) -> Option<&str> {
        self.admin_bootstrap_key.as_deref()
    }

    pub fn cors_allowed_origins(&self) -> &[String] {
        &self.cors_allowed_origins
    }

    pub fn mail_transport(&self) -> &MailTransport {
        &self.mail_transport
    }

    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    pub fn mail_from_name(&self) -> &str {
        &self.mail_from_name
    }

    /// Initializes configuration by reading from environment variables
    /// and applying environment-aware defaults.
    pub fn init() -> anyhow::Result<Self> {
        info!("Loading configuration from environment variables");

        let raw_config: RawConfig = serde_env::from_iter(vars())?;
        Self::from_raw(raw_config)
    }

    fn from_raw(raw_config: RawConfig) -> anyhow::Result<Self> {
        let RawConfig {
            env,
            database_url,
            server_addr,
            port,
            jwt_secret_access,
            jwt_secret_refresh,
            app_secret,
            api_key,
            admin_bootstrap_key,
            cors_allowed_origins,
            mail_transport,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            mail_file_dir,
            mail_from,
            mail_from_name,
        } = raw_config;

        let relaxed = matches!(env, Env::Local | Env::Test);

        let server_addr = match server_addr {
            Some(addr) => {
                info!("Using provided SERVER_ADDR: {}", addr);
                addr
            }
            None => {
                let default_addr = if relaxed { "127.0.0.1" } else { "0.0.0.0" };
                info!(
                    "SERVER_ADDR not set, defaulting to {} for {} environment",
                    default_addr, env
                );
                default_addr.to_owned()
            }
        };

        let port = match port {
            Some(port) => port,
            None if relaxed => {
                info!("PORT not set, defaulting to 5000 for {} environment", env);
                5000
            }
            None => anyhow::bail!("PORT must be set for {} environment", env),
        };

        let secret = |value: Option<String>, name: &str| -> anyhow::Result<String> {
            match value {
                Some(secret) if !secret.trim().is_empty() => Ok(secret),
                _ if relaxed => {
                    info!("{} not set, using default for {} environment", name, env);
                    Ok(format!("default-{}-for-local-development-only", name.to_lowercase()))
                }
                _ => anyhow::bail!("{} must be set for {} environment", name, env),
            }
        };
        let jwt_secret_access = secret(jwt_secret_access, "JWT_SECRET_ACCESS")?;
        let jwt_secret_refresh = secret(jwt_secret_refresh, "JWT_SECRET_REFRESH")?;
        let app_secret = secret(app_secret, "APP_SECRET")?;

        let cors_allowed_origins = match cors_allowed_origins {
            Some(origins) => origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_owned)
                .collect(),
            None if relaxed => vec!["http://localhost:3000".to_owned()],
            None => Vec::new(),
        };

        let mail_kind = match mail_transport {
            Some(kind) => kind,
            None if relaxed => MailTransportKind::File,
            None => MailTransportKind::Smtp,
        };
        let mail_transport = match mail_kind {
            MailTransportKind::File => MailTransport::File {
                dir: PathBuf::from(mail_file_dir.unwrap_or_else(|| "emails".to_owned())),
            },
            MailTransportKind::Smtp => {
                let (Some(host), Some(username), Some(password)) =
                    (smtp_host, smtp_username, smtp_password)
                else {
                    anyhow::bail!(
                        "SMTP_HOST, SMTP_USERNAME and SMTP_PASSWORD must be set when MAIL_TRANSPORT is smtp"
                    );
                };
                MailTransport::Smtp {
                    host,
                    port: smtp_port.unwrap_or(587),
                    username,
                    password,
                }
            }
        };

        let mail_from = match mail_from {
            Some(from) => from,
            None if relaxed => "no-reply@localhost".to_owned(),
            None => anyhow::bail!("MAIL_FROM must be set for {} environment", env),
        };

        Ok(Config {
            env,
            database_url,
            server_addr,
            port,
            jwt_secret_access,
            jwt_secret_refresh,
            app_secret,
            api_key: api_key.filter(|key| !key.is_empty()),
            admin_bootstrap_key: admin_bootstrap_key.filter(|key| !key.trim().is_empty()),
            cors_allowed_origins,
            mail_transport,
            mail_from,
            mail_from_name: mail_from_name.unwrap_or_else(|| "Manna".to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_env::from_iter;

    #[test]
    fn local_config_fills_in_defaults() {
        let raw: RawConfig = from_iter(vec![
            ("ENV", "local"),
            ("DATABASE_URL", "postgres://example"),
        ])
        .expect("RawConfig should deserialize");

        let config = Config::from_raw(raw).expect("local config should build");
        assert_eq!(config.server_addr(), "127.0.0.1");
        assert_eq!(config.port(), 5000);
        assert!(config.api_key().is_none());
        assert!(config.admin_bootstrap_key().is_none());
        assert!(matches!(config.mail_transport(), MailTransport::File { .. }));
        assert_eq!(config.cors_allowed_origins(), ["http://localhost:3000"]);
    }

    #[test]
    fn prod_requires_port() {
        let raw: RawConfig = from_iter(vec![
            ("ENV", "prod"),
            ("DATABASE_URL", "postgres://example"),
        ])
        .expect("RawConfig should deserialize");

        let err = Config::from_raw(raw).unwrap_err().to_string();
        assert!(err.contains("PORT"), "unexpected error: {err}");
    }

    #[test]
    fn prod_requires_token_secrets() {
        let raw: RawConfig = from_iter(vec![
            ("ENV", "prod"),
            ("DATABASE_URL", "postgres://example"),
            ("PORT", "8080"),
            ("JWT_SECRET_ACCESS", "access"),
        ])
        .expect("RawConfig should deserialize");

        let err = Config::from_raw(raw).unwrap_err().to_string();
        assert!(err.contains("JWT_SECRET_REFRESH"), "unexpected error: {err}");
    }

    #[test]
    fn prod_defaults_to_smtp_and_requires_credentials() {
        let raw: RawConfig = from_iter(vec![
            ("ENV", "prod"),
            ("DATABASE_URL", "postgres://example"),
            ("PORT", "8080"),
            ("JWT_SECRET_ACCESS", "access"),
            ("JWT_SECRET_REFRESH", "refresh"),
            ("APP_SECRET", "app"),
        ])
        .expect("RawConfig should deserialize");

        let err = Config::from_raw(raw).unwrap_err().to_string();
        assert!(err.contains("SMTP_HOST"), "unexpected error: {err}");
    }

    #[test]
    fn prod_config_builds_with_everything_set() {
        let raw: RawConfig = from_iter(vec![
            ("ENV", "prod"),
            ("DATABASE_URL", "postgres://example"),
            ("PORT", "8080"),
            ("JWT_SECRET_ACCESS", "access"),
            ("JWT_SECRET_REFRESH", "refresh"),
            ("APP_SECRET", "app"),
            ("API_KEY", "key-123"),
            ("ADMIN_BOOTSTRAP_KEY", "first-admin"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ("SMTP_HOST", "smtp.example"),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "hunter2"),
            ("MAIL_FROM", "no-reply@example.org"),
        ])
        .expect("RawConfig should deserialize");

        let config = Config::from_raw(raw).expect("prod config should build");
        assert_eq!(config.server_addr(), "0.0.0.0");
        assert_eq!(config.api_key(), Some("key-123"));
        assert_eq!(config.admin_bootstrap_key(), Some("first-admin"));
        assert_eq!(
            config.cors_allowed_origins(),
            ["https://a.example", "https://b.example"]
        );
        assert_eq!(
            config.mail_transport(),
            &MailTransport::Smtp {
                host: "smtp.example".to_owned(),
                port: 587,
                username: "mailer".to_owned(),
                password: "hunter2".to_owned(),
            }
        );
    }
}
