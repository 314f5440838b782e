/// Configuration management for the admission server.
/// Handles command-line/environment parsing and derives the runtime
/// `Settings` the service layer is built from.
use clap::Parser;
use std::path::PathBuf;

const DEV_SESSION_SECRET: &str = "admission-dev-secret-change-me";

#[derive(Parser, Debug, Clone)]
#[command(name = "Admission Server")]
#[command(about = "College admission portal backend", long_about = None)]
pub struct Config {
    /// Server port (default: 5000)
    #[arg(long, env = "ADMISSION_PORT", default_value = "5000")]
    pub port: u16,

    /// Interface to bind (default: 127.0.0.1)
    #[arg(long, env = "ADMISSION_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// SQLite database file path (default: admission.db)
    #[arg(long, env = "DATABASE_PATH", default_value = "admission.db")]
    pub database: PathBuf,

    /// Directory uploaded documents are stored under
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Externally visible base URL, used to build document URLs
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://127.0.0.1:5000")]
    pub public_base_url: String,

    /// HMAC key for guest tokens and verification tickets
    #[arg(long, env = "SESSION_SECRET")]
    pub session_secret: Option<String>,

    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value = "587")]
    pub smtp_port: u16,

    #[arg(long, env = "SMTP_USER")]
    pub smtp_user: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    /// Sender address for verification mail, e.g. "Admissions <noreply@college.edu>"
    #[arg(long, env = "SMTP_FROM")]
    pub smtp_from: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.5-flash")]
    pub gemini_model: String,

    #[arg(
        long,
        env = "GEMINI_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub gemini_base_url: String,

    /// Echo verification codes in API responses (non-production only)
    #[arg(long, env = "EXPOSE_VERIFICATION_CODES")]
    pub expose_verification_codes: bool,

    /// Allow admin/support roles to be chosen at signup
    #[arg(long, env = "OPEN_ROLE_SIGNUP")]
    pub open_role_signup: bool,

    /// Bootstrap admin account created at startup if absent
    #[arg(long, env = "SEED_ADMIN_EMAIL")]
    pub seed_admin_email: Option<String>,

    #[arg(long, env = "SEED_ADMIN_PASSWORD")]
    pub seed_admin_password: Option<String>,

    /// PID file path (optional) - write server PID to this file on startup
    #[arg(long, env = "PIDFILE")]
    pub pidfile: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

/// Everything the service layer needs, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub session_secret: String,
    pub smtp: Option<SmtpSettings>,
    pub gemini: Option<GeminiSettings>,
    pub expose_verification_codes: bool,
    pub open_role_signup: bool,
}

impl Settings {
    /// Settings for tests and local tooling: no mail, no language model,
    /// codes echoed back.
    pub fn for_testing(upload_dir: PathBuf) -> Self {
        Settings {
            upload_dir,
            public_base_url: "http://localhost".to_string(),
            session_secret: "test-secret".to_string(),
            smtp: None,
            gemini: None,
            expose_verification_codes: true,
            open_role_signup: false,
        }
    }
}

impl Config {
    /// Parse command-line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn settings(&self) -> Settings {
        let session_secret = match &self.session_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                log::warn!("SESSION_SECRET not set, using the development default");
                DEV_SESSION_SECRET.to_string()
            }
        };

        let smtp = match (&self.smtp_host, &self.smtp_from) {
            (Some(host), Some(from)) => Some(SmtpSettings {
                host: host.clone(),
                port: self.smtp_port,
                user: self.smtp_user.clone(),
                password: self.smtp_password.clone(),
                from: from.clone(),
            }),
            _ => None,
        };

        let gemini = self
            .gemini_api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .map(|key| GeminiSettings {
                api_key: key.clone(),
                model: self.gemini_model.clone(),
                base_url: self.gemini_base_url.trim_end_matches('/').to_string(),
            });

        Settings {
            upload_dir: self.upload_dir.clone(),
            public_base_url: self.public_base_url.trim_end_matches('/').to_string(),
            session_secret,
            smtp,
            gemini,
            expose_verification_codes: self.expose_verification_codes,
            open_role_signup: self.open_role_signup,
        }
    }

    pub fn seed_admin(&self) -> Option<(&str, &str)> {
        match (&self.seed_admin_email, &self.seed_admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }
}
