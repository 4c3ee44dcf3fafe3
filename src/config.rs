use std::env;
use std::fmt;
use std::str::FromStr;

/// Which transport delivers outbound mail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailerKind {
    Smtp,
    Resend,
    Log,
}

impl FromStr for MailerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(MailerKind::Smtp),
            "resend" => Ok(MailerKind::Resend),
            "log" => Ok(MailerKind::Log),
            other => Err(ConfigError::UnknownMailer(other.to_string())),
        }
    }
}

impl fmt::Display for MailerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MailerKind::Smtp => "smtp",
            MailerKind::Resend => "resend",
            MailerKind::Log => "log",
        })
    }
}

/// SMTP connection security
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpEncryption {
    /// Plain connection upgraded with STARTTLS (`tls`)
    StartTls,
    /// TLS from the first byte (`ssl`)
    Implicit,
    None,
}

impl FromStr for SmtpEncryption {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" | "starttls" => Ok(SmtpEncryption::StartTls),
            "ssl" | "smtps" => Ok(SmtpEncryption::Implicit),
            "" | "none" | "null" => Ok(SmtpEncryption::None),
            other => Err(ConfigError::UnknownEncryption(other.to_string())),
        }
    }
}

impl fmt::Display for SmtpEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SmtpEncryption::StartTls => "tls",
            SmtpEncryption::Implicit => "ssl",
            SmtpEncryption::None => "none",
        })
    }
}

/// Backing store for the shared send counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStoreKind {
    Redis,
    Memory,
}

impl FromStr for RateLimitStoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(RateLimitStoreKind::Redis),
            "memory" => Ok(RateLimitStoreKind::Memory),
            other => Err(ConfigError::UnknownRateLimitStore(other.to_string())),
        }
    }
}

/// Delay policy between delivery attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(ConfigError::UnknownBackoff(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub redis_url: String,
    pub mail_mailer: MailerKind,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_encryption: SmtpEncryption,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Per-attempt delivery timeout for every network transport
    pub mail_timeout_seconds: u64,
    pub smtp_local_domain: Option<String>,
    pub resend_api_key: Option<String>,
    pub mail_from_address: String,
    pub mail_from_name: Option<String>,
    pub mail_reply_to_address: Option<String>,
    pub mail_reply_to_name: Option<String>,
    pub queue_connection: String,
    pub mail_queue_name: String,
    pub rate_limit_store: RateLimitStoreKind,
    pub rate_limit_max: u64,
    pub rate_limit_window_seconds: u64,
    pub mail_max_retries: u32,
    pub mail_retry_delay_seconds: u64,
    pub mail_retry_backoff: BackoffKind,
    pub template_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mail_mailer: MailerKind = var("MAIL_MAILER", "smtp").parse()?;
        let resend_api_key = optional("RESEND_API_KEY");
        if mail_mailer == MailerKind::Resend && resend_api_key.is_none() {
            return Err(ConfigError::MissingResendApiKey);
        }

        let rate_limit_max: u64 = var("RATE_LIMIT_MAX", "100")
            .parse()
            .map_err(|_| ConfigError::InvalidRateLimit)?;
        let rate_limit_window_seconds: u64 = var("RATE_LIMIT_WINDOW_SECONDS", "3600")
            .parse()
            .map_err(|_| ConfigError::InvalidRateLimit)?;
        if rate_limit_max == 0 || rate_limit_window_seconds == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }

        let mail_timeout_seconds: u64 = var("MAIL_TIMEOUT", "60")
            .parse()
            .map_err(|_| ConfigError::InvalidMailTimeout)?;
        if mail_timeout_seconds == 0 {
            return Err(ConfigError::InvalidMailTimeout);
        }

        let mail_max_retries: u32 = var("MAIL_MAX_RETRIES", "3")
            .parse()
            .map_err(|_| ConfigError::InvalidRetries)?;
        if mail_max_retries == 0 {
            return Err(ConfigError::InvalidRetries);
        }

        Ok(Config {
            server_host: var("SERVER_HOST", "0.0.0.0"),
            server_port: var("SERVER_PORT", "8080")
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            redis_url: var("REDIS_URL", "redis://localhost:6379"),
            mail_mailer,
            smtp_host: var("MAIL_HOST", "smtp.mailgun.org"),
            smtp_port: var("MAIL_PORT", "587")
                .parse()
                .map_err(|_| ConfigError::InvalidSmtpPort)?,
            smtp_encryption: var("MAIL_ENCRYPTION", "tls").parse()?,
            smtp_username: optional("MAIL_USERNAME"),
            smtp_password: optional("MAIL_PASSWORD"),
            mail_timeout_seconds,
            smtp_local_domain: optional("MAIL_EHLO_DOMAIN"),
            resend_api_key,
            mail_from_address: var("MAIL_FROM_ADDRESS", "hello@example.com"),
            mail_from_name: Some(var("MAIL_FROM_NAME", "Example")).filter(|v| !v.is_empty()),
            mail_reply_to_address: Some(var("MAIL_REPLY_TO_ADDRESS", "hello@example.com"))
                .filter(|v| !v.is_empty()),
            mail_reply_to_name: Some(var("MAIL_REPLY_TO_NAME", "Example"))
                .filter(|v| !v.is_empty()),
            queue_connection: var("QUEUE_CONNECTION", "sync"),
            mail_queue_name: var("MAIL_QUEUE_NAME", "emails"),
            rate_limit_store: var("RATE_LIMIT_STORE", "redis").parse()?,
            rate_limit_max,
            rate_limit_window_seconds,
            mail_max_retries,
            mail_retry_delay_seconds: var("MAIL_RETRY_DELAY_SECONDS", "5")
                .parse()
                .map_err(|_| ConfigError::InvalidRetryDelay)?,
            mail_retry_backoff: var("MAIL_RETRY_BACKOFF", "fixed").parse()?,
            template_dir: var("TEMPLATE_DIR", "templates"),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server port")]
    InvalidPort,
    #[error("Invalid MAIL_PORT")]
    InvalidSmtpPort,
    #[error("MAIL_TIMEOUT must be a positive number of seconds")]
    InvalidMailTimeout,
    #[error("Unknown mailer: {0}")]
    UnknownMailer(String),
    #[error("Unknown mail encryption: {0}")]
    UnknownEncryption(String),
    #[error("Unknown rate limit store: {0}")]
    UnknownRateLimitStore(String),
    #[error("Unknown retry backoff: {0}")]
    UnknownBackoff(String),
    #[error("RATE_LIMIT_MAX and RATE_LIMIT_WINDOW_SECONDS must be positive integers")]
    InvalidRateLimit,
    #[error("MAIL_MAX_RETRIES must be a positive integer")]
    InvalidRetries,
    #[error("Invalid MAIL_RETRY_DELAY_SECONDS")]
    InvalidRetryDelay,
    #[error("RESEND_API_KEY environment variable is required when MAIL_MAILER=resend")]
    MissingResendApiKey,
}
