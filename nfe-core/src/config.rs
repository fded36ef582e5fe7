//! Configuration and environment selection.
use crate::invoice::sign::SignatureProfile;
use crate::poller::PollPolicy;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use thiserror::Error;

/// Default timeout applied to every SEFAZ exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// SEFAZ environment selection.
///
/// This determines which web service the client talks to and the `tpAmb`
/// code written into invoices and receipt queries.
/// - Production: documents have legal value (`tpAmb=1`).
/// - Homologation: the authority's test environment (`tpAmb=2`).
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use nfe_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("homologacao")?;
/// assert_eq!(env, EnvironmentType::Homologation);
/// assert_eq!(env.tp_amb(), "2");
/// # Ok::<(), nfe_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvironmentType {
    Production,
    Homologation,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "production" | "producao" | "produção" | "1" => Ok(EnvironmentType::Production),
            "homologation" | "homologacao" | "homologação" | "2" => {
                Ok(EnvironmentType::Homologation)
            }
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Homologation => "homologation",
        }
    }

    /// `tpAmb` code.
    pub fn tp_amb(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "1",
            EnvironmentType::Homologation => "2",
        }
    }

    /// Base URL of the SVRS authorizer for this environment.
    pub fn endpoint_url(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "https://nfe.svrs.rs.gov.br/",
            EnvironmentType::Homologation => "https://nfe-homologacao.svrs.rs.gov.br/",
        }
    }
}

/// Configuration for signing, submission and polling.
///
/// Nothing here is read from the process environment; callers (the CLI
/// included) build it explicitly.
///
/// # Examples
/// ```rust
/// use std::time::Duration;
/// use nfe_core::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Homologation)
///     .with_base_url("http://localhost:8080/")
///     .with_request_timeout(Duration::from_secs(5));
/// assert_eq!(config.base_url(), "http://localhost:8080/");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    base_url: Option<String>,
    request_timeout: Duration,
    signature_profile: SignatureProfile,
    poll_policy: PollPolicy,
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            base_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            signature_profile: SignatureProfile::default(),
            poll_policy: PollPolicy::default(),
        }
    }

    /// Override the authorizer base URL (contingency authorizers, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_signature_profile(mut self, profile: SignatureProfile) -> Self {
        self.signature_profile = profile;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.env.endpoint_url())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn signature_profile(&self) -> SignatureProfile {
        self.signature_profile
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EnvironmentType::Homologation)
    }
}
