//! Rust toolkit for Brazilian NF-e (access keys, XML canonicalization,
//! enveloped signatures, and SEFAZ batch submission with receipt polling).
//!
//! # Examples
//! ```rust
//! use nfe_core::config::{Config, EnvironmentType};
//!
//! let config = Config::new(EnvironmentType::Homologation);
//! assert_eq!(config.env().tp_amb(), "2");
//! ```
pub mod access_key;
pub mod api;
pub mod c14n;
pub mod config;
pub mod dom;
pub mod invoice;
pub mod poller;

use thiserror::Error;

pub use access_key::{AccessKey, AccessKeyError, AccessKeyInput};
pub use api::{SefazClient, SefazError, TransportError};
pub use c14n::{C14nError, CanonicalizationMethod};
pub use config::{Config, EnvironmentParseError, EnvironmentType};
pub use dom::DomError;
pub use invoice::sign::{InvoiceSigner, RsaIdentity, SignatureProfile, SigningError};
pub use invoice::verify::{VerificationError, verify_signature};
pub use invoice::xml::InvoiceXmlError;
pub use invoice::{InvoiceError, ValidationError};
pub use poller::{PollError, PollOutcome, PollPolicy, StatusPoller};

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    AccessKey(#[from] AccessKeyError),
    #[error(transparent)]
    Invoice(#[from] InvoiceError),
    #[error(transparent)]
    Xml(#[from] InvoiceXmlError),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Canonicalization(#[from] C14nError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Api(#[from] SefazError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{InvoiceField, ValidationIssue, ValidationKind};

    #[test]
    fn error_conversions_cover_variants() {
        let invoice_err = InvoiceError::Validation(ValidationError::new(vec![ValidationIssue {
            field: InvoiceField::Series,
            kind: ValidationKind::Missing,
            line_item_index: None,
        }]));
        let err: Error = invoice_err.into();
        assert!(matches!(err, Error::Invoice(_)));

        let err: Error = AccessKeyError::InvalidNonce {
            value: "12".into(),
        }
        .into();
        assert!(matches!(err, Error::AccessKey(_)));

        let err: Error = DomError::MissingRoot.into();
        assert!(matches!(err, Error::Dom(_)));

        let err: Error = C14nError::TargetNotFound("NFe1".into()).into();
        assert!(matches!(err, Error::Canonicalization(_)));

        let err: Error = SigningError::KeyMismatch.into();
        assert!(matches!(err, Error::Signing(_)));

        let err: Error = VerificationError::DigestMismatch.into();
        assert!(matches!(err, Error::Verification(_)));

        let err: Error = SefazError::MalformedResponse("empty".into()).into();
        assert!(matches!(err, Error::Api(_)));

        let err: Error = PollError::Timeout { attempts: 5 }.into();
        assert!(matches!(err, Error::Poll(_)));

        let err: Error = "staging"
            .parse::<EnvironmentType>()
            .expect_err("unknown environment")
            .into();
        assert!(matches!(err, Error::Environment(_)));
        assert!(err.to_string().contains("staging"));
    }
}
