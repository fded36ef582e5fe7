//! Verification of enveloped signatures produced by [`super::sign`].
use super::sign::{
    DigestAlgorithm, certificate_public_key, enveloped_transform, locate_reference, root_signature,
};
use crate::c14n::{self, C14nError, CanonicalizationMethod};
use crate::dom::{Document, DomError, Element};
use crate::invoice::xml::constants::{ENVELOPED_SIGNATURE_URI, node};
use base64ct::{Base64, Encoding};
use thiserror::Error;
use x509_cert::{
    Certificate,
    der::{Decode, DecodePem, Encode},
};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("missing signature element: {0}")]
    MissingElement(&'static str),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("reference digest does not match the signed content")]
    DigestMismatch,
    #[error("signature value does not verify against SignedInfo")]
    SignatureMismatch,
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("no certificate embedded and none supplied")]
    MissingCertificate,
    #[error("invalid base64 in {0}")]
    Base64(&'static str),
    #[error(transparent)]
    Canonicalization(#[from] C14nError),
    #[error(transparent)]
    Xml(#[from] DomError),
}

/// What a successful verification established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub reference_id: String,
    pub digest: DigestAlgorithm,
    pub canonicalization: CanonicalizationMethod,
    pub certificate_der: Vec<u8>,
}

/// Check the digest and RSA signature of an enveloped-signed document.
///
/// The `ds:Signature` must be a child of the root element, and its digest
/// and signature methods must use the same hash.
///
/// `trusted_certificate` (DER) takes precedence over the embedded
/// `X509Certificate`. No chain or validity checks are made.
pub fn verify_signature(
    xml: &str,
    trusted_certificate: Option<&[u8]>,
) -> Result<VerifiedSignature, VerificationError> {
    let document = Document::parse(xml)?;
    let (signature, signature_scope) =
        root_signature(&document).ok_or(VerificationError::MissingElement(node::SIGNATURE))?;

    let signed_info = required(signature, node::SIGNED_INFO)?;
    let canonicalization = CanonicalizationMethod::from_uri(algorithm_of(
        required(signed_info, node::CANONICALIZATION_METHOD)?,
    )?)?;
    let signature_uri = algorithm_of(required(signed_info, node::SIGNATURE_METHOD)?)?;
    let digest = DigestAlgorithm::from_signature_uri(signature_uri)
        .ok_or_else(|| VerificationError::UnsupportedAlgorithm(signature_uri.to_string()))?;

    let reference = required(signed_info, node::REFERENCE)?;
    let reference_id = reference
        .attribute("URI")
        .and_then(|uri| uri.strip_prefix('#'))
        .ok_or(VerificationError::MissingElement("Reference/@URI"))?
        .to_string();
    let digest_uri = algorithm_of(required(reference, node::DIGEST_METHOD)?)?;
    let reference_digest = DigestAlgorithm::from_digest_uri(digest_uri)
        .ok_or_else(|| VerificationError::UnsupportedAlgorithm(digest_uri.to_string()))?;
    if reference_digest != digest {
        return Err(VerificationError::UnsupportedAlgorithm(format!(
            "{digest_uri} with {signature_uri}"
        )));
    }
    let reference_c14n = reference_canonicalization(reference)?.unwrap_or(canonicalization);
    let expected_digest = decode(required(reference, node::DIGEST_VALUE)?, node::DIGEST_VALUE)?;

    let (target, target_scope) = locate_reference(&document, &reference_id)?;
    let canonical = c14n::canonicalize(
        &enveloped_transform(target, Some(signature)),
        &target_scope,
        reference_c14n,
    );
    if digest.digest(canonical.as_bytes()) != expected_digest {
        tracing::debug!(reference_id, "reference digest mismatch");
        return Err(VerificationError::DigestMismatch);
    }

    let certificate_der = match trusted_certificate {
        Some(der) => der.to_vec(),
        None => signature
            .descendant(node::X509_CERTIFICATE)
            .map(|cert| decode(cert, node::X509_CERTIFICATE))
            .transpose()?
            .ok_or(VerificationError::MissingCertificate)?,
    };
    let certificate = Certificate::from_der(&certificate_der)
        .map_err(|e| VerificationError::Certificate(e.to_string()))?;
    let public_key = certificate_public_key(&certificate)
        .map_err(|e| VerificationError::Certificate(e.to_string()))?;

    let canonical_signed_info = c14n::canonicalize(signed_info, &signature_scope, canonicalization);
    let signature_value = decode(required(signature, node::SIGNATURE_VALUE)?, node::SIGNATURE_VALUE)?;
    public_key
        .verify(
            digest.padding(),
            &digest.digest(canonical_signed_info.as_bytes()),
            &signature_value,
        )
        .map_err(|_| VerificationError::SignatureMismatch)?;

    Ok(VerifiedSignature {
        reference_id,
        digest,
        canonicalization,
        certificate_der,
    })
}

/// DER bytes of a PEM certificate, for use as `trusted_certificate`.
pub fn certificate_der_from_pem(pem: &str) -> Result<Vec<u8>, VerificationError> {
    Certificate::from_pem(pem.as_bytes())
        .and_then(|cert| cert.to_der())
        .map_err(|e| VerificationError::Certificate(e.to_string()))
}

fn required<'a>(parent: &'a Element, name: &'static str) -> Result<&'a Element, VerificationError> {
    parent
        .descendant(name)
        .ok_or(VerificationError::MissingElement(name))
}

fn algorithm_of(element: &Element) -> Result<&str, VerificationError> {
    element
        .attribute("Algorithm")
        .ok_or(VerificationError::MissingElement("Algorithm"))
}

// Canonicalization named among the reference transforms, if any.
fn reference_canonicalization(
    reference: &Element,
) -> Result<Option<CanonicalizationMethod>, VerificationError> {
    let Some(transforms) = reference.child(node::TRANSFORMS) else {
        return Ok(None);
    };
    let mut method = None;
    for transform in transforms.child_elements() {
        let uri = algorithm_of(transform)?;
        if uri == ENVELOPED_SIGNATURE_URI {
            continue;
        }
        method = Some(CanonicalizationMethod::from_uri(uri)?);
    }
    Ok(method)
}

fn decode(element: &Element, name: &'static str) -> Result<Vec<u8>, VerificationError> {
    let compact: String = element
        .text()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    Base64::decode_vec(&compact).map_err(|_| VerificationError::Base64(name))
}
