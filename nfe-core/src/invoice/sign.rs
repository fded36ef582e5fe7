//! Enveloped XML digital signatures (RSA PKCS#1 v1.5) for NF-e documents.
//!
//! The pipeline is canonicalize → digest → build `SignedInfo` → canonicalize
//! `SignedInfo` in its final namespace context → sign → embed.
use crate::c14n::{self, C14nError, CanonicalizationMethod, REFERENCE_ATTRIBUTE};
use crate::dom::{Document, DomError, Element, NamespaceScope, Node};
use crate::invoice::xml::constants::{
    DS_NS, ENVELOPED_SIGNATURE_URI, RSA_SHA1_URI, RSA_SHA256_URI, SHA1_URI, SHA256_URI, node,
};
use crate::invoice::xml::{InvoiceXmlError, ToXml};
use crate::invoice::{FinalizedInvoice, SignedInvoice};
use base64ct::{Base64, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use x509_cert::{
    Certificate,
    der::{Decode, DecodePem, Encode},
};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signer not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("private key error: {0}")]
    PrivateKey(String),
    #[error("private key does not match the certificate public key")]
    KeyMismatch,
    #[error("document has no {0} element carrying an Id")]
    MissingReference(&'static str),
    #[error("document is already signed")]
    AlreadySigned,
    #[error(transparent)]
    Canonicalization(#[from] C14nError),
    #[error(transparent)]
    Xml(#[from] DomError),
    #[error(transparent)]
    Serialize(#[from] InvoiceXmlError),
    #[error("RSA signing failed: {0}")]
    Rsa(#[from] rsa::Error),
}

/// Hash used for both the reference digest and the RSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn digest_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => SHA1_URI,
            DigestAlgorithm::Sha256 => SHA256_URI,
        }
    }

    pub fn signature_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => RSA_SHA1_URI,
            DigestAlgorithm::Sha256 => RSA_SHA256_URI,
        }
    }

    pub fn from_digest_uri(uri: &str) -> Option<Self> {
        match uri {
            SHA1_URI => Some(DigestAlgorithm::Sha1),
            SHA256_URI => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn from_signature_uri(uri: &str) -> Option<Self> {
        match uri {
            RSA_SHA1_URI => Some(DigestAlgorithm::Sha1),
            RSA_SHA256_URI => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    /// PKCS#1 v1.5 scheme carrying this hash's DigestInfo prefix.
    pub(crate) fn padding(&self) -> Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        }
    }
}

/// Signing configuration.
///
/// # Examples
/// ```rust
/// use nfe_core::invoice::sign::{DigestAlgorithm, SignatureProfile};
///
/// let profile = SignatureProfile::hardened().with_embed_certificate(false);
/// assert_eq!(profile.digest(), DigestAlgorithm::Sha256);
/// assert!(!profile.embed_certificate());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureProfile {
    digest: DigestAlgorithm,
    canonicalization: CanonicalizationMethod,
    embed_certificate: bool,
}

impl SignatureProfile {
    /// SHA-1 / RSA-SHA1, what the NF-e 4.00 layout mandates.
    pub fn legacy() -> Self {
        Self {
            digest: DigestAlgorithm::Sha1,
            canonicalization: CanonicalizationMethod::Inclusive,
            embed_certificate: true,
        }
    }

    /// SHA-256 / RSA-SHA256.
    pub fn hardened() -> Self {
        Self {
            digest: DigestAlgorithm::Sha256,
            ..Self::legacy()
        }
    }

    pub fn with_canonicalization(mut self, method: CanonicalizationMethod) -> Self {
        self.canonicalization = method;
        self
    }

    pub fn with_embed_certificate(mut self, embed: bool) -> Self {
        self.embed_certificate = embed;
        self
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    pub fn canonicalization(&self) -> CanonicalizationMethod {
        self.canonicalization
    }

    pub fn embed_certificate(&self) -> bool {
        self.embed_certificate
    }
}

impl Default for SignatureProfile {
    fn default() -> Self {
        Self::legacy()
    }
}

/// Holder of the signing key and its certificate.
///
/// Implementations sign a pre-computed digest; the key never leaves them.
pub trait SigningIdentity: Send + Sync {
    /// RSA PKCS#1 v1.5 signature over `digest`, which was produced with
    /// `algorithm`.
    fn sign_digest(&self, algorithm: DigestAlgorithm, digest: &[u8])
    -> Result<Vec<u8>, SigningError>;

    /// DER-encoded X.509 certificate of the signing key.
    fn certificate_der(&self) -> &[u8];
}

/// In-memory RSA key plus certificate, loaded from PEM or DER.
///
/// # Examples
/// ```rust
/// use nfe_core::invoice::sign::{RsaIdentity, SigningIdentity};
///
/// let fixtures = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/certs");
/// let identity = RsaIdentity::from_pem(
///     &std::fs::read_to_string(format!("{fixtures}/signer-cert.pem"))?,
///     &std::fs::read_to_string(format!("{fixtures}/signer-key.pem"))?,
/// )?;
/// assert!(!identity.certificate_der().is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RsaIdentity {
    key: RsaPrivateKey,
    public_key: RsaPublicKey,
    certificate_der: Vec<u8>,
}

impl RsaIdentity {
    /// Load a PEM certificate and a PKCS#8 or PKCS#1 PEM private key.
    pub fn from_pem(cert_pem: &str, private_key_pem: &str) -> Result<Self, SigningError> {
        let cert = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(|e| SigningError::Certificate(format!("certificate parse error: {e}")))?;
        let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| SigningError::PrivateKey(format!("private key parse error: {e}")))?;
        Self::new(&cert, key)
    }

    /// Load a DER certificate and a PKCS#8 or PKCS#1 DER private key.
    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let cert = Certificate::from_der(cert_der)
            .map_err(|e| SigningError::Certificate(format!("certificate parse error: {e}")))?;
        let key = RsaPrivateKey::from_pkcs8_der(private_key_der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(private_key_der))
            .map_err(|e| SigningError::PrivateKey(format!("private key parse error: {e}")))?;
        Self::new(&cert, key)
    }

    fn new(cert: &Certificate, key: RsaPrivateKey) -> Result<Self, SigningError> {
        let public_key = certificate_public_key(cert)?;
        if key.to_public_key() != public_key {
            return Err(SigningError::KeyMismatch);
        }
        let certificate_der = cert
            .to_der()
            .map_err(|e| SigningError::Certificate(format!("certificate DER encoding error: {e}")))?;
        Ok(Self {
            key,
            public_key,
            certificate_der,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

impl SigningIdentity for RsaIdentity {
    fn sign_digest(
        &self,
        algorithm: DigestAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        Ok(self.key.sign(algorithm.padding(), digest)?)
    }

    fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }
}

impl fmt::Debug for RsaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaIdentity")
            .field("certificate_der_len", &self.certificate_der.len())
            .finish_non_exhaustive()
    }
}

/// RSA public key from a certificate's SubjectPublicKeyInfo.
pub(crate) fn certificate_public_key(cert: &Certificate) -> Result<RsaPublicKey, SigningError> {
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SigningError::Certificate(format!("public key encoding error: {e}")))?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| SigningError::Certificate(format!("certificate key is not RSA: {e}")))
}

/// Base64 values produced by a signing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutput {
    pub digest_value: String,
    pub signature_value: String,
}

/// Signs NF-e documents with a configured profile and identity.
///
/// The identity is shared read-only, so one signer can serve concurrent
/// pipelines.
#[derive(Clone)]
pub struct InvoiceSigner {
    profile: SignatureProfile,
    identity: Option<Arc<dyn SigningIdentity>>,
}

impl fmt::Debug for InvoiceSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvoiceSigner")
            .field("profile", &self.profile)
            .field("has_identity", &self.identity.is_some())
            .finish()
    }
}

impl InvoiceSigner {
    /// A signer without an identity; every signing call fails until one is set.
    pub fn new(profile: SignatureProfile) -> Self {
        Self {
            profile,
            identity: None,
        }
    }

    pub fn with_identity(profile: SignatureProfile, identity: Arc<dyn SigningIdentity>) -> Self {
        Self {
            profile,
            identity: Some(identity),
        }
    }

    /// Convenience for the common PEM pair.
    pub fn from_pem(
        profile: SignatureProfile,
        cert_pem: &str,
        private_key_pem: &str,
    ) -> Result<Self, SigningError> {
        let identity = RsaIdentity::from_pem(cert_pem, private_key_pem)?;
        Ok(Self::with_identity(profile, Arc::new(identity)))
    }

    pub fn set_identity(&mut self, identity: Arc<dyn SigningIdentity>) {
        self.identity = Some(identity);
    }

    pub fn profile(&self) -> SignatureProfile {
        self.profile
    }

    fn identity(&self) -> Result<&Arc<dyn SigningIdentity>, SigningError> {
        self.identity
            .as_ref()
            .ok_or(SigningError::NotInitialized("no signing identity configured"))
    }

    /// Hash canonical bytes with the profile's digest algorithm.
    pub fn compute_digest(&self, canonical: &[u8]) -> Vec<u8> {
        self.profile.digest.digest(canonical)
    }

    /// Sign a pre-computed digest through the identity.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        self.identity()?.sign_digest(self.profile.digest, digest)
    }

    /// Build the `Signature` element from raw digest and signature bytes.
    pub fn assemble_signature_block(
        &self,
        digest_value: &[u8],
        signature_value: &[u8],
        certificate_der: Option<&[u8]>,
        reference_id: &str,
    ) -> Element {
        let mut signature = signature_shell()
            .with_child(self.signed_info(digest_value, reference_id))
            .with_child(
                Element::new(node::SIGNATURE_VALUE)
                    .with_text(Base64::encode_string(signature_value)),
            );
        if let Some(der) = certificate_der {
            signature = signature.with_child(
                Element::new(node::KEY_INFO).with_child(
                    Element::new(node::X509_DATA).with_child(
                        Element::new(node::X509_CERTIFICATE).with_text(Base64::encode_string(der)),
                    ),
                ),
            );
        }
        signature
    }

    /// Append `signature` as the last child of the root element.
    pub fn embed(&self, document: &mut Document, signature: Element) {
        document.root_mut().push_child(Node::Element(signature));
    }

    /// Sign the element whose `Id` equals `reference_id` and embed the
    /// signature into `document`.
    ///
    /// # Errors
    /// [`SigningError::NotInitialized`] without an identity,
    /// [`SigningError::AlreadySigned`] when the root already holds a
    /// signature, canonicalization errors for a missing or duplicated id, and
    /// RSA failures.
    pub fn sign_document(
        &self,
        document: &mut Document,
        reference_id: &str,
    ) -> Result<SignatureOutput, SigningError> {
        let identity = self.identity()?;
        if root_signature(document).is_some() {
            return Err(SigningError::AlreadySigned);
        }

        let (target, scope) = locate_reference(document, reference_id)?;
        let canonical = c14n::canonicalize(
            &enveloped_transform(target, None),
            &scope,
            self.profile.canonicalization,
        );
        let digest = self.compute_digest(canonical.as_bytes());

        let signed_info = self.signed_info(&digest, reference_id);
        let signed_info_scope = NamespaceScope::new()
            .enter(document.root())
            .enter(&signature_shell());
        let canonical_signed_info = c14n::canonicalize(
            &signed_info,
            &signed_info_scope,
            self.profile.canonicalization,
        );
        let signed_info_digest = self.compute_digest(canonical_signed_info.as_bytes());
        let signature_value = identity.sign_digest(self.profile.digest, &signed_info_digest)?;

        let certificate = self
            .profile
            .embed_certificate
            .then(|| identity.certificate_der());
        let block =
            self.assemble_signature_block(&digest, &signature_value, certificate, reference_id);
        self.embed(document, block);

        Ok(SignatureOutput {
            digest_value: Base64::encode_string(&digest),
            signature_value: Base64::encode_string(&signature_value),
        })
    }

    /// Sign serialized NF-e XML, locating the `infNFe/@Id` reference itself.
    pub fn sign_xml(&self, xml: &str) -> Result<String, SigningError> {
        let mut document = Document::parse(xml)?;
        let reference_id = reference_id_of(&document)?;
        self.sign_document(&mut document, &reference_id)?;
        Ok(document.to_xml())
    }

    pub(crate) fn sign(&self, invoice: FinalizedInvoice) -> Result<SignedInvoice, SigningError> {
        let unsigned_xml = invoice.to_xml()?;
        let mut document = Document::parse(&unsigned_xml)?;
        let output = self.sign_document(&mut document, &invoice.document_id())?;
        let signed_xml = document.to_xml();
        Ok(invoice.into_signed(output.digest_value, output.signature_value, signed_xml))
    }

    fn signed_info(&self, digest_value: &[u8], reference_id: &str) -> Element {
        let c14n_uri = self.profile.canonicalization.uri();
        Element::new(node::SIGNED_INFO)
            .with_child(
                Element::new(node::CANONICALIZATION_METHOD).with_attribute("Algorithm", c14n_uri),
            )
            .with_child(
                Element::new(node::SIGNATURE_METHOD)
                    .with_attribute("Algorithm", self.profile.digest.signature_uri()),
            )
            .with_child(
                Element::new(node::REFERENCE)
                    .with_attribute("URI", format!("#{reference_id}"))
                    .with_child(
                        Element::new(node::TRANSFORMS)
                            .with_child(
                                Element::new(node::TRANSFORM)
                                    .with_attribute("Algorithm", ENVELOPED_SIGNATURE_URI),
                            )
                            .with_child(
                                Element::new(node::TRANSFORM).with_attribute("Algorithm", c14n_uri),
                            ),
                    )
                    .with_child(
                        Element::new(node::DIGEST_METHOD)
                            .with_attribute("Algorithm", self.profile.digest.digest_uri()),
                    )
                    .with_child(
                        Element::new(node::DIGEST_VALUE)
                            .with_text(Base64::encode_string(digest_value)),
                    ),
            )
    }
}

fn signature_shell() -> Element {
    Element::new(node::SIGNATURE).with_namespace(None, DS_NS)
}

/// `Id` of the `infNFe` element (or of the root when it is `infNFe`).
pub(crate) fn reference_id_of(document: &Document) -> Result<String, SigningError> {
    let root = document.root();
    let inf = if root.local_name() == node::INF_NFE {
        Some(root)
    } else {
        root.descendant(node::INF_NFE)
    };
    inf.and_then(|element| element.attribute(REFERENCE_ATTRIBUTE))
        .map(str::to_string)
        .ok_or(SigningError::MissingReference(node::INF_NFE))
}

/// The single element carrying `Id=reference_id`, with its inherited scope.
pub(crate) fn locate_reference<'d>(
    document: &'d Document,
    reference_id: &str,
) -> Result<(&'d Element, NamespaceScope), C14nError> {
    let located = c14n::locate_by_id(document, reference_id)?;
    Ok((located.element(), located.scope().clone()))
}

/// The `ds:Signature` child of the root, with the scope inside it.
pub(crate) fn root_signature(document: &Document) -> Option<(&Element, NamespaceScope)> {
    let root_scope = NamespaceScope::new().enter(document.root());
    document.root().child_elements().find_map(|child| {
        let scope = root_scope.enter(child);
        let is_signature = child.local_name() == node::SIGNATURE
            && scope.resolve(child.name().prefix()) == Some(DS_NS);
        is_signature.then_some((child, scope))
    })
}

/// Copy of `target` without `signature`, when that element lies inside it.
///
/// `signature` is matched by identity; other `Signature` elements stay.
pub(crate) fn enveloped_transform(target: &Element, signature: Option<&Element>) -> Element {
    let mut copy = target.clone();
    if let Some(path) = signature.and_then(|signature| path_to(target, signature)) {
        remove_at(&mut copy, &path);
    }
    copy
}

// Child indices leading from `element` down to `needle`.
fn path_to(element: &Element, needle: &Element) -> Option<Vec<usize>> {
    element
        .children()
        .iter()
        .enumerate()
        .find_map(|(index, child)| match child {
            Node::Element(child) if std::ptr::eq(child, needle) => Some(vec![index]),
            Node::Element(child) => path_to(child, needle).map(|mut path| {
                path.insert(0, index);
                path
            }),
            _ => None,
        })
}

fn remove_at(element: &mut Element, path: &[usize]) {
    match path {
        [] => {}
        [index] => {
            element.children_mut().remove(*index);
        }
        [index, rest @ ..] => {
            if let Some(Node::Element(child)) = element.children_mut().get_mut(*index) {
                remove_at(child, rest);
            }
        }
    }
}
