//! Namespace, version and algorithm identifiers used on the wire.

/// NF-e document namespace.
pub const NFE_NS: &str = "http://www.portalfiscal.inf.br/nfe";
/// Layout version written to `infNFe/@versao` and `enviNFe/@versao`.
pub const NFE_VERSION: &str = "4.00";

/// XML Digital Signature namespace
pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const RSA_SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const SHA256_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ENVELOPED_SIGNATURE_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// SOAP 1.1 envelope namespace
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const AUTHORIZATION_WSDL_NS: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4";
pub const RECEIPT_QUERY_WSDL_NS: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/NFeRetAutorizacao4";

pub mod node {
    pub const NFE: &str = "NFe";
    pub const INF_NFE: &str = "infNFe";

    pub const SIGNATURE: &str = "Signature";
    pub const SIGNED_INFO: &str = "SignedInfo";
    pub const CANONICALIZATION_METHOD: &str = "CanonicalizationMethod";
    pub const SIGNATURE_METHOD: &str = "SignatureMethod";
    pub const REFERENCE: &str = "Reference";
    pub const TRANSFORMS: &str = "Transforms";
    pub const TRANSFORM: &str = "Transform";
    pub const DIGEST_METHOD: &str = "DigestMethod";
    pub const DIGEST_VALUE: &str = "DigestValue";
    pub const SIGNATURE_VALUE: &str = "SignatureValue";
    pub const KEY_INFO: &str = "KeyInfo";
    pub const X509_DATA: &str = "X509Data";
    pub const X509_CERTIFICATE: &str = "X509Certificate";
}
