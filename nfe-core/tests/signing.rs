mod common;

use base64ct::{Base64, Encoding};
use common::{CERT_DER, UNSIGNED_NFE, UNSIGNED_NFE_ID, sample_invoice, signer};
use nfe_core::c14n::{self, CanonicalizationMethod};
use nfe_core::dom::{Document, NamespaceScope};
use nfe_core::invoice::sign::{DigestAlgorithm, SignatureProfile};
use nfe_core::invoice::verify::{VerificationError, verify_signature};
use nfe_core::invoice::xml::ToXml;
use std::thread;

const SIGNED_INFO_LEGACY: &str = include_str!("fixtures/c14n/signed-info-legacy.xml");
const LEGACY_DIGEST: &str = "N9Kwq9XWVVRpWZfVCYzj1YbyGHk=";
const LEGACY_SIGNATURE: &str = "cbG0/5cqA6ied7n5MQyFQsQgEIS41P0Lg+0280h+HZkhmQ94bfJaHfsE7g8MlFPfCJ8TpthJIu+ftuM104ZQxJzexBDEryAJeuInf1/XIaMlX331LQjgwYmemygse5ES496PulzKDGQCjA6Sp67Z3zfCUJLAaEi5TXDddUV+Uq6VkFPSu2QiQvLFXOPeMAa/68miHVH0Lwaqr0VVYjny5n/LFjY+kAO917V2nkA+XULKDSvOt0Bzn5KmQvYw56XZsYmNzn3YRpR5o+mBgPHv17PMcDgBNUYyKXvdd5fXtA2a+uvRd0UFjd/BOK2TKK7l7ftulmlOY4wANqiG25LqCw==";

#[test]
fn legacy_profile_reproduces_reference_signature() {
    let signed = signer(SignatureProfile::legacy())
        .sign_xml(UNSIGNED_NFE)
        .expect("sign");
    let document = Document::parse(&signed).expect("parse signed");
    let root = document.root();
    let signature = root.child("Signature").expect("signature");

    assert_eq!(
        signature.child_text("SignatureValue").as_deref(),
        Some(LEGACY_SIGNATURE)
    );
    let signed_info = signature.child("SignedInfo").expect("signed info");
    assert_eq!(
        signed_info.descendant("DigestValue").map(|d| d.text()),
        Some(LEGACY_DIGEST.to_string())
    );

    let scope = NamespaceScope::new().enter(root).enter(signature);
    assert_eq!(
        c14n::canonicalize(signed_info, &scope, CanonicalizationMethod::Inclusive),
        SIGNED_INFO_LEGACY
    );
}

#[test]
fn signing_leaves_the_signed_content_untouched() {
    let signed = signer(SignatureProfile::legacy())
        .sign_xml(UNSIGNED_NFE)
        .expect("sign");
    let before = c14n::canonicalize_xml(UNSIGNED_NFE, UNSIGNED_NFE_ID, CanonicalizationMethod::Inclusive)
        .expect("before");
    let document = Document::parse(&signed).expect("parse");
    let inf = document.root().child("infNFe").expect("infNFe");
    assert!(inf.child("Signature").is_none());
    let scope = NamespaceScope::new().enter(document.root());
    assert_eq!(
        c14n::canonicalize(inf, &scope, CanonicalizationMethod::Inclusive),
        before
    );
}

#[test]
fn built_invoice_signs_and_verifies() {
    let signed = sample_invoice()
        .sign(&signer(SignatureProfile::legacy()))
        .expect("sign invoice");
    assert_eq!(signed.to_xml().expect("xml"), signed.xml());
    assert!(signed.xml().starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><NFe"));

    let verified = verify_signature(signed.xml(), None).expect("verify");
    assert_eq!(verified.reference_id, signed.access_key().document_id());
    assert_eq!(verified.digest, DigestAlgorithm::Sha1);
    assert_eq!(verified.certificate_der, CERT_DER);

    let embedded_digest = Document::parse(signed.xml())
        .expect("parse")
        .root()
        .descendant("DigestValue")
        .map(|d| d.text())
        .expect("digest value");
    assert_eq!(embedded_digest, signed.digest_value());
    assert_eq!(Base64::decode_vec(signed.digest_value()).expect("b64").len(), 20);
}

#[test]
fn hardened_profile_without_certificate_needs_one_supplied() {
    let profile = SignatureProfile::hardened().with_embed_certificate(false);
    let signed = sample_invoice().sign(&signer(profile)).expect("sign invoice");
    assert!(signed.xml().contains("xmldsig-more#rsa-sha256"));
    assert!(!signed.xml().contains("X509Certificate"));

    assert!(matches!(
        verify_signature(signed.xml(), None),
        Err(VerificationError::MissingCertificate)
    ));
    let verified = verify_signature(signed.xml(), Some(CERT_DER)).expect("verify");
    assert_eq!(verified.digest, DigestAlgorithm::Sha256);
}

#[test]
fn tampering_with_the_invoice_breaks_verification() {
    let signed = sample_invoice()
        .sign(&signer(SignatureProfile::legacy()))
        .expect("sign invoice");
    let tampered = signed.xml().replace("Parafuso sextavado", "Parafuso de ouro");
    assert_ne!(tampered, signed.xml());
    assert!(matches!(
        verify_signature(&tampered, None),
        Err(VerificationError::DigestMismatch)
    ));
}

#[test]
fn shared_signer_is_deterministic_across_threads() {
    let signer = signer(SignatureProfile::legacy());
    let outputs: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| signer.sign_xml(UNSIGNED_NFE).expect("sign")))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect()
    });
    assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
}
