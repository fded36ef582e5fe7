use chrono::{FixedOffset, TimeZone};
use nfe_core::config::EnvironmentType;
use nfe_core::invoice::sign::{InvoiceSigner, RsaIdentity, SignatureProfile};
use nfe_core::invoice::{
    Address, DocumentModel, FinalizedInvoice, InvoiceBuilder, Issuer, LineItem, LineItemFields,
    Payment, PaymentMethod, Recipient, RequiredInvoiceFields,
};
use std::sync::Arc;

pub const CERT_PEM: &str = include_str!("../fixtures/certs/signer-cert.pem");
pub const KEY_PEM: &str = include_str!("../fixtures/certs/signer-key.pem");
#[allow(dead_code)]
pub const CERT_DER: &[u8] = include_bytes!("../fixtures/certs/signer-cert.der");
#[allow(dead_code)]
pub const UNSIGNED_NFE: &str = include_str!("../fixtures/invoices/nfe-unsigned.xml");
#[allow(dead_code)]
pub const UNSIGNED_NFE_ID: &str = "NFe41240706101244000490550010000067271091023595";

#[allow(dead_code)]
pub fn identity() -> Arc<RsaIdentity> {
    Arc::new(RsaIdentity::from_pem(CERT_PEM, KEY_PEM).expect("identity"))
}

#[allow(dead_code)]
pub fn signer(profile: SignatureProfile) -> InvoiceSigner {
    InvoiceSigner::with_identity(profile, identity())
}

#[allow(dead_code)]
pub fn sample_invoice() -> FinalizedInvoice {
    let issued_at = FixedOffset::west_opt(3 * 3600)
        .expect("offset")
        .with_ymd_and_hms(2024, 7, 1, 10, 0, 0)
        .single()
        .expect("timestamp");

    InvoiceBuilder::new(RequiredInvoiceFields {
        jurisdiction: "41".into(),
        issued_at,
        issuer: sample_issuer(),
        model: DocumentModel::Nfe,
        series: 1,
        number: 6727,
        nonce: "09102359".into(),
        nature_of_operation: "VENDA DE MERCADORIA".into(),
        municipality_code: "4106902".into(),
        environment: EnvironmentType::Homologation,
        line_items: vec![
            sample_item("001", "Parafuso sextavado", 10.0, 1.25),
            sample_item("002", "Porca & arruela", 4.0, 0.8),
        ],
    })
    .recipient(
        Recipient::new("12345678909", "CONSUMIDOR TESTE").expect("recipient"),
    )
    .final_consumer(true)
    .payment(Payment::new(PaymentMethod::Cash, 15.7))
    .additional_info("Documento emitido em ambiente de homologacao")
    .build()
    .expect("build sample invoice")
}

fn sample_issuer() -> Issuer {
    Issuer::new(
        "06.101.244/0004-90",
        "EMPRESA TESTE LTDA",
        Address {
            street: "Rua XV de Novembro".into(),
            number: "100".into(),
            complement: Some("Sala 2".into()),
            district: "Centro".into(),
            municipality_code: "4106902".into(),
            municipality: "Curitiba".into(),
            state: "PR".into(),
            postal_code: "80020310".into(),
            phone: None,
        },
        "9012345678",
    )
    .expect("issuer")
}

fn sample_item(code: &str, description: &str, quantity: f64, unit_price: f64) -> LineItem {
    LineItem::new(LineItemFields {
        code: code.into(),
        description: description.into(),
        ncm: "73181500".into(),
        cfop: "5102".into(),
        unit: "UN".into(),
        quantity,
        unit_price,
    })
}
