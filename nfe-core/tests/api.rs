mod common;

use common::{sample_invoice, signer};
use httpmock::{Method::POST, MockServer};
use nfe_core::api::{
    ReceiptStatus, SefazClient, SefazError, SubmissionBatch, SubmissionMode, TransportError,
};
use nfe_core::config::{Config, EnvironmentType};
use nfe_core::invoice::sign::SignatureProfile;
use std::time::Duration;

const QUEUED: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><nfeResultMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4"><retEnviNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><tpAmb>2</tpAmb><cStat>103</cStat><xMotivo>Lote recebido com sucesso</xMotivo><infRec><nRec>411000098765432</nRec><tMed>1</tMed></infRec></retEnviNFe></nfeResultMsg></soap:Body></soap:Envelope>"#;

const REJECTED: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><nfeResultMsg><retConsReciNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00"><cStat>104</cStat><xMotivo>Lote processado</xMotivo><protNFe versao="4.00"><infProt><chNFe>41240706101244000490550010000067271091023595</chNFe><cStat>297</cStat><xMotivo>Rejeicao: Assinatura difere do calculado</xMotivo></infProt></protNFe></retConsReciNFe></nfeResultMsg></soap:Body></soap:Envelope>"#;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn client(server: &MockServer) -> SefazClient {
    SefazClient::new(
        Config::new(EnvironmentType::Homologation)
            .with_base_url(server.base_url())
            .with_request_timeout(Duration::from_secs(5)),
    )
    .expect("client")
}

#[test]
fn submit_signed_invoice_returns_receipt() {
    let server = MockServer::start();
    let signed = sample_invoice()
        .sign(&signer(SignatureProfile::legacy()))
        .expect("sign");
    let access_key = signed.access_key().as_str().to_string();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/ws/NfeAutorizacao/NFeAutorizacao4.asmx")
            .header("content-type", "text/xml; charset=utf-8")
            .body_contains("<idLote>20240701</idLote>")
            .body_contains("<indSinc>0</indSinc>")
            .body_contains(format!("Id=\"NFe{access_key}\""))
            .body_contains("<SignatureValue>");
        then.status(200).body(QUEUED);
    });

    let batch = SubmissionBatch::from_invoices("20240701", [&signed])
        .expect("batch")
        .with_mode(SubmissionMode::Asynchronous);
    let result = runtime()
        .block_on(client(&server).submit_batch(&batch))
        .expect("submit");

    mock.assert();
    assert_eq!(result.status(), ReceiptStatus::Processing);
    assert_eq!(result.receipt(), Some("411000098765432"));
}

#[test]
fn query_receipt_reports_rejection_reason() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/ws/NfeRetAutorizacao/NFeRetAutorizacao4.asmx")
            .body_contains("<tpAmb>2</tpAmb>")
            .body_contains("<nRec>411000098765432</nRec>");
        then.status(200).body(REJECTED);
    });

    let result = runtime()
        .block_on(client(&server).query_receipt("411000098765432"))
        .expect("query");

    mock.assert();
    assert_eq!(result.status(), ReceiptStatus::Rejected);
    assert_eq!(result.protocols()[0].status_code(), 297);
    assert_eq!(
        result.protocols()[0].reason(),
        "Rejeicao: Assinatura difere do calculado"
    );
}

#[test]
fn http_failure_propagates_as_transport_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST);
        then.status(502).body("bad gateway");
    });

    let err = runtime()
        .block_on(client(&server).query_receipt("1"))
        .expect_err("status error");
    assert!(matches!(
        err,
        SefazError::Transport(TransportError::Status { status: 502, .. })
    ));
}

#[test]
fn soap_fault_is_reported_as_fault() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST);
        then.status(500).body(
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Client</faultcode><faultstring>Requisicao invalida</faultstring></soap:Fault></soap:Body></soap:Envelope>"#,
        );
    });

    let err = runtime()
        .block_on(client(&server).query_receipt("1"))
        .expect_err("fault");
    assert!(matches!(err, SefazError::Fault { ref reason, .. } if reason == "Requisicao invalida"));
}
