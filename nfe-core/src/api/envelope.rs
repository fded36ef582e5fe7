//! SOAP 1.1 request envelopes for the authorization web services.
use super::{SefazError, SubmissionBatch};
use crate::config::EnvironmentType;
use crate::invoice::xml::constants::{
    AUTHORIZATION_WSDL_NS, NFE_NS, NFE_VERSION, RECEIPT_QUERY_WSDL_NS, SOAP_ENV_NS,
};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

/// `enviNFe` batch inside a `NFeAutorizacao4` envelope.
pub fn authorization_request(batch: &SubmissionBatch) -> Result<String, SefazError> {
    let mut writer = open(AUTHORIZATION_WSDL_NS)?;
    write(
        &mut writer,
        Event::Start(
            BytesStart::new("enviNFe").with_attributes([("xmlns", NFE_NS), ("versao", NFE_VERSION)]),
        ),
    )?;
    text_element(&mut writer, "idLote", batch.batch_id())?;
    text_element(&mut writer, "indSinc", batch.mode().code())?;
    for document in batch.documents() {
        // signed documents go in untouched
        write(
            &mut writer,
            Event::Text(BytesText::from_escaped(strip_declaration(document))),
        )?;
    }
    write(&mut writer, Event::End(BytesEnd::new("enviNFe")))?;
    close(writer)
}

/// `consReciNFe` inside a `NFeRetAutorizacao4` envelope.
pub fn receipt_query_request(env: EnvironmentType, receipt: &str) -> Result<String, SefazError> {
    let mut writer = open(RECEIPT_QUERY_WSDL_NS)?;
    write(
        &mut writer,
        Event::Start(
            BytesStart::new("consReciNFe")
                .with_attributes([("xmlns", NFE_NS), ("versao", NFE_VERSION)]),
        ),
    )?;
    text_element(&mut writer, "tpAmb", env.tp_amb())?;
    text_element(&mut writer, "nRec", receipt)?;
    write(&mut writer, Event::End(BytesEnd::new("consReciNFe")))?;
    close(writer)
}

fn open(wsdl_ns: &str) -> Result<Writer<Vec<u8>>, SefazError> {
    let mut writer = Writer::new(Vec::new());
    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    write(
        &mut writer,
        Event::Start(
            BytesStart::new("soapenv:Envelope").with_attributes([("xmlns:soapenv", SOAP_ENV_NS)]),
        ),
    )?;
    write(&mut writer, Event::Start(BytesStart::new("soapenv:Body")))?;
    write(
        &mut writer,
        Event::Start(BytesStart::new("nfe:nfeDadosMsg").with_attributes([("xmlns:nfe", wsdl_ns)])),
    )?;
    Ok(writer)
}

fn close(mut writer: Writer<Vec<u8>>) -> Result<String, SefazError> {
    write(&mut writer, Event::End(BytesEnd::new("nfe:nfeDadosMsg")))?;
    write(&mut writer, Event::End(BytesEnd::new("soapenv:Body")))?;
    write(&mut writer, Event::End(BytesEnd::new("soapenv:Envelope")))?;
    String::from_utf8(writer.into_inner()).map_err(|e| SefazError::Envelope(e.to_string()))
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), SefazError> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(value)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), SefazError> {
    writer
        .write_event(event)
        .map_err(|e| SefazError::Envelope(e.to_string()))
}

fn strip_declaration(document: &str) -> &str {
    let trimmed = document.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}
