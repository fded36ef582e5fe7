//! XML serialization for invoices.
use super::{
    Address, FinalizedInvoice, InvoiceData, InvoiceTotalsData, InvoiceView, Issuer, LineItem,
    Payment, Recipient, SignedInvoice,
};

use constants::{NFE_NS, NFE_VERSION};
use helpers::FixedPrecision;
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub mod constants;

/// Wrapper for serializing invoices to XML.
pub struct InvoiceXml<'a, T: InvoiceView + ?Sized>(pub &'a T);

/// XML serialization error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
///
/// SEFAZ rejects documents with formatting whitespace, so anything meant to
/// be signed and submitted must stay [`XmlFormat::Compact`].
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

mod helpers {
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }

        pub(super) fn amount(value: f64) -> Self {
            Self::new(value, 2)
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }
}

struct IdeXml<'a> {
    data: &'a InvoiceData,
    check_digit: u8,
}

impl<'a> Serialize for IdeXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.data;
        // DANFE layout: portrait for NF-e, simplified for NFC-e
        let print_format = match data.model() {
            super::DocumentModel::Nfe => "1",
            super::DocumentModel::Nfce => "4",
        };

        let mut st = s.serialize_struct("ide", 19)?;
        st.serialize_field("cUF", data.jurisdiction())?;
        st.serialize_field("cNF", data.nonce())?;
        st.serialize_field("natOp", data.nature_of_operation())?;
        st.serialize_field("mod", data.model().code())?;
        st.serialize_field("serie", &data.series().to_string())?;
        st.serialize_field("nNF", &data.number().to_string())?;
        st.serialize_field("dhEmi", &data.issued_at_string())?;
        st.serialize_field("tpNF", data.operation_type().code())?;
        st.serialize_field("idDest", data.destination().code())?;
        st.serialize_field("cMunFG", data.municipality_code())?;
        st.serialize_field("tpImp", print_format)?;
        st.serialize_field("tpEmis", data.emission_mode().code())?;
        st.serialize_field("cDV", &self.check_digit.to_string())?;
        st.serialize_field("tpAmb", data.environment().tp_amb())?;
        st.serialize_field("finNFe", data.purpose().code())?;
        st.serialize_field("indFinal", if data.is_final_consumer() { "1" } else { "0" })?;
        st.serialize_field("indPres", data.presence().code())?;
        st.serialize_field("procEmi", "0")?;
        st.serialize_field("verProc", data.application_version())?;
        st.end()
    }
}

struct AddressXml<'a>(&'a Address);

impl<'a> Serialize for AddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let address = self.0;
        let mut st = s.serialize_struct("ender", 11)?;
        st.serialize_field("xLgr", address.street())?;
        st.serialize_field("nro", address.number())?;
        if let Some(complement) = address.complement() {
            st.serialize_field("xCpl", complement)?;
        }
        st.serialize_field("xBairro", address.district())?;
        st.serialize_field("cMun", address.municipality_code())?;
        st.serialize_field("xMun", address.municipality())?;
        st.serialize_field("UF", address.state())?;
        st.serialize_field("CEP", address.postal_code())?;
        st.serialize_field("cPais", "1058")?;
        st.serialize_field("xPais", "Brasil")?;
        if let Some(phone) = address.phone() {
            st.serialize_field("fone", phone)?;
        }
        st.end()
    }
}

struct IssuerXml<'a>(&'a Issuer);

impl<'a> Serialize for IssuerXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let issuer = self.0;
        let mut st = s.serialize_struct("emit", 6)?;
        st.serialize_field("CNPJ", issuer.tax_id().as_str())?;
        st.serialize_field("xNome", issuer.name())?;
        if let Some(trade_name) = issuer.trade_name() {
            st.serialize_field("xFant", trade_name)?;
        }
        st.serialize_field("enderEmit", &AddressXml(issuer.address()))?;
        st.serialize_field("IE", issuer.state_registration())?;
        st.serialize_field("CRT", issuer.tax_regime().code())?;
        st.end()
    }
}

struct RecipientXml<'a>(&'a Recipient);

impl<'a> Serialize for RecipientXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let recipient = self.0;
        let mut st = s.serialize_struct("dest", 6)?;
        let id_tag = if recipient.tax_id().is_cnpj() { "CNPJ" } else { "CPF" };
        st.serialize_field(id_tag, recipient.tax_id().as_str())?;
        st.serialize_field("xNome", recipient.name())?;
        if let Some(address) = recipient.address() {
            st.serialize_field("enderDest", &AddressXml(address))?;
        }
        st.serialize_field("indIEDest", recipient.taxpayer().code())?;
        if let Some(registration) = recipient.state_registration() {
            st.serialize_field("IE", registration)?;
        }
        if let Some(email) = recipient.email() {
            st.serialize_field("email", email)?;
        }
        st.end()
    }
}

struct ProductXml<'a>(&'a LineItem);

impl<'a> Serialize for ProductXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let li = self.0;
        let mut st = s.serialize_struct("prod", 14)?;
        st.serialize_field("cProd", li.code())?;
        st.serialize_field("cEAN", li.gtin())?;
        st.serialize_field("xProd", li.description())?;
        st.serialize_field("NCM", li.ncm())?;
        st.serialize_field("CFOP", li.cfop())?;
        st.serialize_field("uCom", li.unit())?;
        st.serialize_field("qCom", &FixedPrecision::new(li.quantity(), 4))?;
        st.serialize_field("vUnCom", &FixedPrecision::new(li.unit_price(), 10))?;
        st.serialize_field("vProd", &FixedPrecision::amount(li.total_amount()))?;
        st.serialize_field("cEANTrib", li.gtin())?;
        st.serialize_field("uTrib", li.unit())?;
        st.serialize_field("qTrib", &FixedPrecision::new(li.quantity(), 4))?;
        st.serialize_field("vUnTrib", &FixedPrecision::new(li.unit_price(), 10))?;
        st.serialize_field("indTot", "1")?;
        st.end()
    }
}

struct DetXml<'a>(usize, &'a LineItem);

impl<'a> Serialize for DetXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("det", 2)?;
        st.serialize_field("@nItem", &self.0.to_string())?;
        st.serialize_field("prod", &ProductXml(self.1))?;
        st.end()
    }
}

struct TotalXml<'a>(&'a InvoiceTotalsData);

impl<'a> Serialize for TotalXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct IcmsTot<'a>(&'a InvoiceTotalsData);

        impl<'a> Serialize for IcmsTot<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let zero = FixedPrecision::amount(0.0);
                let mut st = s.serialize_struct("ICMSTot", 19)?;
                for tag in [
                    "vBC", "vICMS", "vICMSDeson", "vFCP", "vBCST", "vST", "vFCPST", "vFCPSTRet",
                ] {
                    st.serialize_field(tag, &zero)?;
                }
                st.serialize_field("vProd", &FixedPrecision::amount(self.0.products()))?;
                for tag in [
                    "vFrete", "vSeg", "vDesc", "vII", "vIPI", "vIPIDevol", "vPIS", "vCOFINS",
                    "vOutro",
                ] {
                    st.serialize_field(tag, &zero)?;
                }
                st.serialize_field("vNF", &FixedPrecision::amount(self.0.invoice_total()))?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("total", 1)?;
        st.serialize_field("ICMSTot", &IcmsTot(self.0))?;
        st.end()
    }
}

struct PaymentsXml<'a>(&'a [Payment]);

impl<'a> Serialize for PaymentsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct DetPag<'a>(&'a Payment);

        impl<'a> Serialize for DetPag<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("detPag", 2)?;
                st.serialize_field("tPag", self.0.method().code())?;
                st.serialize_field("vPag", &FixedPrecision::amount(self.0.amount()))?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("pag", self.0.len())?;
        for payment in self.0 {
            st.serialize_field("detPag", &DetPag(payment))?;
        }
        st.end()
    }
}

struct InfNfeXml<'a, T: InvoiceView + ?Sized>(&'a T);

impl<'a, T: InvoiceView + ?Sized> Serialize for InfNfeXml<'a, T> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let data = view.data();
        let key = view.access_key();

        let mut st = s.serialize_struct("infNFe", 0)?;
        st.serialize_field("@Id", &key.document_id())?;
        st.serialize_field("@versao", NFE_VERSION)?;

        st.serialize_field(
            "ide",
            &IdeXml {
                data,
                check_digit: key.check_digit(),
            },
        )?;
        st.serialize_field("emit", &IssuerXml(data.issuer()))?;
        if let Some(recipient) = data.recipient() {
            st.serialize_field("dest", &RecipientXml(recipient))?;
        }

        for (i, line) in data.line_items().iter().enumerate() {
            st.serialize_field("det", &DetXml(i + 1, line))?;
        }

        st.serialize_field("total", &TotalXml(view.totals()))?;
        st.serialize_field("transp", &FreightXml(data.freight_mode().code()))?;
        st.serialize_field("pag", &PaymentsXml(data.payments()))?;

        if let Some(info) = data.additional_info() {
            st.serialize_field("infAdic", &AdditionalInfoXml(info))?;
        }

        st.end()
    }
}

struct FreightXml(&'static str);

impl Serialize for FreightXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("transp", 1)?;
        st.serialize_field("modFrete", self.0)?;
        st.end()
    }
}

struct AdditionalInfoXml<'a>(&'a str);

impl<'a> Serialize for AdditionalInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("infAdic", 1)?;
        st.serialize_field("infCpl", self.0)?;
        st.end()
    }
}

/// Serialize invoices to XML.
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::invoice::xml::ToXml;
/// use nfe_core::invoice::FinalizedInvoice;
///
/// let invoice: FinalizedInvoice = unimplemented!();
/// let xml = invoice.to_xml()?;
/// # let _ = xml;
/// # Ok::<(), nfe_core::invoice::xml::InvoiceXmlError>(())
/// ```
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError>;

    fn to_xml(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for FinalizedInvoice {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        to_xml_with_format(self, format)
    }
}

impl ToXml for SignedInvoice {
    /// The signed document is returned as signed; reformatting it would
    /// break the signature, so `format` is ignored.
    fn to_xml_with_format(&self, _format: XmlFormat) -> Result<String, InvoiceXmlError> {
        Ok(self.xml().to_string())
    }
}

fn to_xml_with_format<T: InvoiceView + ?Sized>(
    invoice: &T,
    format: XmlFormat,
) -> Result<String, InvoiceXmlError> {
    let mut buffer = String::with_capacity(4096);
    buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    if matches!(format, XmlFormat::Pretty { .. }) {
        buffer.push('\n');
    }

    {
        let mut serializer = QuickXmlSerializer::new(&mut buffer);
        if let XmlFormat::Pretty {
            indent_char,
            indent_size,
        } = format
        {
            serializer.indent(indent_char, indent_size);
        }
        InvoiceXml(invoice).serialize(serializer)?;
    }

    Ok(buffer)
}

impl<'a, T: InvoiceView + ?Sized> Serialize for InvoiceXml<'a, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut root = serializer.serialize_struct("NFe", 2)?;
        root.serialize_field("@xmlns", NFE_NS)?;
        root.serialize_field("infNFe", &InfNfeXml(self.0))?;
        root.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentType;
    use crate::dom::Document;
    use crate::invoice::{
        DocumentModel, InvoiceBuilder, LineItemFields, Payment, PaymentMethod,
        RequiredInvoiceFields,
    };
    use chrono::{FixedOffset, TimeZone};

    fn invoice() -> FinalizedInvoice {
        let address = Address {
            street: "Rua XV de Novembro".into(),
            number: "100".into(),
            complement: Some("Sala 2".into()),
            district: "Centro".into(),
            municipality_code: "4106902".into(),
            municipality: "Curitiba".into(),
            state: "PR".into(),
            postal_code: "80020310".into(),
            phone: None,
        };
        let issuer = Issuer::new("06101244000490", "EMPRESA TESTE & CIA", address, "9012345678")
            .expect("issuer");
        let recipient = Recipient::new("123.456.789-09", "CONSUMIDOR").expect("recipient");

        InvoiceBuilder::new(RequiredInvoiceFields {
            jurisdiction: "41".into(),
            issued_at: FixedOffset::west_opt(3 * 3600)
                .expect("offset")
                .with_ymd_and_hms(2024, 7, 1, 10, 0, 0)
                .single()
                .expect("date"),
            issuer,
            model: DocumentModel::Nfe,
            series: 1,
            number: 6727,
            nonce: "09102359".into(),
            nature_of_operation: "VENDA".into(),
            municipality_code: "4106902".into(),
            environment: EnvironmentType::Homologation,
            line_items: vec![
                LineItem::new(LineItemFields {
                    code: "001".into(),
                    description: "Parafuso".into(),
                    ncm: "73181500".into(),
                    cfop: "5102".into(),
                    unit: "UN".into(),
                    quantity: 2.0,
                    unit_price: 10.0,
                }),
                LineItem::new(LineItemFields {
                    code: "002".into(),
                    description: "Porca".into(),
                    ncm: "73181600".into(),
                    cfop: "5102".into(),
                    unit: "UN".into(),
                    quantity: 1.0,
                    unit_price: 5.5,
                }),
            ],
        })
        .recipient(recipient)
        .payment(Payment::new(PaymentMethod::Pix, 25.5))
        .additional_info("Pedido 42")
        .build()
        .expect("build invoice")
    }

    #[test]
    fn invoice_xml_has_nfe_layout() {
        let xml = invoice().to_xml().expect("xml");
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><NFe"#));
        assert!(!xml.contains('\n'));

        let doc = Document::parse(&xml).expect("parse");
        let root = doc.root();
        assert_eq!(root.local_name(), "NFe");
        assert_eq!(root.namespaces()[0].uri(), NFE_NS);

        let inf = root.child("infNFe").expect("infNFe");
        assert_eq!(
            inf.attribute("Id"),
            Some("NFe41240706101244000490550010000067271091023595")
        );
        assert_eq!(inf.attribute("versao"), Some("4.00"));

        let children: Vec<_> = inf.child_elements().map(|e| e.local_name()).collect();
        assert_eq!(
            children,
            ["ide", "emit", "dest", "det", "det", "total", "transp", "pag", "infAdic"]
        );

        let ide = inf.child("ide").expect("ide");
        assert_eq!(ide.child_text("cDV").as_deref(), Some("5"));
        assert_eq!(ide.child_text("tpAmb").as_deref(), Some("2"));
        assert_eq!(ide.child_text("dhEmi").as_deref(), Some("2024-07-01T10:00:00-03:00"));

        let emit = inf.child("emit").expect("emit");
        assert_eq!(emit.child_text("xNome").as_deref(), Some("EMPRESA TESTE & CIA"));
        assert_eq!(
            emit.child("enderEmit").and_then(|e| e.child_text("xCpl")).as_deref(),
            Some("Sala 2")
        );
        assert!(inf.child("dest").and_then(|d| d.child("CPF")).is_some());

        let det = inf.child("det").expect("det");
        assert_eq!(det.attribute("nItem"), Some("1"));
        let prod = det.child("prod").expect("prod");
        assert_eq!(prod.child_text("qCom").as_deref(), Some("2.0000"));
        assert_eq!(prod.child_text("vUnCom").as_deref(), Some("10.0000000000"));
        assert_eq!(prod.child_text("vProd").as_deref(), Some("20.00"));
        assert_eq!(prod.child_text("cEAN").as_deref(), Some("SEM GTIN"));

        let tot = inf.descendant("ICMSTot").expect("ICMSTot");
        assert_eq!(tot.child_text("vProd").as_deref(), Some("25.50"));
        assert_eq!(tot.child_text("vNF").as_deref(), Some("25.50"));
        assert_eq!(
            inf.descendant("detPag").and_then(|d| d.child_text("tPag")).as_deref(),
            Some("17")
        );
    }

    #[test]
    fn pretty_output_parses_to_the_same_structure() {
        let invoice = invoice();
        let pretty = invoice.to_xml_pretty().expect("pretty");
        assert!(pretty.contains('\n'));
        let doc = Document::parse(&pretty).expect("parse");
        let id = doc.root().child("infNFe").and_then(|e| e.attribute("Id"));
        assert_eq!(id, Some(invoice.document_id().as_str()));
    }
}
