use super::{
    DocumentModel, EmissionMode, Destination, FreightMode, InvoiceData, InvoiceError, InvoiceField,
    InvoiceTotalsData, Issuer, LineItems, OperationType, Payment, PaymentMethod, Presence, Purpose,
    Recipient, ValidationError, ValidationIssue, ValidationKind,
};
use crate::access_key::{AccessKey, AccessKeyInput};
use crate::config::EnvironmentType;
use crate::invoice::sign::{InvoiceSigner, SigningError};
use chrono::{DateTime, FixedOffset};

/// Default `verProc` written into `ide`.
pub const APPLICATION_VERSION: &str = concat!("nfe-rs ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    data: InvoiceData,
    totals: InvoiceTotalsData,
    access_key: AccessKey,
}

#[derive(Debug, Clone)]
pub struct SignedInvoice {
    finalized: FinalizedInvoice,
    digest_value: String,
    signature_value: String,
    signed_xml: String,
}

pub struct InvoiceBuilder {
    invoice: InvoiceData,
}

/// Fields every invoice needs before it can be built.
#[derive(Debug, Clone)]
pub struct RequiredInvoiceFields {
    /// `cUF` of the issuing state, e.g. `41` for Paraná.
    pub jurisdiction: String,
    pub issued_at: DateTime<FixedOffset>,
    pub issuer: Issuer,
    pub model: DocumentModel,
    pub series: u16,
    pub number: u32,
    /// `cNF`, exactly 8 digits.
    pub nonce: String,
    pub nature_of_operation: String,
    /// `cMunFG`, IBGE code of the municipality where the taxable event happens.
    pub municipality_code: String,
    pub environment: EnvironmentType,
    pub line_items: LineItems,
}

impl InvoiceBuilder {
    pub fn new(fields: RequiredInvoiceFields) -> Self {
        let RequiredInvoiceFields {
            jurisdiction,
            issued_at,
            issuer,
            model,
            series,
            number,
            nonce,
            nature_of_operation,
            municipality_code,
            environment,
            line_items,
        } = fields;

        Self {
            invoice: InvoiceData {
                jurisdiction,
                nonce,
                nature_of_operation,
                model,
                series,
                number,
                issued_at,
                operation_type: OperationType::default(),
                destination: Destination::default(),
                municipality_code,
                emission_mode: EmissionMode::default(),
                environment,
                purpose: Purpose::default(),
                final_consumer: false,
                presence: Presence::default(),
                application_version: APPLICATION_VERSION.to_string(),
                issuer,
                recipient: None,
                line_items,
                freight_mode: FreightMode::default(),
                payments: Vec::new(),
                additional_info: None,
            },
        }
    }

    pub fn recipient(mut self, recipient: Recipient) -> Self {
        self.invoice.recipient = Some(recipient);
        self
    }

    pub fn emission_mode(mut self, mode: EmissionMode) -> Self {
        self.invoice.emission_mode = mode;
        self
    }

    pub fn operation_type(mut self, operation_type: OperationType) -> Self {
        self.invoice.operation_type = operation_type;
        self
    }

    pub fn destination(mut self, destination: Destination) -> Self {
        self.invoice.destination = destination;
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.invoice.purpose = purpose;
        self
    }

    pub fn final_consumer(mut self, final_consumer: bool) -> Self {
        self.invoice.final_consumer = final_consumer;
        self
    }

    pub fn presence(mut self, presence: Presence) -> Self {
        self.invoice.presence = presence;
        self
    }

    pub fn freight_mode(mut self, freight_mode: FreightMode) -> Self {
        self.invoice.freight_mode = freight_mode;
        self
    }

    pub fn payment(mut self, payment: Payment) -> Self {
        self.invoice.payments.push(payment);
        self
    }

    pub fn additional_info(mut self, info: impl Into<String>) -> Self {
        self.invoice.additional_info = Some(info.into());
        self
    }

    pub fn application_version(mut self, version: impl Into<String>) -> Self {
        self.invoice.application_version = version.into();
        self
    }

    /// Validate the invoice, compute its access key and totals.
    ///
    /// Without explicit payments a single "no payment" entry of zero is
    /// recorded.
    ///
    /// # Errors
    /// [`InvoiceError::Validation`] listing every offending field, or
    /// [`InvoiceError::AccessKey`] when the key fields cannot form a key.
    pub fn build(mut self) -> Result<FinalizedInvoice, InvoiceError> {
        let issues = validate(&self.invoice);
        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        if self.invoice.payments.is_empty() {
            self.invoice
                .payments
                .push(Payment::new(PaymentMethod::NoPayment, 0.0));
        }

        let data = self.invoice;
        let access_key = AccessKey::generate(&AccessKeyInput {
            jurisdiction: data.jurisdiction.clone(),
            issued_at: data.issued_at_string(),
            tax_id: data.issuer.tax_id().as_str().to_string(),
            model: data.model.code().to_string(),
            series: data.series.to_string(),
            number: data.number.to_string(),
            emission_mode: data.emission_mode.code().to_string(),
            nonce: data.nonce.clone(),
        })?;

        let totals = InvoiceTotalsData::from_data(&data);
        let has_payments = data
            .payments
            .iter()
            .any(|p| p.method() != PaymentMethod::NoPayment);
        if has_payments && (totals.payments() - totals.invoice_total()).abs() > 0.005 {
            return Err(ValidationError::new(vec![issue(
                InvoiceField::PaymentAmount,
                ValidationKind::Mismatch,
                None,
            )])
            .into());
        }

        Ok(FinalizedInvoice {
            data,
            totals,
            access_key,
        })
    }
}

fn issue(field: InvoiceField, kind: ValidationKind, line_item_index: Option<usize>) -> ValidationIssue {
    ValidationIssue {
        field,
        kind,
        line_item_index,
    }
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_digit())
}

fn validate(data: &InvoiceData) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !is_digits(&data.jurisdiction, 2) {
        issues.push(issue(InvoiceField::Jurisdiction, ValidationKind::InvalidFormat, None));
    }
    if data.series > 999 {
        issues.push(issue(InvoiceField::Series, ValidationKind::OutOfRange, None));
    }
    if data.number == 0 || data.number > 999_999_999 {
        issues.push(issue(InvoiceField::Number, ValidationKind::OutOfRange, None));
    }
    if !is_digits(&data.nonce, 8) {
        issues.push(issue(InvoiceField::Nonce, ValidationKind::InvalidFormat, None));
    }
    if data.nature_of_operation.trim().is_empty() {
        issues.push(issue(InvoiceField::NatureOfOperation, ValidationKind::Empty, None));
    }
    if !is_digits(&data.municipality_code, 7) {
        issues.push(issue(InvoiceField::MunicipalityCode, ValidationKind::InvalidFormat, None));
    }
    if data.issuer.name().trim().is_empty() {
        issues.push(issue(InvoiceField::IssuerName, ValidationKind::Empty, None));
    }
    if data.issuer.state_registration().trim().is_empty() {
        issues.push(issue(InvoiceField::IssuerStateRegistration, ValidationKind::Empty, None));
    }
    if let Some(recipient) = &data.recipient {
        if recipient.name().trim().is_empty() {
            issues.push(issue(InvoiceField::RecipientName, ValidationKind::Empty, None));
        }
    }

    if data.line_items.is_empty() {
        issues.push(issue(InvoiceField::LineItems, ValidationKind::Missing, None));
    }
    // nItem is limited to 990 lines
    if data.line_items.len() > 990 {
        issues.push(issue(InvoiceField::LineItems, ValidationKind::OutOfRange, None));
    }
    for (idx, item) in data.line_items.iter().enumerate() {
        let at = Some(idx);
        if item.code().trim().is_empty() {
            issues.push(issue(InvoiceField::LineItemCode, ValidationKind::Empty, at));
        }
        if item.description().trim().is_empty() {
            issues.push(issue(InvoiceField::LineItemDescription, ValidationKind::Empty, at));
        }
        if !is_digits(item.ncm(), 8) && !is_digits(item.ncm(), 2) {
            issues.push(issue(InvoiceField::LineItemNcm, ValidationKind::InvalidFormat, at));
        }
        if !is_digits(item.cfop(), 4) {
            issues.push(issue(InvoiceField::LineItemCfop, ValidationKind::InvalidFormat, at));
        }
        if item.unit().trim().is_empty() {
            issues.push(issue(InvoiceField::LineItemUnit, ValidationKind::Empty, at));
        }
        if item.quantity().is_nan() || item.quantity() <= 0.0 {
            issues.push(issue(InvoiceField::LineItemQuantity, ValidationKind::OutOfRange, at));
        }
        if item.unit_price().is_nan() || item.unit_price() < 0.0 {
            issues.push(issue(InvoiceField::LineItemUnitPrice, ValidationKind::OutOfRange, at));
        }
    }

    if data.payments.len() > 100 {
        issues.push(issue(InvoiceField::Payments, ValidationKind::OutOfRange, None));
    }
    for (idx, payment) in data.payments.iter().enumerate() {
        if payment.amount().is_nan() || payment.amount() < 0.0 {
            issues.push(issue(InvoiceField::PaymentAmount, ValidationKind::OutOfRange, Some(idx)));
        }
    }

    issues
}

impl FinalizedInvoice {
    pub fn data(&self) -> &InvoiceData {
        &self.data
    }

    pub fn totals(&self) -> &InvoiceTotalsData {
        &self.totals
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    /// Value of `infNFe/@Id`.
    pub fn document_id(&self) -> String {
        self.access_key.document_id()
    }

    pub fn sign(self, signer: &InvoiceSigner) -> Result<SignedInvoice, SigningError> {
        signer.sign(self)
    }

    pub(crate) fn into_signed(
        self,
        digest_value: String,
        signature_value: String,
        signed_xml: String,
    ) -> SignedInvoice {
        SignedInvoice {
            finalized: self,
            digest_value,
            signature_value,
            signed_xml,
        }
    }
}

impl SignedInvoice {
    pub fn data(&self) -> &InvoiceData {
        self.finalized.data()
    }

    pub fn totals(&self) -> &InvoiceTotalsData {
        self.finalized.totals()
    }

    pub fn access_key(&self) -> &AccessKey {
        self.finalized.access_key()
    }

    /// Base64 `DigestValue` of the signed `infNFe`.
    pub fn digest_value(&self) -> &str {
        &self.digest_value
    }

    /// Base64 `SignatureValue`.
    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    pub fn xml(&self) -> &str {
        &self.signed_xml
    }
}

pub trait InvoiceView {
    fn data(&self) -> &InvoiceData;
    fn totals(&self) -> &InvoiceTotalsData;
    fn access_key(&self) -> &AccessKey;
}

impl InvoiceView for FinalizedInvoice {
    fn data(&self) -> &InvoiceData {
        self.data()
    }

    fn totals(&self) -> &InvoiceTotalsData {
        self.totals()
    }

    fn access_key(&self) -> &AccessKey {
        self.access_key()
    }
}

impl InvoiceView for SignedInvoice {
    fn data(&self) -> &InvoiceData {
        self.data()
    }

    fn totals(&self) -> &InvoiceTotalsData {
        self.totals()
    }

    fn access_key(&self) -> &AccessKey {
        self.access_key()
    }
}
