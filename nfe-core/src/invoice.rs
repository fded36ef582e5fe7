//! NF-e domain types and builders.
mod builder;
pub mod sign;
pub mod verify;
pub mod xml;
pub use builder::{
    FinalizedInvoice, InvoiceBuilder, InvoiceView, RequiredInvoiceFields, SignedInvoice,
};

use crate::access_key::AccessKeyError;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

type Result<T> = std::result::Result<T, InvoiceError>;

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("access key: {0}")]
    AccessKey(#[from] AccessKeyError),
    #[error("invalid CNPJ/CPF: {0}")]
    InvalidTaxId(String),
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_item_index: Option<usize>,
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    Jurisdiction,
    Series,
    Number,
    Nonce,
    NatureOfOperation,
    MunicipalityCode,
    IssuerName,
    IssuerStateRegistration,
    RecipientName,
    LineItems,
    LineItemCode,
    LineItemDescription,
    LineItemNcm,
    LineItemCfop,
    LineItemUnit,
    LineItemQuantity,
    LineItemUnitPrice,
    Payments,
    PaymentAmount,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
    Mismatch,
}

/// CNPJ (14 digits) or CPF (11 digits).
///
/// # Examples
/// ```rust
/// use nfe_core::invoice::TaxId;
///
/// let cnpj = TaxId::parse("06.101.244/0004-90")?;
/// assert_eq!(cnpj.as_str(), "06101244000490");
/// assert!(cnpj.is_cnpj());
/// # Ok::<(), nfe_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxId(String);

impl TaxId {
    /// Accepts the punctuated forms (`00.000.000/0000-00`, `000.000.000-00`).
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self> {
        let raw = s.as_ref().trim();
        let digits: String = raw
            .chars()
            .filter(|c| !matches!(c, '.' | '/' | '-'))
            .collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) || !matches!(digits.len(), 11 | 14) {
            return Err(InvoiceError::InvalidTaxId(raw.to_string()));
        }
        Ok(TaxId(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cnpj(&self) -> bool {
        self.0.len() == 14
    }
}

impl AsRef<str> for TaxId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for TaxId {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self> {
        TaxId::parse(s)
    }
}

impl TryFrom<&str> for TaxId {
    type Error = InvoiceError;
    fn try_from(value: &str) -> Result<Self> {
        TaxId::parse(value)
    }
}

/// Document model (`mod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DocumentModel {
    /// NF-e, model 55.
    #[default]
    Nfe,
    /// NFC-e (consumer invoice), model 65.
    Nfce,
}

impl DocumentModel {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentModel::Nfe => "55",
            DocumentModel::Nfce => "65",
        }
    }
}

/// Emission mode (`tpEmis`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmissionMode {
    #[default]
    Normal,
    ContingencyFsIa,
    ContingencyEpec,
    ContingencyFsDa,
    ContingencySvcAn,
    ContingencySvcRs,
    ContingencyOffline,
}

impl EmissionMode {
    pub fn code(&self) -> &'static str {
        match self {
            EmissionMode::Normal => "1",
            EmissionMode::ContingencyFsIa => "2",
            EmissionMode::ContingencyEpec => "4",
            EmissionMode::ContingencyFsDa => "5",
            EmissionMode::ContingencySvcAn => "6",
            EmissionMode::ContingencySvcRs => "7",
            EmissionMode::ContingencyOffline => "9",
        }
    }
}

/// Operation direction (`tpNF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OperationType {
    Inbound,
    #[default]
    Outbound,
}

impl OperationType {
    pub fn code(&self) -> &'static str {
        match self {
            OperationType::Inbound => "0",
            OperationType::Outbound => "1",
        }
    }
}

/// Destination of the operation (`idDest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Destination {
    #[default]
    Internal,
    Interstate,
    Foreign,
}

impl Destination {
    pub fn code(&self) -> &'static str {
        match self {
            Destination::Internal => "1",
            Destination::Interstate => "2",
            Destination::Foreign => "3",
        }
    }
}

/// Purpose of issue (`finNFe`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Purpose {
    #[default]
    Normal,
    Complementary,
    Adjustment,
    Return,
}

impl Purpose {
    pub fn code(&self) -> &'static str {
        match self {
            Purpose::Normal => "1",
            Purpose::Complementary => "2",
            Purpose::Adjustment => "3",
            Purpose::Return => "4",
        }
    }
}

/// Buyer presence indicator (`indPres`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Presence {
    NotApplicable,
    #[default]
    InPerson,
    Internet,
    Telephone,
    Other,
}

impl Presence {
    pub fn code(&self) -> &'static str {
        match self {
            Presence::NotApplicable => "0",
            Presence::InPerson => "1",
            Presence::Internet => "2",
            Presence::Telephone => "3",
            Presence::Other => "9",
        }
    }
}

/// Issuer tax regime (`CRT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaxRegime {
    SimplesNacional,
    SimplesNacionalExcess,
    #[default]
    Normal,
}

impl TaxRegime {
    pub fn code(&self) -> &'static str {
        match self {
            TaxRegime::SimplesNacional => "1",
            TaxRegime::SimplesNacionalExcess => "2",
            TaxRegime::Normal => "3",
        }
    }
}

/// Recipient state-tax status (`indIEDest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecipientTaxpayer {
    Contributor,
    Exempt,
    #[default]
    NonContributor,
}

impl RecipientTaxpayer {
    pub fn code(&self) -> &'static str {
        match self {
            RecipientTaxpayer::Contributor => "1",
            RecipientTaxpayer::Exempt => "2",
            RecipientTaxpayer::NonContributor => "9",
        }
    }
}

/// Freight responsibility (`modFrete`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FreightMode {
    Issuer,
    Recipient,
    ThirdParty,
    #[default]
    NoFreight,
}

impl FreightMode {
    pub fn code(&self) -> &'static str {
        match self {
            FreightMode::Issuer => "0",
            FreightMode::Recipient => "1",
            FreightMode::ThirdParty => "2",
            FreightMode::NoFreight => "9",
        }
    }
}

/// Payment means (`tPag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Cheque,
    CreditCard,
    DebitCard,
    StoreCredit,
    BankSlip,
    Pix,
    NoPayment,
    Other,
}

impl PaymentMethod {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "01",
            PaymentMethod::Cheque => "02",
            PaymentMethod::CreditCard => "03",
            PaymentMethod::DebitCard => "04",
            PaymentMethod::StoreCredit => "05",
            PaymentMethod::BankSlip => "15",
            PaymentMethod::Pix => "17",
            PaymentMethod::NoPayment => "90",
            PaymentMethod::Other => "99",
        }
    }
}

/// Postal address of a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub district: String,
    /// IBGE municipality code (7 digits).
    pub municipality_code: String,
    pub municipality: String,
    /// Two-letter state abbreviation.
    pub state: String,
    pub postal_code: String,
    pub phone: Option<String>,
}

impl Address {
    pub fn street(&self) -> &str {
        &self.street
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn complement(&self) -> Option<&str> {
        self.complement.as_deref()
    }

    pub fn district(&self) -> &str {
        &self.district
    }

    pub fn municipality_code(&self) -> &str {
        &self.municipality_code
    }

    pub fn municipality(&self) -> &str {
        &self.municipality
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

/// Issuing company (`emit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    tax_id: TaxId,
    name: String,
    trade_name: Option<String>,
    address: Address,
    state_registration: String,
    tax_regime: TaxRegime,
}

impl Issuer {
    /// Create an issuer; the tax id must be a CNPJ.
    ///
    /// # Errors
    /// Returns [`InvoiceError::InvalidTaxId`] for malformed ids and CPFs.
    pub fn new(
        tax_id: impl AsRef<str>,
        name: impl Into<String>,
        address: Address,
        state_registration: impl Into<String>,
    ) -> Result<Self> {
        let tax_id = TaxId::parse(tax_id.as_ref())?;
        if !tax_id.is_cnpj() {
            return Err(InvoiceError::InvalidTaxId(tax_id.0));
        }
        Ok(Self {
            tax_id,
            name: name.into(),
            trade_name: None,
            address,
            state_registration: state_registration.into(),
            tax_regime: TaxRegime::default(),
        })
    }

    pub fn with_trade_name(mut self, trade_name: impl Into<String>) -> Self {
        self.trade_name = Some(trade_name.into());
        self
    }

    pub fn with_tax_regime(mut self, tax_regime: TaxRegime) -> Self {
        self.tax_regime = tax_regime;
        self
    }

    pub fn tax_id(&self) -> &TaxId {
        &self.tax_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trade_name(&self) -> Option<&str> {
        self.trade_name.as_deref()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state_registration(&self) -> &str {
        &self.state_registration
    }

    pub fn tax_regime(&self) -> TaxRegime {
        self.tax_regime
    }
}

/// Receiving party (`dest`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    tax_id: TaxId,
    name: String,
    address: Option<Address>,
    taxpayer: RecipientTaxpayer,
    state_registration: Option<String>,
    email: Option<String>,
}

impl Recipient {
    pub fn new(tax_id: impl AsRef<str>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            tax_id: TaxId::parse(tax_id.as_ref())?,
            name: name.into(),
            address: None,
            taxpayer: RecipientTaxpayer::default(),
            state_registration: None,
            email: None,
        })
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Mark the recipient as a state-tax contributor with its registration.
    pub fn with_state_registration(mut self, registration: impl Into<String>) -> Self {
        self.taxpayer = RecipientTaxpayer::Contributor;
        self.state_registration = Some(registration.into());
        self
    }

    pub fn with_taxpayer(mut self, taxpayer: RecipientTaxpayer) -> Self {
        self.taxpayer = taxpayer;
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn tax_id(&self) -> &TaxId {
        &self.tax_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn taxpayer(&self) -> RecipientTaxpayer {
        self.taxpayer
    }

    pub fn state_registration(&self) -> Option<&str> {
        self.state_registration.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Single product line (`det/prod`).
///
/// # Examples
/// ```rust
/// use nfe_core::invoice::{LineItem, LineItemFields};
///
/// let item = LineItem::new(LineItemFields {
///     code: "001".into(),
///     description: "Parafuso".into(),
///     ncm: "73181500".into(),
///     cfop: "5102".into(),
///     unit: "UN".into(),
///     quantity: 4.0,
///     unit_price: 2.5,
/// });
/// assert_eq!(item.total_amount(), 10.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    code: String,
    description: String,
    gtin: Option<String>,
    ncm: String,
    cfop: String,
    unit: String,
    quantity: f64,
    unit_price: f64,
    total_amount: f64,
}

/// Fields for creating a line item with a computed total.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub code: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
}

impl LineItem {
    pub fn new(fields: LineItemFields) -> Self {
        let total_amount = Self::calculate_total_amount(fields.quantity, fields.unit_price);
        Self {
            code: fields.code,
            description: fields.description,
            gtin: None,
            ncm: fields.ncm,
            cfop: fields.cfop,
            unit: fields.unit,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            total_amount,
        }
    }

    pub fn with_gtin(mut self, gtin: impl Into<String>) -> Self {
        self.gtin = Some(gtin.into());
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// `SEM GTIN` when the product has no barcode.
    pub fn gtin(&self) -> &str {
        self.gtin.as_deref().unwrap_or("SEM GTIN")
    }

    pub fn ncm(&self) -> &str {
        &self.ncm
    }

    pub fn cfop(&self) -> &str {
        &self.cfop
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    pub fn total_amount(&self) -> f64 {
        self.total_amount
    }

    fn calculate_total_amount(quantity: f64, unit_price: f64) -> f64 {
        round_cents(quantity * unit_price)
    }
}

pub type LineItems = Vec<LineItem>;

/// Payment entry (`pag/detPag`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    method: PaymentMethod,
    amount: f64,
}

impl Payment {
    pub fn new(method: PaymentMethod, amount: f64) -> Self {
        Self { method, amount }
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

/// Core invoice data model.
///
/// Instances are produced by the builder and exposed via views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    jurisdiction: String,
    nonce: String,
    nature_of_operation: String,
    model: DocumentModel,
    series: u16,
    number: u32,
    issued_at: DateTime<FixedOffset>,
    operation_type: OperationType,
    destination: Destination,
    municipality_code: String,
    emission_mode: EmissionMode,
    environment: crate::config::EnvironmentType,
    purpose: Purpose,
    final_consumer: bool,
    presence: Presence,
    application_version: String,
    issuer: Issuer,
    recipient: Option<Recipient>,
    line_items: LineItems,
    freight_mode: FreightMode,
    payments: Vec<Payment>,
    additional_info: Option<String>,
}

impl InvoiceData {
    /// `cUF` code of the issuing state.
    pub fn jurisdiction(&self) -> &str {
        &self.jurisdiction
    }

    /// `cNF`, the 8-digit random code.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn nature_of_operation(&self) -> &str {
        &self.nature_of_operation
    }

    pub fn model(&self) -> DocumentModel {
        self.model
    }

    pub fn series(&self) -> u16 {
        self.series
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn issued_at(&self) -> &DateTime<FixedOffset> {
        &self.issued_at
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn municipality_code(&self) -> &str {
        &self.municipality_code
    }

    pub fn emission_mode(&self) -> EmissionMode {
        self.emission_mode
    }

    pub fn environment(&self) -> crate::config::EnvironmentType {
        self.environment
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn is_final_consumer(&self) -> bool {
        self.final_consumer
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn application_version(&self) -> &str {
        &self.application_version
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub fn recipient(&self) -> Option<&Recipient> {
        self.recipient.as_ref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn freight_mode(&self) -> FreightMode {
        self.freight_mode
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn additional_info(&self) -> Option<&str> {
        self.additional_info.as_deref()
    }

    pub(crate) fn issued_at_string(&self) -> String {
        self.issued_at.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    }
}

/// Computed invoice totals (`ICMSTot`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotalsData {
    products: f64,
    payments: f64,
}

impl InvoiceTotalsData {
    pub(crate) fn from_data(data: &InvoiceData) -> Self {
        let products: f64 = data.line_items.iter().map(|li| li.total_amount).sum();
        let payments: f64 = data.payments.iter().map(|p| p.amount).sum();
        Self {
            products: round_cents(products),
            payments: round_cents(payments),
        }
    }

    /// `vProd`.
    pub fn products(&self) -> f64 {
        self.products
    }

    /// `vNF`. No freight, insurance, discounts or taxes are modelled, so this
    /// equals the product total.
    pub fn invoice_total(&self) -> f64 {
        self.products
    }

    pub fn payments(&self) -> f64 {
        self.payments
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
