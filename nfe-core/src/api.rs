//! SEFAZ authorization web service client and response types.
pub mod envelope;
pub mod transport;

pub use transport::{ReqwestTransport, Transport, TransportError};

use crate::{
    config::Config,
    dom::{Document, DomError, Element},
    invoice::{SignedInvoice, xml::constants::node},
};
use std::fmt;
use thiserror::Error;

const AUTHORIZATION_PATH: &str = "ws/NfeAutorizacao/NFeAutorizacao4.asmx";
const RECEIPT_QUERY_PATH: &str = "ws/NfeRetAutorizacao/NFeRetAutorizacao4.asmx";
const MAX_BATCH_DOCUMENTS: usize = 50;

/// Errors returned by the SEFAZ client.
#[derive(Error, Debug)]
pub enum SefazError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("SOAP fault {code}: {reason}")]
    Fault { code: String, reason: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
    #[error("envelope error: {0}")]
    Envelope(String),
}

impl From<DomError> for SefazError {
    fn from(err: DomError) -> Self {
        SefazError::MalformedResponse(err.to_string())
    }
}

/// `indSinc`: whether the authority answers the batch inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubmissionMode {
    #[default]
    Asynchronous,
    Synchronous,
}

impl SubmissionMode {
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionMode::Asynchronous => "0",
            SubmissionMode::Synchronous => "1",
        }
    }
}

/// Signed documents sent together under one `idLote`.
///
/// # Examples
/// ```rust
/// use nfe_core::api::SubmissionBatch;
///
/// assert!(SubmissionBatch::new("1", vec!["<NFe/>".into()]).is_ok());
/// assert!(SubmissionBatch::new("", vec!["<NFe/>".into()]).is_err());
/// assert!(SubmissionBatch::new("1", Vec::new()).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionBatch {
    batch_id: String,
    documents: Vec<String>,
    mode: SubmissionMode,
}

impl SubmissionBatch {
    /// # Errors
    /// [`SefazError::InvalidBatch`] unless the id has 1 to 15 digits and
    /// there are 1 to 50 well-formed documents, each rooted at `NFe`.
    pub fn new(batch_id: impl Into<String>, documents: Vec<String>) -> Result<Self, SefazError> {
        let batch_id = batch_id.into();
        if batch_id.is_empty()
            || batch_id.len() > 15
            || !batch_id.chars().all(|c| c.is_ascii_digit())
        {
            return Err(SefazError::InvalidBatch(format!(
                "batch id must have 1 to 15 digits, got {batch_id:?}"
            )));
        }
        if documents.is_empty() || documents.len() > MAX_BATCH_DOCUMENTS {
            return Err(SefazError::InvalidBatch(format!(
                "a batch holds 1 to 50 documents, got {}",
                documents.len()
            )));
        }
        for (index, document) in documents.iter().enumerate() {
            let parsed = Document::parse(document.trim_start_matches('\u{feff}')).map_err(|e| {
                SefazError::InvalidBatch(format!("document {index} is not well-formed: {e}"))
            })?;
            if parsed.root().local_name() != node::NFE {
                return Err(SefazError::InvalidBatch(format!(
                    "document {index} has root {}, expected {}",
                    parsed.root().name(),
                    node::NFE
                )));
            }
        }
        Ok(Self {
            batch_id,
            documents,
            mode: SubmissionMode::default(),
        })
    }

    pub fn from_invoices<'a>(
        batch_id: impl Into<String>,
        invoices: impl IntoIterator<Item = &'a SignedInvoice>,
    ) -> Result<Self, SefazError> {
        Self::new(
            batch_id,
            invoices.into_iter().map(|i| i.xml().to_string()).collect(),
        )
    }

    pub fn with_mode(mut self, mode: SubmissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }
}

/// Interpretation of a SEFAZ answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiptStatus {
    Processing,
    Authorized,
    Rejected,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Processing => "processing",
            ReceiptStatus::Authorized => "authorized",
            ReceiptStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-document outcome (`protNFe/infProt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResult {
    access_key: Option<String>,
    status_code: u16,
    reason: String,
    protocol_number: Option<String>,
    received_at: Option<String>,
}

impl ProtocolResult {
    pub fn access_key(&self) -> Option<&str> {
        self.access_key.as_deref()
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn protocol_number(&self) -> Option<&str> {
        self.protocol_number.as_deref()
    }

    pub fn received_at(&self) -> Option<&str> {
        self.received_at.as_deref()
    }

    /// 100 (authorized) or 150 (authorized out of time).
    pub fn is_authorized(&self) -> bool {
        matches!(self.status_code, 100 | 150)
    }
}

/// Batch-level answer from `retEnviNFe` or `retConsReciNFe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    status_code: u16,
    reason: String,
    receipt: Option<String>,
    protocols: Vec<ProtocolResult>,
}

impl SubmissionResult {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Receipt number (`nRec`) to poll with, when the batch was queued.
    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    pub fn protocols(&self) -> &[ProtocolResult] {
        &self.protocols
    }

    pub fn status(&self) -> ReceiptStatus {
        match self.status_code {
            103 | 105 => ReceiptStatus::Processing,
            104 if self.protocols.iter().all(ProtocolResult::is_authorized) => {
                ReceiptStatus::Authorized
            }
            _ => ReceiptStatus::Rejected,
        }
    }

    /// Parse a SOAP response body.
    ///
    /// # Errors
    /// [`SefazError::Fault`] for a SOAP fault, otherwise
    /// [`SefazError::MalformedResponse`] when the expected elements are
    /// missing.
    pub fn from_response(body: &str) -> Result<Self, SefazError> {
        let document = Document::parse(body)?;
        let root = document.root();

        if let Some(fault) = find(root, "Fault") {
            let code = fault
                .child_text("faultcode")
                .or_else(|| fault.descendant("Value").map(|v| v.text().trim().to_string()))
                .unwrap_or_default();
            let reason = fault
                .child_text("faultstring")
                .or_else(|| fault.descendant("Text").map(|t| t.text().trim().to_string()))
                .unwrap_or_default();
            return Err(SefazError::Fault { code, reason });
        }

        let answer = find(root, "retEnviNFe")
            .or_else(|| find(root, "retConsReciNFe"))
            .ok_or_else(|| {
                SefazError::MalformedResponse("no retEnviNFe or retConsReciNFe element".into())
            })?;
        let status_code = parse_status(answer.child_text("cStat"), "cStat")?;
        let reason = answer
            .child_text("xMotivo")
            .ok_or_else(|| SefazError::MalformedResponse("missing xMotivo".into()))?;
        let receipt = answer
            .child("infRec")
            .and_then(|inf| inf.child_text("nRec"))
            .or_else(|| answer.child_text("nRec"))
            .filter(|value| !value.is_empty());

        let mut protocols = Vec::new();
        for prot in find_all(answer, "protNFe") {
            let info = prot
                .child("infProt")
                .ok_or_else(|| SefazError::MalformedResponse("protNFe without infProt".into()))?;
            protocols.push(ProtocolResult {
                access_key: info.child_text("chNFe"),
                status_code: parse_status(info.child_text("cStat"), "infProt/cStat")?,
                reason: info.child_text("xMotivo").unwrap_or_default(),
                protocol_number: info.child_text("nProt"),
                received_at: info.child_text("dhRecbto"),
            });
        }

        if status_code == 104 && protocols.is_empty() {
            return Err(SefazError::MalformedResponse(
                "batch processed (104) without protocols".into(),
            ));
        }

        Ok(Self {
            status_code,
            reason,
            receipt,
            protocols,
        })
    }
}

fn parse_status(value: Option<String>, field: &str) -> Result<u16, SefazError> {
    let value = value.ok_or_else(|| SefazError::MalformedResponse(format!("missing {field}")))?;
    value
        .parse()
        .map_err(|_| SefazError::MalformedResponse(format!("non-numeric {field}: {value:?}")))
}

fn find<'a>(element: &'a Element, local_name: &str) -> Option<&'a Element> {
    if element.local_name() == local_name {
        Some(element)
    } else {
        element.descendant(local_name)
    }
}

fn find_all<'a>(element: &'a Element, local_name: &str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    collect(element, local_name, &mut found);
    found
}

fn collect<'a>(element: &'a Element, local_name: &str, found: &mut Vec<&'a Element>) {
    for child in element.child_elements() {
        if child.local_name() == local_name {
            found.push(child);
        } else {
            collect(child, local_name, found);
        }
    }
}

/// SEFAZ authorization client.
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::api::{SefazClient, SefazError};
/// use nfe_core::config::Config;
///
/// let client = SefazClient::new(Config::default())?;
/// # let _ = client;
/// # Ok::<(), SefazError>(())
/// ```
#[derive(Debug)]
pub struct SefazClient<T = ReqwestTransport> {
    config: Config,
    transport: T,
    base_url: String,
}

impl SefazClient<ReqwestTransport> {
    /// Client over HTTP using the configured timeout.
    ///
    /// # Errors
    /// Returns [`SefazError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, SefazError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(config, transport))
    }
}

// Public API
impl<T: Transport> SefazClient<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        let base_url = config.base_url();
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Self {
            config,
            transport,
            base_url,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a batch to `NFeAutorizacao4`.
    ///
    /// # Errors
    /// Transport errors propagate unchanged; faults and unparseable bodies
    /// map to [`SefazError::Fault`] and [`SefazError::MalformedResponse`].
    pub async fn submit_batch(
        &self,
        batch: &SubmissionBatch,
    ) -> Result<SubmissionResult, SefazError> {
        let body = envelope::authorization_request(batch)?;
        tracing::info!(
            batch_id = batch.batch_id(),
            documents = batch.documents().len(),
            mode = batch.mode().code(),
            "submitting NF-e batch"
        );
        tracing::debug!(bytes = body.len(), "authorization envelope built");

        let response = self
            .transport
            .exchange(&self.build_endpoint(AUTHORIZATION_PATH), body)
            .await?;
        let result = SubmissionResult::from_response(&response)?;
        tracing::info!(
            status_code = result.status_code(),
            receipt = result.receipt(),
            "batch answered"
        );
        Ok(result)
    }

    /// Query `NFeRetAutorizacao4` for the outcome of a queued batch.
    pub async fn query_receipt(&self, receipt: &str) -> Result<SubmissionResult, SefazError> {
        let body = envelope::receipt_query_request(self.config.env(), receipt)?;
        tracing::debug!(receipt, bytes = body.len(), "receipt query envelope built");

        let response = self
            .transport
            .exchange(&self.build_endpoint(RECEIPT_QUERY_PATH), body)
            .await?;
        let result = SubmissionResult::from_response(&response)?;
        tracing::info!(
            receipt,
            status_code = result.status_code(),
            status = %result.status(),
            "receipt answered"
        );
        Ok(result)
    }
}

// Private API
impl<T> SefazClient<T> {
    fn build_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}
