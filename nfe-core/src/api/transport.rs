//! HTTP exchange seam for the SEFAZ client.
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Posts a SOAP request body to an endpoint and returns the response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, endpoint_url: &str, request_body: String)
    -> Result<String, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn exchange(
        &self,
        endpoint_url: &str,
        request_body: String,
    ) -> Result<String, TransportError> {
        (**self).exchange(endpoint_url, request_body).await
    }
}

/// [`Transport`] over a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// # Errors
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn exchange(
        &self,
        endpoint_url: &str,
        request_body: String,
    ) -> Result<String, TransportError> {
        let response = self
            .client
            .post(endpoint_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(request_body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        // SOAP 1.1 reports faults with a 500; those bodies are parsed upstream
        if status.is_success() || (status.is_server_error() && is_soap_fault(&body)) {
            return Ok(body);
        }
        tracing::debug!(status = status.as_u16(), "non-success HTTP status");
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn is_soap_fault(body: &str) -> bool {
    body.contains(":Fault>") || body.contains("<Fault>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    }

    #[test]
    fn posts_soap_body_with_xml_content_type() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/ws")
                .header("content-type", "text/xml; charset=utf-8")
                .body("<ping/>");
            then.status(200).body("<pong/>");
        });

        let transport = ReqwestTransport::new(Duration::from_secs(5)).expect("transport");
        let body = runtime()
            .block_on(transport.exchange(&server.url("/ws"), "<ping/>".into()))
            .expect("exchange");
        mock.assert();
        assert_eq!(body, "<pong/>");
    }

    #[test]
    fn non_success_status_is_an_error_unless_fault() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/down");
            then.status(503).body("maintenance");
        });
        server.mock(|when, then| {
            when.method(POST).path("/fault");
            then.status(500)
                .body("<soap:Envelope><soap:Body><soap:Fault></soap:Fault></soap:Body></soap:Envelope>");
        });

        let transport = ReqwestTransport::new(Duration::from_secs(5)).expect("transport");
        let rt = runtime();
        let err = rt
            .block_on(transport.exchange(&server.url("/down"), String::new()))
            .expect_err("status error");
        assert!(matches!(err, TransportError::Status { status: 503, ref body } if body == "maintenance"));

        let fault = rt
            .block_on(transport.exchange(&server.url("/fault"), String::new()))
            .expect("fault body is passed through");
        assert!(fault.contains("Fault"));
    }
}
