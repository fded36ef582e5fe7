use async_trait::async_trait;
use nfe_core::api::{SefazClient, SefazError, Transport, TransportError};
use nfe_core::config::{Config, EnvironmentType};
use nfe_core::poller::{PollError, PollOutcome, PollPolicy, StatusPoller};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Step {
    Processing,
    Authorized,
    Rejected,
    Fail,
    Hang,
}

/// Answers receipt queries from a fixed script.
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(steps: &[Step]) -> Self {
        Self {
            script: Mutex::new(steps.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn answer(code: u16, protocol: Option<u16>) -> String {
    let protocol = protocol
        .map(|code| {
            format!("<protNFe><infProt><cStat>{code}</cStat><xMotivo>motivo {code}</xMotivo></infProt></protNFe>")
        })
        .unwrap_or_default();
    format!(
        "<retConsReciNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\"><cStat>{code}</cStat><xMotivo>lote {code}</xMotivo>{protocol}</retConsReciNFe>"
    )
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(&self, _url: &str, _body: String) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Step::Processing);
        match step {
            Step::Processing => Ok(answer(105, None)),
            Step::Authorized => Ok(answer(104, Some(100))),
            Step::Rejected => Ok(answer(104, Some(539))),
            Step::Fail => Err(TransportError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn client(steps: &[Step]) -> SefazClient<ScriptedTransport> {
    SefazClient::with_transport(
        Config::new(EnvironmentType::Homologation),
        ScriptedTransport::new(steps),
    )
}

#[tokio::test(start_paused = true)]
async fn accepted_after_processing_rounds() {
    use Step::*;
    let client = client(&[Processing, Processing, Authorized]);
    let started = Instant::now();
    let outcome = StatusPoller::new(&client)
        .poll("1", &CancellationToken::new())
        .await
        .expect("poll");

    assert!(matches!(outcome, PollOutcome::Accepted(_)));
    assert_eq!(client.transport().calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn exhausts_after_max_attempts_without_trailing_wait() {
    let client = client(&[]);
    let started = Instant::now();
    let err = StatusPoller::new(&client)
        .poll("1", &CancellationToken::new())
        .await
        .expect_err("timeout");

    assert!(matches!(err, PollError::Timeout { attempts: 5 }));
    assert_eq!(client.transport().calls(), 5);
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn rejection_is_an_outcome_not_a_timeout() {
    use Step::*;
    let client = client(&[Processing, Rejected]);
    let outcome = StatusPoller::new(&client)
        .poll("1", &CancellationToken::new())
        .await
        .expect("poll");

    match outcome {
        PollOutcome::Rejected(result) => {
            assert_eq!(result.protocols()[0].status_code(), 539);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_aborts_at_failing_attempt() {
    use Step::*;
    let client = client(&[Processing, Fail, Authorized]);
    let err = StatusPoller::new(&client)
        .poll("1", &CancellationToken::new())
        .await
        .expect_err("transport error");

    assert!(matches!(
        err,
        PollError::Api(SefazError::Transport(TransportError::Status { status: 503, .. }))
    ));
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_wait_returns_promptly() {
    let client = client(&[]);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = StatusPoller::new(&client)
        .with_policy(PollPolicy::new(5, Duration::from_secs(5)))
        .poll("1", &token)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, PollError::Cancelled { attempts: 2 }));
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_hanging_query() {
    let client = client(&[Step::Hang]);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = StatusPoller::new(&client)
        .poll("1", &token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, PollError::Cancelled { attempts: 1 }));
}

#[tokio::test(start_paused = true)]
async fn policy_from_config_bounds_attempts() {
    let client = SefazClient::with_transport(
        Config::new(EnvironmentType::Homologation)
            .with_poll_policy(PollPolicy::new(2, Duration::from_millis(500))),
        ScriptedTransport::new(&[]),
    );
    let err = StatusPoller::new(&client)
        .poll("1", &CancellationToken::new())
        .await
        .expect_err("timeout");
    assert!(matches!(err, PollError::Timeout { attempts: 2 }));
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_sends_no_query() {
    let client = client(&[Step::Authorized]);
    let token = CancellationToken::new();
    token.cancel();

    let err = StatusPoller::new(&client)
        .poll("1", &token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, PollError::Cancelled { attempts: 0 }));
    assert_eq!(client.transport().calls(), 0);
}
