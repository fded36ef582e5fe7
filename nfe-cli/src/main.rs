use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use nfe_core::access_key::{AccessKey, AccessKeyInput};
use nfe_core::api::{SefazClient, SubmissionBatch, SubmissionMode, SubmissionResult};
use nfe_core::c14n::CanonicalizationMethod;
use nfe_core::config::{Config, EnvironmentType};
use nfe_core::invoice::sign::{InvoiceSigner, SignatureProfile};
use nfe_core::invoice::verify::{certificate_der_from_pem, verify_signature};
use nfe_core::poller::{PollOutcome, PollPolicy, StatusPoller};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REJECTED_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "nfe")]
#[command(about = "Brazilian NF-e signing and SEFAZ submission CLI")]
struct Cli {
    /// SEFAZ environment: homologation or production
    #[arg(long, global = true, default_value = "homologation")]
    env: EnvironmentType,
    /// Override the web service base URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,
    /// Receipt queries before giving up
    #[arg(long, global = true, default_value_t = 5)]
    poll_attempts: u32,
    /// Wait between receipt queries, in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    poll_interval_ms: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate or check a 44-digit access key
    AccessKey {
        #[command(subcommand)]
        action: AccessKeyAction,
    },
    /// Sign an NF-e document
    Sign {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        cert: PathBuf,
        #[arg(long)]
        key: PathBuf,
        #[arg(long, value_enum, default_value_t = Profile::Legacy)]
        profile: Profile,
        /// Use exclusive canonicalization
        #[arg(long)]
        exclusive: bool,
        /// Leave KeyInfo out of the signature
        #[arg(long)]
        no_certificate: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Verify the enveloped signature of a document
    Verify {
        #[arg(long)]
        input: PathBuf,
        /// Certificate to verify with instead of the embedded one
        #[arg(long)]
        cert: Option<PathBuf>,
    },
    /// Submit signed documents as one batch
    Submit {
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        batch_id: String,
        /// Ask for synchronous processing
        #[arg(long)]
        sync: bool,
        /// Poll the receipt until a final answer
        #[arg(long)]
        poll: bool,
    },
    /// Query a batch receipt
    Status {
        #[arg(long)]
        receipt: String,
        #[arg(long)]
        poll: bool,
    },
}

#[derive(Subcommand)]
enum AccessKeyAction {
    Generate(KeyFields),
    Check { key: String },
}

#[derive(Args)]
struct KeyFields {
    #[arg(long)]
    uf: String,
    /// Emission timestamp, RFC 3339 or YYYY-MM-DD
    #[arg(long)]
    issued_at: String,
    #[arg(long)]
    cnpj: String,
    #[arg(long, default_value = "55")]
    model: String,
    #[arg(long)]
    series: String,
    #[arg(long)]
    number: String,
    #[arg(long, default_value = "1")]
    emission_mode: String,
    #[arg(long)]
    nonce: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Legacy,
    Hardened,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::new(cli.env)
        .with_request_timeout(Duration::from_secs(cli.timeout_secs))
        .with_poll_policy(PollPolicy::new(
            cli.poll_attempts,
            Duration::from_millis(cli.poll_interval_ms),
        ));
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.clone());
    }

    match cli.command {
        Commands::AccessKey { action } => access_key(action)?,
        Commands::Sign {
            input,
            cert,
            key,
            profile,
            exclusive,
            no_certificate,
            output,
        } => {
            let mut profile = match profile {
                Profile::Legacy => SignatureProfile::legacy(),
                Profile::Hardened => SignatureProfile::hardened(),
            }
            .with_embed_certificate(!no_certificate);
            if exclusive {
                profile = profile.with_canonicalization(CanonicalizationMethod::Exclusive);
            }
            let config = config.with_signature_profile(profile);
            let signer =
                InvoiceSigner::from_pem(config.signature_profile(), &read(&cert)?, &read(&key)?)
                .context("loading signing identity")?;
            let signed = signer
                .sign_xml(&read(&input)?)
                .with_context(|| format!("signing {}", input.display()))?;
            match output {
                Some(path) => std::fs::write(&path, signed)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{signed}"),
            }
        }
        Commands::Verify { input, cert } => {
            let trusted = cert
                .map(|path| read(&path).and_then(|pem| Ok(certificate_der_from_pem(&pem)?)))
                .transpose()?;
            let verified = verify_signature(&read(&input)?, trusted.as_deref())
                .with_context(|| format!("verifying {}", input.display()))?;
            println!(
                "OK reference={} digest={:?} c14n={}",
                verified.reference_id,
                verified.digest,
                verified.canonicalization.uri()
            );
        }
        Commands::Submit {
            inputs,
            batch_id,
            sync,
            poll,
        } => {
            let documents = inputs.iter().map(|path| read(path)).collect::<Result<Vec<_>>>()?;
            let mode = if sync {
                SubmissionMode::Synchronous
            } else {
                SubmissionMode::Asynchronous
            };
            let batch = SubmissionBatch::new(batch_id, documents)?.with_mode(mode);
            let client = SefazClient::new(config)?;
            let result = client.submit_batch(&batch).await.context("submitting batch")?;
            report(&result);

            if poll && result.status() == nfe_core::api::ReceiptStatus::Processing {
                let Some(receipt) = result.receipt() else {
                    bail!("batch is processing but no receipt was returned");
                };
                return poll_receipt(&client, receipt).await;
            }
            return Ok(exit_for(&result));
        }
        Commands::Status { receipt, poll } => {
            let client = SefazClient::new(config)?;
            if poll {
                return poll_receipt(&client, &receipt).await;
            }
            let result = client.query_receipt(&receipt).await.context("querying receipt")?;
            report(&result);
            return Ok(exit_for(&result));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn access_key(action: AccessKeyAction) -> Result<()> {
    match action {
        AccessKeyAction::Generate(fields) => {
            let key = AccessKey::generate(&AccessKeyInput {
                jurisdiction: fields.uf,
                issued_at: fields.issued_at,
                tax_id: fields.cnpj,
                model: fields.model,
                series: fields.series,
                number: fields.number,
                emission_mode: fields.emission_mode,
                nonce: fields.nonce,
            })?;
            println!("{key}");
        }
        AccessKeyAction::Check { key } => {
            let key = AccessKey::parse(&key)?;
            println!("OK check_digit={}", key.check_digit());
        }
    }
    Ok(())
}

async fn poll_receipt(client: &SefazClient, receipt: &str) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling poll");
            on_interrupt.cancel();
        }
    });

    let outcome = StatusPoller::new(client)
        .poll(receipt, &cancel)
        .await
        .with_context(|| format!("polling receipt {receipt}"))?;
    report(outcome.result());
    Ok(match outcome {
        PollOutcome::Accepted(_) => ExitCode::SUCCESS,
        PollOutcome::Rejected(_) => ExitCode::from(REJECTED_EXIT),
    })
}

fn report(result: &SubmissionResult) {
    println!(
        "{} cStat={} xMotivo={}{}",
        result.status(),
        result.status_code(),
        result.reason(),
        result
            .receipt()
            .map(|receipt| format!(" nRec={receipt}"))
            .unwrap_or_default()
    );
    for protocol in result.protocols() {
        println!(
            "  chNFe={} cStat={} xMotivo={} nProt={}",
            protocol.access_key().unwrap_or("-"),
            protocol.status_code(),
            protocol.reason(),
            protocol.protocol_number().unwrap_or("-")
        );
    }
}

fn exit_for(result: &SubmissionResult) -> ExitCode {
    match result.status() {
        nfe_core::api::ReceiptStatus::Rejected => ExitCode::from(REJECTED_EXIT),
        _ => ExitCode::SUCCESS,
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
