//! mailbox-probe: operator tool for the mailbox gateway.
//!
//! Runs single calls through a fully configured [`MailboxGateway`] so that
//! credentials, endpoints and alerting can be checked from a shell.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mailbox_gateway::envelope::to_content;
use mailbox_gateway::{Fault, GatewayConfig, MailboxGateway, ResponsePayload};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mailbox gateway probe
#[derive(Parser, Debug)]
#[command(name = "mailbox-probe")]
#[command(about = "Issue authenticated calls against the mailbox server")]
struct Args {
    /// Gateway configuration file (JSON)
    #[arg(short, long, env = "MAILBOX_GATEWAY_CONFIG", default_value = "gateway.json")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a request as an end user
    User {
        /// User id; the address is `<id>@<configured domain>`
        id: String,
        /// Request name, e.g. GetInfoRequest
        request: String,
        /// Request content (JSON object)
        #[arg(long, default_value = "{}")]
        content: String,
    },
    /// Call a request on the administrative endpoint
    Admin {
        request: String,
        #[arg(long, default_value = "{}")]
        content: String,
    },
    /// Obtain a session token for a user and print its validity window
    Token { id: String },
    /// Print a signed direct-login URL for a user
    PreauthUrl { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs, &args.log_level)?;

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let gateway = MailboxGateway::new(config).context("building gateway")?;

    let outcome = run(&gateway, args.command).await?;

    let metrics = gateway.metrics().snapshot();
    tracing::debug!(
        calls = metrics.calls_total,
        logins = metrics.logins,
        latency_ms = metrics.average_latency_ms,
        "Probe finished"
    );

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(fault) => {
            println!("{}", serde_json::to_string_pretty(&fault_report(&fault))?);
            std::process::exit(2);
        }
    }
}

/// Run one subcommand. `Err` is a usage or local error, `Ok(Err)` a fault
/// reported by the gateway.
async fn run(gateway: &MailboxGateway, command: Command) -> anyhow::Result<Result<Value, Fault>> {
    let outcome = match command {
        Command::User {
            id,
            request,
            content,
        } => {
            let principal = gateway.user(id);
            let content = parse_content(&content)?;
            gateway
                .call_as_user(&principal, &request, content)
                .await
                .and_then(payload_json)
        }
        Command::Admin { request, content } => {
            let content = parse_content(&content)?;
            gateway
                .call_as_admin(&request, content)
                .await
                .and_then(payload_json)
        }
        Command::Token { id } => {
            let principal = gateway.user(id);
            gateway.get_valid_token(&principal).await.map(|token| {
                json!({
                    "address": token.address,
                    "admin": token.admin,
                    "issued_at_ms": token.issued_at_ms,
                    "expires_at_ms": token.expires_at_ms,
                    "refresh_at_ms": token.refresh_at_ms,
                })
            })
        }
        Command::PreauthUrl { id } => {
            let principal = gateway.user(id);
            gateway
                .preauth_url(&principal)
                .map(|url| json!({ "url": url.as_str() }))
        }
    };
    Ok(outcome)
}

fn parse_content(raw: &str) -> anyhow::Result<Box<serde_json::value::RawValue>> {
    let value: Value = serde_json::from_str(raw).context("--content is not valid JSON")?;
    anyhow::ensure!(value.is_object(), "--content must be a JSON object");
    Ok(to_content(&value)?)
}

fn payload_json(payload: ResponsePayload) -> Result<Value, Fault> {
    let content: Value = payload
        .parse()
        .map_err(|e| Fault::internal(format!("unreadable {}: {}", payload.name, e)))?;
    let mut body = serde_json::Map::new();
    body.insert(payload.name, content);
    Ok(Value::Object(body))
}

fn fault_report(fault: &Fault) -> Value {
    json!({
        "code": fault.code,
        "category": fault.category(),
        "origin": fault.origin,
        "message": fault.message,
    })
}

fn init_logging(json_logs: bool, level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;

    // Logs go to stderr, stdout carries the result
    if json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }
    Ok(())
}
