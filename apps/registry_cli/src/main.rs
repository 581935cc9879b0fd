use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ClientEvent, ClientOptions, DevSigner, FinalityMode, FormField, MemoryLedger,
    MutationRequest, Phase, RegistryClient, RegistryGateway, Settlement, SyncError,
    TrackingGranularity, ViewPresentation,
};
use futures::StreamExt;
use ledger_http::{HttpGatewayConfig, HttpRegistryGateway};
use shared::domain::{BookId, BookSummary, OperationKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "registry", about = "Book registry client")]
struct Args {
    /// Settings file; defaults to ./registry.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    ledger_url: Option<String>,
    #[arg(long, global = true)]
    contract: Option<String>,
    #[arg(long, global = true)]
    account: Option<String>,
    /// per_item or per_kind
    #[arg(long, global = true)]
    tracking: Option<TrackingGranularity>,
    /// Use a seeded in-process ledger even if a ledger URL is configured.
    #[arg(long, global = true)]
    memory: bool,
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show books with copies available.
    List,
    /// Add copies of a new book.
    Add { name: String, copies: String },
    Borrow { id: String },
    Return { id: String },
    /// Walk through concurrent submissions against an in-process ledger with slow finality.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut settings = load_settings(args.config.as_deref())?;
    apply_flags(&mut settings, &args);

    match args.command {
        Command::Demo => run_demo(&settings).await,
        command => run_command(&settings, args.memory, command).await,
    }
}

async fn run_command(settings: &Settings, memory: bool, command: Command) -> Result<()> {
    let gateway = build_gateway(settings, memory).await?;
    let client = RegistryClient::with_options(
        gateway,
        ClientOptions {
            granularity: settings.tracking,
            event_capacity: settings.event_capacity,
        },
    );
    client
        .connect(Arc::new(DevSigner::new(settings.account.clone())))
        .await
        .context("initial registry load failed")?;

    match command {
        Command::List | Command::Demo => {}
        Command::Add { name, copies } => {
            client.update_form(FormField::BookName, name).await;
            client.update_form(FormField::NumberOfCopies, copies).await;
            report(client.submit_staged(OperationKind::Create).await)?;
        }
        Command::Borrow { id } => {
            client.update_form(FormField::IdToBorrow, id).await;
            report(client.submit_staged(OperationKind::Borrow).await)?;
        }
        Command::Return { id } => {
            client.update_form(FormField::IdToReturn, id).await;
            report(client.submit_staged(OperationKind::Return).await)?;
        }
    }

    print_view(client.view().presentation().await);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_flags(settings: &mut Settings, args: &Args) {
    if let Some(url) = &args.ledger_url {
        settings.ledger_url = Some(url.clone());
    }
    if let Some(contract) = &args.contract {
        settings.contract_address = contract.clone();
    }
    if let Some(account) = &args.account {
        settings.account = account.clone();
    }
    if let Some(tracking) = args.tracking {
        settings.tracking = tracking;
    }
}

async fn build_gateway(settings: &Settings, memory: bool) -> Result<Arc<dyn RegistryGateway>> {
    let url = match (&settings.ledger_url, memory) {
        (Some(url), false) => url,
        _ => {
            info!("no ledger url configured, using seeded in-process ledger");
            let ledger = MemoryLedger::with_books(seed_books());
            ledger.set_owner(settings.account.clone()).await;
            return Ok(Arc::new(ledger));
        }
    };

    let mut config = HttpGatewayConfig::new(url, settings.contract_address.clone())
        .with_context(|| format!("invalid ledger url '{url}'"))?;
    config.poll_interval = settings.poll_interval();
    config.finality_timeout = settings.finality_timeout();
    info!(ledger = %config.base_url, contract = %config.contract_address, "using ledger service");
    let gateway = HttpRegistryGateway::new(config).context("failed to build http client")?;
    Ok(Arc::new(gateway))
}

fn seed_books() -> Vec<BookSummary> {
    [("Dune", 3), ("Emma", 1), ("Ulysses", 2)]
        .into_iter()
        .enumerate()
        .map(|(index, (name, copies))| BookSummary {
            id: BookId(index as u64 + 1),
            name: name.into(),
            total_copies: copies,
            available_copies: copies,
        })
        .collect()
}

fn report(outcome: Result<Settlement, SyncError>) -> Result<()> {
    let settlement = outcome?;
    match &settlement.block_number {
        Some(block) => println!("{} settled in {} (block {block})", settlement.key, settlement.tx_id),
        None => println!("{} settled in {}", settlement.key, settlement.tx_id),
    }
    if let Some(stale) = &settlement.stale_view {
        println!("warning: {stale}");
    }
    Ok(())
}

fn print_view(presentation: ViewPresentation) {
    match presentation {
        ViewPresentation::Loading => println!("loading..."),
        ViewPresentation::Empty => println!("no books available"),
        ViewPresentation::Populated(snapshot) => {
            println!("{:>4}  {:<32} {:>9}", "id", "name", "available");
            for book in &snapshot.items {
                println!(
                    "{:>4}  {:<32} {:>4}/{:<4}",
                    book.id, book.name, book.available_copies, book.total_copies
                );
            }
        }
    }
}

fn describe(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::OperationChanged(state) => Some(match &state.last_error {
            Some(reason) => format!("{} -> {} ({reason})", state.key, state.phase),
            None => format!("{} -> {}", state.key, state.phase),
        }),
        ClientEvent::ViewRefreshed(snapshot) => {
            Some(format!("view refreshed, {} titles available", snapshot.items.len()))
        }
        ClientEvent::ViewRefreshFailed(err) => Some(format!("view refresh failed: {err}")),
        ClientEvent::ViewStale(stale) => Some(format!("view stale: {stale}")),
        ClientEvent::StagedInputRejected { kind, error } => {
            Some(format!("{kind} input rejected: {error}"))
        }
        ClientEvent::SessionChanged { account } => {
            Some(format!("session: {}", account.as_deref().unwrap_or("none")))
        }
        ClientEvent::ViewRefreshStarted => None,
    }
}

async fn run_demo(settings: &Settings) -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    ledger
        .set_finality(FinalityMode::Delayed(Duration::from_millis(300)))
        .await;
    let client = RegistryClient::with_options(
        ledger,
        ClientOptions {
            granularity: settings.tracking,
            event_capacity: settings.event_capacity,
        },
    );

    let mut events = Box::pin(client.event_stream());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Some(line) = describe(&event) {
                println!("  [event] {line}");
            }
        }
    });

    client
        .connect(Arc::new(DevSigner::new(settings.account.clone())))
        .await
        .context("demo ledger load failed")?;

    println!("adding Dune with 3 copies");
    report(
        client
            .submit(MutationRequest::CreateItem {
                name: "Dune".into(),
                copies: 3,
            })
            .await,
    )?;

    println!("submitting the same borrow twice while the first awaits finality");
    let borrow = MutationRequest::BorrowItem { id: BookId(1) };
    let borrow_key = client.key_for(&borrow);
    let first = {
        let client = client.clone();
        let borrow = borrow.clone();
        tokio::spawn(async move { client.submit(borrow).await })
    };
    while client.operation_state(borrow_key).await.phase != Phase::AwaitingFinality {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    match client.submit(borrow).await {
        Err(err @ SyncError::InvalidTransition { .. }) => println!("second borrow refused: {err}"),
        other => println!("second borrow: {other:?}"),
    }
    report(first.await.context("borrow task panicked")?)?;

    println!("returning the borrowed copy");
    report(client.submit(MutationRequest::ReturnItem { id: BookId(1) }).await)?;

    println!("returning it again");
    if let Err(err) = client.submit(MutationRequest::ReturnItem { id: BookId(1) }).await {
        println!("ledger refused: {err}");
    }

    // Let the printer drain before shutting it down.
    tokio::time::sleep(Duration::from_millis(20)).await;
    printer.abort();
    print_view(client.view().presentation().await);
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
