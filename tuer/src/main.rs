use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tuer::config::ClientConfig;
use tuer::search::{SearchOutcome, SearchSession, SessionSnapshot};
use tuer::services::Services;
use tuer::transport::{EngineHealth, HttpTransport};

enum Command {
    Quit,
    History,
    Results,
    Font,
    Search(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim() {
            ":q" | ":quit" => Command::Quit,
            ":history" => Command::History,
            ":results" => Command::Results,
            ":font" => Command::Font,
            // anything else is a query, verbatim; an empty line clears results
            _ => Command::Search(line.trim_end_matches('\r').to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    // logs on stderr, results on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = ClientConfig::from_env().context("invalid client configuration")?;
    info!(
        endpoint = %cfg.endpoint,
        shape = %cfg.shape,
        timeout_ms = cfg.request_timeout.map(|d| d.as_millis() as u64),
        retries = cfg.retries,
        "configuration loaded"
    );

    let services = Services::init(&cfg);
    match services.session().transport().health_check().await {
        EngineHealth::Ok => info!("engine reachable at {}", cfg.endpoint),
        other => warn!("engine at {} not healthy: {:?} ; searches may fail", cfg.endpoint, other),
    }
    info!("font: {}", services.font().font_family("default"));
    println!("type a query and press enter (:history, :results, :font, :quit)");

    let mut inflight = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        while inflight.try_join_next().is_some() {}
        match Command::parse(&line) {
            Command::Quit => break,
            Command::History => {
                for (i, q) in services.session().history().iter().enumerate() {
                    println!("{:>4}  {}", i + 1, q);
                }
            }
            Command::Results => print_snapshot(&services.session().snapshot()),
            Command::Font => match services.font().toggle() {
                Ok(on) => println!(
                    "dyslexic font {} ({})",
                    if on { "on" } else { "off" },
                    services.font().font_family("default")
                ),
                Err(e) => warn!("saving font preference failed: {e}"),
            },
            Command::Search(query) => {
                let session = Arc::clone(services.session());
                inflight.spawn(async move {
                    let outcome = session.search(&query).await;
                    report(&session, &query, &outcome);
                });
            }
        }
    }

    // let searches already sent finish before exiting
    while inflight.join_next().await.is_some() {}
    Ok(())
}

fn report(session: &SearchSession<HttpTransport>, query: &str, outcome: &SearchOutcome) {
    match outcome {
        SearchOutcome::Cleared => println!("(results cleared)"),
        SearchOutcome::Applied { .. } => print_snapshot(&session.snapshot()),
        SearchOutcome::Failed(e) => println!("search for {query:?} failed: {e}"),
        SearchOutcome::Superseded => {}
    }
}

fn print_snapshot(snap: &SessionSnapshot) {
    if let Some(q) = &snap.last_query {
        println!("results for {q:?}:");
    }
    if let Some(suggestion) = &snap.spellchecked_query {
        println!("did you mean {suggestion:?}?");
    }
    if snap.results.is_empty() {
        println!("  (no results)");
    }
    for (i, r) in snap.results.iter().enumerate() {
        let score = r
            .score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        println!("{:>3}. [{}] {}\n     {}", i + 1, score, r.title, r.url);
        if !r.description.is_empty() {
            println!("     {}", r.description);
        }
    }
    if let Some(e) = &snap.last_failure {
        println!("  (last search failed: {e})");
    }
}
