//! Terminal client: runs one search against a running aggregator and prints the ranked results
//! as they stream in.
//!
//! Usage: `search_cli <query> [--sources a,b] [--page N] [--sort relevance|latency|year|title|source]`
//! Server base URL comes from `AGGREGATOR_URL` (default `http://127.0.0.1:8000`).

use std::sync::Arc;

use anyhow::{anyhow, Context};
use media_search_aggregator::client::{spawn_runner, HttpEventSource};
use media_search_aggregator::{session_controller, AggregatorConfig, SearchRequest, SortMode};

const DEFAULT_URL: &str = "http://127.0.0.1:8000";

struct Args {
    request: SearchRequest,
    sort: SortMode,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut words = Vec::new();
    let mut sources = Vec::new();
    let mut page = 1;
    let mut sort = SortMode::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--sources" => {
                let v = it.next().ok_or_else(|| anyhow!("--sources needs a value"))?;
                sources.extend(v.split(',').map(|s| s.trim().to_string()));
            }
            "--page" => {
                let v = it.next().ok_or_else(|| anyhow!("--page needs a value"))?;
                page = v.parse().context("--page must be a number")?;
            }
            "--sort" => {
                let v = it.next().ok_or_else(|| anyhow!("--sort needs a value"))?;
                sort = v.parse().map_err(|e: String| anyhow!(e))?;
            }
            _ => words.push(arg),
        }
    }
    let mut request = SearchRequest::new(words.join(" ")).with_sources(sources);
    request.page = page;
    Ok(Args { request, sort })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let args = parse_args()?;
    let cfg = AggregatorConfig::load_default()?;
    let base = std::env::var("AGGREGATOR_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());

    let controller = session_controller(&cfg).with_sort_mode(args.sort);
    if let Some(last) = controller.load_cached(cfg.cache_max_age_secs) {
        println!("(last search: {:?}, {} results)", last.query, last.items.len());
    }
    let handle = spawn_runner(Arc::new(HttpEventSource::new(&base)?), controller);

    let id = handle.search(args.request).await?;
    let mut updates = handle.subscribe();
    let mut last_done = 0;
    loop {
        if let Some(s) = updates.borrow_and_update().clone() {
            if s.id() != id || !s.is_running() {
                break;
            }
            if s.completed_sources() != last_done {
                last_done = s.completed_sources();
                println!(
                    "[{}/{}] {} results",
                    s.completed_sources(),
                    s.total_sources(),
                    s.items().len()
                );
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
    }

    let Some(s) = handle.wait_for(id).await else {
        return Err(anyhow!("search was interrupted"));
    };
    if let Some(err) = s.error() {
        return Err(anyhow!("search failed: {err}"));
    }
    for (i, item) in s.items().iter().take(20).enumerate() {
        println!(
            "{:>2}. {:<40} {:>6.0}  {:>5}ms  {}",
            i + 1,
            item.title,
            item.relevance_score,
            item.latency_ms,
            item.source_display_name.as_deref().unwrap_or(&item.source_id)
        );
    }
    if s.is_partial() {
        println!("(stream ended early; results may be incomplete)");
    }
    handle.shutdown();
    Ok(())
}
