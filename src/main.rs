use quarry::cli::{Cli, Commands};
use quarry::config::Config;
use quarry::core::RetrievalCore;
use quarry::error::Result;
use quarry::governor::SetResult;
use quarry::retrieval::SearchOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();
    let config = Config::load_or_default(cli.config.clone())?;
    let core = RetrievalCore::open(config)?;

    match cli.command {
        Commands::Ingest { path } => {
            let report = core.ingest(&path).await?;
            println!(
                "✓ Ingested {} ({} chunks{})",
                report.source,
                report.chunks,
                if report.replaced { ", replaced previous version" } else { "" }
            );
        }

        Commands::Delete { source } => {
            if core.delete(&source).await? {
                println!("✓ Deleted {}", source);
            } else {
                println!("Source not found: {}", source);
            }
        }

        Commands::List => {
            let sources = core.list_sources().await?;
            if sources.is_empty() {
                println!("No sources ingested.");
            }
            for entry in sources {
                println!("{}  [{}]", entry.source, entry.models.join(", "));
            }
        }

        Commands::Search {
            query,
            limit,
            mode,
            graph,
            chat_model,
            json,
        } => {
            let options = SearchOptions {
                mode: mode.into(),
                use_graph: graph,
                chat_model,
                chat_history: Vec::new(),
            };
            let results = core.search(&query, limit, &options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results).unwrap_or_default());
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (rank, chunk) in results.iter().enumerate() {
                    let page = chunk
                        .page
                        .map(|p| format!(" p.{}", p))
                        .unwrap_or_default();
                    println!(
                        "{}. [{:.3}] {}{} (chunk {})",
                        rank + 1,
                        chunk.score,
                        chunk.source,
                        page,
                        chunk.chunk_index
                    );
                    if !chunk.matched_entities.is_empty() {
                        let tags: Vec<String> = chunk
                            .matched_entities
                            .iter()
                            .map(|t| format!("{} ({})", t.name, t.kind))
                            .collect();
                        println!("   entities: {}", tags.join(", "));
                    }
                    println!("   {}", preview(&chunk.content, 160));
                }
            }
        }

        Commands::BuildGraph { source, model } => {
            let cancel = Arc::new(AtomicBool::new(false));
            let cancel_on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling after the current batch...");
                    cancel_on_signal.store(true, Ordering::SeqCst);
                }
            });

            let report = core
                .build_graph(&source, &model, cancel, |p| {
                    println!(
                        "  batch {}/{}: {}/{} chunks ({} new, {} skipped)",
                        p.batch_index + 1,
                        p.total_batches,
                        p.processed,
                        p.total,
                        p.successful,
                        p.skipped
                    );
                })
                .await?;

            println!(
                "{} Graph build: {} chunks, {} extracted, {} skipped, {} failed",
                if report.cancelled { "✗ Cancelled." } else { "✓" },
                report.total_chunks,
                report.successful,
                report.skipped,
                report.failed
            );
        }

        Commands::GraphProgress { source } => {
            let status = core.graph_progress(&source).await?;
            println!(
                "{}/{} chunks ({:.1}%)",
                status.processed_chunks, status.total_chunks, status.percentage
            );
        }

        Commands::SetModel { name, force } => match core.set_embedding_model(&name, force).await? {
            SetResult::Unchanged => println!("Model already active."),
            SetResult::ConfirmationRequired {
                existing_models,
                new_model,
            } => {
                println!(
                    "Existing vectors were produced by [{}]. Switching to {} deletes all \
                     documents, vectors and graph data.",
                    existing_models.join(", "),
                    new_model
                );
                println!("Re-run with --force to confirm.");
            }
            SetResult::Switched => println!("✓ Active model set; all indexed state cleared."),
        },

        Commands::Status => {
            let stats = core.stats().await?;
            println!("Active model:   {}", stats.active_model);
            println!("Documents:      {}", stats.documents);
            println!("Chunks:         {}", stats.chunks);
            println!("Chunk vectors:  {}", stats.chunk_vectors);
            println!("Entities:       {}", stats.entities);
            println!("Relationships:  {}", stats.relationships);
            println!("Entity vectors: {}", stats.entity_vectors);
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_env("QUARRY_LOG").unwrap_or_else(|_| EnvFilter::new("quarry=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}
