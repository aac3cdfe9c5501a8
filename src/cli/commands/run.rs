//! Run the image batch.

use anyhow::Context;
use console::style;
use tokio::sync::mpsc;

use crate::browser::ChromeLauncher;
use crate::config::Settings;
use crate::driver::{BatchEvent, BatchRunner, ItemOutcome};
use crate::extract::Extractor;
use crate::fetch::HttpImageSource;
use crate::ledger::Ledger;

/// Process pending items from the ledger.
pub async fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let mut ledger = Ledger::load(&settings.ledger_path)?;

    let counts = ledger.counts();
    if counts.pending == 0 {
        println!(
            "{} All {} items already downloaded",
            style("!").yellow(),
            counts.total
        );
        return Ok(());
    }

    std::fs::create_dir_all(&settings.image_root).with_context(|| {
        format!(
            "Failed to create image root {}",
            settings.image_root.display()
        )
    })?;

    let limit = match settings.max_items_per_run {
        0 => "no limit".to_string(),
        n => format!("limit {}", n),
    };
    println!(
        "{} {} pending of {} items ({}, {} proxies)",
        style("→").cyan(),
        counts.pending,
        counts.total,
        limit,
        settings.proxies.len()
    );

    let images = HttpImageSource::new(&settings.user_agent, settings.fetch_timeout())?;
    let launcher = ChromeLauncher::new(settings.browser.chrome_executable.clone());
    let proxies = settings
        .proxy_strategy
        .create_selector(settings.proxies.clone());

    let (event_tx, mut event_rx) = mpsc::channel::<BatchEvent>(100);

    let mut runner = BatchRunner::new(
        launcher,
        images,
        Extractor::new(settings.extract_options()),
        proxies,
        settings.batch_config(),
    )
    .with_events(event_tx);

    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let result = runner.run(&mut ledger).await;

    // Closing the channel lets the handler drain and exit.
    drop(runner);
    let _ = event_handler.await;

    let summary = result?;
    println!(
        "{} {} downloaded, {} without images, {} skipped",
        style("✓").green(),
        summary.downloaded,
        summary.exhausted,
        summary.skipped
    );
    let remaining = ledger.counts().pending;
    if remaining > 0 {
        println!("  {} {} items still pending", style("→").dim(), remaining);
    }

    Ok(())
}

fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::ItemStarted { code, url, proxy } => {
            println!("{} Processing {}: {}", style("→").cyan(), code, url);
            if let Some(proxy) = proxy {
                println!("    {} via {}", style("·").dim(), proxy);
            }
        }
        BatchEvent::CandidatesFound {
            count,
            failed_heuristics,
            ..
        } => {
            if *failed_heuristics > 0 {
                println!(
                    "    {} {} candidates ({} heuristics failed)",
                    style("·").dim(),
                    count,
                    failed_heuristics
                );
            } else {
                println!("    {} {} candidates", style("·").dim(), count);
            }
        }
        BatchEvent::CandidateSaved { url, .. } => {
            println!("    {} {}", style("✔").green(), url);
        }
        BatchEvent::CandidateFailed { url, error, .. } => {
            println!("    {} {}: {}", style("✘").red(), url, error);
        }
        BatchEvent::ItemFinished { code, outcome } => match outcome {
            ItemOutcome::Downloaded { filename, .. } => {
                println!("  {} {}: saved {}", style("→").green(), code, filename);
            }
            ItemOutcome::Exhausted { .. } => {
                println!("  {} {}: no images found", style("→").yellow(), code);
            }
            ItemOutcome::Skipped { stage, reason } => {
                println!(
                    "  {} {}: skipped at {} ({})",
                    style("→").yellow(),
                    code,
                    stage,
                    reason
                );
            }
        },
        BatchEvent::LimitReached { downloaded } => {
            println!(
                "{} Stopping after {} downloaded item(s)",
                style("!").yellow(),
                downloaded
            );
        }
    }
}
