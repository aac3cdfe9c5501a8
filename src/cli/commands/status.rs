//! Ledger status command.

use console::style;

use crate::config::Settings;
use crate::ledger::Ledger;

/// Print ledger totals and the first `show` pending codes.
pub fn cmd_status(settings: &Settings, show: usize) -> anyhow::Result<()> {
    let ledger = Ledger::load(&settings.ledger_path)?;
    let counts = ledger.counts();

    println!("{}", style(settings.ledger_path.display()).bold());
    println!("  {:<12} {}", "items", counts.total);
    println!("  {:<12} {}", "downloaded", style(counts.downloaded).green());
    println!("  {:<12} {}", "pending", style(counts.pending).yellow());

    if counts.pending > 0 && show > 0 {
        println!();
        println!("Next pending:");
        for item in ledger.pending().take(show) {
            println!("  {} {}", style(&item.code).cyan(), item.listing_url);
        }
        if counts.pending > show {
            println!("  {} and {} more", style("…").dim(), counts.pending - show);
        }
    }

    Ok(())
}
