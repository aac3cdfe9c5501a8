//! Return items to the pending state.

use console::style;

use crate::config::Settings;
use crate::ledger::Ledger;

/// Mark `codes` as pending and persist the ledger.
pub fn cmd_reset(settings: &Settings, codes: &[String]) -> anyhow::Result<()> {
    let mut ledger = Ledger::load(&settings.ledger_path)?;

    let mut changed = 0;
    for code in codes {
        match ledger.get(code).map(|item| item.downloaded) {
            Some(true) => {
                ledger.mark_pending(code);
                changed += 1;
                println!("{} {} reset to pending", style("✓").green(), code);
            }
            Some(false) => println!("{} {} is already pending", style("!").yellow(), code),
            None => println!("{} {} not found in ledger", style("✘").red(), code),
        }
    }

    if changed > 0 {
        ledger.persist()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings_for(dir: &std::path::Path, csv: &str) -> Settings {
        let ledger_path = dir.join("links.csv");
        std::fs::write(&ledger_path, csv).unwrap();
        Settings {
            ledger_path,
            ..Settings::default()
        }
    }

    #[test]
    fn test_reset_persists_downloaded_codes() {
        let dir = tempdir().unwrap();
        let settings = settings_for(
            dir.path(),
            "SW_Code,Item_Link,Downloaded\nA1,https://www.ebay.de/itm/1,1\nB2,https://www.ebay.de/itm/2,1\n",
        );

        cmd_reset(&settings, &["A1".to_string()]).unwrap();

        let ledger = Ledger::load(&settings.ledger_path).unwrap();
        assert!(!ledger.get("A1").unwrap().downloaded);
        assert!(ledger.get("B2").unwrap().downloaded);
    }

    #[test]
    fn test_reset_pending_and_unknown_codes_leave_file_untouched() {
        let dir = tempdir().unwrap();
        let csv = "SW_Code,Item_Link,Downloaded\nA1,https://www.ebay.de/itm/1,\n";
        let settings = settings_for(dir.path(), csv);

        cmd_reset(&settings, &["A1".to_string(), "ZZ9".to_string()]).unwrap();

        // Nothing changed, so the blank flag is not rewritten as 0.
        assert_eq!(std::fs::read_to_string(&settings.ledger_path).unwrap(), csv);
    }

    #[test]
    fn test_reset_missing_ledger_fails() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            ledger_path: dir.path().join("absent.csv"),
            ..Settings::default()
        };
        assert!(cmd_reset(&settings, &["A1".to_string()]).is_err());
    }
}
