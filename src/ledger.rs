//! Resume ledger: the CSV table of catalog items and their download status.
//!
//! The ledger is the only state that survives between runs. It is loaded once
//! at startup and rewritten after every completed item, so an interrupted
//! batch loses at most the item that was in flight.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

/// Column holding the item code.
pub const CODE_COLUMN: &str = "SW_Code";
/// Column holding the listing page URL.
pub const LINK_COLUMN: &str = "Item_Link";
/// Column holding the 0/1 download flag.
pub const DOWNLOADED_COLUMN: &str = "Downloaded";

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors from loading or persisting the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Ledger {path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("Ledger {path} row {row}: {reason}")]
    Malformed {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("Failed to write ledger {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

/// One catalog item as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub code: String,
    pub listing_url: String,
    pub downloaded: bool,
}

/// Ledger row: the parsed item plus the raw record so unrelated columns
/// round-trip untouched.
#[derive(Debug, Clone)]
struct LedgerRow {
    item: CatalogItem,
    record: Vec<String>,
}

/// Totals over the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub total: usize,
    pub downloaded: usize,
    pub pending: usize,
}

/// In-memory copy of the ledger table.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<LedgerRow>,
    downloaded_col: Option<usize>,
}

impl Ledger {
    /// Load the ledger from a CSV file.
    pub fn load(path: &Path) -> LedgerResult<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|source| LedgerError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path, reader)
    }

    /// Parse a ledger from any reader. `path` is where `persist` will write.
    pub fn from_reader<R: Read>(path: &Path, reader: R) -> LedgerResult<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        Self::parse(path, reader)
    }

    fn parse<R: Read>(path: &Path, mut reader: csv::Reader<R>) -> LedgerResult<Self> {
        let load_err = |source| LedgerError::Load {
            path: path.to_path_buf(),
            source,
        };

        let headers: Vec<String> = reader
            .headers()
            .map_err(load_err)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let column = |name: &'static str| headers.iter().position(|h| h == name);
        let code_col = column(CODE_COLUMN).ok_or_else(|| LedgerError::MissingColumn {
            path: path.to_path_buf(),
            column: CODE_COLUMN,
        })?;
        let link_col = column(LINK_COLUMN).ok_or_else(|| LedgerError::MissingColumn {
            path: path.to_path_buf(),
            column: LINK_COLUMN,
        })?;
        let downloaded_col = column(DOWNLOADED_COLUMN);

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            // Header is line 1.
            let row = idx + 2;
            let record = record.map_err(load_err)?;
            let malformed = |reason: String| LedgerError::Malformed {
                path: path.to_path_buf(),
                row,
                reason,
            };

            let code = record.get(code_col).unwrap_or("").trim().to_string();
            if code.is_empty() {
                return Err(malformed(format!("empty {}", CODE_COLUMN)));
            }

            let listing_url = record.get(link_col).unwrap_or("").trim().to_string();
            Url::parse(&listing_url)
                .map_err(|e| malformed(format!("invalid {} '{}': {}", LINK_COLUMN, listing_url, e)))?;

            let downloaded = match downloaded_col {
                Some(col) => parse_flag(record.get(col).unwrap_or(""))
                    .ok_or_else(|| malformed(format!("invalid {} value", DOWNLOADED_COLUMN)))?,
                None => false,
            };

            rows.push(LedgerRow {
                item: CatalogItem {
                    code,
                    listing_url,
                    downloaded,
                },
                record: record.iter().map(str::to_string).collect(),
            });
        }

        debug!("Loaded {} ledger rows from {}", rows.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
            downloaded_col,
        })
    }

    /// Path the ledger is persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All items in load order.
    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.rows.iter().map(|r| &r.item)
    }

    /// Items not yet downloaded, in load order.
    pub fn pending(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items().filter(|item| !item.downloaded)
    }

    pub fn get(&self, code: &str) -> Option<&CatalogItem> {
        self.items().find(|item| item.code == code)
    }

    /// Flag an item as downloaded. Returns false if the code is unknown.
    ///
    /// The change is not durable until [`Ledger::persist`] succeeds.
    pub fn mark_downloaded(&mut self, code: &str) -> bool {
        self.set_downloaded(code, true)
    }

    /// Return an item to the pending state. Returns false if the code is unknown.
    pub fn mark_pending(&mut self, code: &str) -> bool {
        self.set_downloaded(code, false)
    }

    fn set_downloaded(&mut self, code: &str, downloaded: bool) -> bool {
        match self.rows.iter_mut().find(|r| r.item.code == code) {
            Some(row) => {
                row.item.downloaded = downloaded;
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> LedgerCounts {
        let total = self.rows.len();
        let downloaded = self.items().filter(|i| i.downloaded).count();
        LedgerCounts {
            total,
            downloaded,
            pending: total - downloaded,
        }
    }

    /// Rewrite the whole table to disk.
    ///
    /// Writes a sibling temp file and renames it over the ledger, so readers
    /// never observe a half-written table.
    pub fn persist(&self) -> LedgerResult<()> {
        let persist_err = |reason: String| LedgerError::Persist {
            path: self.path.clone(),
            reason,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| persist_err(e.to_string()))?;

        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            let mut headers = self.headers.clone();
            if self.downloaded_col.is_none() {
                headers.push(DOWNLOADED_COLUMN.to_string());
            }
            writer
                .write_record(&headers)
                .map_err(|e| persist_err(e.to_string()))?;

            for row in &self.rows {
                let flag = if row.item.downloaded { "1" } else { "0" };
                let mut record = row.record.clone();
                match self.downloaded_col {
                    Some(col) => {
                        if record.len() <= col {
                            record.resize(col + 1, String::new());
                        }
                        record[col] = flag.to_string();
                    }
                    None => record.push(flag.to_string()),
                }
                writer
                    .write_record(&record)
                    .map_err(|e| persist_err(e.to_string()))?;
            }
            writer.flush().map_err(|e| persist_err(e.to_string()))?;
        }

        tmp.as_file()
            .sync_all()
            .map_err(|e| persist_err(e.to_string()))?;

        // Temp files are owner-only; keep whatever mode the ledger had.
        if let Ok(meta) = fs::metadata(&self.path) {
            tmp.as_file()
                .set_permissions(meta.permissions())
                .map_err(|e| persist_err(e.to_string()))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| persist_err(e.error.to_string()))?;

        debug!("Persisted ledger to {}", self.path.display());
        Ok(())
    }
}

/// Parse a Downloaded cell. Blank means not downloaded; spreadsheet exports
/// sometimes render the flag as a float.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "" | "0" | "0.0" => Some(false),
        "1" | "1.0" => Some(true),
        other => other.eq_ignore_ascii_case("true").then_some(true).or_else(|| {
            other.eq_ignore_ascii_case("false").then_some(false)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
SW_Code,Item_Link,Downloaded,Notes
A1,https://www.ebay.de/itm/1,0,first
B2,https://www.ebay.de/itm/2,1,second
C3,https://www.ebay.de/itm/3,,third
";

    #[test]
    fn test_load_defaults_blank_flag_to_pending() {
        let ledger = Ledger::from_reader(Path::new("links.csv"), SAMPLE.as_bytes()).unwrap();
        let pending: Vec<_> = ledger.pending().map(|i| i.code.as_str()).collect();
        assert_eq!(pending, vec!["A1", "C3"]);
        assert_eq!(
            ledger.counts(),
            LedgerCounts {
                total: 3,
                downloaded: 1,
                pending: 2
            }
        );
    }

    #[test]
    fn test_missing_downloaded_column_defaults_to_zero() {
        let csv = "SW_Code,Item_Link\nA1,https://www.ebay.de/itm/1\n";
        let ledger = Ledger::from_reader(Path::new("links.csv"), csv.as_bytes()).unwrap();
        assert!(!ledger.get("A1").unwrap().downloaded);
    }

    #[test]
    fn test_missing_code_column_is_load_error() {
        let csv = "Code,Item_Link\nA1,https://www.ebay.de/itm/1\n";
        let err = Ledger::from_reader(Path::new("links.csv"), csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MissingColumn {
                column: CODE_COLUMN,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_link_is_malformed() {
        let csv = "SW_Code,Item_Link\nA1,not a url\n";
        let err = Ledger::from_reader(Path::new("links.csv"), csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { row: 2, .. }));
    }

    #[test]
    fn test_bad_flag_is_malformed() {
        let csv = "SW_Code,Item_Link,Downloaded\nA1,https://www.ebay.de/itm/1,maybe\n";
        let err = Ledger::from_reader(Path::new("links.csv"), csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { .. }));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let dir = tempdir().unwrap();
        let err = Ledger::load(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, LedgerError::Load { .. }));
    }

    #[test]
    fn test_persist_round_trips_extra_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        assert!(ledger.mark_downloaded("C3"));
        ledger.persist().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("SW_Code,Item_Link,Downloaded,Notes\n"));
        assert!(written.contains("C3,https://www.ebay.de/itm/3,1,third"));
        assert!(written.contains("A1,https://www.ebay.de/itm/1,0,first"));

        let reloaded = Ledger::load(&path).unwrap();
        assert!(reloaded.get("C3").unwrap().downloaded);
        assert_eq!(reloaded.counts().pending, 1);
    }

    #[test]
    fn test_persist_appends_downloaded_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.csv");
        std::fs::write(&path, "SW_Code,Item_Link\nA1,https://www.ebay.de/itm/1\n").unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.mark_downloaded("A1");
        ledger.persist().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "SW_Code,Item_Link,Downloaded\nA1,https://www.ebay.de/itm/1,1\n"
        );
    }

    #[test]
    fn test_mark_unknown_code() {
        let mut ledger = Ledger::from_reader(Path::new("links.csv"), SAMPLE.as_bytes()).unwrap();
        assert!(!ledger.mark_downloaded("ZZZ"));
        assert!(ledger.mark_pending("B2"));
        assert_eq!(ledger.counts().pending, 3);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(" "), Some(false));
        assert_eq!(parse_flag("1.0"), Some(true));
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("2"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_persist_keeps_existing_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("links.csv");
        std::fs::write(&path, "SW_Code,Item_Link\nA1,https://www.ebay.de/itm/1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        ledger.mark_downloaded("A1");
        ledger.persist().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }
}
