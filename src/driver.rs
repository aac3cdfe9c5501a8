//! Batch runner: drives one browser session per pending ledger item.
//!
//! Per item: open session, navigate, extract candidates, try them in order
//! until one saves, then flag the item and persist the ledger before moving
//! on. Sessions are always closed before the next item starts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::browser::{PageSession, SessionLauncher, SessionOptions};
use crate::extract::{CandidateSource, Extractor};
use crate::fetch::{self, ImageSource};
use crate::ledger::{CatalogItem, Ledger, LedgerError};
use crate::rotation::ProxySelector;

/// Settings for a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Root folder; each item gets `<image_root>/<code>/`.
    pub image_root: PathBuf,
    /// Stop after this many items are downloaded (0 = unlimited).
    pub max_items: usize,
    pub user_agent: String,
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub chrome_args: Vec<String>,
}

/// Where an item's processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Prepare,
    Launch,
    Navigate,
    WaitReady,
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Launch => write!(f, "launch"),
            Self::Navigate => write!(f, "navigate"),
            Self::WaitReady => write!(f, "wait-ready"),
        }
    }
}

/// Result of processing one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// A candidate was saved; the item is complete.
    Downloaded {
        url: String,
        filename: String,
        source: CandidateSource,
    },
    /// Every candidate failed, or there were none.
    Exhausted { attempted: usize },
    /// The item never reached the candidate stage.
    Skipped { stage: ItemStage, reason: String },
}

/// Events emitted during a batch run.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    ItemStarted {
        code: String,
        url: String,
        proxy: Option<String>,
    },
    CandidatesFound {
        code: String,
        count: usize,
        failed_heuristics: usize,
    },
    CandidateSaved {
        code: String,
        url: String,
        filename: String,
    },
    CandidateFailed {
        code: String,
        url: String,
        error: String,
    },
    ItemFinished {
        code: String,
        outcome: ItemOutcome,
    },
    LimitReached {
        downloaded: usize,
    },
}

/// Totals for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub downloaded: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub limit_reached: bool,
}

/// Failures that end the run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Item {code} was downloaded but the ledger could not be saved: {source}")]
    Persist {
        code: String,
        #[source]
        source: LedgerError,
    },
}

/// Sequential per-item session controller.
pub struct BatchRunner<L: SessionLauncher, I> {
    launcher: L,
    images: I,
    extractor: Extractor<L::Session>,
    proxies: Box<dyn ProxySelector>,
    config: BatchConfig,
    events: Option<mpsc::Sender<BatchEvent>>,
}

impl<L, I> BatchRunner<L, I>
where
    L: SessionLauncher,
    I: ImageSource,
{
    pub fn new(
        launcher: L,
        images: I,
        extractor: Extractor<L::Session>,
        proxies: Box<dyn ProxySelector>,
        config: BatchConfig,
    ) -> Self {
        Self {
            launcher,
            images,
            extractor,
            proxies,
            config,
            events: None,
        }
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<BatchEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: BatchEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Process pending items in ledger order until the item limit is hit or
    /// the ledger is exhausted.
    ///
    /// Each completed item is persisted before the next one starts. A
    /// persist failure stops the run.
    pub async fn run(&mut self, ledger: &mut Ledger) -> Result<RunSummary, RunError> {
        let queue: Vec<CatalogItem> = ledger.pending().cloned().collect();
        info!("{} pending items in {}", queue.len(), ledger.path().display());

        let mut summary = RunSummary::default();

        for item in queue {
            summary.attempted += 1;
            let outcome = self.process_item(&item).await;

            match outcome {
                ItemOutcome::Downloaded { .. } => {
                    ledger.mark_downloaded(&item.code);
                    ledger.persist().map_err(|source| RunError::Persist {
                        code: item.code.clone(),
                        source,
                    })?;
                    summary.downloaded += 1;
                }
                ItemOutcome::Exhausted { .. } => summary.exhausted += 1,
                ItemOutcome::Skipped { .. } => summary.skipped += 1,
            }

            if self.config.max_items > 0 && summary.downloaded >= self.config.max_items {
                info!("Reached limit of {} downloaded items", self.config.max_items);
                summary.limit_reached = true;
                self.emit(BatchEvent::LimitReached {
                    downloaded: summary.downloaded,
                })
                .await;
                break;
            }
        }

        Ok(summary)
    }

    /// Run one item through its own browser session.
    pub async fn process_item(&mut self, item: &CatalogItem) -> ItemOutcome {
        let proxy = self.proxies.next_proxy();
        info!("Processing {}: {}", item.code, item.listing_url);
        self.emit(BatchEvent::ItemStarted {
            code: item.code.clone(),
            url: item.listing_url.clone(),
            proxy: proxy.clone(),
        })
        .await;

        let outcome = self.run_session(item, proxy).await;

        match &outcome {
            ItemOutcome::Downloaded { filename, .. } => {
                info!("{}: saved {}", item.code, filename)
            }
            ItemOutcome::Exhausted { attempted } => {
                warn!("{}: no images found ({} candidates tried)", item.code, attempted)
            }
            ItemOutcome::Skipped { stage, reason } => {
                warn!("{}: skipped at {}: {}", item.code, stage, reason)
            }
        }

        self.emit(BatchEvent::ItemFinished {
            code: item.code.clone(),
            outcome: outcome.clone(),
        })
        .await;
        outcome
    }

    async fn run_session(&self, item: &CatalogItem, proxy: Option<String>) -> ItemOutcome {
        let folder = self.config.image_root.join(&item.code);
        if let Err(e) = std::fs::create_dir_all(&folder) {
            return ItemOutcome::Skipped {
                stage: ItemStage::Prepare,
                reason: format!("cannot create {}: {}", folder.display(), e),
            };
        }

        let options = SessionOptions {
            proxy,
            user_agent: self.config.user_agent.clone(),
            headless: self.config.headless,
            timeout: self.config.navigation_timeout,
            extra_args: self.config.chrome_args.clone(),
        };

        let session = match self.launcher.launch(&options).await {
            Ok(session) => session,
            Err(e) => {
                return ItemOutcome::Skipped {
                    stage: ItemStage::Launch,
                    reason: e.to_string(),
                }
            }
        };

        let outcome = self.drive(&session, item, &folder).await;

        if let Err(e) = session.close().await {
            warn!("{}: session did not close cleanly: {}", item.code, e);
        }
        outcome
    }

    async fn drive(&self, session: &L::Session, item: &CatalogItem, folder: &Path) -> ItemOutcome {
        if let Err(e) = session.navigate(&item.listing_url).await {
            return ItemOutcome::Skipped {
                stage: ItemStage::Navigate,
                reason: e.to_string(),
            };
        }

        let extraction = match self.extractor.extract(session, &item.code).await {
            Ok(extraction) => extraction,
            Err(e) => {
                return ItemOutcome::Skipped {
                    stage: ItemStage::WaitReady,
                    reason: e.to_string(),
                }
            }
        };

        self.emit(BatchEvent::CandidatesFound {
            code: item.code.clone(),
            count: extraction.candidates.len(),
            failed_heuristics: extraction.diagnostics.len(),
        })
        .await;

        let mut attempted = 0;
        for candidate in &extraction.candidates {
            attempted += 1;
            match fetch::save(&self.images, &candidate.url, folder).await {
                Ok(filename) => {
                    self.emit(BatchEvent::CandidateSaved {
                        code: item.code.clone(),
                        url: candidate.url.clone(),
                        filename: filename.clone(),
                    })
                    .await;
                    return ItemOutcome::Downloaded {
                        url: candidate.url.clone(),
                        filename,
                        source: candidate.source,
                    };
                }
                Err(e) => {
                    warn!("{}: {} failed: {}", item.code, candidate.url, e);
                    self.emit(BatchEvent::CandidateFailed {
                        code: item.code.clone(),
                        url: candidate.url.clone(),
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        }

        ItemOutcome::Exhausted { attempted }
    }
}
