//! Per-run crawl state and the summary handed back to the caller

use std::fmt;

use sweep_core::PageToken;

/// Counters and position for one run. Nothing outlives the run.
#[derive(Debug, Clone)]
pub struct CrawlState {
    /// Short id tagging this run's log lines
    pub run_id: String,
    /// Page to fetch next
    pub page: PageToken,
    pub pages_processed: u32,
    pub pages_skipped: u32,
    pub discovered: usize,
    pub tested: usize,
    pub accessible: usize,
    pub skipped_known: usize,
    pub persist_failures: usize,
    /// Consecutive listing fetches that failed
    pub fetch_failure_streak: u32,
}

impl CrawlState {
    pub fn new(start: PageToken) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            page: start,
            pages_processed: 0,
            pages_skipped: 0,
            discovered: 0,
            tested: 0,
            accessible: 0,
            skipped_known: 0,
            persist_failures: 0,
            fetch_failure_streak: 0,
        }
    }

    /// Move to the next page token. False once the token space runs out.
    pub fn advance(&mut self, stride: u128) -> bool {
        match self.page.advance(stride) {
            Some(next) => {
                self.page = next;
                true
            }
            None => false,
        }
    }

    pub fn page_fetched(&mut self) {
        self.fetch_failure_streak = 0;
    }

    pub fn page_failed(&mut self) {
        self.pages_skipped += 1;
        self.fetch_failure_streak += 1;
    }

    pub fn summary(&self, outcome: CrawlOutcome, total_accessible: usize) -> CrawlSummary {
        CrawlSummary {
            run_id: self.run_id.clone(),
            outcome,
            last_page: self.page,
            pages_processed: self.pages_processed,
            pages_skipped: self.pages_skipped,
            discovered: self.discovered,
            tested: self.tested,
            accessible: self.accessible,
            skipped_known: self.skipped_known,
            persist_failures: self.persist_failures,
            total_accessible,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Page budget used up, or no more page tokens
    Completed,
    /// Stopped by the operator
    Interrupted,
    /// Too many listing fetches failed in a row
    ListingUnreachable,
}

impl fmt::Display for CrawlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlOutcome::Completed => "completed",
            CrawlOutcome::Interrupted => "interrupted",
            CrawlOutcome::ListingUnreachable => "listing unreachable",
        };
        f.write_str(s)
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub run_id: String,
    pub outcome: CrawlOutcome,
    /// Token the run would have fetched next
    pub last_page: PageToken,
    pub pages_processed: u32,
    pub pages_skipped: u32,
    pub discovered: usize,
    pub tested: usize,
    /// Accessible sites found by this run
    pub accessible: usize,
    pub skipped_known: usize,
    pub persist_failures: usize,
    /// Accessible sites in the snapshot, including earlier runs
    pub total_accessible: usize,
}
