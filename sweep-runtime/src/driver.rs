//! Crawl driver
//!
//! Walks listing pages one at a time and probes every domain the store has
//! not seen yet:
//! - One outbound request in flight at any moment
//! - A random delay from `probe_delay` after every probe
//! - Interrupts are honored after each probe and each page, never mid-request
//! - The store is flushed on every exit path

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sweep_core::{ConfigError, DelayRange, ListingSource, PageToken, ProbeStatus, DEFAULT_MAX_PAGES};
use sweep_tor::{fetch_listing_page, ListingParser, Prober, RetryPolicy, TorError, Transport};

use crate::{CrawlOutcome, CrawlState, CrawlSummary, ResultStore};

/// Crawl configuration
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Listing to walk
    pub listing: ListingSource,
    /// First page token
    pub start_page: PageToken,
    /// Pages to process (skipped pages do not count)
    pub max_pages: u32,
    /// Delay after every probe
    pub probe_delay: DelayRange,
    /// Extra pause between listing pages.
    ///
    /// It adds to the probe delay and the listing fetch, so the gap between
    /// the last probe of one page and the first of the next can exceed
    /// `probe_delay.max()`. Use [`DelayRange::zero`] to keep every gap in range.
    pub page_delay: DelayRange,
    /// Retry budget for listing pages
    pub listing_retry: RetryPolicy,
    /// Retry budget for probes
    pub probe_retry: RetryPolicy,
    /// Consecutive failed page fetches tolerated before giving up
    pub max_fetch_failure_streak: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            listing: ListingSource::default(),
            start_page: sweep_core::DEFAULT_START_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            probe_delay: DelayRange::from_secs(sweep_core::DEFAULT_MIN_DELAY, sweep_core::DEFAULT_MAX_DELAY)
                .unwrap_or_else(|_| DelayRange::zero()),
            page_delay: DelayRange::from_secs(15.0, 30.0).unwrap_or_else(|_| DelayRange::zero()),
            listing_retry: RetryPolicy::listing(),
            probe_retry: RetryPolicy::probe(),
            max_fetch_failure_streak: 5,
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listing.validate()?;
        if self.max_pages == 0 {
            return Err(ConfigError::ZeroMaxPages);
        }
        Ok(())
    }
}

/// Errors that end a crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Invalid crawl configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tor(#[from] TorError),

    #[error("Listing unreachable: {streak} consecutive page fetches failed, last at page {last_page}")]
    FetchFailureStreakExceeded {
        streak: u32,
        last_page: PageToken,
        summary: Box<CrawlSummary>,
    },
}

/// Sequential crawl-and-probe driver
pub struct Crawler {
    config: CrawlConfig,
    transport: Arc<dyn Transport>,
    parser: ListingParser,
    prober: Prober,
    store: ResultStore,
    shutdown: Option<watch::Receiver<bool>>,
}

/// Why the page loop stopped
enum Stop {
    Done(CrawlOutcome),
    Streak { streak: u32, last_page: PageToken },
}

impl Crawler {
    pub fn new(
        config: CrawlConfig,
        transport: Arc<dyn Transport>,
        store: ResultStore,
    ) -> Result<Self, CrawlError> {
        config.validate()?;
        let parser = ListingParser::for_source(&config.listing)?;
        let prober = Prober::new(Arc::clone(&transport), config.probe_retry);

        Ok(Self {
            config,
            transport,
            parser,
            prober,
            store,
            shutdown: None,
        })
    }

    /// Stop cooperatively once `true` is sent on this channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn into_store(self) -> ResultStore {
        self.store
    }

    /// Run the crawl to completion, interruption, or a fatal listing failure
    pub async fn run(&mut self) -> Result<CrawlSummary, CrawlError> {
        let mut state = CrawlState::new(self.config.start_page);

        info!(
            "[{}] Starting crawl at page {} ({} pages max, {} known sites)",
            state.run_id,
            state.page,
            self.config.max_pages,
            self.store.seen_count()
        );

        let stop = self.crawl(&mut state).await;

        if let Err(e) = self.store.flush() {
            error!("[{}] Final save failed: {}", state.run_id, e);
            state.persist_failures += 1;
        }

        let total = self.store.accessible_count();

        match stop {
            Stop::Done(outcome) => {
                let summary = state.summary(outcome, total);
                info!(
                    "[{}] Crawl {}: {} pages, {} sites found, {} tested, {} accessible ({} total in {})",
                    summary.run_id,
                    summary.outcome,
                    summary.pages_processed,
                    summary.discovered,
                    summary.tested,
                    summary.accessible,
                    summary.total_accessible,
                    self.store.path().display()
                );
                Ok(summary)
            }
            Stop::Streak { streak, last_page } => {
                let summary = state.summary(CrawlOutcome::ListingUnreachable, total);
                error!(
                    "[{}] Giving up after {} consecutive listing failures",
                    summary.run_id, streak
                );
                Err(CrawlError::FetchFailureStreakExceeded {
                    streak,
                    last_page,
                    summary: Box::new(summary),
                })
            }
        }
    }

    async fn crawl(&mut self, state: &mut CrawlState) -> Stop {
        let stride = self.config.listing.stride;

        while state.pages_processed < self.config.max_pages {
            if self.interrupted() {
                return Stop::Done(CrawlOutcome::Interrupted);
            }

            let page = state.page;
            let html = match fetch_listing_page(
                self.transport.as_ref(),
                &self.config.listing,
                page,
                &self.config.listing_retry,
            )
            .await
            {
                Ok(html) => html,
                Err(e) => {
                    warn!("{}; skipping page", e);
                    state.page_failed();

                    if state.fetch_failure_streak > self.config.max_fetch_failure_streak {
                        return Stop::Streak {
                            streak: state.fetch_failure_streak,
                            last_page: page,
                        };
                    }
                    if !state.advance(stride) {
                        info!("Page tokens exhausted after {}", page);
                        return Stop::Done(CrawlOutcome::Completed);
                    }
                    if self.pause(self.config.probe_delay).await {
                        return Stop::Done(CrawlOutcome::Interrupted);
                    }
                    continue;
                }
            };
            state.page_fetched();

            let entries = self.parser.parse(&html);
            state.discovered += entries.len();

            if entries.is_empty() {
                warn!("No onion sites found on page {}", page);
            } else {
                info!("Found {} onion sites on page {}", entries.len(), page);
            }

            for entry in &entries {
                if self.store.contains(&entry.domain) {
                    debug!("Already tested {}, skipping", entry.domain);
                    state.skipped_known += 1;
                    continue;
                }

                let result = self.prober.probe(entry).await;
                state.tested += 1;

                match result.status {
                    ProbeStatus::Accessible => {
                        state.accessible += 1;
                        info!("✓ {} is accessible ({:.2}s)", result.domain, result.response_time);
                    }
                    ProbeStatus::Inaccessible => info!(
                        "✗ {} is inaccessible: {}",
                        result.domain,
                        result.error_detail.as_deref().unwrap_or("no response")
                    ),
                    ProbeStatus::Error => warn!(
                        "✗ {} error: {}",
                        result.domain,
                        result.error_detail.as_deref().unwrap_or("unknown")
                    ),
                }

                let domain = result.domain.clone();
                if let Err(e) = self.store.record(result) {
                    error!("Failed to save result for {}: {}", domain, e);
                    state.persist_failures += 1;
                }

                if self.interrupted() || self.pause(self.config.probe_delay).await {
                    return Stop::Done(CrawlOutcome::Interrupted);
                }
            }

            state.pages_processed += 1;
            let more_tokens = state.advance(stride);

            info!(
                "Progress: {}/{} pages, {} sites found, {} accessible",
                state.pages_processed, self.config.max_pages, state.discovered, state.accessible
            );

            if !more_tokens {
                info!("Page tokens exhausted after {}", page);
                return Stop::Done(CrawlOutcome::Completed);
            }
            if self.interrupted() {
                return Stop::Done(CrawlOutcome::Interrupted);
            }
            if state.pages_processed < self.config.max_pages && self.pause(self.config.page_delay).await {
                return Stop::Done(CrawlOutcome::Interrupted);
            }
        }

        Stop::Done(CrawlOutcome::Completed)
    }

    fn interrupted(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for a delay drawn from `range`. Returns true if interrupted meanwhile.
    async fn pause(&mut self, range: DelayRange) -> bool {
        if range.is_zero() {
            return self.interrupted();
        }

        let delay = range.sample();
        debug!("Waiting {:.1} seconds before next request", delay.as_secs_f64());

        let Some(rx) = self.shutdown.as_mut() else {
            tokio::time::sleep(delay).await;
            return false;
        };

        // A dropped sender disables the second branch and the full delay runs
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            Ok(_) = rx.wait_for(|stop| *stop) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use sweep_core::{ProbeResult, Snapshot, TargetEntry};
    use sweep_tor::{FetchResponse, TransportError};
    use tokio::time::Instant;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.onion";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb.onion";
    const C: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccc.onion";
    const D: &str = "dddddddddddddddddddddddddddddddddddddddddddddddddddddddd.onion";

    const TEMPLATE: &str = "http://listing.onion/?page={page}";

    /// In-memory listing plus target sites
    #[derive(Default)]
    struct FakeTor {
        pages: HashMap<String, String>,
        sites: HashMap<String, Result<u16, TransportError>>,
        probes: Mutex<Vec<(String, Instant, Instant)>>,
        listing_requests: Mutex<Vec<String>>,
        stop_after_probes: Option<(usize, watch::Sender<bool>)>,
    }

    impl FakeTor {
        fn page(mut self, token: u128, domains: &[&str]) -> Self {
            let links: String = domains
                .iter()
                .map(|d| format!(r#"<a href="http://{}/">site {}</a>"#, d, &d[..4]))
                .collect();
            let html = format!(r#"<html><body><div id="link_list">{}</div></body></html>"#, links);
            self.pages.insert(ListingSource::new(TEMPLATE).page_url(PageToken(token)), html);
            self
        }

        fn site(mut self, domain: &str, outcome: Result<u16, TransportError>) -> Self {
            self.sites.insert(format!("http://{}/", domain), outcome);
            self
        }

        fn probed(&self) -> Vec<String> {
            self.probes.lock().unwrap().iter().map(|(u, _, _)| u.clone()).collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTor {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResponse, TransportError> {
            let ok = |status, body: String| FetchResponse {
                status,
                body,
                elapsed: Duration::from_millis(250),
            };

            if url.starts_with("http://listing.onion/") {
                self.listing_requests.lock().unwrap().push(url.to_string());
                return match self.pages.get(url) {
                    Some(html) => Ok(ok(200, html.clone())),
                    None => Err(TransportError::Connect("listing down".into())),
                };
            }

            let start = Instant::now();
            let outcome = self
                .sites
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Connect("unknown site".into())));

            let mut probes = self.probes.lock().unwrap();
            probes.push((url.to_string(), start, Instant::now()));
            if let Some((n, tx)) = &self.stop_after_probes {
                if probes.len() == *n {
                    let _ = tx.send(true);
                }
            }

            outcome.map(|status| ok(status, String::new()))
        }
    }

    fn config(start: u128, max_pages: u32, stride: u128) -> CrawlConfig {
        CrawlConfig {
            listing: ListingSource::new(TEMPLATE)
                .with_container("#link_list")
                .with_stride(stride),
            start_page: PageToken(start),
            max_pages,
            probe_delay: DelayRange::zero(),
            page_delay: DelayRange::zero(),
            listing_retry: RetryPolicy::new(2, Duration::from_secs(60), Duration::from_secs(1)),
            probe_retry: RetryPolicy::new(1, Duration::from_secs(30), Duration::from_secs(1)),
            max_fetch_failure_streak: 3,
        }
    }

    fn on_disk(path: &Path) -> Snapshot {
        Snapshot::from_json(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn connect_err() -> Result<u16, TransportError> {
        Err(TransportError::Connect("host unreachable".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_page_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let stride = 10;

        let tor = Arc::new(
            FakeTor::default()
                .page(100, &[A, B])
                .page(100 + stride, &[A, C])
                .site(A, Ok(200))
                .site(B, connect_err())
                .site(C, Ok(200)),
        );

        let store = ResultStore::open(&path).unwrap();
        let mut crawler = Crawler::new(config(100, 2, stride), tor.clone(), store).unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.outcome, CrawlOutcome::Completed);
        assert_eq!(summary.pages_processed, 2);
        assert_eq!(summary.discovered, 4);
        assert_eq!(summary.tested, 3);
        assert_eq!(summary.accessible, 2);
        assert_eq!(summary.skipped_known, 1);
        assert_eq!(summary.last_page, PageToken(120));

        let probed = tor.probed();
        assert_eq!(probed.iter().filter(|u| u.contains(A)).count(), 1);

        let snapshot = on_disk(&path);
        let domains: Vec<_> = snapshot.domains().collect();
        assert_eq!(domains, [A, C]);
        assert_eq!(snapshot.total_accessible_sites, 2);
        assert!(!std::fs::read_to_string(&path).unwrap().contains(B));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_known_domains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");

        let mut seeded = Snapshot::new();
        seeded.push(ProbeResult::new(&TargetEntry::new(D, "old"), ProbeStatus::Accessible));
        seeded.push(ProbeResult::new(&TargetEntry::new(A, "older"), ProbeStatus::Accessible));
        std::fs::write(&path, seeded.to_json().unwrap()).unwrap();

        let tor = Arc::new(
            FakeTor::default()
                .page(1, &[A, C])
                .site(A, Ok(200))
                .site(C, Ok(200)),
        );

        for _ in 0..2 {
            let store = ResultStore::open(&path).unwrap();
            let mut crawler = Crawler::new(config(1, 1, 1), tor.clone(), store).unwrap();
            crawler.run().await.unwrap();
        }

        // A was known from the start, C only needed probing once
        assert_eq!(tor.probed(), vec![format!("http://{}/", C)]);

        let snapshot = on_disk(&path);
        let domains: Vec<_> = snapshot.domains().collect();
        assert_eq!(domains, [D, A, C]);
        assert_eq!(snapshot.accessible_sites[1].label, "older");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_between_probes() {
        let dir = tempfile::tempdir().unwrap();
        let tor = Arc::new(
            FakeTor::default()
                .page(1, &[A, B])
                .page(2, &[C, D])
                .site(A, Ok(200))
                .site(B, connect_err())
                .site(C, Ok(500))
                .site(D, Ok(200)),
        );

        let mut cfg = config(1, 2, 1);
        cfg.probe_delay = DelayRange::from_secs(1.0, 2.0).unwrap();

        let store = ResultStore::open(dir.path().join("sites.json")).unwrap();
        let mut crawler = Crawler::new(cfg, tor.clone(), store).unwrap();
        crawler.run().await.unwrap();

        let probes = tor.probes.lock().unwrap();
        assert_eq!(probes.len(), 4);
        for pair in probes.windows(2) {
            let gap = pair[1].1 - pair[0].2;
            assert!(gap >= Duration::from_secs(1), "gap {:?} too short", gap);
            assert!(gap <= Duration::from_secs(2), "gap {:?} too long", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_delay_stacks_on_probe_delay() {
        let dir = tempfile::tempdir().unwrap();
        let tor = Arc::new(
            FakeTor::default()
                .page(1, &[A, B])
                .page(2, &[C, D])
                .site(A, Ok(200))
                .site(B, Ok(200))
                .site(C, Ok(200))
                .site(D, Ok(200)),
        );

        let mut cfg = config(1, 2, 1);
        cfg.probe_delay = DelayRange::from_secs(1.0, 2.0).unwrap();
        cfg.page_delay = DelayRange::from_secs(10.0, 10.0).unwrap();

        let store = ResultStore::open(dir.path().join("sites.json")).unwrap();
        let mut crawler = Crawler::new(cfg, tor.clone(), store).unwrap();
        crawler.run().await.unwrap();

        let probes = tor.probes.lock().unwrap();
        let gap = |i: usize| probes[i + 1].1 - probes[i].2;
        assert!(gap(0) <= Duration::from_secs(2));
        assert!(gap(1) >= Duration::from_secs(11), "gap {:?} across pages", gap(1));
        assert!(gap(2) <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_known_costs_no_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");

        let mut seeded = Snapshot::new();
        seeded.push(ProbeResult::new(&TargetEntry::new(A, ""), ProbeStatus::Accessible));
        seeded.push(ProbeResult::new(&TargetEntry::new(B, ""), ProbeStatus::Accessible));
        std::fs::write(&path, seeded.to_json().unwrap()).unwrap();

        let tor = Arc::new(FakeTor::default().page(1, &[A, B]));
        let mut cfg = config(1, 1, 1);
        cfg.probe_delay = DelayRange::from_secs(10.0, 10.0).unwrap();

        let start = Instant::now();
        let store = ResultStore::open(&path).unwrap();
        let summary = Crawler::new(cfg, tor.clone(), store).unwrap().run().await.unwrap();

        assert_eq!(summary.skipped_known, 2);
        assert!(tor.probed().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Page 1 is missing from the fake listing
        let tor = Arc::new(FakeTor::default().page(2, &[A]).site(A, Ok(200)));

        let store = ResultStore::open(dir.path().join("sites.json")).unwrap();
        let mut crawler = Crawler::new(config(1, 1, 1), tor.clone(), store).unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.outcome, CrawlOutcome::Completed);
        assert_eq!(summary.pages_skipped, 1);
        assert_eq!(summary.pages_processed, 1);
        assert_eq!(summary.accessible, 1);

        let requests = tor.listing_requests.lock().unwrap();
        // Two attempts on page 1, one on page 2
        assert_eq!(requests.len(), 3);
        assert!(requests[2].ends_with("page=2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_streak_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let tor = Arc::new(FakeTor::default());

        let store = ResultStore::open(&path).unwrap();
        let mut crawler = Crawler::new(config(1, 10, 1), tor.clone(), store).unwrap();
        let err = crawler.run().await.unwrap_err();

        match err {
            CrawlError::FetchFailureStreakExceeded {
                streak,
                last_page,
                summary,
            } => {
                assert_eq!(streak, 4);
                assert_eq!(last_page, PageToken(4));
                assert_eq!(summary.outcome, CrawlOutcome::ListingUnreachable);
                assert_eq!(summary.pages_processed, 0);
            }
            other => panic!("unexpected error: {}", other),
        }

        // The final flush still leaves a valid, empty snapshot
        assert_eq!(on_disk(&path).total_accessible_sites, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_after_probe_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.json");
        let (tx, rx) = watch::channel(false);

        let tor = Arc::new(FakeTor {
            stop_after_probes: Some((1, tx)),
            ..FakeTor::default()
                .page(1, &[A, B, C])
                .site(A, Ok(200))
                .site(B, Ok(200))
                .site(C, Ok(200))
        });

        let store = ResultStore::open(&path).unwrap();
        let mut crawler = Crawler::new(config(1, 3, 1), tor.clone(), store)
            .unwrap()
            .with_shutdown(rx);
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.outcome, CrawlOutcome::Interrupted);
        assert_eq!(summary.tested, 1);
        assert_eq!(tor.probed().len(), 1);

        let domains: Vec<_> = on_disk(&path).domains().map(str::to_string).collect();
        assert_eq!(domains, vec![A.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cuts_delay_short() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let tor = Arc::new(FakeTor::default().page(1, &[A, B]).site(A, Ok(200)).site(B, Ok(200)));

        let mut cfg = config(1, 1, 1);
        cfg.probe_delay = DelayRange::from_secs(600.0, 600.0).unwrap();

        let store = ResultStore::open(dir.path().join("sites.json")).unwrap();
        let mut crawler = Crawler::new(cfg, tor.clone(), store).unwrap().with_shutdown(rx);

        let start = Instant::now();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(true);
        });

        let summary = crawler.run().await.unwrap();
        stopper.await.unwrap();

        assert_eq!(summary.outcome, CrawlOutcome::Interrupted);
        assert_eq!(tor.probed().len(), 1);
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("sites.json");
        let tor = Arc::new(FakeTor::default().page(1, &[A, B]).site(A, Ok(200)).site(B, Ok(200)));

        let store = ResultStore::open(&path).unwrap();
        let mut crawler = Crawler::new(config(1, 1, 1), tor.clone(), store).unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.tested, 2);
        assert_eq!(summary.accessible, 2);
        // Two records plus the final flush
        assert_eq!(summary.persist_failures, 3);
        assert_eq!(crawler.store().accessible_count(), 2);
    }

    #[test]
    fn test_rejects_zero_max_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("sites.json")).unwrap();
        let result = Crawler::new(config(1, 0, 1), Arc::new(FakeTor::default()), store);
        assert!(matches!(result, Err(CrawlError::Config(ConfigError::ZeroMaxPages))));
    }
}
