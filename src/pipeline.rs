use crate::config::{Config, DetectorConfig, SportConfig};
use crate::engine::detector::{self, ArbitrageOpportunity};
use crate::feed::types::{ApiQuota, OddsUpdate};
use crate::feed::OddsFeed;
use crate::store::{OpportunityStore, QuoteBook};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Per-sport polling state with its resolved detector config.
pub struct SportPipeline {
    pub key: String,
    pub label: String,
    pub enabled: bool,

    // Resolved config (sport override merged over global)
    pub detector_config: DetectorConfig,

    pub last_poll: Option<DateTime<Utc>>,
    pub last_event_count: usize,
    pub last_error: Option<String>,
}

impl SportPipeline {
    pub fn from_config(key: &str, sport: &SportConfig, global_detector: &DetectorConfig) -> Self {
        SportPipeline {
            key: key.to_string(),
            label: sport.label.clone(),
            enabled: sport.enabled,
            detector_config: global_detector.with_override(sport.detector.as_ref()),
            last_poll: None,
            last_event_count: 0,
            last_error: None,
        }
    }

    /// Fetch this sport, upsert the quotes and run the detector over the
    /// book's view of every event in the response.
    pub async fn tick(
        &mut self,
        feed: &mut dyn OddsFeed,
        quotes: &mut QuoteBook,
        now: DateTime<Utc>,
    ) -> Result<SportTick> {
        self.last_poll = Some(now);
        let updates = match feed.fetch_odds(&self.key).await {
            Ok(u) => u,
            Err(e) => {
                self.last_error = Some(format!("{:#}", e));
                return Err(e);
            }
        };
        self.last_error = None;
        self.last_event_count = updates.len();

        let quotes_upserted: usize = updates.iter().map(|u| quotes.upsert(u)).sum();
        let events: Vec<OddsUpdate> = updates
            .iter()
            .filter_map(|u| quotes.event(&u.event_id))
            .collect();
        let opportunities = detector::detect_all(&events, &self.label, &self.detector_config, now);

        for opp in &opportunities {
            tracing::info!(
                sport = %self.key,
                event = %opp.matchup(),
                kind = ?opp.kind,
                margin = format!("{:.4}", opp.profit_margin),
                stake = opp.total_stake,
                expires = %opp.expires_at,
                "arbitrage detected"
            );
        }

        Ok(SportTick {
            events: updates.len(),
            quotes_upserted,
            opportunities,
        })
    }
}

pub struct SportTick {
    pub events: usize,
    pub quotes_upserted: usize,
    pub opportunities: Vec<ArbitrageOpportunity>,
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub sports_polled: usize,
    pub sports_failed: Vec<String>,
    pub events: usize,
    pub quotes_upserted: usize,
    pub opportunities: usize,
    pub expired_dropped: usize,
    pub quota: Option<ApiQuota>,
}

/// One scan over every enabled sport.
pub struct Scanner {
    pub pipelines: Vec<SportPipeline>,
    pub quotes: QuoteBook,
    store: Box<dyn OpportunityStore>,
    sport_delay: Duration,
    quota_warning_threshold: u64,
}

impl Scanner {
    pub fn new(
        pipelines: Vec<SportPipeline>,
        store: Box<dyn OpportunityStore>,
        sport_delay: Duration,
        quota_warning_threshold: u64,
    ) -> Self {
        Self {
            pipelines,
            quotes: QuoteBook::new(),
            store,
            sport_delay,
            quota_warning_threshold,
        }
    }

    pub fn from_config(config: &Config, store: Box<dyn OpportunityStore>) -> Self {
        let pipelines = config
            .enabled_sports()
            .into_iter()
            .map(|(key, sport)| SportPipeline::from_config(key, sport, &config.detector))
            .collect();
        Self::new(
            pipelines,
            store,
            Duration::from_millis(config.odds_feed.sport_delay_ms.unwrap_or(500)),
            config.odds_feed.quota_warning_threshold.unwrap_or(100),
        )
    }

    pub fn store(&self) -> &dyn OpportunityStore {
        self.store.as_ref()
    }

    /// Poll every enabled sport, then replace the stored board with what was
    /// found. A sport that fails is logged and skipped; its events are simply
    /// absent from this cycle's board.
    pub async fn run_cycle(
        &mut self,
        feed: &mut dyn OddsFeed,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let mut found: Vec<ArbitrageOpportunity> = Vec::new();

        let enabled = self.pipelines.iter().filter(|p| p.enabled).count();
        let mut polled = 0usize;

        for pipeline in self.pipelines.iter_mut().filter(|p| p.enabled) {
            match pipeline.tick(feed, &mut self.quotes, now).await {
                Ok(tick) => {
                    report.sports_polled += 1;
                    report.events += tick.events;
                    report.quotes_upserted += tick.quotes_upserted;
                    found.extend(tick.opportunities);
                }
                Err(e) => {
                    tracing::warn!(
                        sport = %pipeline.key,
                        error = format!("{:#}", e),
                        "odds fetch failed, skipping sport"
                    );
                    report.sports_failed.push(pipeline.key.clone());
                }
            }

            polled += 1;
            // Rate-limit between sports, not after the last one
            if polled < enabled && !self.sport_delay.is_zero() {
                tokio::time::sleep(self.sport_delay).await;
            }
        }

        let before = found.len();
        found.retain(|o| !o.is_expired(now));
        report.expired_dropped = before - found.len();
        if report.expired_dropped > 0 {
            tracing::debug!(dropped = report.expired_dropped, "dropped already-expired opportunities");
        }

        found.sort_by(|a, b| b.profit_margin.total_cmp(&a.profit_margin));
        report.opportunities = found.len();
        self.store.replace_all(found)?;

        let pruned = self.quotes.prune_started(now);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned started events from quote book");
        }

        report.quota = feed.last_quota();
        if let Some(quota) = &report.quota {
            if quota.requests_remaining < self.quota_warning_threshold {
                tracing::warn!(
                    used = quota.requests_used,
                    remaining = quota.requests_remaining,
                    "odds API quota running low"
                );
            }
        }

        tracing::info!(
            polled = report.sports_polled,
            failed = report.sports_failed.len(),
            events = report.events,
            opportunities = report.opportunities,
            "scan cycle complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorOverride, MarketPrecedence};
    use crate::engine::detector::Outcome;
    use crate::feed::types::BookmakerOdds;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    struct MockFeed {
        responses: HashMap<String, Vec<OddsUpdate>>,
        calls: Vec<String>,
    }

    #[async_trait]
    impl OddsFeed for MockFeed {
        async fn fetch_odds(&mut self, sport: &str) -> Result<Vec<OddsUpdate>> {
            self.calls.push(sport.to_string());
            self.responses
                .get(sport)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("upstream 503 for {}", sport))
        }

        fn last_quota(&self) -> Option<ApiQuota> {
            Some(ApiQuota { requests_used: 490, requests_remaining: 10 })
        }
    }

    fn bm(name: &str, home: f64, away: f64) -> BookmakerOdds {
        BookmakerOdds {
            name: name.to_string(),
            home_odds: home,
            away_odds: away,
            draw_odds: None,
            last_update: None,
        }
    }

    fn update(id: &str, sport: &str, starts_in: ChronoDuration, books: Vec<BookmakerOdds>) -> OddsUpdate {
        OddsUpdate {
            event_id: id.to_string(),
            sport: sport.to_string(),
            home_team: format!("{id}-home"),
            away_team: format!("{id}-away"),
            commence_time: now() + starts_in,
            bookmakers: books,
        }
    }

    fn pipeline(key: &str, label: &str) -> SportPipeline {
        let sport = SportConfig {
            enabled: true,
            label: label.to_string(),
            detector: None,
        };
        SportPipeline::from_config(key, &sport, &DetectorConfig::default())
    }

    #[test]
    fn test_pipeline_uses_global_defaults() {
        let pipe = pipeline("ice-hockey", "NHL");
        assert_eq!(pipe.detector_config, DetectorConfig::default());
        assert!(pipe.last_poll.is_none());
    }

    #[test]
    fn test_pipeline_with_override() {
        let sport = SportConfig {
            enabled: true,
            label: "UCL".into(),
            detector: Some(DetectorOverride {
                default_stake: Some(2000.0),
                precedence: None,
            }),
        };
        let pipe = SportPipeline::from_config("soccer-ucl", &sport, &DetectorConfig::default());
        assert_eq!(pipe.detector_config.default_stake, 2000.0);
        assert_eq!(pipe.detector_config.precedence, MarketPrecedence::TwoWayFirst); // inherited
    }

    #[tokio::test]
    async fn test_cycle_skips_failed_sport_and_replaces_board() {
        let mut responses = HashMap::new();
        responses.insert(
            "basketball".to_string(),
            vec![
                update("arb", "basketball", ChronoDuration::hours(10), vec![bm("A", 2.10, 1.70), bm("B", 1.75, 2.05)]),
                update("flat", "basketball", ChronoDuration::hours(10), vec![bm("A", 1.8, 1.9)]),
                // Starts in 90 minutes: expiry falls before now
                update("late", "basketball", ChronoDuration::minutes(90), vec![bm("A", 2.10, 1.70), bm("B", 1.75, 2.05)]),
            ],
        );
        let mut feed = MockFeed { responses, calls: Vec::new() };

        let mut scanner = Scanner::new(
            vec![pipeline("basketball", "NBA"), pipeline("ice-hockey", "NHL")],
            Box::new(MemoryStore::new()),
            Duration::ZERO,
            100,
        );

        let report = scanner.run_cycle(&mut feed, now()).await.unwrap();
        assert_eq!(feed.calls, vec!["basketball", "ice-hockey"]);
        assert_eq!(report.sports_polled, 1);
        assert_eq!(report.sports_failed, vec!["ice-hockey".to_string()]);
        assert_eq!(report.events, 3);
        assert_eq!(report.quotes_upserted, 5);
        assert_eq!(report.expired_dropped, 1);
        assert_eq!(report.opportunities, 1);
        assert_eq!(report.quota.unwrap().requests_remaining, 10);

        let board = scanner.store().list().unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].event_id, "arb");
        assert_eq!(board[0].sport_label, "NBA");
        assert_eq!(scanner.quotes.event_count(), 3);
        assert!(scanner.pipelines[1].last_error.is_some());

        // Second cycle where the sport returns nothing: board is emptied
        feed.responses.insert("basketball".to_string(), vec![]);
        let report = scanner.run_cycle(&mut feed, now()).await.unwrap();
        assert_eq!(report.opportunities, 0);
        assert!(scanner.store().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detection_combines_stored_quotes() {
        // Each poll only carries one bookmaker; together they form an arbitrage
        let mut responses = HashMap::new();
        responses.insert(
            "basketball".to_string(),
            vec![update("evt", "basketball", ChronoDuration::hours(10), vec![bm("A", 2.10, 1.70)])],
        );
        let mut feed = MockFeed { responses, calls: Vec::new() };
        let mut scanner = Scanner::new(vec![pipeline("basketball", "NBA")], Box::new(MemoryStore::new()), Duration::ZERO, 100);

        let report = scanner.run_cycle(&mut feed, now()).await.unwrap();
        assert_eq!(report.opportunities, 0);

        feed.responses.insert(
            "basketball".to_string(),
            vec![update("evt", "basketball", ChronoDuration::hours(10), vec![bm("B", 1.75, 2.05)])],
        );
        let report = scanner.run_cycle(&mut feed, now()).await.unwrap();
        assert_eq!(report.opportunities, 1);

        let board = scanner.store().list().unwrap();
        assert_eq!(board[0].leg(Outcome::Home).unwrap().bookmaker, "A");
        assert_eq!(board[0].leg(Outcome::Away).unwrap().bookmaker, "B");
    }

    #[tokio::test]
    async fn test_disabled_sport_not_polled() {
        let mut feed = MockFeed { responses: HashMap::new(), calls: Vec::new() };
        let mut disabled = pipeline("mma", "UFC");
        disabled.enabled = false;
        let mut scanner = Scanner::new(vec![disabled], Box::new(MemoryStore::new()), Duration::ZERO, 100);

        let report = scanner.run_cycle(&mut feed, now()).await.unwrap();
        assert!(feed.calls.is_empty());
        assert_eq!(report.sports_polled, 0);
        assert!(report.sports_failed.is_empty());
    }
}
