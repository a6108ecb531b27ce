//! Quote and opportunity storage.
//!
//! Quotes are upserted per (event, bookmaker). Opportunities are never edited
//! in place: every scan replaces the whole board.

use crate::engine::detector::ArbitrageOpportunity;
use crate::feed::types::{BookmakerOdds, OddsUpdate};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
struct EventInfo {
    sport: String,
    home_team: String,
    away_team: String,
    commence_time: DateTime<Utc>,
}

/// Latest quote per (event, bookmaker).
#[derive(Debug, Default)]
pub struct QuoteBook {
    events: HashMap<String, EventInfo>,
    // event_id -> quotes, one per bookmaker, in the order bookmakers first appeared
    quotes: HashMap<String, Vec<BookmakerOdds>>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite every bookmaker quote of `update`. Returns the number
    /// of quotes written.
    pub fn upsert(&mut self, update: &OddsUpdate) -> usize {
        self.events.insert(
            update.event_id.clone(),
            EventInfo {
                sport: update.sport.clone(),
                home_team: update.home_team.clone(),
                away_team: update.away_team.clone(),
                commence_time: update.commence_time,
            },
        );
        let stored = self.quotes.entry(update.event_id.clone()).or_default();
        for bm in &update.bookmakers {
            match stored.iter_mut().find(|q| q.name == bm.name) {
                Some(existing) => *existing = bm.clone(),
                None => stored.push(bm.clone()),
            }
        }
        update.bookmakers.len()
    }

    /// Reassemble an event with every stored quote.
    pub fn event(&self, event_id: &str) -> Option<OddsUpdate> {
        let info = self.events.get(event_id)?;
        Some(OddsUpdate {
            event_id: event_id.to_string(),
            sport: info.sport.clone(),
            home_team: info.home_team.clone(),
            away_team: info.away_team.clone(),
            commence_time: info.commence_time,
            bookmakers: self.quotes.get(event_id).cloned().unwrap_or_default(),
        })
    }

    /// Drop events that have started. Returns how many were removed.
    pub fn prune_started(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.events.len();
        self.events.retain(|_, e| e.commence_time > now);
        let events = &self.events;
        self.quotes.retain(|id, _| events.contains_key(id));
        before - self.events.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.values().map(Vec::len).sum()
    }
}

pub trait OpportunityStore: Send + Sync {
    /// Delete every stored opportunity and insert `opportunities`.
    fn replace_all(&self, opportunities: Vec<ArbitrageOpportunity>) -> Result<()>;
    fn list(&self) -> Result<Vec<ArbitrageOpportunity>>;
}

/// Unexpired opportunities, best margin first.
pub fn active_opportunities(
    store: &dyn OpportunityStore,
    now: DateTime<Utc>,
) -> Result<Vec<ArbitrageOpportunity>> {
    let mut opps: Vec<ArbitrageOpportunity> = store
        .list()?
        .into_iter()
        .filter(|o| !o.is_expired(now))
        .collect();
    opps.sort_by(|a, b| b.profit_margin.total_cmp(&a.profit_margin));
    Ok(opps)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    opportunities: Mutex<Vec<ArbitrageOpportunity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpportunityStore for MemoryStore {
    fn replace_all(&self, opportunities: Vec<ArbitrageOpportunity>) -> Result<()> {
        let mut guard = self
            .opportunities
            .lock()
            .map_err(|_| anyhow::anyhow!("opportunity store lock poisoned"))?;
        *guard = opportunities;
        Ok(())
    }

    fn list(&self) -> Result<Vec<ArbitrageOpportunity>> {
        let guard = self
            .opportunities
            .lock()
            .map_err(|_| anyhow::anyhow!("opportunity store lock poisoned"))?;
        Ok(guard.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub opportunities: Vec<ArbitrageOpportunity>,
}

/// Opportunity board persisted as a JSON snapshot so other processes (the
/// `list` command) can read the last scan.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_snapshot(&self) -> Result<Option<Snapshot>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read snapshot {}", self.path.display())
                })
            }
        };
        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).context("failed to encode snapshot")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        // Write to a temp file then rename, so readers never see half a file.
        let temp_path = self.path.with_extension("tmp");
        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e).with_context(|| format!("failed to write {}", self.path.display()));
        }
        Ok(())
    }
}

impl OpportunityStore for JsonFileStore {
    fn replace_all(&self, opportunities: Vec<ArbitrageOpportunity>) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            opportunities,
        };
        self.write_snapshot(&snapshot)?;
        tracing::debug!(
            path = %self.path.display(),
            count = snapshot.opportunities.len(),
            "snapshot written"
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<ArbitrageOpportunity>> {
        Ok(self
            .read_snapshot()?
            .map(|s| s.opportunities)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::engine::detector::detect;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
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

    fn update(event_id: &str, starts_in: Duration, bookmakers: Vec<BookmakerOdds>) -> OddsUpdate {
        OddsUpdate {
            event_id: event_id.to_string(),
            sport: "ice-hockey".to_string(),
            home_team: "Toronto Maple Leafs".to_string(),
            away_team: "Montreal Canadiens".to_string(),
            commence_time: now() + starts_in,
            bookmakers,
        }
    }

    fn opportunity(event_id: &str) -> ArbitrageOpportunity {
        let u = update(
            event_id,
            Duration::hours(12),
            vec![bm("A", 2.10, 1.70), bm("B", 1.75, 2.05)],
        );
        detect(&u, "NHL", &DetectorConfig::default(), now()).unwrap()
    }

    #[test]
    fn test_quote_book_upserts_per_bookmaker() {
        let mut book = QuoteBook::new();
        book.upsert(&update("e1", Duration::hours(3), vec![bm("A", 2.0, 1.8), bm("B", 1.9, 1.9)]));
        book.upsert(&update("e1", Duration::hours(3), vec![bm("A", 2.2, 1.7)]));
        assert_eq!(book.event_count(), 1);
        assert_eq!(book.quote_count(), 2);

        let event = book.event("e1").unwrap();
        assert_eq!(event.bookmakers.len(), 2);
        assert_eq!(event.bookmakers[0].name, "A");
        assert_eq!(event.bookmakers[0].home_odds, 2.2); // overwritten
        assert_eq!(event.bookmakers[1].home_odds, 1.9); // kept
        assert!(book.event("missing").is_none());
    }

    #[test]
    fn test_quote_book_keeps_first_seen_order() {
        let mut book = QuoteBook::new();
        book.upsert(&update("e1", Duration::hours(3), vec![bm("Zeta", 2.0, 1.8)]));
        book.upsert(&update("e1", Duration::hours(3), vec![bm("Alpha", 2.0, 1.8), bm("Zeta", 2.1, 1.8)]));
        let names: Vec<String> = book.event("e1").unwrap().bookmakers.into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn test_quote_book_prunes_started_events() {
        let mut book = QuoteBook::new();
        book.upsert(&update("past", Duration::hours(-1), vec![bm("A", 2.0, 1.8)]));
        book.upsert(&update("future", Duration::hours(1), vec![bm("A", 2.0, 1.8)]));
        assert_eq!(book.prune_started(now()), 1);
        assert_eq!(book.event_count(), 1);
        assert_eq!(book.quote_count(), 1);
        assert!(book.event("future").is_some());
    }

    #[test]
    fn test_memory_store_replaces_everything() {
        let store = MemoryStore::new();
        store.replace_all(vec![opportunity("e1"), opportunity("e2")]).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);

        store.replace_all(vec![opportunity("e3")]).unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, "e3");
    }

    #[test]
    fn test_active_filters_expired() {
        let store = MemoryStore::new();
        store.replace_all(vec![opportunity("e1")]).unwrap();
        assert_eq!(active_opportunities(&store, now()).unwrap().len(), 1);
        let later = now() + Duration::minutes(31);
        assert!(active_opportunities(&store, later).unwrap().is_empty());
    }

    #[test]
    fn test_json_store_round_trips_board() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/opps.json"));
        assert!(store.list().unwrap().is_empty());

        let opp = opportunity("e1");
        store.replace_all(vec![opp.clone()]).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, opp.event_id);
        assert_eq!(listed[0].legs[0].stake, opp.legs[0].stake);
        assert_eq!(listed[0].expires_at, opp.expires_at);
        assert!((listed[0].profit_margin - opp.profit_margin).abs() < 1e-12);
        let snapshot = store.read_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert!(!dir.path().join("nested/opps.tmp").exists());

        store.replace_all(vec![]).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_exposes_derived_fields() {
        let json = serde_json::to_value(opportunity("e1")).unwrap();
        assert_eq!(json["kind"], "two-way");
        assert_eq!(json["legs"][0]["outcome"], "home");
        assert!(json["expected_profit"].as_f64().unwrap() > 0.0);
        assert!(json["min_deposit"].as_f64().unwrap() > 0.0);
    }
}
