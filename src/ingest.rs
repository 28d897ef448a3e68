//! The ingestion run: fetch, normalize, reconcile and build.
use std::fmt;
use std::io::Cursor;
use chrono::DateTime;
use chrono::Utc;
use rayon::prelude::*;
use crate::delegations::normalize;
use crate::delegations::AllocationRecord;
use crate::delegations::NormalizeStats;
use crate::delegations::Registry;
use crate::fetch::Fetcher;
use crate::lookup::IndexGeneration;
use crate::reconcile::reconcile;
use crate::reconcile::FamilyStats;
use crate::reconcile::InvariantViolation;


//------------ RegistryReport ------------------------------------------------

/// The outcome for one registry in a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistryReport {
    pub registry: String,
    pub fetched: bool,
    pub error: Option<String>,
    pub stats: NormalizeStats
}


//------------ RunReport -----------------------------------------------------

/// Counters for a complete run, recorded as metadata next to the ranges.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub started: DateTime<Utc>,
    pub registries: Vec<RegistryReport>,
    pub v4: FamilyStats,
    pub v6: FamilyStats
}

impl RunReport {
    pub fn successful(&self) -> Vec<&str> {
        self.registries.iter()
            .filter(|r| r.fetched && r.stats.records > 0)
            .map(|r| r.registry.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.registries.iter()
            .filter(|r| !r.fetched)
            .map(|r| r.registry.as_str())
            .collect()
    }

    pub fn totals(&self) -> NormalizeStats {
        let mut res = NormalizeStats::default();
        for registry in &self.registries {
            res.merge(&registry.stats);
        }
        res
    }

    /// The key value pairs stored in the metadata table.
    pub fn metadata(&self, generation: u64) -> Vec<(String, String)> {
        let totals = self.totals();
        vec![
            ("last_updated".to_string(), self.started.to_rfc3339()),
            ("total_entries".to_string(), totals.records.to_string()),
            ("successful_rirs".to_string(), self.successful().join(",")),
            ("failed_rirs".to_string(), self.failed().join(",")),
            ("malformed_lines".to_string(), totals.malformed.to_string()),
            ("ipv4_ranges".to_string(), self.v4.ranges.to_string()),
            ("ipv6_ranges".to_string(), self.v6.ranges.to_string()),
            ("generation".to_string(), generation.to_string()),
        ]
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for registry in &self.registries {
            match &registry.error {
                None => writeln!(f, "{}: {}", registry.registry, registry.stats)?,
                Some(e) => writeln!(f, "{}: not fetched ({})", registry.registry, e)?
            }
        }
        writeln!(
            f,
            "IPv4: {} claims, {} trimmed, {} subsumed, {} merged, {} ranges",
            self.v4.claims, self.v4.trimmed, self.v4.subsumed, self.v4.merged, self.v4.ranges
        )?;
        write!(
            f,
            "IPv6: {} claims, {} trimmed, {} subsumed, {} merged, {} ranges",
            self.v6.claims, self.v6.trimmed, self.v6.subsumed, self.v6.merged, self.v6.ranges
        )
    }
}


//------------ Ingest --------------------------------------------------------

/// Runs the complete pipeline against a fetcher.
pub struct Ingest;

impl Ingest {
    /// Fetches and normalizes all registries in parallel, then reconciles
    /// their records in registry order and builds a new generation.
    ///
    /// A registry that cannot be fetched contributes no records. The only
    /// failure is a reconciliation result that violates the range invariants;
    /// no generation is produced in that case.
    pub fn run<F: Fetcher>(
        fetcher: &F
    ) -> Result<(IndexGeneration, RunReport), InvariantViolation> {
        let started = Utc::now();

        let per_registry: Vec<(Vec<AllocationRecord>, RegistryReport)> =
            Registry::ALL.par_iter()
                .map(|registry| Self::ingest_registry(fetcher, *registry))
                .collect();

        // The parallel collect keeps the order of Registry::ALL, so the
        // records are concatenated in registry order whatever finished first.
        let mut records = Vec::new();
        let mut registries = Vec::new();
        for (part, report) in per_registry {
            records.extend(part);
            registries.push(report);
        }

        info!("reconciling {} records", records.len());
        let reconciled = reconcile(records);
        let v4 = reconciled.v4_stats;
        let v6 = reconciled.v6_stats;

        let generation = IndexGeneration::build(reconciled).map_err(|e| {
            error!("refusing to build index: {}", e);
            e
        })?;

        let report = RunReport { started, registries, v4, v6 };
        info!(
            "built {} ipv4 and {} ipv6 ranges",
            generation.v4().len(), generation.v6().len()
        );
        Ok((generation, report))
    }

    fn ingest_registry<F: Fetcher>(
        fetcher: &F,
        registry: Registry
    ) -> (Vec<AllocationRecord>, RegistryReport) {
        match fetcher.fetch(registry) {
            Ok(bytes) => {
                let (records, stats) = normalize(registry, Cursor::new(bytes));
                info!("processed {} from {}", stats, registry);
                if stats.malformed > 0 {
                    warn!("{} malformed lines in {} data", stats.malformed, registry);
                }
                let report = RegistryReport {
                    registry: registry.name().to_string(),
                    fetched: true,
                    error: None,
                    stats
                };
                (records, report)
            }
            Err(e) => {
                warn!("no {} data this run: {}", registry, e);
                let report = RegistryReport {
                    registry: registry.name().to_string(),
                    fetched: false,
                    error: Some(e.to_string()),
                    stats: NormalizeStats::default()
                };
                (Vec::new(), report)
            }
        }
    }
}


//------------ Tests --------------------------------------------------------
