//! Aggregator - daily, weekly and monthly rollups over the fact table
//!
//! Rollups are computed per entity level (site, area, region) and per
//! granularity. Each rollup record sums the three counters of every row
//! that falls into its (entity, period) group. Site and area records also
//! carry the area/region label of the first row of the group in input order.
//!
//! Rows whose date cannot be parsed are left out of every period rollup,
//! the rankings and the date span, and counted in
//! [`SummaryStats::excluded_rows`]. They still count towards the dataset
//! totals, the distinct site/area/region counts and the hierarchy.
//!
//! Groups are kept in ordered maps, so the same rows always produce the
//! same rollups in the same order.

mod period;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::facts::{FactRow, Metrics};

pub use period::{Granularity, Period};

/// Default length of the site and area rankings
pub const DEFAULT_TOP_N: usize = 10;

/// Level of the location hierarchy a rollup is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLevel {
    Site,
    Area,
    Region,
}

impl EntityLevel {
    pub fn all() -> &'static [EntityLevel] {
        &[Self::Site, Self::Area, Self::Region]
    }
}

/// Summed counters for one entity over one period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollupRecord {
    pub entity: String,
    pub period: Period,
    pub metrics: Metrics,
    /// First-seen area (site level only)
    pub area: Option<String>,
    /// First-seen region (site and area level)
    pub region: Option<String>,
}

/// Dataset-wide totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryStats {
    pub totals: Metrics,
    pub site_count: usize,
    pub area_count: usize,
    pub region_count: usize,
    /// Earliest and latest parsed dates
    pub date_span: Option<(NaiveDate, NaiveDate)>,
    pub rows_aggregated: usize,
    pub excluded_rows: usize,
}

/// Where a site sits in the hierarchy (first-seen labels)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteLocation {
    pub site: String,
    pub area: String,
    pub region: String,
}

/// One entry of a ranking by total-in count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntity {
    pub name: String,
    pub total_in: u64,
    pub area: Option<String>,
    pub region: Option<String>,
}

/// All precomputed rollups, rankings and summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollups {
    tables: BTreeMap<(EntityLevel, Granularity), Vec<RollupRecord>>,
    pub summary: SummaryStats,
    /// Region to its distinct areas, both sorted
    pub hierarchy: Vec<(String, Vec<String>)>,
    /// Sorted by site name
    pub site_locations: Vec<SiteLocation>,
    pub top_sites: Vec<RankedEntity>,
    pub top_areas: Vec<RankedEntity>,
    /// Every region, highest total first
    pub region_ranking: Vec<RankedEntity>,
}

impl Rollups {
    /// Records of one level and granularity, sorted by entity then period
    pub fn records(&self, level: EntityLevel, granularity: Granularity) -> &[RollupRecord] {
        self.tables
            .get(&(level, granularity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look up a single rollup record
    pub fn get(
        &self,
        level: EntityLevel,
        granularity: Granularity,
        entity: &str,
        period: Period,
    ) -> Option<&RollupRecord> {
        let records = self.records(level, granularity);
        records
            .binary_search_by(|r| (r.entity.as_str(), r.period).cmp(&(entity, period)))
            .ok()
            .map(|idx| &records[idx])
    }

    /// Location of a site
    pub fn site_location(&self, site: &str) -> Option<&SiteLocation> {
        self.site_locations
            .binary_search_by(|loc| loc.site.as_str().cmp(site))
            .ok()
            .map(|idx| &self.site_locations[idx])
    }
}

#[derive(Debug, Default)]
struct Group {
    metrics: Metrics,
    area: Option<String>,
    region: Option<String>,
}

/// Computes [`Rollups`] from fact rows
#[derive(Debug, Clone)]
pub struct Aggregator {
    top_n: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the length of the site and area rankings
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Aggregate rows into rollups
    pub fn aggregate(&self, rows: &[FactRow]) -> Rollups {
        let mut groups: BTreeMap<(EntityLevel, Granularity), BTreeMap<(String, Period), Group>> =
            BTreeMap::new();
        let mut summary = SummaryStats::default();
        let mut sites: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
        let mut area_regions: HashMap<&str, &str> = HashMap::new();
        let mut hierarchy: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for row in rows {
            summary.totals += row.metrics;
            sites
                .entry(row.site_name.as_str())
                .or_insert((row.area.as_str(), row.region.as_str()));
            area_regions
                .entry(row.area.as_str())
                .or_insert(row.region.as_str());
            hierarchy
                .entry(row.region.as_str())
                .or_default()
                .insert(row.area.as_str());

            let Some(date) = row.parsed_date() else {
                debug!(date = %row.date, site = %row.site_name, "Excluding row with unparseable date from period rollups");
                summary.excluded_rows += 1;
                continue;
            };

            summary.rows_aggregated += 1;
            summary.date_span = Some(match summary.date_span {
                Some((first, last)) => (first.min(date), last.max(date)),
                None => (date, date),
            });

            for &granularity in Granularity::all() {
                let period = Period::containing(date, granularity);
                for &level in EntityLevel::all() {
                    let (entity, area, region) = match level {
                        EntityLevel::Site => (
                            &row.site_name,
                            Some(&row.area),
                            Some(&row.region),
                        ),
                        EntityLevel::Area => (&row.area, None, Some(&row.region)),
                        EntityLevel::Region => (&row.region, None, None),
                    };

                    let group = groups
                        .entry((level, granularity))
                        .or_default()
                        .entry((entity.clone(), period))
                        .or_insert_with(|| Group {
                            metrics: Metrics::default(),
                            area: area.cloned(),
                            region: region.cloned(),
                        });
                    group.metrics += row.metrics;
                }
            }
        }

        summary.site_count = sites.len();
        summary.area_count = area_regions.len();
        summary.region_count = hierarchy.len();

        let tables: BTreeMap<_, Vec<RollupRecord>> = groups
            .into_iter()
            .map(|(table_key, table)| {
                let records = table
                    .into_iter()
                    .map(|((entity, period), group)| RollupRecord {
                        entity,
                        period,
                        metrics: group.metrics,
                        area: group.area,
                        region: group.region,
                    })
                    .collect();
                (table_key, records)
            })
            .collect();

        let site_locations: Vec<SiteLocation> = sites
            .iter()
            .map(|(site, (area, region))| SiteLocation {
                site: site.to_string(),
                area: area.to_string(),
                region: region.to_string(),
            })
            .collect();

        let mut rollups = Rollups {
            tables,
            summary,
            hierarchy: hierarchy
                .into_iter()
                .map(|(region, areas)| {
                    (
                        region.to_string(),
                        areas.into_iter().map(str::to_string).collect(),
                    )
                })
                .collect(),
            site_locations,
            ..Default::default()
        };

        rollups.top_sites = rank(&rollups, EntityLevel::Site, Some(self.top_n), |name| {
            rollups
                .site_location(name)
                .map(|loc| (Some(loc.area.clone()), Some(loc.region.clone())))
                .unwrap_or((None, None))
        });
        rollups.top_areas = rank(&rollups, EntityLevel::Area, Some(self.top_n), |name| {
            (None, area_regions.get(name).map(|r| r.to_string()))
        });
        rollups.region_ranking = rank(&rollups, EntityLevel::Region, None, |_| (None, None));

        info!(
            rows = rollups.summary.rows_aggregated,
            excluded = rollups.summary.excluded_rows,
            sites = rollups.summary.site_count,
            areas = rollups.summary.area_count,
            regions = rollups.summary.region_count,
            "Rollups computed"
        );

        rollups
    }
}

/// Rank entities of one level by their total-in count over all periods.
///
/// Ties are broken by name so rankings are stable.
fn rank(
    rollups: &Rollups,
    level: EntityLevel,
    limit: Option<usize>,
    labels: impl Fn(&str) -> (Option<String>, Option<String>),
) -> Vec<RankedEntity> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for record in rollups.records(level, Granularity::Monthly) {
        *totals.entry(record.entity.as_str()).or_insert(0) += record.metrics.total_in;
    }

    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(name, total_in)| {
            let (area, region) = labels(name);
            RankedEntity {
                name: name.to_string(),
                total_in,
                area,
                region,
            }
        })
        .collect()
}

/// Aggregate with the default ranking length
pub fn aggregate(rows: &[FactRow]) -> Rollups {
    Aggregator::new().aggregate(rows)
}
