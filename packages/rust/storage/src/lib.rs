//! libSQL storage layer for company records, the alert ledger and the run
//! journal.
//!
//! The [`Storage`] struct wraps a local libSQL database. Every write that
//! must not race is a single conditional statement, so two writers can never
//! both believe they won:
//! - [`Storage::upsert`] replaces a record only if the stored fingerprint is
//!   still the one it read;
//! - [`Storage::record_alert`] flips an alert to `sent` only if it is not
//!   already `sent`.
//!
//! **Access rules:**
//! - pipeline runs: read-write via [`Storage::open`]
//! - report generation and listing: read-only via [`Storage::open_readonly`]

mod alerts;
mod migrations;
mod runs;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use radar_shared::{
    ClassificationResult, Company, CompanyId, CompanyRecord, Fingerprint, GeoPoint, MaturityTier,
    RadarError, Result, UpsertOutcome,
};
use tokio::sync::OwnedMutexGuard;
use url::Url;

pub use alerts::PendingAlert;
pub use runs::RunRow;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    locks: Mutex<HashMap<CompanyId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Everything the pipeline learned about one company in this run.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub company: Company,
    /// A record is never written without one.
    pub classification: Option<ClassificationResult>,
    pub geo: Option<GeoPoint>,
    pub fingerprint: Fingerprint,
    /// Rewrite even when the fingerprint is unchanged.
    pub force: bool,
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub companies: usize,
    pub by_tier: BTreeMap<MaturityTier, usize>,
    pub geocoded: usize,
    pub alerts_sent: usize,
    pub alerts_pending: usize,
}

struct PriorRow {
    fingerprint: Fingerprint,
    classification: ClassificationResult,
    geo: Option<GeoPoint>,
    address: String,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RadarError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            locks: Mutex::new(HashMap::new()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RadarError::Storage(format!(
                "database not found at {}; run the pipeline first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RadarError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RadarError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Enter the critical section of one identity. Upserts take it
    /// internally; the alert dispatcher holds it across check, send and record.
    pub async fn lock_identity(&self, id: &CompanyId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Company records
    // -----------------------------------------------------------------------

    /// Create or replace the record of `update.company`.
    ///
    /// Returns [`UpsertOutcome::Unchanged`] without writing when the stored
    /// fingerprint matches and `force` is off. A missing geo point keeps the
    /// stored one as long as the address did not change.
    #[tracing::instrument(skip_all, fields(company = %update.company.id))]
    pub async fn upsert(&self, update: RecordUpdate) -> Result<UpsertOutcome> {
        self.check_writable()?;
        let RecordUpdate {
            company,
            classification,
            geo,
            fingerprint,
            force,
        } = update;
        let classification = classification.ok_or_else(|| {
            RadarError::validation(format!(
                "refusing to persist {} without a classification",
                company.id
            ))
        })?;

        let _guard = self.lock_identity(&company.id).await;
        let prior = self.read_prior(&company.id).await?;
        let now = timestamp(Utc::now());
        let classification_json = to_json(&classification)?;

        let Some(prior) = prior else {
            let geo_json = geo.as_ref().map(to_json).transpose()?;
            let inserted = self
                .conn
                .execute(
                    "INSERT INTO companies (id, name, website, address, industry, region, tier,
                         classification_json, geo_json, fingerprint, first_seen, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        company.id.as_str(),
                        company.name.as_str(),
                        company.website.as_str(),
                        company.address.as_str(),
                        company.industry.as_deref(),
                        company.region.as_deref(),
                        classification.tier.as_str(),
                        classification_json.as_str(),
                        geo_json.as_deref(),
                        fingerprint.as_str(),
                        now.as_str()
                    ],
                )
                .await
                .map_err(db_err)?;

            if inserted == 0 {
                return Err(RadarError::PersistConflict {
                    identity: company.id.to_string(),
                });
            }
            tracing::debug!(fingerprint = fingerprint.short(), "record created");
            return Ok(UpsertOutcome::Changed { prior: None });
        };

        if prior.fingerprint == fingerprint && !force {
            return Ok(UpsertOutcome::Unchanged);
        }

        let geo = match geo {
            Some(geo) => Some(geo),
            None if prior.address == company.address => prior.geo,
            None => None,
        };
        let geo_json = geo.as_ref().map(to_json).transpose()?;

        let updated = self
            .conn
            .execute(
                "UPDATE companies SET name = ?2, website = ?3, address = ?4, industry = ?5,
                     region = ?6, tier = ?7, classification_json = ?8, geo_json = ?9,
                     fingerprint = ?10, last_updated = MAX(last_updated, ?11)
                 WHERE id = ?1 AND fingerprint = ?12",
                params![
                    company.id.as_str(),
                    company.name.as_str(),
                    company.website.as_str(),
                    company.address.as_str(),
                    company.industry.as_deref(),
                    company.region.as_deref(),
                    classification.tier.as_str(),
                    classification_json.as_str(),
                    geo_json.as_deref(),
                    fingerprint.as_str(),
                    now.as_str(),
                    prior.fingerprint.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        if updated == 0 {
            return Err(RadarError::PersistConflict {
                identity: company.id.to_string(),
            });
        }

        tracing::debug!(
            from = prior.fingerprint.short(),
            to = fingerprint.short(),
            "record replaced"
        );
        Ok(UpsertOutcome::Changed {
            prior: Some(prior.classification),
        })
    }

    /// Bring the roster fields of an existing record up to date without
    /// touching its classification or fingerprint. When the address
    /// changed, the stored location is replaced by `relocated` (or cleared).
    /// Returns `false` if nothing differed.
    #[tracing::instrument(skip_all, fields(company = %company.id))]
    pub async fn refresh_company(
        &self,
        company: &Company,
        relocated: Option<&GeoPoint>,
    ) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.lock_identity(&company.id).await;
        let geo_json = relocated.map(to_json).transpose()?;
        let now = timestamp(Utc::now());

        // SET expressions see the old row, so the CASE compares old addresses.
        let changed = self
            .conn
            .execute(
                "UPDATE companies SET name = ?2, website = ?3, industry = ?5, region = ?6,
                     geo_json = CASE WHEN address = ?4 THEN geo_json ELSE ?7 END,
                     address = ?4, last_updated = MAX(last_updated, ?8)
                 WHERE id = ?1 AND NOT (name = ?2 AND website = ?3 AND address = ?4
                     AND industry IS ?5 AND region IS ?6)",
                params![
                    company.id.as_str(),
                    company.name.as_str(),
                    company.website.as_str(),
                    company.address.as_str(),
                    company.industry.as_deref(),
                    company.region.as_deref(),
                    geo_json.as_deref(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Set the geo point of a record that has none. Returns `false` if the
    /// record is missing or already located.
    pub async fn fill_geo_point(&self, id: &CompanyId, geo: &GeoPoint) -> Result<bool> {
        self.check_writable()?;
        let geo_json = to_json(geo)?;
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE companies SET geo_json = ?2, last_updated = MAX(last_updated, ?3)
                 WHERE id = ?1 AND geo_json IS NULL",
                params![id.as_str(), geo_json.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Get the record of one company, with its alert history.
    pub async fn get(&self, id: &CompanyId) -> Result<Option<CompanyRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("{RECORD_SELECT} WHERE id = ?1"),
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut record = match rows.next().await.map_err(db_err)? {
            Some(row) => row_to_record(&row)?,
            None => return Ok(None),
        };

        record.alerts = self.sent_alerts(Some(id)).await?.remove(id).unwrap_or_default();
        record.pending_alert = self.pending_alert(id).await?.map(|p| p.kind);
        Ok(Some(record))
    }

    /// List all records ordered by company name.
    pub async fn list(&self) -> Result<Vec<CompanyRecord>> {
        self.list_where(&format!("{RECORD_SELECT} ORDER BY name COLLATE NOCASE, id"))
            .await
    }

    /// List records whose address has not been resolved yet.
    pub async fn list_missing_geo(&self) -> Result<Vec<CompanyRecord>> {
        self.list_where(&format!(
            "{RECORD_SELECT} WHERE geo_json IS NULL ORDER BY name COLLATE NOCASE, id"
        ))
        .await
    }

    async fn list_where(&self, sql: &str) -> Result<Vec<CompanyRecord>> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            records.push(row_to_record(&row)?);
        }
        if records.is_empty() {
            return Ok(records);
        }

        let mut sent = self.sent_alerts(None).await?;
        let pending = self.pending_kinds().await?;
        for record in &mut records {
            record.alerts = sent.remove(&record.company.id).unwrap_or_default();
            record.pending_alert = pending.get(&record.company.id).copied();
        }
        Ok(records)
    }

    /// Counts by tier, geocoding coverage and alert status.
    pub async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        let mut rows = self
            .conn
            .query(
                "SELECT tier, COUNT(*), SUM(geo_json IS NOT NULL) FROM companies GROUP BY tier",
                params![],
            )
            .await
            .map_err(db_err)?;
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let tier: String = row.get(0).map_err(db_err)?;
            let count = row.get::<i64>(1).map_err(db_err)? as usize;
            let geocoded = row.get::<i64>(2).unwrap_or(0) as usize;
            let tier = MaturityTier::from_label(&tier)
                .ok_or_else(|| RadarError::Storage(format!("unknown tier '{tier}' in store")))?;
            stats.companies += count;
            stats.geocoded += geocoded;
            *stats.by_tier.entry(tier).or_default() += count;
        }

        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM alerts GROUP BY status",
                params![],
            )
            .await
            .map_err(db_err)?;
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let status: String = row.get(0).map_err(db_err)?;
            let count = row.get::<i64>(1).map_err(db_err)? as usize;
            if status == "sent" {
                stats.alerts_sent += count;
            } else {
                stats.alerts_pending += count;
            }
        }

        Ok(stats)
    }

    async fn read_prior(&self, id: &CompanyId) -> Result<Option<PriorRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT fingerprint, classification_json, geo_json, address
                 FROM companies WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };

        Ok(Some(PriorRow {
            fingerprint: Fingerprint::from_hex(row.get::<String>(0).map_err(db_err)?),
            classification: from_json(&row.get::<String>(1).map_err(db_err)?)?,
            geo: row
                .get::<String>(2)
                .ok()
                .map(|json| from_json(&json))
                .transpose()?,
            address: row.get::<String>(3).unwrap_or_default(),
        }))
    }
}

const RECORD_SELECT: &str = "SELECT id, name, website, address, industry, region, \
     classification_json, geo_json, fingerprint, first_seen, last_updated FROM companies";

/// Convert a `companies` row to a [`CompanyRecord`] without alert data.
fn row_to_record(row: &libsql::Row) -> Result<CompanyRecord> {
    let website: String = row.get(2).map_err(db_err)?;
    let website = Url::parse(&website)
        .map_err(|e| RadarError::Storage(format!("invalid stored website '{website}': {e}")))?;

    Ok(CompanyRecord {
        company: Company {
            id: CompanyId::new(row.get::<String>(0).map_err(db_err)?)?,
            name: row.get::<String>(1).map_err(db_err)?,
            website,
            address: row.get::<String>(3).unwrap_or_default(),
            industry: row.get::<String>(4).ok(),
            region: row.get::<String>(5).ok(),
        },
        classification: from_json(&row.get::<String>(6).map_err(db_err)?)?,
        geo: row
            .get::<String>(7)
            .ok()
            .map(|json| from_json(&json))
            .transpose()?,
        fingerprint: Fingerprint::from_hex(row.get::<String>(8).map_err(db_err)?),
        first_seen: parse_timestamp(&row.get::<String>(9).map_err(db_err)?)?,
        last_updated: parse_timestamp(&row.get::<String>(10).map_err(db_err)?)?,
        alerts: Vec::new(),
        pending_alert: None,
    })
}

/// Stored timestamps are fixed-width UTC so they compare lexicographically.
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RadarError::Storage(format!("invalid date '{s}': {e}")))
}

pub(crate) fn db_err(e: libsql::Error) -> RadarError {
    RadarError::Storage(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| RadarError::Storage(format!("encode: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| RadarError::Storage(format!("decode: {e}")))
}
