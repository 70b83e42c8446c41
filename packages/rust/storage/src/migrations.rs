//! SQL migration definitions for the radar database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: companies, alerts, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per company identity; replaced in place on change
CREATE TABLE IF NOT EXISTS companies (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    website             TEXT NOT NULL,
    address             TEXT NOT NULL DEFAULT '',
    industry            TEXT,
    region              TEXT,
    tier                TEXT NOT NULL,
    classification_json TEXT NOT NULL,
    geo_json            TEXT,
    fingerprint         TEXT NOT NULL,
    first_seen          TEXT NOT NULL,
    last_updated        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_companies_tier ON companies(tier);

-- Alert ledger; at most one row per (company, fingerprint)
CREATE TABLE IF NOT EXISTS alerts (
    id            TEXT PRIMARY KEY,
    company_id    TEXT NOT NULL REFERENCES companies(id),
    fingerprint   TEXT NOT NULL,
    kind          TEXT NOT NULL,
    subject       TEXT NOT NULL,
    body          TEXT NOT NULL,
    status        TEXT NOT NULL CHECK (status IN ('pending', 'sent', 'failed')),
    attempts      INTEGER NOT NULL DEFAULT 0,
    last_error    TEXT,
    created_at    TEXT NOT NULL,
    dispatched_at TEXT,
    UNIQUE(company_id, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_alerts_company ON alerts(company_id);

-- Pipeline run journal
CREATE TABLE IF NOT EXISTS runs (
    id           TEXT PRIMARY KEY,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    summary_json TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
