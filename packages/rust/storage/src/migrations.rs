//! SQL migration definitions for the ContentFlow catalog database.
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
        description: "Initial schema: catalog documents keyed by database/collection/id",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- JSON documents grouped the way a document database groups them
CREATE TABLE IF NOT EXISTS catalog_documents (
    database   TEXT NOT NULL,
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    body_json  TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (database, collection, id)
);

CREATE INDEX IF NOT EXISTS idx_catalog_collection ON catalog_documents(database, collection);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
