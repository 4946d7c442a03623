//! Schema catalog backed by a libSQL database.
//!
//! Records are stored as JSON documents addressed by
//! `(database, collection, id)`, mirroring how the hosted document database
//! lays them out. The pipeline only ever reads from the catalog; writes exist
//! for seeding and administration.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use contentflow_shared::{ContentFlowError, Result};
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};

use crate::migrations;

// ---------------------------------------------------------------------------
// SchemaRecord
// ---------------------------------------------------------------------------

/// Catalog entry describing where a schema definition lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaRecord {
    /// Schema identifier; doubles as the analyzer id.
    pub id: String,
    /// Name of the schema definition inside the artifact.
    pub class_name: String,
    #[serde(default)]
    pub description: String,
    /// Artifact file name under `Schemas/{id}/`.
    pub file_name: String,
    #[serde(default)]
    pub content_type: String,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Read access to schema records.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Look up a schema record. `Ok(None)` when no such record exists.
    async fn get_schema(
        &self,
        database: &str,
        collection: &str,
        schema_id: &str,
    ) -> Result<Option<SchemaRecord>>;
}

// ---------------------------------------------------------------------------
// libSQL implementation
// ---------------------------------------------------------------------------

/// Catalog handle wrapping a libSQL database.
pub struct Catalog {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Catalog {
    /// Open or create a catalog at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ContentFlowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;

        let catalog = Self {
            db,
            conn,
            readonly: false,
        };
        catalog.run_migrations().await?;
        Ok(catalog)
    }

    /// Open a catalog at `path` in read-only mode (what pipeline hosts use).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
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
                        ContentFlowError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
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

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ContentFlowError::Storage(
                "catalog is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Insert or replace a schema record.
    pub async fn put_schema(
        &self,
        database: &str,
        collection: &str,
        record: &SchemaRecord,
    ) -> Result<()> {
        self.check_writable()?;
        let body = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO catalog_documents (database, collection, id, body_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(database, collection, id) DO UPDATE SET
                   body_json = excluded.body_json,
                   updated_at = excluded.updated_at",
                params![database, collection, record.id.as_str(), body, now],
            )
            .await
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List all schema records in a collection, ordered by id.
    pub async fn list_schemas(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<SchemaRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body_json FROM catalog_documents
                 WHERE database = ?1 AND collection = ?2 ORDER BY id",
                params![database, collection],
            )
            .await
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let body: String = row
                .get(0)
                .map_err(|e| ContentFlowError::Storage(e.to_string()))?;
            results.push(serde_json::from_str(&body)?);
        }
        Ok(results)
    }

    /// Delete a schema record. Returns `true` if a record was removed.
    pub async fn delete_schema(
        &self,
        database: &str,
        collection: &str,
        schema_id: &str,
    ) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "DELETE FROM catalog_documents WHERE database = ?1 AND collection = ?2 AND id = ?3",
                params![database, collection, schema_id],
            )
            .await
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl SchemaCatalog for Catalog {
    async fn get_schema(
        &self,
        database: &str,
        collection: &str,
        schema_id: &str,
    ) -> Result<Option<SchemaRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body_json FROM catalog_documents
                 WHERE database = ?1 AND collection = ?2 AND id = ?3",
                params![database, collection, schema_id],
            )
            .await
            .map_err(|e| ContentFlowError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| ContentFlowError::Storage(e.to_string()))?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ContentFlowError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_catalog() -> Catalog {
        let tmp = std::env::temp_dir().join(format!("cf_test_{}.db", Uuid::now_v7()));
        Catalog::open(&tmp).await.expect("open test db")
    }

    fn invoice_record() -> SchemaRecord {
        SchemaRecord {
            id: "inv-2025".into(),
            class_name: "CommercialInvoice".into(),
            description: "Commercial invoice".into(),
            file_name: "commercial_invoice.json".into(),
            content_type: "application/json".into(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let catalog = test_catalog().await;
        assert_eq!(catalog.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn schema_lookup_hit_and_miss() {
        let catalog = test_catalog().await;
        catalog
            .put_schema("ContentProcess", "Schemas", &invoice_record())
            .await
            .expect("put schema");

        let found = catalog
            .get_schema("ContentProcess", "Schemas", "inv-2025")
            .await
            .expect("get schema");
        assert_eq!(found, Some(invoice_record()));

        let other_collection = catalog
            .get_schema("ContentProcess", "Processes", "inv-2025")
            .await
            .expect("get schema");
        assert!(other_collection.is_none());

        let missing = catalog
            .get_schema("ContentProcess", "Schemas", "nope")
            .await
            .expect("get schema");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing_record() {
        let catalog = test_catalog().await;
        catalog
            .put_schema("db", "Schemas", &invoice_record())
            .await
            .unwrap();

        let updated = SchemaRecord {
            file_name: "invoice_v2.json".into(),
            ..invoice_record()
        };
        catalog.put_schema("db", "Schemas", &updated).await.unwrap();

        let all = catalog.list_schemas("db", "Schemas").await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_name, "invoice_v2.json");

        assert!(catalog.delete_schema("db", "Schemas", "inv-2025").await.unwrap());
        assert!(!catalog.delete_schema("db", "Schemas", "inv-2025").await.unwrap());
    }

    #[test]
    fn record_uses_document_field_names() {
        let json = serde_json::to_value(invoice_record()).expect("serialize");
        assert_eq!(json["ClassName"], "CommercialInvoice");
        assert_eq!(json["FileName"], "commercial_invoice.json");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("cf_test_{}.db", Uuid::now_v7()));
        let rw = Catalog::open(&tmp).await.unwrap();
        rw.put_schema("db", "Schemas", &invoice_record()).await.unwrap();
        drop(rw);

        let ro = Catalog::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_schema("db", "Schemas", "inv-2025").await.unwrap().is_some());
        let result = ro.put_schema("db", "Schemas", &invoice_record()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
