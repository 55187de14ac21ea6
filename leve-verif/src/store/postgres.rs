//! Magasin PostgreSQL/PostGIS

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use geo::Geometry;
use tracing::{debug, warn};

use leve::Parcel;

use super::RecordStore;
use crate::conflicts::Verification;
use crate::db::geometry_to_ewkb;
use crate::db::transaction::VerificationReplace;
use crate::pipeline::Upload;

/// Magasin adossé à un schéma PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    schema: String,
    srid: u32,
}

impl PgStore {
    pub fn new(pool: Pool, schema: impl Into<String>, srid: u32) -> Result<Self> {
        let schema = schema.into();
        let valid = !schema.is_empty()
            && schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            anyhow::bail!("Invalid schema name: {}", schema);
        }
        Ok(Self { pool, schema, srid })
    }

    /// Crée le schéma et les tables si nécessaire
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await.context("Failed to get connection from pool")?;

        client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema), &[])
            .await
            .context("Failed to create schema")?;

        // Peut nécessiter des droits superuser: on vérifie alors que l'extension existe
        if let Err(e) = client.execute("CREATE EXTENSION IF NOT EXISTS postgis", &[]).await {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .context("Failed to check pg_extension")?
                .is_some();
            if !exists {
                anyhow::bail!("PostGIS extension is not installed and could not be created: {e}");
            }
        }

        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.uploads (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                checksum TEXT,
                status TEXT NOT NULL,
                error TEXT,
                log JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {schema}.parcels (
                upload_id TEXT PRIMARY KEY REFERENCES {schema}.uploads (id) ON DELETE CASCADE,
                area DOUBLE PRECISION NOT NULL,
                perimeter DOUBLE PRECISION NOT NULL,
                is_simple BOOLEAN NOT NULL,
                status TEXT NOT NULL,
                points JSONB NOT NULL,
                geom geometry(Polygon, {srid})
            );
            CREATE TABLE IF NOT EXISTS {schema}.verifications (
                upload_id TEXT PRIMARY KEY REFERENCES {schema}.uploads (id) ON DELETE CASCADE,
                conflict_count INTEGER NOT NULL,
                has_conflicts BOOLEAN NOT NULL,
                flags JSONB NOT NULL,
                summary JSONB NOT NULL,
                recommendations JSONB NOT NULL,
                processing_time DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS {schema}.conflicts (
                id BIGSERIAL PRIMARY KEY,
                upload_id TEXT NOT NULL REFERENCES {schema}.verifications (upload_id) ON DELETE CASCADE,
                conflict_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                layer TEXT NOT NULL,
                object_id TEXT,
                intersection_area DOUBLE PRECISION,
                overlap_percentage DOUBLE PRECISION,
                properties JSONB,
                description TEXT NOT NULL,
                recommendation TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{schema}_conflicts_upload ON {schema}.conflicts (upload_id);
            CREATE INDEX IF NOT EXISTS idx_{schema}_parcels_geom ON {schema}.parcels USING GIST (geom);
            "#,
            schema = self.schema,
            srid = self.srid
        );
        client
            .batch_execute(&sql)
            .await
            .context("Failed to create tables")?;

        debug!(schema = %self.schema, "Schema ready");
        Ok(())
    }

    async fn write_verification(
        &self,
        replace: &mut VerificationReplace<'_>,
        verification: &Verification,
    ) -> Result<()> {
        let upload_id = replace.upload_id().to_string();
        let tx = replace.transaction();

        tx.execute(
            &format!("DELETE FROM {}.conflicts WHERE upload_id = $1", self.schema),
            &[&upload_id],
        )
        .await
        .context("Failed to delete previous conflicts")?;
        tx.execute(
            &format!("DELETE FROM {}.verifications WHERE upload_id = $1", self.schema),
            &[&upload_id],
        )
        .await
        .context("Failed to delete previous verification")?;

        let flags = serde_json::to_string(&verification.flags)?;
        let summary = serde_json::to_string(&serde_json::json!({
            "byType": verification.by_type,
            "bySeverity": verification.by_severity,
            "criticalIssues": verification.critical_issues,
            "issues": verification.issues,
            "layersChecked": verification.layers_checked,
            "layersSkipped": verification.layers_skipped,
        }))?;
        let recommendations = serde_json::to_string(&verification.recommendations)?;
        let conflict_count = verification.conflict_count as i32;

        tx.execute(
            &format!(
                r#"
                INSERT INTO {}.verifications
                    (upload_id, conflict_count, has_conflicts, flags, summary, recommendations, processing_time)
                VALUES ($1, $2, $3, $4::text::jsonb, $5::text::jsonb, $6::text::jsonb, $7)
                "#,
                self.schema
            ),
            &[
                &upload_id,
                &conflict_count,
                &verification.has_conflicts,
                &flags,
                &summary,
                &recommendations,
                &verification.processing_time_seconds,
            ],
        )
        .await
        .context("Failed to insert verification")?;

        let insert = format!(
            r#"
            INSERT INTO {}.conflicts
                (upload_id, conflict_type, severity, layer, object_id, intersection_area,
                 overlap_percentage, properties, description, recommendation)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::text::jsonb, $9, $10)
            "#,
            self.schema
        );
        let statement = tx.prepare(&insert).await.context("Failed to prepare conflict insert")?;

        for conflict in &verification.conflicts {
            let overlap = conflict.overlap.as_ref();
            let properties = overlap
                .map(|o| serde_json::to_string(&o.properties))
                .transpose()?;
            replace
                .transaction()
                .execute(
                    &statement,
                    &[
                        &upload_id,
                        &conflict.conflict_type.as_str(),
                        &conflict.severity.as_str(),
                        &conflict.layer,
                        &overlap.map(|o| o.object_id.as_str()),
                        &overlap.map(|o| o.intersection_area),
                        &overlap.map(|o| o.overlap_percentage),
                        &properties,
                        &conflict.description,
                        &conflict.recommendation,
                    ],
                )
                .await
                .context("Failed to insert conflict")?;
            replace.record_conflict();
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn save_upload(&self, upload: &Upload) -> Result<()> {
        let client = self.pool.get().await.context("Failed to get connection from pool")?;
        let log = serde_json::to_string(&upload.log)?;
        let created_at = upload.created_at.to_rfc3339();
        let updated_at = upload.updated_at.to_rfc3339();

        client
            .execute(
                &format!(
                    r#"
                    INSERT INTO {}.uploads (id, document, checksum, status, error, log, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6::text::jsonb, $7::text::timestamptz, $8::text::timestamptz)
                    ON CONFLICT (id) DO UPDATE SET
                        checksum = EXCLUDED.checksum,
                        status = EXCLUDED.status,
                        error = EXCLUDED.error,
                        log = EXCLUDED.log,
                        updated_at = EXCLUDED.updated_at
                    "#,
                    self.schema
                ),
                &[
                    &upload.id,
                    &upload.document,
                    &upload.checksum,
                    &upload.status.as_str(),
                    &upload.error,
                    &log,
                    &created_at,
                    &updated_at,
                ],
            )
            .await
            .with_context(|| format!("Failed to save upload {}", upload.id))?;

        debug!(upload_id = %upload.id, status = %upload.status, "Upload saved");
        Ok(())
    }

    async fn save_parcel(&self, upload_id: &str, parcel: &Parcel) -> Result<()> {
        let client = self.pool.get().await.context("Failed to get connection from pool")?;
        let points = serde_json::to_string(&parcel.points)?;
        let geom = geometry_to_ewkb(&Geometry::Polygon(parcel.polygon()), self.srid)?;

        client
            .execute(
                &format!(
                    r#"
                    INSERT INTO {}.parcels (upload_id, area, perimeter, is_simple, status, points, geom)
                    VALUES ($1, $2, $3, $4, $5, $6::text::jsonb, ST_GeomFromEWKB($7))
                    ON CONFLICT (upload_id) DO UPDATE SET
                        area = EXCLUDED.area,
                        perimeter = EXCLUDED.perimeter,
                        is_simple = EXCLUDED.is_simple,
                        status = EXCLUDED.status,
                        points = EXCLUDED.points,
                        geom = EXCLUDED.geom
                    "#,
                    self.schema
                ),
                &[
                    &upload_id,
                    &parcel.area,
                    &parcel.perimeter,
                    &parcel.is_simple,
                    &parcel.status.as_str(),
                    &points,
                    &geom,
                ],
            )
            .await
            .with_context(|| format!("Failed to save parcel of upload {}", upload_id))?;

        Ok(())
    }

    async fn replace_verification(
        &self,
        upload_id: &str,
        verification: &Verification,
    ) -> Result<()> {
        let mut client = self.pool.get().await.context("Failed to get connection from pool")?;
        let mut replace = VerificationReplace::begin(&mut client, upload_id).await?;

        match self.write_verification(&mut replace, verification).await {
            Ok(()) => {
                replace.commit().await?;
                Ok(())
            }
            Err(e) => {
                replace.rollback(&format!("{:#}", e)).await;
                Err(e)
            }
        }
    }
}
