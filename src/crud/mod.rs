//! Transactional write path.
//!
//! Every mutating operation wraps its statements in one transaction: the
//! entity row itself, its parent associations, and (for subjects) the one-hop
//! personal-details row commit together or not at all. Association
//! maintenance resolves junction table and column names through the same
//! [`EntityGraph`] the query compiler uses; existing links are left alone,
//! missing ones are inserted, none are deleted.

mod codes;
mod eav;

pub use eav::{AttributeField, EavFieldType};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use deadpool_postgres::{Pool, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::config::PgConfig;
use crate::error::{CrudError, CrudResult};
use crate::graph::{EntityGraph, EntityKind};
use crate::types::metadata::Metadata;

/// A data record to create or update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInput {
    /// Data-type id (`type` column).
    pub data_type: i64,
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: Option<JsonValue>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub acquisition_date: Option<NaiveDate>,
    pub owner: i64,
    #[serde(default)]
    pub parent_subject: Vec<i64>,
    #[serde(default)]
    pub parent_sample: Vec<i64>,
    #[serde(default)]
    pub parent_data: Vec<i64>,
}

/// A sample to create or update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleInput {
    /// Data-type id (`type` column).
    pub data_type: i64,
    pub biobank: i64,
    /// Explicit biobank code; allocated from the type's sequence when absent.
    #[serde(default)]
    pub biobank_code: Option<String>,
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: Option<JsonValue>,
    #[serde(default)]
    pub notes: Option<String>,
    pub owner: i64,
    /// Donor subject ids.
    #[serde(default)]
    pub donor: Vec<i64>,
    #[serde(default)]
    pub parent_sample: Vec<i64>,
}

/// A personal-details row owned by a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalDetailsInput {
    #[serde(default)]
    pub id: Option<i64>,
    pub given_name: String,
    pub surname: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

/// A subject to create or update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    /// Data-type id (`type` column).
    pub data_type: i64,
    /// Explicit subject code; allocated from the type's sequence when absent.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: Option<JsonValue>,
    #[serde(default)]
    pub notes: Option<String>,
    pub owner: i64,
    #[serde(default)]
    pub personal_info: Option<PersonalDetailsInput>,
    #[serde(default)]
    pub parent_subject: Vec<i64>,
}

/// Transactional create/update/delete over subjects, samples and data.
pub struct CrudManager {
    pool: Pool,
    graph: Arc<EntityGraph>,
}

impl CrudManager {
    pub fn new(pool: Pool, graph: Arc<EntityGraph>) -> Self {
        CrudManager { pool, graph }
    }

    /// Connects a manager from configuration, with a fresh entity graph.
    pub fn from_config(config: &PgConfig) -> CrudResult<Self> {
        Ok(Self::new(config.create_pool()?, Arc::new(EntityGraph::new())))
    }

    /// The shared entity graph, for wiring a query builder to the same
    /// junction registry.
    pub fn graph(&self) -> Arc<EntityGraph> {
        Arc::clone(&self.graph)
    }

    /// Creates a data record with its parent associations.
    #[instrument(skip(self, data), fields(data_type = data.data_type))]
    pub async fn create_data(&self, data: &DataInput) -> CrudResult<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let metadata = serde_json::to_value(&data.metadata)?;
        let row = tx
            .query_one(
                "INSERT INTO data (type, metadata, tags, notes, acquisition_date, owner, \
                 created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, now(), now()) \
                 RETURNING id",
                &[
                    &data.data_type,
                    &metadata,
                    &data.tags,
                    &data.notes,
                    &data.acquisition_date,
                    &data.owner,
                ],
            )
            .await?;
        let id: i64 = row.get(0);
        self.link_parents(&tx, EntityKind::Data, id, EntityKind::Subject, &data.parent_subject)
            .await?;
        self.link_parents(&tx, EntityKind::Data, id, EntityKind::Sample, &data.parent_sample)
            .await?;
        self.link_parents(&tx, EntityKind::Data, id, EntityKind::Data, &data.parent_data)
            .await?;
        commit(tx).await?;
        debug!(id, "data record created");
        Ok(id)
    }

    /// Updates a data record and tops up its parent associations.
    #[instrument(skip(self, data))]
    pub async fn update_data(&self, id: i64, data: &DataInput) -> CrudResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let metadata = serde_json::to_value(&data.metadata)?;
        let updated = tx
            .execute(
                "UPDATE data SET metadata = $2, tags = $3, notes = $4, acquisition_date = $5, \
                 updated_at = now() WHERE id = $1 AND type = $6",
                &[
                    &id,
                    &metadata,
                    &data.tags,
                    &data.notes,
                    &data.acquisition_date,
                    &data.data_type,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(CrudError::NotFound { entity: "data", id });
        }
        self.link_parents(&tx, EntityKind::Data, id, EntityKind::Subject, &data.parent_subject)
            .await?;
        self.link_parents(&tx, EntityKind::Data, id, EntityKind::Sample, &data.parent_sample)
            .await?;
        self.link_parents(&tx, EntityKind::Data, id, EntityKind::Data, &data.parent_data)
            .await?;
        commit(tx).await
    }

    /// Deletes a data record. Returns the number of deleted rows.
    #[instrument(skip(self))]
    pub async fn delete_data(&self, id: i64) -> CrudResult<u64> {
        let client = self.pool.get().await?;
        Ok(client
            .execute("DELETE FROM data WHERE id = $1", &[&id])
            .await?)
    }

    /// Creates a sample, allocating its biobank code when none is given.
    #[instrument(skip(self, sample), fields(data_type = sample.data_type))]
    pub async fn create_sample(&self, sample: &SampleInput) -> CrudResult<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let biobank_code = codes::next_biobank_code(&tx, sample).await?;
        let metadata = serde_json::to_value(&sample.metadata)?;
        let row = tx
            .query_one(
                "INSERT INTO sample (type, biobank, biobank_code, metadata, tags, notes, owner, \
                 created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now()) \
                 RETURNING id",
                &[
                    &sample.data_type,
                    &sample.biobank,
                    &biobank_code,
                    &metadata,
                    &sample.tags,
                    &sample.notes,
                    &sample.owner,
                ],
            )
            .await?;
        let id: i64 = row.get(0);
        self.link_parents(&tx, EntityKind::Sample, id, EntityKind::Subject, &sample.donor)
            .await?;
        self.link_parents(&tx, EntityKind::Sample, id, EntityKind::Sample, &sample.parent_sample)
            .await?;
        commit(tx).await?;
        debug!(id, ?biobank_code, "sample created");
        Ok(id)
    }

    /// Updates a sample and tops up its associations.
    #[instrument(skip(self, sample))]
    pub async fn update_sample(&self, id: i64, sample: &SampleInput) -> CrudResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let metadata = serde_json::to_value(&sample.metadata)?;
        let updated = tx
            .execute(
                "UPDATE sample SET biobank = $2, biobank_code = $3, metadata = $4, tags = $5, \
                 notes = $6, updated_at = now() WHERE id = $1 AND type = $7",
                &[
                    &id,
                    &sample.biobank,
                    &sample.biobank_code,
                    &metadata,
                    &sample.tags,
                    &sample.notes,
                    &sample.data_type,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(CrudError::NotFound { entity: "sample", id });
        }
        self.link_parents(&tx, EntityKind::Sample, id, EntityKind::Subject, &sample.donor)
            .await?;
        self.link_parents(&tx, EntityKind::Sample, id, EntityKind::Sample, &sample.parent_sample)
            .await?;
        commit(tx).await
    }

    /// Deletes a sample. Returns the number of deleted rows.
    #[instrument(skip(self))]
    pub async fn delete_sample(&self, id: i64) -> CrudResult<u64> {
        let client = self.pool.get().await?;
        Ok(client
            .execute("DELETE FROM sample WHERE id = $1", &[&id])
            .await?)
    }

    /// Creates a subject with its optional personal-details row, allocating
    /// a code when none is given.
    #[instrument(skip(self, subject), fields(data_type = subject.data_type))]
    pub async fn create_subject(&self, subject: &SubjectInput) -> CrudResult<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let personal_info = match &subject.personal_info {
            Some(details) => Some(insert_personal_details(&tx, details).await?),
            None => None,
        };
        let code = codes::next_subject_code(&tx, subject.data_type, subject.code.as_deref())
            .await?;
        let sex = subject.sex.as_deref().unwrap_or("N.D.");
        let metadata = serde_json::to_value(&subject.metadata)?;
        let row = tx
            .query_one(
                "INSERT INTO subject (type, code, sex, personal_info, metadata, tags, notes, \
                 owner, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), \
                 now()) RETURNING id",
                &[
                    &subject.data_type,
                    &code,
                    &sex,
                    &personal_info,
                    &metadata,
                    &subject.tags,
                    &subject.notes,
                    &subject.owner,
                ],
            )
            .await?;
        let id: i64 = row.get(0);
        self.link_parents(&tx, EntityKind::Subject, id, EntityKind::Subject, &subject.parent_subject)
            .await?;
        commit(tx).await?;
        debug!(id, code, "subject created");
        Ok(id)
    }

    /// Updates a subject, writing through to its personal-details row.
    #[instrument(skip(self, subject))]
    pub async fn update_subject(&self, id: i64, subject: &SubjectInput) -> CrudResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let personal_info = match &subject.personal_info {
            Some(details) => match details.id {
                Some(details_id) => {
                    tx.execute(
                        "UPDATE personal_details SET given_name = $2, surname = $3, \
                         birth_date = $4, updated_at = now() WHERE id = $1",
                        &[
                            &details_id,
                            &details.given_name,
                            &details.surname,
                            &details.birth_date,
                        ],
                    )
                    .await?;
                    Some(details_id)
                }
                None => Some(insert_personal_details(&tx, details).await?),
            },
            None => None,
        };
        let metadata = serde_json::to_value(&subject.metadata)?;
        let updated = tx
            .execute(
                "UPDATE subject SET code = $2, sex = $3, personal_info = COALESCE($4, \
                 personal_info), metadata = $5, tags = $6, notes = $7, updated_at = now() \
                 WHERE id = $1 AND type = $8",
                &[
                    &id,
                    &subject.code,
                    &subject.sex,
                    &personal_info,
                    &metadata,
                    &subject.tags,
                    &subject.notes,
                    &subject.data_type,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(CrudError::NotFound { entity: "subject", id });
        }
        self.link_parents(&tx, EntityKind::Subject, id, EntityKind::Subject, &subject.parent_subject)
            .await?;
        commit(tx).await
    }

    /// Deletes a subject and its orphaned personal-details row in the same
    /// transaction. Returns the number of deleted subject rows.
    #[instrument(skip(self))]
    pub async fn delete_subject(&self, id: i64) -> CrudResult<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let row = tx
            .query_opt("SELECT personal_info FROM subject WHERE id = $1", &[&id])
            .await?;
        let Some(row) = row else {
            commit(tx).await?;
            return Ok(0);
        };
        let personal_info: Option<i64> = row.get(0);
        let deleted = tx.execute("DELETE FROM subject WHERE id = $1", &[&id]).await?;
        if let Some(details_id) = personal_info {
            tx.execute("DELETE FROM personal_details WHERE id = $1", &[&details_id])
                .await?;
        }
        commit(tx).await?;
        Ok(deleted)
    }

    /// Inserts the missing `(child, parent)` junction rows for one parent
    /// kind. Existing rows are kept; nothing is deleted.
    async fn link_parents(
        &self,
        tx: &Transaction<'_>,
        child: EntityKind,
        child_id: i64,
        parent: EntityKind,
        parents: &[i64],
    ) -> CrudResult<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let join = self.graph.lookup_join(child, parent)?;
        let existing_rows = tx
            .query(
                &format!(
                    "SELECT \"{parent_col}\" FROM {table} WHERE \"{child_col}\" = $1",
                    parent_col = join.parent_column,
                    table = join.table,
                    child_col = join.child_column,
                ),
                &[&child_id],
            )
            .await?;
        let existing: HashSet<i64> = existing_rows.iter().map(|row| row.get(0)).collect();
        let insert = format!(
            "INSERT INTO {table} (\"{child_col}\", \"{parent_col}\") VALUES ($1, $2)",
            table = join.table,
            child_col = join.child_column,
            parent_col = join.parent_column,
        );
        for parent_id in parents {
            if !existing.contains(parent_id) {
                tx.execute(&insert, &[&child_id, parent_id]).await?;
            }
        }
        Ok(())
    }
}

async fn insert_personal_details(
    tx: &Transaction<'_>,
    details: &PersonalDetailsInput,
) -> CrudResult<i64> {
    let row = tx
        .query_one(
            "INSERT INTO personal_details (given_name, surname, birth_date, created_at, \
             updated_at) VALUES ($1, $2, $3, now(), now()) RETURNING id",
            &[&details.given_name, &details.surname, &details.birth_date],
        )
        .await?;
    Ok(row.get(0))
}

async fn commit(tx: Transaction<'_>) -> CrudResult<()> {
    tx.commit().await.map_err(|err| CrudError::Transaction {
        message: err.to_string(),
    })
}
