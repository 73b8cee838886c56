use tracing::{info, warn};

use crate::backend::{DbInterface, SearchIndexState};
use crate::error::{DbError, DbResult};
use crate::models::Record;

/// Rows per `insert` call when the caller has no preference.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 14;

/// Load `rows` into `table` in one transaction.
///
/// An active search index is suspended for the load and rebuilt before the
/// commit. Any failure rolls the whole load back, index state included.
pub async fn bulk_insert(
    client: &mut dyn DbInterface,
    table: &str,
    rows: Vec<Record>,
    chunk: usize,
) -> DbResult<usize> {
    if chunk == 0 {
        return Err(DbError::invalid_query("Chunk size must be greater than 0"));
    }
    if rows.is_empty() {
        return Ok(0);
    }

    let index_active = client.search_index_state(table) == SearchIndexState::Active;
    client.start_transaction().await?;

    match load(client, table, &rows, chunk, index_active).await {
        Ok(()) => {
            client.commit_transaction().await?;
            info!(table, rows = rows.len(), chunk, "Bulk insert committed");
            Ok(rows.len())
        }
        Err(e) => {
            warn!(table, error = %e, "Bulk insert failed, rolling back");
            if let Err(rollback_error) = client.rollback_transaction().await {
                warn!(table, error = %rollback_error, "Bulk insert rollback failed");
            }
            if index_active && client.search_index_state(table) == SearchIndexState::Dropped {
                // The DROP INDEX was rolled back with the rest.
                if let Err(restore_error) = client.restore_search_index(table).await {
                    warn!(table, error = %restore_error, "Search index state not restored");
                }
            }
            Err(e)
        }
    }
}

async fn load(
    client: &mut dyn DbInterface,
    table: &str,
    rows: &[Record],
    chunk: usize,
    index_active: bool,
) -> DbResult<()> {
    if index_active {
        client.drop_search_index(table).await?;
    }
    for pack in rows.chunks(chunk) {
        client.insert(table, pack).await?;
    }
    if index_active {
        client.restore_search_index(table).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::database::MockDbClient;
    use crate::error::DbErrorCode;
    use crate::models::Field;

    fn rows(range: std::ops::Range<i32>) -> Vec<Record> {
        range
            .map(|i| {
                Record::from(vec![
                    Field::new("id", i),
                    Field::new("name", format!("drug {}", i)),
                ])
            })
            .collect()
    }

    async fn client() -> MockDbClient {
        let mut db = MockDbClient::new();
        db.create_table("drugs", &rows(0..1)[0]).await.unwrap();
        db.make_unique_constraint("drugs", &["id"]).await.unwrap();
        db.setup_search_index("drugs", &["name"]).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_bulk_insert_in_chunks() {
        let mut db = client().await;
        let inserted = bulk_insert(&mut db, "drugs", rows(0..1000), 128).await.unwrap();
        assert_eq!(inserted, 1000);
        assert_eq!(db.count_all("drugs").await.unwrap(), 1000);
        assert!(!db.is_transaction_in_progress());
        assert_eq!(db.search_index_state("drugs"), SearchIndexState::Active);
    }

    #[tokio::test]
    async fn test_bulk_insert_rolls_back_on_failure() {
        let mut db = client().await;
        let mut batch = rows(0..300);
        batch.extend(rows(5..6));
        let err = bulk_insert(&mut db, "drugs", batch, 100).await.unwrap_err();
        assert_eq!(err.code(), DbErrorCode::ConstraintViolation);
        assert_eq!(db.count_all("drugs").await.unwrap(), 0);
        assert!(!db.is_transaction_in_progress());
        assert_eq!(db.search_index_state("drugs"), SearchIndexState::Active);
    }

    #[tokio::test]
    async fn test_zero_chunk_is_rejected() {
        let mut db = client().await;
        let err = bulk_insert(&mut db, "drugs", rows(0..3), 0).await.unwrap_err();
        assert_eq!(err.code(), DbErrorCode::InvalidQuery);
    }
}
