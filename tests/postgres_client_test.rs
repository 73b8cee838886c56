//! Scenarios that need a real PostgreSQL server.
//!
//! Run with `cargo test -- --ignored` on a machine with Docker.

use chrono::NaiveDate;
use druglib_db::backend::database::PqxxClient;
use druglib_db::models::{PatternCondition, SimilarityCondition};
use druglib_db::pool::DbInterfacePool;
use druglib_db::transaction::{shared_client, TransactionManager};
use druglib_db::{
    bulk_insert, Conditions, DbErrorCode, DbInterface, DbInterfaceFactory, Field, Identifier,
    Record, SqlType,
};
use serde_json::json;

mod common;

use common::{create_fruit_table, fruit, ids, setup_postgres_client, text};

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_full_text_search() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();
    create_fruit_table(&mut client).await;
    client
        .setup_search_index("test_table", &["name", "description"])
        .await
        .unwrap();

    let search = |word: &str| {
        let mut conditions = Conditions::new();
        conditions
            .add_pattern_condition(PatternCondition::new(word))
            .unwrap();
        conditions
    };

    let mut rows = client.select("test_table", &search("fruit")).await.unwrap();
    rows.sort_by_key(|r| r.at("id").unwrap().extract::<i32>().unwrap());
    assert_eq!(ids(&rows), vec![1, 2]);

    let rows = client.select("test_table", &search("yellow")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(text(&rows[0], "name"), "Banana");

    let rows = client.select("test_table", &search("vegetable")).await.unwrap();
    assert_eq!(text(&rows[0], "name"), "Carrot");

    assert!(client
        .select("test_table", &search("berry"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_similarity_ordering() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();
    create_fruit_table(&mut client).await;
    client
        .setup_search_index("test_table", &["name", "description"])
        .await
        .unwrap();

    let mut conditions = Conditions::new();
    conditions
        .add_similarity_condition(SimilarityCondition::new("An sweet"))
        .unwrap();
    let rows = client.select("test_table", &conditions).await.unwrap();
    assert_eq!(ids(&rows), vec![1, 3, 2]);
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_search_fields_of_existing_index() {
    let (mut client, params, _container) = setup_postgres_client().await.unwrap();
    create_fruit_table(&mut client).await;
    client
        .setup_search_index("test_table", &["name", "description"])
        .await
        .unwrap();

    // A fresh connection only needs to be told which fields are indexed.
    let mut other = PqxxClient::connect(&params).await.unwrap();
    other
        .set_search_fields("test_table", &["name", "description"])
        .await
        .unwrap();
    assert_eq!(
        other.search_index_state("test_table"),
        druglib_db::SearchIndexState::Active
    );
    let mut conditions = Conditions::new();
    conditions
        .add_pattern_condition(PatternCondition::new("yellow"))
        .unwrap();
    assert_eq!(other.count("test_table", &conditions).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_transaction_isolation() {
    let (mut client, params, _container) = setup_postgres_client().await.unwrap();
    create_fruit_table(&mut client).await;
    let mut observer = PqxxClient::connect(&params).await.unwrap();

    client.start_transaction().await.unwrap();
    client
        .insert("test_table", &[fruit(4, "Date", "A sticky brown fruit")])
        .await
        .unwrap();
    assert_eq!(client.count_all("test_table").await.unwrap(), 4);
    assert_eq!(observer.count_all("test_table").await.unwrap(), 3);

    client.commit_transaction().await.unwrap();
    assert_eq!(observer.count_all("test_table").await.unwrap(), 4);
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_failed_statement_aborts_transaction() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();
    create_fruit_table(&mut client).await;

    client.start_transaction().await.unwrap();
    client
        .insert("test_table", &[fruit(4, "Date", "A sticky brown fruit")])
        .await
        .unwrap();
    let err = client
        .insert("test_table", &[fruit(1, "Apple", "duplicate")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), DbErrorCode::ConstraintViolation);

    let err = client.commit_transaction().await.unwrap_err();
    assert_eq!(err.code(), DbErrorCode::SystemRollback);
    assert!(!client.is_transaction_in_progress());
    assert_eq!(client.count_all("test_table").await.unwrap(), 3);
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_value_types_round_trip() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();
    let taken = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap();
    let template = Record::from(vec![
        Field::new("uid", Identifier::generated()),
        Field::new("dose", 0i32),
        Field::new("stock", 0i64),
        Field::new("weight", 0.0f64),
        Field::new("active", false),
        Field::new("title", String::new()),
        Field::new("taken_at", taken),
        Field::new("payload", json!({})),
    ]);
    client.create_table("drugs", &template).await.unwrap();

    let row = Record::from(vec![
        Field::new("uid", Identifier::generated()),
        Field::new("dose", 250i32),
        Field::new("stock", 9_000_000_000i64),
        Field::new("weight", 0.5f64),
        Field::new("active", true),
        Field::new("title", "Paracetamol".to_string()),
        Field::new("taken_at", taken),
        Field::new("payload", json!({"form": "tablet", "count": 20})),
    ]);
    let nulls = Record::from(vec![
        Field::new("uid", Identifier::generated()),
        Field::null("dose", SqlType::Int),
        Field::null("stock", SqlType::BigInt),
        Field::null("weight", SqlType::DoublePrecision),
        Field::null("active", SqlType::Boolean),
        Field::null("title", SqlType::Text),
        Field::null("taken_at", SqlType::Timestamp),
        Field::null("payload", SqlType::Jsonb),
    ]);
    let returned = client
        .insert_with_returning("drugs", &[row, nulls], &["uid", "row_version"])
        .await
        .unwrap();
    assert_eq!(returned.len(), 2);
    let uid = returned[0].at("uid").unwrap().extract::<Identifier>().unwrap();
    assert!(uid.is_explicit());
    assert!(uid.to_uuid().is_ok());
    assert_eq!(returned[0].at("row_version").unwrap().extract::<i64>().unwrap(), 1);

    let mut conditions = Conditions::new();
    conditions.add_equal("uid", uid.clone());
    let rows = client.select("drugs", &conditions).await.unwrap();
    assert_eq!(rows.len(), 1);
    let stored = &rows[0];
    assert!(stored.find("row_version").is_none());
    assert_eq!(stored.at("dose").unwrap().extract::<i32>().unwrap(), 250);
    assert_eq!(stored.at("stock").unwrap().extract::<i64>().unwrap(), 9_000_000_000);
    assert_eq!(stored.at("weight").unwrap().extract::<f64>().unwrap(), 0.5);
    assert!(stored.at("active").unwrap().extract::<bool>().unwrap());
    assert_eq!(text(stored, "title"), "Paracetamol");
    assert_eq!(
        stored.at("taken_at").unwrap().extract::<chrono::NaiveDateTime>().unwrap(),
        taken
    );
    assert_eq!(
        stored.at("payload").unwrap().extract::<serde_json::Value>().unwrap()["count"],
        20
    );

    let mut conditions = Conditions::new();
    conditions.add_field_condition(druglib_db::models::FieldCondition::from_field(
        &Field::null("dose", SqlType::Int),
        druglib_db::models::Operator::Eq,
    ));
    let rows = client.select("drugs", &conditions).await.unwrap();
    assert_eq!(rows.len(), 1);
    let dose = rows[0].at("dose").unwrap();
    assert!(dose.is_null());
    assert_eq!(dose.sql_type(), SqlType::Int);
    assert_eq!(
        dose.get::<i32>().unwrap_err().code(),
        DbErrorCode::DataConversionError
    );

    let views = client.view("drugs", &conditions).await.unwrap();
    assert_eq!(views[0].extract_by_name("dose").unwrap(), None);
    assert_eq!(
        views[0].extract_by_name("row_version").unwrap().as_deref(),
        Some("1")
    );
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_invalid_identifiers_are_rejected() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();

    let err = client
        .create_table("drugs; DROP TABLE x", &common::fruit_template())
        .await
        .unwrap_err();
    assert_eq!(err.code(), DbErrorCode::InvalidQuery);
    assert!(matches!(err, druglib_db::DbError::InvalidIdentifier { .. }));

    let template = Record::from(vec![Field::new("row_version", 0i64)]);
    let err = client.create_table("drugs", &template).await.unwrap_err();
    assert_eq!(err.code(), DbErrorCode::InvalidQuery);

    assert!(!client.check_table("drugs").await.unwrap());
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_create_missing_database() {
    let (_container, params) = common::start_postgres().await.unwrap();
    let missing = params.for_database("druglib_fresh");

    let err = PqxxClient::connect(&missing).await.err().unwrap();
    assert_eq!(err.code(), DbErrorCode::ConnectionFailed);

    let mut client = DbInterfaceFactory::create_pqxx_client(&missing, true)
        .await
        .unwrap();
    client.health_check().await.unwrap();
    client.drop_connect().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_bulk_insert_with_search_index() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();
    create_fruit_table(&mut client).await;
    client
        .setup_search_index("test_table", &["name", "description"])
        .await
        .unwrap();

    let rows: Vec<Record> = (10..2010)
        .map(|i| fruit(i, &format!("Fruit {}", i), "A bulk loaded fruit"))
        .collect();
    let inserted = bulk_insert(&mut client, "test_table", rows, 500).await.unwrap();
    assert_eq!(inserted, 2000);
    assert_eq!(client.count_all("test_table").await.unwrap(), 2003);
    assert_eq!(
        client.search_index_state("test_table"),
        druglib_db::SearchIndexState::Active
    );

    let mut conditions = Conditions::new();
    conditions
        .add_pattern_condition(PatternCondition::new("bulk"))
        .unwrap();
    assert_eq!(client.count("test_table", &conditions).await.unwrap(), 2000);
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_pool_and_transaction_manager() {
    let (_container, params) = common::start_postgres().await.unwrap();

    let pool = DbInterfacePool::new();
    pool.fill(2, || DbInterfaceFactory::create_pqxx_client(&params, false))
        .await
        .unwrap();
    assert_eq!(pool.len(), 2);

    let mut setup = pool.acquire().unwrap();
    create_fruit_table(setup.as_mut()).await;
    pool.release(setup).unwrap();

    let manager = TransactionManager::new();
    manager
        .add_table("test_table", shared_client(pool.acquire().unwrap()))
        .unwrap();

    let mut scope = manager.start_transaction(&["test_table"]).await.unwrap();
    scope
        .table("test_table")
        .unwrap()
        .insert("test_table", &[fruit(4, "Date", "A sticky brown fruit")])
        .await
        .unwrap();
    scope.rollback().await.unwrap();

    let mut guard = manager.acquire_table("test_table").await.unwrap();
    assert_eq!(guard.count_all("test_table").await.unwrap(), 3);
    drop(guard);

    pool.clear().await.unwrap();
    assert!(pool.is_empty());
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_closed_connection() {
    let (mut client, _params, _container) = setup_postgres_client().await.unwrap();
    client.drop_connect().await.unwrap();
    assert!(!client.is_connected());
    let err = client.select_all("test_table").await.unwrap_err();
    assert_eq!(err.code(), DbErrorCode::ConnectionFailed);
    client.drop_connect().await.unwrap();
}
