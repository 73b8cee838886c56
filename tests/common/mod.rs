#![allow(dead_code)]

use druglib_db::backend::database::PqxxClient;
use druglib_db::{DbInterface, DbInterfaceFactory, Field, PgConnectParams, Record};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestDatabaseType {
    Mock,
    Postgres,
}

/// Client under test plus whatever must stay alive for it to work.
pub struct TestDatabase {
    pub client: Box<dyn DbInterface>,
    pub params: Option<PgConnectParams>,
    pub postgres_container: Option<ContainerAsync<Postgres>>,
}

/// Start a PostgreSQL container and return it with its connection parameters.
pub async fn start_postgres(
) -> Result<(ContainerAsync<Postgres>, PgConnectParams), Box<dyn std::error::Error>> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let params = PgConnectParams::new("127.0.0.1", port, "postgres", "postgres", "postgres");
    Ok((container, params))
}

pub async fn setup_postgres_client(
) -> Result<(PqxxClient, PgConnectParams, ContainerAsync<Postgres>), Box<dyn std::error::Error>> {
    let (container, params) = start_postgres().await?;
    let client = PqxxClient::connect(&params).await?;
    Ok((client, params, container))
}

/// Unified setup function for any database type
pub async fn setup_test_db(
    db_type: TestDatabaseType,
) -> Result<TestDatabase, Box<dyn std::error::Error>> {
    match db_type {
        TestDatabaseType::Mock => Ok(TestDatabase {
            client: DbInterfaceFactory::create_mock_database(),
            params: None,
            postgres_container: None,
        }),
        TestDatabaseType::Postgres => {
            let (container, params) = start_postgres().await?;
            let client = DbInterfaceFactory::create_pqxx_client(&params, false).await?;
            Ok(TestDatabase {
                client,
                params: Some(params),
                postgres_container: Some(container),
            })
        }
    }
}

pub fn fruit_template() -> Record {
    Record::from(vec![
        Field::new("id", 0i32),
        Field::new("name", String::new()),
        Field::new("description", String::new()),
    ])
}

pub fn fruit(id: i32, name: &str, description: &str) -> Record {
    Record::from(vec![
        Field::new("id", id),
        Field::new("name", name.to_string()),
        Field::new("description", description.to_string()),
    ])
}

pub fn fruits() -> Vec<Record> {
    vec![
        fruit(1, "Apple", "A sweet red fruit"),
        fruit(2, "Banana", "A long yellow fruit"),
        fruit(3, "Carrot", "An orange root vegetable"),
    ]
}

/// `test_table` with a unique `id` and the three fruit rows.
pub async fn create_fruit_table(client: &mut dyn DbInterface) {
    client
        .create_table("test_table", &fruit_template())
        .await
        .expect("create table");
    client
        .make_unique_constraint("test_table", &["id"])
        .await
        .expect("unique constraint");
    client
        .insert("test_table", &fruits())
        .await
        .expect("insert fruits");
}

pub fn ids(rows: &[Record]) -> Vec<i32> {
    rows.iter()
        .map(|row| row.at("id").unwrap().extract::<i32>().unwrap())
        .collect()
}

pub fn text(row: &Record, name: &str) -> String {
    row.at(name).unwrap().extract::<String>().unwrap()
}
