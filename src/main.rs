use clap::{Parser, Subcommand};
use druglib_db::config::DatabaseConfig;
use druglib_db::logging::init_tracing;
use druglib_db::models::{Conditions, OrderCondition, PageCondition};
use druglib_db::{DbInterface, DbInterfaceFactory, DbInterfacePool, DbResult};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "druglib-db")]
#[command(about = "Administration tool for the druglib PostgreSQL storage")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that every pooled connection answers
    Ping,
    /// List tables of the public schema
    Tables,
    /// Report whether a table exists
    CheckTable { table: String },
    /// Count the rows of a table
    Count { table: String },
    /// Print one page of rows
    Select {
        table: String,
        /// Column to order by
        #[arg(long)]
        order: Option<String>,
        /// asc or desc
        #[arg(long)]
        direction: Option<String>,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
}

async fn run(command: &Command, pool: &DbInterfacePool) -> DbResult<()> {
    if let Command::Ping = command {
        let mut clients = Vec::with_capacity(pool.len());
        while let Ok(client) = pool.acquire() {
            clients.push(client);
        }
        let total = clients.len();
        let mut result = Ok(());
        for client in clients.iter_mut() {
            if let Err(e) = client.health_check().await {
                result = Err(e);
                break;
            }
        }
        for client in clients {
            pool.release(client)?;
        }
        result?;
        println!("ok ({} connections)", total);
        return Ok(());
    }

    let mut client = pool.acquire()?;
    let result = run_single(command, client.as_mut()).await;
    pool.release(client)?;
    result
}

async fn run_single(command: &Command, client: &mut dyn DbInterface) -> DbResult<()> {
    match command {
        Command::Ping => {}
        Command::Tables => {
            for table in client.list_tables().await? {
                println!("{}", table);
            }
        }
        Command::CheckTable { table } => {
            let exists = client.check_table(table).await?;
            println!("{}: {}", table, if exists { "present" } else { "absent" });
        }
        Command::Count { table } => {
            println!("{}", client.count_all(table).await?);
        }
        Command::Select {
            table,
            order,
            direction,
            page_size,
            page,
        } => {
            let mut conditions = Conditions::new();
            if let Some(order) = OrderCondition::from_params(order.as_deref(), direction.as_deref()) {
                conditions.add_order_condition(order);
            }
            conditions.set_page_condition(PageCondition::with_page(*page_size, *page));

            for row in client.view(table, &conditions).await? {
                let mut values = Vec::with_capacity(row.len());
                for index in 0..row.len() {
                    values.push(row.extract(index)?.unwrap_or_else(|| "NULL".to_string()));
                }
                println!("{}", values.join("\t"));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = DatabaseConfig::load_from_file(&args.config)
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    init_tracing(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        pool_size = config.pool_size,
        "Configuration loaded"
    );

    let pool = DbInterfacePool::new();
    pool.fill(config.pool_size, || DbInterfaceFactory::from_config(&config))
        .await?;

    let result = run(&args.command, &pool).await;
    pool.clear().await?;
    result?;
    Ok(())
}
