use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use hydra_db::{ConnectionDefinition, ConnectionManager, FieldValue, Params, SqlValue};
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "hydra-db";

#[derive(Parser)]
#[command(name = "hydra-db")]
#[command(about = "Manage encrypted database connection profiles and run queries against them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Database type: oracle, postgresql, mysql, mssql or sqlite
    #[arg(long = "type", value_name = "TYPE")]
    db_type: String,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    database: Option<String>,
    /// Oracle service name
    #[arg(long)]
    service_name: Option<String>,
    /// Character set (MySQL, SQL Server)
    #[arg(long)]
    charset: Option<String>,
    /// TDS protocol version (SQL Server)
    #[arg(long)]
    tds_version: Option<String>,
    /// Extra backend parameter as key=value; repeatable. Values are coerced
    /// to bool/int/float where they parse as one.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new connection profile
    #[command(alias = "add-conn")]
    Add {
        /// Name for the connection
        name: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// List all saved connection profiles
    #[command(alias = "ls")]
    List,
    /// Show a profile's non-sensitive details
    Show {
        name: String,
    },
    /// Remove a saved connection profile
    #[command(alias = "rm")]
    Remove {
        name: String,
    },
    /// Replace a saved connection profile
    Update {
        name: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Test whether a saved connection is reachable
    Test {
        name: String,
    },
    /// Run a query and print the rows as JSON
    Query {
        name: String,
        /// SQL with named `:param` placeholders
        sql: String,
        /// Bind parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Run a command (INSERT/UPDATE/DELETE/DDL) inside a transaction
    Exec {
        name: String,
        /// SQL with named `:param` placeholders
        sql: String,
        /// Bind parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Show registry store information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manager = ConnectionManager::new(APP_NAME)?;

    let outcome = run(&manager, cli.command).await;
    manager.close_all().await;
    outcome
}

async fn run(manager: &ConnectionManager, command: Commands) -> Result<()> {
    match command {
        Commands::Add { name, connection } => {
            let definition = build_definition(&connection)?;
            manager.add_connection(&name, definition).await?;
            println!("Connection '{}' added successfully!", name);
        }
        Commands::List => {
            let connections = manager.list_connections().await?;
            if connections.is_empty() {
                println!("No saved connections found.");
            } else {
                println!("Saved connections:");
                for name in connections {
                    println!("- {}", name);
                }
            }
        }
        Commands::Show { name } => {
            let info = manager.connection_info(&name).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Remove { name } => {
            manager.remove_connection(&name).await?;
            println!("Connection '{}' removed successfully!", name);
        }
        Commands::Update { name, connection } => {
            let definition = build_definition(&connection)?;
            manager.update_connection(&name, definition).await?;
            println!("Connection '{}' updated successfully!", name);
        }
        Commands::Test { name } => {
            if manager.test_connection(&name).await {
                println!("Connection '{}' is reachable.", name);
            } else {
                eprintln!("Connection '{}' test failed.", name);
                std::process::exit(1);
            }
        }
        Commands::Query { name, sql, params } => {
            let params = parse_json_params(params.as_deref())?;
            let rows = manager.execute_query(&name, &sql, &params).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Exec { name, sql, params } => {
            let params = parse_json_params(params.as_deref())?;
            let affected = manager.execute_command(&name, &sql, &params).await?;
            println!("{} row(s) affected.", affected);
        }
        Commands::Info => {
            let info = manager.registry_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}

fn build_definition(args: &ConnectionArgs) -> Result<ConnectionDefinition> {
    let kind = args
        .db_type
        .parse()
        .map_err(|e| anyhow!("invalid --type: {e}"))?;
    let mut definition = ConnectionDefinition::new(kind);

    if let Some(host) = &args.host {
        definition = definition.with_field("host", host.as_str());
    }
    if let Some(port) = args.port {
        definition = definition.with_field("port", i64::from(port));
    }
    if let Some(username) = &args.username {
        definition = definition.with_field("username", username.as_str());
    }
    if let Some(password) = &args.password {
        definition = definition.with_field("password", password.as_str());
    }
    if let Some(database) = &args.database {
        definition = definition.with_field("database", database.as_str());
    }
    if let Some(service_name) = &args.service_name {
        definition = definition.with_field("service_name", service_name.as_str());
    }
    if let Some(charset) = &args.charset {
        definition = definition.with_field("charset", charset.as_str());
    }
    if let Some(tds_version) = &args.tds_version {
        definition = definition.with_field("tds_version", tds_version.as_str());
    }

    for raw in &args.params {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --param `{raw}`, expected key=value"))?;
        definition = definition.with_field(key, coerce_value(value));
    }

    Ok(definition)
}

// "true"/"false" become booleans, numerics become int/float, the rest stays
// a string.
fn coerce_value(raw: &str) -> FieldValue {
    match raw {
        "true" => return FieldValue::Bool(true),
        "false" => return FieldValue::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return FieldValue::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return FieldValue::Float(f);
    }
    FieldValue::Str(raw.to_string())
}

fn parse_json_params(raw: Option<&str>) -> Result<Params> {
    let Some(raw) = raw else {
        return Ok(Params::new());
    };
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid --params JSON: {e}"))?;
    Ok(object
        .into_iter()
        .map(|(key, value)| (key, SqlValue::from(value)))
        .collect())
}
