use std::{env, sync::Arc};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobboard::{
    config::AppConfig,
    db,
    models::NewInstitution,
    permissions::RoleName,
    retention::RetentionSweeper,
    s3,
    storage::S3Storage,
    store::{PgStore, Store},
};

const USAGE: &str = "Usage:
  maintenance retention-sweep
  maintenance create-institution <name>
  maintenance grant-role <email> <institution-id|global> <role>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("retention-sweep") => retention_sweep().await?,
        Some("create-institution") => create_institution(&args[1..])?,
        Some("grant-role") => grant_role(&args[1..])?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect(config: &AppConfig) -> Result<PgStore> {
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    Ok(PgStore::new(pool))
}

async fn retention_sweep() -> Result<()> {
    let config = AppConfig::from_env()?;
    let store = Arc::new(connect(&config)?);
    let s3_client = s3::build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone()));

    let sweeper = RetentionSweeper::new(store, storage, config.retention_days);
    let report = sweeper
        .sweep()
        .await
        .context("retention sweep could not list applications")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn create_institution(args: &[String]) -> Result<()> {
    let name = args.join(" ");
    let name = name.trim();
    if name.is_empty() {
        bail!("create-institution expects a name\n{USAGE}");
    }

    let config = AppConfig::from_env()?;
    let store = connect(&config)?;
    let institution = store.insert_institution(NewInstitution {
        id: Uuid::new_v4(),
        name: name.to_string(),
    })?;
    println!("Created institution {} ({})", institution.name, institution.id);
    Ok(())
}

fn grant_role(args: &[String]) -> Result<()> {
    let [email, institution, role] = args else {
        bail!("grant-role expects three arguments\n{USAGE}");
    };
    let role: RoleName = role.parse()?;
    let institution_id = match institution.as_str() {
        "global" => None,
        value => Some(
            Uuid::parse_str(value).context("institution must be a UUID or 'global'")?,
        ),
    };
    if institution_id.is_none() && role != RoleName::Superadmin {
        bail!("only superadmin may be granted globally");
    }

    let config = AppConfig::from_env()?;
    let store = connect(&config)?;
    let email = email.trim().to_ascii_lowercase();
    let user = store
        .find_user_by_email(&email)?
        .with_context(|| format!("no user with email {email}"))?;
    if let Some(id) = institution_id {
        store
            .find_institution(id)?
            .with_context(|| format!("no institution with id {id}"))?;
    }

    store.assign_role(user.id, institution_id, role)?;
    println!(
        "Granted {role} to {email} at {}",
        institution_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "global scope".to_string())
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
