use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use campus_requests::{
    auth::{password, roles::Role},
    config::AppConfig,
    db,
    models::{NewUser, USER_STATUS_ACTIVE},
    schema::{documents, users},
};

const USAGE: &str = "Usage:\n  maintenance create-admin <email> <password> <matricule>\n  maintenance prune-uploads";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("create-admin") => {
            let (Some(email), Some(secret), Some(matricule)) = (args.next(), args.next(), args.next())
            else {
                eprintln!("{USAGE}");
                std::process::exit(1);
            };
            create_admin(&email, &secret, &matricule)?;
        }
        Some("prune-uploads") => prune_uploads().await?,
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

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_config() -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        uploads_dir = %config.uploads_dir.display(),
        "loaded backend configuration"
    );
    Ok(config)
}

fn create_admin(email: &str, secret: &str, matricule: &str) -> Result<()> {
    if secret.len() < 8 {
        bail!("admin password must be at least 8 characters");
    }

    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let new_user = NewUser {
        id: Uuid::new_v4(),
        matricule: matricule.trim().to_string(),
        last_name: "Administrateur".to_string(),
        first_name: "Compte".to_string(),
        email: email.trim().to_lowercase(),
        phone: None,
        password_hash: password::hash_password(secret)?,
        role: Role::Admin.as_str().to_string(),
        faculty: None,
        department: None,
        status: USER_STATUS_ACTIVE.to_string(),
    };

    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .context("failed to insert admin account (email or matricule already used?)")?;

    println!("Created admin {} ({})", new_user.email, new_user.id);
    Ok(())
}

/// Removes files in the uploads directory that no document row points to.
async fn prune_uploads() -> Result<()> {
    let config = load_config()?;
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let referenced: HashSet<PathBuf> = documents::table
        .select(documents::storage_path)
        .load::<String>(&mut conn)
        .context("failed to load document paths")?
        .into_iter()
        .map(PathBuf::from)
        .map(|path| std::fs::canonicalize(&path).unwrap_or(path))
        .collect();
    drop(conn);

    let uploads_dir = match tokio::fs::canonicalize(&config.uploads_dir).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("Uploads directory does not exist; nothing to prune.");
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to resolve {}", config.uploads_dir.display())
            })
        }
    };
    let mut entries = tokio::fs::read_dir(&uploads_dir)
        .await
        .with_context(|| format!("failed to list {}", uploads_dir.display()))?;

    let mut removed = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() || referenced.contains(&path) {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(err) => eprintln!("Failed to remove {}: {err}", path.display()),
        }
    }

    println!("Removed {removed} orphaned upload(s).");
    Ok(())
}
