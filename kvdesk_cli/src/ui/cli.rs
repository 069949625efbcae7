use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kvdesk_core::storage::{CredentialVault, KeyringVault};
use kvdesk_core::{
    new_operation_id, BulkDelete, ConnectionProfile, ConnectionProfileStore, CoreConfig,
    CoreError, MetricPeriod, Services,
};
use log::{info, warn};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "kvdesk", version = "0.1.0", subcommand_required = true)]
pub struct Args {
    /// Read settings from this JSON file instead of the per-user config dir
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Keep profiles.json in this directory
    #[arg(long, global = true)]
    pub profiles_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage saved connection profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Print the server's INFO fields
    Info {
        #[arg(long)]
        profile: String,
    },
    /// Delete every key matching a glob pattern, batch by batch
    DeleteKeys {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        pattern: String,
        /// Keys per SCAN batch (capped at 1000)
        #[arg(long)]
        batch: Option<usize>,
        /// Continue a previous run from this cursor
        #[arg(long)]
        resume: Option<String>,
    },
    /// Sample telemetry and print the recorded history
    Monitor {
        #[arg(long)]
        profile: String,
        #[arg(long, default_value = "1h")]
        period: MetricPeriod,
        #[arg(long, default_value_t = 3)]
        rounds: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    List,
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value_t = 6379)]
        port: u16,
        /// Stored in the OS keychain under the profile id
        #[arg(long)]
        password: Option<String>,
    },
    Remove {
        id: String,
    },
    /// Write all profiles to a JSON file
    Export {
        file: PathBuf,
    },
    /// Merge profiles from a JSON file
    Import {
        file: PathBuf,
    },
}

pub async fn run_cli(args: Args) -> Result<(), CoreError> {
    let config = match &args.config {
        Some(path) => CoreConfig::from_path(path)?,
        None => CoreConfig::load()?,
    };
    let profiles = match &args.profiles_dir {
        Some(dir) => ConnectionProfileStore::open(dir)?,
        None => ConnectionProfileStore::open_default()?,
    };
    let vault: Arc<dyn CredentialVault> = Arc::new(KeyringVault::default());
    let services = Services::with_redis(config, profiles, Arc::clone(&vault));

    let outcome = match args.command {
        Command::Profiles { action } => run_profiles(&services, vault.as_ref(), action),
        Command::Info { profile } => run_info(&services, &profile).await,
        Command::DeleteKeys {
            profile,
            pattern,
            batch,
            resume,
        } => run_delete(&services, &profile, pattern, batch, resume).await,
        Command::Monitor {
            profile,
            period,
            rounds,
        } => run_monitor(&services, &profile, period, rounds).await,
    };
    services.sessions.shutdown().await;
    outcome
}

fn run_profiles(
    services: &Services,
    vault: &dyn CredentialVault,
    action: ProfileAction,
) -> Result<(), CoreError> {
    let store = &services.profiles;
    match action {
        ProfileAction::List => {
            for p in store.list() {
                let secret = if p.credential_ref.is_some() { " (password)" } else { "" };
                println!("{:<16} {:<24} {}:{}{}", p.id, p.name, p.host, p.port, secret);
            }
        }
        ProfileAction::Add {
            id,
            name,
            host,
            port,
            password,
        } => {
            let mut profile = ConnectionProfile::new(id.clone(), name, host, port);
            if let Some(password) = password {
                vault.store(&id, &password)?;
                profile = profile.with_credential_ref(id.clone());
            }
            store.add(profile)?;
            println!("added '{id}'");
        }
        ProfileAction::Remove { id } => {
            let credential_ref = store.get(&id).and_then(|p| p.credential_ref);
            if !store.remove(&id)? {
                return Err(CoreError::NotFound(format!("profile '{id}'")));
            }
            if let Some(reference) = credential_ref {
                if let Err(e) = vault.forget(&reference) {
                    warn!("Could not remove stored password for '{}': {}", id, e);
                }
            }
            println!("removed '{id}'");
        }
        ProfileAction::Export { file } => {
            std::fs::write(&file, store.export_json()?)?;
            println!("exported {} profiles to {}", store.list().len(), file.display());
        }
        ProfileAction::Import { file } => {
            let summary = store.import_json(&std::fs::read_to_string(&file)?)?;
            println!(
                "imported {} profiles, skipped {}, {} duplicate ids",
                summary.imported, summary.skipped, summary.duplicates
            );
        }
    }
    Ok(())
}

/// Bind a fresh session to `profile_id` and return its token.
async fn open_session(services: &Services, profile_id: &str) -> Result<String, CoreError> {
    let profile = services
        .profiles
        .get(profile_id)
        .ok_or_else(|| CoreError::NotFound(format!("profile '{profile_id}'")))?;
    let token = services.sessions.issue_token();
    services.sessions.connect(&token, &profile).await?;
    Ok(token)
}

async fn run_info(services: &Services, profile_id: &str) -> Result<(), CoreError> {
    let token = open_session(services, profile_id).await?;
    let info = services.sessions.server_info(&token).await?;
    let mut fields: Vec<_> = info.into_iter().collect();
    fields.sort();
    for (key, value) in fields {
        println!("{key}: {value}");
    }
    Ok(())
}

async fn run_delete(
    services: &Services,
    profile_id: &str,
    pattern: String,
    batch: Option<usize>,
    resume: Option<String>,
) -> Result<(), CoreError> {
    let token = open_session(services, profile_id).await?;
    let handle = services.sessions.require_connection(&token).await?;
    let batch = batch.unwrap_or_else(|| services.config.delete_batch_size());

    let mut job = BulkDelete::new(handle, pattern, batch)?;
    if let Some(cursor) = resume {
        job = job.resume_from(cursor);
    }
    let operation_id = new_operation_id();
    let operation = services.operations.register(&operation_id)?;
    info!("Started operation {} (Ctrl-C to cancel)", operation_id);

    let mut task = job.spawn(operation);
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            match services.operations.mark_cancelled(&operation_id) {
                Ok(()) => info!("Cancellation requested, finishing the current batch"),
                Err(e) => warn!("Could not cancel: {}", e),
            }
            task.await
        }
    };
    let operation = joined
        .map_err(|e| CoreError::Unavailable(format!("delete task aborted: {e}")))??;
    println!("{}", serde_json::to_string_pretty(&operation)?);
    Ok(())
}

async fn run_monitor(
    services: &Services,
    profile_id: &str,
    period: MetricPeriod,
    rounds: u32,
) -> Result<(), CoreError> {
    let token = open_session(services, profile_id).await?;
    let handle = services.sessions.require_connection(&token).await?;
    let poller = services.telemetry();

    for round in 1..=rounds {
        let stored = poller.sample(&handle).await;
        info!("Round {}/{}: {} metrics recorded", round, rounds, stored);
        if round < rounds {
            tokio::time::sleep(services.config.sample_interval()).await;
        }
    }

    let history = services
        .metrics
        .get_all_metrics_history(handle.connection_id(), period);
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}
