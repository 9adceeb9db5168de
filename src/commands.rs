//! Command execution.

use crate::Commands;
use colored::Colorize;
use mcs_client::{
    AppInfo, CheckinClient, ClientConfig, CredentialStore, Credentials, FileStore, McsClient,
    McsEvent, RegisterOptions, Registrar,
};
use std::sync::Arc;
use std::time::Duration;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub async fn execute(cmd: Commands, config: ClientConfig) -> CommandResult {
    let store = Arc::new(FileStore::open(&config.store_path)?);

    match cmd {
        Commands::Checkin => {
            let checkin = CheckinClient::from_config(&config)?;
            let credentials = checkin.refresh(store.as_ref()).await?;
            eprintln!(
                "{} as device {} (store: {})",
                "Checked in".green(),
                credentials.android_id.to_string().cyan(),
                config.store_path.display()
            );
            println!("{}", serde_json::to_string_pretty(&credentials)?);
        }

        Commands::Register {
            sender,
            app_id,
            instance_id,
            ttl,
        } => {
            let credentials = ensure_credentials(&config, &store, false).await?;
            let registrar = Registrar::from_config(credentials, &config)?;

            let mut options = RegisterOptions::default();
            if let (Some(app_id), Some(instance_id)) = (app_id, instance_id) {
                options = options.with_app(AppInfo {
                    app_id,
                    instance_id,
                });
            }
            if let Some(secs) = ttl {
                options = options.with_ttl(Duration::from_secs(secs));
            }

            let result = registrar.register(&sender, options).await?;
            eprintln!(
                "{} app {} for sender {}",
                "Registered".green(),
                result.app.app_id.cyan(),
                sender
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Unregister {
            sender,
            app_id,
            instance_id,
        } => {
            let credentials = ensure_credentials(&config, &store, false).await?;
            let registrar = Registrar::from_config(credentials, &config)?;
            let app = AppInfo {
                app_id,
                instance_id,
            };
            registrar.unregister(&sender, &app).await?;
            eprintln!(
                "{} app {} for sender {}",
                "Unregistered".green(),
                app.app_id.cyan(),
                sender
            );
        }

        Commands::Listen { checkin } => listen(config, store, checkin).await?,
    }

    Ok(())
}

/// Returns stored credentials, checking in first when there are none.
async fn ensure_credentials(
    config: &ClientConfig,
    store: &Arc<FileStore>,
    force: bool,
) -> Result<Credentials, Box<dyn std::error::Error>> {
    match store.credentials()? {
        Some(credentials) if credentials.is_valid() && !force => Ok(credentials),
        _ => {
            let checkin = CheckinClient::from_config(config)?;
            Ok(checkin.refresh(store.as_ref()).await?)
        }
    }
}

async fn listen(config: ClientConfig, store: Arc<FileStore>, force_checkin: bool) -> CommandResult {
    let credentials = ensure_credentials(&config, &store, force_checkin).await?;

    let refresher = CheckinClient::from_config(&config)?
        .spawn_periodic(Arc::clone(&store), config.checkin_interval());

    tracing::info!("Listening as device {}", credentials.android_id);
    tracing::info!("  Endpoint: {}:{}", config.host, config.port);
    tracing::info!("  Store: {}", config.store_path.display());

    let (handle, mut events) = McsClient::start(credentials, Arc::clone(&store), config)?;
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(McsEvent::Notification(n)) => {
                        println!("{}", serde_json::to_string(&n)?);
                    }
                    Some(McsEvent::Connected) => {
                        eprintln!("{}", "Connected".green());
                    }
                    Some(McsEvent::LoggedIn) => {
                        eprintln!("{}", "Logged in".green());
                    }
                    Some(McsEvent::Disconnected { reason }) => {
                        eprintln!("{}: {}", "Disconnected".yellow(), reason);
                    }
                    None => {
                        eprintln!("{}", "Client stopped".red());
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                break;
            }
        }
    }

    refresher.abort();
    handle.stop().await?;
    Ok(())
}
