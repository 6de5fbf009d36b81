//! Simulation of several instances sharing one session over an in-memory domain

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use session_mesh::{
    ActivityKind, ActivitySource, LifecycleSource, MemoryDomain, MemoryStore, SessionConfig,
    SessionCoordinator, SessionSettings,
};

#[derive(Parser, Debug)]
#[command(
    name = "session-mesh-sim",
    about = "Run several session instances over one in-memory domain"
)]
struct Args {
    /// Number of instances to start
    #[arg(short, long, default_value_t = 3)]
    instances: usize,

    /// TOML file with session settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

struct SimInstance {
    coordinator: SessionCoordinator,
    activity: ActivitySource,
    lifecycle: LifecycleSource,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    anyhow::ensure!(args.instances > 0, "at least one instance is required");

    let settings = match &args.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            SessionSettings::from_toml_str(&source)
                .with_context(|| format!("Invalid settings in {}", path.display()))?
        }
        None => SessionSettings::default(),
    };

    let domain = MemoryDomain::new();
    let mut instances = Vec::with_capacity(args.instances);

    for index in 0..args.instances {
        let activity = ActivitySource::new();
        let lifecycle = LifecycleSource::new();
        let config = SessionConfig::new(settings.clone())
            .on_become_master(move || info!("[{}] became master", index))
            .on_session_timeout(move |reason| info!("[{}] session {}", index, reason));

        let coordinator = SessionCoordinator::builder(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(domain.connect()),
        )
        .with_activity(activity.clone())
        .with_lifecycle(lifecycle.clone())
        .build()?;

        coordinator.start();
        instances.push(SimInstance {
            coordinator,
            activity,
            lifecycle,
        });
    }
    settle().await;

    let master = &instances[0].coordinator;
    master.set_token("sim-token")?;
    master.set_item("user", &serde_json::json!({ "name": "sim" }))?;
    settle().await;
    report(&instances);

    if let Some(last) = instances.last() {
        last.activity.notify(ActivityKind::Click);
    }

    info!("Closing instance 0");
    instances[0].lifecycle.notify(());
    settle().await;
    report(&instances);

    if let Some(last) = instances.last() {
        last.coordinator.end();
    }
    settle().await;
    info!(
        "Live instances after end: {}",
        instances[0].coordinator.instances()
    );

    Ok(())
}

fn report(instances: &[SimInstance]) {
    for (index, instance) in instances.iter().enumerate() {
        let coordinator = &instance.coordinator;
        info!(
            "[{}] identity={:?} role={:?} token={:?} deadline={:?}",
            index,
            coordinator.identity(),
            coordinator.role(),
            coordinator.token::<String>(),
            coordinator.deadline()
        );
    }
}

/// Give driver tasks time to exchange broadcasts
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
