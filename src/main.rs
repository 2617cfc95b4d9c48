use anyhow::{anyhow, Context as _};
use postergen::{
    api, config::Config, generation::reconcile_pending, init_tracing, AppState, VERSION,
};
use std::{env::args, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("error loading .env: {}", error);
        }
    }

    match args().nth(1).as_deref() {
        Some("version") => {
            println!("postergen v{VERSION}");
        }
        Some("reconcile") => {
            let config = Config::from_env().context("error loading config")?;
            init_tracing(&config);
            let state = AppState::new(config)?;
            let report = reconcile_pending(
                &state.db,
                state.objects.as_ref(),
                state.config.pending_grace(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some("serve") | None => {
            let config = Config::from_env().context("error loading config")?;
            init_tracing(&config);
            serve(AppState::new(config)?).await?;
        }
        Some(_) => {
            return Err(anyhow!("usage: postergen <serve | reconcile | version>"));
        }
    }
    Ok(())
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    // Orphans from a previous run are swept before taking traffic
    match reconcile_pending(&state.db, state.objects.as_ref(), state.config.pending_grace()).await
    {
        Ok(report) if report.examined > 0 => {
            info!(removed = report.removed, "Recovered unsettled posters from previous run")
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Startup reconciliation failed"),
    }
    let maintenance = tokio::spawn(run_maintenance(state.clone()));

    let listener = TcpListener::bind(("0.0.0.0", state.config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", state.config.http_port))?;
    info!(
        port = state.config.http_port,
        version = VERSION,
        "postergen listening"
    );

    axum::serve(listener, api::routes(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    info!("Server stopped");
    Ok(())
}

/// Periodic pending sweep and rate limiter pruning
async fn run_maintenance(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.reconcile_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and startup already swept
    interval.tick().await;

    loop {
        interval.tick().await;
        state.limiter.cleanup();
        if let Err(e) =
            reconcile_pending(&state.db, state.objects.as_ref(), state.config.pending_grace())
                .await
        {
            error!(error = %e, "Periodic reconciliation failed");
        }
    }
}

async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    let sigterm = sigterm.recv();
    let sigint = sigint.recv();
    futures::pin_mut!(sigterm, sigint);
    futures::future::select(sigterm, sigint).await;
    info!("Received shutdown signal");
}
