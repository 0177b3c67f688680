#![allow(clippy::cognitive_complexity)]
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

mod startup_health;

use external_api::{ExternalApi, Health};
use garden_core::{
    GardenContext,
    config::{
        cli::{self, Parser},
        trace,
    },
    garden_coordination::CoordinationError,
    tokio::{self, runtime::Builder, signal, task::JoinHandle},
    tracing::*,
};
use startup_health::verify_background_task_running;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    // .env has to be loaded before clap reads the environment
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.garden_log, &config.log_format)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => error!(?err, "failed to start garden"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config) -> Result<()> {
    info!(backend = %config.backend_url, party = ?config.party, "starting garden");
    let ctx = Arc::new(GardenContext::from_config(&config)?);

    let token = CancellationToken::new();
    let api = ExternalApi::new(config.external_api, Arc::clone(&ctx));
    let api_sender = api.sender();
    let mut api_task = api.start(token.clone());

    // health stays BAD until the api is up and the store has answered
    if let Err(err) = verify_background_task_running("external API", &mut api_task).await {
        token.cancel();
        ctx.stop().await;
        return Err(err);
    }

    let signal_task = tokio::spawn(shutdown_signal(token.clone()));
    let bootstrap_task = spawn_bootstrap_task(Arc::clone(&ctx));

    let bootstrapped = tokio::select! {
        res = flatten(bootstrap_task) => Some(res),
        _ = token.cancelled() => None,
    };
    match bootstrapped {
        Some(Ok(probes)) => {
            debug!(probes, "changing health to good after bootstrap");
            api_sender
                .send(Health::Good)
                .await
                .context("error occurred in changing health status to Good")?;
            token.cancelled().await;
        }
        Some(Err(err)) => {
            let _ = api_sender.send(Health::Bad).await;
            token.cancel();
            ctx.stop().await;
            return Err(err);
        }
        None => debug!("shutdown requested before bootstrap finished"),
    }

    info!("shutting down");
    let _ = api_sender.send(Health::Bad).await;
    ctx.stop().await;
    if let Err(err) = api_task.await {
        error!(?err, "error waiting for web server API");
    }
    match signal_task.await {
        Ok(Err(err)) => warn!(?err, "signal handler failed"),
        Err(err) => warn!(?err, "error waiting for signal handler"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

fn spawn_bootstrap_task(ctx: Arc<GardenContext>) -> JoinHandle<Result<u32>> {
    tokio::spawn(async move {
        match ctx.bootstrap().await {
            Ok(probes) => {
                info!(probes, party = ?ctx.party(), "garden ready");
                Ok(probes)
            }
            Err(CoordinationError::Cancelled) => Err(anyhow!("bootstrap cancelled")),
            Err(err) => Err(anyhow!(err).context("bootstrap failed")),
        }
    })
}

async fn flatten<T>(handle: JoinHandle<Result<T, anyhow::Error>>) -> Result<T, anyhow::Error> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(err) => Err(anyhow!(err)),
    }
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    token.cancel();
    ret
}
