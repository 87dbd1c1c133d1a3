use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use llmgateway_core::{
    GatewayCacheConfig, GatewayContext, HealthStatus, RedisKvStore, SqliteBackingStore,
};

#[path = "llmgateway_worker/cli.rs"]
mod cli;

use cli::{DrainArgs, WorkerCliArgs, WorkerCommand};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = WorkerCliArgs::parse();

    #[cfg(feature = "otel")]
    let _otel_guard = if args.otel {
        Some(llmgateway_core::telemetry::init_otel_tracing(
            "llmgateway-worker",
            args.otel_endpoint.as_deref(),
            args.json_logs,
        )?)
    } else {
        llmgateway_core::telemetry::init_tracing(args.json_logs)?;
        None
    };
    #[cfg(not(feature = "otel"))]
    llmgateway_core::telemetry::init_tracing(args.json_logs)?;

    let mut config = match args.config.as_deref() {
        Some(path) => GatewayCacheConfig::load(path).await?,
        None => GatewayCacheConfig::default(),
    };
    if let Some(prefix) = args.redis_prefix.clone() {
        config.redis_prefix = prefix;
    }
    config.validate()?;

    let redis_url = args
        .redis_url
        .clone()
        .or_else(|| std::env::var("REDIS_URL").ok())
        .filter(|url| !url.trim().is_empty())
        .ok_or("missing redis url: pass --redis or set LLMGATEWAY_REDIS_URL / REDIS_URL")?;
    let kv = RedisKvStore::new(&redis_url)?.with_prefix(config.redis_prefix.clone());

    let backing = Arc::new(SqliteBackingStore::new(&args.sqlite_path));
    backing.init().await?;

    let ctx = GatewayContext::new(Arc::new(kv), backing.clone(), config);

    match args.command {
        WorkerCommand::Ping => {
            let report = ctx.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status != HealthStatus::Ok {
                return Err("healthcheck failed".into());
            }
        }
        WorkerCommand::Drain(drain) => run_drain(&ctx, backing.as_ref(), &drain).await?,
    }

    Ok(())
}

async fn run_drain(
    ctx: &GatewayContext,
    sink: &SqliteBackingStore,
    args: &DrainArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let batch_size = args.max.unwrap_or(ctx.config().drain_batch_size).max(1);

    let Some(interval_ms) = args.loop_interval_ms else {
        let total = ctx.drain_usage_queue(sink, batch_size).await?;
        tracing::info!(total, queue = ctx.usage_queue().name(), "usage queue drained");
        return Ok(());
    };

    let interval = Duration::from_millis(interval_ms);
    tracing::info!(
        batch_size,
        interval_ms,
        queue = ctx.usage_queue().name(),
        "usage worker started"
    );
    loop {
        if let Err(err) = ctx.drain_usage_queue(sink, batch_size).await {
            tracing::error!(error = %err, "failed to persist usage batch");
        }
        tokio::time::sleep(interval).await;
    }
}
