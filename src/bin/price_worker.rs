//! # Price Worker
//!
//! One-shot worker process launched by the pool. Reads its `WorkerContext`
//! as JSON from stdin, prices the chunk, writes the results through the dual
//! store, and reports progress as JSON lines on stdout. Logs go to stderr.

use pricefeed_core::ingestion::{
    PriceClient, PriceWorker, WorkerContext, WorkerMessage, WorkerReport,
};
use pricefeed_core::logging::init_worker_logging;
use pricefeed_core::resilience::CircuitBreaker;
use pricefeed_core::store::DualStore;
use pricefeed_core::PricefeedResult;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_worker_logging();

    let context = match read_context().await {
        Ok(context) => context,
        Err(e) => fail(&e.to_string()),
    };

    match run(&context).await {
        Ok(report) => {
            info!(
                worker_id = %context.worker_id,
                updated = report.updated,
                failed = report.failed,
                "Worker finished"
            );
        }
        Err(e) => {
            error!(worker_id = %context.worker_id, error = %e, "Worker failed");
            fail(&e.to_string());
        }
    }
}

async fn read_context() -> PricefeedResult<WorkerContext> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    Ok(WorkerContext::from_json(&input)?)
}

async fn run(context: &WorkerContext) -> PricefeedResult<WorkerReport> {
    let settings = &context.settings;
    let prices = PriceClient::new(&settings.price_api)?;
    let request_delay = prices.request_delay();

    let store = DualStore::connect(&settings.store, &settings.circuit_breaker);
    let mut worker = PriceWorker::new(prices, store.clone(), settings.update_attempts)
        .with_request_delay(request_delay);
    let breaker = settings.circuit_breaker.enabled.then(|| {
        Arc::new(CircuitBreaker::new(
            "price_api".to_string(),
            settings.circuit_breaker.to_resilience_config(),
        ))
    });
    if let Some(breaker) = &breaker {
        worker = worker.with_breaker(Arc::clone(breaker));
    }

    let result = worker
        .process_chunk(&context.worker_id, &context.chunk, emit)
        .await;
    store.close().await;

    if let Some(breaker) = &breaker {
        let metrics = breaker.metrics();
        info!(
            worker_id = %context.worker_id,
            lookups = metrics.total_calls,
            failure_rate = metrics.failure_rate,
            breaker_state = ?metrics.current_state,
            "Price API breaker summary"
        );
    }
    Ok(result?)
}

fn emit(message: WorkerMessage) {
    match message.to_line() {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
        Err(e) => error!(error = %e, "Could not encode worker message"),
    }
}

fn fail(reason: &str) -> ! {
    emit(WorkerMessage::Failed {
        reason: reason.to_string(),
    });
    process::exit(1);
}
