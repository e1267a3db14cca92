// Worker main loop: lease, spawn a heartbeat renewal for the duration
// of the run, execute the pipeline, emit the step boundary event, and
// report the queue outcome. `run_pipeline` reaching a StepDone or
// StepFailed is a queue *success* (the lease did its job); only an
// error talking to the API at all is a queue-level failure, which is
// reported retryable so the reaper/another worker can pick it back up.

use std::sync::Arc;
use std::time::Duration;

use noetl_contracts::event::{EventEnvelope, EventStatus, EventType};
use noetl_core::traits::ToolRegistry;
use serde_json::json;
use tracing::{error, info, warn};

use crate::client::ApiClient;
use crate::config::WorkerConfig;
use crate::pipeline::{run_pipeline, PipelineOutcome};

pub async fn run(config: WorkerConfig, registry: Arc<dyn ToolRegistry>) -> anyhow::Result<()> {
    let client = Arc::new(ApiClient::new(config.api_base_url.clone()));
    info!(worker_id = %config.worker_id, api_base_url = %config.api_base_url, "worker starting");

    loop {
        let items = match client.lease(&config.worker_id, config.max_items, config.lease_seconds).await {
            Ok(items) => items,
            Err(err) => {
                warn!(%err, "lease request failed, backing off");
                tokio::time::sleep(Duration::from_secs(config.poll_interval_seconds)).await;
                continue;
            }
        };

        if items.is_empty() {
            tokio::time::sleep(Duration::from_secs(config.poll_interval_seconds)).await;
            continue;
        }

        for item in items {
            let client = client.clone();
            let registry = registry.clone();
            let config = config.clone();
            tokio::spawn(async move {
                run_one(client, registry, config, item).await;
            });
        }
    }
}

async fn run_one(client: Arc<ApiClient>, registry: Arc<dyn ToolRegistry>, config: WorkerConfig, item: noetl_contracts::queue::QueueItem) {
    let queue_id = item.queue_id;
    let worker_id = config.worker_id.clone();
    let heartbeat_interval = config.heartbeat_interval_seconds;
    let lease_seconds = config.lease_seconds;

    let heartbeat_handle = {
        let heartbeat_client = client.clone();
        let worker_id = worker_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(heartbeat_interval)).await;
                if let Err(err) = heartbeat_client.heartbeat(queue_id, &worker_id, lease_seconds).await {
                    warn!(%err, queue_id, "heartbeat failed");
                }
            }
        })
    };

    let result = run_pipeline(client.as_ref(), registry.as_ref(), item.execution_id, item.catalog_id, &item.payload).await;
    heartbeat_handle.abort();

    match result {
        Ok(PipelineOutcome::StepDone { result, ctx }) => {
            if let Err(err) = client
                .emit_event(EventEnvelope {
                    execution_id: item.execution_id,
                    catalog_id: item.catalog_id,
                    parent_event_id: None,
                    node_id: None,
                    node_name: Some(item.step.clone()),
                    event_type: EventType::StepDone,
                    status: EventStatus::Completed,
                    timestamp: None,
                    current_index: item.payload.current_index,
                    attempt: Some(item.payload.attempt),
                    context: Some(ctx),
                    result: Some(result),
                    meta: None,
                })
                .await
            {
                error!(%err, queue_id, "failed to emit step.done");
            }
            if let Err(err) = client.complete(queue_id, &worker_id).await {
                error!(%err, queue_id, "failed to mark queue item complete");
            }
        }
        Ok(PipelineOutcome::StepFailed { error: outcome_error, ctx }) => {
            if let Err(err) = client
                .emit_event(EventEnvelope {
                    execution_id: item.execution_id,
                    catalog_id: item.catalog_id,
                    parent_event_id: None,
                    node_id: None,
                    node_name: Some(item.step.clone()),
                    event_type: EventType::StepFailed,
                    status: EventStatus::Failed,
                    timestamp: None,
                    current_index: item.payload.current_index,
                    attempt: Some(item.payload.attempt),
                    context: Some(ctx),
                    result: None,
                    meta: Some(json!({ "error": outcome_error })),
                })
                .await
            {
                error!(%err, queue_id, "failed to emit step.failed");
            }
            if let Err(err) = client.complete(queue_id, &worker_id).await {
                error!(%err, queue_id, "failed to mark queue item complete after step failure");
            }
        }
        Err(err) => {
            error!(%err, queue_id, "pipeline execution crashed");
            if let Err(err) = client.fail(queue_id, &worker_id, &err.to_string(), true).await {
                error!(%err, queue_id, "failed to mark queue item failed");
            }
        }
    }
}
