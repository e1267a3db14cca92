// `noetl status {id}`: fetch execution status, optionally waiting for a terminal state.

use clap::Args;
use noetl_contracts::event::EventStatus;
use noetl_contracts::rest::ExecutionStatusResponse;

use crate::client::{Client, ClientError};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Args)]
pub struct StatusArgs {
    /// Execution id
    pub execution_id: i64,

    /// Poll until the execution reaches a terminal state
    #[arg(long)]
    pub wait: bool,

    /// Poll interval in seconds when `--wait` is set
    #[arg(long, default_value = "2")]
    pub interval: u64,

    /// Max time to wait in seconds when `--wait` is set
    #[arg(long, default_value = "300")]
    pub timeout: u64,
}

/// Prints the execution's status and exits 0. `--wait` blocks until a
/// terminal state is observed or `--timeout` elapses; either way the
/// exit code reflects whether the status call itself succeeded, per
/// spec.md §6's control-surface exit-code contract (0/2/3/4/5) -- a
/// still-running execution is not an error.
pub async fn run(args: StatusArgs, client: &Client, output: OutputFormat) -> Result<(), ClientError> {
    let path = format!("/api/execution/{}", args.execution_id);

    let mut waited = 0u64;
    loop {
        let status: ExecutionStatusResponse = client.get(&path).await?;
        let terminal = is_terminal(status.status);

        if !args.wait || terminal || waited >= args.timeout {
            print_status(&status, output);
            return Ok(());
        }

        tokio::time::sleep(std::time::Duration::from_secs(args.interval)).await;
        waited += args.interval;
    }
}

fn is_terminal(status: EventStatus) -> bool {
    matches!(status, EventStatus::Completed | EventStatus::Failed | EventStatus::Cancelled)
}

fn print_status(status: &ExecutionStatusResponse, output: OutputFormat) {
    if output.is_text() {
        print_field("Execution", &status.execution_id.to_string());
        print_field("Catalog", &status.catalog_id.to_string());
        print_field("Status", &status.status.to_string());
        print_field("Started", &status.started_at.to_rfc3339());
        if let Some(ended) = status.ended_at {
            print_field("Ended", &ended.to_rfc3339());
        }
        if let Some(error) = &status.error {
            print_field("Error", error);
        }

        if !status.steps.is_empty() {
            println!();
            print_table_header(&[("STEP", 30), ("STATUS", 10), ("INDEX", 6)]);
            for step in &status.steps {
                print_table_row(&[
                    (&step.step, 30),
                    (&step.status.to_string(), 10),
                    (&step.current_index.map(|i| i.to_string()).unwrap_or_default(), 6),
                ]);
            }
        }
    } else {
        output.print_value(status);
    }
}
