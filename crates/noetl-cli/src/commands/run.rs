// `noetl run`: submit a playbook for execution.

use clap::Args;
use noetl_contracts::rest::{RunPlaybookRequest, RunPlaybookResponse};

use crate::client::{Client, ClientError};
use crate::output::{print_field, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Path to a playbook YAML file
    #[arg(long, short)]
    pub file: String,

    /// Workload JSON seeding the execution's initial context
    #[arg(long)]
    pub workload: Option<String>,

    /// Catalog id to associate with this execution (a new one is minted if omitted)
    #[arg(long)]
    pub catalog_id: Option<i64>,
}

pub async fn run(args: RunArgs, client: &Client, output: OutputFormat, quiet: bool) -> Result<(), ClientError> {
    let playbook = std::fs::read_to_string(&args.file)
        .map_err(|e| ClientError::Validation(format!("failed to read {}: {e}", args.file)))?;
    let workload = match args.workload {
        Some(raw) => {
            serde_json::from_str(&raw).map_err(|e| ClientError::Validation(format!("--workload must be valid JSON: {e}")))?
        }
        None => serde_json::Value::Null,
    };

    let request = RunPlaybookRequest {
        playbook: Some(playbook),
        catalog_id: args.catalog_id,
        path: None,
        workload,
        parent_execution_id: None,
    };

    let response: RunPlaybookResponse = client.post("/api/run/playbook", &request).await?;

    if output.is_text() {
        if quiet {
            println!("{}", response.execution_id);
        } else {
            println!("Execution started: {}", response.execution_id);
            print_field("Catalog", &response.catalog_id.to_string());
            print_field("Status", &response.status.to_string());
        }
    } else {
        output.print_value(&response);
    }

    Ok(())
}
