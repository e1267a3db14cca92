// `noetl cancel {id}`: request cancellation of a running execution.

use clap::Args;
use noetl_contracts::rest::{CancelRequest, CancelResponse};

use crate::client::{Client, ClientError};
use crate::output::{print_field, OutputFormat};

#[derive(Args)]
pub struct CancelArgs {
    /// Execution id
    pub execution_id: i64,

    /// Reason recorded on the cancellation event
    #[arg(long)]
    pub reason: Option<String>,
}

pub async fn run(args: CancelArgs, client: &Client, output: OutputFormat, quiet: bool) -> Result<(), ClientError> {
    let request = CancelRequest { reason: args.reason };
    let response: CancelResponse = client.post(&format!("/api/cancel/{}", args.execution_id), &request).await?;

    if output.is_text() {
        if quiet {
            println!("{}", response.execution_id);
        } else {
            println!("Cancellation accepted: {}", response.execution_id);
            print_field("Status", &response.status.to_string());
        }
    } else {
        output.print_value(&response);
    }

    Ok(())
}
