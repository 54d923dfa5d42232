//! This file defines the iotile-analytics binary entry point.

use std::process::ExitCode;

use serde_json::Value;

use iotile_analytics::array;
use iotile_analytics::cache::CacheRegistry;
use iotile_analytics::cli::{self, CommandLineArgs};
use iotile_analytics::envelope;
use iotile_analytics::error::{log_error, CloudError};
use iotile_analytics::metrics;
use iotile_analytics::progress::TracingProgress;
use iotile_analytics::request::{QueryArgs, QueryValue};
use iotile_analytics::session::CloudSession;
use iotile_analytics::tracing;

/// Fetch the requested resource and render the output document.
async fn run(args: &CommandLineArgs) -> Result<Value, CloudError> {
    let registry = CacheRegistry::new();
    let session = CloudSession::connect(args.session_config(), &registry).await?;
    let mut query = QueryArgs::new();
    if let Some(filter) = &args.filter {
        query.insert("filter".to_string(), QueryValue::Str(filter.clone()));
    }
    let progress = TracingProgress::new(format!("Fetching {}", args.resource));
    let records = session
        .fetch_all(&args.resource, args.page_size, &query, &progress)
        .await?;
    if !args.envelope {
        return Ok(Value::Array(records));
    }

    let (points, skipped) = array::points_from_records(&records, &args.x_field, &args.y_field)?;
    if skipped > 0 {
        ::tracing::warn!(
            "Skipped {} of {} records without numeric {} and {} fields",
            skipped,
            records.len(),
            args.x_field,
            args.y_field
        );
    }
    let table = envelope::envelope(&[points.view()], &args.envelope_options())?;
    let rows: Vec<Value> = table
        .rows()
        .into_iter()
        .map(|row| Value::from(row.to_vec()))
        .collect();
    Ok(Value::Array(rows))
}

/// Application entry point
#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(error) = metrics::register_metrics() {
        ::tracing::warn!("Failed to register metrics: {}", error);
    }
    match run(&args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(error) => {
            log_error(&error);
            ExitCode::FAILURE
        }
    }
}
