mod cli;
mod commands;
mod error;

use std::process::ExitCode;

use aggrex_core::{init_tracing, LogFormat};
use clap::Parser;

use crate::cli::{Cli, LogFormatArg};
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}", error_body(&error));
            ExitCode::from(error.exit_code())
        }
    }
}

fn error_body(error: &CliError) -> serde_json::Value {
    match error {
        CliError::Fetch(fetch) => serde_json::json!({
            "error": fetch.to_string(),
            "code": fetch.code(),
            "status": fetch.status_code(),
            "retry_after_ms": fetch
                .retry_after()
                .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
        }),
        other => serde_json::json!({ "error": other.to_string() }),
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let log_format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Json => LogFormat::Json,
    };
    init_tracing(&cli.log_level, log_format);

    let output = commands::run(&cli).await?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");

    Ok(ExitCode::SUCCESS)
}
