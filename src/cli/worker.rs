use super::Host;
use crate::prelude::*;
use crate::supervisor::SPAWNED_LINE_PREFIX;
use clap::Args;
use host_shared::bridge::ResponsePayload;
use host_shared::events::OutputPayload;
use std::io::Write;
use std::path::PathBuf;

fn parse_env_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The directory the worker is started in, relative to the application root
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable for the worker, can be repeated
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_assignment)]
    pub env: Vec<(String, String)>,

    /// The worker program. An empty string runs the configured worker entry
    pub program: String,

    /// Arguments passed to the worker
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Run one worker to completion, forwarding its output to ours.
///
/// Ctrl-C cancels the worker. Fails unless the worker exited with 0 or printed the completion
/// marker.
pub async fn run(args: RunArgs, host: Host) -> Result<()> {
    let Host {
        handlers,
        mut events,
        ..
    } = host;

    let response = handlers.execute_worker(
        args.program,
        args.args,
        args.env.into_iter().collect(),
        args.cwd,
    );
    let ResponsePayload::Worker { process_id } = response.payload else {
        bail!(
            "{}",
            response
                .error
                .unwrap_or_else(|| "Failed to start the worker".into())
        );
    };
    debug!("Started worker {process_id}");

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.output.recv() => {
                let Some(event) = event else {
                    bail!("Lost track of worker {process_id}");
                };
                match event.payload {
                    OutputPayload::Stdout { data } if data.starts_with(SPAWNED_LINE_PREFIX) => {
                        debug!("{}", data.trim_end());
                    }
                    OutputPayload::Stdout { data } => {
                        let mut stdout = std::io::stdout().lock();
                        stdout.write_all(data.as_bytes())?;
                        stdout.flush()?;
                    }
                    OutputPayload::Stderr { data } => eprint!("{data}"),
                    OutputPayload::Exit { code, completion_detected } => {
                        if completion_detected || code == Some(0) {
                            info!("Migration complete");
                            return Ok(());
                        }
                        if interrupted {
                            bail!("Worker cancelled");
                        }
                        match code {
                            Some(code) => bail!("Worker exited with code {code}"),
                            None => bail!("Worker was killed before completing the migration"),
                        }
                    }
                    OutputPayload::Error { data } => bail!("{data}"),
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, cancelling worker {process_id}");
                interrupted = true;
                handlers.cancel_worker(&process_id);
            }
        }
    }
}
