use super::Host;
use crate::local_logger::{clean_logger, start_progress_bar, update_progress_bar};
use crate::prelude::*;
use clap::Args;
use host_shared::bridge::ResponsePayload;
use host_shared::events::{ProgressEvent, ProgressKind, ProgressStatus};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// The archive to extract (.zip or .tar.gz)
    pub archive: PathBuf,

    /// Where to extract the archive. Defaults to a new folder in the system temp directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Mirror extraction progress on the progress bar until the extraction ends.
async fn render_progress(progress: &mut UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = progress.recv().await {
        if event.kind != ProgressKind::Extraction {
            continue;
        }
        match event.status {
            ProgressStatus::Starting => {
                start_progress_bar(&event.message);
                info!("{}", event.message);
            }
            ProgressStatus::Progress => {
                update_progress_bar(event.percentage.unwrap_or_default(), &event.message);
            }
            ProgressStatus::Complete | ProgressStatus::Error => {
                clean_logger();
                return;
            }
        }
    }
}

pub async fn run(args: ExtractArgs, host: Host) -> Result<()> {
    let Host {
        handlers,
        mut events,
        ..
    } = host;

    start_group!(format!("Extracting {}", args.archive.display()));
    let (response, _) = tokio::join!(
        handlers.extract_archive(&args.archive, args.output.as_deref()),
        render_progress(&mut events.progress),
    );
    end_group!();

    match response.payload {
        ResponsePayload::Extraction {
            output_folder,
            anchor_found,
            warning,
        } => {
            if let Some(warning) = warning {
                warn!("{warning}");
            }
            if anchor_found {
                info!("Found the archive data in {}", output_folder.display());
            }
            println!("{}", output_folder.display());
            Ok(())
        }
        _ => bail!(
            "{}",
            response
                .error
                .unwrap_or_else(|| "Extraction failed".into())
        ),
    }
}
