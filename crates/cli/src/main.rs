use clap::Parser;
use ocipull_cli::cli::{Cli, parse_exit_code};
use ocipull_cli::tracing::init_tracing;
use ocipull_cli::{PipelineError, PullConfig, pipeline};
use ocipull_oci::HttpFetcher;
use std::process::ExitCode;
use tracing::warn;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_exit_code(e.kind()));
        }
    };

    if let Err(e) = init_tracing(cli.tracing_config()) {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("{e:?}");
        }
        return ExitCode::FAILURE;
    }

    let config = PullConfig::from(cli);

    // One HTTP stack for the whole run, dropped before exit.
    let http = match HttpFetcher::new() {
        Ok(http) => http,
        Err(source) => return report(PipelineError::HttpClient { source }),
    };

    match pipeline::run(&http, &config).await {
        Ok(summary) => {
            if !summary.is_complete() {
                warn!(
                    failed_layers = summary.layers_failed,
                    failed_entries = summary.entries_failed,
                    "Image was only partially extracted"
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => report(e),
    }
}

fn report(err: PipelineError) -> ExitCode {
    #[allow(clippy::print_stderr)]
    {
        eprintln!("{:?}", miette::Report::new(err));
    }
    ExitCode::FAILURE
}
