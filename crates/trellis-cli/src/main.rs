//! Trellis CLI entrypoint.

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(author, version, about = "Trellis pipeline runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Init => handlers::init().map(|()| 0),
        Commands::Validate { path } => handlers::validate(&path).map(|()| 0),
        Commands::Schema => handlers::schema().map(|()| 0),
        Commands::Run {
            path,
            branch,
            tag,
            expect_version,
            max_parallel,
            workspace,
            json,
        } => {
            handlers::run(handlers::RunArgs {
                path,
                branch,
                tag,
                expect_version,
                max_parallel,
                workspace,
                json,
            })
            .await
        }
    };

    let code = match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("error:").red().bold());
            2
        }
    };
    std::process::exit(code);
}
