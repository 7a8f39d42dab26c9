use clap::Parser as _;
use led485_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_FILTER_VARIABLE: &str = "LED485_TOOLS_LOG";

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Setup(commands::setup::Args),
    Write(commands::write::Args),
    Registers(commands::registers::Args),
}

#[derive(thiserror::Error, Debug)]
#[error("could not parse the LED485_TOOLS_LOG filter `{1}`")]
struct LogFilterError(#[source] tracing_subscriber::filter::ParseError, String);

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn init_logging() -> Result<(), LogFilterError> {
    let filter_description =
        std::env::var(LOG_FILTER_VARIABLE).unwrap_or_else(|_| "warn".to_string());
    let filter = filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .map_err(|e| LogFilterError(e, filter_description.clone()))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

fn main() {
    if let Err(e) = init_logging() {
        return end(Err(e));
    }
    match Commands::parse() {
        Commands::Setup(args) => end(commands::setup::run(args)),
        Commands::Write(args) => end(commands::write::run(args)),
        Commands::Registers(args) => end(commands::registers::run(args)),
    }
}
