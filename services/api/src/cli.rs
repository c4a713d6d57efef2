use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use lead_dispatch::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Lead Dispatch Engine",
    about = "Score, assign and dispatch inbound service leads to local companies",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one lead through intake, qualification and dispatch against a sample directory
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Company directory CSV export loaded at startup
    #[arg(long)]
    pub(crate) companies_csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_accepts_a_directory_export() {
        let cli = Cli::try_parse_from([
            "lead-dispatch",
            "serve",
            "--port",
            "9090",
            "--companies-csv",
            "companies.csv",
        ])
        .expect("parse");

        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(9090));
                assert_eq!(args.companies_csv, Some(PathBuf::from("companies.csv")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn demo_rejects_the_sample_contact_by_default() {
        let cli = Cli::try_parse_from(["lead-dispatch", "demo"]).expect("parse");

        match cli.command {
            Some(Command::Demo(args)) => {
                assert_eq!(args.rejected, vec!["contact@cuvelier.example".to_string()]);
                assert_eq!(args.postal_code, "67500");
                assert!(!args.include_spam);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
