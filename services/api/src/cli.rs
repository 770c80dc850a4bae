use crate::server;
use clap::{Args, Parser, Subcommand};
use tenant_screening::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Tenant Screening Service",
    about = "Order, track and reconcile tenant background checks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service with the embedded poll scheduler (default command)
    Serve(ServeArgs),
    /// Check a vendor account without storing it
    VerifyCredentials(VerifyCredentialsArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct VerifyCredentialsArgs {
    #[arg(long)]
    pub(crate) username: String,
    #[arg(long)]
    pub(crate) password: String,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::VerifyCredentials(args) => server::verify_credentials(args).await,
    }
}
