mod cli;
mod infra;
mod routes;
mod server;

use tenant_screening::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
