mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use rideshare_kyc::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
