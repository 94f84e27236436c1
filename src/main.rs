//! iotpulse CLI entry point.

use iotpulse_lib::cli::{self, Cli};
use iotpulse_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
