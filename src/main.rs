//! Stream collector CLI entry point.

use stream_collector::cli::{self, Cli};
use stream_collector::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
