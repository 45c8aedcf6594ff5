//! Image processing HTTP server
//!
//! Background removal, canvas resize and PNG optimization over a JSON and
//! multipart API.

use image_processor::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
