//! `marble status`: print a file's ingestion state.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::services::Services;

pub async fn run_status(config: &Config, file_id: &str) -> Result<()> {
    let services = Services::build(config).await?;
    let Some(file) = services.store.get_file(file_id).await? else {
        bail!("File not found: {}", file_id);
    };

    println!("File:       {} ({})", file.name, file.id);
    println!("Status:     {}", file.status);
    println!("Visibility: {}", file.visibility);
    println!("Attempts:   {}", file.attempts);
    println!("Generation: {}", file.active_generation);
    if file.deleted {
        println!("Deleted:    yes");
    }
    if let Some(err) = file.last_error {
        println!("Last error: {}", err);
    }
    Ok(())
}
