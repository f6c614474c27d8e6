/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use courier_agent::cli::{commands, parse_cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli = parse_cli();

    match cli.command {
        Commands::Start => {
            commands::start(cli.config).await?;
        }
        Commands::Identity => {
            commands::identity(cli.config)?;
        }
        Commands::Bundle { source, output } => {
            commands::bundle(&source, &output)?;
        }
    }

    Ok(())
}
