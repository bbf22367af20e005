//! CardsLawp CLI - Database migrations and catalog tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! cardslawp-cli migrate
//!
//! # Validate a catalog file before deploying it
//! cardslawp-cli catalog check catalog.json --currency USD
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `catalog check` - Parse and validate a catalog JSON file

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cardslawp_core::CurrencyCode;

mod commands;

#[derive(Parser)]
#[command(name = "cardslawp-cli")]
#[command(author, version, about = "CardsLawp CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Catalog tools
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Parse and validate a catalog file
    Check {
        /// Path to the catalog JSON file
        path: PathBuf,

        /// Currency every product must be priced in
        #[arg(short, long, default_value = "USD")]
        currency: CurrencyCode,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Catalog { action } => match action {
            CatalogAction::Check { path, currency } => {
                let summary = commands::catalog::check(&path, currency)?;
                if let Some((min, max)) = summary.price_range {
                    tracing::info!(
                        products = summary.products,
                        min_price_minor = min,
                        max_price_minor = max,
                        "Catalog summary"
                    );
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_catalog_check() {
        let cli = Cli::try_parse_from(["cardslawp-cli", "catalog", "check", "c.json", "-c", "EUR"]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Catalog {
                action: CatalogAction::Check {
                    currency: CurrencyCode::EUR,
                    ..
                }
            })
        ));
    }
}
