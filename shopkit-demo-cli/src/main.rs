//! Shopkit Demo CLI
//!
//! Command-line interface for exercising the Shopkit storefront against a
//! simulated payment provider.

use anyhow::Result;
use clap::{Parser, Subcommand};
use shopkit_lib::UserId;
use std::path::PathBuf;

mod catalog;
mod commands;
mod ui;

use commands::balance::Adjustment;

#[derive(Parser)]
#[command(name = "shopkit-demo")]
#[command(about = "Shopkit Demo CLI - Drive purchase flows against a simulated provider", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom storage directory (can also be set via SHOPKIT_DEMO_DIR env var)
    #[arg(long, global = true, env = "SHOPKIT_DEMO_DIR")]
    storage_dir: Option<String>,

    /// Catalog file (JSON); the built-in catalog is used when absent
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered currencies and purchases
    Catalog,

    /// Show a user's balances, optionally changing one
    Balance {
        /// User id
        #[arg(short, long, default_value = "1")]
        user: u64,

        #[command(subcommand)]
        action: Option<BalanceAction>,
    },

    /// Run a purchase flow and answer its prompt
    Buy {
        /// Registered purchase name (e.g. "Gems:100")
        purchase: String,

        /// User id
        #[arg(short, long, default_value = "1")]
        user: u64,

        /// Cancel the prompt instead of buying
        #[arg(long)]
        decline: bool,

        /// Go through the user's purchase queue
        #[arg(long)]
        queue: bool,
    },

    /// Deliver a receipt for a product
    Receipt {
        /// Product id
        product: u64,

        /// User id
        #[arg(short, long, default_value = "1")]
        user: u64,

        /// Provider purchase id; a fresh one is generated when absent
        #[arg(long)]
        purchase_id: Option<String>,
    },

    /// Run the scripted scenario in scratch storage
    Scenario,
}

#[derive(Subcommand)]
enum BalanceAction {
    /// Add to a balance
    Grant { currency: String, amount: i64 },

    /// Deduct from a balance
    Spend { currency: String, amount: i64 },

    /// Overwrite a balance
    Set { currency: String, amount: i64 },
}

impl BalanceAction {
    fn split(&self) -> (&str, Adjustment) {
        match self {
            Self::Grant { currency, amount } => (currency.as_str(), Adjustment::Grant(*amount)),
            Self::Spend { currency, amount } => (currency.as_str(), Adjustment::Spend(*amount)),
            Self::Set { currency, amount } => (currency.as_str(), Adjustment::Set(*amount)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("shopkit_demo_cli=debug,shopkit_lib=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("shopkit_demo_cli=info,shopkit_lib=warn")
            .init();
    }

    // Setup storage directory
    let storage_dir = if let Some(dir) = cli.storage_dir {
        PathBuf::from(dir)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shopkit-demo")
    };

    let catalog = catalog::CatalogConfig::load(cli.catalog.as_deref())?;

    // Dispatch commands
    match cli.command {
        Commands::Catalog => {
            commands::catalog::run(&catalog, cli.verbose)?;
        }
        Commands::Balance { user, action } => {
            let change = action.as_ref().map(BalanceAction::split);
            commands::balance::run(&storage_dir, &catalog, UserId(user), change).await?;
        }
        Commands::Buy {
            purchase,
            user,
            decline,
            queue,
        } => {
            commands::buy::run(
                &storage_dir,
                &catalog,
                UserId(user),
                &purchase,
                decline,
                queue,
                cli.verbose,
            )
            .await?;
        }
        Commands::Receipt {
            product,
            user,
            purchase_id,
        } => {
            commands::receipt::run(&storage_dir, &catalog, UserId(user), product, purchase_id)
                .await?;
        }
        Commands::Scenario => {
            commands::scenario::run(&storage_dir, cli.verbose).await?;
        }
    }

    Ok(())
}
