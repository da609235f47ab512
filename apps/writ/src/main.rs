//! # writ - Policy-Governed Mutations
//!
//! The `writ` binary drives the mutation engine against a redb audit
//! database.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     apps/writ (THE BINARY)               │
//! │                                                          │
//! │  ┌─────────────┐    ┌────────────────┐                   │
//! │  │   CLI       │───▶│ MutationEngine │                   │
//! │  │  (clap)     │    │    (tokio)     │                   │
//! │  └──────┬──────┘    └───────┬────────┘                   │
//! │         │                   ▼                            │
//! │         │           ┌───────────────┐   ┌────────────┐   │
//! │         └──────────▶│   writ-core   │──▶│ writ.redb  │   │
//! │                     │  (THE LOGIC)  │   │  (audit)   │   │
//! │                     └───────────────┘   └────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! writ demo quota
//! writ history --state-id quota-1a2b3c4d --recent 5
//! writ verify --state-id quota-1a2b3c4d
//! writ export -o audit.wrhx
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // WRIT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("WRIT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "writ=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ██╗    ██╗██████╗ ██╗████████╗
  ██║    ██║██╔══██╗██║╚══██╔══╝
  ██║ █╗ ██║██████╔╝██║   ██║
  ██║███╗██║██╔══██╗██║   ██║
  ╚███╔███╔╝██║  ██║██║   ██║
   ╚══╝╚══╝ ╚═╝  ╚═╝╚═╝   ╚═╝

  Mutation Engine v{}

  Validated • Authorized • Audited
"#,
        env!("CARGO_PKG_VERSION")
    );
}
