//! Developer tooling for the artifact registry, in the spirit of a
//! `persist_tool`-style binary: small, offline, no server required.

use clap::{Parser, Subcommand};
use glaredb::types::TypeRegistry;

#[derive(Parser)]
#[command(name = "glaredb-tool")]
#[command(about = "Developer tooling for the glaredb artifact registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every registered artifact type.
    ListTypes,
    /// Print the Draft-4 JSON Schema for one artifact type.
    Schema {
        #[arg(long)]
        type_name: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let registry = TypeRegistry::bootstrap();

    match cli.command {
        Command::ListTypes => {
            for name in registry.list_types()?.keys() {
                println!("{name}");
            }
        }
        Command::Schema { type_name } => {
            let schema = registry.schema_of(&type_name)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}
