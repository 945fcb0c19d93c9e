// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

// Guardian key generation tool

use anyhow::Result;
use clap::{Parser, Subcommand};
use ethers::signers::Signer;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "guardian-keygen")]
#[command(about = "Generate secp256k1 keys for deposit guardians", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new guardian key
    Generate {
        /// Output file path for the generated key
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the address of an existing key file
    Examine {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { output } => {
            if output.exists() {
                return Err(anyhow::anyhow!(
                    "Refusing to overwrite existing key file {:?}",
                    output
                ));
            }
            let address =
                guardian_keys::keygen::generate_guardian_key_and_write_to_file(&output)?;
            println!("Guardian key generated: {:?}", output);
            // Stable format for automation: "Ethereum address: 0x..."
            println!("Ethereum address: {:?}", address);
        }
        Commands::Examine { path } => {
            let wallet = guardian_keys::keypair_file::read_key(&path)?;
            println!("Ethereum address: {:?}", wallet.address());
        }
    }

    Ok(())
}
