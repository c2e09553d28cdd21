use std::{fs, path::PathBuf, process};

use aviary_signer::{decode_ss58, AllowlistSigner};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "aviary-signer", version, about = "Produce allowlist authorizations for the Aviary drop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the signer address to install on chain via `set_allowlist_signer`.
    Address {
        /// Hex-encoded 32-byte secret key.
        #[arg(long)]
        key: String,
    },
    /// Sign wallet addresses and emit the authorization set as JSON.
    Sign {
        /// Hex-encoded 32-byte secret key.
        #[arg(long)]
        key: String,
        /// SS58 wallet addresses to authorize.
        #[arg(required = true)]
        wallets: Vec<String>,
        /// Write the JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct Authorization {
    wallet: String,
    signature: String,
}

#[derive(Serialize)]
struct AllowlistFile {
    signer: String,
    authorizations: Vec<Authorization>,
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Address { key } => {
            let signer = AllowlistSigner::from_hex(&key)?;
            println!("{}", signer.address_hex());
        }
        Command::Sign { key, wallets, out } => {
            let signer = AllowlistSigner::from_hex(&key)?;

            let mut authorizations = Vec::with_capacity(wallets.len());
            for wallet in wallets {
                let account_id = decode_ss58(&wallet)?;
                let signature = signer.sign_wallet(&account_id);
                authorizations.push(Authorization {
                    wallet,
                    signature: format!("0x{}", hex::encode(signature)),
                });
            }

            let file = AllowlistFile { signer: signer.address_hex(), authorizations };
            let json = serde_json::to_string_pretty(&file)?;
            match out {
                Some(path) => fs::write(path, json)?,
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
