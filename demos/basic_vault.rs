use std::env;
use std::io::{self, Write};
use std::path::Path;

use hd_vault::{ChainId, FileStore, VaultConfig, WalletVault};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("HD Vault Demo");
    println!("=============");

    let config_path = Path::new("./vault.json");
    let config = if config_path.exists() {
        VaultConfig::from_file(config_path)?
    } else {
        VaultConfig::default()
    };
    let storage_dir = config
        .storage_dir
        .clone()
        .unwrap_or_else(|| "./wallet-data".into());

    let vault = WalletVault::with_config(FileStore::new(&storage_dir)?, config)?;
    let password = read_password()?;

    if vault.has_vault()? {
        println!("Unlocking vault in {}...", storage_dir.display());
        if let Some(hint) = vault.password_hint()? {
            println!("Hint: {}", hint);
        }
    } else {
        println!("Creating a new vault in {}...", storage_dir.display());
        let pending = vault.begin_creation()?;

        println!("\n⚠️  IMPORTANT: Write down your recovery phrase and store it securely!");
        println!("Recovery phrase: {}\n", pending.phrase());
        print!("Press Enter to continue...");
        io::stdout().flush()?;
        let mut buffer = String::new();
        io::stdin().read_line(&mut buffer)?;

        vault.finalize(pending, &password, Some("demo password"))?;
    }

    vault.unlock(&password)?;
    vault.add_wallet(&password, ChainId::Solana)?;
    vault.add_wallet(&password, ChainId::Ethereum)?;

    let listing = vault.list_wallets()?;
    for wallet in &listing.all {
        println!("\n{} #{}", wallet.chain_id, wallet.index);
        println!("Path:    {}", wallet.derivation_path);
        println!("Address: {}", wallet.public_key);
        println!("Account: {}", wallet.account_id);
    }
    println!(
        "\n{} wallets ({} Solana, {} Ethereum)",
        listing.all.len(),
        listing.solana.len(),
        listing.ethereum.len()
    );

    vault.lock();
    println!("\nVault locked.");
    Ok(())
}

fn read_password() -> Result<String, Box<dyn std::error::Error>> {
    if let Ok(password) = env::var("VAULT_PASSWORD") {
        return Ok(password);
    }
    if let Some(password) = env::args().nth(1) {
        return Ok(password);
    }

    let password = rpassword::prompt_password("Enter your vault password: ")?;
    Ok(password)
}
