//! Lumen Photos - CLI
//!
//! Command-line front end over a local SQLite document store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use lumen_photos::{
    KeyWrapping, MasterKeyState, Passphrase, PhotoVaultApi, SqliteStore, StaticIdentity,
    VaultConfig,
};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(version = lumen_photos::VERSION)]
#[command(about = "Lumen Photos - client-side envelope encryption for shared albums")]
struct Cli {
    /// Signed-in user id
    #[arg(short, long, env = "LUMEN_USER")]
    user: String,

    /// Document store database (default: <data dir>/lumen/store.db)
    #[arg(long)]
    store: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up a passphrase-protected master key
    Init,

    /// Show master key state
    Status,

    /// Provision the key for a new album
    CreateAlbum {
        /// Album ID
        album: String,
    },

    /// Re-wrap an identity-derived album key under the master key
    Migrate {
        /// Album ID
        album: String,
    },

    /// Encrypt a photo for an album
    Encrypt {
        /// Album ID
        album: String,
        /// Plaintext input
        input: PathBuf,
        /// Encrypted output
        output: PathBuf,
    },

    /// Decrypt a photo from an album
    Decrypt {
        /// Album ID
        album: String,
        /// Encrypted input
        input: PathBuf,
        /// Plaintext output
        output: PathBuf,
    },

    /// Re-seal the master key under a new passphrase
    ChangePassphrase,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn prompt(label: &str) -> Result<Passphrase> {
    let value = rpassword::prompt_password(label).context("reading passphrase")?;
    Ok(Passphrase::from(value))
}

fn default_store_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no data directory for this platform")?;
    Ok(base.join("lumen").join("store.db"))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => VaultConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VaultConfig::default(),
    };

    let store_path = match cli.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    let store = SqliteStore::open(&store_path)
        .with_context(|| format!("opening store {}", store_path.display()))?;

    let api = PhotoVaultApi::new(
        Arc::new(store),
        Arc::new(StaticIdentity::signed_in(cli.user.as_str())),
        config,
    );

    match cli.command {
        Commands::Init => {
            let passphrase = prompt("New passphrase: ")?;
            let confirm = prompt("Repeat passphrase: ")?;
            if passphrase.expose_secret() != confirm.expose_secret() {
                bail!("passphrases do not match");
            }

            let metadata = api.initialize_master_key(&passphrase).await?;
            println!("Master key created: {}", metadata.key_id);
            println!(
                "KDF: {} (memory {} KiB, {} iterations, {} lanes)",
                metadata.algorithm, metadata.memory_cost, metadata.iterations, metadata.parallelism
            );
        }

        Commands::Status => {
            let status = api.status().await?;
            let state = match status.state {
                MasterKeyState::Uninitialized => "not set up",
                MasterKeyState::Locked => "locked",
                MasterKeyState::Unlocked => "unlocked",
            };
            println!("User:          {}", cli.user);
            println!("Store:         {}", store_path.display());
            println!("Master key:    {}", state);
            println!("Idle timeout:  {}s", status.idle_timeout_secs);
        }

        Commands::CreateAlbum { album } => {
            unlock_if_initialized(&api).await?;
            match api.create_album(&album).await? {
                KeyWrapping::MasterKey => println!("Album {} created", album),
                KeyWrapping::IdentityDerived => {
                    println!("Album {} created with an identity-derived key", album);
                    println!("Run `lumen init` and then `lumen migrate {}` to protect it", album);
                }
            }
        }

        Commands::Migrate { album } => {
            let passphrase = prompt("Passphrase: ")?;
            api.unlock_master_key(&passphrase).await?;
            if api.migrate_album(&album).await? {
                println!("Album {} now wrapped by the master key", album);
            } else {
                println!("Album {} already wrapped by the master key", album);
            }
        }

        Commands::Encrypt { album, input, output } => {
            unlock_if_initialized(&api).await?;
            let written = api
                .encrypt_file(&album, &input, &output)
                .await
                .with_context(|| format!("encrypting {}", input.display()))?;
            println!("Encrypted {} -> {} ({} bytes)", input.display(), output.display(), written);
        }

        Commands::Decrypt { album, input, output } => {
            unlock_if_initialized(&api).await?;
            let written = api
                .decrypt_file(&album, &input, &output)
                .await
                .with_context(|| format!("decrypting {}", input.display()))?;
            println!("Decrypted {} -> {} ({} bytes)", input.display(), output.display(), written);
        }

        Commands::ChangePassphrase => {
            let old = prompt("Current passphrase: ")?;
            let new = prompt("New passphrase: ")?;
            let metadata = api.change_passphrase(&old, &new).await?;
            println!("Passphrase changed for {}", metadata.key_id);
        }
    }

    api.lock();
    Ok(())
}

/// Prompt for the passphrase unless the user has no master key yet
async fn unlock_if_initialized(api: &PhotoVaultApi) -> Result<()> {
    if api.master_key_state().await? == MasterKeyState::Uninitialized {
        return Ok(());
    }
    let passphrase = prompt("Passphrase: ")?;
    api.unlock_master_key(&passphrase).await?;
    Ok(())
}
