//! parcelsync CLI
//!
//! Thin wrapper around parcelsync-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Generate an identity (written to <data-dir>/identity.json)
//! parcelsync keygen --address alice@mem://local
//!
//! # Write a default client configuration
//! parcelsync config init --user alice
//!
//! # Show the configuration in use
//! parcelsync config show
//!
//! # Run two clients against an in-process server
//! parcelsync -v demo
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use parcelsync_core::identity::IdentityKeys;
use parcelsync_core::{
    AccessRights, Client, ClientConfig, ContactFinder, ContactPrivate, CryptoContext, Portal,
    PortalConnector, ServerState,
};
use serde::{Deserialize, Serialize};
use tracing::info;

const IDENTITY_FILE: &str = "identity.json";
const CONFIG_FILE: &str = "config.json";
const DEMO_SERVER: &str = "mem://demo";

/// parcelsync - enveloped remote jobs for personal data sync
#[derive(Parser)]
#[command(name = "parcelsync")]
#[command(version)]
#[command(about = "parcelsync - enveloped remote jobs for personal data sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: ~/.parcelsync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing and encryption identity
    Keygen {
        /// Address to attach, e.g. alice@mem://local
        #[arg(short, long)]
        address: Option<String>,

        /// Replace an existing identity
        #[arg(long)]
        force: bool,
    },

    /// Client configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run the create-account / contact / grant / access / pull scenario in-process
    Demo {
        /// Branch alice shares with bob
        #[arg(short, long, default_value = "notes")]
        branch: String,

        /// Content alice pushes first
        #[arg(short, long, default_value = "hello from alice")]
        message: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "")]
        user: String,

        #[arg(short, long)]
        server: Option<String>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration in use
    Show,
}

/// On-disk identity. `keys` holds the base64 key seeds.
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    address: Option<String>,
    key_id: String,
    keys: String,
}

impl IdentityFile {
    fn load(path: &Path) -> Result<ContactPrivate> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: IdentityFile = serde_json::from_str(&text)?;
        let bytes = BASE64.decode(file.keys.as_bytes()).context("decoding keys")?;
        Ok(ContactPrivate::from_keys(
            IdentityKeys::from_bytes(&bytes)?,
            file.address,
        ))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parcelsync")
}

fn load_config(data_dir: &Path) -> Result<ClientConfig> {
    let path = data_dir.join(CONFIG_FILE);
    if path.exists() {
        Ok(ClientConfig::load(&path)?)
    } else {
        Ok(ClientConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    parcelsync_core::logging::init(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Keygen { address, force } => keygen(&data_dir, address, force)?,

        Commands::Config { action } => match action {
            ConfigAction::Init {
                user,
                server,
                force,
            } => {
                let path = data_dir.join(CONFIG_FILE);
                if path.exists() && !force {
                    bail!(
                        "{} already exists (use --force to replace it)",
                        path.display()
                    );
                }
                let mut config = ClientConfig {
                    user,
                    ..ClientConfig::default()
                };
                if let Some(server) = server {
                    config.server_url = server;
                }
                config.validate()?;
                config.save(&path)?;
                println!("Config written to {}", path.display());
            }
            ConfigAction::Show => {
                let config = load_config(&data_dir)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },

        Commands::Demo { branch, message } => {
            let config = load_config(&data_dir)?;
            demo(config, &branch, &message).await?;
        }
    }

    Ok(())
}

fn keygen(data_dir: &Path, address: Option<String>, force: bool) -> Result<()> {
    let path = data_dir.join(IDENTITY_FILE);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to replace it)",
            path.display()
        );
    }
    if let Some(address) = &address {
        parcelsync_core::identity::parse_address(address)?;
    }

    let keys = IdentityKeys::generate(&CryptoContext::new());
    let key_id = keys.signing_key_id();
    let file = IdentityFile {
        address,
        key_id: key_id.to_string(),
        keys: BASE64.encode(keys.to_bytes()),
    };
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;

    let identity = IdentityFile::load(&path)?;
    println!("Identity generated");
    println!("  Key ID: {}", identity.id());
    println!(
        "  Encryption key: {}",
        hex::encode(identity.keys().encryption_public().as_bytes())
    );
    if let Some(address) = identity.public().address() {
        println!("  Address: {}", address);
    }
    println!("  Saved to: {}", path.display());
    Ok(())
}

async fn demo(base: ClientConfig, branch: &str, message: &str) -> Result<()> {
    let state = Arc::new(ServerState::new(CryptoContext::new()));
    let connector = Arc::new(PortalConnector::new());
    connector.add(DEMO_SERVER, Arc::new(Portal::new(state)));
    info!(server = DEMO_SERVER, "Demo server started");

    let client = |user: &str| -> Result<Client> {
        let config = ClientConfig {
            server_url: DEMO_SERVER.to_string(),
            user: user.to_string(),
            ..base.clone()
        };
        let identity = ContactPrivate::generate(
            &CryptoContext::new(),
            Some(format!("{}@{}", user, DEMO_SERVER)),
        );
        Ok(Client::new(
            config,
            identity,
            format!("{}-demo-password", user),
            connector.clone(),
        )?)
    };
    let alice = client("alice")?;
    let bob = client("bob")?;

    println!("[1/7] Creating accounts");
    alice.create_account().await?;
    bob.create_account().await?;

    println!("[2/7] Exchanging contacts");
    alice
        .send_contact_request(&format!("bob@{}", DEMO_SERVER))
        .await?;
    bob.send_contact_request(&format!("alice@{}", DEMO_SERVER))
        .await?;
    bob.poll_commands().await?;
    alice.poll_commands().await?;
    let bob_public = alice
        .contacts()
        .find(bob.identity().id())
        .context("bob's contact request did not arrive")?
        .public()
        .clone();

    println!("[3/7] alice pushes '{}'", branch);
    let tip = alice.push(branch, message.as_bytes().to_vec(), None).await?;
    println!("  Tip: {}", tip);

    println!("[4/7] alice grants bob PULL on '{}'", branch);
    let token = alice
        .grant_access(&bob_public, branch, AccessRights::PULL)
        .await?;
    println!("  Token: {}", token.id);

    println!("[5/7] bob receives the grant and requests access");
    bob.poll_commands().await?;
    let received = bob
        .token_for("alice", branch)
        .context("access grant did not arrive")?;
    bob.request_access(&received).await?;

    println!("[6/7] bob pulls alice's '{}'", branch);
    let snapshot = bob
        .pull("alice", branch)
        .await?
        .context("branch is empty")?;
    println!("  Content: {}", String::from_utf8_lossy(&snapshot.data));

    println!("[7/7] alice updates, bob notices");
    let known = BTreeMap::from([(branch.to_string(), Some(snapshot.tip.clone()))]);
    alice
        .push(branch, format!("{} (edited)", message).into_bytes(), Some(tip))
        .await?;
    let watch = bob
        .wait_for_remote_update("alice", known)
        .await?
        .context("no update seen")?;
    println!("  Updated: {}", watch.updated.join(", "));
    if let Some(latest) = bob.pull("alice", branch).await? {
        println!("  Content: {}", String::from_utf8_lossy(&latest.data));
    }

    println!();
    println!("Demo complete");
    Ok(())
}
