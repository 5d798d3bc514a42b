use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use playlist_link_sync as lib;
use lib::auth::{AuthSession, SessionManager};
use lib::client::PlaylistClient;
use lib::config::Config;
use lib::links::LinkRepository;
use lib::models::{PlaylistRef, PlaylistSummary, SyncMode};
use lib::sync::{Reconciler, SyncOptions};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "playlist-link-sync", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize with Spotify (interactive when no usable token is stored)
    Auth,
    /// List your playlists
    Playlists,
    /// List the tracks of a playlist
    Tracks {
        playlist_id: String,
    },
    /// Manage linked playlists
    Links {
        #[command(subcommand)]
        sub: LinkCommands,
    },
    /// Bring destination playlists in line with their origins
    Sync {
        /// add, remove or both
        #[arg(long, default_value = "both")]
        mode: SyncMode,
        /// Only sync these link ids (default: all)
        #[arg(long = "link", value_name = "ID")]
        links: Vec<String>,
        /// Report what would change without touching any playlist
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate config file and exit
    ConfigValidate,
}

#[derive(Subcommand)]
enum LinkCommands {
    /// Show every link
    List,
    /// Create a link from origin playlists to destination playlists
    Add {
        #[arg(long)]
        name: String,
        #[arg(long = "origin", value_name = "PLAYLIST_ID", required = true)]
        origin: Vec<String>,
        #[arg(long = "destination", value_name = "PLAYLIST_ID", required = true)]
        destination: Vec<String>,
    },
    /// Delete a link
    Remove {
        id: String,
    },
}

async fn connect(cfg: &Config) -> Result<PlaylistClient> {
    let manager = SessionManager::from_config(cfg)?;
    let mut session = AuthSession::new();
    manager.authenticate(&mut session).await?;
    session
        .client()
        .cloned()
        .ok_or_else(|| anyhow!("authentication finished without a client"))
}

fn resolve_refs(ids: &[String], known: &HashMap<String, PlaylistSummary>) -> Result<Vec<PlaylistRef>> {
    ids.iter()
        .map(|id| {
            known
                .get(id)
                .map(PlaylistRef::from)
                .ok_or_else(|| anyhow!("playlist {} is not one of your playlists", id))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = Config::load(cli.config.as_deref())?;

    if let Commands::ConfigValidate = cli.command {
        match cfg.validate() {
            Ok(()) => {
                if !cfg.has_client_credentials() {
                    println!("OK (client_id/client_secret not set; auth will fail)");
                } else {
                    println!("OK");
                }
            }
            Err(e) => {
                eprintln!("Config validation failed: {:#}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let _guard = lib::logging::init(&cfg)?;
    cfg.validate().context("invalid configuration")?;
    let repo = LinkRepository::new(cfg.links_dir());

    match cli.command {
        Commands::ConfigValidate => {}
        Commands::Auth => {
            let client = connect(&cfg).await?;
            let user = client.current_user().await?;
            println!(
                "Authenticated as {}",
                user.display_name.as_deref().unwrap_or(user.id.as_str())
            );
        }
        Commands::Playlists => {
            let client = connect(&cfg).await?;
            for p in client.list_playlists_for_user().await? {
                match p.track_count {
                    Some(n) => println!("- {} ({}) [{} tracks]", p.name, p.id, n),
                    None => println!("- {} ({})", p.name, p.id),
                }
            }
        }
        Commands::Tracks { playlist_id } => {
            let client = connect(&cfg).await?;
            let tracks = client.list_tracks(&playlist_id).await?;
            for t in &tracks {
                match t.id() {
                    Some(id) => println!("- {} ({})", t.label(), id),
                    None => println!("- {}", t.label()),
                }
            }
            println!("{} entries", tracks.len());
        }
        Commands::Links { sub } => match sub {
            LinkCommands::List => {
                let links = repo.list()?;
                if links.is_empty() {
                    println!("No links defined.");
                }
                for link in links {
                    println!("{} [{}]", link.name, link.id);
                    for o in &link.origin {
                        println!("  from {} ({})", o.name, o.id);
                    }
                    for d in &link.destination {
                        println!("  to   {} ({})", d.name, d.id);
                    }
                }
            }
            LinkCommands::Add { name, origin, destination } => {
                let client = connect(&cfg).await?;
                let known: HashMap<String, PlaylistSummary> = client
                    .list_playlists_for_user()
                    .await?
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect();
                let link = repo.create(&name, resolve_refs(&origin, &known)?, resolve_refs(&destination, &known)?)?;
                println!("Created link {} [{}]", link.name, link.id);
            }
            LinkCommands::Remove { id } => {
                repo.remove(&id)?;
                println!("Removed link {}", id);
            }
        },
        Commands::Sync { mode, links, dry_run } => {
            let selected = if links.is_empty() {
                repo.list()?
            } else {
                links.iter().map(|id| repo.get(id)).collect::<Result<Vec<_>>>()?
            };
            if selected.is_empty() {
                println!("No links to sync.");
                return Ok(());
            }

            let client = connect(&cfg).await?;
            let reconciler = Reconciler::new(&client, SyncOptions { mode, dry_run });
            let reports = reconciler.sync_links(&selected).await?;
            let verb = if dry_run { "would be " } else { "" };
            for report in reports {
                if report.skipped {
                    println!("{} [{}]: skipped (no origin or destination)", report.link_name, report.link_id);
                    continue;
                }
                println!("{} [{}]", report.link_name, report.link_id);
                for d in &report.destinations {
                    println!(
                        "  {}: {} {}added, {} {}removed",
                        d.playlist.name,
                        d.added.len(),
                        verb,
                        d.removed.len(),
                        verb
                    );
                    for label in &d.added {
                        println!("    + {}", label);
                    }
                    for label in &d.removed {
                        println!("    - {}", label);
                    }
                }
            }
        }
    }

    Ok(())
}
