use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedreaper::config::Config;
use feedreaper::feed::HttpFetcher;
use feedreaper::reaper::{FeedStore, Reaper};
use feedreaper::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedreaper/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedreaper");
    Ok(config_dir)
}

async fn require_user(db: &Database, user: &str) -> Result<()> {
    if !db.user_exists(user).await? {
        anyhow::bail!("No such user '{}'", user);
    }
    Ok(())
}

/// Seed the cache from the database and refresh whatever is stale.
async fn refresh_once(reaper: &Arc<Reaper>) -> Result<()> {
    reaper.load().await?;
    let report = reaper.refresh_stale().await;
    if report.failed > 0 {
        eprintln!("Warning: {} feeds could not be refreshed", report.failed);
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedreaper",
    about = "Personal feed reader that keeps subscribed feeds fresh in memory"
)]
struct Args {
    /// Config file (default: ~/.config/feedreaper/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding the config file
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh every known feed on the configured interval until Ctrl-C
    Run,

    /// Create a user
    AddUser {
        name: String,
    },

    /// Subscribe a user to one or more feeds, keeping existing subscriptions
    Subscribe {
        user: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// List a user's feeds with their last fetch error
    Feeds {
        user: String,
    },

    /// Refresh stale feeds once and print the user's merged timeline
    Timeline {
        user: String,
        /// Maximum number of items to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Save an item from the user's feeds by its link
    Save {
        user: String,
        link: String,
    },

    /// List a user's saved items, newest first
    Saves {
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config_dir.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)
                    .context("Failed to create config directory")?;
                println!("Created config directory: {}", config_dir.display());
            }
            config_dir.join("feedreaper.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedreaper appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let store: Arc<dyn FeedStore> = Arc::new(db.clone());
    let fetcher = HttpFetcher::new(&config)
        .context("Failed to build HTTP client")?
        .with_store(Arc::clone(&store));
    let reaper = Arc::new(Reaper::new(&config, store, Arc::new(fetcher)));

    match args.command {
        Command::Run => {
            let handle = reaper.start()?;
            println!(
                "Refreshing feeds every {} minutes. Press Ctrl-C to stop.",
                config.refresh_interval_minutes
            );
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            println!("Stopping...");
            handle.stop().await;
        }

        Command::AddUser { name } => {
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("User name must not be empty");
            }
            if db.user_exists(name).await? {
                anyhow::bail!("User '{}' already exists", name);
            }
            db.add_user(name).await.context("Failed to create user")?;
            println!("Created user '{}'", name);
        }

        Command::Subscribe { user, urls } => {
            require_user(&db, &user).await?;
            // Known feeds are recognised from the cache and not fetched again
            reaper.load().await?;
            let mut wanted = db.user_feed_urls(&user).await?;
            wanted.extend(urls);
            let subscribed = reaper.subscribe(&user, &wanted).await?;
            println!("'{}' now follows {} feeds", user, subscribed.len());
        }

        Command::Feeds { user } => {
            require_user(&db, &user).await?;
            let urls = db.user_feed_urls(&user).await?;
            if urls.is_empty() {
                println!("'{}' has no subscriptions", user);
            }
            for url in urls {
                match db.feed_fetch_error(&url).await? {
                    Some(error) => println!("{}  (last fetch failed: {})", url, error),
                    None => println!("{}", url),
                }
            }
        }

        Command::Timeline { user, limit } => {
            require_user(&db, &user).await?;
            refresh_once(&reaper).await?;

            let items = reaper.timeline(&user).await?;
            for item in items.iter().take(limit) {
                let date = item
                    .published
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "----------------".to_string());
                println!("{}  {}", date, item.title);
                println!("                  {}", item.link);
            }
        }

        Command::Save { user, link } => {
            require_user(&db, &user).await?;
            refresh_once(&reaper).await?;
            let item = reaper.save_item(&user, &link).await?;
            println!("Saved '{}'", item.title);
        }

        Command::Saves { user } => {
            require_user(&db, &user).await?;
            let saved = db.user_saved_items(&user).await?;
            if saved.is_empty() {
                println!("'{}' has no saved items", user);
            }
            for entry in saved {
                println!("{}", entry.item_title);
                println!("    {}", entry.item_url);
            }
        }
    }

    Ok(())
}
