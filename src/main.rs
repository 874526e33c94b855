//! Bodega CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use bodega::ui;

#[derive(Parser)]
#[command(name = "bodega")]
#[command(about = "🛒 Bodega - storefront client")]
#[command(version)]
struct Cli {
    /// Override the backend base URL from the config file
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with a phone number
    Login {
        /// Phone number in E.164 format, e.g. +15550001111
        #[arg(short, long)]
        phone: String,
    },

    /// Sign out and clear stored credentials
    Logout,

    /// Show session and configuration status
    Status,

    /// Manage the favorites set
    Favorites {
        #[command(subcommand)]
        command: FavoritesCommands,
    },
}

#[derive(Subcommand)]
enum FavoritesCommands {
    /// Fetch the favorites set (cached copy when offline)
    List,

    /// Flip one item's membership
    Toggle {
        /// Item identifier
        item_id: String,
    },

    /// Reconcile the local set with the backend
    Sync,
}

struct App {
    session: bodega::auth::SessionManager,
    favorites: bodega::favorites::FavoritesEngine,
}

fn build_app(config: &bodega::config::Config) -> Result<App> {
    use bodega::api::{HttpTransport, Pipeline, Transport};
    use bodega::auth::{FileCredentialStore, RefreshCoordinator, SessionManager};
    use bodega::favorites::{FavoritesEngine, FileFavoritesCache, DEFAULT_NAMESPACE};

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(config)?);
    let store = Arc::new(FileCredentialStore::at_default_path());

    // One coordinator shared by the session manager and the pipeline, so
    // a restore-triggered refresh and a request-triggered refresh can
    // never race each other.
    let refresher = RefreshCoordinator::new(transport.clone(), store.clone());
    let session = SessionManager::new(transport.clone(), store.clone(), refresher.clone());
    let pipeline = Pipeline::new(transport, store, refresher);

    let cache = Arc::new(FileFavoritesCache::at_default_path());
    let favorites = FavoritesEngine::new(pipeline, cache, DEFAULT_NAMESPACE);

    Ok(App { session, favorites })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = bodega::config::load()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    let app = build_app(&config)?;

    match cli.command {
        Commands::Login { phone } => {
            run_login(&app, &phone).await?;
        }

        Commands::Logout => {
            app.session.logout().await?;
            ui::print_success("Logged out");
        }

        Commands::Status => {
            run_status(&app, &config).await?;
        }

        Commands::Favorites { command } => {
            run_favorites(&app, command).await?;
        }
    }

    Ok(())
}

/// E.164 check at the CLI boundary - the session layer does not re-validate
fn validate_phone(phone: &str) -> Result<()> {
    let digits = phone.strip_prefix('+').unwrap_or("");
    if digits.len() < 8 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        anyhow::bail!("Phone must be in E.164 format, e.g. +15550001111");
    }
    Ok(())
}

async fn run_login(app: &App, phone: &str) -> Result<()> {
    validate_phone(phone)?;

    ui::print_step(&format!("Requesting a one-time code for {}", phone));
    let expires_at = app.session.request_code(phone).await?;
    ui::print_step(&format!("Code sent, valid until {}", expires_at.format("%H:%M:%S UTC")));

    let code = inquire::Text::new("Enter the code you received:").prompt()?;
    let name_input = inquire::Text::new("Display name (used on first sign-in, Enter to skip):").prompt()?;
    let name = match name_input.trim() {
        "" => None,
        trimmed => Some(trimmed.to_string()),
    };

    match app.session.verify_code(phone, code.trim(), name.as_deref()).await {
        Ok(session) => {
            let greeting = session.user.name.as_deref().unwrap_or("there");
            if session.is_new_account {
                ui::print_success(&format!("Welcome, {}! Your account is ready.", greeting));
            } else {
                ui::print_success(&format!("Welcome back, {}!", greeting));
            }

            // Bring favorites collected while signed out up to the backend
            let merged = app.favorites.reconcile().await?;
            ui::print_step(&format!("{} favorite(s) in sync", merged.len()));
            Ok(())
        }
        Err(err) => {
            let message = match err.remote_code() {
                Some("otp_incorrect") => "That code is not right. Run login again to retry.".to_string(),
                Some("otp_expired") => "That code has expired. Run login again for a fresh one.".to_string(),
                Some("rate_limited") => "Too many attempts. Wait a moment before trying again.".to_string(),
                _ => err.to_string(),
            };
            ui::print_error(&message);
            Err(err.into())
        }
    }
}

async fn run_status(app: &App, config: &bodega::config::Config) -> Result<()> {
    println!("🛒 Bodega Status\n");
    println!("API: {}", config.api_url);

    match app.session.restore().await? {
        Some(session) => {
            ui::print_success(&format!(
                "Signed in as {} ({})",
                session.user.phone,
                session.role.as_str()
            ));
            if let Some(name) = &session.user.name {
                println!("  Name: {}", name);
            }
            if let Some(pair) = app.session.stored_credentials()? {
                if let Some(expires) = pair.expires_at {
                    let hint = if pair.is_expired() { " (stale, will refresh)" } else { "" };
                    println!("  Token expires: {}{}", expires.format("%Y-%m-%d %H:%M:%S UTC"), hint);
                }
            }
        }
        None => {
            ui::print_step("Not signed in (run 'bodega login')");
        }
    }

    Ok(())
}

async fn run_favorites(app: &App, command: FavoritesCommands) -> Result<()> {
    match command {
        FavoritesCommands::List => {
            let items = app.favorites.load().await?;
            if items.is_empty() {
                ui::print_step("No favorites yet");
            } else {
                let mut sorted: Vec<&String> = items.iter().collect();
                sorted.sort();
                for item in sorted {
                    println!("  ♥ {}", item);
                }
            }
        }

        FavoritesCommands::Toggle { item_id } => {
            if app.favorites.toggle(&item_id).await? {
                ui::print_success(&format!("Added {} to favorites", item_id));
            } else {
                ui::print_success(&format!("Removed {} from favorites", item_id));
            }
        }

        FavoritesCommands::Sync => {
            let merged = app.favorites.reconcile().await?;
            ui::print_success(&format!("{} favorite(s) in sync", merged.len()));
        }
    }

    Ok(())
}
