use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dealer_portal::account::{self, ProfileChange};
use dealer_portal::client::HttpPortalClient;
use dealer_portal::config::PortalConfig;
use dealer_portal::error::PortalError;
use dealer_portal::guard::{Access, AccessGuard};
use dealer_portal::inventory::{InventoryBoard, RefreshOutcome};
use dealer_portal::logging::init_tracing;
use dealer_portal::models::Role;
use dealer_portal::reconcile::{share_link, StockQuery, VideoFilter};
use dealer_portal::session::{AuthSessionManager, LoginOutcome};
use dealer_portal::storage::SledSessionStore;

const MAX_CODE_PROMPTS: u32 = 3;

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "Dealer portal command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Remote API base URL (overrides PORTAL_API_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Session directory (overrides PORTAL_SESSION_PATH)
    #[arg(long)]
    session: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "PORTAL_PASSWORD")]
        password: String,
        /// Second-factor code. Prompted for when omitted and the account needs one.
        #[arg(short, long)]
        code: Option<String>,
    },
    Logout,
    Whoami,
    /// List stock with video coverage (staff)
    Stock {
        #[arg(short, long, default_value = "")]
        search: String,
        #[arg(short, long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
    },
    /// Print a share link for a video (staff)
    Share {
        #[arg(short, long)]
        video_id: String,
    },
    /// Feed sync and coverage summary (admin)
    Status,
    Profile {
        #[arg(long, env = "PORTAL_PASSWORD")]
        current_password: String,
        #[arg(short, long)]
        username: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
        #[arg(long)]
        confirm_password: Option<String>,
    },
    ForgotPassword {
        #[arg(short, long)]
        email: String,
    },
    ResetPassword {
        #[arg(short, long)]
        token: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long)]
        confirm: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    HasVideo,
    NoVideo,
}

impl From<FilterArg> for VideoFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => VideoFilter::All,
            FilterArg::HasVideo => VideoFilter::HasVideo,
            FilterArg::NoVideo => VideoFilter::NoVideo,
        }
    }
}

fn require(guard: &AccessGuard, role: Role) -> Result<(), PortalError> {
    match guard.check(Some(role)) {
        Access::Allowed => Ok(()),
        Access::Pending => Err(PortalError::InvalidState("session is still loading")),
        Access::DeniedRedirectToLogin => Err(PortalError::Validation(format!(
            "Access denied: sign in with a {role} account (portal-cli login)"
        ))),
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn report_failures(outcome: &RefreshOutcome) {
    for failure in &outcome.failures {
        eprintln!("warning: {:?} feed unavailable: {}", failure.feed, failure.message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = PortalConfig::from_env()?
        .with_api_url(cli.url.as_deref())?
        .with_session_path(cli.session);
    let _log_guard = init_tracing("dealer_portal=warn", config.log_json, config.log_dir.as_deref());

    let client = Arc::new(HttpPortalClient::new(config.api_url.clone()));
    let store = Arc::new(SledSessionStore::open(&config.session_path)?);
    let session = Arc::new(AuthSessionManager::restored(client.clone(), store));
    let guard = AccessGuard::new(session.clone());

    match cli.command {
        Commands::Login { username, password, code } => {
            let identity = match session.login(&username, &password).await? {
                LoginOutcome::Authenticated(identity) => identity,
                LoginOutcome::NeedsSecondFactor(_) => match code {
                    Some(code) => session.verify_second_factor(&code).await?,
                    None => {
                        let mut tries = 0;
                        loop {
                            let code = prompt("Verification code: ")?;
                            if code.is_empty() {
                                session.restart_login();
                                println!("Login abandoned.");
                                return Ok(());
                            }
                            match session.verify_second_factor(&code).await {
                                Ok(identity) => break identity,
                                Err(e) if tries + 1 < MAX_CODE_PROMPTS => {
                                    tries += 1;
                                    eprintln!("{e}");
                                }
                                Err(e) => {
                                    session.restart_login();
                                    return Err(e.into());
                                }
                            }
                        }
                    }
                },
            };
            println!("Logged in as {} ({}). Session saved to {}", identity.username, identity.role, config.session_path.display());
        }
        Commands::Logout => {
            session.logout()?;
            println!("Logged out (session cleared).");
        }
        Commands::Whoami => match session.identity() {
            Some(identity) => println!("{} ({})", identity.username, identity.role),
            None => println!("Not signed in."),
        },
        Commands::Stock { search, filter } => {
            require(&guard, Role::Staff)?;
            let board = InventoryBoard::new();
            let outcome = board.refresh(client.as_ref(), &session).await?;
            report_failures(&outcome);
            let rows = board.rows(&StockQuery::new(search, filter.into()));
            for row in &rows {
                println!(
                    "{:<10} {} {} {} ({} miles)  [{}]",
                    row.item.registration_plate,
                    row.item.make,
                    row.item.model,
                    row.item.derivative,
                    row.item.mileage,
                    row.status.label()
                );
                for video in &row.videos {
                    println!("           - {} {}", video.id, video.title);
                }
            }
            println!("{} of {} vehicles shown", rows.len(), outcome.stock_count);
        }
        Commands::Share { video_id } => {
            require(&guard, Role::Staff)?;
            let board = InventoryBoard::new();
            report_failures(&board.refresh(client.as_ref(), &session).await?);
            let video = board
                .find_video(&video_id)
                .ok_or_else(|| PortalError::Validation(format!("No video with id {video_id}")))?;
            let link = share_link(&config.share_base_url, &video, session.identity().as_ref())?;
            println!("{link}");
        }
        Commands::Status => {
            require(&guard, Role::Admin)?;
            let board = InventoryBoard::new();
            report_failures(&board.refresh(client.as_ref(), &session).await?);
            let sync = board.sync_info();
            let coverage = board.coverage();
            match sync.last_sync_time {
                Some(at) => println!("Last sync: {} ({})", at.to_rfc3339(), sync.sync_status.as_deref().unwrap_or("unknown")),
                None => println!("Last sync: never"),
            }
            println!("Vehicles in feed: {}", sync.total_vehicles);
            println!("With video: {} | Without video: {}", coverage.with_video, coverage.without_video);
        }
        Commands::Profile { current_password, username, new_password, confirm_password } => {
            require(&guard, Role::Staff)?;
            let change = ProfileChange { current_password, username, new_password, confirm_password };
            let identity = account::change_profile(&session, &change).await?;
            println!("Profile updated. Signed in as {}", identity.username);
        }
        Commands::ForgotPassword { email } => {
            account::request_password_reset(client.as_ref(), &email).await?;
            println!("If that address belongs to an account, a reset link has been sent.");
        }
        Commands::ResetPassword { token, password, confirm } => {
            account::reset_password(client.as_ref(), &token, &password, &confirm).await?;
            println!("Password reset. You can now log in.");
        }
    }

    Ok(())
}
