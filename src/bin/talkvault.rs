//! CLI binary for talkvault.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ClientConfig`, keeps the session in an optional token file and prints
//! results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use talkvault::{
    save_download, ApiClient, ClientConfig, ClientProgressCallback, ConversionRecord, LookupMode,
    Notification, NotificationLevel, PollStatus, ProgressCallback, Session, SignupRequest,
    TalkVaultError, UploadSource, UserProfile, UserUpdate,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner whose message follows the
/// protocol, plus a log line per notable event.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ClientProgressCallback for CliProgressCallback {
    fn on_upload_start(&self, file_name: &str, file_size: u64, _request_id: &str) {
        self.bar.set_prefix("Uploading");
        self.bar
            .set_message(format!("{file_name} {}", dim(&format!("({file_size} bytes)"))));
    }

    fn on_upload_complete(&self, record: &ConversionRecord, reconciled: bool) {
        let how = if reconciled {
            dim(" (confirmed from history)")
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} Uploaded {}{how}",
            green("✓"),
            bold(&record.original_file_name)
        ));
    }

    fn on_reconcile_attempt(&self, attempt: usize, total: usize) {
        self.bar.set_prefix("Confirming");
        self.bar.set_message(format!("history scan {attempt}/{total}"));
    }

    fn on_status_change(&self, key: &str, status: PollStatus) {
        self.bar.set_prefix("Waiting");
        self.bar.set_message(format!("{} {}", dim(key), status));
    }

    fn on_notification(&self, notification: &Notification) {
        let line = match notification.level {
            NotificationLevel::Success => format!("{} {}", green("✔"), notification.message),
            NotificationLevel::Failure => format!("{} {}", red("✘"), notification.message),
        };
        self.bar.println(line);
    }

    fn on_session_invalid(&self) {
        self.bar.println(format!(
            "{} {}",
            red("✘"),
            talkvault::messages::SESSION_EXPIRED
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Log in and remember the session
  talkvault --session-file ~/.talkvault-token login --email me@example.com

  # Create an account with an avatar
  talkvault signup --email me@example.com --profile-image avatar.png

  # Show or change your profile
  talkvault me 65f1c0e2a0 --email new@example.com

  # Convert a chat export and save the PDF
  talkvault --session-file ~/.talkvault-token upload KakaoTalk_Chat.txt --download-dir out/

  # Convert pasted text without waiting for the result
  talkvault upload --text "$(pbpaste)" --no-wait

  # Wait for a conversion started elsewhere
  talkvault status 65f1c0e2a1

  # List previous conversions as JSON
  talkvault list --json

ENVIRONMENT VARIABLES:
  TALKVAULT_API_URL       API base URL (default http://localhost:3000)
  TALKVAULT_TOKEN         Access token to start with
  TALKVAULT_TIMEOUT_SECS  Per-request timeout in seconds (default 30)
  TALKVAULT_SESSION_FILE  File the access token is loaded from and saved to
  TALKVAULT_USER_ID       Default user id for `me`
  RUST_LOG                Overrides the log filter
"#;

/// Upload chat logs to TalkVault and fetch the converted documents.
#[derive(Parser, Debug)]
#[command(
    name = "talkvault",
    version,
    about = "Upload chat logs to TalkVault and fetch the converted PDF/Excel documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// API base URL.
    #[arg(long, global = true, env = "TALKVAULT_API_URL", default_value = talkvault::config::DEFAULT_BASE_URL)]
    api_url: String,

    /// Access token (overrides the session file).
    #[arg(long, global = true, env = "TALKVAULT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File to load the access token from and save it to.
    #[arg(long, global = true, env = "TALKVAULT_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "TALKVAULT_TIMEOUT_SECS", default_value_t = 30)]
    timeout: u64,

    /// Only match lookup keys against record ids.
    #[arg(long, global = true)]
    strict_lookup: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the access token.
    Login {
        #[arg(long, env = "TALKVAULT_EMAIL")]
        email: String,
        #[arg(long, env = "TALKVAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out and forget the access token.
    Logout,
    /// Create an account and store the access token.
    Signup {
        #[arg(long, env = "TALKVAULT_EMAIL")]
        email: String,
        #[arg(long, env = "TALKVAULT_PASSWORD", hide_env_values = true)]
        password: String,
        /// Image file sent as the account avatar.
        #[arg(long, value_name = "PATH")]
        profile_image: Option<PathBuf>,
    },
    /// Show, update or delete a user profile.
    Me {
        /// User id, as printed by `login` and `signup`.
        #[arg(env = "TALKVAULT_USER_ID")]
        id: String,
        /// New email address.
        #[arg(long, conflicts_with = "delete")]
        email: Option<String>,
        /// New avatar URL.
        #[arg(long, value_name = "URL", conflicts_with = "delete")]
        profile_image: Option<String>,
        /// Delete the account and forget the access token.
        #[arg(long)]
        delete: bool,
        /// Print the profile as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Upload a chat log (file or pasted text) and wait for the documents.
    Upload {
        /// Chat log file to upload.
        #[arg(conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,
        /// Upload this text instead of a file.
        #[arg(long)]
        text: Option<String>,
        /// Return as soon as the upload is confirmed.
        #[arg(long)]
        no_wait: bool,
        /// Download the finished document into this directory.
        #[arg(long, conflicts_with = "no_wait")]
        download_dir: Option<PathBuf>,
    },
    /// List previous conversions.
    List {
        /// Print the records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Wait until a conversion is ready.
    Status {
        /// History id, saved file name or artifact URL fragment.
        key: String,
    },
    /// Download a conversion's document.
    Download {
        id: String,
        /// Directory to write into.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Delete a conversion.
    Delete { id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters; keep library INFO
    // logs out of its way unless asked for.
    let show_progress = !cli.quiet && !matches!(
        cli.command,
        Command::List { json: true } | Command::Me { json: true, .. }
    );
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli, show_progress).await {
        let message = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<TalkVaultError>())
            .map(TalkVaultError::user_message)
            .unwrap_or_else(|| e.to_string());
        eprintln!("{} {}", red("✘"), message);
        eprintln!("  {}", dim(&format!("{e:#}")));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, show_progress: bool) -> Result<()> {
    // ── Session ──────────────────────────────────────────────────────────
    let session = match cli.session_file {
        Some(ref path) => Session::load(path)
            .await
            .with_context(|| format!("Failed to load session from {}", path.display()))?,
        None => Session::new(),
    };
    if let Some(ref token) = cli.token {
        session.set_token(token.clone());
    }
    let initial_token = session.token();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let mut builder = ClientConfig::builder()
        .base_url(cli.api_url.clone())
        .request_timeout_secs(cli.timeout)
        .lookup_mode(if cli.strict_lookup {
            LookupMode::Strict
        } else {
            LookupMode::Lenient
        });
    if let Some(ref cb) = progress {
        builder = builder.progress_callback(Arc::clone(cb) as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;
    let client = ApiClient::with_session(config, session.clone())?;

    // ── Run command ──────────────────────────────────────────────────────
    let result = execute(&cli, &client).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    if let Some(ref path) = cli.session_file {
        if session.token() != initial_token {
            session
                .save(path)
                .await
                .with_context(|| format!("Failed to save session to {}", path.display()))?;
        }
    }
    result
}

async fn execute(cli: &Cli, client: &ApiClient) -> Result<()> {
    match cli.command {
        Command::Login {
            ref email,
            ref password,
        } => {
            let response = client.login(email, password).await.context("Login failed")?;
            if !cli.quiet {
                eprintln!("{} Logged in as {}", green("✔"), bold(email));
            }
            if let Some(user) = response.user {
                println!("{}", user.id);
            }
        }
        Command::Signup {
            ref email,
            ref password,
            ref profile_image,
        } => {
            let mut request = SignupRequest::new(email.clone(), password.clone());
            if let Some(path) = profile_image {
                let image = UploadSource::read_file(path).await?.into_file()?;
                request = request.with_profile_image(image);
            }
            let response = client.signup(&request).await.context("Signup failed")?;
            if !cli.quiet {
                eprintln!("{} Signed up as {}", green("✔"), bold(email));
                if !client.session().is_authenticated() {
                    eprintln!("  {}", dim("Log in to start a session."));
                }
            }
            if let Some(user) = response.user {
                println!("{}", user.id);
            }
        }
        Command::Me {
            ref id,
            ref email,
            ref profile_image,
            delete,
            json,
        } => {
            if delete {
                client.delete_user(id, true).await.context("Delete failed")?;
                if !cli.quiet {
                    eprintln!("{} Deleted account {}", green("✔"), bold(id));
                }
                return Ok(());
            }
            let update = UserUpdate {
                email: email.clone(),
                profile_image: profile_image.clone(),
            };
            let user = if update.is_empty() {
                client.user(id).await.context("Failed to fetch profile")?
            } else {
                client
                    .update_user(id, &update)
                    .await
                    .context("Profile update failed")?
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&user).context("Failed to serialise profile")?
                );
            } else {
                print_profile(&user);
            }
        }
        Command::Logout => {
            client.logout().await.context("Logout failed")?;
            if !cli.quiet {
                eprintln!("{} Logged out", green("✔"));
            }
        }
        Command::Upload {
            ref file,
            ref text,
            no_wait,
            ref download_dir,
        } => {
            let source = match file {
                Some(path) => UploadSource::read_file(path).await?,
                None => UploadSource::from_parts(None, text.clone())?,
            };
            let record = client.submit(source).await.context("Upload failed")?;
            if no_wait {
                println!("{}", record.id);
                return Ok(());
            }
            let record = client
                .poll(record.id.clone())
                .wait()
                .await
                .context("Conversion did not finish")?;
            print_ready(&record);
            if let Some(dir) = download_dir {
                download_into(client, &record, dir).await?;
            }
        }
        Command::List { json } => {
            let records = client.histories().await.context("Failed to list histories")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&records).context("Failed to serialise records")?
                );
            } else {
                print_table(&records);
            }
        }
        Command::Status { ref key } => {
            let record = client
                .poll(key.clone())
                .wait()
                .await
                .context("Conversion did not finish")?;
            print_ready(&record);
        }
        Command::Download { ref id, ref output } => {
            let record = client
                .find_history(id)
                .await
                .context("Failed to look up conversion")?
                .unwrap_or_else(|| ConversionRecord::new(id.clone(), ""));
            download_into(client, &record, output).await?;
        }
        Command::Delete { ref id } => {
            client.delete_history(id).await.context("Delete failed")?;
            if !cli.quiet {
                eprintln!("{} Deleted {}", green("✔"), bold(id));
            }
        }
    }
    Ok(())
}

async fn download_into(client: &ApiClient, record: &ConversionRecord, dir: &Path) -> Result<()> {
    let download = client
        .download_artifact(record)
        .await
        .context("Download failed")?;
    let path = save_download(&download, record, dir)
        .await
        .context("Failed to save download")?;
    eprintln!(
        "{} {}  {}",
        green("✔"),
        bold(&path.display().to_string()),
        dim(&format!("{} bytes", download.len()))
    );
    Ok(())
}

fn print_ready(record: &ConversionRecord) {
    println!("{}", record.id);
    if let Some(ref url) = record.pdf_url {
        println!("  PDF:   {}", cyan(url));
    }
    if let Some(ref url) = record.excel_url {
        println!("  Excel: {}", cyan(url));
    }
}

fn print_profile(user: &UserProfile) {
    println!("{}  {}", user.id, bold(&user.email));
    if let Some(ref url) = user.profile_image_url {
        println!("  Avatar:  {}", cyan(url));
    }
    if let Some(created) = user.created_at {
        println!("  Joined:  {}", dim(&created.format("%Y-%m-%d").to_string()));
    }
}

fn print_table(records: &[ConversionRecord]) {
    if records.is_empty() {
        eprintln!("{}", dim("No conversions yet."));
        return;
    }
    for r in records {
        let created = r
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        let state = if r.has_artifact() {
            green("ready")
        } else {
            dim("processing")
        };
        let size = r
            .file_size
            .map(|s| format!("{s} B"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<26} {}  {:<32} {:>10}  {}",
            r.id,
            dim(&created),
            r.original_file_name,
            size,
            state
        );
    }
}
