//! incident-notify CLI
//!
//! Runs the notification link against the configured server and prints
//! incoming notifications. Also manages the stored session, the sound
//! preference and the config file.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use incident_notify::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "incident-notify")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live incident notifications over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: platform config dir, then ./incident-notify.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print notifications until interrupted
    Listen {
        /// WebSocket URL, overriding config and page meta
        #[arg(long)]
        url: Option<String>,
        /// Token to present instead of the stored session
        #[arg(long)]
        token: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or change the notification sound preference
    Sound {
        #[arg(value_enum, default_value = "status")]
        action: SoundAction,
    },

    /// Manage the stored session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SoundAction {
    On,
    Off,
    Toggle,
    Status,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Store a token after logging in elsewhere
    Set {
        token: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// MANAGER, TECHNICIAN or CLIENT
        #[arg(long)]
        role: Option<String>,
    },
    /// Forget the stored session
    Clear,
    /// Show the stored session
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Listen { url, token } => listen(&config, url, token).await?,
        Commands::Config { output } => {
            let content = config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &content)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
        Commands::Sound { action } => {
            let store = preferences_store(&config);
            let enabled = match action {
                SoundAction::On => {
                    store.set_sound_enabled(true)?;
                    true
                }
                SoundAction::Off => {
                    store.set_sound_enabled(false)?;
                    false
                }
                SoundAction::Toggle => store.toggle_sound()?,
                SoundAction::Status => store.sound_enabled()?,
            };
            println!("Notification sound: {}", if enabled { "on" } else { "off" });
        }
        Commands::Session { action } => session(&config, action)?,
    }

    Ok(())
}

fn preferences_store(config: &Config) -> PreferencesStore {
    PreferencesStore::new(config.storage.preferences_path()).with_defaults(Preferences {
        sound_enabled: config.link.sound_enabled,
    })
}

fn session(config: &Config, action: SessionAction) -> anyhow::Result<()> {
    let store = SessionStore::open(config.storage.session_path())?;

    match action {
        SessionAction::Set {
            token,
            email,
            name,
            role,
        } => {
            let role = match role {
                Some(role) => Some(
                    serde_json::from_value::<Role>(serde_json::Value::String(
                        role.trim().to_ascii_uppercase(),
                    ))
                    .with_context(|| format!("unknown role {:?}", role))?,
                ),
                None => None,
            };
            let user = UserInfo {
                email,
                name,
                role,
                ..UserInfo::default()
            };
            store.save_session(token, user)?;
            println!("Session saved to {:?}", store.path());
            if !store.is_authenticated() {
                println!("Warning: the token is expired or unreadable; the link will not connect");
            }
        }
        SessionAction::Clear => {
            store.clear()?;
            println!("Session cleared");
        }
        SessionAction::Status => {
            let session = store.session();
            println!("File:          {:?}", store.path());
            println!("Token stored:  {}", session.token.is_some());
            println!("Authenticated: {}", store.is_authenticated());
            if let Some(email) = &session.user.email {
                println!("Email:         {}", email);
            }
            if let Some(role) = session.user.role {
                println!("Role:          {:?} ({})", role, role.home_page());
            }
        }
    }

    Ok(())
}

/// Prints notices to the terminal
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: &Notice) {
        println!("{}", notice);
    }

    fn connection_status(&self, status: ConnectionStatus) {
        println!("-- {}", status);
    }

    fn badge(&self, unread: usize) {
        if let Some(label) = badge_label(unread) {
            println!("-- unread: {}", label);
        }
    }

    fn play_sound(&self) {
        print!("\x07");
    }

    fn incidents_updated(&self, record: &NotificationRecord) {
        tracing::info!(id = %record.id, kind = %record.kind, "Incident list changed");
    }
}

async fn listen(config: &Config, url: Option<String>, token: Option<String>) -> anyhow::Result<()> {
    let auth: Arc<dyn AuthContext> = match token {
        Some(token) => Arc::new(StaticCredential::new(token)),
        None => Arc::new(SessionStore::open(config.storage.session_path())?),
    };
    if !auth.is_authenticated() {
        bail!("no usable session; run `incident-notify session set <token>` or pass --token");
    }

    let mut resolver = EndpointResolver::from_config(&config.endpoint);
    if let Some(url) = url {
        resolver = resolver.with_override(url);
    }
    let endpoint = resolver.resolve()?;
    tracing::info!(
        url = %endpoint.url,
        environment = %resolver.environment(),
        "Starting notification link"
    );

    let services = LinkServices {
        auth,
        transport: Arc::new(WsTransport::new()),
        timer: Arc::new(TokioTimer),
        sink: Arc::new(|record: &NotificationRecord| {
            tracing::debug!(id = %record.id, "Delivered notification");
        }),
        notifier: Arc::new(ConsoleNotifier),
        preferences: Some(preferences_store(config)),
    };
    let (link, task) =
        NotificationLink::spawn(LinkSettings::from_config(&config.link), resolver, services);
    link.start()?;

    println!("Commands: focus, visible, start, disconnect, refresh, read <id>, read-all, clear,");
    println!("          list, unread, status, sound on|off, send <json>, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_command(&link, line.trim()).await? {
                        break;
                    }
                }
                None => {
                    // stdin closed; keep listening until interrupted
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    link.shutdown()?;
    task.await.context("notification link task failed")?;
    Ok(())
}

/// Returns false when the user asked to quit
async fn run_command(link: &NotificationLink, line: &str) -> anyhow::Result<bool> {
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "focus" => link.resume(ResumeTrigger::Focus)?,
        "visible" => link.resume(ResumeTrigger::Visible)?,
        "start" => link.start()?,
        "disconnect" => link.disconnect()?,
        "refresh" => link.refresh_session()?,
        "read" if !arg.is_empty() => link.mark_read(arg)?,
        "read-all" => link.mark_all_read()?,
        "clear" => link.clear()?,
        "list" | "unread" => {
            let records = if command == "list" {
                link.all_notifications().await?
            } else {
                link.unread_notifications().await?
            };
            for record in records {
                println!(
                    "{} {} [{}] {}: {}",
                    if record.read { " " } else { "*" },
                    record.id,
                    record.kind,
                    record.title,
                    record.message
                );
            }
        }
        "status" => {
            let snapshot = link.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        "sound" => match arg {
            "on" => link.set_sound_enabled(true)?,
            "off" => link.set_sound_enabled(false)?,
            _ => println!("usage: sound on|off"),
        },
        "send" => match serde_json::from_str(arg) {
            Ok(value) => link.send(value)?,
            Err(e) => println!("invalid JSON: {}", e),
        },
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command: {}", other),
    }

    Ok(true)
}
