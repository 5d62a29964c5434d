//! Binary entrypoint for the Postbox CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status` - print store totals
//! - `post <content> [--client <id>]` - run one public post through the write path
//!   (quotas only span a single process; see `ingest`)
//! - `send <recipient> <content> [--client <id>]` - run one direct post
//! - `ingest` - read `<client> [@<recipient>] <content>` lines from stdin
//! - `register <username>` - create an account (password prompted, Argon2 hashed)
//! - `inbox <username> [--limit <n>]` - list a user's direct messages
//!
//! See the library crate docs for module-level details: `postbox::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use tokio::io::BufReader;

use postbox::admission::{spawn_sweeper, AdmissionController};
use postbox::config::{Config, SecurityConfig};
use postbox::ingest;
use postbox::service::MessageService;
use postbox::storage::{Store, StoreError};
use postbox::validation::validate_credentials;

#[derive(Parser)]
#[command(name = "postbox")]
#[command(about = "Public feed and direct messages with per-client admission control")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Show store totals
    Status,
    /// Post to the public feed.
    ///
    /// Admission state lives in the running process, so separate `post`
    /// invocations are never throttled against each other. Use `ingest` to
    /// apply quotas across many posts.
    Post {
        content: String,
        /// Client identifier used for admission control
        #[arg(long, default_value = "local")]
        client: String,
    },
    /// Send a direct message to a recipient id.
    ///
    /// Like `post`, quotas only apply within one invocation; use `ingest` for
    /// throttled batches.
    Send {
        recipient: String,
        content: String,
        /// Client identifier used for admission control
        #[arg(long, default_value = "local")]
        client: String,
    },
    /// Process posts from stdin, one per line, under shared quotas
    Ingest,
    /// Create an account
    Register { username: String },
    /// List direct messages for a user
    Inbox {
        username: String,
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        let cfg = Config::load(&cli.config).await?;
        tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = match Config::load(&cli.config).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}; falling back to defaults (run `postbox init` to create one)");
            Config::default()
        }
    };
    init_logging(&Some(config.clone()), cli.verbose);

    let store = Arc::new(Store::open(&config.storage).await?);
    let admission = Arc::new(AdmissionController::new(config.admission.clone()));
    let service = MessageService::new(Arc::clone(&admission), Arc::clone(&store));

    match cli.command {
        // Written before any config existed
        Commands::Init => {}
        Commands::Status => {
            let stats = store.stats().await;
            println!("Snapshot:        {}", store.path().display());
            println!("Messages:        {} (cap {})", stats.messages, store.max_messages());
            println!("Users:           {}", stats.users);
            println!("Next message id: {}", stats.next_message_id);
            println!("Next user id:    {}", stats.next_user_id);
        }
        Commands::Post { content, client } => {
            let outcome = service.post_public(&client, &content, Utc::now()).await?;
            println!("{}", outcome.to_json());
        }
        Commands::Send {
            recipient,
            content,
            client,
        } => {
            let outcome = service
                .post_to_recipient(&client, &recipient, &content, Utc::now())
                .await?;
            println!("{}", outcome.to_json());
        }
        Commands::Ingest => {
            let sweeper = match config.admission.sweep_interval_seconds {
                0 => None,
                secs => Some(spawn_sweeper(Arc::clone(&admission), Duration::from_secs(secs))),
            };
            let stdin = BufReader::new(tokio::io::stdin());
            let summary = ingest::run(&service, stdin, &mut std::io::stdout()).await?;
            if let Some(handle) = sweeper {
                handle.abort();
            }
            let counters = postbox::metrics::snapshot();
            info!(
                "Ingest finished: lines={} skipped={} failed={} allowed={} denied={} stored={} persist_failures={} clients={}",
                summary.lines,
                summary.skipped,
                summary.failed,
                counters.admission_allowed,
                counters.denied_total(),
                counters.messages_stored,
                counters.persist_failures,
                admission.tracked_clients()
            );
        }
        Commands::Register { username } => {
            let password = rpassword::prompt_password("Password: ")?;
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != confirm {
                return Err(anyhow!("passwords do not match"));
            }
            validate_credentials(&username, &password)?;
            let hash = hash_password(config.security.as_ref(), &password)?;
            let user = loop {
                match store.create_user(&username, &hash, &make_recipient_id()).await {
                    Ok(user) => break user,
                    Err(StoreError::RecipientTaken(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            println!("Account created. Recipient link: /u/{}", user.recipient_id);
        }
        Commands::Inbox { username, limit } => {
            let user = store
                .get_user_by_username(&username)
                .await
                .ok_or_else(|| anyhow!("no such user '{}'", username))?;
            for m in store.get_messages_for_user(user.id, limit).await {
                println!(
                    "#{} {} {}",
                    m.id,
                    m.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    m.content
                );
            }
        }
    }

    Ok(())
}

/// Twelve lowercase hex characters, as used in public send links.
fn make_recipient_id() -> String {
    let bytes: [u8; 6] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_password(security: Option<&SecurityConfig>, password: &str) -> Result<String> {
    use argon2::{Algorithm, Argon2, Params, Version};
    use password_hash::{PasswordHasher, SaltString};

    let argon = match security.and_then(|s| s.argon2.as_ref()) {
        Some(cfg) => {
            let params = Params::new(
                cfg.memory_kib.unwrap_or(Params::DEFAULT_M_COST),
                cfg.time_cost.unwrap_or(Params::DEFAULT_T_COST),
                cfg.parallelism.unwrap_or(Params::DEFAULT_P_COST),
                None,
            )
            .map_err(|e| anyhow!("Invalid argon2 params: {e}"))?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        }
        None => Argon2::default(),
    };
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = argon
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hash failure: {e}"))?;
    Ok(hash.to_string())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let open_append = |path: &str| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    };
    let main_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_deref())
        .and_then(open_append)
        .map(|f| Arc::new(std::sync::Mutex::new(f)));
    let security_file = config
        .as_ref()
        .and_then(|c| c.logging.security_file.as_deref())
        .and_then(open_append)
        .map(|f| Arc::new(std::sync::Mutex::new(f)));
    // Without a log file the console is the only sink.
    let to_console = main_file.is_none() || atty::is(atty::Stream::Stdout);

    builder.format(move |fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let line = format!("{} [{}] {}", ts, record.level(), record.args());

        if let Some(file) = &main_file {
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
        }
        if record.target() == "security" {
            if let Some(file) = &security_file {
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
            }
        }
        if to_console {
            writeln!(fmt, "{}", line)
        } else {
            Ok(())
        }
    });
    let _ = builder.try_init();
}
