use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use pushcast::config::{AppConfig, PushConfig, USERS_FILE};

#[allow(clippy::large_enum_variant)]
pub(crate) enum RunOutcome {
    Serve(AppConfig),
    Exit(i32),
}

pub(crate) fn run() -> RunOutcome {
    let cli = Cli::parse();
    if let Some(Command::HashPassword(args)) = cli.command {
        return RunOutcome::Exit(run_hash_password(args));
    }

    match resolve_config(cli.serve) {
        Ok(config) => RunOutcome::Serve(config),
        Err(err) => {
            eprintln!("error: {err}");
            RunOutcome::Exit(2)
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pushcast", version, about = "Web Push notification server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "PUSHCAST_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
    #[arg(long, env = "PUSHCAST_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// Contact address put into delivery tokens as `mailto:`.
    #[arg(long, env = "PUSHCAST_EMAIL")]
    contact_email: Option<String>,
    /// Seconds a push service should hold an undelivered message.
    #[arg(long, env = "PUSHCAST_TTL", default_value_t = 86_400)]
    ttl: u32,
    #[arg(long, env = "PUSHCAST_BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,
    /// Minimum seconds between arming the timer and a run.
    #[arg(long, env = "PUSHCAST_RUN_DELAY", default_value_t = 5)]
    run_delay: u64,
    #[arg(long, env = "PUSHCAST_SEND_TIMEOUT", default_value_t = 30)]
    send_timeout: u64,
    /// Defaults to `users.toml` inside the data directory.
    #[arg(long, env = "PUSHCAST_USERS_FILE")]
    users_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an argon2 hash for the users file.
    HashPassword(HashPasswordArgs),
}

#[derive(Args, Debug)]
struct HashPasswordArgs {
    password: String,
}

fn run_hash_password(args: HashPasswordArgs) -> i32 {
    match pushcast::auth::hash_password(&args.password) {
        Ok(hash) => {
            println!("{hash}");
            0
        }
        Err(err) => {
            eprintln!("failed to hash password: {err}");
            1
        }
    }
}

fn resolve_config(args: ServeArgs) -> Result<AppConfig, String> {
    let contact_email = args
        .contact_email
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if contact_email.is_empty() {
        return Err("--contact-email (or PUSHCAST_EMAIL) is required".to_string());
    }
    if !contact_email.contains('@') {
        return Err(format!("invalid contact e-mail '{contact_email}'"));
    }
    if args.batch_size == 0 {
        return Err("batch size must be greater than 0".to_string());
    }
    if args.send_timeout == 0 {
        return Err("send timeout must be greater than 0".to_string());
    }

    let users_file = args
        .users_file
        .unwrap_or_else(|| args.data_dir.join(USERS_FILE));
    Ok(AppConfig {
        bind: args.bind,
        data_dir: args.data_dir,
        users_file,
        push: PushConfig {
            contact_email: contact_email.to_string(),
            ttl_seconds: args.ttl,
            batch_size: args.batch_size,
            run_delay: Duration::from_secs(args.run_delay),
            send_timeout: Duration::from_secs(args.send_timeout),
            padding_target: 0,
        },
    })
}
