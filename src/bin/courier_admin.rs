//! Courier account administration CLI.
//!
//! Thin front end over [`courier::AccountAdmin`]: every command prints a
//! one-line summary, and a failed operation is reported, not raised.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier::{AccountAdmin, Config, Credential, VERSION};

#[derive(Parser)]
#[command(name = "courier-admin")]
#[command(version = VERSION)]
#[command(about = "Courier account administration", long_about = None)]
struct Cli {
    /// Domain to operate on (default from config, else localhost)
    #[arg(long, global = true)]
    domain: Option<String>,

    /// Config file (default: <config dir>/courier/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user
    Register {
        /// Account name
        username: String,
        /// Password
        password: String,
    },

    /// Remove a user
    Unregister {
        /// Account name
        username: String,
    },

    /// List registered users
    List,

    /// Change a user's password
    Password {
        /// Account name
        username: String,
        /// New password
        new_password: String,
    },

    /// Register the demo accounts (alice, bob, charlie)
    Bulk,
}

const DEMO_ACCOUNTS: [(&str, &str); 3] = [
    ("alice", "password123"),
    ("bob", "secret456"),
    ("charlie", "test789"),
];

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        },
    };

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = Config::load(cli.config)?.admin;
    if let Some(domain) = cli.domain {
        config.domain = domain;
    }
    let admin = AccountAdmin::new(config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&admin, cli.command));
    Ok(())
}

async fn run(admin: &AccountAdmin, command: Commands) {
    let domain = admin.domain().to_string();
    match command {
        Commands::Register { username, password } => {
            println!("Registering user: {username}@{domain}");
            let outcome = admin.register(&username, &Credential::new(password)).await;
            if outcome.success {
                println!("User {username}@{domain} registered successfully");
            } else {
                println!("Registration failed: {}", outcome.stderr);
            }
        },

        Commands::Unregister { username } => {
            println!("Unregistering user: {username}@{domain}");
            let outcome = admin.unregister(&username).await;
            if outcome.success {
                println!("User {username}@{domain} removed");
            } else {
                println!("Removal failed: {}", outcome.stderr);
            }
        },

        Commands::List => {
            println!("Users registered on {domain}:");
            match admin.registered_users().await {
                Ok(users) if users.is_empty() => println!("  No users registered"),
                Ok(users) => {
                    for user in &users {
                        println!("  {user}@{domain}");
                    }
                    println!("\nTotal: {} users", users.len());
                },
                Err(e) => println!("Failed to list users: {}", e.stderr),
            }
        },

        Commands::Password {
            username,
            new_password,
        } => {
            println!("Changing password for: {username}@{domain}");
            let outcome = admin
                .change_password(&username, &Credential::new(new_password))
                .await;
            if outcome.success {
                println!("Password changed for {username}@{domain}");
            } else {
                println!("Password change failed: {}", outcome.stderr);
            }
        },

        Commands::Bulk => {
            let accounts: Vec<(String, Credential)> = DEMO_ACCOUNTS
                .iter()
                .map(|(user, pass)| ((*user).to_string(), Credential::new(*pass)))
                .collect();
            println!("Bulk registering {} users...", accounts.len());
            let registered = admin.bulk_register(&accounts).await;
            println!("Successfully registered {registered}/{} users", accounts.len());
        },
    }
}
