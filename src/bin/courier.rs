//! Courier CLI binary.
//!
//! # Commands
//!
//! - `send` - Log in, announce presence, fetch the roster, send one message
//!   and print whatever arrives during the wait window
//! - `signup` - Create an account with in-band registration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use courier::{
    ClientConfig, Config, Credential, Identity, InboundMessage, MessageKind, SecurityMode,
    SessionClient, SessionMode, VERSION,
};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version = VERSION)]
#[command(about = "Courier - minimal text-messaging client", long_about = None)]
struct Cli {
    /// Server address (host[:port])
    #[arg(long, global = true)]
    server: Option<String>,

    /// Stream security: required or disabled
    #[arg(long, global = true)]
    security: Option<SecurityMode>,

    /// PEM file with trusted CA certificates
    #[arg(long, global = true)]
    ca_file: Option<PathBuf>,

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
    /// Send one message and wait for replies
    Send {
        /// Sender address (name@domain)
        #[arg(env = "XMPP_SENDER_JID")]
        sender: String,

        /// Sender password
        #[arg(env = "XMPP_SENDER_PASSWORD", hide_env_values = true)]
        password: String,

        /// Recipient address (name@domain)
        #[arg(env = "XMPP_RECIPIENT_JID")]
        recipient: String,

        /// Message body (default: timestamped greeting)
        #[arg(short, long)]
        message: Option<String>,

        /// Seconds to wait for replies before disconnecting
        #[arg(long)]
        wait_secs: Option<u64>,
    },

    /// Register a new account in-band
    Signup {
        /// Account name
        username: String,

        /// Account password
        password: String,

        /// Service domain
        #[arg(long, default_value = "localhost")]
        domain: String,

        /// Log in on the same stream after registering
        #[arg(long)]
        login: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        },
    };

    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.clone())?.client;
    if let Some(server) = &cli.server {
        config.server.clone_from(server);
    }
    if let Some(mode) = cli.security {
        config.security.mode = Some(mode);
    }
    if let Some(path) = &cli.ca_file {
        config.security.ca_file = Some(path.clone());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Send {
            sender,
            password,
            recipient,
            message,
            wait_secs,
        } => {
            let sender = parse_identity(&sender);
            let recipient = parse_identity(&recipient);
            runtime.block_on(cmd_send(
                config,
                sender,
                Credential::new(password),
                recipient,
                message,
                wait_secs,
            ))
        },
        Commands::Signup {
            username,
            password,
            domain,
            login,
        } => {
            let identity = match Identity::new(&username, &domain) {
                Ok(identity) => identity,
                Err(e) => usage_error(&e.to_string()),
            };
            runtime.block_on(cmd_signup(
                config.with_login_after_register(login),
                identity,
                Credential::new(password),
            ))
        },
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn usage_error(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn parse_identity(s: &str) -> Identity {
    match Identity::parse(s) {
        Ok(identity) => identity,
        Err(e) => usage_error(&e.to_string()),
    }
}

async fn cmd_send(
    config: ClientConfig,
    sender: Identity,
    password: Credential,
    recipient: Identity,
    message: Option<String>,
    wait_secs: Option<u64>,
) -> anyhow::Result<()> {
    let server = config.server.clone();
    let window = wait_secs.map_or_else(|| config.reply_window(), Duration::from_secs);

    println!("Server:    {server}");
    println!("User:      {sender}");
    println!("Recipient: {recipient}");
    println!("{}", "-".repeat(40));

    let mut client = match SessionClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            println!("Configuration error: {e}");
            return Ok(());
        },
    };
    client.on_message(|msg: &InboundMessage| {
        if matches!(msg.kind, MessageKind::Chat | MessageKind::Normal) {
            println!("Received from {}: {}", msg.from, msg.body);
        }
    });

    let mut session = match client.connect(sender, password, &server).await {
        Ok(session) => session,
        Err(e) => {
            println!("Connection failed: {e}");
            return Ok(());
        },
    };

    if let Err(e) = session.authenticate().await {
        println!("Login failed: {e}");
        return Ok(());
    }
    println!("Connected as {}", session.identity());

    if let Err(e) = session.announce_presence().await {
        println!("Presence failed: {e}");
    }
    match session.fetch_roster().await {
        Ok(roster) => println!("Roster: {} contact(s)", roster.len()),
        Err(e) => println!("Roster fetch failed: {e}"),
    }

    let body = message.unwrap_or_else(|| {
        format!(
            "Hello from courier! Test at {}",
            chrono::Local::now().format("%H:%M:%S")
        )
    });
    println!("Sending: {body}");
    match session
        .send_message(&recipient, &body, MessageKind::Chat)
        .await
    {
        Ok(()) => {
            if let Err(e) = session.process(window).await {
                println!("Connection lost: {e}");
            }
        },
        Err(e) => println!("Send failed: {e}"),
    }

    println!("Disconnecting...");
    session.disconnect().await;
    Ok(())
}

async fn cmd_signup(
    config: ClientConfig,
    identity: Identity,
    password: Credential,
) -> anyhow::Result<()> {
    let server = config.server.clone();
    let login = config.login_after_register;
    println!("Registering {identity} on {server}");

    let client = match SessionClient::new(config) {
        Ok(client) => client.with_mode(SessionMode::Register),
        Err(e) => {
            println!("Configuration error: {e}");
            return Ok(());
        },
    };

    let mut session = match client
        .connect(identity.clone(), password.clone(), &server)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            println!("Connection failed: {e}");
            return Ok(());
        },
    };

    if let Err(e) = session.register(&identity, &password).await {
        println!("Registration failed: {e}");
        return Ok(());
    }
    println!("Account {identity} created");

    if login {
        match session.authenticate().await {
            Ok(()) => println!("Logged in as {identity}"),
            Err(e) => println!("Login failed: {e}"),
        }
    }
    session.disconnect().await;
    Ok(())
}
