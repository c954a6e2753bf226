//! Postman CLI - subscribe, publish and inspect a Postman server

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use postman_client::{Callbacks, ConnectionState, PostmanClient, PostmanConfig};
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "postman")]
#[command(about = "Postman CLI - pub/sub over WebSocket")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server address (host:port, scheme and /postman path optional)
    #[arg(short, long, env = "POSTMAN_SERVER", default_value = "127.0.0.1:8800", global = true)]
    server: String,

    /// Connect over TLS (wss://)
    #[arg(long, env = "POSTMAN_SSL", global = true)]
    ssl: bool,

    /// Token for servers running in secure mode
    #[arg(long, env = "POSTMAN_TOKEN", global = true)]
    token: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    /// Seconds to wait for the connection to open
    #[arg(long, default_value_t = 5, global = true)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to channels and print every message until interrupted
    ///
    /// Examples:
    ///   postman listen TEST
    ///   postman listen TEST_CH/1 TEST_CH/2 --info my-client
    Listen {
        /// Channels to subscribe to
        #[arg(required = true)]
        channels: Vec<String>,

        /// Client info reported to the server
        #[arg(long, default_value = "")]
        info: String,

        /// Print messages in receipt order
        #[arg(long)]
        ordered: bool,
    },

    /// Publish one message
    ///
    /// Examples:
    ///   postman publish TEST hello
    ///   postman publish 'TEST_CH/*' hello --tag greeting
    Publish {
        /// Target channel (a trailing /* reaches every sub-channel)
        channel: String,

        /// Message body
        message: String,

        /// Message tag
        #[arg(long, default_value = "")]
        tag: String,

        /// Message extention
        #[arg(long = "ext", default_value = "")]
        extention: String,
    },

    /// Show server version and channel members
    Status,

    /// Measure a heartbeat round trip
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli);
    let connect_timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Listen {
            channels,
            info,
            ordered,
        } => listen(config, channels, info, ordered).await,
        Commands::Publish {
            channel,
            message,
            tag,
            extention,
        } => publish(config, connect_timeout, channel, message, tag, extention).await,
        Commands::Status => status(config, connect_timeout).await,
        Commands::Ping => ping(config, connect_timeout).await,
    }
}

fn build_config(cli: &Cli) -> PostmanConfig {
    let mut config = PostmanConfig::new(&cli.server);
    if cli.ssl {
        config = config.secure();
    }
    if let Some(token) = &cli.token {
        config = config.secure_token(token);
    }
    if cli.insecure {
        config = config.dangerous_skip_cert_verify();
    }
    config
}

fn error_logging() -> Callbacks {
    Callbacks::new().on_error(|e| warn!(error = %e, "Postman error"))
}

async fn wait_connected(client: &PostmanClient, limit: Duration) -> Result<()> {
    let mut state_rx = client.state_receiver();
    let opened = timeout(
        limit,
        state_rx.wait_for(|state| *state != ConnectionState::Connecting),
    )
    .await;

    match opened {
        Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
        Ok(_) => bail!("Could not connect to {}", client.endpoint()),
        Err(_) => bail!("Timed out connecting to {}", client.endpoint()),
    }
}

async fn listen(config: PostmanConfig, channels: Vec<String>, info: String, ordered: bool) -> Result<()> {
    let config = if ordered { config.ordered_dispatch() } else { config };

    let callbacks = error_logging()
        .on_connect(|| info!("Connected"))
        .on_close(|| info!("Connection closed"))
        .on_message(|channel, message, tag, extention| {
            println!("[{}] {}\t{}\t{}", channel, message, tag, extention);
        });
    let client = PostmanClient::new(config, callbacks);

    // Subscriptions are queued until the connection opens.
    client.connect().await;
    for channel in &channels {
        client.subscribe_with_info(channel, &info).await;
    }
    info!(channels = ?channels, url = %client.endpoint(), "Listening");

    tokio::select! {
        _ = client.connect_and_wait() => {
            bail!("Connection to {} ended", client.endpoint());
        }
        _ = signal::ctrl_c() => {
            info!("Interrupted, disconnecting");
        }
    }

    for channel in &channels {
        client.unsubscribe(channel).await;
    }
    client.disconnect().await;
    Ok(())
}

async fn publish(
    config: PostmanConfig,
    limit: Duration,
    channel: String,
    message: String,
    tag: String,
    extention: String,
) -> Result<()> {
    let client = PostmanClient::new(config, error_logging());
    client.connect().await;
    wait_connected(&client, limit).await?;

    client.publish_tagged(&channel, &message, &tag, &extention).await;
    info!(channel = %channel, "Published");

    client.disconnect().await;
    Ok(())
}

async fn status(config: PostmanConfig, limit: Duration) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callbacks = error_logging().on_status(move |report| {
        let _ = tx.send(report.clone());
    });
    let client = PostmanClient::new(config, callbacks);
    client.connect().await;
    wait_connected(&client, limit).await?;

    client.status().await;
    let report = timeout(limit, rx.recv()).await;
    client.disconnect().await;

    let Ok(Some(report)) = report else {
        bail!("No status report from {}", client.endpoint());
    };

    println!("version: {}", report.version);
    for (channel, members) in &report.channels {
        println!("{} ({})", channel, members.len());
        for member in members {
            println!("  {}", member);
        }
    }
    Ok(())
}

async fn ping(config: PostmanConfig, limit: Duration) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let callbacks = error_logging().on_heartbeat(move || {
        let _ = tx.send(Instant::now());
    });
    let client = PostmanClient::new(config, callbacks);
    client.connect().await;
    wait_connected(&client, limit).await?;

    let start = Instant::now();
    client.ping().await;
    let pong = timeout(limit, rx.recv()).await;
    client.disconnect().await;

    match pong {
        Ok(Some(at)) => {
            println!("pong in {}ms", at.duration_since(start).as_millis());
            Ok(())
        }
        _ => bail!("No heartbeat from {}", client.endpoint()),
    }
}
