use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use futures::StreamExt;
use huddle_framework::{
    loopback::{self, LoopbackNetwork},
    net::{join_name, ListenSpec, NamespaceError, StaticPrincipal},
    Channel, ChannelConfig, ChannelError,
};
use tokio::io::{AsyncBufReadExt, BufReader};

mod ui;

/// Chat with everyone joined to a huddle channel
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Root of the mount table that channels are found in
    #[arg(long, default_value = loopback::DEFAULT_ROOT)]
    mounttable: String,
    /// Proxy to receive messages through instead of listening directly
    #[arg(long)]
    proxy: Option<String>,
    /// Namespace path of the chat application
    #[arg(long, default_value = "apps/chat")]
    app: String,
    /// Channel to join beneath the application path
    #[arg(long, default_value = "public")]
    channel: String,
    /// Blessing to chat as
    #[arg(long, default_value = "dev/you@example.com")]
    blessing: String,
    /// Blessing of another local participant to join the channel with, may be repeated
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Log more detail to stderr, may be repeated
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Err(e) = stderrlog::new().verbosity(level).init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), TermError> {
    let net = LoopbackNetwork::default();
    let cfg = ChannelConfig {
        listen: ListenSpec {
            proxy: args.proxy.clone(),
        },
        ..Default::default()
    };
    let path = join_name(&args.app, &args.channel);

    let me = connect(&net, &args.mounttable, &args.blessing, cfg.clone(), &path)?;
    // Subscribed before joining so the first refresh is not missed
    let mut updates = me.member_updates();
    me.join().await?;

    let mut peers = Vec::with_capacity(args.peers.len());
    for blessing in args.peers.iter() {
        let peer = connect(&net, &args.mounttable, blessing, cfg.clone(), &path)?;
        peer.join().await?;
        if let Some(mut inbox) = peer.messages() {
            let name = peer.user_name();
            tokio::spawn(async move {
                while let Some(msg) = inbox.next().await {
                    println!("  ({} received) {}", name, ui::message(&msg));
                }
            });
        }
        peers.push(peer);
    }

    println!("{}", ui::welcome(&me.user_name(), &path, &args.mounttable));

    if let Some(mut inbox) = me.messages() {
        tokio::spawn(async move {
            while let Some(msg) = inbox.next().await {
                println!("{}", ui::message(&msg));
            }
        });
    }

    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let members = updates.borrow_and_update().clone();
            println!("{}", ui::members(&members));
        }
    });

    let result = chat(&me).await;

    for peer in peers.iter() {
        if let Err(e) = peer.leave().await {
            log::warn!("Failed to leave {} as {}: {}", path, peer.user_name(), e);
        }
    }
    me.leave().await?;

    result
}

/// Broadcast every line read from stdin until it closes, the user quits, or Ctrl-C is pressed
async fn chat(me: &Channel) -> Result<(), TermError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };

        let Some(line) = line else {
            return Ok(());
        };

        match line.trim() {
            "" => continue,
            "/quit" => return Ok(()),
            "/members" => match me.members().await {
                Ok(members) => println!("{}", ui::members(&members)),
                Err(e) => log::warn!("{}", e),
            },
            text => {
                let scheduled = me.broadcast(text);
                log::debug!("Sending message to {} member(s)", scheduled);
            }
        }
    }
}

fn connect(
    net: &LoopbackNetwork,
    mounttable: &str,
    blessing: &str,
    cfg: ChannelConfig,
    path: &str,
) -> Result<Channel, TermError> {
    let principal = Arc::new(StaticPrincipal::new([blessing]));
    let client = Arc::new(net.connect(mounttable, principal.clone())?);
    let ctx = huddle_framework::Context::new(principal, client.clone(), client, cfg);

    Ok(Channel::new(ctx, path))
}

/// Any error that ends the terminal session
#[derive(Debug, thiserror::Error)]
enum TermError {
    #[error("Failed to connect to the mount table: {0}")]
    Connect(#[from] NamespaceError),
    #[error("{0}")]
    Channel(#[from] ChannelError),
    #[error("Failed to read from stdin: {0}")]
    Io(#[from] std::io::Error),
}
