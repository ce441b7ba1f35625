//! Headless meeting participant
//!
//! Joins a room through the WebSocket signaling server and maintains a
//! WebRTC mesh with every other participant.
//!
//! # Usage
//!
//! ```bash
//! # Join room "standup" as "bot-1"
//! cargo run --bin mesh_client -- \
//!   --signaling-url ws://localhost:8080 \
//!   --room standup \
//!   --user-id bot-1
//!
//! # ICE servers in the browser RTCIceServer JSON shape
//! MESH_ICE_SERVERS='[{"urls":"turn:turn.example.com:3478","username":"u","credential":"p"}]' \
//!   cargo run --bin mesh_client -- --room standup --user-id bot-1 --audio --video
//! ```

use anyhow::Context;
use clap::Parser;
use meeting_mesh::{
    IceRestartPolicy, IceServerConfig, LocalMediaSource, LocalTrack, MeshConfig, MeshSession,
    RtcConnectionFactory, WebSocketSignaling, DEFAULT_MAX_PEERS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Meeting mesh client
///
/// Headless participant that negotiates one WebRTC connection per remote
/// participant of a room.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling URL
    #[arg(
        long,
        default_value = "ws://localhost:8080",
        env = "MESH_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Room to join
    #[arg(short, long, env = "MESH_ROOM")]
    room: String,

    /// Local participant identity
    #[arg(short, long, env = "MESH_USER_ID")]
    user_id: String,

    /// STUN servers (comma-separated), ignored when --ice-servers is set
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// ICE servers as a JSON list of RTCIceServer descriptors
    #[arg(long, env = "MESH_ICE_SERVERS")]
    ice_servers: Option<String>,

    /// Maximum concurrent peer connections
    #[arg(long, default_value_t = DEFAULT_MAX_PEERS, env = "MESH_MAX_PEERS")]
    max_peers: usize,

    /// Maximum ICE restart attempts per failure
    #[arg(long, default_value_t = 5, env = "MESH_ICE_RESTART_ATTEMPTS")]
    ice_restart_attempts: u32,

    /// Initial ICE restart backoff in milliseconds
    #[arg(long, default_value_t = 1000, env = "MESH_ICE_RESTART_BACKOFF_INITIAL")]
    ice_restart_backoff_initial_ms: u64,

    /// Send an (idle) Opus audio track
    #[arg(long, default_value_t = false)]
    audio: bool,

    /// Send an (idle) VP8 video track
    #[arg(long, default_value_t = false)]
    video: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false, env = "MESH_LOG_JSON")]
    log_json: bool,
}

fn build_config(args: &Args) -> anyhow::Result<MeshConfig> {
    let ice_servers = match &args.ice_servers {
        Some(json) => IceServerConfig::list_from_json(json)?,
        None => args
            .stun_servers
            .iter()
            .map(|url| IceServerConfig::stun(url.clone()))
            .collect(),
    };

    let config = MeshConfig {
        signaling_url: args.signaling_url.clone(),
        ..Default::default()
    }
    .with_room(&args.room)
    .with_local_id(&args.user_id)
    .with_max_peers(args.max_peers)
    .with_ice_servers(ice_servers)
    .with_ice_restart(IceRestartPolicy {
        max_attempts: args.ice_restart_attempts,
        backoff_initial_ms: args.ice_restart_backoff_initial_ms,
        ..Default::default()
    });

    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, leaving room...");
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("mesh-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.log_json)?;

    info!(
        version = meeting_mesh::version(),
        room = %args.room,
        user_id = %args.user_id,
        "Mesh client starting"
    );

    let config = build_config(&args)?;
    info!(
        signaling_url = %config.signaling_url,
        max_peers = config.max_peers,
        ice_servers = config.ice_servers.len(),
        ice_restart_attempts = config.ice_restart.max_attempts,
        "Configuration loaded"
    );

    let (channel, inbound) = WebSocketSignaling::connect(&config.signaling_url).await?;
    let session = Arc::new(MeshSession::new(
        config,
        Arc::new(RtcConnectionFactory::new()?),
        Arc::new(channel),
    )?);

    let mut tracks = Vec::new();
    if args.audio {
        tracks.push(LocalTrack::audio("audio", &args.user_id));
    }
    if args.video {
        tracks.push(LocalTrack::video("video", &args.user_id));
    }
    if !tracks.is_empty() {
        session
            .attach_local_stream(LocalMediaSource::new(tracks))
            .await;
    }

    let mut streams = session.subscribe();
    tokio::spawn(async move {
        while streams.changed().await.is_ok() {
            let snapshot = streams.borrow_and_update().clone();
            let with_media = snapshot.values().filter(|s| s.is_some()).count();
            info!(peers = snapshot.len(), with_media, "Mesh updated");
        }
    });

    session.join()?;

    let runner = Arc::clone(&session);
    let mut run = tokio::spawn(async move { runner.run(inbound).await });

    loop {
        tokio::select! {
            result = &mut run => {
                match result {
                    Ok(Ok(())) => warn!("Signaling connection lost"),
                    Ok(Err(e)) => warn!("Session stopped: {}", e),
                    Err(e) => warn!("Session task failed: {}", e),
                }
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    info!("Shutdown signal received");
                    run.abort();
                    break;
                }
            }
        }
    }

    session.leave_all().await?;
    // Let the writer flush the leave event
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("Left room");

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}
