//! Runnable sender/receiver endpoint over a real UDP socket. Grounded in
//! `src/bin/moonshine.rs`: `clap` argument parsing with a verbosity count,
//! `Config::read_from_file`, an `async_shutdown::ShutdownManager` driven
//! by a `ctrl_c` task, generalized from moonshine's single-process server
//! to a peer-to-peer sender/receiver pair since this transport has no
//! webserver/session-negotiation layer of its own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_shutdown::ShutdownManager;
use clap::{Parser, ValueEnum};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use framecast::config::Config;
use framecast::decoder::Decoder;
use framecast::receiver::Receiver;
use framecast::sender::Sender;
use framecast::wire::Packet;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Send,
    Receive,
}

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Path to configuration file.
    config: PathBuf,

    /// Which side of the transport to run.
    #[clap(long, value_enum)]
    role: Role,

    /// Local UDP address to bind to.
    #[clap(long)]
    bind: SocketAddr,

    /// Remote peer address. Required for `--role send`; for `--role
    /// receive` it's learned from the first datagram if omitted.
    #[clap(long)]
    peer: Option<SocketAddr>,

    /// Show more log messages.
    #[clap(long, short)]
    #[clap(action = clap::ArgAction::Count)]
    verbose: u8,

    /// Show less log messages.
    #[clap(long, short)]
    #[clap(action = clap::ArgAction::Count)]
    quiet: u8,
}

fn log_filter(verbose: u8, quiet: u8) -> EnvFilter {
    let level = match i16::from(verbose) - i16::from(quiet) {
        ..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        2.. => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), ()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.verbose, args.quiet))
        .init();

    let config = Config::read_from_file(&args.config).map_err(|e| {
        tracing::error!("Failed to load configuration: {e}");
    })?;
    tracing::debug!("Using configuration:\n{:#?}", config);

    let socket = UdpSocket::bind(args.bind).await.map_err(|e| {
        tracing::error!("Failed to bind {}: {e}", args.bind);
    })?;
    tracing::info!("Bound to {}", args.bind);

    let shutdown = ShutdownManager::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to wait for CTRL+C: {e}");
                std::process::exit(1);
            }
            tracing::info!("Received interrupt signal. Shutting down...");
            shutdown.trigger_shutdown(0).ok();
        }
    });

    let run = match args.role {
        Role::Send => {
            let Some(peer) = args.peer else {
                tracing::error!("--peer is required for --role send");
                return Err(());
            };
            tokio::spawn(run_sender(config, socket, peer, shutdown.clone()))
        }
        Role::Receive => tokio::spawn(run_receiver(config, socket, args.peer, shutdown.clone())),
    };

    shutdown.wait_shutdown_triggered().await;
    run.abort();
    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn run_sender(config: Config, socket: UdpSocket, peer: SocketAddr, shutdown: ShutdownManager<i32>) {
    let epoch = Instant::now();
    let policy = match config.build_policy() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Failed to build FEC policy: {e}");
            shutdown.trigger_shutdown(1).ok();
            return;
        }
    };
    let sender_cfg = match config.sender_config(epoch) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid sender configuration: {e}");
            shutdown.trigger_shutdown(1).ok();
            return;
        }
    };
    tracing::info!("Sending with FEC policy {:?}", policy.name());

    let mut sender = Sender::new(policy, sender_cfg);
    let frame_interval = Duration::from_secs_f64(1.0 / config.fps as f64);
    let frame_bytes = ((config.bitrate_kbps() as u64 * 1000 / 8) as f64 / config.fps as f64) as usize;

    let mut frame_tick = tokio::time::interval(frame_interval);
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rtx_tick = tokio::time::interval(Duration::from_millis(1));
    rtx_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let pacing_sleep = tokio::time::sleep(Duration::from_micros(1));
    tokio::pin!(pacing_sleep);

    let mut recv_buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            _ = frame_tick.tick() => {
                let now = Instant::now();
                let groups = sender.send_frame(frame_bytes.max(1), now);
                tracing::trace!("Enqueued {} groups for a new frame", groups.len());
            }
            _ = rtx_tick.tick() => {
                let now = Instant::now();
                let retransmitted = sender.check_retransmission(now);
                if !retransmitted.is_empty() {
                    tracing::debug!("Retransmitted groups {:?}", retransmitted);
                }
            }
            () = &mut pacing_sleep, if !sender.pacing.is_empty() => {
                if let Some(pkt) = sender.pacing.pop_next() {
                    let bytes = pkt.serialize();
                    if let Err(e) = socket.send_to(&bytes, peer).await {
                        tracing::warn!("send_to {peer} failed: {e}");
                    }
                }
                let interval = sender.pacing.interval().max(Duration::from_micros(1));
                pacing_sleep.as_mut().reset(tokio::time::Instant::now() + interval);
            }
            result = socket.recv_from(&mut recv_buf) => {
                let Ok((n, _from)) = result else { continue };
                let now = Instant::now();
                match Packet::deserialize(&recv_buf[..n]) {
                    Ok(Packet::Ack(ack)) => sender.on_ack(&ack, now),
                    Ok(Packet::FrameAck(fa)) => sender.on_frame_ack(fa.frame_id),
                    Ok(Packet::NetState(ns)) => sender.on_net_state(&ns),
                    Ok(_) => tracing::trace!("Sender ignored a data-plane packet from the peer"),
                    Err(e) => tracing::debug!("Dropped malformed packet: {e}"),
                }
            }
            _ = shutdown.wait_shutdown_triggered() => break,
        }
    }
}

async fn run_receiver(config: Config, socket: UdpSocket, mut peer: Option<SocketAddr>, shutdown: ShutdownManager<i32>) {
    let epoch = Instant::now();
    let mut receiver = Receiver::new(config.delay_ddl(), config.receiver_window(), epoch);
    let mut decoder = Decoder::new();

    let mut timeout_tick = tokio::time::interval((config.delay_ddl() / 4).max(Duration::from_millis(1)));
    timeout_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut feedback_tick = tokio::time::interval(Duration::from_millis(16));
    feedback_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut recv_buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut recv_buf) => {
                let Ok((n, from)) = result else { continue };
                peer.get_or_insert(from);
                let now = Instant::now();
                match Packet::deserialize(&recv_buf[..n]) {
                    Ok(pkt @ (Packet::Data { .. } | Packet::Fec { .. } | Packet::DupFec { .. })) => {
                        let payload_size = n;
                        if let Some(event) = receiver.on_packet(&pkt, payload_size, now) {
                            let ack = Packet::Ack(event.ack).serialize();
                            if let Err(e) = socket.send_to(&ack, from).await {
                                tracing::warn!("send_to {from} failed: {e}");
                            }
                            for digest in event.decoded {
                                if let Some(frame_ack) = decoder.on_data_decoded(
                                    digest.frame_id,
                                    digest.frame_pkt_num,
                                    digest.pkt_id_in_frame,
                                    now.saturating_duration_since(epoch).as_micros() as u64,
                                ) {
                                    let bytes = Packet::FrameAck(frame_ack).serialize();
                                    if let Err(e) = socket.send_to(&bytes, from).await {
                                        tracing::warn!("send_to {from} failed: {e}");
                                    }
                                }
                            }
                        }
                    }
                    Ok(_) => tracing::trace!("Receiver ignored a feedback packet from the peer"),
                    Err(e) => tracing::debug!("Dropped malformed packet: {e}"),
                }
            }
            _ = timeout_tick.tick() => {
                let timed_out = receiver.sweep_timeouts(Instant::now());
                if !timed_out.is_empty() {
                    tracing::debug!("Groups timed out: {:?}", timed_out);
                }
            }
            _ = feedback_tick.tick() => {
                if let Some(peer) = peer {
                    let ns = receiver.net_state_report();
                    let bytes = Packet::NetState(ns).serialize();
                    if let Err(e) = socket.send_to(&bytes, peer).await {
                        tracing::warn!("send_to {peer} failed: {e}");
                    }
                }
                tracing::trace!("{} frames still unplayed, deadline-miss ratio {:.4}", decoder.unplayed_count(), decoder.deadline_miss_ratio());
            }
            _ = shutdown.wait_shutdown_triggered() => break,
        }
    }
}
