//! `hblink4`: DMR HomeBrew protocol repeater switch (§5 event loop, §6 CLI).

mod actions;
mod auth;
mod dmrd_routing;
mod fsm;
mod io;
mod outbound_client;
mod server;

use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use hblink4_config::Config;
use hblink4_core::UserCache;
use hblink4_events::EventSink;
use hblink4_wire::{Frame, RadioId};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::actions::Action;
use crate::io::Listeners;
use crate::server::{Location, Server};

/// DMR HomeBrew protocol repeater switch.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration JSON file.
    config: PathBuf,
}

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_BIND_FAILURE: i32 = 2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "configuration error");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            std::process::exit(EXIT_BIND_FAILURE);
        }
    };

    let exit_code = runtime.block_on(run(config));
    std::process::exit(exit_code);
}

/// One datagram arriving from an outbound's own socket, or a notification
/// that the socket itself failed (§4.8 Transport errors).
enum OutboundIo {
    Packet(Vec<u8>),
    SocketError,
}

async fn run(config: Config) -> i32 {
    let listeners = match Listeners::bind(
        config.global.bind_ipv4.as_deref(),
        config.global.port_ipv4,
        config.global.bind_ipv6.as_deref(),
        config.global.port_ipv6,
        config.global.disable_ipv6,
    ) {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, "failed to bind listener socket");
            return EXIT_BIND_FAILURE;
        }
    };

    let user_cache = match &config.global.user_cache.path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(csv) => match UserCache::load_csv(&csv, Duration::from_secs(config.global.user_cache.timeout), Instant::now()) {
                Ok(cache) => cache,
                Err(err) => {
                    warn!(error = %err, "failed to parse user cache CSV, starting with an empty cache");
                    UserCache::new(Duration::from_secs(config.global.user_cache.timeout))
                }
            },
            Err(err) => {
                warn!(path = %path, error = %err, "failed to read user cache CSV, starting with an empty cache");
                UserCache::new(Duration::from_secs(config.global.user_cache.timeout))
            }
        },
        None => UserCache::new(Duration::from_secs(config.global.user_cache.timeout)),
    };

    let mut server = match Server::new(&config, user_cache) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "invalid outbound_connections options string");
            return EXIT_CONFIG_ERROR;
        }
    };

    let mut outbound_sockets: Vec<Arc<UdpSocket>> = Vec::with_capacity(server.outbounds.len());
    for outbound in &server.outbounds {
        let sock = match UdpSocket::bind(("0.0.0.0", 0)).await {
            Ok(sock) => sock,
            Err(err) => {
                error!(error = %err, "failed to bind outbound client socket");
                return EXIT_BIND_FAILURE;
            }
        };
        if let Err(err) = sock.connect((outbound.host.as_str(), outbound.port)).await {
            warn!(name = %outbound.name, error = %err, "failed to resolve outbound host, will retry on the usual backoff");
        }
        outbound_sockets.push(Arc::new(sock));
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<(usize, OutboundIo)>(256);
    for (idx, sock) in outbound_sockets.iter().cloned().enumerate() {
        let tx = outbound_tx.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                match sock.recv(&mut buf).await {
                    Ok(n) => {
                        if tx.send((idx, OutboundIo::Packet(buf[..n].to_vec()))).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(idx, error = %err, "outbound socket recv failed");
                        if tx.send((idx, OutboundIo::SocketError)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
    drop(outbound_tx);

    let event_sink = EventSink::connect(config.dashboard.as_ref()).await;

    let start_actions = server.tick_reconnects(Instant::now());
    apply_actions(&listeners, &outbound_sockets, &server, &event_sink, start_actions).await;

    let mut peer_timeout_interval = time::interval(Duration::from_secs(config.global.timeout_duration.max(1)));
    peer_timeout_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream_scan_interval = time::interval(Duration::from_secs(1));
    stream_scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut user_cache_interval = time::interval(Duration::from_secs(60));
    user_cache_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reconnect_interval = time::interval(Duration::from_secs(5));
    reconnect_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ping_interval = time::interval(Duration::from_secs(config.global.timeout_duration.max(1)));
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buf4 = [0u8; 2048];
    let mut buf6 = [0u8; 2048];

    info!("hblink4 listening");

    loop {
        tokio::select! {
            res = recv_peer(listeners.ipv4.as_ref(), &mut buf4), if listeners.ipv4.is_some() => {
                if let Ok((n, from)) = res {
                    dispatch_peer_packet(&mut server, &listeners, &outbound_sockets, &event_sink, &buf4[..n], from).await;
                }
            }
            res = recv_peer(listeners.ipv6.as_ref(), &mut buf6), if listeners.ipv6.is_some() => {
                if let Ok((n, from)) = res {
                    dispatch_peer_packet(&mut server, &listeners, &outbound_sockets, &event_sink, &buf6[..n], from).await;
                }
            }
            Some((idx, io)) = outbound_rx.recv(), if !outbound_sockets.is_empty() => {
                match io {
                    OutboundIo::Packet(bytes) => {
                        dispatch_outbound_packet(&mut server, &listeners, &outbound_sockets, &event_sink, idx, &bytes).await;
                    }
                    OutboundIo::SocketError => {
                        server.on_outbound_socket_error(idx, Instant::now());
                    }
                }
            }
            _ = peer_timeout_interval.tick() => {
                let actions = server.tick_peer_timeouts(Instant::now());
                apply_actions(&listeners, &outbound_sockets, &server, &event_sink, actions).await;
            }
            _ = stream_scan_interval.tick() => {
                let actions = server.tick_stream_scan(Instant::now());
                apply_actions(&listeners, &outbound_sockets, &server, &event_sink, actions).await;
            }
            _ = user_cache_interval.tick() => {
                server.tick_user_cache(Instant::now());
            }
            _ = reconnect_interval.tick() => {
                let actions = server.tick_reconnects(Instant::now());
                apply_actions(&listeners, &outbound_sockets, &server, &event_sink, actions).await;
            }
            _ = ping_interval.tick() => {
                let actions = server.ping_tick_outbounds(Instant::now());
                apply_actions(&listeners, &outbound_sockets, &server, &event_sink, actions).await;
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let shutdown_actions = server.shutdown_actions();
    apply_actions(&listeners, &outbound_sockets, &server, &event_sink, shutdown_actions).await;
    EXIT_OK
}

async fn recv_peer(socket: Option<&UdpSocket>, buf: &mut [u8; 2048]) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(sock) => sock.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

async fn dispatch_peer_packet(
    server: &mut Server,
    listeners: &Listeners,
    outbound_sockets: &[Arc<UdpSocket>],
    event_sink: &EventSink,
    bytes: &[u8],
    from: SocketAddr,
) {
    let frame = match Frame::decode(bytes) {
        Ok(f) => f,
        Err(err) => {
            warn!(%from, error = %err, "malformed datagram, dropped");
            return;
        }
    };
    let now = Instant::now();
    let actions = match panic::catch_unwind(AssertUnwindSafe(|| server.handle_peer_datagram(frame, from, now))) {
        Ok(actions) => actions,
        Err(_) => {
            error!(%from, "panic while handling peer datagram, dropping it and continuing");
            Vec::new()
        }
    };
    apply_actions(listeners, outbound_sockets, server, event_sink, actions).await;
}

async fn dispatch_outbound_packet(
    server: &mut Server,
    listeners: &Listeners,
    outbound_sockets: &[Arc<UdpSocket>],
    event_sink: &EventSink,
    idx: usize,
    bytes: &[u8],
) {
    let frame = match Frame::decode(bytes) {
        Ok(f) => f,
        Err(err) => {
            warn!(idx, error = %err, "malformed datagram from outbound, dropped");
            return;
        }
    };
    let now = Instant::now();
    let actions = match panic::catch_unwind(AssertUnwindSafe(|| server.handle_outbound_datagram(idx, frame, now))) {
        Ok(actions) => actions,
        Err(_) => {
            error!(idx, "panic while handling outbound datagram, dropping it and continuing");
            Vec::new()
        }
    };
    apply_actions(listeners, outbound_sockets, server, event_sink, actions).await;
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Send a pre-encoded frame to an explicit address, picking the listener
/// socket matching its family (§5 "inbound datagrams are tagged with their
/// arrival socket so replies use the matching family").
async fn send_on_matching_listener(listeners: &Listeners, addr: SocketAddr, bytes: &[u8]) {
    let socket = match addr {
        SocketAddr::V4(_) => listeners.ipv4.as_ref(),
        SocketAddr::V6(_) => listeners.ipv6.as_ref(),
    };
    let Some(socket) = socket else {
        warn!(%addr, "no listener socket available for this address family, dropped");
        return;
    };
    if let Err(err) = socket.send_to(bytes, addr).await {
        warn!(%addr, error = %err, "send failed");
    }
}

async fn send_to_radio(listeners: &Listeners, outbound_sockets: &[Arc<UdpSocket>], server: &Server, radio_id: RadioId, bytes: &[u8]) {
    match server.locate(radio_id) {
        Some(Location::Peer(addr)) => send_on_matching_listener(listeners, addr, bytes).await,
        Some(Location::Outbound(idx)) => {
            if let Err(err) = outbound_sockets[idx].send(bytes).await {
                warn!(idx, error = %err, "outbound send failed");
            }
        }
        None => warn!(%radio_id, "no route to destination, dropped"),
    }
}

/// Apply one batch of actions (§5: "must not yield between the first and
/// last send of a single received packet" — each send below is independent
/// I/O, never re-entering the synchronous handler).
async fn apply_actions(listeners: &Listeners, outbound_sockets: &[Arc<UdpSocket>], server: &Server, event_sink: &EventSink, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::SendTo { addr, bytes } => send_on_matching_listener(listeners, addr, &bytes).await,
            Action::SendToPeer { radio_id, bytes } => send_to_radio(listeners, outbound_sockets, server, radio_id, &bytes).await,
            Action::Forward { frame, targets } => {
                for target in targets {
                    let bytes = frame.retargeted(target).encode();
                    send_to_radio(listeners, outbound_sockets, server, target, &bytes).await;
                }
            }
            Action::Emit(event) => event_sink.emit(event),
        }
    }
}
