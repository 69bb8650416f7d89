//! Headless client binary.
//!
//! Usage:
//!   cargo run -p netsync_client -- [--addr 127.0.0.1:40000] [--config client.json] [--name Player]
//!
//! Connects to the authoritative peer, keeps remote entities in sync at the
//! configured update rate and logs what the scene would render.

use std::env;
use std::time::Duration;

use anyhow::Context;
use netsync_client::{
    client::ClosedReason,
    clock::now_ms,
    entity::{RemoteEntity, RemotePlayer},
    input::InputState,
    scene::SceneHost,
    transport::FramedConn,
    SyncClient,
};
use netsync_shared::{
    catalog::{self, MineArmed},
    config::SyncConfig,
    protocol::TerrainEvent,
    registry::EntityId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Args {
    addr: Option<String>,
    config: Option<String>,
    name: Option<String>,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: None,
        config: None,
        name: None,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.addr = Some(args[i + 1].clone());
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                out.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(args: Args) -> anyhow::Result<SyncConfig> {
    let mut cfg = match &args.config {
        Some(path) => SyncConfig::from_path(path).with_context(|| format!("load config {path}"))?,
        None => SyncConfig::default(),
    };
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }
    if let Some(name) = args.name {
        cfg.player_name = name;
    }
    Ok(cfg)
}

/// Scene that only logs.
#[derive(Default)]
struct LogScene {
    interpolated: u64,
}

impl SceneHost for LogScene {
    fn entity_created(&mut self, entity: &RemoteEntity) {
        info!(entity = entity.id().0, class = entity.class().0, "Spawn");
    }

    fn entity_destroyed(&mut self, id: EntityId) {
        info!(entity = id.0, "Despawn");
    }

    fn entity_interpolated(&mut self, _entity: &RemoteEntity) {
        self.interpolated += 1;
    }

    fn player_joined(&mut self, player: &RemotePlayer) {
        info!(player = player.id(), name = %player.name(), "Player joined");
    }

    fn player_left(&mut self, id: u8) {
        info!(player = id, "Player left");
    }

    fn player_moved(&mut self, player: &RemotePlayer) {
        let p = player.position();
        debug!(player = player.id(), x = p.x, y = p.y, "Player moved");
    }

    fn round_started(&mut self, round: u16, seed: u32) {
        info!(round, seed, "Round start");
    }

    fn round_ended(&mut self, winner: Option<u8>) {
        info!(?winner, "Round end");
    }

    fn terrain_event(&mut self, event: TerrainEvent) {
        info!(x = event.x, y = event.y, radius = event.radius, "Terrain event");
    }

    fn connection_closed(&mut self, reason: &ClosedReason) {
        warn!(?reason, "Connection closed");
    }
}

enum Inbound {
    Message(bytes::Bytes),
    Closed(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config(parse_args())?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let registry = catalog::registry().context("build class registry")?;
    let conn = FramedConn::connect(cfg.server_addr.as_str())
        .await
        .with_context(|| format!("connect {}", cfg.server_addr))?;
    info!(server = %conn.peer_addr()?, "Connected");
    let (mut reader, mut writer) = conn.into_split();

    let (tx, mut rx) = mpsc::channel::<Inbound>(256);
    tokio::spawn(async move {
        loop {
            let inbound = match reader.recv().await {
                Ok(Some(bytes)) => Inbound::Message(bytes),
                Ok(None) => Inbound::Closed("peer closed".to_string()),
                Err(e) => Inbound::Closed(e.to_string()),
            };
            let closed = matches!(inbound, Inbound::Closed(_));
            if tx.send(inbound).await.is_err() || closed {
                break;
            }
        }
    });

    let mut client = SyncClient::new(cfg.clone(), registry, LogScene::default());
    client.rpc_mut().register("announce", |r| {
        let text = r.read_str8()?;
        info!(text = %text, "Announcement");
        Ok(())
    });

    let step = Duration::from_secs_f64(1.0 / f64::from(cfg.update_hz.max(1)));
    let mut interval = tokio::time::interval(step);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        while let Ok(inbound) = rx.try_recv() {
            match inbound {
                Inbound::Message(bytes) => {
                    if let Err(e) = client.receive(bytes, now_ms()) {
                        warn!(error = %e, "Inbound message rejected");
                    }
                }
                Inbound::Closed(reason) => client.disconnect(&reason),
            }
        }

        if let Err(e) = client.update(now_ms()) {
            warn!(error = %e, "Update failed");
        }
        for armed in client.drain_events::<MineArmed>() {
            info!(entity = armed.entity.0, "Mine armed");
        }
        client.send_input(InputState::default())?;

        for msg in client.take_outbound() {
            writer.send(&msg).await?;
        }

        if let Some(reason) = client.closed_reason() {
            info!(
                ?reason,
                stats = ?client.stats(),
                interpolated = client.host().interpolated,
                "Client stopped"
            );
            break;
        }
    }

    // best effort, the peer may already be gone
    let _ = writer.shutdown().await;
    Ok(())
}
