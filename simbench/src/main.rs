use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use snap::{Snapshot, SnapshotBuilder, SnapshotDelta, SnapshotStorage};
use uuidreg::UuidRegistry;

#[derive(Parser)]
#[command(
    name = "simbench",
    version,
    about = "snapshot subsystem simulation benchmark"
)]
struct Cli {
    /// Scenario to run (dense, idle, burst).
    #[arg(long, value_enum, default_value_t = Scenario::Dense)]
    scenario: Scenario,
    /// Number of simulated players.
    #[arg(long, default_value_t = 16)]
    players: i32,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: i32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// How many ticks the model client lags behind with its acks.
    #[arg(long, default_value_t = 2)]
    ack_delay: i32,
    /// How many ticks of history the server keeps.
    #[arg(long, default_value_t = 50)]
    storage_window: i32,
    /// Probability (percent) a player stands still this tick (idle scenario).
    #[arg(long, default_value_t = 80)]
    idle_percent: u32,
    /// Burst event cadence in ticks (burst scenario).
    #[arg(long, default_value_t = 25)]
    burst_every: i32,
    /// Disable delta encoding and ship full snapshots every tick.
    #[arg(long, default_value_t = false)]
    no_delta: bool,
    /// Output directory for summary.json.
    #[arg(long, default_value = "target/simbench")]
    out_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, PartialEq, Eq)]
enum Scenario {
    Dense,
    Idle,
    Burst,
}

// Demo object types. The character core has a registered static size; the
// scoreboard entry stays dynamic so both update encodings are exercised.
const OBJ_CHARACTER: i32 = 5;
const CHARACTER_WORDS: usize = 6;
const OBJ_SCORE: i32 = 9;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut registry = UuidRegistry::new();
    let marker_type = registry.register("simbench.marker");

    let mut server_delta = SnapshotDelta::new();
    server_delta.set_static_size(OBJ_CHARACTER, CHARACTER_WORDS * 4);
    let mut client_delta = SnapshotDelta::new();
    client_delta.set_static_size(OBJ_CHARACTER, CHARACTER_WORDS * 4);

    let mut builder = SnapshotBuilder::new();
    let mut server_storage = SnapshotStorage::new();
    let mut client_storage = SnapshotStorage::new();

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create output dir {}", cli.out_dir.display()))?;

    let mut rng = Rng::new(cli.seed);
    let mut players = init_players(cli.players, &mut rng);

    let mut stats = EncoderStats::default();
    let mut full_bytes_total = 0u64;
    let mut encoded = Vec::new();

    for tick in 1..=cli.ticks {
        step_players(&mut players, &mut rng, tick, &cli);
        let snapshot = build_snapshot(&mut builder, &registry, marker_type, tick, &players);
        full_bytes_total += snapshot.total_size() as u64;

        if cli.no_delta {
            // Subsystem disabled: the client receives the blob verbatim.
            let blob = snapshot.to_bytes();
            stats.add(blob.len() as u64);
            let received = Snapshot::from_bytes(&blob).context("full snapshot decode")?;
            client_storage.add(tick, i64::from(tick), received, None);
        } else {
            let ack = tick - cli.ack_delay;
            let baseline = server_storage
                .get(ack)
                .map(|holder| holder.snap().clone())
                .unwrap_or_default();

            let len = server_delta.create_delta(&baseline, &snapshot, &mut encoded);
            let payload: &[u8] = if len == 0 {
                SnapshotDelta::empty_delta()
            } else {
                &encoded[..len]
            };
            stats.add(payload.len() as u64);

            let received = client_delta
                .unpack_delta(&baseline, payload)
                .map_err(|err| anyhow::anyhow!("tick {tick}: unpack failed: {err}"))?;
            anyhow::ensure!(
                received.crc() == snapshot.crc(),
                "tick {tick}: crc mismatch after delta roundtrip"
            );
            client_storage.add(tick, i64::from(tick), received, None);
        }

        server_storage.add(tick, i64::from(tick), snapshot, None);
        server_storage.purge_until(tick - cli.storage_window);
        client_storage.purge_until(tick - cli.storage_window);

        if tick % 100 == 0 {
            tracing::info!(tick, stored = server_storage.len(), "progress");
        }
    }

    let summary = Summary::new(&cli, stats, full_bytes_total, &client_delta);
    write_summary_json(&cli.out_dir, &summary)?;
    println!(
        "{} ticks, {} players: avg payload {} B, p95 {} B (full snapshots avg {} B)",
        cli.ticks,
        cli.players,
        summary.payload_bytes_avg,
        summary.payload_bytes_p95,
        summary.full_snapshot_bytes_avg
    );
    Ok(())
}

fn write_summary_json(out_dir: &Path, summary: &Summary) -> Result<()> {
    let path = out_dir.join("summary.json");
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone)]
struct PlayerState {
    id: i32,
    pos: [i32; 2],
    vel: [i32; 2],
    health: i32,
    armor: i32,
    score: i32,
    // Kill history length varies per player, keeping the scoreboard item
    // dynamically sized.
    recent_hits: Vec<i32>,
}

fn init_players(count: i32, rng: &mut Rng) -> Vec<PlayerState> {
    (0..count)
        .map(|id| PlayerState {
            id,
            pos: [rng.range(-1000, 1000), rng.range(-1000, 1000)],
            vel: [0, 0],
            health: 10,
            armor: 0,
            score: 0,
            recent_hits: Vec::new(),
        })
        .collect()
}

fn step_players(players: &mut [PlayerState], rng: &mut Rng, tick: i32, cli: &Cli) {
    let burst_now =
        cli.scenario == Scenario::Burst && cli.burst_every > 0 && tick % cli.burst_every == 0;
    for player in players.iter_mut() {
        let idle = cli.scenario == Scenario::Idle && rng.next_u32() % 100 < cli.idle_percent;
        if !idle {
            for axis in 0..2 {
                if rng.next_u32() % 10 == 0 {
                    player.vel[axis] = rng.range(-30, 30);
                }
                player.pos[axis] = player.pos[axis].saturating_add(player.vel[axis]);
            }
        }
        if burst_now {
            player.health = rng.range(1, 10);
            player.armor = rng.range(0, 10);
            player.score += rng.range(0, 3);
            push_hit(player, tick);
        } else if rng.next_u32() % 50 == 0 {
            player.score += 1;
            push_hit(player, tick);
        }
    }
}

fn push_hit(player: &mut PlayerState, tick: i32) {
    player.recent_hits.push(tick);
    if player.recent_hits.len() > 4 {
        player.recent_hits.remove(0);
    }
}

fn build_snapshot(
    builder: &mut SnapshotBuilder,
    registry: &UuidRegistry,
    marker_type: i32,
    tick: i32,
    players: &[PlayerState],
) -> Snapshot {
    builder.init(false);
    for player in players {
        let core = builder
            .new_item(registry, OBJ_CHARACTER, player.id, CHARACTER_WORDS * 4)
            .expect("character fits");
        core.copy_from_slice(&[
            player.pos[0],
            player.pos[1],
            player.vel[0],
            player.vel[1],
            player.health,
            player.armor,
        ]);

        let words = 1 + player.recent_hits.len();
        let score = builder
            .new_item(registry, OBJ_SCORE, player.id, words * 4)
            .expect("score fits");
        score[0] = player.score;
        score[1..].copy_from_slice(&player.recent_hits);
    }
    // A UUID-typed round marker proves extended types survive the pipeline.
    let marker = builder
        .new_item(registry, marker_type, 0, 4)
        .expect("marker fits");
    marker[0] = tick / 60;
    builder.finish()
}

#[derive(Default)]
struct EncoderStats {
    sizes: Vec<u64>,
    total_bytes: u64,
}

impl EncoderStats {
    fn add(&mut self, bytes: u64) {
        self.total_bytes += bytes;
        self.sizes.push(bytes);
    }

    fn avg(&self) -> u64 {
        if self.sizes.is_empty() {
            0
        } else {
            self.total_bytes / self.sizes.len() as u64
        }
    }

    fn p95(&mut self) -> u64 {
        if self.sizes.is_empty() {
            return 0;
        }
        self.sizes.sort_unstable();
        let idx = ((self.sizes.len() as f64) * 0.95).ceil() as usize;
        self.sizes[idx.saturating_sub(1).min(self.sizes.len() - 1)]
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    scenario: Scenario,
    players: i32,
    ticks: i32,
    seed: u64,
    ack_delay: i32,
    delta_enabled: bool,
    payload_count: usize,
    payload_bytes_total: u64,
    payload_bytes_avg: u64,
    payload_bytes_p95: u64,
    full_snapshot_bytes_avg: u64,
    character_rate_bits: u64,
    character_updates: u64,
}

impl Summary {
    fn new(
        cli: &Cli,
        mut stats: EncoderStats,
        full_bytes_total: u64,
        decoder: &SnapshotDelta,
    ) -> Self {
        Summary {
            scenario: cli.scenario,
            players: cli.players,
            ticks: cli.ticks,
            seed: cli.seed,
            ack_delay: cli.ack_delay,
            delta_enabled: !cli.no_delta,
            payload_count: stats.sizes.len(),
            payload_bytes_total: stats.total_bytes,
            payload_bytes_avg: stats.avg(),
            payload_bytes_p95: stats.p95(),
            full_snapshot_bytes_avg: if cli.ticks > 0 {
                full_bytes_total / cli.ticks as u64
            } else {
                0
            },
            character_rate_bits: decoder.data_rate(OBJ_CHARACTER),
            character_updates: decoder.data_updates(OBJ_CHARACTER),
        }
    }
}

struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.state >> 32) as u32
    }

    fn range(&mut self, min: i32, max: i32) -> i32 {
        let span = (max - min).unsigned_abs() + 1;
        min + (self.next_u32() % span) as i32
    }
}
