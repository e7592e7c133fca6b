//! # Replay Demo
//!
//! Two synthetic streams are replayed from ten minutes ago at 60x speed.
//! Each producer fetches a little ahead of virtual time and submits its
//! records slightly out of order; the rectifier hands them to the sink as
//! one ascending sequence until replay catches up with the present.
//!
//! ```text
//! [quotes] ─┐
//!           ├─→ [Rectifier] → [ChannelSink] → stdout
//! [trades] ─┘        ↑
//!              [VirtualClock]
//! ```
//!
//! Run: `RUST_LOG=timefront=debug cargo run --example replay_demo`

use std::sync::Arc;
use std::time::Duration;
use timefront::prelude::*;
use tracing_subscriber::EnvFilter;

/// Simulated producer: "fetches" records up to `lookahead` past virtual time.
async fn produce(
    name: &'static str,
    spacing_millis: i64,
    clock: VirtualClock,
    front: SharedFront,
    submitter: StreamSubmitter,
) {
    let lookahead = Duration::from_millis(2_000);
    let mut next = front.get().as_millis();
    let mut seq = 0_u64;

    while !clock.is_stopped() {
        let fetch_until = (clock.virtual_ts() + lookahead).as_millis();
        let mut burst = Vec::new();
        while next <= fetch_until {
            burst.push(next);
            next += spacing_millis;
        }
        // Network reordering inside a burst.
        burst.reverse();
        for key in burst {
            seq += 1;
            let record = EventRecord::at("ts", Timestamp::from_millis(key))
                .with("stream", name)
                .with("seq", seq);
            if let Err(e) = submitter.submit(record) {
                tracing::warn!(stream = name, error = %e, "record refused");
            }
        }
        front.advance_to(Timestamp::from_millis(next - spacing_millis));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("timefront=info")),
        )
        .init();
    timefront::observability::init_metrics();

    let mut config = TimefrontConfig::from_env()?;
    config.clock.speed = 60.0;
    config.rectifier.accumulation_time_millis = 5_000;
    config.start.start_before_millis = Some(10 * 60 * 1_000);

    let (sink, mut batches) = ChannelSink::channel(64);
    let coordinator = Coordinator::named(
        "demo",
        config,
        Arc::new(sink),
        Arc::new(SystemClock::new()),
        Arc::new(MemoryCheckpoint::new()),
    )?;

    let quotes_front = SharedFront::new("quotes", Timestamp::ZERO);
    let trades_front = SharedFront::new("trades", Timestamp::ZERO);
    let quotes = coordinator.register_stream("quotes", Arc::new(quotes_front.clone()));
    let trades = coordinator.register_stream("trades", Arc::new(trades_front.clone()));

    let mut events = coordinator.subscribe();
    let start = coordinator.start().await?;
    println!("replay starts at {} ({:?})", start.ts, start.source);
    quotes_front.set(start.ts);
    trades_front.set(start.ts);

    let clock = coordinator.clock().clone();
    tokio::spawn(produce("quotes", 700, clock.clone(), quotes_front, quotes));
    tokio::spawn(produce("trades", 1_100, clock.clone(), trades_front, trades));

    let mut received = 0_usize;
    let mut last_key = Timestamp::ZERO;
    loop {
        tokio::select! {
            Some(batch) = batches.recv() => {
                for record in &batch {
                    let key = record.sort_key("ts").unwrap_or_default();
                    assert!(key >= last_key, "out of order: {} after {}", key, last_key);
                    last_key = key;
                }
                received += batch.len();
                println!("{} batch of {:>3} records, total {:>5}", clock, batch.len(), received);
            }
            Some(event) = events.recv() => {
                println!("{} {}", clock, event);
                if matches!(event, ClockEvent::Synchronized) {
                    break;
                }
            }
        }
    }

    let stats = coordinator.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    coordinator.destroy().await;
    Ok(())
}
