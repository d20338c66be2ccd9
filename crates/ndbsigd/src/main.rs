//! ndbsigd — runs simulated data nodes over the loopback transporter and
//! checks that fragmented signals arrive intact and nothing leaks.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};

use ndbsig_core::wire::MAX_SECTIONS;
use ndbsig_core::{NdbsigConfig, NodeId, SegmentPool};
use ndbsig_fragment::FragmentSettings;

mod loopback;
mod node;

use node::{Command, Ledger, NodeTask};

/// How long to wait for the message exchange and for the pool to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load config before logging so the filter can come from it
    let written = NdbsigConfig::write_default_if_missing();
    let loaded = NdbsigConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Err(e) = loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    let nodes = config.daemon.nodes.max(2);
    tracing::info!(
        nodes,
        segments = config.pool.segments,
        max_fragment_words = config.fragment.max_fragment_words,
        "ndbsigd starting"
    );

    let pool = Arc::new(SegmentPool::new(config.pool.segments));
    let inboxes = loopback::new_inboxes();
    let ledger = Arc::new(Ledger::default());
    let settings = FragmentSettings::from(&config);
    let tick = Duration::from_micros(config.daemon.tick_micros.max(1));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut handles = Vec::new();
    let mut commands: Vec<mpsc::UnboundedSender<Command>> = Vec::new();
    for node in 1..=nodes {
        let (task, tx) = NodeTask::new(
            node,
            pool.clone(),
            inboxes.clone(),
            settings,
            ledger.clone(),
            tick,
            shutdown_tx.subscribe(),
        );
        commands.push(tx);
        handles.push(tokio::spawn(task.run()));
    }

    // Node 1 sends random multi-section messages to node 2
    let messages = config.daemon.messages;
    let max_words = config.daemon.max_message_words.max(1);
    {
        let mut rng = rand::thread_rng();
        for id in 0..messages as u32 {
            let mut data = vec![id];
            data.extend((0..rng.gen_range(0..8)).map(|_| rng.gen::<u32>()));
            let sections: Vec<Vec<u32>> = (0..rng.gen_range(0..=MAX_SECTIONS))
                .map(|_| {
                    let len = rng.gen_range(0..=max_words);
                    (0..len).map(|_| rng.gen::<u32>()).collect()
                })
                .collect();
            commands[0]
                .send(Command::Send { to: 2, data, sections })
                .context("node 1 task is gone")?;
        }
    }

    let settled = wait_for(|| ledger.settled(messages)).await;
    if !settled {
        tracing::error!(
            received = ledger.received.len(),
            expected = messages,
            "message exchange did not settle"
        );
    }

    let mut mismatches = 0usize;
    for entry in ledger.expected.iter() {
        match ledger.received.get(entry.key()) {
            Some(got) if *got == *entry.value() => {}
            Some(_) => {
                tracing::error!(id = entry.key(), "digest mismatch");
                mismatches += 1;
            }
            None => {
                tracing::error!(id = entry.key(), "message never arrived");
                mismatches += 1;
            }
        }
    }
    let received = ledger.received.len();
    tracing::info!(
        sent = ledger.expected.len(),
        received,
        completed = ledger.completed.load(Ordering::Relaxed),
        mismatches,
        "message exchange verified"
    );

    // Cut node 1 and node 2 off from each other with a train in flight
    let big: Vec<u32> = (0..max_words as u32 * 2).collect();
    commands[0]
        .send(Command::Send {
            to: 2,
            data: vec![u32::MAX],
            sections: vec![big],
        })
        .context("node 1 task is gone")?;
    let cleaned_1 = node_failure(&commands[0], 2).await?;
    let cleaned_2 = node_failure(&commands[1], 1).await?;
    tracing::info!(
        node_1_cleaned = cleaned_1,
        node_2_cleaned = cleaned_2,
        "node failure handled"
    );
    let _ = commands[0].send(Command::NodeRejoined(2));
    let _ = commands[1].send(Command::NodeRejoined(1));

    let capacity = pool.capacity();
    let drained = wait_for(|| pool.free_count() == capacity).await;
    let stats = pool.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "messages": messages,
            "received": received,
            "dropped": ledger.dropped.load(Ordering::Relaxed),
            "send_failures": ledger.send_failures.load(Ordering::Relaxed),
            "mismatches": mismatches,
            "cleaned": [cleaned_1, cleaned_2],
            "pool": stats,
        }))?
    );

    let _ = shutdown_tx.send(());
    for handle in handles {
        handle.await.context("node task panicked")??;
    }

    if mismatches > 0 || !settled {
        anyhow::bail!("{mismatches} messages failed verification");
    }
    if !drained {
        anyhow::bail!("segment leak: {} of {} segments still in use", stats.in_use, capacity);
    }
    tracing::info!("ndbsigd finished cleanly");
    Ok(())
}

async fn node_failure(command: &mpsc::UnboundedSender<Command>, node: NodeId) -> Result<usize> {
    let (done, wait) = oneshot::channel();
    command
        .send(Command::NodeFailure { node, done })
        .context("node task is gone")?;
    tokio::time::timeout(SETTLE_TIMEOUT, wait)
        .await
        .context("node failure cleanup timed out")?
        .context("node task dropped cleanup callback")
}

/// Poll `done` until it holds or `SETTLE_TIMEOUT` passes.
async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while !done() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}
