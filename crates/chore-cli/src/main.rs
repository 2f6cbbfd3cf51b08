//! chore: console-driven producer for a background work queue.
//!
//! Each stdin line becomes a work item (`sleep <ms>`, `fail <msg>`,
//! `panic <msg>`, anything else is echoed). EOF or `quit` drains the queue;
//! Ctrl-C abandons whatever is still buffered.
//!
//! ```text
//! stdin ─┐
//!        ├─> BoundedQueue ─> WorkerGroup (n x WorkerLoop) ─> TracingSink
//! ticker ┘
//! ```

mod commands;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chore_core::{
    BoundedQueue, CancellationToken, ChoreConfig, FullPolicy, QueueError, TracingSink, WorkQueue,
    WorkerGroup,
};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, heartbeat};

#[derive(Parser, Debug)]
#[command(
    name = "chore",
    about = "Run work items typed on stdin through a bounded queue"
)]
struct Cli {
    /// Queue capacity (0 = unbounded). Overrides CHORE_CAPACITY.
    #[arg(long)]
    capacity: Option<usize>,
    /// Full-queue policy: block, reject or unbounded. Overrides CHORE_POLICY.
    #[arg(long)]
    policy: Option<FullPolicy>,
    /// Number of worker loops. Overrides CHORE_WORKERS.
    #[arg(long)]
    workers: Option<usize>,
    /// Enqueue a heartbeat item every N milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,
}

impl Cli {
    /// Environment first, then flags on top.
    fn config(&self) -> anyhow::Result<ChoreConfig> {
        let mut config = ChoreConfig::from_env().context("reading CHORE_* environment")?;
        if let Some(capacity) = self.capacity {
            config.queue.capacity = capacity;
        }
        if let Some(policy) = self.policy {
            config.queue.policy = policy;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(run(cli, config));
    // A pending stdin read would otherwise keep the runtime alive.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(cli: Cli, config: ChoreConfig) -> anyhow::Result<()> {
    // (A) queue and workers
    let bounded = BoundedQueue::from_config(&config.queue);
    info!(
        capacity = ?bounded.capacity(),
        policy = %bounded.policy(),
        workers = config.workers,
        "starting"
    );
    let queue: Arc<dyn WorkQueue> = Arc::new(bounded);
    let group = WorkerGroup::spawn(config.workers, Arc::clone(&queue), Arc::new(TracingSink));

    // (B) producers share one token; a producer parked on a full queue
    // gives up once it fires.
    let producers = CancellationToken::new();

    let ticker = cli.tick_ms.map(|ms| {
        tokio::spawn(run_ticker(
            Arc::clone(&queue),
            Duration::from_millis(ms.max(1)),
            producers.clone(),
        ))
    });

    // (C) feed stdin until EOF/quit, or stop early on Ctrl-C
    let stdin = BufReader::new(tokio::io::stdin());
    let interrupted = tokio::select! {
        result = read_console(stdin, Arc::clone(&queue), producers.clone()) => {
            result?;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            true
        }
    };

    // (D) no new work from here on
    producers.cancel();
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }

    // (E) EOF drains what is buffered; Ctrl-C leaves it behind
    let stats = if interrupted {
        info!("interrupted, abandoning buffered work");
        group.abandon().await
    } else {
        info!("input finished, draining queue");
        group.drain().await
    };
    info!(
        executed = stats.executed,
        failed = stats.failed,
        succeeded = stats.succeeded(),
        "done"
    );
    Ok(())
}

/// Console producer loop. Returns on EOF, `quit`, or a closed queue.
///
/// A rejected or cancelled enqueue is logged and the next line is read.
async fn read_console<R>(
    input: R,
    queue: Arc<dyn WorkQueue>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("reading input")? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                warn!(%line, error = %err, "ignoring input");
                continue;
            }
        };
        let Some(item) = command.into_item() else {
            break;
        };
        let label = item.label().to_string();
        match queue.enqueue(item, &cancel).await {
            Ok(()) => info!(item = %label, "enqueued"),
            Err(QueueError::QueueClosed) => {
                warn!(item = %label, "queue closed, stopping input");
                break;
            }
            Err(err) => warn!(item = %label, error = %err, "enqueue failed"),
        }
    }
    Ok(())
}

/// Periodic trigger routed through the same queue.
async fn run_ticker(queue: Arc<dyn WorkQueue>, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;
    let mut tick = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        tick += 1;
        match queue.enqueue(heartbeat(tick), &cancel).await {
            Ok(()) => {}
            Err(QueueError::QueueClosed | QueueError::Cancelled) => break,
            Err(err) => warn!(tick, error = %err, "heartbeat dropped"),
        }
    }
}
