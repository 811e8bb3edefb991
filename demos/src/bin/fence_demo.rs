//! # Fence Demo
//!
//! Simulates one client process against the sync layer:
//! - One thread per hardware context plays the GPU, retiring submissions
//!   into a shadow timestamp block and reporting progress
//! - A producer thread forwards an explicit timeline step by step
//! - The main thread exports a fence for every submission and waits on all
//!   of them
//!
//! ```bash
//! cargo run -p tsync-demos --bin fence_demo -- --contexts 4 --submissions 64
//!
//! # Tear the session down mid-flight; waiters come back with errors
//! cargo run -p tsync-demos --bin fence_demo -- --close-early
//! ```

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::Parser;
use tsync::config::DEFAULT_MAX_CONTEXTS;
use tsync::{
    ContextId, ExportedFence, FenceStatus, Session, ShadowTimestampBlock, SyncConfig,
    SyncResult, TimelineId, WaitStatus, Waitable, wait_all,
};
use tsync_core::profiling::set_thread_name;

/// Fence demo arguments.
#[derive(Parser, Debug)]
#[command(
    name = "fence_demo",
    about = "Simulated GPU contexts and explicit timelines driving tsync fences"
)]
struct ClapArgs {
    /// Number of simulated hardware contexts.
    #[arg(long, default_value = "2")]
    contexts: u32,

    /// Submissions per hardware context.
    #[arg(long, default_value = "32")]
    submissions: u32,

    /// Simulated execution time of one submission, in microseconds.
    #[arg(long, default_value = "250")]
    gpu_latency_us: u64,

    /// Steps forwarded on the explicit timeline.
    #[arg(long, default_value = "16")]
    isync_steps: u32,

    /// Shadow re-read interval for timestamp waits, in microseconds.
    #[arg(long, default_value = "1000")]
    poll_interval_us: u64,

    /// Overall wait timeout, in milliseconds.
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Close the session before the work completes.
    #[arg(long)]
    close_early: bool,
}

/// Resolved demo parameters.
#[derive(Debug, Clone)]
struct DemoArgs {
    config: SyncConfig,
    contexts: u32,
    submissions: u32,
    gpu_latency: Duration,
    isync_steps: u32,
    timeout: Duration,
    close_early: bool,
}

impl From<ClapArgs> for DemoArgs {
    fn from(args: ClapArgs) -> Self {
        let max = DEFAULT_MAX_CONTEXTS as u32;
        if args.contexts > max {
            log::warn!("--contexts {} exceeds the context table size, using {}", args.contexts, max);
        }

        Self {
            config: SyncConfig::default()
                .with_progress_poll_interval(Duration::from_micros(args.poll_interval_us)),
            contexts: args.contexts.min(max),
            submissions: args.submissions,
            gpu_latency: Duration::from_micros(args.gpu_latency_us),
            isync_steps: args.isync_steps,
            timeout: Duration::from_millis(args.timeout_ms),
            close_early: args.close_early,
        }
    }
}

/// A simulated GPU: retires timestamps received on its queue in order.
struct Gpu {
    queue: mpsc::Sender<u32>,
    thread: JoinHandle<u32>,
}

fn spawn_gpu(
    session: Arc<Session>,
    ctx: ContextId,
    shadow: Arc<ShadowTimestampBlock>,
    latency: Duration,
) -> Gpu {
    let (queue, submissions) = mpsc::channel::<u32>();
    let thread = thread::spawn(move || {
        set_thread_name!("gpu");
        let mut retired = 0;
        for ts in submissions {
            shadow.record_start(ts);
            thread::sleep(latency);
            shadow.record_retire(ts);

            let Ok(context) = session.context(ctx) else {
                log::debug!("{} is gone, GPU stopping", ctx);
                break;
            };
            context.check_progress();
            retired += 1;
        }
        retired
    });
    Gpu { queue, thread }
}

fn spawn_producer(
    session: Arc<Session>,
    id: TimelineId,
    steps: u32,
    interval: Duration,
) -> JoinHandle<u32> {
    thread::spawn(move || {
        set_thread_name!("producer");
        let mut forwarded = 0;
        for ts in 1..=steps {
            thread::sleep(interval);
            if let Err(e) = session.isync_forward(id, ts) {
                log::debug!("producer stopping: {}", e);
                break;
            }
            forwarded += 1;
        }
        forwarded
    })
}

fn run(args: &DemoArgs) -> SyncResult<()> {
    let session = Arc::new(Session::new(std::process::id(), args.config.clone()));
    let mut fences: Vec<ExportedFence> = Vec::new();

    // Hardware contexts
    let mut gpus = Vec::new();
    for _ in 0..args.contexts {
        let shadow = Arc::new(ShadowTimestampBlock::new());
        let ctx = session.context_create(shadow.clone())?;
        gpus.push((ctx, spawn_gpu(session.clone(), ctx, shadow, args.gpu_latency)));
    }

    for ts in 1..=args.submissions {
        for (ctx, gpu) in &gpus {
            session.context(*ctx)?.queue(ts);
            let fd = session.hsync_fence_create(*ctx, ts)?;
            fences.push(session.fence_get(fd)?);
            session.fence_close(fd)?;
            if gpu.queue.send(ts).is_err() {
                log::warn!("{} GPU queue closed early", ctx);
            }
        }
    }

    // Explicit timeline
    let id = session.isync_timeline_create(Some("demo-producer"))?;
    for _ in 0..args.isync_steps {
        let fd = session.isync_fence_create(id, None)?;
        fences.push(session.fence_get(fd)?);
    }
    let producer = spawn_producer(session.clone(), id, args.isync_steps, args.gpu_latency);

    log::info!(
        "{} contexts x {} submissions + {} explicit steps: waiting on {} fences",
        args.contexts,
        args.submissions,
        args.isync_steps,
        fences.len()
    );

    if args.close_early {
        thread::sleep(args.gpu_latency * args.submissions.max(1) / 2);
        let errored = session.close();
        log::info!("session closed early, {} fences errored", errored);
    }

    let start = Instant::now();
    let waitables: Vec<&dyn Waitable> = fences.iter().map(|fence| fence as &dyn Waitable).collect();
    let status = wait_all(&waitables, Some(args.timeout));
    let elapsed = start.elapsed();

    let signaled = fences
        .iter()
        .filter(|fence| fence.fence().status() == FenceStatus::Signaled)
        .count();
    let errored = fences
        .iter()
        .filter(|fence| fence.fence().status() == FenceStatus::Errored)
        .count();
    match status {
        WaitStatus::Signaled => log::info!("all {} fences signaled in {:?}", signaled, elapsed),
        other => log::warn!(
            "wait ended with {:?} after {:?}: {} signaled, {} errored, {} pending",
            other,
            elapsed,
            signaled,
            errored,
            fences.len() - signaled - errored
        ),
    }

    // Stop the simulated hardware.
    for (ctx, gpu) in gpus {
        drop(gpu.queue);
        match gpu.thread.join() {
            Ok(retired) => log::info!("{} retired {} submissions", ctx, retired),
            Err(_) => log::error!("{} GPU thread panicked", ctx),
        }
    }
    match producer.join() {
        Ok(forwarded) => log::info!("explicit timeline forwarded {} steps", forwarded),
        Err(_) => log::error!("producer thread panicked"),
    }

    session.close();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("tsync fence demo v{}", tsync_demos::VERSION);
    tsync::init();

    let args: DemoArgs = ClapArgs::parse().into();
    log::debug!("{:?}", args);

    if let Err(e) = run(&args) {
        log::error!("fence demo failed: {}", e);
        std::process::exit(1);
    }
}
