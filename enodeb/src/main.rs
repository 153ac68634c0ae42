//! Albor Space LTE eNodeB Main Application
//!
//! Wires the message bus, the timer manager, the user directory and the MAC
//! layer together and runs them against a loopback PHY.

mod config;
mod loopback;

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{FnCombo, Layer, QosClass};
use config::EnbConfig;
use interfaces::message_types::{MessagePayload, PrachAttempt, PrachDecodeMsg};
use interfaces::msgq::queue_name;
use interfaces::MsgqRegistry;
use layers::mac::{MacLayer, MacScheduler};
use layers::timer_mgr::TimerManager;
use layers::user::User;
use layers::user_mgr::UserManager;
use layers::start_layer_queue;
use loopback::{run_subframe_clock, LoopbackPhy};

/// Albor Space LTE eNodeB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level for all layers (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many subframes
    #[arg(long)]
    subframes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EnbConfig::from_yaml_file(path)?,
        None => EnbConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log.all_level = level.clone();
    }
    if args.subframes.is_some() {
        config.run.subframes = args.subframes;
    }

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter_directives()));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space LTE eNodeB");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path),
        None => info!("No configuration file, using defaults"),
    }
    info!("  Queue capacity: {}", config.msgq.capacity);
    info!("  C-RNTI release timer: {} ms", config.timers.c_rnti_release_ms);

    // Core services
    let registry = MsgqRegistry::new();
    let timer_mgr = TimerManager::new(tokio::runtime::Handle::current());
    let scheduler = Arc::new(MacScheduler::new());
    let user_mgr = UserManager::new(
        timer_mgr.clone(),
        scheduler.clone(),
        config.timers.c_rnti_release_ms,
    );

    // Layers and their queues
    let phy = LoopbackPhy::new(registry.clone());
    let phy_queue = start_layer_queue(
        phy.clone(),
        &registry,
        &queue_name(Layer::Mac, Layer::Phy),
        config.msgq.capacity,
    )?;
    let mac = MacLayer::new(
        config.mac.to_mac_config(),
        scheduler,
        user_mgr.clone(),
        registry.clone(),
    );
    let mac_queue = start_layer_queue(
        mac.clone(),
        &registry,
        &queue_name(Layer::Phy, Layer::Mac),
        config.msgq.capacity,
    )?;

    info!("eNodeB initialized successfully");

    if !config.run.prach_preambles.is_empty() {
        inject_prach(&registry, &config.run.prach_preambles)?;
        connect_users(&user_mgr, config.run.prach_preambles.len()).await;
    }

    // Subframe clock
    let stop = Arc::new(AtomicBool::new(false));
    let mut clock_handle = {
        let registry = registry.clone();
        let stop = stop.clone();
        let limit = config.run.subframes;
        tokio::task::spawn_blocking(move || run_subframe_clock(&registry, &stop, limit))
    };

    // Statistics reporting
    let stats_handle = {
        let mac = mac.clone();
        let phy = phy.clone();
        let user_mgr = user_mgr.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = mac.stats();
                let (pdsch, pusch, grants) = phy.counters();
                info!("MAC Statistics:");
                info!("  Subframes: {}, users: {}", stats.subframes, user_mgr.num_users());
                info!("  PRACH preambles: {}, UL grants: {}", stats.prach_preambles, stats.ul_grants);
                info!("  PUCCH decodes: {}, PUSCH decodes: {}", stats.pucch_decodes, stats.pusch_decodes);
                info!("PHY Statistics:");
                info!("  PDSCH schedules: {}, PUSCH schedules: {}, grants: {}", pdsch, pusch, grants);
            }
        })
    };

    // Wait for shutdown signal
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut clock_handle => Some(result),
    };
    let clock_result = match finished {
        Some(result) => {
            info!("Subframe limit reached");
            result
        }
        None => {
            info!("Received shutdown signal");
            stop.store(true, Ordering::Relaxed);
            clock_handle.await
        }
    };
    match clock_result {
        Ok(Ok(ticks)) => info!("Ran {} subframes", ticks),
        Ok(Err(e)) => error!("Subframe clock failed: {}", e),
        Err(e) => error!("Subframe clock task failed: {}", e),
    }

    // Shutdown in reverse order of creation
    info!("Shutting down eNodeB");
    stats_handle.abort();
    mac_queue.shutdown();
    phy_queue.shutdown();
    user_mgr.clear();

    let stats = mac.stats();
    info!(
        "Final: {} subframes, {} UL grants, {} PUSCH decodes, {} send failures",
        stats.subframes, stats.ul_grants, stats.pusch_decodes, stats.send_failures
    );
    if timer_mgr.active_timers() > 0 {
        warn!("{} timers still pending at exit", timer_mgr.active_timers());
    }

    info!("eNodeB shutdown complete");
    Ok(())
}

/// Report the configured preambles to the MAC as one random access decode
fn inject_prach(registry: &MsgqRegistry, preambles: &[u32]) -> Result<()> {
    let mut decode = PrachDecodeMsg {
        fn_combo: FnCombo::default(),
        ..Default::default()
    };
    for &preamble in preambles {
        decode.attempts.push(PrachAttempt { timing_adv: 0, preamble })?;
    }
    registry.send(
        &queue_name(Layer::Phy, Layer::Mac),
        Layer::Mac,
        MessagePayload::PrachDecode(decode),
    )?;
    info!("Injected {} PRACH preambles", preambles.len());
    Ok(())
}

/// Bring the users created by the MAC to a connected signalling state
async fn connect_users(user_mgr: &UserManager, expected: usize) {
    for _ in 0..100 {
        if user_mgr.num_users() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for c_rnti in user_mgr.c_rntis() {
        let Ok(user) = user_mgr.find_user_by_c_rnti(c_rnti) else {
            continue;
        };
        let mut guard = User::lock(&user);
        if let Err(e) = guard.setup_srb1() {
            warn!("C-RNTI {}: {}", c_rnti, e);
        }
        guard.set_qos(QosClass::Signalling);
    }
    info!("Connected {} users", user_mgr.num_users());
}
