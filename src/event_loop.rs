//! Gateway event loop: reactor-driven background work.
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` for reactor timers.  Two futures:
//!
//! 1. **Drain**: waits on the transfer channel with a bounded timeout,
//!    publishes whatever arrived, then gives the binding tables a chance
//!    to flush (debounced).
//! 2. **Heartbeat**: ages the liveness table on a fixed period.
//!
//! ```text
//!  mesh callback ──try_send──▶ TransferChannel ──receive──▶ Drain ──▶ cloud
//!                                                             │
//!                                                             └──▶ flush bindings
//!  Timer(20 s) ─────────────────────────────────────────────▶ Heartbeat tick
//! ```

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::info;

use crate::app::ports::{CloudPort, ConfigPort, EventSink, MeshStack, StoragePort, SystemPort};
use crate::app::service::{Gateway, TransferChannel};
use crate::config::GatewayConfig;
use crate::mesh::transfer::TransferRecord;

/// What the loop needs from the gateway.
pub trait LoopTarget: Send + Sync + 'static {
    fn config(&self) -> &GatewayConfig;
    fn transfer(&self) -> &TransferChannel;
    fn publish_record(&self, record: &TransferRecord);
    fn flush_bindings(&self);
    fn tick_heartbeat(&self) -> usize;
}

impl<M, S, C, Y, D, K> LoopTarget for Gateway<M, S, C, Y, D, K>
where
    M: MeshStack + 'static,
    S: StoragePort + ConfigPort + Send + 'static,
    C: CloudPort + 'static,
    Y: SystemPort + 'static,
    D: DelayNs + Send + 'static,
    K: EventSink + 'static,
{
    fn config(&self) -> &GatewayConfig {
        Gateway::config(self)
    }

    fn transfer(&self) -> &TransferChannel {
        Gateway::transfer(self)
    }

    fn publish_record(&self, record: &TransferRecord) {
        Gateway::publish_record(self, record);
    }

    fn flush_bindings(&self) {
        Gateway::flush_bindings(self);
    }

    fn tick_heartbeat(&self) -> usize {
        Gateway::tick_heartbeat(self)
    }
}

// ── Tasks ────────────────────────────────────────────────────

/// One drain pass.  Returns `true` when a record was published.
pub async fn drain_once<G: LoopTarget>(gw: &G) -> bool {
    let wait = Duration::from_millis(u64::from(gw.config().drain_wait_ms));
    let next = futures_lite::future::or(async { Some(gw.transfer().receive().await) }, async {
        async_io_mini::Timer::after(wait).await;
        None
    })
    .await;

    if let Some(record) = &next {
        gw.publish_record(record);
    }
    gw.flush_bindings();
    next.is_some()
}

async fn drain_loop<G: LoopTarget>(gw: Arc<G>) {
    loop {
        drain_once(&*gw).await;
    }
}

async fn heartbeat_loop<G: LoopTarget>(gw: Arc<G>) {
    let period = Duration::from_secs(u64::from(gw.config().heartbeat_tick_secs));
    loop {
        async_io_mini::Timer::after(period).await;
        gw.tick_heartbeat();
    }
}

/// Run both tasks on the calling thread.  Never returns.
pub fn run<G: LoopTarget>(gw: Arc<G>) {
    let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();

    executor.spawn(drain_loop(gw.clone())).detach();
    executor.spawn(heartbeat_loop(gw.clone())).detach();

    info!(
        "loop: started (drain {}ms, heartbeat {}s)",
        gw.config().drain_wait_ms,
        gw.config().heartbeat_tick_secs
    );

    futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
}

// ── Thread spawn ─────────────────────────────────────────────

const LOOP_THREAD_NAME: &str = "mesh-loop\0";
const LOOP_STACK_KB: usize = 8;
const LOOP_PRIORITY: u8 = 5;

/// Spawn [`run`] in its own thread, pinned to the protocol core on
/// ESP-IDF so it shares cache with the BLE host.
#[cfg(target_os = "espidf")]
pub fn spawn<G: LoopTarget>(gw: Arc<G>) -> std::io::Result<std::thread::JoinHandle<()>> {
    // SAFETY: the config applies to the next pthread_create on this thread,
    // which is the spawn right below.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = 0;
        cfg.prio = i32::from(LOOP_PRIORITY);
        cfg.stack_size = (LOOP_STACK_KB * 1024) as i32;
        cfg.thread_name = LOOP_THREAD_NAME.as_ptr().cast();
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        log::warn!("loop: esp_pthread_set_cfg failed ({}), using defaults", ret);
    }

    std::thread::Builder::new()
        .name(LOOP_THREAD_NAME.trim_end_matches('\0').into())
        .spawn(move || run(gw))
}

/// Host fallback: plain thread, no core affinity.
#[cfg(not(target_os = "espidf"))]
pub fn spawn<G: LoopTarget>(gw: Arc<G>) -> std::io::Result<std::thread::JoinHandle<()>> {
    let _ = LOOP_PRIORITY;
    std::thread::Builder::new()
        .name(LOOP_THREAD_NAME.trim_end_matches('\0').into())
        .stack_size(LOOP_STACK_KB * 1024 * 4)
        .spawn(move || run(gw))
}
