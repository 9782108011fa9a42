//! The fixed worker pool. Each worker owns a disjoint slice of the session
//! table (by session id modulo worker count) and pumps its sessions' receive
//! and send paths in a loop, so thread count stays bounded no matter how many
//! clients connect.

use std::{sync::Arc, thread, time::Duration};

use tether_shared::Timer;

use crate::server::ServerInner;

const IDLE_BACKOFF: Duration = Duration::from_millis(1);

pub(crate) fn run(inner: Arc<ServerInner>, index: usize, workers: usize) {
    // Worker 0 additionally drives the periodic sync-var broadcast
    let mut sync_timer = Timer::new(inner.config.sync_interval);
    while !inner.is_shutting_down() {
        for session in inner.worker_sessions(index, workers) {
            inner.service_session(&session);
        }
        if index == 0 && sync_timer.ringing() {
            sync_timer.reset();
            inner.broadcast_sync_vars();
        }
        thread::sleep(IDLE_BACKOFF);
    }
}
