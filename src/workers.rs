//! Worker tasks: one per concurrently-running responsibility.
//!
//! The teacher drives everything off a single futures-0.1/tokio-core event loop
//! (`tokio_core::reactor::Core::run` in `src/main.rs`). That executor and its `impl Trait`
//! requirement are both unbuildable on a current toolchain (see SPEC_FULL.md's migration note),
//! so this crate spawns one `tokio::task` per responsibility instead: `W-GPS`/`W-RMNET` pump their
//! respective `StreamPair`s, `W-SMS-Tick` drives the message queue's retry/timeout logic on a fixed
//! period, and `W-Callback`/`W-Delayed-Reboot`/`W-Delayed-Shutdown` are spawned on demand by the
//! command dispatcher rather than running continuously. None of these tasks are ever cancelled
//! gracefully; like the original, the whole process exits together.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::CoreContext;
use crate::qmi::frame::SERVICE_WMS;
use crate::sms::pdu::{build_delete_response_frame, build_notify_frame, build_read_response_frame};
use crate::sms::queue::QueueAction;

/// Tick interval for the SMS queue's retry/timeout driver.
pub const SMS_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Drives [`crate::sms::queue::MessageQueue`] forward on a fixed period, writing whatever frame
/// the queue produces onto the RMNET host-side handle so the host observes it as an unsolicited
/// modem event. This is the retry/timeout path only: the first attempt at each handshake step is
/// normally answered synchronously by [`crate::proxy::rmnet::RmnetHook`] as the host's request
/// comes through; this worker only re-sends when that request never arrives.
pub fn spawn_sms_tick<H>(ctx: Arc<CoreContext>, host: Arc<Mutex<H>>) -> JoinHandle<()>
where
    H: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SMS_TICK_INTERVAL);
        loop {
            interval.tick().await;
            let action = {
                let mut queue = ctx.message_queue.lock().await;
                queue.tick()
            };
            let Some(action) = action else { continue };
            if let Err(e) = apply_queue_action(&ctx, &host, action).await {
                error!(error = %e, "failed to write SMS queue action to host handle");
            }
        }
    })
}

fn wms_client_id(ctx: &CoreContext) -> u8 {
    ctx.client_registry
        .lock()
        .expect("registry lock poisoned")
        .client_id_for_service(SERVICE_WMS)
        .unwrap_or(0)
}

async fn apply_queue_action<H>(
    ctx: &Arc<CoreContext>,
    host: &Arc<Mutex<H>>,
    action: QueueAction,
) -> std::io::Result<()>
where
    H: AsyncWrite + Unpin,
{
    let client_id = wms_client_id(ctx);
    match action {
        QueueAction::SendNotify(id) => {
            info!(id, "sending SMS notification");
            let bytes = build_notify_frame(client_id, id).to_bytes();
            {
                let mut guard = host.lock().await;
                guard.write_all(&bytes).await?;
            }
            ctx.message_queue.lock().await.on_notify_sent(id);
            Ok(())
        }
        QueueAction::SendRead(id, pdu) => {
            info!(id, "sending SMS body");
            let transaction_id = ctx
                .message_queue
                .lock()
                .await
                .last_host_transaction_id()
                .unwrap_or(0);
            let bytes = build_read_response_frame(client_id, transaction_id, &pdu).to_bytes();
            let mut guard = host.lock().await;
            guard.write_all(&bytes).await
        }
        QueueAction::SendDeleteAck(id) => {
            info!(id, "sending delete ack");
            let (transaction_id, had_body) = {
                let queue = ctx.message_queue.lock().await;
                (
                    queue.last_host_transaction_id().unwrap_or(0),
                    queue.body_non_empty(id),
                )
            };
            let mut frames = Vec::new();
            if had_body {
                frames.push(
                    build_delete_response_frame(client_id, transaction_id, 0x0001, 0x0032).to_bytes(),
                );
            }
            frames
                .push(build_delete_response_frame(client_id, transaction_id, 0x0000, 0x0000).to_bytes());
            let mut guard = host.lock().await;
            for frame in frames {
                guard.write_all(&frame).await?;
            }
            Ok(())
        }
        QueueAction::GaveUp(id, state) => {
            warn!(id, ?state, "abandoned message after exhausting retries");
            Ok(())
        }
    }
}

/// Spawns a one-shot delayed reboot. Invoked on demand by the command dispatcher rather than run
/// continuously.
pub fn spawn_delayed_reboot<F>(delay: Duration, reboot: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = reboot.await {
            error!(error = %e, "delayed reboot failed");
        }
    })
}

/// Spawns a one-shot delayed shutdown.
pub fn spawn_delayed_shutdown<F>(delay: Duration, shutdown: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = shutdown.await {
            error!(error = %e, "delayed shutdown failed");
        }
    })
}

/// Spawns a one-shot scheduled callback reminder.
pub fn spawn_callback<F>(delay: Duration, callback: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = callback.await {
            error!(error = %e, "scheduled callback failed");
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn delayed_reboot_runs_after_delay() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = spawn_delayed_reboot(Duration::from_millis(10), async move {
            ran2.store(true, Ordering::SeqCst);
            Ok(())
        });
        handle.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
