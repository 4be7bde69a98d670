//! RMNET character-device hook chain: client-registry tracking and call-indication sniffing.
//!
//! Grounded in `original_source/.../ipc.c`'s `track_client_count` (called inline as QMI control
//! traffic passes through) and `sms.c`'s indication watching. The RMNET endpoint carries every
//! QMI service multiplexed together, so its hook is the one place both concerns attach; the
//! synthesized SMS traffic itself is injected directly onto the stream pair's handles by the SMS
//! tick worker (see [`crate::workers`]) rather than through this hook, since that traffic
//! originates from this process rather than being observed in transit.
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{trace, warn};

use crate::command::{self, DispatchState};
use crate::context::CoreContext;
use crate::proxy::pair::{Direction, HookAction, ProxyHook};
use crate::qmi::callsniff::sniff;
use crate::qmi::frame::{
    QmiFrame, MSG_CLIENT_RELEASE, SERVICE_WMS, WMS_DELETE, WMS_RAW_SEND, WMS_RAW_WRITE,
    WMS_READ_MESSAGE,
};
use crate::sms::pdu::{
    build_delete_response_frame, build_read_response_frame, build_send_ack_frame,
    SmsDeliverPdu, SmsSubmitPdu, Timestamp,
};

/// QMI control-service message id for a successful `QMI_CLIENT_REGISTER` response's client id TLV.
const TLV_CLIENT_ID: u8 = 0x01;

/// Hook installed on the RMNET `StreamPair`.
pub struct RmnetHook {
    ctx: Arc<CoreContext>,
}

impl RmnetHook {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        RmnetHook { ctx }
    }

    fn track_registration(&self, frame: &QmiFrame) {
        if let Some(tlv) = frame.tlv(TLV_CLIENT_ID) {
            if let Some(&client_id) = tlv.value.first() {
                let mut registry = self.ctx.client_registry.lock().expect("registry lock poisoned");
                registry.track(frame.service(), client_id);
            }
        }
    }

    fn track_release(&self, frame: &QmiFrame) {
        let mut registry = self.ctx.client_registry.lock().expect("registry lock poisoned");
        registry.release(frame.service(), frame.header.client_id);
    }

    fn handle_call_indication(&self, data: &[u8]) {
        if let Some(event) = sniff(data) {
            trace!(?event, "call indication sniffed");
            let mut audio_state = self.ctx.call_audio.lock().expect("audio lock poisoned");
            if let Some(rate) = audio_state.on_event(event) {
                drop(audio_state);
                let backend_ctx = self.ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = backend_ctx.hosts.audio.set_sample_rate(rate).await {
                        tracing::warn!(error = %e, "failed to apply audio routing change");
                    }
                });
            }
        }
    }

    /// Inspect a host-originated WMS request and, if it's one this crate answers itself, build the
    /// response frame(s) to write straight back to the host instead of letting it reach the modem.
    fn handle_wms_request(&self, frame: &QmiFrame) -> Option<HookAction> {
        match frame.header.message_id {
            WMS_READ_MESSAGE => self.handle_read_request(frame),
            WMS_DELETE => self.handle_delete_request(frame),
            WMS_RAW_SEND | WMS_RAW_WRITE => self.handle_outgoing_sms(frame),
            _ => None,
        }
    }

    fn handle_read_request(&self, frame: &QmiFrame) -> Option<HookAction> {
        let mut queue = self.ctx.message_queue.try_lock().ok()?;
        let id = queue.active_id()?;
        let pdu = queue.pdu_for(id)?.clone();
        queue.on_read_request(id, frame.header.transaction_id);
        queue.on_read_sent(id);
        let response =
            build_read_response_frame(frame.header.client_id, frame.header.transaction_id, &pdu);
        Some(HookAction::Respond(vec![response.to_bytes()]))
    }

    fn handle_delete_request(&self, frame: &QmiFrame) -> Option<HookAction> {
        let mut queue = self.ctx.message_queue.try_lock().ok()?;
        let id = queue.active_id()?;
        let had_body = queue.body_non_empty(id);
        queue.on_delete_request(id, frame.header.transaction_id);
        queue.on_complete(id);
        let mut frames = Vec::new();
        if had_body {
            frames.push(
                build_delete_response_frame(frame.header.client_id, frame.header.transaction_id, 0x0001, 0x0032)
                    .to_bytes(),
            );
        }
        frames.push(
            build_delete_response_frame(frame.header.client_id, frame.header.transaction_id, 0x0000, 0x0000)
                .to_bytes(),
        );
        Some(HookAction::Respond(frames))
    }

    /// Decode an outgoing SMS the host wants sent, and if it's addressed to the bot's own number,
    /// divert it into the command interpreter rather than letting it reach the real modem: the ack
    /// is returned immediately, while dispatch and the reply are handled by a spawned task so the
    /// hook itself never blocks on I/O.
    fn handle_outgoing_sms(&self, frame: &QmiFrame) -> Option<HookAction> {
        let raw = &frame.tlv(0x01)?.value;
        if raw.len() < 3 {
            return None;
        }
        let msg_len = u16::from_le_bytes([raw[1], raw[2]]) as usize;
        let pdu_bytes = raw.get(3..3 + msg_len)?;
        let submit = SmsSubmitPdu::parse(pdu_bytes).ok()?;
        if submit.destination != self.ctx.config.bot_number {
            return None;
        }

        let ctx = self.ctx.clone();
        let client_id = frame.header.client_id;
        let transaction_id = frame.header.transaction_id;
        let message_id = frame.header.message_id;
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let reply_text = {
                let mut history = ctx.command_history.lock().await;
                let state = DispatchState {
                    bot_identity: &ctx.bot_identity,
                    rmnet_stats: &ctx.rmnet_stats,
                    gps_stats: &ctx.gps_stats,
                    suspend_gate: &ctx.suspend_gate,
                };
                match command::dispatch(&submit.body, &mut history, &ctx.hosts, &mut rng, &state).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "command dispatch failed for intercepted SMS");
                        return;
                    }
                }
            };
            let reply_pdu = SmsDeliverPdu {
                originator: ctx.config.bot_number.clone(),
                timestamp: Timestamp::now(),
                body: reply_text,
            };
            if let Err(e) = ctx.message_queue.lock().await.push(reply_pdu) {
                warn!(error = %e, "failed to enqueue command reply");
            }
        });

        let ack = build_send_ack_frame(client_id, transaction_id, message_id);
        Some(HookAction::Respond(vec![ack.to_bytes()]))
    }
}

impl ProxyHook for RmnetHook {
    fn pre_forward(&mut self, direction: Direction, data: &[u8]) -> HookAction {
        if let Ok(frame) = QmiFrame::parse(data) {
            if frame.header.message_id == MSG_CLIENT_RELEASE {
                self.track_release(&frame);
            } else if !frame.tlvs.is_empty() {
                self.track_registration(&frame);
            }
            if direction == Direction::HostToModem && frame.service() == SERVICE_WMS {
                if let Some(action) = self.handle_wms_request(&frame) {
                    return action;
                }
            }
        }
        if direction == Direction::ModemToHost {
            self.handle_call_indication(data);
        }
        HookAction::Forward
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::{AudioBackend, CALL_ACTIVE_SAMPLE_RATE};
    use crate::cell::CellSampler;
    use crate::command::hostif::{AdbSetter, CallbackScheduler, HostInterfaces, Rebooter, UsbResetter};
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NoopHost;
    #[async_trait]
    impl AdbSetter for NoopHost {
        async fn set_adb_enabled(&self, _enabled: bool) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl UsbResetter for NoopHost {
        async fn reset_usb(&self) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl Rebooter for NoopHost {
        async fn reboot_after(&self, _delay: Duration) -> std::io::Result<()> {
            Ok(())
        }
        async fn shutdown_after(&self, _delay: Duration) -> std::io::Result<()> {
            Ok(())
        }
    }
    #[async_trait]
    impl CallbackScheduler for NoopHost {
        async fn schedule(&self, _after: Duration, _label: String) -> std::io::Result<()> {
            Ok(())
        }
    }
    struct RecordingAudio(Arc<AtomicU32>);
    #[async_trait]
    impl AudioBackend for RecordingAudio {
        async fn set_sample_rate(&self, hz: u32) -> std::io::Result<()> {
            self.0.store(hz, Ordering::SeqCst);
            Ok(())
        }
    }
    #[async_trait]
    impl CellSampler for NoopHost {
        async fn query_csq(&self) -> std::io::Result<String> {
            Ok(String::new())
        }
    }

    fn test_ctx(seen: Arc<AtomicU32>) -> Arc<CoreContext> {
        CoreContext::new(
            Config::for_test(),
            HostInterfaces {
                adb: Box::new(NoopHost),
                usb: Box::new(NoopHost),
                power: Box::new(NoopHost),
                callbacks: Box::new(NoopHost),
                audio: Box::new(RecordingAudio(seen)),
                cell: Box::new(NoopHost),
            },
        )
    }

    #[tokio::test]
    async fn call_indication_triggers_audio_change() {
        let seen = Arc::new(AtomicU32::new(0));
        let ctx = test_ctx(seen.clone());
        let mut hook = RmnetHook::new(ctx);
        let mut buf = vec![0u8; 22];
        buf[0] = 0x01;
        buf[3] = 0x02;
        buf[4] = crate::qmi::callsniff::SERVICE_VOICE;
        buf[6] = 0x04;
        buf[9] = 0x2e;
        buf[18] = 0x01;
        buf[20] = 0x04;
        hook.pre_forward(Direction::ModemToHost, &buf);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), CALL_ACTIVE_SAMPLE_RATE);
    }

    fn read_request_frame(client_id: u8, transaction_id: u16) -> Vec<u8> {
        QmiFrame {
            header: crate::qmi::frame::QmiHeader {
                control: 0x00,
                service: SERVICE_WMS,
                client_id,
                ctl_flags: 0x00,
                transaction_id,
                message_id: WMS_READ_MESSAGE,
            },
            tlvs: vec![],
        }
        .to_bytes()
    }

    fn delete_request_frame(client_id: u8, transaction_id: u16) -> Vec<u8> {
        QmiFrame {
            header: crate::qmi::frame::QmiHeader {
                control: 0x00,
                service: SERVICE_WMS,
                client_id,
                ctl_flags: 0x00,
                transaction_id,
                message_id: WMS_DELETE,
            },
            tlvs: vec![],
        }
        .to_bytes()
    }

    #[tokio::test]
    async fn read_request_answers_with_active_pdu() {
        let ctx = test_ctx(Arc::new(AtomicU32::new(0)));
        ctx.message_queue
            .lock()
            .await
            .push(SmsDeliverPdu {
                originator: "1234567".to_string(),
                timestamp: crate::sms::pdu::Timestamp::from_calendar(2024, 1, 1, 0, 0, 0, 0),
                body: "status".to_string(),
            })
            .unwrap();
        let mut hook = RmnetHook::new(ctx.clone());
        let frame = read_request_frame(1, 5);
        match hook.pre_forward(Direction::HostToModem, &frame) {
            HookAction::Respond(frames) => {
                assert_eq!(frames.len(), 1);
                let parsed = QmiFrame::parse(&frames[0]).unwrap();
                assert_eq!(parsed.header.transaction_id, 5);
                assert_eq!(parsed.header.message_id, WMS_READ_MESSAGE);
            }
            other => panic!("expected Respond, got a different action: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_request_acknowledges_and_reaps_message() {
        let ctx = test_ctx(Arc::new(AtomicU32::new(0)));
        ctx.message_queue
            .lock()
            .await
            .push(SmsDeliverPdu {
                originator: "1234567".to_string(),
                timestamp: crate::sms::pdu::Timestamp::from_calendar(2024, 1, 1, 0, 0, 0, 0),
                body: "status".to_string(),
            })
            .unwrap();
        let mut hook = RmnetHook::new(ctx.clone());
        let frame = delete_request_frame(1, 9);
        match hook.pre_forward(Direction::HostToModem, &frame) {
            HookAction::Respond(frames) => assert_eq!(frames.len(), 2),
            other => panic!("expected Respond, got a different action: {other:?}"),
        }
        assert!(ctx.message_queue.lock().await.is_empty());
    }
}
