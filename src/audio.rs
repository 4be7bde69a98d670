//! Call-audio routing driven by sniffed call-indication events.
//!
//! Grounded in `original_source/.../cell.c`/`command.c`'s direct `sysfs` writes to the audio
//! codec's sample-rate node when a call starts ringing or ends. The host-facing side effect is
//! injected behind a trait (like the teacher injects `tokio_file_unix::File` behind its codec
//! traits) so the state machine that decides *when* to flip audio routing can be unit tested
//! without a real sysfs tree.
use async_trait::async_trait;

use crate::qmi::callsniff::CallEvent;

/// Sample rate written to the audio codec while a call is active.
pub const CALL_ACTIVE_SAMPLE_RATE: u32 = 8000;
/// Sample rate restored once a call ends.
pub const IDLE_SAMPLE_RATE: u32 = 48000;

/// Host-side effect of flipping the audio codec's routing for voice calls.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn set_sample_rate(&self, hz: u32) -> std::io::Result<()>;
}

/// Tracks the last call state seen so repeated `Ringing`/`Connected` indications don't cause
/// redundant sysfs writes.
#[derive(Debug, Default)]
pub struct CallAudioState {
    active: bool,
}

impl CallAudioState {
    pub fn new() -> Self {
        CallAudioState { active: false }
    }

    /// Decide whether `event` requires a sample-rate change, returning the new rate if so.
    pub fn on_event(&mut self, event: CallEvent) -> Option<u32> {
        match event {
            CallEvent::Ringing | CallEvent::Connected => {
                if self.active {
                    None
                } else {
                    self.active = true;
                    Some(CALL_ACTIVE_SAMPLE_RATE)
                }
            }
            CallEvent::Ended => {
                if self.active {
                    self.active = false;
                    Some(IDLE_SAMPLE_RATE)
                } else {
                    None
                }
            }
        }
    }
}

/// Applies a [`CallAudioState`] transition through an [`AudioBackend`].
pub async fn apply_event(
    state: &mut CallAudioState,
    backend: &dyn AudioBackend,
    event: CallEvent,
) -> std::io::Result<()> {
    if let Some(rate) = state.on_event(event) {
        backend.set_sample_rate(rate).await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct RecordingBackend(Arc<AtomicU32>);
    #[async_trait]
    impl AudioBackend for RecordingBackend {
        async fn set_sample_rate(&self, hz: u32) -> std::io::Result<()> {
            self.0.store(hz, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn ringing_then_ended_toggles_rate() {
        let seen = Arc::new(AtomicU32::new(0));
        let backend = RecordingBackend(seen.clone());
        let mut state = CallAudioState::new();

        apply_event(&mut state, &backend, CallEvent::Ringing).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), CALL_ACTIVE_SAMPLE_RATE);

        apply_event(&mut state, &backend, CallEvent::Connected).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), CALL_ACTIVE_SAMPLE_RATE);

        apply_event(&mut state, &backend, CallEvent::Ended).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), IDLE_SAMPLE_RATE);
    }

    #[tokio::test]
    async fn redundant_ringing_does_not_rewrite() {
        let seen = Arc::new(AtomicU32::new(0));
        let backend = RecordingBackend(seen.clone());
        let mut state = CallAudioState::new();
        apply_event(&mut state, &backend, CallEvent::Ringing).await.unwrap();
        seen.store(0, Ordering::SeqCst);
        apply_event(&mut state, &backend, CallEvent::Ringing).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0, "should not have written again");
    }
}
