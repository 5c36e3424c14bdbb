use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use session_core::{FrameMessage, TargetOrigin};
use session_platform::{Clock, FramePort};
use tracing::debug;

/// Posts auth-change messages to the embedding frame with strictly increasing timestamps.
pub struct FrameNotifier {
    port: Arc<dyn FramePort>,
    target_origin: TargetOrigin,
    clock: Arc<dyn Clock>,
    last_timestamp: AtomicU64,
}

impl FrameNotifier {
    pub fn new(
        port: Arc<dyn FramePort>,
        target_origin: TargetOrigin,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            port,
            target_origin,
            clock,
            last_timestamp: AtomicU64::new(0),
        }
    }

    pub fn notify(&self, is_authenticated: bool) -> FrameMessage {
        let message = FrameMessage::auth_changed(is_authenticated, self.next_timestamp());
        debug!(
            is_authenticated,
            timestamp = message.timestamp,
            target_origin = %self.target_origin,
            "posting auth change to embedding frame"
        );
        self.port.post_message(&message, &self.target_origin);
        message
    }

    fn next_timestamp(&self) -> u64 {
        let now = self.clock.now_ms();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_core::AUTH_CHANGED_MESSAGE_TYPE;
    use session_platform::{ManualClock, RecordingFramePort};

    #[test]
    fn timestamps_increase_under_a_frozen_clock() {
        let port = Arc::new(RecordingFramePort::default());
        let clock = Arc::new(ManualClock::new(5_000));
        let notifier = FrameNotifier::new(port.clone(), TargetOrigin::Any, clock.clone());

        notifier.notify(true);
        notifier.notify(false);
        clock.set(4_000);
        notifier.notify(true);
        clock.set(9_000);
        notifier.notify(false);

        let stamps: Vec<u64> = port.messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![5_000, 5_001, 5_002, 9_000]);
        assert!(
            port.messages()
                .iter()
                .all(|m| m.kind == AUTH_CHANGED_MESSAGE_TYPE)
        );
    }

    #[test]
    fn messages_go_to_configured_origin() {
        let port = Arc::new(RecordingFramePort::default());
        let origin = TargetOrigin::parse("https://host.example.com").expect("origin parses");
        let notifier = FrameNotifier::new(
            port.clone(),
            origin.clone(),
            Arc::new(ManualClock::new(1)),
        );

        let sent = notifier.notify(false);
        assert!(!sent.is_authenticated);
        assert_eq!(port.targets(), vec![origin]);
    }
}
