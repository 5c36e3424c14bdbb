use std::sync::Mutex;

use session_core::{FrameMessage, TargetOrigin};
use tracing::{info, warn};

/// Outbound channel to the embedding frame.
pub trait FramePort: Send + Sync {
    fn post_message(&self, message: &FrameMessage, target_origin: &TargetOrigin);
}

/// Port that keeps every posted message, for hosts that forward in batches and for tests.
#[derive(Debug, Default)]
pub struct RecordingFramePort {
    posted: Mutex<Vec<(FrameMessage, TargetOrigin)>>,
}

impl RecordingFramePort {
    pub fn messages(&self) -> Vec<FrameMessage> {
        self.posted
            .lock()
            .map(|posted| posted.iter().map(|(message, _)| message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn targets(&self) -> Vec<TargetOrigin> {
        self.posted
            .lock()
            .map(|posted| posted.iter().map(|(_, origin)| origin.clone()).collect())
            .unwrap_or_default()
    }
}

impl FramePort for RecordingFramePort {
    fn post_message(&self, message: &FrameMessage, target_origin: &TargetOrigin) {
        if let Ok(mut posted) = self.posted.lock() {
            posted.push((message.clone(), target_origin.clone()));
        }
    }
}

/// Port that writes each message to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFramePort;

impl FramePort for TracingFramePort {
    fn post_message(&self, message: &FrameMessage, target_origin: &TargetOrigin) {
        match serde_json::to_string(message) {
            Ok(payload) => info!(target_origin = %target_origin, %payload, "frame message"),
            Err(err) => warn!(error = %err, "failed encoding frame message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_port_keeps_message_order() {
        let port = RecordingFramePort::default();
        let origin = TargetOrigin::parse("https://host.example.com").expect("origin parses");
        port.post_message(&FrameMessage::auth_changed(true, 1), &origin);
        port.post_message(&FrameMessage::auth_changed(false, 2), &TargetOrigin::Any);

        let flags: Vec<bool> = port
            .messages()
            .iter()
            .map(|message| message.is_authenticated)
            .collect();
        assert_eq!(flags, vec![true, false]);
        assert_eq!(port.targets(), vec![origin, TargetOrigin::Any]);
    }
}
