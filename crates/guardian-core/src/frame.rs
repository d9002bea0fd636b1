//! Decoded wire frames

/// One decoded message from the wearable link.
///
/// Produced by the protocol codec and consumed immediately by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `FALL:<lat>,<lng>` - the wearable detected a fall
    Fall { lat: f64, lng: f64 },
    /// `CHECK_IN_ACK` - the wearer confirmed a wellness check-in
    CheckInAck,
    /// `HEARTBEAT` - liveness only
    Heartbeat,
    /// Anything the codec did not recognize, kept verbatim
    Unknown(String),
}

impl Frame {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Fall { .. } => "fall",
            Frame::CheckInAck => "check_in_ack",
            Frame::Heartbeat => "heartbeat",
            Frame::Unknown(_) => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Frame::Unknown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_names() {
        assert_eq!(Frame::Fall { lat: 1.0, lng: 2.0 }.name(), "fall");
        assert_eq!(Frame::CheckInAck.name(), "check_in_ack");
        assert_eq!(Frame::Heartbeat.name(), "heartbeat");
        assert_eq!(Frame::Unknown("x".into()).name(), "unknown");
    }

    #[test]
    fn test_is_unknown() {
        assert!(Frame::Unknown(String::new()).is_unknown());
        assert!(!Frame::Heartbeat.is_unknown());
    }
}
