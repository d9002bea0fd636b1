//! Channel drivers for headless mode
//!
//! The binary has no telephony or push transport of its own. Each driver
//! validates what it would need (recipients, a number to dial) and hands the
//! delivery to the front end as a JSON event.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use guardian_app::{AlertNotice, ChannelDriver, ChannelDrivers, EscalationPolicy};
use guardian_core::{Channel, DeliveryOutcome, FallEvent};

use super::{EventSink, HeadlessEvent};

/// Drivers for every channel, all writing to `sink`
pub fn headless_drivers(sink: EventSink) -> ChannelDrivers {
    ChannelDrivers::new()
        .with(Channel::InApp, Arc::new(InAppAlertDriver::new(sink.clone())))
        .with(Channel::Sms, Arc::new(SmsDriver::new(sink.clone())))
        .with(Channel::Call, Arc::new(CallDriver::new(sink.clone())))
        .with(Channel::Push, Arc::new(PushDriver::new(sink)))
}

/// Shows the alert with a map link
#[derive(Debug, Clone)]
pub struct InAppAlertDriver {
    sink: EventSink,
}

impl InAppAlertDriver {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl ChannelDriver for InAppAlertDriver {
    fn name(&self) -> &str {
        "headless-in-app"
    }

    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        _policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome> {
        Box::pin(async move {
            self.sink
                .emit(HeadlessEvent::alert(AlertNotice::for_event(event)));
            DeliveryOutcome::Succeeded
        })
    }
}

/// Texts the policy's recipients
#[derive(Debug, Clone)]
pub struct SmsDriver {
    sink: EventSink,
}

impl SmsDriver {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl ChannelDriver for SmsDriver {
    fn name(&self) -> &str {
        "headless-sms"
    }

    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome> {
        Box::pin(async move {
            let recipients = policy.sms_recipients();
            if recipients.is_empty() {
                return DeliveryOutcome::failed("no SMS recipients configured");
            }
            let body = policy.render_sms(&event.location);
            self.sink
                .emit(HeadlessEvent::sms_sent(event, recipients, body));
            DeliveryOutcome::Succeeded
        })
    }
}

/// Dials the target phone
#[derive(Debug, Clone)]
pub struct CallDriver {
    sink: EventSink,
}

impl CallDriver {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl ChannelDriver for CallDriver {
    fn name(&self) -> &str {
        "headless-call"
    }

    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome> {
        Box::pin(async move {
            let Some(number) = policy.call_target() else {
                return DeliveryOutcome::failed("no phone number to call");
            };
            self.sink.emit(HeadlessEvent::call_placed(event, number));
            DeliveryOutcome::Succeeded
        })
    }
}

/// Push to the user's other devices
#[derive(Debug, Clone)]
pub struct PushDriver {
    sink: EventSink,
}

impl PushDriver {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl ChannelDriver for PushDriver {
    fn name(&self) -> &str {
        "headless-push"
    }

    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        _policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome> {
        Box::pin(async move {
            let notice = AlertNotice::for_event(event);
            self.sink
                .emit(HeadlessEvent::push_sent(event, notice.message));
            DeliveryOutcome::Succeeded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_app::Contact;
    use guardian_core::{Coordinates, EventKind, EventSource, Location};
    use std::time::Duration;

    fn fall() -> FallEvent {
        FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            Location::from(Coordinates::new(12.34, 56.78)),
            chrono::Utc::now(),
            Duration::from_secs(60),
        )
    }

    fn policy_with_contacts() -> EscalationPolicy {
        EscalationPolicy {
            contacts: vec![Contact {
                name: "Ana".into(),
                phone: "+15550001".into(),
                email: None,
            }],
            target_phone: Some("+15551234".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sms_driver_sends_rendered_body() {
        let (sink, mut rx) = EventSink::channel();
        let driver = SmsDriver::new(sink);

        let outcome = driver.attempt(&fall(), &policy_with_contacts()).await;
        assert!(outcome.is_success());

        match rx.recv().await.unwrap() {
            HeadlessEvent::SmsSent { to, body, .. } => {
                assert_eq!(to, vec!["+15550001", "+15551234"]);
                assert_eq!(body, "EMERGENCY: Fall detected! Location: 12.34,56.78.");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sms_driver_fails_without_recipients() {
        let (sink, mut rx) = EventSink::channel();
        let outcome = SmsDriver::new(sink)
            .attempt(&fall(), &EscalationPolicy::default())
            .await;
        assert_eq!(
            outcome,
            DeliveryOutcome::failed("no SMS recipients configured")
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_call_driver_dials_target() {
        let (sink, mut rx) = EventSink::channel();
        let driver = CallDriver::new(sink);

        assert!(driver
            .attempt(&fall(), &policy_with_contacts())
            .await
            .is_success());
        assert!(matches!(
            rx.recv().await.unwrap(),
            HeadlessEvent::CallPlaced { to, .. } if to == "+15551234"
        ));

        let outcome = driver.attempt(&fall(), &EscalationPolicy::default()).await;
        assert_eq!(outcome, DeliveryOutcome::failed("no phone number to call"));
    }

    #[tokio::test]
    async fn test_in_app_alert_carries_map_url() {
        let (sink, mut rx) = EventSink::channel();
        InAppAlertDriver::new(sink)
            .attempt(&fall(), &EscalationPolicy::default())
            .await;

        match rx.recv().await.unwrap() {
            HeadlessEvent::Alert { map_url, title, .. } => {
                assert_eq!(title, "Fall detected");
                assert_eq!(
                    map_url.as_deref(),
                    Some("https://www.google.com/maps/search/?api=1&query=12.34,56.78")
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_headless_drivers_cover_every_channel() {
        let drivers = headless_drivers(EventSink::Stdout);
        assert_eq!(drivers.channels(), Channel::ALL.to_vec());
    }
}
