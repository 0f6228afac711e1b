//! # Dispatch Flows
//!
//! Fan-out to every subscriber, failure isolation, unsubscribe, and
//! registration racing with publish.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use local_bus::{
        BusError, DispatchStatus, EventMetadata, HandlerError, HandlerFailure, HandlerFailureKind,
        LocalEventBus, SubscribeOptions,
    };
    use serde_json::json;

    use crate::fixtures::{CountingHandler, FailingHandler};

    // =============================================================================
    // FAN-OUT AND ISOLATION
    // =============================================================================

    /// One handler succeeds, one fails: the success still happens exactly once
    /// and both outcomes are reported in registration order.
    #[tokio::test]
    async fn test_user_registered_partial_failure() {
        bus_telemetry::init_test_logging();
        let bus = LocalEventBus::new();
        let counter = CountingHandler::new();

        let a = bus
            .subscribe("UserRegistered", counter.clone(), SubscribeOptions::default())
            .unwrap();
        let b = bus
            .subscribe(
                "UserRegistered",
                Arc::new(FailingHandler { message: "mailer down" }),
                SubscribeOptions::default(),
            )
            .unwrap();

        let result = bus
            .publish("UserRegistered", json!({ "UserId": "u1" }), None)
            .await
            .unwrap();

        assert_eq!(result.status, DispatchStatus::PartialFailure);
        assert_eq!(counter.calls(), 1);

        let outcomes: Vec<_> = result
            .outcomes
            .iter()
            .map(|o| (o.handler_id, o.failure_kind()))
            .collect();
        assert_eq!(
            outcomes,
            vec![(a, None), (b, Some(HandlerFailureKind::Execution))]
        );

        let error = result.into_result().unwrap_err();
        assert_eq!(error.total, 2);
        assert_eq!(error.failures[0].handler_id, b);
        assert_eq!(error.failures[0].failure, HandlerFailure::execution("mailer down"));
        assert!(error.to_string().contains("1 of 2"));
    }

    #[tokio::test]
    async fn test_every_handler_runs_exactly_once() {
        let bus = LocalEventBus::new();
        let counters: Vec<_> = (0..8).map(|_| CountingHandler::new()).collect();
        for counter in &counters {
            bus.subscribe("OrderPlaced", counter.clone(), SubscribeOptions::default())
                .unwrap();
        }

        let payload = json!({ "orderId": 7 });
        let result = bus.publish("OrderPlaced", payload.clone(), None).await.unwrap();

        assert_eq!(result.status, DispatchStatus::AllSucceeded);
        assert_eq!(result.outcomes.len(), 8);
        for counter in &counters {
            assert_eq!(counter.calls(), 1);
            assert_eq!(counter.payloads(), vec![payload.clone()]);
        }
    }

    #[tokio::test]
    async fn test_no_subscribers_is_success() {
        let bus = LocalEventBus::new();
        let other = CountingHandler::new();
        bus.subscribe("Other", other.clone(), SubscribeOptions::default())
            .unwrap();

        let result = bus.publish("Unheard", json!(null), None).await.unwrap();

        assert_eq!(result.status, DispatchStatus::NoSubscribers);
        assert!(result.is_success());
        assert!(result.outcomes.is_empty());
        assert_eq!(other.calls(), 0);
    }

    #[tokio::test]
    async fn test_validation_error_runs_nothing() {
        let bus = LocalEventBus::new();
        let counter = CountingHandler::new();
        bus.subscribe("E", counter.clone(), SubscribeOptions::default())
            .unwrap();

        let metadata = EventMetadata::new().with_correlation_id("");
        let err = bus.publish("E", json!({}), Some(metadata)).await.unwrap_err();

        assert!(matches!(err, BusError::Validation(_)));
        assert_eq!(err.as_label(), "validation_empty_correlation_id");
        assert_eq!(counter.calls(), 0);
    }

    // =============================================================================
    // REGISTRATION
    // =============================================================================

    #[tokio::test]
    async fn test_unsubscribed_handler_is_never_invoked() {
        let bus = LocalEventBus::new();
        let kept = CountingHandler::new();
        let dropped = CountingHandler::new();
        bus.subscribe("E", kept.clone(), SubscribeOptions::default())
            .unwrap();
        let id = bus
            .subscribe("E", dropped.clone(), SubscribeOptions::default())
            .unwrap();

        bus.unsubscribe(id);
        for _ in 0..3 {
            bus.publish("E", json!({}), None).await.unwrap();
        }

        assert_eq!(kept.calls(), 3);
        assert_eq!(dropped.calls(), 0);
        assert!(!bus.registry().contains(id));
    }

    /// Subscribing from inside a running handler must not deadlock, and the new
    /// handler only sees later publishes.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_during_publish() {
        let bus = Arc::new(LocalEventBus::new());
        let late = CountingHandler::new();

        let (bus_ref, late_ref) = (Arc::clone(&bus), late.clone());
        bus.subscribe_fn("E", "registrar", SubscribeOptions::default(), move |_, _| {
            let (bus, late) = (Arc::clone(&bus_ref), late_ref.clone());
            async move {
                if !bus.registry().event_types().iter().any(|t| t.as_str() == "Late") {
                    if let Err(e) = bus.subscribe("Late", late, SubscribeOptions::default()) {
                        return Err(HandlerError::failed(e.to_string()));
                    }
                }
                Ok(())
            }
        })
        .unwrap();

        let result = bus.publish("E", json!({}), None).await.unwrap();
        assert!(result.is_success());

        bus.publish("Late", json!({}), None).await.unwrap();
        assert_eq!(late.calls(), 1);
    }

    /// Many producers on a multi-threaded runtime, with registrations churning.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_and_registrations() {
        let bus = Arc::new(LocalEventBus::new());
        let stable = CountingHandler::new();
        bus.subscribe("Tick", stable.clone(), SubscribeOptions::default())
            .unwrap();

        let mut producers = Vec::new();
        for _ in 0..8 {
            let bus = Arc::clone(&bus);
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    let result = bus.publish("Tick", json!({ "i": i }), None).await.unwrap();
                    assert!(result.is_success());
                }
            }));
        }

        let churn = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let id = bus
                        .subscribe("Tick", CountingHandler::new(), SubscribeOptions::default())
                        .unwrap();
                    tokio::time::sleep(Duration::from_micros(50)).await;
                    bus.unsubscribe(id);
                }
            })
        };

        for producer in producers {
            producer.await.unwrap();
        }
        churn.await.unwrap();

        assert_eq!(stable.calls(), 200);
        assert_eq!(bus.metrics().events_published, 200);
        assert_eq!(bus.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_outcomes() {
        let bus = LocalEventBus::new();
        bus.subscribe("E", CountingHandler::new(), SubscribeOptions::default())
            .unwrap();
        bus.subscribe(
            "E",
            Arc::new(FailingHandler { message: "nope" }),
            SubscribeOptions::default(),
        )
        .unwrap();

        bus.publish("E", json!({}), None).await.unwrap();
        bus.publish("Nobody", json!({}), None).await.unwrap();
        let _ = bus.publish("", json!({}), None).await;

        let metrics = bus.metrics();
        assert_eq!(metrics.events_published, 2);
        assert_eq!(metrics.no_subscribers, 1);
        assert_eq!(metrics.publishes_rejected, 1);
        assert_eq!(metrics.handlers_invoked, 2);
        assert_eq!(metrics.handlers_failed, 1);
    }
}
