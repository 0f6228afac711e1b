//! # Cancellation and Deadlines
//!
//! Cancelling before dispatch runs nothing; cancelling during dispatch lets
//! cooperative handlers exit and reports stragglers as timed out.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use local_bus::{
        BusConfigBuilder, BusError, CancellationToken, DispatchStatus, HandlerError,
        HandlerFailure, HandlerFailureKind, LocalEventBus, SubscribeOptions,
    };
    use serde_json::json;

    use crate::fixtures::{CountingHandler, Mark, TimedHandler, Timeline};

    fn bus_with_grace(grace: Duration) -> LocalEventBus {
        let config = BusConfigBuilder::new().cancellation_grace(grace).build().unwrap();
        LocalEventBus::with_config(config).unwrap()
    }

    fn cancel_after(token: &CancellationToken, delay: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    #[tokio::test]
    async fn test_cancel_before_publish() {
        let bus = LocalEventBus::new();
        let counter = CountingHandler::new();
        bus.subscribe("E", counter.clone(), SubscribeOptions::default())
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bus
            .publish_with_cancel("E", json!({}), None, &cancel)
            .await
            .unwrap_err();

        match err {
            BusError::Cancelled(e) => assert_eq!(e.event_type.as_str(), "E"),
            other => panic!("Expected Cancelled, got {other:?}"),
        }
        assert_eq!(counter.calls(), 0);
        assert_eq!(bus.metrics().publishes_rejected, 1);
        assert_eq!(bus.metrics().events_published, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_handler_observes_cancel() {
        let bus = bus_with_grace(Duration::from_millis(100));
        let timeline = Timeline::new();
        let id = bus
            .subscribe(
                "E",
                TimedHandler::new("worker", Duration::from_secs(30), &timeline),
                SubscribeOptions::default(),
            )
            .unwrap();

        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(10));
        let result = bus
            .publish_with_cancel("E", json!({}), None, &cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(timeline.has("worker", Mark::Cancelled));
        assert_eq!(
            result.outcome(id).unwrap().failure_kind(),
            Some(HandlerFailureKind::Cancelled)
        );
    }

    /// A handler that ignores its token is reported, not waited on forever.
    #[tokio::test(start_paused = true)]
    async fn test_straggler_becomes_timeout() {
        let bus = bus_with_grace(Duration::from_millis(50));
        let stubborn = bus
            .subscribe_fn("E", "stubborn", SubscribeOptions::default(), |_, _| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .unwrap();
        let counter = CountingHandler::new();
        let quick = bus
            .subscribe("E", counter.clone(), SubscribeOptions::default())
            .unwrap();

        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(10));
        let started = tokio::time::Instant::now();
        let result = bus
            .publish_with_cancel("E", json!({}), None, &cancel)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(result.cancelled);
        assert_eq!(result.status, DispatchStatus::PartialFailure);
        assert_eq!(
            result.outcome(stubborn).unwrap().failure_kind(),
            Some(HandlerFailureKind::Timeout)
        );
        assert!(result.outcome(quick).unwrap().is_success());
        assert_eq!(counter.calls(), 1);
    }

    /// Sequential handlers still queued when cancellation lands never start.
    #[tokio::test(start_paused = true)]
    async fn test_queued_sequential_handlers_are_skipped() {
        let bus = bus_with_grace(Duration::from_millis(50));
        let timeline = Timeline::new();
        bus.subscribe(
            "E",
            TimedHandler::new("first", Duration::from_secs(30), &timeline),
            SubscribeOptions::sequential(),
        )
        .unwrap();
        let second = bus
            .subscribe(
                "E",
                TimedHandler::new("second", Duration::from_millis(1), &timeline),
                SubscribeOptions::sequential(),
            )
            .unwrap();

        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(10));
        let result = bus
            .publish_with_cancel("E", json!({}), None, &cancel)
            .await
            .unwrap();

        assert!(!timeline.has("second", Mark::Start));
        let outcome = result.outcome(second).unwrap();
        assert_eq!(outcome.failure_kind(), Some(HandlerFailureKind::Cancelled));
        assert_eq!(outcome.elapsed, Duration::ZERO);

        let error = result.error.unwrap();
        assert_eq!(error.failures_of(HandlerFailureKind::Cancelled).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_subscription_deadline() {
        let bus = LocalEventBus::new();
        let timeline = Timeline::new();
        let slow = bus
            .subscribe(
                "E",
                TimedHandler::new("slow", Duration::from_secs(10), &timeline),
                SubscribeOptions::default().with_timeout(Duration::from_millis(200)),
            )
            .unwrap();

        let result = bus.publish("E", json!({}), None).await.unwrap();

        assert!(!result.cancelled);
        assert_eq!(
            result.outcome(slow).unwrap().failure(),
            Some(&HandlerFailure::Timeout {
                timeout: Duration::from_millis(200)
            })
        );

        // The detached handler was told to stop.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(timeline.has("slow", Mark::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_wide_deadline_and_override() {
        let config = BusConfigBuilder::new()
            .handler_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let bus = LocalEventBus::with_config(config).unwrap();
        let timeline = Timeline::new();

        let defaulted = bus
            .subscribe(
                "E",
                TimedHandler::new("defaulted", Duration::from_millis(100), &timeline),
                SubscribeOptions::default(),
            )
            .unwrap();
        let extended = bus
            .subscribe(
                "E",
                TimedHandler::new("extended", Duration::from_millis(100), &timeline),
                SubscribeOptions::default().with_timeout(Duration::from_secs(1)),
            )
            .unwrap();

        let result = bus.publish("E", json!({}), None).await.unwrap();

        assert_eq!(
            result.outcome(defaulted).unwrap().failure_kind(),
            Some(HandlerFailureKind::Timeout)
        );
        assert!(result.outcome(extended).unwrap().is_success());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let bus = LocalEventBus::new();
        let counter = CountingHandler::new();
        let panicky = bus
            .subscribe_fn("E", "panicky", SubscribeOptions::default(), |_, _| async {
                let items: Vec<u32> = Vec::new();
                if items.is_empty() {
                    panic!("index out of range");
                }
                Ok::<(), HandlerError>(())
            })
            .unwrap();
        bus.subscribe("E", counter.clone(), SubscribeOptions::default())
            .unwrap();

        let result = bus.publish("E", json!({}), None).await.unwrap();

        let failure = result.outcome(panicky).unwrap().failure().unwrap();
        assert_eq!(failure.kind(), HandlerFailureKind::Execution);
        assert!(failure.detail().contains("index out of range"));
        assert_eq!(counter.calls(), 1);
    }

    #[tokio::test]
    async fn test_handler_sees_cancel_through_arc_bus() {
        let bus = Arc::new(bus_with_grace(Duration::from_millis(500)));
        let observed = Arc::new(tokio::sync::Notify::new());
        let notify = Arc::clone(&observed);
        bus.subscribe_fn("E", "watcher", SubscribeOptions::default(), move |_, cancel| {
            let notify = Arc::clone(&notify);
            async move {
                cancel.cancelled().await;
                notify.notify_one();
                Err(HandlerError::Canceled)
            }
        })
        .unwrap();

        let cancel = CancellationToken::new();
        let publish = {
            let (bus, cancel) = (Arc::clone(&bus), cancel.clone());
            tokio::spawn(async move { bus.publish_with_cancel("E", json!({}), None, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = publish.await.unwrap().unwrap();
        observed.notified().await;
        assert!(result.cancelled);
    }
}
