mod common;

use caballus_driver::entities::{Coordinates, TrackingPhase};
use caballus_driver::lifecycle::{Confirmation, Event, RideState};

use common::{assert_quiet, controller, offer, settle, FakeAPI, PICKUP};

#[tokio::test]
async fn unanswered_offer_expires_into_a_single_decline() {
    let api = FakeAPI::new();
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    assert_eq!(controller.state(), RideState::Offered);
    assert_eq!(controller.countdown_remaining(), Some(15));

    for _ in 0..14 {
        controller.tick().unwrap();
    }
    assert_eq!(controller.state(), RideState::Offered);
    assert_eq!(controller.countdown_remaining(), Some(1));

    controller.tick().unwrap();
    assert_eq!(controller.state(), RideState::Idle);
    assert!(controller.offer().is_none());
    assert_eq!(controller.countdown_remaining(), None);

    settle(&mut controller, &outcomes).await;

    for _ in 0..10 {
        controller.tick().unwrap();
    }
    assert_quiet(&outcomes).await;

    assert_eq!(api.calls().await, vec!["decline R1"]);
}

#[tokio::test]
async fn failed_decline_does_not_block_the_reset() {
    let api = FakeAPI::new();
    *api.fail_decline.lock().await = true;
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    controller
        .perform(Event::Decline {
            ride_id: "R1".into(),
        })
        .unwrap();

    assert_eq!(controller.state(), RideState::Idle);

    match settle(&mut controller, &outcomes).await {
        Event::BestEffortSettled { call, result, .. } => {
            assert_eq!(call, "decline");
            assert!(result.is_err());
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(controller.state(), RideState::Idle);
    assert!(controller.last_error().is_none());
}

#[tokio::test]
async fn accepted_offer_loads_the_active_ride() {
    let api = FakeAPI::new();
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    controller
        .perform(Event::Accept {
            ride_id: "R1".into(),
        })
        .unwrap();

    // nothing moves until the backend answers
    assert_eq!(controller.state(), RideState::Offered);

    settle(&mut controller, &outcomes).await;

    assert_eq!(controller.state(), RideState::NavigatingToPickup);
    assert!(controller.offer().is_none());
    assert_eq!(controller.countdown_remaining(), None);

    let ride = controller.active_ride().unwrap();
    assert_eq!(ride.id(), "R1");
    assert_eq!(ride.status(), "driver_accepted");

    assert_eq!(api.calls().await, vec!["accept R1", "find_active_ride"]);
}

#[tokio::test]
async fn rejected_accept_keeps_the_offer() {
    let api = FakeAPI::new();
    *api.reject_accept.lock().await = true;
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    controller
        .perform(Event::Accept {
            ride_id: "R1".into(),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;

    assert_eq!(controller.state(), RideState::Offered);
    assert!(controller.offer().is_some());

    let error = controller.last_error().unwrap();
    assert!(error.is_confirmation_rejected());
    assert!(error.message.contains("no longer available"));

    controller.perform(Event::ClearError).unwrap();
    assert!(controller.last_error().is_none());
}

#[tokio::test]
async fn countdown_is_held_while_accept_is_in_flight() {
    let api = FakeAPI::new();
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    for _ in 0..14 {
        controller.tick().unwrap();
    }

    controller
        .perform(Event::Accept {
            ride_id: "R1".into(),
        })
        .unwrap();

    for _ in 0..5 {
        controller.tick().unwrap();
    }
    assert_eq!(controller.state(), RideState::Offered);

    settle(&mut controller, &outcomes).await;

    assert_eq!(controller.state(), RideState::NavigatingToPickup);
    assert_eq!(api.count("decline R1").await, 0);
}

#[tokio::test]
async fn double_tap_issues_one_confirmation() {
    let api = FakeAPI::new().with_active("R1", "in_progress").await;
    let (mut controller, outcomes) = controller(api.clone());

    controller.reconcile();
    settle(&mut controller, &outcomes).await;
    assert_eq!(controller.state(), RideState::TripInProgress);

    controller
        .perform(Event::Complete {
            ride_id: "R1".into(),
        })
        .unwrap();
    let second = controller.perform(Event::Complete {
        ride_id: "R1".into(),
    });
    assert!(second.unwrap_err().is_in_flight_error());

    settle(&mut controller, &outcomes).await;
    assert_quiet(&outcomes).await;

    assert_eq!(controller.state(), RideState::TripCompleted);
    assert_eq!(controller.summary().map(|s| s.total_fare), Some(20.4));
    assert_eq!(api.count("complete R1").await, 1);
}

#[tokio::test]
async fn arrival_is_gated_by_the_pickup_geofence() {
    let api = FakeAPI::new().with_active("R1", "driver_accepted").await;
    let (mut controller, outcomes) = controller(api.clone());

    controller.reconcile();
    settle(&mut controller, &outcomes).await;
    assert_eq!(controller.state(), RideState::NavigatingToPickup);

    let too_far = controller.perform(Event::Arrive {
        ride_id: "R1".into(),
        position: Some(Coordinates::new(52.1350, PICKUP.1)),
    });

    let error = too_far.unwrap_err();
    assert!(error.is_geofence_violation());
    assert!(error.message.contains("100 m"));
    assert_eq!(controller.state(), RideState::NavigatingToPickup);
    assert_eq!(controller.last_error(), Some(&error));
    assert_eq!(api.count("arrive R1").await, 0);

    controller
        .perform(Event::Arrive {
            ride_id: "R1".into(),
            position: Some(Coordinates::new(52.1340, PICKUP.1)),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;

    assert_eq!(controller.state(), RideState::ArrivedAtPickup);
    assert!(controller.last_error().is_none());
    assert_eq!(controller.active_ride().map(|r| r.status()), Some("driver_arrived"));
}

#[tokio::test]
async fn otp_verification_starts_the_trip() {
    let api = FakeAPI::new().with_active("R1", "driver_arrived").await;
    let (mut controller, outcomes) = controller(api.clone());

    controller.reconcile();
    settle(&mut controller, &outcomes).await;
    assert_eq!(controller.state(), RideState::ArrivedAtPickup);

    controller
        .perform(Event::VerifyOtp {
            ride_id: "R1".into(),
            otp: "9999".into(),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;

    assert_eq!(controller.state(), RideState::ArrivedAtPickup);
    assert_eq!(controller.last_error().map(|e| e.message.as_str()), Some("invalid code"));
    assert_eq!(controller.store().otp_entry(), None);

    controller
        .perform(Event::VerifyOtp {
            ride_id: "R1".into(),
            otp: "1234".into(),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;

    assert_eq!(controller.state(), RideState::TripInProgress);
    assert!(controller.last_error().is_none());

    let context = controller.tracking_context();
    assert_eq!(context.phase, TrackingPhase::TripInProgress);
    assert_eq!(context.ride_id.as_deref(), Some("R1"));
}

#[tokio::test]
async fn start_without_code_then_complete_and_acknowledge() {
    let api = FakeAPI::new().with_active("R1", "driver_arrived").await;
    let (mut controller, outcomes) = controller(api.clone());

    controller.reconcile();
    settle(&mut controller, &outcomes).await;

    controller
        .perform(Event::Start {
            ride_id: "R1".into(),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;
    assert_eq!(controller.state(), RideState::TripInProgress);

    controller
        .perform(Event::Complete {
            ride_id: "R1".into(),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;
    assert_eq!(controller.state(), RideState::TripCompleted);
    assert!(controller.active_ride().is_none());

    controller
        .perform(Event::RateRider {
            ride_id: "R1".into(),
            rating: 5,
            comment: Some("friendly".into()),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;

    controller.perform(Event::Acknowledge).unwrap();
    assert_eq!(controller.state(), RideState::Idle);
    assert!(controller.summary().is_none());

    assert_eq!(
        api.calls().await,
        vec![
            "find_active_ride",
            "start R1",
            "complete R1",
            "rate R1 5"
        ]
    );
}

#[tokio::test]
async fn driver_cancel_resets_even_before_the_backend_answers() {
    let api = FakeAPI::new().with_active("R1", "driver_accepted").await;
    let (mut controller, outcomes) = controller(api.clone());

    controller.reconcile();
    settle(&mut controller, &outcomes).await;

    controller
        .perform(Event::Cancel {
            ride_id: "R1".into(),
            reason: Some("rider no-show".into()),
        })
        .unwrap();

    assert_eq!(controller.state(), RideState::Idle);
    assert!(controller.active_ride().is_none());

    settle(&mut controller, &outcomes).await;
    assert_eq!(api.count("cancel R1 rider no-show").await, 1);
}

#[tokio::test]
async fn confirmation_after_cancel_push_is_discarded() {
    let api = FakeAPI::new();
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    controller
        .perform(Event::Accept {
            ride_id: "R1".into(),
        })
        .unwrap();

    controller
        .dispatch(Event::RideCancelled {
            ride_id: Some("R1".into()),
            reason: None,
        })
        .unwrap();
    assert_eq!(controller.state(), RideState::Idle);
    assert_eq!(controller.take_notices(), vec!["The ride was cancelled"]);

    // by the time the accept lands the backend has dropped the ride
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    *api.active.lock().await = None;

    assert!(matches!(
        outcome,
        Event::Confirmed {
            confirmation: Confirmation::Accepted(_),
            ..
        }
    ));
    controller.dispatch(outcome).unwrap();
    assert_eq!(controller.state(), RideState::Idle);

    // the stale confirmation triggers a reconciliation
    match settle(&mut controller, &outcomes).await {
        Event::Reconciled(ride) => assert!(ride.is_none()),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(controller.state(), RideState::Idle);
    assert!(controller.active_ride().is_none());
    assert!(controller.offer().is_none());
}

#[tokio::test]
async fn telemetry_is_untagged_until_reconciled() {
    let api = FakeAPI::new().with_active("R1", "driver_arrived").await;
    let (mut controller, outcomes) = controller(api.clone());

    assert_eq!(controller.tracking_context().phase, TrackingPhase::OnlineIdle);
    assert_eq!(controller.tracking_context().ride_id, None);

    controller.reconcile();
    settle(&mut controller, &outcomes).await;

    assert_eq!(
        controller.tracking_context().phase,
        TrackingPhase::ArrivedAtPickup
    );
    assert_eq!(controller.tracking_context().ride_id.as_deref(), Some("R1"));
}

#[tokio::test]
async fn reconnecting_untags_telemetry_until_the_backend_answers() {
    let api = FakeAPI::new().with_active("R1", "driver_accepted").await;
    let (mut controller, outcomes) = controller(api.clone());

    controller.reconcile();
    settle(&mut controller, &outcomes).await;
    assert_eq!(
        controller.tracking_context().phase,
        TrackingPhase::NavigatingToPickup
    );

    // offline for a while; the rider cancels without a push reaching us
    *api.active.lock().await = None;

    controller.reconcile();

    assert_eq!(controller.tracking_context().phase, TrackingPhase::OnlineIdle);
    assert_eq!(controller.tracking_context().ride_id, None);

    match settle(&mut controller, &outcomes).await {
        Event::Reconciled(ride) => assert!(ride.is_none()),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(controller.state(), RideState::Idle);
    assert_eq!(controller.tracking_context().phase, TrackingPhase::OnlineIdle);
    assert_eq!(api.count("find_active_ride").await, 2);
}

#[tokio::test]
async fn accepted_ride_stays_cancellable_when_its_details_fail_to_load() {
    let api = FakeAPI::new();
    *api.fail_lookup.lock().await = true;
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    controller
        .perform(Event::Accept {
            ride_id: "R1".into(),
        })
        .unwrap();

    match settle(&mut controller, &outcomes).await {
        Event::Confirmed {
            confirmation: Confirmation::Accepted(ride),
            ..
        } => assert!(ride.is_none()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(
        settle(&mut controller, &outcomes).await,
        Event::ReconcileFailed(_)
    ));

    assert_eq!(controller.state(), RideState::NavigatingToPickup);
    assert!(controller.active_ride().is_none());
    assert_eq!(controller.current_ride_id(), Some("R1"));

    controller
        .perform(Event::Cancel {
            ride_id: "R1".into(),
            reason: None,
        })
        .unwrap();
    assert_eq!(controller.state(), RideState::Idle);
    assert!(controller.last_error().is_none());

    settle(&mut controller, &outcomes).await;
    assert_eq!(api.count("cancel R1 -").await, 1);
}

#[tokio::test]
async fn cancel_push_reaches_a_ride_whose_details_failed_to_load() {
    let api = FakeAPI::new();
    *api.fail_lookup.lock().await = true;
    let (mut controller, outcomes) = controller(api.clone());

    controller.dispatch(Event::OfferReceived(offer("R1"))).unwrap();
    controller
        .perform(Event::Accept {
            ride_id: "R1".into(),
        })
        .unwrap();
    settle(&mut controller, &outcomes).await;
    settle(&mut controller, &outcomes).await;
    assert_eq!(controller.state(), RideState::NavigatingToPickup);

    controller
        .dispatch(Event::RideCancelled {
            ride_id: Some("R1".into()),
            reason: Some("rider cancelled".into()),
        })
        .unwrap();

    assert_eq!(controller.state(), RideState::Idle);
    assert_eq!(
        controller.take_notices(),
        vec!["The ride was cancelled: rider cancelled"]
    );
    assert_quiet(&outcomes).await;
}
