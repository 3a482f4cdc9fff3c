//! Reservation, release and promotion against the in-memory capacity store.
//!
//! Run with: `cargo test --test capacity_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use event_access_core::capacity::{CapacityReservation, ReservationResult, ReservationStatus};
use event_access_core::error::{AccessError, ErrorCode, StoreError};
use event_access_core::types::{AccessId, EventId, RegistrationId};
use event_access_testing::{AccessItemBuilder, InMemoryAccessStore, init_test_tracing};
use std::sync::Arc;
use std::time::Duration;

fn reservation(store: &Arc<InMemoryAccessStore>) -> CapacityReservation {
    CapacityReservation::with_timeout(store.clone(), Duration::from_secs(1))
}

#[tokio::test]
async fn reserve_at_capacity_without_waitlist_is_rejected() {
    init_test_tracing();
    let item = AccessItemBuilder::new(EventId::new(), "Full workshop")
        .capacity(10)
        .registered(10)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));

    let error = reservation(&store)
        .reserve(item.id, RegistrationId::new(), 1, true)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::AccessCapacityExceeded);
    assert_eq!(store.item(item.id).unwrap().registered_count, 10);
}

#[tokio::test]
async fn unlimited_item_always_confirms() {
    let item = AccessItemBuilder::new(EventId::new(), "Keynote").build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);

    for _ in 0..50 {
        assert_eq!(
            service.reserve(item.id, RegistrationId::new(), 3, false).await.unwrap(),
            ReservationResult::confirmed()
        );
    }
    assert_eq!(store.item(item.id).unwrap().registered_count, 150);
}

#[tokio::test]
async fn overflow_goes_to_waitlist_with_positions() {
    let item = AccessItemBuilder::new(EventId::new(), "Dinner")
        .capacity(1)
        .waitlist(Some(2))
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);

    assert_eq!(
        service.reserve(item.id, RegistrationId::new(), 1, true).await.unwrap().status,
        ReservationStatus::Confirmed
    );
    assert_eq!(
        service.reserve(item.id, RegistrationId::new(), 1, true).await.unwrap(),
        ReservationResult::waitlisted(1)
    );
    assert_eq!(
        service.reserve(item.id, RegistrationId::new(), 1, true).await.unwrap(),
        ReservationResult::waitlisted(2)
    );

    let error = service.reserve(item.id, RegistrationId::new(), 1, true).await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::AccessWaitlistFull);
}

#[tokio::test]
async fn waitlist_not_allowed_by_caller_is_capacity_exceeded() {
    let item = AccessItemBuilder::new(EventId::new(), "Dinner")
        .capacity(1)
        .registered(1)
        .waitlist(None)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));

    let error = reservation(&store)
        .reserve(item.id, RegistrationId::new(), 1, false)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::AccessCapacityExceeded);
    assert_eq!(store.item(item.id).unwrap().waitlist_count, 0);
}

#[tokio::test]
async fn multi_quantity_needs_full_room() {
    let item = AccessItemBuilder::new(EventId::new(), "Shuttle")
        .capacity(5)
        .registered(3)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);

    assert!(service.reserve(item.id, RegistrationId::new(), 3, false).await.is_err());
    assert!(service.reserve(item.id, RegistrationId::new(), 2, false).await.is_ok());
    assert_eq!(store.item(item.id).unwrap().registered_count, 5);
}

#[tokio::test]
async fn unknown_item_and_zero_quantity() {
    let store = Arc::new(InMemoryAccessStore::new());
    let service = reservation(&store);
    let missing = AccessId::new();

    assert_eq!(
        service.reserve(missing, RegistrationId::new(), 1, false).await.unwrap_err(),
        AccessError::AccessNotFound(missing)
    );
    assert_eq!(
        service.reserve(missing, RegistrationId::new(), 0, false).await.unwrap_err().code(),
        ErrorCode::BadRequest
    );
}

#[tokio::test]
async fn release_never_goes_below_zero() {
    let item = AccessItemBuilder::new(EventId::new(), "Tour")
        .capacity(4)
        .registered(2)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);
    let guest = RegistrationId::new();

    assert!(!service.release(item.id, guest, 3, false).await.unwrap());
    assert_eq!(store.item(item.id).unwrap().registered_count, 2);

    assert!(service.release(item.id, guest, 2, false).await.unwrap());
    assert!(!service.release(item.id, guest, 1, false).await.unwrap());
    assert_eq!(store.item(item.id).unwrap().registered_count, 0);
}

#[tokio::test]
async fn waitlisted_release_needs_a_queued_entry() {
    let item = AccessItemBuilder::new(EventId::new(), "Tour")
        .capacity(1)
        .registered(1)
        .waitlist(None)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);
    let (queued, stranger) = (RegistrationId::new(), RegistrationId::new());

    service.reserve(item.id, queued, 2, true).await.unwrap();

    assert!(!service.release(item.id, stranger, 1, true).await.unwrap());
    assert!(!service.release(item.id, queued, 3, true).await.unwrap());
    assert_eq!(store.item(item.id).unwrap().waitlist_count, 2);

    // Partial release keeps the entry; the rest empties it.
    assert!(service.release(item.id, queued, 1, true).await.unwrap());
    assert_eq!(store.waiting(item.id), vec![queued]);
    assert!(service.release(item.id, queued, 1, true).await.unwrap());
    assert!(store.waiting(item.id).is_empty());
    assert!(!service.release(item.id, queued, 1, true).await.unwrap());
    assert_eq!(store.item(item.id).unwrap().waitlist_count, 0);
}

#[tokio::test]
async fn promotion_moves_earliest_entry_when_room_frees() {
    let item = AccessItemBuilder::new(EventId::new(), "Masterclass")
        .capacity(2)
        .registered(2)
        .waitlist(None)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);
    let (first, second) = (RegistrationId::new(), RegistrationId::new());
    service.reserve(item.id, first, 1, true).await.unwrap();
    service.reserve(item.id, second, 2, true).await.unwrap();

    // Full: nobody moves.
    assert_eq!(service.promote_from_waitlist(item.id).await.unwrap(), None);

    let guest = RegistrationId::new();
    assert!(service.release(item.id, guest, 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, first);
    assert_eq!(promoted.quantity, 1);

    let snapshot = store.item(item.id).unwrap();
    assert_eq!(snapshot.registered_count, 2);
    assert_eq!(snapshot.waitlist_count, 2);

    // Second entry wants 2 seats; only frees after two releases.
    assert!(service.release(item.id, guest, 1, false).await.unwrap());
    assert_eq!(service.promote_from_waitlist(item.id).await.unwrap(), None);
    assert!(service.release(item.id, guest, 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, second);
    assert_eq!(promoted.quantity, 2);
    assert!(promoted.ticket > 0);
    assert!(store.waiting(item.id).is_empty());
}

#[tokio::test]
async fn joining_after_a_promotion_queues_behind_earlier_waiters() {
    let item = AccessItemBuilder::new(EventId::new(), "Cooking class")
        .capacity(1)
        .registered(1)
        .waitlist(None)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);
    let (x, y, z) = (RegistrationId::new(), RegistrationId::new(), RegistrationId::new());

    assert_eq!(
        service.reserve(item.id, x, 1, true).await.unwrap(),
        ReservationResult::waitlisted(1)
    );
    assert_eq!(
        service.reserve(item.id, y, 1, true).await.unwrap(),
        ReservationResult::waitlisted(2)
    );

    assert!(service.release(item.id, RegistrationId::new(), 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, x);

    // Display position repeats Y's; queue order must not.
    assert_eq!(
        service.reserve(item.id, z, 1, true).await.unwrap(),
        ReservationResult::waitlisted(2)
    );
    assert_eq!(store.waiting(item.id), vec![y, z]);
    assert_eq!(store.item(item.id).unwrap().waitlist_count, 2);

    assert!(service.release(item.id, x, 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, y);
    assert!(service.release(item.id, y, 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, z);
    assert_eq!(store.item(item.id).unwrap().waitlist_count, 0);
}

#[tokio::test]
async fn leaving_the_waitlist_hands_promotion_to_the_next_waiter() {
    let item = AccessItemBuilder::new(EventId::new(), "Wine tasting")
        .capacity(1)
        .registered(1)
        .waitlist(None)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);
    let (a, b) = (RegistrationId::new(), RegistrationId::new());
    service.reserve(item.id, a, 1, true).await.unwrap();
    service.reserve(item.id, b, 1, true).await.unwrap();

    assert!(service.release(item.id, a, 1, true).await.unwrap());
    assert_eq!(store.waiting(item.id), vec![b]);

    assert!(service.release(item.id, RegistrationId::new(), 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, b);

    let snapshot = store.item(item.id).unwrap();
    assert_eq!((snapshot.registered_count, snapshot.waitlist_count), (1, 0));
    assert_eq!(service.promote_from_waitlist(item.id).await.unwrap(), None);
}

#[tokio::test]
async fn rejoining_keeps_the_original_place() {
    let item = AccessItemBuilder::new(EventId::new(), "Boat trip")
        .capacity(2)
        .registered(2)
        .waitlist(None)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);
    let (early, late) = (RegistrationId::new(), RegistrationId::new());

    service.reserve(item.id, early, 1, true).await.unwrap();
    service.reserve(item.id, late, 1, true).await.unwrap();
    service.reserve(item.id, early, 1, true).await.unwrap();
    assert_eq!(store.waiting(item.id), vec![early, late]);

    assert!(service.release(item.id, late, 1, false).await.unwrap());
    assert!(service.release(item.id, late, 1, false).await.unwrap());
    let promoted = service.promote_from_waitlist(item.id).await.unwrap().unwrap();
    assert_eq!(promoted.registration_id, early);
    assert_eq!(promoted.quantity, 2);
}

#[tokio::test]
async fn empty_waitlist_promotes_nobody() {
    let item = AccessItemBuilder::new(EventId::new(), "Lab").capacity(3).build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    assert_eq!(
        reservation(&store).promote_from_waitlist(item.id).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn store_failure_is_transient() {
    let item = AccessItemBuilder::new(EventId::new(), "Lab").capacity(3).build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    store.fail_with(Some(StoreError::Database("connection reset".to_string())));

    let error = reservation(&store)
        .reserve(item.id, RegistrationId::new(), 1, false)
        .await
        .unwrap_err();
    assert!(error.is_transient());
    assert_eq!(error.code(), ErrorCode::StoreUnavailable);
}

#[tokio::test]
async fn slow_store_times_out_without_claiming_capacity() {
    let item = AccessItemBuilder::new(EventId::new(), "Lab").capacity(3).build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    store.set_latency(Some(Duration::from_secs(5)));

    let service = CapacityReservation::with_timeout(store.clone(), Duration::from_millis(50));
    let error = service.reserve(item.id, RegistrationId::new(), 1, false).await.unwrap_err();
    assert_eq!(error, AccessError::Store(StoreError::Timeout));
    assert_eq!(store.item(item.id).unwrap().registered_count, 0);
}

/// 100 concurrent single-seat reservations against 10 seats.
///
/// Verifies that:
/// - Exactly 10 reservations are confirmed
/// - Every other attempt fails with `ACCESS_CAPACITY_EXCEEDED`
/// - The counter never exceeds capacity
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reservations_never_oversell() {
    let item = AccessItemBuilder::new(EventId::new(), "Last seats")
        .capacity(10)
        .build();
    let store = Arc::new(InMemoryAccessStore::with_items([item.clone()]));
    let service = reservation(&store);

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let service = service.clone();
            let id = item.id;
            tokio::spawn(async move { service.reserve(id, RegistrationId::new(), 1, false).await })
        })
        .collect();

    let mut confirmed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                assert_eq!(result.status, ReservationStatus::Confirmed);
                confirmed += 1;
            }
            Err(error) => {
                assert_eq!(error.code(), ErrorCode::AccessCapacityExceeded);
                rejected += 1;
            }
        }
    }

    assert_eq!(confirmed, 10);
    assert_eq!(rejected, 90);
    assert_eq!(store.item(item.id).unwrap().registered_count, 10);
}
