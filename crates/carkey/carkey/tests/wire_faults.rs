//! Faults injected on the wire between a card and its terminals: corruption,
//! replay and delay

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use carkey::constants::{cla, ins};
use carkey::prelude::*;
use carkey::sim::Direction;
use carkey_apdu_core::TransportError;
use common::World;
use proptest::prelude::*;

type HookResult = std::result::Result<(), TransportError>;

/// Hook flipping `mask` into byte `offset` of the `event`-th message
fn corrupt(event: usize, offset: usize, mask: u8) -> impl FnMut(Direction, &mut Vec<u8>) -> HookResult + Send + 'static {
    let mut seen = 0;
    move |_, bytes| {
        if seen == event {
            let index = offset % bytes.len();
            bytes[index] ^= mask;
        }
        seen += 1;
        Ok(())
    }
}

/// Hook recording the first `instruction` command and, once `replaying` is set,
/// sending that recording in place of every later one
fn replayer(instruction: u8, replaying: Arc<AtomicBool>) -> impl FnMut(Direction, &mut Vec<u8>) -> HookResult + Send + 'static {
    let mut recorded: Option<Vec<u8>> = None;
    move |direction, bytes| {
        if direction == Direction::Command && bytes[0] != cla::ERROR && bytes[1] == instruction {
            match &recorded {
                Some(old) if replaying.load(Ordering::SeqCst) => bytes.clone_from(old),
                Some(_) => {}
                None => recorded = Some(bytes.clone()),
            }
        }
        Ok(())
    }
}

/// Hook flipping the low bits of one byte of the card's usage confirmation;
/// `at` picks the byte from the response length
fn corrupt_confirmation(at: fn(usize) -> usize) -> impl FnMut(Direction, &mut Vec<u8>) -> HookResult + Send + 'static {
    let mut updating = false;
    move |direction, bytes| {
        match direction {
            Direction::Command => updating = bytes[0] == cla::PROC && bytes[1] == ins::USAGE_UPDATE,
            Direction::Response if updating => {
                let index = at(bytes.len());
                bytes[index] ^= 0x03;
            }
            Direction::Response => {}
        }
        Ok(())
    }
}

/// A clean vehicle over `card` authenticates it
fn recovers(card: &LocalCard) -> bool {
    let rented = common::rented();
    let mut vehicle = Vehicle::new(rented.vehicle_credentials.clone(), rented.root.clone(), &rented.config);
    vehicle.insert(card.clone());
    vehicle.authenticate_card().is_ok() && vehicle.update_usage().is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_corrupted_authentication(event in 0usize..6, offset in any::<usize>(), mask in 1u8..=255) {
        let rented = common::rented();
        let card_id = rented.card.id().unwrap();
        let vehicle_id = rented.vehicle_credentials.id();
        let (card, mut vehicle) = rented.vehicle_over(|card| Interceptor::new(card, corrupt(event, offset, mask)));

        match vehicle.authenticate_card() {
            Ok(id) => {
                prop_assert_eq!(id, card_id);
                prop_assert!(vehicle.session().is_authenticated());
            }
            Err(_) => prop_assert!(!vehicle.session().is_authenticated()),
        }
        {
            let card = card.card().lock();
            let session = card.vehicle_session();
            if session.is_authenticated() {
                prop_assert_eq!(session.peer_id(), Some(vehicle_id));
            }
            prop_assert_eq!(card.state(), CardState::Assigned);
        }
        prop_assert!(recovers(&card));
    }

    #[test]
    fn test_corrupted_usage_update(response in any::<bool>(), offset in any::<usize>(), mask in 1u8..=255) {
        let rented = common::rented();
        let (card, mut vehicle) = rented.vehicle_over(|card| {
            let mut updating = false;
            Interceptor::new(card, move |direction, bytes| {
                if direction == Direction::Command {
                    updating = bytes[1] == ins::USAGE_UPDATE;
                }
                if updating && (direction == Direction::Response) == response {
                    let index = offset % bytes.len();
                    bytes[index] ^= mask;
                }
                Ok(())
            })
        });
        vehicle.authenticate_card().unwrap();

        let result = vehicle.update_usage();
        let card = card.card().lock();
        match result {
            Ok(usage) => {
                prop_assert_eq!(usage, 1);
                prop_assert_eq!(card.usage(), 1);
            }
            Err(_) => {
                prop_assert_eq!(vehicle.usage(), 0);
                prop_assert!(!vehicle.session().is_authenticated());
                prop_assert!(card.usage() <= 1);
            }
        }
        prop_assert!(vehicle.usage() <= card.usage());
    }

    #[test]
    fn test_delayed_messages(delays in prop::collection::vec(0u64..4, 12)) {
        let rented = common::rented();
        let (card, mut vehicle) = rented.vehicle_over(|card| {
            let mut delays = delays.into_iter().cycle();
            Interceptor::new(card, move |_, _| {
                thread::sleep(Duration::from_millis(delays.next().unwrap_or_default()));
                Ok(())
            })
        });

        vehicle.authenticate_card().unwrap();
        prop_assert_eq!(vehicle.update_usage().unwrap(), 1);
        prop_assert_eq!(vehicle.update_usage().unwrap(), 2);
        prop_assert_eq!(card.card().lock().usage(), 2);
    }
}

#[test]
fn test_replayed_challenge_is_rejected() {
    let replaying = Arc::new(AtomicBool::new(false));
    let rented = common::rented();
    let (card, mut vehicle) =
        rented.vehicle_over(|card| Interceptor::new(card, replayer(ins::INSERT_M2, Arc::clone(&replaying))));

    vehicle.authenticate_card().unwrap();
    replaying.store(true, Ordering::SeqCst);
    assert!(matches!(
        vehicle.authenticate_card(),
        Err(Error::AuthenticationFailed(AuthFailure::Rejected(status))) if status == carkey::status::BAD_NONCE
    ));
    assert!(!vehicle.session().is_authenticated());
    assert!(!card.card().lock().vehicle_session().is_authenticated());
}

#[test]
fn test_replayed_usage_update_is_tamper() {
    let rented = common::rented();
    let (card, mut vehicle) = rented.vehicle_over(|card| {
        Interceptor::new(card, replayer(ins::USAGE_UPDATE, Arc::new(AtomicBool::new(true))))
    });

    vehicle.authenticate_card().unwrap();
    assert_eq!(vehicle.update_usage().unwrap(), 1);
    assert!(vehicle.update_usage().unwrap_err().is_tamper());
    let card = card.card().lock();
    assert!(card.is_manipulated());
    assert_eq!(card.usage(), 1);
}

#[test]
fn test_replayed_reception_challenge_is_rejected() {
    let world = World::new();
    let replaying = Arc::new(AtomicBool::new(false));
    let mut reception = world.reception_over(replayer(ins::AUTH_RECEPTION_M2, Arc::clone(&replaying)));

    reception.authenticate_card().unwrap();
    replaying.store(true, Ordering::SeqCst);
    assert!(matches!(
        reception.authenticate_card(),
        Err(Error::AuthenticationFailed(AuthFailure::Rejected(status))) if status == carkey::status::BAD_NONCE
    ));
    assert!(!reception.session().is_authenticated());
    assert!(!world.card.card().lock().terminal_session().is_authenticated());
}

#[test]
fn test_replayed_grant_is_rejected() {
    let world = World::new();
    let replaying = Arc::new(AtomicBool::new(false));
    let mut reception = world.reception_over(replayer(ins::CAR_ASSIGNMENT_M2, Arc::clone(&replaying)));

    reception.authenticate_card().unwrap();
    assert_eq!(reception.assign_vehicle().unwrap(), world.vehicle_id());
    reception.authenticate_card().unwrap();
    assert_eq!(reception.return_vehicle().unwrap(), 0);

    replaying.store(true, Ordering::SeqCst);
    reception.authenticate_card().unwrap();
    assert!(matches!(
        reception.assign_vehicle(),
        Err(Error::ProcessFailed(ProcessFailure::Rejected(status))) if status == carkey::status::BAD_SEQUENCE
    ));
    assert_eq!(world.card_state(), CardState::Unassigned);
    assert!(world.card.card().lock().assigned_vehicle().is_none());
    // The card never stored the grant, so the vehicle is free again
    let authority = world.service.authority();
    assert_eq!(authority.rental(world.card_id), None);
    assert!(!authority.is_unconfirmed(world.card_id));
}

#[test]
fn test_replayed_return_challenge_is_rejected() {
    let world = World::new();
    let replaying = Arc::new(AtomicBool::new(false));
    let mut reception = world.reception_over(replayer(ins::CAR_RETURN_M2, Arc::clone(&replaying)));

    reception.authenticate_card().unwrap();
    reception.assign_vehicle().unwrap();
    reception.authenticate_card().unwrap();
    assert_eq!(reception.return_vehicle().unwrap(), 0);

    replaying.store(true, Ordering::SeqCst);
    reception.authenticate_card().unwrap();
    reception.assign_vehicle().unwrap();
    reception.authenticate_card().unwrap();
    assert!(matches!(
        reception.return_vehicle(),
        Err(Error::ProcessFailed(ProcessFailure::Rejected(status))) if status == carkey::status::BAD_SEQUENCE
    ));
    assert_eq!(world.card_state(), CardState::Assigned);
    assert!(!world.card.card().lock().terminal_session().is_authenticated());
    assert_eq!(world.service.authority().rental(world.card_id), Some(world.vehicle_id()));
}

#[test]
fn test_wrong_counter_confirmation_ends_card_session() {
    let rented = common::rented();
    // Low byte of the confirmed counter, after the tag and three high bytes
    let (card, mut vehicle) = rented.vehicle_over(|card| Interceptor::new(card, corrupt_confirmation(|_| 4)));
    vehicle.authenticate_card().unwrap();

    let err = vehicle.update_usage().unwrap_err();
    assert!(matches!(
        err,
        Error::ProcessFailed(ProcessFailure::Tamper(Tamper::CounterMismatch { expected: 1, received: 2 }))
    ));
    assert_eq!(vehicle.usage(), 0);
    let card = card.card().lock();
    assert!(!card.vehicle_session().is_authenticated());
    assert_eq!(card.usage(), 1);
}

#[test]
fn test_forged_confirmation_signature_ends_card_session() {
    let rented = common::rented();
    // Last signature byte, ahead of the status word
    let (card, mut vehicle) =
        rented.vehicle_over(|card| Interceptor::new(card, corrupt_confirmation(|len| len - 3)));
    vehicle.authenticate_card().unwrap();

    assert!(matches!(
        vehicle.update_usage(),
        Err(Error::ProcessFailed(ProcessFailure::BadSignature))
    ));
    assert!(!vehicle.session().is_authenticated());
    assert!(!card.card().lock().vehicle_session().is_authenticated());
}

#[test]
fn test_dropped_response_fails_the_run() {
    let rented = common::rented();
    let (card, mut vehicle) = rented.vehicle_over(|card| {
        let mut seen = 0;
        Interceptor::new(card, move |direction, _| {
            if direction == Direction::Response {
                seen += 1;
                if seen == 2 {
                    return Err(TransportError::Transmission);
                }
            }
            Ok(())
        })
    });

    assert!(matches!(vehicle.authenticate_card(), Err(Error::TransportFailure(_))));
    assert!(recovers(&card));
}
