//! End-to-end runs of every protocol between in-process principals

mod common;

use std::time::Duration;

use carkey::authority;
use carkey::constants::{cla, ins};
use carkey::crypto::{RsaSigner, Signer};
use carkey::identity::PrincipalId;
use carkey::prelude::*;
use carkey::sim::Direction;
use common::World;

#[test]
fn test_full_rental() {
    let mut world = World::new();
    assert_eq!(world.card_state(), CardState::Unassigned);

    let vehicle = world.rent();
    assert_eq!(vehicle, world.vehicle_id());
    assert_eq!(world.card_state(), CardState::Assigned);
    assert_eq!(world.service.authority().rental(world.card_id), Some(vehicle));

    assert_eq!(world.drive(3), 3);
    assert_eq!(world.card_usage(), 3);

    assert_eq!(world.give_back(), 3);
    assert_eq!(world.card_state(), CardState::Unassigned);
    let authority = world.service.authority();
    assert_eq!(authority.rental(world.card_id), None);
    let (card, rental) = authority.rental_history()[0];
    assert_eq!(card, world.card_id);
    assert_eq!(rental.usage, Some(3));
}

#[test]
fn test_scenario_a_vehicle_authentication() {
    let mut world = World::new();
    world.rent();

    let card = world.vehicle.authenticate_card().unwrap();
    assert_eq!(card, world.card_id);
    assert!(world.vehicle.session().is_authenticated());

    let shared = world.card.card().lock();
    let session = shared.vehicle_session();
    assert!(session.is_authenticated());
    assert_eq!(session.peer_id(), Some(world.vehicle_id()));
}

#[test]
fn test_scenario_b_foreign_certificate() {
    let config = ProtocolConfig::default();
    let mut world = World::new();

    // A card issued by an authority the vehicle does not trust
    let mut rogue = Authority::new(config).unwrap();
    let terminal = rogue.enroll_terminal().unwrap();
    let rogue_root = rogue.public_key().clone();
    let rogue_service = AuthorityService::spawn(rogue).unwrap();
    let forged = LocalCard::new(Smartcard::new(&config));
    let mut issuer = ReceptionTerminal::new(terminal, rogue_root, rogue_service.handle(), &config);
    issuer.insert(forged.clone());
    issuer.issue_card().unwrap();

    world.vehicle.insert(forged.clone());
    let err = world.vehicle.authenticate_card().unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(AuthFailure::InvalidCertificate)));
    assert!(!world.vehicle.session().is_authenticated());
    assert!(!forged.card().lock().vehicle_session().is_authenticated());
}

#[test]
fn test_scenario_c_vehicle_side_counter_injection() {
    let rented = common::rented();
    let (card, mut vehicle) = rented.vehicle_over(|card| {
        Interceptor::new(card, |direction, bytes| {
            // The counter sits right after the 4-byte header and the length byte
            if direction == Direction::Command && bytes[1] == ins::USAGE_UPDATE {
                let counter = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
                bytes[5..9].copy_from_slice(&(counter + 1).to_be_bytes());
            }
            Ok(())
        })
    });

    vehicle.authenticate_card().unwrap();
    let err = vehicle.update_usage().unwrap_err();
    assert!(err.is_tamper());
    assert!(matches!(err, Error::ProcessFailed(ProcessFailure::Tamper(Tamper::CardRejectedCounter))));
    assert!(!vehicle.session().is_authenticated());

    let card = card.card().lock();
    assert!(card.is_manipulated());
    assert_eq!(card.usage(), 0);
}

#[test]
fn test_scenario_c_card_side_counter_injection() {
    let rented = common::rented();
    let (card, mut vehicle) = rented.vehicle_over(|card| {
        let mut updating = false;
        Interceptor::new(card, move |direction, bytes| {
            match direction {
                Direction::Command => updating = bytes[1] == ins::USAGE_UPDATE,
                // Confirmation: 0x01 || counter || ...
                Direction::Response if updating => {
                    let counter = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
                    bytes[1..5].copy_from_slice(&(counter + 1).to_be_bytes());
                }
                Direction::Response => {}
            }
            Ok(())
        })
    });

    vehicle.authenticate_card().unwrap();
    let err = vehicle.update_usage().unwrap_err();
    assert!(matches!(
        err,
        Error::ProcessFailed(ProcessFailure::Tamper(Tamper::CounterMismatch { expected: 1, received: 2 }))
    ));
    assert_eq!(vehicle.usage(), 0);
    assert_eq!(card.card().lock().usage(), 1);
}

#[test]
fn test_manipulated_card_cannot_be_returned() {
    let mut world = World::new();
    world.rent();

    let transport = Interceptor::new(world.card.clone(), |direction, bytes| {
        if direction == Direction::Command && bytes[1] == ins::USAGE_UPDATE {
            bytes[8] = bytes[8].wrapping_add(5);
        }
        Ok(())
    });
    let mut vehicle = Vehicle::new(world.vehicle_credentials.clone(), world.root.clone(), &world.config);
    vehicle.insert(transport);
    vehicle.authenticate_card().unwrap();
    assert!(vehicle.update_usage().unwrap_err().is_tamper());
    assert!(world.card_manipulated());

    world.reception.authenticate_card().unwrap();
    let err = world.reception.return_vehicle().unwrap_err();
    assert!(matches!(err, Error::ProcessFailed(ProcessFailure::Tamper(Tamper::ManipulationFlag))));
    assert_eq!(world.card_state(), CardState::Assigned);
    assert_eq!(world.service.authority().rental(world.card_id), Some(world.vehicle_id()));
}

#[test]
fn test_scenario_d_wrong_acknowledgment() {
    let world = World::new();
    let terminal = world.service.authority().enroll_terminal().unwrap();
    let handle = common::misleading_authority(
        world.service.handle(),
        format!("{} has been removed from card.", world.card_id),
    );
    let mut reception = ReceptionTerminal::new(terminal, world.root.clone(), handle, &world.config);
    reception.insert(world.card.clone());

    let err = reception.block_card(world.card_id).unwrap_err();
    assert!(matches!(
        err,
        Error::ProcessFailed(ProcessFailure::UnexpectedAcknowledgment { ref expected, .. })
            if *expected == authority::removed_from_cards(world.card_id)
    ));

    assert_eq!(reception.authenticate_card().unwrap(), world.card_id);
    assert_eq!(world.card_state(), CardState::Unassigned);
}

#[test]
fn test_blocked_card_reaches_end_of_life() {
    let mut world = World::new();
    world.reception.block_card(world.card_id).unwrap();

    let err = world.reception.authenticate_card().unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(AuthFailure::CardBlocked(id)) if id == world.card_id));
    assert_eq!(world.card_state(), CardState::EndOfLife);

    // Unblocking at the authority does not revive the card
    world.reception.unblock_card(world.card_id).unwrap();
    assert!(matches!(
        world.vehicle.authenticate_card(),
        Err(Error::AuthenticationFailed(AuthFailure::Rejected(status))) if status == carkey::status::CARD_BLOCKED
    ));
}

#[test]
fn test_blank_card_is_not_initialized() {
    let world = World::new();
    let config = world.config;
    let mut vehicle = Vehicle::new(world.vehicle_credentials.clone(), world.root.clone(), &config);
    vehicle.insert(LocalCard::new(Smartcard::new(&config)));
    assert!(matches!(vehicle.authenticate_card(), Err(Error::CardNotInitialized)));
}

#[test]
fn test_no_vehicle_available() {
    let mut world = World::new();
    world.rent();

    let second = LocalCard::new(Smartcard::new(&world.config));
    world.reception.insert(second.clone());
    world.reception.issue_card().unwrap();
    world.reception.authenticate_card().unwrap();
    assert!(matches!(
        world.reception.assign_vehicle(),
        Err(Error::ProcessFailed(ProcessFailure::NoVehicleAvailable))
    ));
    assert_eq!(second.card().lock().state(), CardState::Unassigned);
    assert!(!world.reception.session().is_authenticated());
}

#[test]
fn test_unconfirmed_assignment_keeps_the_vehicle() {
    let mut world = World::new();
    let mut granting = false;
    let mut reception = world.reception_over(move |direction, bytes| {
        match direction {
            Direction::Command => granting = bytes[..2] == [cla::CONT, ins::CAR_ASSIGNMENT_M2],
            // Last signature byte of the card's success proof
            Direction::Response if granting => {
                let last = bytes.len() - 3;
                bytes[last] ^= 0x01;
            }
            Direction::Response => {}
        }
        Ok(())
    });

    reception.authenticate_card().unwrap();
    assert!(matches!(
        reception.assign_vehicle(),
        Err(Error::ProcessFailed(ProcessFailure::BadSignature))
    ));
    {
        let card = world.card.card().lock();
        assert_eq!(card.state(), CardState::Assigned);
        assert_eq!(card.assigned_vehicle().map(|vehicle| vehicle.id), Some(world.vehicle_id()));
        assert!(!card.terminal_session().is_authenticated());
    }
    {
        let authority = world.service.authority();
        assert_eq!(authority.rental(world.card_id), Some(world.vehicle_id()));
        assert!(authority.is_unconfirmed(world.card_id));
    }

    // The held vehicle is not handed to anyone else
    let second = LocalCard::new(Smartcard::new(&world.config));
    world.reception.insert(second);
    world.reception.issue_card().unwrap();
    world.reception.authenticate_card().unwrap();
    assert!(matches!(
        world.reception.assign_vehicle(),
        Err(Error::ProcessFailed(ProcessFailure::NoVehicleAvailable))
    ));

    // Returning the card settles the rental
    world.reception.insert(world.card.clone());
    assert_eq!(world.give_back(), 0);
    let authority = world.service.authority();
    assert_eq!(authority.rental(world.card_id), None);
    assert!(!authority.is_unconfirmed(world.card_id));
}

#[test]
fn test_processing_requires_authentication() {
    let mut world = World::new();
    assert!(matches!(
        world.reception.assign_vehicle(),
        Err(Error::ProcessFailed(ProcessFailure::NotAuthenticated))
    ));
    assert!(matches!(
        world.vehicle.update_usage(),
        Err(Error::ProcessFailed(ProcessFailure::NotAuthenticated))
    ));
}

#[test]
fn test_silent_authority_times_out() {
    let mut world = World::new();
    let terminal = world.service.authority().enroll_terminal().unwrap();
    let (handle, _mailbox) = common::silent_authority(Duration::from_millis(50));
    let mut reception = ReceptionTerminal::new(terminal, world.root.clone(), handle, &world.config);
    reception.insert(world.card.clone());

    assert!(matches!(reception.authenticate_card(), Err(Error::MessageTimeout(_))));
    assert!(!world.card.card().lock().terminal_session().is_authenticated());

    // The aborted card is ready for the next run
    world.reception.authenticate_card().unwrap();
}

#[test]
fn test_vehicle_rejects_card_assigned_elsewhere() {
    let mut world = World::new();
    let other = world.service.authority().enroll_vehicle().unwrap();
    let assigned = world.rent();
    let stranger = if assigned == other.id() {
        world.vehicle_credentials.clone()
    } else {
        other
    };

    let mut stranger = Vehicle::new(stranger, world.root.clone(), &world.config);
    stranger.insert(world.card.clone());
    assert!(matches!(
        stranger.authenticate_card(),
        Err(Error::AuthenticationFailed(AuthFailure::Rejected(status))) if status == carkey::status::BAD_CERTIFICATE
    ));
}

#[test]
fn test_successive_runs() {
    let mut world = World::new();
    for run in 0..32u32 {
        world.rent();
        let updates = run % 4 + 1;
        assert_eq!(world.drive(updates), updates);
        assert_eq!(world.give_back(), updates);
    }
    assert_eq!(world.service.authority().rental_history().len(), 32);
}

#[test]
fn test_threaded_card() {
    let mut world = World::new();
    world.rent();

    let card = world.card.card().lock().clone();
    let actor = CardActor::spawn(card).unwrap();
    let mut vehicle = Vehicle::new(world.vehicle_credentials.clone(), world.root.clone(), &world.config);
    vehicle.insert(actor.transport(Some(Duration::from_secs(10))));

    let driver = std::thread::spawn(move || {
        vehicle.authenticate_card().unwrap();
        (0..5).map(|_| vehicle.update_usage().unwrap()).last()
    });
    assert_eq!(driver.join().unwrap(), Some(5));

    let card = actor.stop().unwrap();
    assert_eq!(card.usage(), 5);
    assert_eq!(card.id(), Some(world.card_id));
}

#[test]
fn test_certificates_travel_as_bytes() {
    let signer = RsaSigner::generate(512).unwrap();
    let subject = RsaSigner::generate(512).unwrap();
    let id = PrincipalId::new([9, 8, 7, 6, 5]);
    let bytes = carkey::identity::issue_certificate(subject.public_key(), id, &signer).unwrap();
    assert!(carkey::identity::verify_certificate(&bytes, signer.public_key()));
    assert!(!carkey::identity::verify_certificate(&bytes, subject.public_key()));
}
