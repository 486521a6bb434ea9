//! Scenario commands

use carkey::constants::ins;
use carkey::prelude::*;
use carkey::sim::Direction;
use carkey_apdu_core::CardTransport;
use colored::Colorize;
use tracing::{info, warn};

use crate::office::Office;

/// Rent, drive and return `runs` times
pub(crate) fn full_run(config: ProtocolConfig, updates: u32, runs: u32, threaded: bool) -> anyhow::Result<()> {
    if threaded {
        let actor = CardActor::spawn(Smartcard::new(&config))?;
        let office = Office::open(&config, actor.transport(config.exchange_timeout))?;
        rentals(office, updates, runs)?;
        if let Some(card) = actor.stop() {
            println!("Card state after the last run: {:?}", card.state());
        }
        Ok(())
    } else {
        let office = Office::open(&config, LocalCard::new(Smartcard::new(&config)))?;
        rentals(office, updates, runs)
    }
}

fn rentals<T: CardTransport + Clone>(mut office: Office<T>, updates: u32, runs: u32) -> anyhow::Result<()> {
    println!("Card {} issued", office.card.to_string().bold());
    for run in 1..=runs {
        let vehicle = office.rent()?;
        println!("[{run}] vehicle {vehicle} assigned");

        let usage = office.drive(updates)?;
        println!("[{run}] usage counter at {usage}");

        let returned = office.give_back()?;
        println!("[{run}] vehicle returned at usage {}", returned.to_string().green());
    }

    let authority = office.service.authority();
    info!(rentals = authority.rental_history().len(), "Done");
    println!("{}", "All runs completed".green().bold());
    Ok(())
}

/// Block the card at the authority and let the terminal retire it
pub(crate) fn block(config: ProtocolConfig) -> anyhow::Result<()> {
    let transport = LocalCard::new(Smartcard::new(&config));
    let mut office = Office::open(&config, transport.clone())?;

    office.reception.block_card(office.card)?;
    println!("Card {} blocked at the authority", office.card);

    match office.reception.authenticate_card() {
        Err(Error::AuthenticationFailed(AuthFailure::CardBlocked(id))) => {
            println!("Terminal refused card {id} and retired it");
        }
        Err(e) => return Err(e.into()),
        Ok(_) => anyhow::bail!("blocked card was accepted"),
    }

    let state = transport.card().lock().state();
    println!("Card state: {}", format!("{state:?}").red().bold());
    if let Err(e) = office.vehicle.authenticate_card() {
        println!("Vehicle refuses the card: {e}");
    }
    Ok(())
}

/// Bump the counter of a usage update on the wire and show both sides notice
pub(crate) fn tamper(config: ProtocolConfig) -> anyhow::Result<()> {
    let transport = LocalCard::new(Smartcard::new(&config));
    let mut office = Office::open(&config, transport.clone())?;
    office.rent()?;

    let wire = Interceptor::new(transport.clone(), |direction, bytes| {
        if direction == Direction::Command && bytes.get(1) == Some(&ins::USAGE_UPDATE) && bytes.len() > 8 {
            bytes[8] = bytes[8].wrapping_add(1);
            warn!("Counter bumped on the wire");
        }
        Ok(())
    });
    let mut vehicle = Vehicle::new(office.vehicle_credentials.clone(), office.root.clone(), &config);
    vehicle.insert(wire);
    vehicle.authenticate_card()?;
    match vehicle.update_usage() {
        Err(e) if e.is_tamper() => println!("{} {e}", "Vehicle:".red().bold()),
        Err(e) => return Err(e.into()),
        Ok(_) => anyhow::bail!("tampered update was accepted"),
    }
    println!("Card manipulation flag: {}", transport.card().lock().is_manipulated());

    match office.give_back() {
        Err(e) if e.is_tamper() => println!("{} {e}", "Reception:".red().bold()),
        Err(e) => return Err(e.into()),
        Ok(_) => anyhow::bail!("manipulated card was taken back"),
    }
    Ok(())
}
