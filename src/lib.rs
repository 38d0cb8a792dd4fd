//! # MCDU display/keyboard bridge
//!
//! This crate connects a WinWing-family MCDU (a 14×24 character display
//! with a backlit keyboard, two ambient-light sensors and a row of
//! annunciator LEDs) to a flight simulator's variable/command bus.
//!
//! Simulator updates are aggregated into a styled character page and pushed
//! to the device; key presses decoded from the device's input reports are
//! turned back into simulator commands and variable writes. A declarative
//! per-aircraft profile decouples the bridge from the many third-party
//! aircraft models that expose differently-named simulator variables for
//! the same cockpit elements.
//!
//! The two external collaborators are traits:
//!
//! * [`Transport`][device::Transport], the raw device endpoint (a
//!   `hidapi`-backed implementation is available with the default `hid`
//!   feature),
//! * [`SimulatorClient`][simulator::SimulatorClient], the simulator's web
//!   API (connect, monitor variables, execute commands).
//!
//! [`Session`][session::Session] is the composition root: it wires the
//! aggregator, the page buffer and the unit translator together, runs the
//! readiness state machine (wait for the simulator, wait for a known
//! aircraft, wait for the data a full redraw needs) and then pumps events
//! between the device and the simulator until cancelled.

pub mod aggregator;
pub mod codec;
pub mod config;
pub mod device;
#[cfg(feature = "hid")]
pub mod hid;
pub mod input;
pub mod page;
pub mod session;
pub mod simulator;
pub mod unit;

pub use crate::{
    aggregator::ReportAggregator,
    codec::Color,
    config::{
        AircraftLibrary,
        AircraftProfile,
    },
    device::{
        DeviceHandle,
        Transport,
    },
    input::InputDecoder,
    page::Page,
    session::{
        Session,
        SessionOptions,
        Status,
    },
    simulator::{
        SimulatorClient,
        SimulatorEvent,
        Value,
    },
    unit::UnitTranslator,
};

/// Errors returned by the bridge.
#[derive(Debug, thiserror::Error)]
#[error("mcdu bridge error")]
pub enum Error {
    Transport(#[from] device::TransportError),

    Simulator(#[from] simulator::SimulatorError),

    Profile(#[from] config::ProfileError),

    UnsupportedUnit(#[from] unit::UnsupportedUnit),
}
