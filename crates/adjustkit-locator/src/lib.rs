//! adjustkit-locator - protocol mediator for the adjusting kit
//!
//! This crate drives the calibration conversation with the radar locator
//! unit over the serial-to-Ethernet gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Mediator                           │
//! │  Idle/Session state machine, FIFO command queue,          │
//! │  one frame in flight, keepalive while idle                │
//! │                                                           │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────┐  │
//! │  │CommandEncoder│  │StateAccumulator│  │ Repository   │  │
//! │  │ (PLL math,   │  │ (decode +      │  │ (last known  │  │
//! │  │  frames out) │  │  completion)   │  │  device state)│ │
//! │  └──────────────┘  └────────────────┘  └──────────────┘  │
//! │                          │                                │
//! │                   ┌──────┴───────┐                        │
//! │                   │  LinkHandle  │                        │
//! │                   │ (TCP / mock) │                        │
//! │                   └──────────────┘                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The mediator never touches sockets: it consumes [`transport::LinkEvent`]s
//! and calls the [`transport::LinkHandle`] surface, nothing else.

pub mod mediator;
pub mod proto;
pub mod transport;

pub use mediator::{Mediator, MediatorHandle};
pub use proto::{CommandEncoder, Repository, StateAccumulator};
pub use transport::{LinkConfig, LinkEvent, LinkHandle, LocatorLink, TransportError};
