//! Host-side driver for the Espressif ROM/stub bootloader protocol: SLIP
//! and SIP framing, per-chip register/eFuse layouts, and a [`Session`]
//! state machine that drives flash/RAM programming over any of three
//! transport bindings (serial, SDIO, SPI slave).
//!
//! `no_std` plus [`alloc`] by default; enable the `std` feature for
//! `std::error::Error` impls, [`miette`] diagnostics, and TOML-based stub
//! image loading.
//!
//! [`Session`]: crate::session::Session

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod clock;
pub mod command;
pub mod error;
pub mod image;
pub mod security;
pub mod session;
pub mod slip;
#[cfg(feature = "std")]
pub mod stub;
pub mod targets;
pub mod transport;
