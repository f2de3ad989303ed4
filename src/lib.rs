// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus enumeration and addressing engine for a two-wire lighting fieldbus,
//! plus its frame codec. This crate is the core of a larger bridge between
//! the fieldbus and a home-automation message broker; the broker client,
//! YAML configuration, and color/dimming-curve math are collaborators that
//! live outside this crate and talk to it only through [`BusHandle`],
//! [`Bus`], and the [`proxy`] types.
//!
//! A cold start looks like (here wired to an in-process
//! [`driver::sim::SimulatedBus`]; a hardware run wires `Bus::from_transport`
//! to a `socketcan` device instead, behind the `can` feature):
//!
//! ```
//! # async fn run() -> Result<(), fieldbus_core::error::BusError> {
//! use fieldbus_core::registry::Bus;
//! use fieldbus_core::driver::sim::SimulatedBus;
//! use fieldbus_core::proxy::CapabilityKind;
//!
//! let bus = Bus::from_transport(SimulatedBus::empty());
//! bus.enumerate().await?;
//!
//! let dimmer = bus.get_proxy("0022002a431458523530203800000000", CapabilityKind::Dimmer)?;
//! dimmer.set(1.0, 0.0, 0.0, 0.0, 0.5).await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod driver;
mod engine;
pub mod error;
pub mod ids;
pub mod proxy;
pub mod registry;

pub use error::BusError;
pub use registry::{Bus, Registry};

#[cfg(feature = "can")]
use driver::CanTransport;

/// The bus core wired to real hardware: a [`Bus`] over a `socketcan`
/// device, opened by name. Only available with the `can` feature; tests
/// and other in-process callers build a [`Bus`] directly over a
/// [`driver::sim::SimulatedBus`] via [`Bus::from_transport`].
#[cfg(feature = "can")]
pub type BusHandle = Bus<CanTransport>;

#[cfg(feature = "can")]
impl BusHandle {
    /// Open `device_name` as a SocketCAN interface and wrap it as a fresh,
    /// empty [`Bus`]. Call [`Bus::enumerate`] before issuing any commands.
    pub fn new(device_name: &str) -> Result<std::rc::Rc<Self>, BusError> {
        let transport = CanTransport::open(device_name)?;
        Ok(Bus::from_transport(transport))
    }
}
