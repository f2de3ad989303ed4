// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for the bus core.

use thiserror::Error;

/// Errors visible to callers of [`crate::Bus`].
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not open the underlying fieldbus device.
    #[error("failed to open fieldbus device: {0}")]
    BusOpen(String),

    /// A frame send exceeded its deadline.
    #[error("send of {frame} exceeded its {deadline_ms}ms deadline")]
    SendTimeout { frame: &'static str, deadline_ms: u64 },

    /// A send or driver-level failure occurred mid-enumeration. Any
    /// previously committed registry state is left untouched.
    #[error("enumeration aborted: {0}")]
    EnumerationAborted(String),

    /// `get_proxy` was asked for a capability incompatible with an existing
    /// proxy already registered for that device identity.
    #[error("device {did} already has a proxy of a different capability (requested {requested:?}, existing {existing:?})")]
    CapabilityMismatch {
        did: String,
        requested: crate::proxy::CapabilityKind,
        existing: crate::proxy::CapabilityKind,
    },
}
