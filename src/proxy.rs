// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device proxy capability: the interface callers use to issue typed
//! commands to a discovered device. [`DimmerProxy`], the five-channel
//! dimmer, is the sole built-in capability and serves as the reference
//! implementation for any other capability a consumer adds.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Weak;
use std::time::Duration;

use crate::codec::{clamp_channel, Frame};
use crate::driver::BusTransport;
use crate::registry::Bus;

/// Selects which proxy implementation `Bus::get_proxy` should hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// The five-channel dimmer, the only capability this crate builds in.
    Dimmer,
}

/// An opaque token returned by [`ProxyCore::availability_observer`] and
/// accepted by [`ProxyCore::unregister`]. Unregistered handles leak their
/// closure until explicitly unregistered — see `spec.md` §9 "Observer
/// lifetime".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// State shared by every capability-specific proxy for one device identity:
/// its current TID, derived availability, and registered observers.
pub struct ProxyCore<T: BusTransport> {
    did: String,
    kind: CapabilityKind,
    bus: Weak<Bus<T>>,
    tid: Cell<Option<u16>>,
    next_handle: Cell<u64>,
    /// Keyed by handle, a `BTreeMap` so iteration in [`Self::set_tid`]
    /// visits observers in ascending-handle (registration) order, per
    /// `spec.md` §5's "in registration order" guarantee.
    observers: RefCell<BTreeMap<u64, Box<dyn Fn(bool)>>>,
}

impl<T: BusTransport> ProxyCore<T> {
    pub(crate) fn new(did: String, kind: CapabilityKind, bus: Weak<Bus<T>>) -> Self {
        ProxyCore {
            did,
            kind,
            bus,
            tid: Cell::new(None),
            next_handle: Cell::new(0),
            observers: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// `true` iff this proxy currently holds an assigned TID.
    pub fn is_available(&self) -> bool {
        self.tid.get().is_some()
    }

    pub fn tid(&self) -> Option<u16> {
        self.tid.get()
    }

    /// Update the TID, firing every registered observer exactly once, in
    /// registration order, if availability actually changed. Observer
    /// panics are caught and logged, never allowed to interrupt the
    /// notification or propagate to the caller driving enumeration.
    pub(crate) fn set_tid(&self, tid: Option<u16>) {
        let was_available = self.is_available();
        self.tid.set(tid);
        let is_available = self.is_available();

        if was_available != is_available {
            for (handle, observer) in self.observers.borrow().iter() {
                let did = &self.did;
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(is_available)))
                    .is_err()
                {
                    log::warn!(
                        "availability observer {handle} for device {did} panicked; ignoring"
                    );
                }
            }
        }
    }

    /// Register a callback to be invoked, synchronously and in registration
    /// order, on every future availability transition. Does not replay the
    /// current state — callers that need it should read [`Self::is_available`].
    pub fn availability_observer(&self, callback: Box<dyn Fn(bool)>) -> ObserverHandle {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.observers.borrow_mut().insert(handle, callback);
        ObserverHandle(handle)
    }

    pub fn unregister(&self, handle: ObserverHandle) {
        self.observers.borrow_mut().remove(&handle.0);
    }

    fn bus(&self) -> Option<std::rc::Rc<Bus<T>>> {
        self.bus.upgrade()
    }
}

/// The five-channel dimmer reference capability.
pub struct DimmerProxy<T: BusTransport> {
    core: ProxyCore<T>,
}

impl<T: BusTransport> DimmerProxy<T> {
    pub(crate) fn new(did: String, bus: Weak<Bus<T>>) -> Self {
        DimmerProxy { core: ProxyCore::new(did, CapabilityKind::Dimmer, bus) }
    }

    pub fn core(&self) -> &ProxyCore<T> {
        &self.core
    }

    /// Set the five channel intensities, each clamped to `[0.0, 1.0]` then
    /// mapped to a 12-bit integer. A silent no-op if this proxy has no
    /// assigned TID — callers are expected to gate on availability, not
    /// treat this as an error.
    pub async fn set(&self, c0: f32, c1: f32, c2: f32, c3: f32, c4: f32) {
        let Some(tid) = self.core.tid() else { return };
        let Some(bus) = self.core.bus() else { return };

        let channels = [
            clamp_channel(c0),
            clamp_channel(c1),
            clamp_channel(c2),
            clamp_channel(c3),
            clamp_channel(c4),
        ];

        let frame = Frame::DimmerSet { tid, channels }.encode();
        if let Err(err) = bus.transport().send(frame, Duration::from_millis(200)).await {
            log::warn!("dimmer command to {} dropped: {err}", self.core.did());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::driver::sim::SimulatedBus;

    #[test]
    fn fresh_proxy_is_unavailable() {
        let bus = Bus::from_transport(SimulatedBus::empty());
        let proxy = bus.get_proxy("did", CapabilityKind::Dimmer).unwrap();
        assert!(!proxy.core().is_available());
        assert_eq!(proxy.core().tid(), None);
    }

    #[test]
    fn set_tid_fires_observer_exactly_once_per_transition() {
        let bus = Bus::from_transport(SimulatedBus::empty());
        let proxy = bus.get_proxy("did", CapabilityKind::Dimmer).unwrap();

        let calls = Rc::new(Cell::new(0));
        let calls_in_closure = Rc::clone(&calls);
        proxy.core().availability_observer(Box::new(move |_| {
            calls_in_closure.set(calls_in_closure.get() + 1);
        }));

        proxy.core().set_tid(Some(3));
        proxy.core().set_tid(Some(3));
        proxy.core().set_tid(Some(7));
        proxy.core().set_tid(None);

        // unavailable->available, available->available (no-op, same
        // boolean), available->available (no-op, new tid), available->
        // unavailable: two real transitions out of four calls.
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unregistered_observer_is_not_called() {
        let bus = Bus::from_transport(SimulatedBus::empty());
        let proxy = bus.get_proxy("did", CapabilityKind::Dimmer).unwrap();

        let called = Rc::new(Cell::new(false));
        let called_in_closure = Rc::clone(&called);
        let handle = proxy
            .core()
            .availability_observer(Box::new(move |_| called_in_closure.set(true)));
        proxy.core().unregister(handle);

        proxy.core().set_tid(Some(1));
        assert!(!called.get());
    }

    #[tokio::test]
    async fn set_without_tid_is_a_silent_no_op() {
        let transport = SimulatedBus::empty();
        let bus = Bus::from_transport(transport);
        let proxy = bus.get_proxy("did", CapabilityKind::Dimmer).unwrap();

        proxy.set(1.0, 0.0, 0.0, 0.0, 0.0).await;

        assert!(bus.transport().sent_frames().is_empty());
    }

    #[tokio::test]
    async fn set_with_tid_sends_exactly_one_dimmer_set_frame() {
        let transport = SimulatedBus::empty();
        let bus = Bus::from_transport(transport);
        let proxy = bus.get_proxy("did", CapabilityKind::Dimmer).unwrap();
        proxy.core().set_tid(Some(9));

        proxy.set(1.0, 0.0, 0.0, 0.0, 0.5).await;

        let sent = bus.transport().sent_frames();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Frame::DimmerSet { tid: 9, .. }));
    }
}
