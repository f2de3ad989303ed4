// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The address registry and proxy directory: the bidirectional `tid <->
//! hex(did)` mapping left behind by enumeration, and the per-device proxy
//! objects created on demand by [`Bus::get_proxy`]. This is also the crate's
//! top-level handle — `Bus` owns the transport, the registry, and the
//! directory, mirroring `original_source/bus.py`'s single `Bus` class.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::driver::BusTransport;
use crate::error::BusError;
use crate::proxy::{CapabilityKind, DimmerProxy};

/// The bidirectional map left behind by a completed enumeration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_tid: HashMap<u16, String>,
    by_did: HashMap<String, u16>,
}

impl Registry {
    fn commit(&mut self, out: HashMap<u16, String>) {
        self.by_did = out.iter().map(|(tid, did)| (did.clone(), *tid)).collect();
        self.by_tid = out;
    }

    /// The TID currently assigned to `did_hex`, if it was discovered by the
    /// most recent enumeration.
    pub fn tid_of(&self, did_hex: &str) -> Option<u16> {
        self.by_did.get(did_hex).copied()
    }

    /// The hex DID assigned to `tid`, if any.
    pub fn did_of(&self, tid: u16) -> Option<&str> {
        self.by_tid.get(&tid).map(String::as_str)
    }

    /// Number of devices known to the registry after the last enumeration.
    pub fn len(&self) -> usize {
        self.by_tid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tid.is_empty()
    }
}

/// One proxy, kept behind a capability-erased handle so the directory can
/// hold proxies of different capabilities in one map. Concretely always a
/// `Rc<DimmerProxy<T>>` today, since that is the crate's only built-in
/// capability; a consumer adding a new capability would extend this enum.
enum AnyProxy<T: BusTransport> {
    Dimmer(Rc<DimmerProxy<T>>),
}

impl<T: BusTransport> AnyProxy<T> {
    fn kind(&self) -> CapabilityKind {
        match self {
            AnyProxy::Dimmer(_) => CapabilityKind::Dimmer,
        }
    }

    fn set_tid(&self, tid: Option<u16>) {
        match self {
            AnyProxy::Dimmer(p) => p.core().set_tid(tid),
        }
    }
}

/// The bus core's top-level handle: owns the transport exclusively, runs
/// enumeration, and hands out proxies. Cheaply cloned via `Rc` so a proxy
/// can hold a [`std::rc::Weak`] back-reference without keeping the bus
/// alive past its last strong owner (`spec.md` §9 "Cyclic references").
pub struct Bus<T: BusTransport> {
    transport: T,
    registry: RefCell<Registry>,
    proxies: RefCell<HashMap<String, AnyProxy<T>>>,
    max_query_retries: u8,
}

impl<T: BusTransport> Bus<T> {
    /// Wrap an already-open transport. Real hardware goes through
    /// [`crate::BusHandle::new`], which opens a `socketcan` device and
    /// reports [`BusError::BusOpen`] on failure; this constructor is for
    /// tests and other in-process transports that are already connected.
    pub fn from_transport(transport: T) -> Rc<Self> {
        Self::from_transport_with_retries(transport, 0)
    }

    /// As [`Self::from_transport`], but with the bounded-retry extension
    /// from `spec.md` §9 ("Retry policy — open question") enabled: an
    /// empty query round at a given prefix is retried up to
    /// `max_query_retries` times before the prefix is declared childless.
    /// `0` (the default) reproduces the reference one-round-per-prefix
    /// behavior tested by Scenarios 1-3.
    pub fn from_transport_with_retries(transport: T, max_query_retries: u8) -> Rc<Self> {
        Rc::new(Bus {
            transport,
            registry: RefCell::new(Registry::default()),
            proxies: RefCell::new(HashMap::new()),
            max_query_retries,
        })
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn max_query_retries(&self) -> u8 {
        self.max_query_retries
    }

    /// A snapshot of the registry as of the last completed enumeration.
    pub fn registry(&self) -> Registry {
        self.registry.borrow().clone()
    }

    /// Run the discovery protocol (`spec.md` §4.3) and commit its result.
    /// On success the registry reflects the new `tid -> hex(did)` map and
    /// every existing proxy has been notified of its new TID (or `None` if
    /// its device was not seen this run). On failure
    /// ([`BusError::EnumerationAborted`]) the registry and every proxy are
    /// left exactly as they were.
    pub async fn enumerate(self: &Rc<Self>) -> Result<(), BusError> {
        let out = crate::engine::run(self).await?;
        self.commit(out);
        Ok(())
    }

    fn commit(&self, out: HashMap<u16, String>) {
        let by_did: HashMap<&str, u16> =
            out.iter().map(|(tid, did)| (did.as_str(), *tid)).collect();
        let proxies = self.proxies.borrow();
        for (did, proxy) in proxies.iter() {
            proxy.set_tid(by_did.get(did.as_str()).copied());
        }
        self.registry.borrow_mut().commit(out);
    }

    /// Return the proxy for `did_hex`, creating it if this is the first
    /// request for that device identity. A freshly created proxy is
    /// immediately given its current TID from the registry, if any
    /// (`spec.md` §4.4, §8 Scenario 6) before this call returns.
    ///
    /// If a proxy already exists for `did_hex` it must have capability
    /// `capability`; a mismatch is reported as
    /// [`BusError::CapabilityMismatch`] rather than silently substituted.
    pub fn get_proxy(
        self: &Rc<Self>,
        did_hex: &str,
        capability: CapabilityKind,
    ) -> Result<Rc<DimmerProxy<T>>, BusError> {
        let mut proxies = self.proxies.borrow_mut();

        if let Some(existing) = proxies.get(did_hex) {
            return match existing {
                AnyProxy::Dimmer(p) if capability == CapabilityKind::Dimmer => Ok(Rc::clone(p)),
                other => Err(BusError::CapabilityMismatch {
                    did: did_hex.to_string(),
                    requested: capability,
                    existing: other.kind(),
                }),
            };
        }

        let proxy = Rc::new(DimmerProxy::new(did_hex.to_string(), Rc::downgrade(self)));
        if let Some(tid) = self.registry.borrow().tid_of(did_hex) {
            proxy.core().set_tid(Some(tid));
        }
        proxies.insert(did_hex.to_string(), AnyProxy::Dimmer(Rc::clone(&proxy)));
        Ok(proxy)
    }

    /// Run `f` against every known proxy's dimmer capability, ignoring
    /// devices with another capability (there are none today, but this
    /// mirrors `bus.py`'s `broadcast`, which dispatches by method name
    /// rather than by type).
    pub async fn broadcast<F, Fut>(&self, f: F)
    where
        F: Fn(Rc<DimmerProxy<T>>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let targets: Vec<_> = self
            .proxies
            .borrow()
            .values()
            .map(|p| match p {
                AnyProxy::Dimmer(p) => Rc::clone(p),
            })
            .collect();
        for proxy in targets {
            f(proxy).await;
        }
    }

    /// Run `f` against the proxy for `did_hex`, if one has been created; a
    /// silent no-op otherwise, matching `bus.py`'s `cast`.
    pub async fn cast<F, Fut>(&self, did_hex: &str, f: F)
    where
        F: FnOnce(Rc<DimmerProxy<T>>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let target = self.proxies.borrow().get(did_hex).map(|p| match p {
            AnyProxy::Dimmer(p) => Rc::clone(p),
        });
        if let Some(proxy) = target {
            f(proxy).await;
        }
    }
}
