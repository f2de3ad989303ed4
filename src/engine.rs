// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The enumeration engine: the tree-walk discovery protocol that turns a
//! reset bus into a `tid -> hex(did)` map, driven entirely through
//! [`crate::driver::BusTransport`] and [`crate::codec::Frame`]. Ported
//! directly from `original_source/bus.py`'s `do_enumerate`/`enum_query`/
//! `enum_update`/`enum_assign`, which this module mirrors step for step.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::codec::Frame;
use crate::driver::BusTransport;
use crate::error::BusError;
use crate::ids::encode_did;
use crate::registry::Bus;

const RESET_SETTLE: Duration = Duration::from_millis(300);
const PRE_QUERY_SETTLE: Duration = Duration::from_millis(20);
const QUERY_RESPONSE_WINDOW: Duration = Duration::from_millis(50);
const SEND_DEADLINE: Duration = Duration::from_millis(200);

/// One entry in the engine's work set: a live QUID and the DID-word prefix
/// agreed upon for it so far (`spec.md` §3 "Work Item").
struct WorkItem {
    quid: u16,
    prefix: Vec<u16>,
}

/// Drive one full enumeration over `bus`'s transport and return the
/// resulting `tid -> hex(did)` map. Does not touch `bus`'s registry or
/// proxy directory; the caller ([`Bus::enumerate`]) commits the result
/// after this returns successfully, so a cancelled or failed run never
/// leaves partial state visible.
pub(crate) async fn run<T: BusTransport>(
    bus: &Rc<Bus<T>>,
) -> Result<HashMap<u16, String>, BusError> {
    let transport = bus.transport();

    send(transport, Frame::Reset).await?;
    tokio::time::sleep(RESET_SETTLE).await;

    let mut status: VecDeque<WorkItem> = VecDeque::new();
    status.push_back(WorkItem { quid: 0, prefix: Vec::new() });
    let mut next_quid: u16 = 1;
    let mut next_tid: u16 = 0;
    let mut out: HashMap<u16, String> = HashMap::new();

    while let Some(item) = status.pop_front() {
        if item.prefix.len() == 8 {
            send(transport, Frame::EnumAssign { quid: item.quid, tid: next_tid }).await?;
            out.insert(next_tid, encode_did(&item.prefix));
            next_tid += 1;
            continue;
        }

        tokio::time::sleep(PRE_QUERY_SETTLE).await;
        let offset = item.prefix.len() as u8;
        let words = query_round(bus, item.quid, offset).await?;

        for word in words {
            send(
                transport,
                Frame::EnumUpdate { quid: item.quid, offset, word, new_quid: next_quid },
            )
            .await?;

            let mut prefix = item.prefix.clone();
            prefix.push(word);
            status.push_back(WorkItem { quid: next_quid, prefix });
            next_quid += 1;
        }
    }

    Ok(out)
}

/// One query round (`spec.md` §4.3): broadcast `EnumQuery`, then collect
/// the distinct response words until a `receive` times out. Retried up to
/// `bus`'s `max_query_retries` when a round comes back empty, the bounded
/// extension from §9 ("Retry policy").
async fn query_round<T: BusTransport>(
    bus: &Rc<Bus<T>>,
    quid: u16,
    offset: u8,
) -> Result<HashSet<u16>, BusError> {
    let transport = bus.transport();
    let mut attempt = 0;
    loop {
        send(transport, Frame::EnumQuery { quid, offset }).await?;

        let mut words = HashSet::new();
        loop {
            match transport.receive(QUERY_RESPONSE_WINDOW).await {
                Some(timestamped) => {
                    match Frame::decode(&timestamped.frame) {
                        Some(Frame::EnumQueryResp { word }) => {
                            words.insert(word);
                        }
                        Some(_) => {
                            log::debug!(
                                "ignoring frame of unexpected shape during query round \
                                 (quid={quid}, offset={offset})"
                            );
                        }
                        None => {
                            log::debug!(
                                "ignoring undecodable frame during query round \
                                 (quid={quid}, offset={offset})"
                            );
                        }
                    }
                }
                None => break,
            }
        }

        if !words.is_empty() || attempt >= bus.max_query_retries() {
            return Ok(words);
        }
        attempt += 1;
    }
}

async fn send<T: BusTransport>(transport: &T, frame: Frame) -> Result<(), BusError> {
    transport
        .send(frame.encode(), SEND_DEADLINE)
        .await
        .map_err(|err| BusError::EnumerationAborted(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimulatedBus;
    use crate::proxy::CapabilityKind;

    fn did(hex: &str) -> [u16; 8] {
        let bytes = (0..8)
            .map(|i| u16::from_str_radix(&hex[i * 4..i * 4 + 4], 16).unwrap())
            .collect::<Vec<_>>();
        bytes.try_into().unwrap()
    }

    // Scenario 1 — single-node discovery.
    #[tokio::test(start_paused = true)]
    async fn scenario_single_node_discovery() {
        let bus = Bus::from_transport(SimulatedBus::new([did(
            "0022002a431458523530203800000000",
        )]));

        bus.enumerate().await.unwrap();

        let registry = bus.registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.did_of(0),
            Some("0022002a431458523530203800000000")
        );
    }

    // Scenario 2 — two nodes sharing a three-word prefix.
    #[tokio::test(start_paused = true)]
    async fn scenario_shared_prefix_splits_into_two_tids() {
        let bus = Bus::from_transport(SimulatedBus::new([
            did("aaaabbbbccccddddeeeeffff00001111"),
            did("aaaabbbbccccddddeeeeffff22223333"),
        ]));

        bus.enumerate().await.unwrap();

        let registry = bus.registry();
        assert_eq!(registry.len(), 2);
        let dids: HashSet<_> = [registry.did_of(0), registry.did_of(1)]
            .into_iter()
            .flatten()
            .collect();
        assert!(dids.contains("aaaabbbbccccddddeeeeffff00001111"));
        assert!(dids.contains("aaaabbbbccccddddeeeeffff22223333"));
    }

    // Scenario 3 — empty bus.
    #[tokio::test(start_paused = true)]
    async fn scenario_empty_bus_enumerates_to_nothing() {
        let bus = Bus::from_transport(SimulatedBus::empty());

        bus.enumerate().await.unwrap();

        assert!(bus.registry().is_empty());
    }

    // Scenario 5 — availability notification.
    #[tokio::test(start_paused = true)]
    async fn scenario_availability_notifies_observers_on_discovery_and_loss() {
        let transport = SimulatedBus::new([did("0022002a431458523530203800000000")]);
        let bus = Bus::from_transport(transport);

        let proxy = bus
            .get_proxy("0022002a431458523530203800000000", CapabilityKind::Dimmer)
            .unwrap();
        assert!(!proxy.core().is_available());

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_in_closure = Rc::clone(&seen);
        proxy
            .core()
            .availability_observer(Box::new(move |available| {
                seen_in_closure.borrow_mut().push(available);
            }));

        bus.enumerate().await.unwrap();
        assert!(proxy.core().is_available());
        assert_eq!(*seen.borrow(), vec![true]);

        // A second enumeration that no longer sees this DID must report it
        // unavailable again, exactly once.
        bus.transport().set_nodes(std::iter::empty());
        bus.enumerate().await.unwrap();
        assert!(!proxy.core().is_available());
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    // Scenario 6 — late-registered proxy.
    #[tokio::test(start_paused = true)]
    async fn scenario_late_registered_proxy_gets_current_tid_immediately() {
        let bus = Bus::from_transport(SimulatedBus::new([did(
            "0022002a431458523530203800000000",
        )]));
        bus.enumerate().await.unwrap();

        let proxy = bus
            .get_proxy("0022002a431458523530203800000000", CapabilityKind::Dimmer)
            .unwrap();
        assert!(proxy.core().is_available());
        assert_eq!(proxy.core().tid(), Some(0));
    }
}
