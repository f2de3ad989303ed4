// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based invariants from `spec.md` §8, exercised over a
//! [`SimulatedBus`] seeded with an arbitrary forest of device identities.

use std::collections::HashSet;

use fieldbus_core::driver::sim::SimulatedBus;
use fieldbus_core::registry::Bus;
use proptest::collection::{hash_set, vec};
use proptest::prelude::*;

fn did_strategy() -> impl Strategy<Value = [u16; 8]> {
    vec(any::<u16>(), 8).prop_map(|words| {
        let mut did = [0u16; 8];
        did.copy_from_slice(&words);
        did
    })
}

/// A handful of distinct DIDs (distinct as 8-word arrays; collisions are
/// discarded by the `hash_set` combinator so every run has a genuine
/// forest, not a single repeated node).
fn forest_strategy() -> impl Strategy<Value = Vec<[u16; 8]>> {
    hash_set(did_strategy(), 0..6).prop_map(|set| set.into_iter().collect())
}

fn run_enumeration(dids: Vec<[u16; 8]>) -> fieldbus_core::Registry {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(async {
        let bus = Bus::from_transport(SimulatedBus::new(dids));
        bus.enumerate().await.unwrap();
        bus.registry()
    })
}

fn encode_did(words: &[u16; 8]) -> String {
    words.iter().map(|w| format!("{:04x}", w)).collect()
}

proptest::proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn out_is_contiguous_from_zero(dids in forest_strategy()) {
        let registry = run_enumeration(dids.clone());
        let tids: HashSet<u16> = (0..registry.len() as u16).collect();
        for tid in 0..registry.len() as u16 {
            prop_assert!(registry.did_of(tid).is_some(), "tid {tid} missing from a {}-device registry", registry.len());
        }
        prop_assert_eq!(registry.len(), dids.len());
        let _ = tids;
    }

    #[test]
    fn out_is_bijective_onto_discovered_dids(dids in forest_strategy()) {
        let registry = run_enumeration(dids.clone());
        let expected: HashSet<String> = dids.iter().map(encode_did).collect();
        let actual: HashSet<String> = (0..registry.len() as u16)
            .map(|tid| registry.did_of(tid).unwrap().to_string())
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn every_did_key_is_32_lowercase_hex_chars(dids in forest_strategy()) {
        let registry = run_enumeration(dids);
        for tid in 0..registry.len() as u16 {
            let hex = registry.did_of(tid).unwrap();
            prop_assert_eq!(hex.len(), 32);
            prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
