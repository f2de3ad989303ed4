// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manual bring-up aid: open a named SocketCAN interface, enumerate it, and
//! print the discovered `tid -> hex(did)` map. The Rust counterpart of
//! `original_source/run.py`/`bus.py`'s `__main__` block. Not part of the
//! core's test surface; requires real (or `vcan`) hardware.

use std::env;

use fieldbus_core::BusHandle;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = env::args().collect::<Vec<_>>();
    let device_name = args.get(1).expect("pass a fieldbus device name as the first argument");

    let bus = BusHandle::new(device_name).expect("failed to open fieldbus device");

    log::info!("enumerating {device_name}");
    bus.enumerate().await.expect("enumeration failed");

    let registry = bus.registry();
    if registry.is_empty() {
        println!("no devices found");
        return;
    }

    for tid in 0..registry.len() as u16 {
        match registry.did_of(tid) {
            Some(did) => println!("{tid} -> {did}"),
            None => println!("{tid} -> <missing>"),
        }
    }
}
