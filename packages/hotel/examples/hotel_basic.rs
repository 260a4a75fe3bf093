//! Leases rooms to simulated requests, answers some of them in time and lets the rest expire.
//!
//! Logs at debug level, which includes the hotel's own log output.

use std::time::Duration;

use hotel::{EventBase, Hotel};
use tracing::{Level, info};

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let event_base = EventBase::new();

    let hotel = Hotel::builder()
        .capacity(4)
        .scheduler(event_base.clone())
        .eviction_timeout(Duration::from_millis(200))
        .on_evict(|hotel: &Hotel<&'static str>, room, request| {
            info!(room, request, vacant = hotel.vacant_count(), "request timed out");
        })
        .build()
        .expect("the configuration above is valid");

    let requests = ["fetch-profile", "fetch-avatar", "update-settings", "list-friends"];

    let rooms = requests
        .iter()
        .map(|request| {
            hotel
                .check_in(*request)
                .expect("there is a room for every request")
        })
        .collect::<Vec<_>>();

    match hotel.check_in("one-too-many") {
        Ok(_) => unreachable!("every room is taken"),
        Err(error) => info!(%error, "turned away"),
    }

    // Every other request gets its response in time.
    for room in rooms.iter().step_by(2) {
        let request = hotel
            .check_out_occupant(*room)
            .expect("the room was checked in above");

        info!(room, request, "response received");
    }

    let evicted = event_base.run();

    info!(evicted, vacant = hotel.vacant_count(), "all leases settled");
}
