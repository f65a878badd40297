//! Small builders shared by pipeline tests.

use kitties_core::{Kitty, KittyDna, KittyIndex, OwnerId, PartialKitties};

/// Owner id from a display name.
pub fn owner(name: &str) -> OwnerId {
    OwnerId::from(name)
}

/// Recognisable 16-byte DNA filled with `seed`.
pub fn dna(seed: u8) -> KittyDna {
    KittyDna::from([seed; 16])
}

/// Complete record for `index`.
pub fn kitty(index: u32, owner_name: &str, seed: u8) -> Kitty {
    Kitty {
        index: KittyIndex(index),
        dna: dna(seed),
        owner: owner(owner_name),
    }
}

/// Map tracking `0..count` with every field still pending.
pub fn tracked_records(count: u32) -> PartialKitties {
    let mut records = PartialKitties::new();
    for index in KittyIndex::range(0, count) {
        records.track(index);
    }
    records
}

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
