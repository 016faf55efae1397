use lineartv_core::{ChannelRuntime, Slot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Drives the runtime state through ten thousand random lifecycle events
/// and checks the structural invariants after every single one: the two
/// slots always partition {A, B}, an ad implies playback, and readiness
/// excludes an in-flight preload.
#[test]
fn slot_parity_survives_ten_thousand_events() {
    let mut rng = StdRng::seed_from_u64(0x11ea57);
    let mut runtime = ChannelRuntime::new();

    for step in 0..10_000 {
        match rng.gen_range(0..6) {
            0 => runtime.begin_preload(),
            1 => runtime.preload_became_ready(),
            2 => runtime.preload_failed(),
            3 => runtime.swap_for_playback(),
            4 => runtime.enter_ad(),
            _ => runtime.stopped(),
        }
        assert!(
            runtime.invariants_hold(),
            "invariants broken at step {step}: {runtime:?}"
        );
        assert_ne!(runtime.active_slot, runtime.next_slot);
        assert!(matches!(runtime.active_slot, Slot::A | Slot::B));
    }
}

#[test]
fn swaps_always_return_to_the_origin_slot() {
    let mut runtime = ChannelRuntime::new();
    let origin = runtime.active_slot;
    runtime.swap_for_playback();
    runtime.swap_for_playback();
    assert_eq!(runtime.active_slot, origin);
}
