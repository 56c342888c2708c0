// End-to-end checks of the decision cache through the sender bridge.
//
// Each test drives the invalidation bus directly, the way a platform's event
// hooks would, and observes results and engine computations.

mod helpers;

use contextperm::context::QueryOptions;
use contextperm::engine::Tristate;
use contextperm::session::{SessionHandle, WorldId};
use contextperm::subject::SubjectId;
use helpers::{Harness, Rule};

fn fly_in_nether() -> Harness {
    Harness::builder()
        .rule(Rule::when("fly", true, "world", "nether"))
        .build()
}

#[test]
fn test_check_before_load_is_undefined() {
    let h = fly_in_nether();
    h.login("P1", 1, Some("nether"));

    assert_eq!(h.check("P1", "fly"), Tristate::Undefined);
    assert_eq!(h.engine.computations(), 0);
    assert!(h.cache.is_empty());
}

#[test]
fn test_loaded_check_is_cached() {
    let h = fly_in_nether();
    h.login("P1", 1, Some("nether"));
    h.engine.load(Harness::id("P1"));

    assert_eq!(h.check("P1", "fly"), Tristate::True);
    assert_eq!(h.check("P1", "fly"), Tristate::True);
    assert_eq!(h.engine.computations(), 1);
    assert_eq!(h.cache.len(), 1);
}

#[test]
fn test_world_change_recomputes_under_new_world() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("nether"));
    h.engine.load(p1);
    assert_eq!(h.check("P1", "fly"), Tristate::True);

    let nether = WorldId::from("nether");
    h.bus.on_world_change(p1, Some(&nether), WorldId::from("overworld"));

    assert_eq!(h.check("P1", "fly"), Tristate::Undefined);
    assert_eq!(h.engine.computations(), 2);
    let seen = h.engine.seen();
    assert!(seen[1].contains("world", "overworld"));
    assert!(!seen[1].contains("world", "nether"));
}

#[test]
fn test_returning_to_a_world_does_not_reuse_stale_entry() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("nether"));
    h.engine.load(p1);
    h.check("P1", "fly");

    h.bus.on_world_change(p1, None, WorldId::from("overworld"));
    h.bus.on_world_change(p1, None, WorldId::from("nether"));

    // Same contexts as the first check, but an older generation.
    assert_eq!(h.check("P1", "fly"), Tristate::True);
    assert_eq!(h.engine.computations(), 2);
}

#[test]
fn test_disconnect_yields_undefined_despite_cached_entry() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("nether"));
    h.engine.load(p1);
    assert_eq!(h.check("P1", "fly"), Tristate::True);

    h.bus.on_disconnect(p1);
    assert_eq!(h.check("P1", "fly"), Tristate::Undefined);
    assert!(!h.bus.is_online(p1));
    assert_eq!(h.engine.computations(), 1);
}

#[test]
fn test_disconnect_twice_is_harmless() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, None);

    assert!(h.bus.on_disconnect(p1).is_some());
    assert!(h.bus.on_disconnect(p1).is_none());
    assert!(!h.bus.is_online(p1));
    assert_eq!(h.bus.online_count(), 0);
}

#[test]
fn test_respawn_invalidates_and_follows_new_handle() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("nether"));
    h.engine.load(p1);
    h.check("P1", "fly");

    let generation = h
        .bus
        .on_respawn(SessionHandle(1), SessionHandle(2), Some(WorldId::from("overworld")), true)
        .unwrap();
    assert_eq!(generation, 1);
    assert_eq!(h.bus.subject_for_handle(SessionHandle(2)), Some(p1));
    assert_eq!(h.bus.subject_for_handle(SessionHandle(1)), None);
    assert_eq!(h.check("P1", "fly"), Tristate::Undefined);
    assert_eq!(h.engine.computations(), 2);
}

#[test]
fn test_world_change_then_respawn_bumps_twice() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("overworld"));

    h.bus.on_world_change(p1, None, WorldId::from("nether"));
    h.bus.on_respawn(SessionHandle(1), SessionHandle(2), None, true);
    assert_eq!(h.bus.generation(p1), 2);
}

#[test]
fn test_generation_never_decreases() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    let mut last = h.bus.generation(p1);
    h.login("P1", 1, Some("nether"));

    for (i, world) in ["a", "b", "c", "d"].iter().enumerate() {
        h.bus.on_world_change(p1, None, WorldId::from(*world));
        if i % 2 == 1 {
            h.bus.on_disconnect(p1);
            h.login("P1", 10 + i as u64, Some(world));
        }
        let now = h.bus.generation(p1);
        assert!(now >= last, "generation went from {last} to {now}");
        last = now;
    }
    assert_eq!(last, 4);
}

#[test]
fn test_unknown_subject_events_are_noops() {
    let h = fly_in_nether();
    let ghost = SubjectId::offline("Ghost");

    assert!(h.bus.on_world_change(ghost, None, WorldId::from("nether")).is_none());
    assert!(h
        .bus
        .on_respawn(SessionHandle(99), SessionHandle(100), None, true)
        .is_none());
    assert!(h.bus.on_disconnect(ghost).is_none());
    assert!(!h.bus.is_online(ghost));
    assert_eq!(h.check("Ghost", "fly"), Tristate::Undefined);
}

#[test]
fn test_query_options_follow_session() {
    let h = Harness::builder().server("survival").build();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("nether"));

    assert_eq!(
        h.bridge.query_options(&"P1".to_string()),
        QueryOptions::from_pairs([("server", "survival"), ("world", "nether")])
    );
    h.bus.on_world_change(p1, None, WorldId::from("the_end"));
    assert_eq!(
        h.bridge.query_options(&"P1".to_string()).to_string(),
        "{server=survival, world=the_end}"
    );
}

#[test]
fn test_console_is_always_checkable() {
    let h = Harness::builder().rule(Rule::global("*", true)).build();
    let console = "console".to_string();
    let sender = h.bridge.wrap(&console);

    assert!(sender.is_console());
    assert!(sender.has_permission("server.stop"));
    sender.send_message("done");
    assert_eq!(
        h.bridge.platform().outbox.lock().unwrap().as_slice(),
        &["Console: done".to_string()]
    );
}

#[test]
fn test_invalidate_all_forces_recompute() {
    let h = fly_in_nether();
    let p1 = Harness::id("P1");
    h.login("P1", 1, Some("nether"));
    h.engine.load(p1);
    h.check("P1", "fly");

    assert!(h.bus.invalidate_all() >= 2);
    h.check("P1", "fly");
    assert_eq!(h.engine.computations(), 2);
}
