//! End-to-end simulation tests: systems, events, the deletion drain, and
//! save games.

use hearth_sim::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Test component types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct Hunger {
    value: i32,
    rate: i32,
}

impl Component for Hunger {}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct Health {
    current: i32,
    max: i32,
}

impl Component for Health {}

/// Raised when hunger crosses the starvation line.
#[derive(Debug, Default)]
struct Starving {
    damage: i32,
    handled: bool,
}

impl EntityEvent for Starving {
    fn is_handled(&self) -> bool {
        self.handled
    }
}

const PROTOTYPES: &str = r#"[
    {"id": "creature", "components": [
        {"type": "Health", "current": 3, "max": 3},
        {"type": "Hunger", "value": 0, "rate": 1}
    ]},
    {"id": "glutton", "parent": "creature", "components": [
        {"type": "Hunger", "rate": 2}
    ]},
    {"id": "statue", "parent": "creature", "components": [
        {"type": "Hunger", "!remove": true}
    ]}
]"#;

// ---------------------------------------------------------------------------
// Test systems
// ---------------------------------------------------------------------------

fn hunger_system(manager: &mut EntityManager) -> anyhow::Result<()> {
    let hungry: Vec<EntityId> = manager.entity_query::<Hunger>().map(|(id, _)| id).collect();
    for id in hungry {
        let hunger = manager.get_component_mut::<Hunger>(id)?;
        hunger.value += hunger.rate;
        let value = hunger.value;
        if value >= 4 {
            manager.raise_by_value(id, Starving { damage: 1, handled: false })?;
        }
    }
    Ok(())
}

fn reaper_system(manager: &mut EntityManager) -> anyhow::Result<()> {
    let dead: Vec<EntityId> = manager
        .entity_query::<Health>()
        .filter(|(_, health)| health.current <= 0)
        .map(|(id, _)| id)
        .collect();
    for id in dead {
        manager.queue_delete(id);
    }
    Ok(())
}

fn broken_system(_: &mut EntityManager) -> anyhow::Result<()> {
    Err(anyhow::anyhow!("broken on purpose"))
}

fn setup_loop() -> TickLoop {
    let mut manager = EntityManager::new();
    let manifest = ComponentManifest::new()
        .with::<Hunger>("Hunger")
        .with::<Health>("Health");
    manager.register_manifest(&manifest).unwrap();
    manager.load_prototypes_str(PROTOTYPES).unwrap();
    manager.resync_prototypes().unwrap();
    manager
        .subscribe::<Health, Starving>(None, |m, id, event| {
            m.get_component_mut::<Health>(id)?.current -= event.damage;
            event.handled = true;
            Ok(())
        })
        .unwrap();
    manager.create_map(MapId(1)).unwrap();
    manager.initialize_map(MapId(1)).unwrap();

    let mut tick_loop = TickLoop::new(manager, TickConfig { fixed_dt: 0.1 }).unwrap();
    tick_loop.add_system("hunger", hunger_system).unwrap();
    tick_loop
        .add_system_after("reaper", &["hunger"], reaper_system)
        .unwrap();
    tick_loop
}

fn spawn(tick_loop: &mut TickLoop, prototype: &str, x: i32) -> EntityId {
    tick_loop
        .world_mut()
        .spawn_entity(Some(prototype), MapCoordinates::new(MapId(1), x, 0))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn starving_creatures_die_at_the_drain_point() {
    let mut tick_loop = setup_loop();
    let glutton = spawn(&mut tick_loop, "glutton", 0);
    let creature = spawn(&mut tick_loop, "creature", 1);
    let statue = spawn(&mut tick_loop, "statue", 2);

    // Glutton: hunger 2, 4 (-1 hp), 6 (-1), 8 (-1) -> dead after tick 4.
    tick_loop.run_ticks(3).unwrap();
    assert_eq!(tick_loop.world().get_component::<Health>(glutton).unwrap().current, 1);

    tick_loop.tick().unwrap();
    assert_eq!(tick_loop.last_diagnostics().drained_deletions, 1);
    assert!(!tick_loop.world().entity_exists(glutton));
    assert!(tick_loop.world().entity_exists(creature));
    assert!(tick_loop.world().entity_exists(statue));
    assert!(!tick_loop.world().has_component::<Hunger>(statue));
    assert_eq!(tick_loop.world().entities_in_map(MapId(1)), vec![creature, statue]);
}

#[test]
fn failed_tick_still_drains_queued_deletions() {
    let mut tick_loop = setup_loop();
    tick_loop.add_system("broken", broken_system).unwrap();
    let victim = spawn(&mut tick_loop, "statue", 0);
    tick_loop.world_mut().queue_delete(victim);

    let err = tick_loop.tick().unwrap_err();
    assert!(err.to_string().contains("broken"));
    assert!(!tick_loop.world().entity_exists(victim));
    assert_eq!(tick_loop.tick_count(), 1);
}

#[test]
fn bad_system_registrations_leave_the_schedule_alone() {
    let mut tick_loop = setup_loop();
    let err = tick_loop
        .add_system_after("hunger", &["reaper"], hunger_system)
        .unwrap_err();
    assert!(err.to_string().contains("duplicate system name"));

    let err = tick_loop
        .add_system_after("feeder", &["farmer"], hunger_system)
        .unwrap_err();
    assert!(err.to_string().contains("'farmer' is not registered"));
    assert_eq!(tick_loop.system_names(), vec!["hunger", "reaper"]);
}

#[test]
fn identical_runs_hash_identically() {
    let mut a = setup_loop();
    let mut b = setup_loop();
    for tick_loop in [&mut a, &mut b] {
        spawn(tick_loop, "glutton", 0);
        spawn(tick_loop, "creature", 1);
        tick_loop.run_ticks(6).unwrap();
    }
    assert_eq!(a.state_hash(), b.state_hash());
}

#[test]
fn save_and_restore_resume_the_same_future() {
    let mut tick_loop = setup_loop();
    spawn(&mut tick_loop, "glutton", 0);
    spawn(&mut tick_loop, "creature", 1);
    tick_loop.run_ticks(2).unwrap();

    let save = SaveGame::from_json(&tick_loop.capture_save().to_json().unwrap()).unwrap();

    tick_loop.run_ticks(5).unwrap();
    let continued = tick_loop.state_hash();

    let mut resumed = setup_loop();
    resumed.restore_save(&save).unwrap();
    assert_eq!(resumed.tick_count(), 2);
    resumed.run_ticks(5).unwrap();
    assert_eq!(resumed.state_hash(), continued);
}

#[test]
fn restore_skips_map_init() {
    let mut tick_loop = setup_loop();
    let creature = spawn(&mut tick_loop, "creature", 0);
    let save = tick_loop.capture_save();

    let mut resumed = setup_loop();
    let map_inits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&map_inits);
    resumed
        .world_mut()
        .subscribe_global::<MapInit>(None, move |_, _, _| {
            counter.set(counter.get() + 1);
            Ok(())
        });

    resumed.restore_save(&save).unwrap();
    assert_eq!(map_inits.get(), 0);
    assert!(resumed.world().is_entity_map_initialized(creature));
    assert_eq!(resumed.world().life_stage(creature), Some(EntityLifeStage::Started));
}

#[test]
fn save_with_unregistered_component_is_rejected_before_flush() {
    let mut tick_loop = setup_loop();
    spawn(&mut tick_loop, "creature", 0);
    let save = tick_loop.capture_save();

    let mut bare = TickLoop::new(EntityManager::new(), TickConfig { fixed_dt: 0.1 }).unwrap();
    let keep = bare.world_mut().allocate(None, None).unwrap();
    let err = bare.restore_save(&save).unwrap_err();
    assert!(err.to_string().contains("failed to restore world"));
    assert!(bare.world().entity_exists(keep));
}

#[test]
fn explicit_id_allocation_after_restore() {
    let mut tick_loop = setup_loop();
    let e = tick_loop
        .world_mut()
        .allocate(Some("creature"), Some(EntityId::new(7)))
        .unwrap();
    let save = tick_loop.capture_save();

    let mut resumed = setup_loop();
    resumed.restore_save(&save).unwrap();
    assert!(resumed.world().entity_exists(e));
    let err = resumed
        .world_mut()
        .allocate(None, Some(EntityId::new(7)))
        .unwrap_err();
    assert!(matches!(err, EcsError::DuplicateEntityId { .. }));
    assert_eq!(resumed.world_mut().allocate(None, None).unwrap(), EntityId::new(8));
}
