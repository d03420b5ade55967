//! End-to-end scenes: orchestrator, workers and render consumer together.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use lockstep::shared::{ModuleConfig, SceneConfig, Transform, Vec3};
use lockstep::substrate::{Phase, Role, SyncError};
use lockstep::{
    Canvas, Command, DrawItem, EngineError, EngineResult, FnKernel, FrameRecorder, Lifecycle, ModuleRegistry,
    ObjectId, Orchestrator, PluginModule, Registry, SimObject, SimState, StageWorker, WorkerReport, WorkerState,
};

/// One soft body whose physics and graphics stages alternate on a
/// two-slot ring, graphics first.
fn two_stage_scene(frames: u64) -> SceneConfig {
    SceneConfig::from_toml_str(&format!(
        r#"
        frames = {frames}

        [[module]]
        name = "cloth"
        kind = "softbody"

        [[module.object]]
        name = "flag"
        model = {{ source = "grid", rows = 4, cols = 4, spacing = 0.25, origin = [0.0, 2.0, 0.0], pin_top_row = true }}
        slot = [{{ index = 0, tokens = 1 }}, {{ index = 1, tokens = 0 }}]
        stages = {{ physics = {{ wait = 1, post = 0 }}, graphics = {{ wait = 0, post = 1 }} }}

        [module.object.physics]
        fixed_dt = 0.01
        "#
    ))
    .unwrap()
}

#[test]
fn test_thousand_laps_in_order() {
    let mut orchestrator = Orchestrator::from_config(&two_stage_scene(1000)).unwrap();
    let summary = orchestrator.run(FrameRecorder::new()).unwrap();

    let id = ObjectId::new("flag", "cloth");
    let records: Vec<_> = summary.canvas.records_for(&id).collect();
    assert_eq!(records.len(), 1000);

    for (frame, record) in records.iter().enumerate() {
        let frame = frame as u64;
        // each frame sees exactly one more lap than the last: none skipped,
        // none repeated
        assert_eq!(record.frame, frame);
        assert_eq!(record.lap, frame);
        assert_eq!(record.select, frame % 2 == 1);
    }

    let report = &summary.reports[0];
    assert_eq!(report.role.as_str(), "physics");
    assert!(report.laps == 999 || report.laps == 1000, "laps = {}", report.laps);
    assert_eq!(report.state, WorkerState::Stopped);

    let object = orchestrator.object("flag", "cloth").unwrap();
    assert_eq!(object.overlaps(), 0);
    assert_eq!(object.phase(), Phase::Steady);
}

#[test]
fn test_storage_alternates_between_two_buffers() {
    let mut orchestrator = Orchestrator::from_config(&two_stage_scene(50)).unwrap();
    let summary = orchestrator.run(FrameRecorder::new()).unwrap();

    let object = orchestrator.object("flag", "cloth").unwrap();
    let storages = object.inspect(|state| state.positions().storage_ids());
    assert_ne!(storages[0], storages[1]);

    let records: Vec<_> = summary.canvas.records_for(object.id()).collect();
    for record in &records {
        assert!(storages.contains(&record.storage));
    }
    for pair in records.windows(2) {
        assert_ne!(pair[0].storage, pair[1].storage);
        assert_ne!(pair[0].select, pair[1].select);
    }
}

#[test]
fn test_fixed_step_runs_are_reproducible() {
    let run = || {
        let mut orchestrator = Orchestrator::from_config(&two_stage_scene(200)).unwrap();
        orchestrator.run(FrameRecorder::new()).unwrap().canvas.run_digest()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_presentation_commands_reach_the_first_frame() {
    let mut orchestrator = Orchestrator::from_config(&two_stage_scene(3)).unwrap();
    let object = orchestrator.object("flag", "cloth").unwrap();
    let moved = Transform::new(Vec3::X, 2.0);
    assert!(object.send(Command::Transform(moved)));
    assert!(object.send(Command::Reprogram("shaded".to_string())));

    let summary = orchestrator.run(FrameRecorder::new()).unwrap();
    let first = &summary.canvas.records()[0];
    assert_eq!(first.transform, moved);
    assert_eq!(first.program, "shaded");
}

/// Lowest y of every free vertex the render consumer was handed.
#[derive(Debug)]
struct LowestPoint {
    lowest: f64,
    draws: u64,
}

impl Canvas for LowestPoint {
    fn draw(&mut self, item: &DrawItem<'_>) {
        self.draws += 1;
        for p in item.vertices {
            self.lowest = self.lowest.min(p.y);
        }
    }
}

#[test]
fn test_collision_module_keeps_cloth_above_ground() {
    let scene = SceneConfig::from_toml_str(
        r#"
        frames = 300

        [[module]]
        name = "cloth"
        kind = "softbody"

        [[module.object]]
        name = "sheet"
        model = { source = "grid", rows = 3, cols = 3, spacing = 0.2, origin = [0.0, 1.0, 0.0] }
        slot = [{ index = 0, tokens = 1 }, { index = 1, tokens = 0 }, { index = 2, tokens = 0 }]
        stages = { graphics = { wait = 0, post = 1 }, physics = { wait = 1, post = 2 }, collision = { wait = 2, post = 0 } }

        [module.object.physics]
        fixed_dt = 0.01

        [[module]]
        name = "floor"
        kind = "collision"

        [[module.bind]]
        object = "sheet"
        owner = "cloth"
        role = "collision"
        ground = 0.5
        "#,
    )
    .unwrap();

    let mut orchestrator = Orchestrator::from_config(&scene).unwrap();
    let summary = orchestrator
        .run(LowestPoint {
            lowest: f64::INFINITY,
            draws: 0,
        })
        .unwrap();

    assert_eq!(summary.canvas.draws, 300);
    assert!(summary.canvas.lowest >= 0.5, "lowest = {}", summary.canvas.lowest);

    let sheet = orchestrator.object("sheet", "cloth").unwrap();
    // three seconds of free fall from 1.0: every vertex rests on the floor
    assert!(sheet.inspect(|state| state.contacts()) > 0);

    let mut drivers: Vec<_> = summary
        .reports
        .iter()
        .map(|r| (r.module.as_str(), r.role.as_str()))
        .collect();
    drivers.sort_unstable();
    assert_eq!(drivers, [("cloth", "physics"), ("floor", "collision")]);
}

#[test]
fn test_deadlocked_wiring_is_rejected_before_start() {
    let scene = SceneConfig::from_toml_str(
        r#"
        [[module]]
        name = "cloth"
        kind = "softbody"

        [[module.object]]
        name = "flag"
        model = { source = "grid", rows = 2, cols = 2, spacing = 0.5 }
        slot = [{ index = 0, tokens = 0 }, { index = 1, tokens = 0 }]
        stages = { physics = { wait = 1, post = 0 }, graphics = { wait = 0, post = 1 } }
        "#,
    )
    .unwrap();

    let err = Orchestrator::from_config(&scene).unwrap_err();
    assert!(
        matches!(err, EngineError::Ring { source: SyncError::NoToken { .. }, .. }),
        "{err}"
    );
}

#[test]
fn test_unknown_module_kind_is_rejected() {
    let scene = SceneConfig::from_toml_str(
        r#"
        [[module]]
        name = "fluid"
        kind = "sph"
        "#,
    )
    .unwrap();
    let err = Orchestrator::from_config(&scene).unwrap_err();
    assert!(matches!(err, EngineError::UnknownModule { ref kind, .. } if kind == "sph"));
}

#[test]
fn test_shutdown_stops_every_worker() {
    let mut orchestrator = Orchestrator::from_config(&two_stage_scene(10)).unwrap();
    orchestrator.start().unwrap();
    let (_, stats) = orchestrator.render(10, FrameRecorder::new()).unwrap();
    assert_eq!(stats.frames, 10);

    let reports = orchestrator.shutdown();
    assert_eq!(orchestrator.lifecycle(), Lifecycle::Stopped);
    assert!(reports.iter().all(|r| r.state == WorkerState::Stopped));
    assert!(orchestrator.registry().iter().all(|o| o.ring().is_closed()));
    assert!(orchestrator.modules().iter().all(|m| m.workers().is_empty()));
}

/// Drives physics of its objects with a kernel that fails on its third lap.
struct FragileModule {
    name: String,
    objects: Vec<Arc<SimObject>>,
    workers: Vec<StageWorker>,
}

fn fragile(config: &ModuleConfig, registry: &mut Registry) -> EngineResult<Box<dyn PluginModule>> {
    let mut objects = Vec::new();
    for object in &config.objects {
        let object = Arc::new(SimObject::from_config(object)?);
        registry.publish(Arc::clone(&object))?;
        objects.push(object);
    }
    Ok(Box::new(FragileModule {
        name: config.name.clone(),
        objects,
        workers: Vec::new(),
    }))
}

impl PluginModule for FragileModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "fragile"
    }

    fn objects(&self) -> &[Arc<SimObject>] {
        &self.objects
    }

    fn drives(&self) -> Vec<(ObjectId, Role)> {
        self.objects.iter().map(|o| (o.id().clone(), Role::PHYSICS)).collect()
    }

    fn synchronize(&mut self, _config: &ModuleConfig, _registry: &Registry) -> EngineResult<()> {
        Ok(())
    }

    fn run(&mut self) -> EngineResult<()> {
        for object in &self.objects {
            let mut lap = 0_u32;
            let kernel = FnKernel::new("fragile", move |_: &SimObject, _: &mut SimState, _| {
                lap += 1;
                assert!(lap < 3, "kernel fault on lap {lap}");
            });
            let worker = StageWorker::spawn(&self.name, Arc::clone(object), Role::PHYSICS, Box::new(kernel), None)?;
            self.workers.push(worker);
        }
        Ok(())
    }

    fn workers(&self) -> &[StageWorker] {
        &self.workers
    }

    fn cleanup(&mut self) -> Vec<WorkerReport> {
        for object in &self.objects {
            object.ring().close();
        }
        self.workers.drain(..).map(StageWorker::join).collect()
    }
}

#[test]
fn test_kernel_panic_ends_the_run() {
    let scene = SceneConfig::from_toml_str(
        r#"
        frames = 100

        [[module]]
        name = "boom"
        kind = "fragile"

        [[module.object]]
        name = "flag"
        model = { source = "grid", rows = 2, cols = 2, spacing = 0.5 }
        slot = [{ index = 0, tokens = 1 }, { index = 1, tokens = 0 }]
        stages = { physics = { wait = 1, post = 0 }, graphics = { wait = 0, post = 1 } }
        "#,
    )
    .unwrap();
    let mut factories = ModuleRegistry::with_builtins();
    factories.register("fragile", fragile);

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut orchestrator = Orchestrator::with_modules(&scene, &factories).unwrap();
        let result = orchestrator.run(FrameRecorder::new()).map(|summary| summary.stats.frames);
        let closed = orchestrator.registry().iter().all(|o| o.ring().is_closed());
        tx.send((result, orchestrator.lifecycle(), closed)).ok();
    });

    let (result, lifecycle, closed) = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("run() hung after a kernel panic");
    assert!(matches!(result, Err(EngineError::Sync(SyncError::Closed))), "{result:?}");
    assert_eq!(lifecycle, Lifecycle::Stopped);
    assert!(closed);
}
