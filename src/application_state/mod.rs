//! # Application State Management
//!
//! This module drives the engine frame by frame:
//! - Loading configuration and querying the device
//! - Building the scene's transform hierarchy
//! - Scheduling each frame's game logic and applying its results on the main thread
//!
//! The loop is headless. Game-logic tasks compute per-entity motion off the
//! main thread and publish it into a shared buffer; once the frame barrier has
//! passed, the main thread applies the motion to the transform hierarchy and
//! packs the resulting world transforms for upload.

pub mod config;
pub mod device;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use cgmath::{InnerSpace, Vector3, Zero};

use crate::engine_state::{
    task_management::{
        error::SchedulerError,
        task::{BoxedTask, TaskCategory, TaskContext},
        MainThreadDrain,
    },
    transform_state::{transform::TransformUniform, TransformId},
    EngineState,
};
use config::EngineConfig;

/// Entities per game-logic task.
const ENTITIES_PER_TASK: usize = 4;

/// World units per second an entity drifts at most.
const DRIFT_SPEED: f32 = 2.0;

/// Radians per second the scene root spins.
const ROOT_SPIN: f32 = 0.5;

/// Totals over a run of the frame loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    /// Frames simulated.
    pub frames: usize,
    /// Main-thread tasks executed across all frame drains.
    pub main_thread_tasks: usize,
    /// Time the main thread spent waiting on game logic.
    pub barrier_wait: web_time::Duration,
}

/// The running application: the engine plus the demo scene it animates.
pub struct ApplicationState {
    /// The engine context
    pub engine_state: EngineState,
    /// Parent of every entity
    root: TransformId,
    /// Animated entities, in creation order
    entities: Vec<TransformId>,
    /// Per-entity displacement written by game-logic tasks
    motion: Arc<Mutex<Vec<Vector3<f32>>>>,
    /// Bumped by a main-thread task once a frame's game logic has fanned in
    completed_frames: Arc<AtomicUsize>,
    rng: fastrand::Rng,
    /// Timestamp of the last frame for delta time calculations
    last_frame_time: web_time::Instant,
}

impl ApplicationState {
    /// Creates the engine and a scene of `config.demo_entities` transforms
    /// under one root. Every fourth entity is parented to the one before it so
    /// the scene has depth as well as breadth.
    pub fn new(config: &EngineConfig) -> Result<Self, SchedulerError> {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Like `new`, with a caller-provided random source.
    pub fn with_rng(config: &EngineConfig, rng: fastrand::Rng) -> Result<Self, SchedulerError> {
        let mut engine_state = EngineState::new(config)?;
        let transforms = &mut engine_state.transforms;

        let root = transforms.insert();
        let mut entities = Vec::with_capacity(config.demo_entities);
        for index in 0..config.demo_entities {
            let entity = transforms.insert();
            let parent = match entities.last() {
                Some(&previous) if index % 4 == 3 => previous,
                _ => root,
            };
            // Freshly inserted handles are live and acyclic.
            if let Err(error) = transforms.add_child(parent, entity) {
                log::error!("Failed to attach demo entity: {error}");
            }
            transforms.set_position(entity, Vector3::new(index as f32, 0.0, 0.0));
            entities.push(entity);
        }
        log::info!("Created demo scene with {} entities", entities.len());

        Ok(Self {
            engine_state,
            root,
            motion: Arc::new(Mutex::new(vec![Vector3::zero(); entities.len()])),
            entities,
            completed_frames: Arc::new(AtomicUsize::new(0)),
            rng,
            last_frame_time: web_time::Instant::now(),
        })
    }

    /// Handles of the animated entities.
    pub fn entities(&self) -> &[TransformId] {
        &self.entities
    }

    /// The scene root.
    pub fn root(&self) -> TransformId {
        self.root
    }

    /// Frames whose game logic has fully completed.
    pub fn completed_frames(&self) -> usize {
        self.completed_frames.load(Ordering::Acquire)
    }

    /// Runs `frames` frames, timing each from the previous one.
    pub fn run(&mut self, frames: usize) -> RunSummary {
        let mut summary = RunSummary::default();
        for _ in 0..frames {
            let now = web_time::Instant::now();
            let frame_time = now - self.last_frame_time;
            self.last_frame_time = now;

            let drain = self.frame(frame_time.as_secs_f32());
            summary.frames += 1;
            summary.main_thread_tasks += drain.executed;
            summary.barrier_wait += drain.barrier_wait;
        }
        log::info!(
            "Ran {} frames: {} main thread tasks, {:?} waiting on game logic",
            summary.frames,
            summary.main_thread_tasks,
            summary.barrier_wait
        );
        summary
    }

    /// Simulates one frame of `delta_seconds`.
    ///
    /// Motion is computed by game-logic tasks, fanned in to a main-thread
    /// continuation, then applied to the hierarchy after the barrier.
    pub fn frame(&mut self, delta_seconds: f32) -> MainThreadDrain {
        self.schedule_motion(delta_seconds);
        let drain = self.engine_state.process_frame();
        self.apply_motion(delta_seconds);

        let uniforms = self.uniforms();
        log::trace!(
            "Packed {} world transforms ({} bytes)",
            uniforms.len(),
            bytemuck::cast_slice::<TransformUniform, u8>(&uniforms).len()
        );
        drain
    }

    fn schedule_motion(&mut self, delta_seconds: f32) {
        let entity_count = self.entities.len();
        let tasks: Vec<BoxedTask> = (0..entity_count)
            .step_by(ENTITIES_PER_TASK)
            .map(|first| {
                let last = (first + ENTITIES_PER_TASK).min(entity_count);
                let motion = self.motion.clone();
                let mut rng = fastrand::Rng::with_seed(self.rng.u64(..));
                Box::new(move |_: &TaskContext| {
                    let drift: Vec<Vector3<f32>> = (first..last)
                        .map(|_| random_drift(&mut rng) * DRIFT_SPEED * delta_seconds)
                        .collect();
                    let mut motion = motion.lock().unwrap_or_else(PoisonError::into_inner);
                    motion[first..last].copy_from_slice(&drift);
                }) as BoxedTask
            })
            .collect();

        let handle = self.engine_state.scheduler.handle();
        let completed_frames = self.completed_frames.clone();
        self.engine_state.scheduler.schedule_tasks(
            TaskCategory::GameLogic,
            tasks,
            move |_: &TaskContext| {
                handle.schedule_task(TaskCategory::MainThread, move |_: &TaskContext| {
                    completed_frames.fetch_add(1, Ordering::AcqRel);
                });
            },
        );
    }

    fn apply_motion(&mut self, delta_seconds: f32) {
        let mut motion = self.motion.lock().unwrap_or_else(PoisonError::into_inner);
        let transforms = &mut self.engine_state.transforms;

        transforms.rotate_y_by(self.root, ROOT_SPIN * delta_seconds);
        for (&entity, &drift) in self.entities.iter().zip(motion.iter()) {
            if drift != Vector3::zero() {
                transforms.move_by(entity, drift);
            }
        }
        // A slice whose task panicked must not replay last frame's drift.
        motion.fill(Vector3::zero());
    }

    /// The packed world transform of every entity.
    pub fn uniforms(&self) -> Vec<TransformUniform> {
        self.entities
            .iter()
            .map(|&entity| self.engine_state.transforms.uniform(entity))
            .collect()
    }
}

/// A random direction with length at most one.
fn random_drift(rng: &mut fastrand::Rng) -> Vector3<f32> {
    let direction = Vector3::new(rng.f32() - 0.5, rng.f32() - 0.5, rng.f32() - 0.5);
    if direction.magnitude2() > 0.0 {
        direction.normalize() * rng.f32()
    } else {
        direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entities: usize) -> EngineConfig {
        EngineConfig {
            cpu_cores: Some(2),
            demo_entities: entities,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn scene_has_chains_under_the_root() {
        let app = ApplicationState::with_rng(&config(8), fastrand::Rng::with_seed(1)).unwrap();
        let transforms = &app.engine_state.transforms;
        assert_eq!(transforms.len(), 9);

        let entities = app.entities();
        assert_eq!(transforms.parent(entities[0]), Some(app.root()));
        assert_eq!(transforms.parent(entities[3]), Some(entities[2]));
        assert_eq!(transforms.parent(entities[7]), Some(entities[6]));
    }

    #[test]
    fn each_frame_completes_its_game_logic() {
        let mut app = ApplicationState::with_rng(&config(10), fastrand::Rng::with_seed(7)).unwrap();
        let before: Vec<_> = app
            .entities()
            .iter()
            .map(|&e| app.engine_state.transforms.get(e).unwrap().local_position())
            .collect();

        for _ in 0..3 {
            let drain = app.frame(0.1);
            assert_eq!(drain.executed, 1);
        }
        assert_eq!(app.completed_frames(), 3);

        let moved = app
            .entities()
            .iter()
            .zip(&before)
            .filter(|&(&e, &start)| app.engine_state.transforms.get(e).unwrap().local_position() != start)
            .count();
        assert!(moved > 0);
    }

    #[test]
    fn drift_is_applied_only_once() {
        let mut app = ApplicationState::with_rng(&config(6), fastrand::Rng::with_seed(9)).unwrap();
        app.frame(0.1);
        let positions = |app: &ApplicationState| -> Vec<Vector3<f32>> {
            app.entities()
                .iter()
                .map(|&e| app.engine_state.transforms.get(e).unwrap().local_position())
                .collect()
        };
        let after_frame = positions(&app);

        // No game logic ran since the last frame.
        app.apply_motion(0.0);
        assert_eq!(positions(&app), after_frame);
        assert!(app.motion.lock().unwrap().iter().all(|drift| *drift == Vector3::zero()));
    }

    #[test]
    fn uniforms_track_world_opacity() {
        let mut app = ApplicationState::with_rng(&config(4), fastrand::Rng::with_seed(3)).unwrap();
        let root = app.root();
        app.engine_state.transforms.fade_to(root, 0.5);

        let uniforms = app.uniforms();
        assert_eq!(uniforms.len(), 4);
        assert!(uniforms.iter().all(|uniform| uniform.opacity() == 0.5));
    }

    #[test]
    fn run_reports_totals() {
        let mut app = ApplicationState::with_rng(&config(0), fastrand::Rng::with_seed(5)).unwrap();
        let summary = app.run(2);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.main_thread_tasks, 2);
        assert_eq!(app.completed_frames(), 2);
    }

    #[test]
    fn drift_is_bounded() {
        let mut rng = fastrand::Rng::with_seed(11);
        for _ in 0..100 {
            assert!(random_drift(&mut rng).magnitude() <= 1.0 + 1e-6);
        }
    }
}
