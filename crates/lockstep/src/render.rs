//! # Render Consumer
//!
//! One dedicated thread, one pass per output frame:
//!
//! ```text
//! frame N:
//!   canvas.begin_frame(N)
//!   for object in registration order:
//!       wait(graphics.wait)          <- token arrives from the last stage
//!       apply transform/reprogram     (presentation mailbox)
//!       draw buffer named by flag     (frozen until we post)
//!       post(graphics.post)          -> token goes back to physics
//!   canvas.end_frame(N)
//! ```
//!
//! The rendering API itself is external: objects draw into a [`Canvas`].
//! [`FrameRecorder`] is the built-in canvas; it keeps one [`DrawRecord`]
//! per object per frame with a CRC-32 digest of the vertex bytes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep_core::{Role, StageGate};
use lockstep_shared::{Transform, Vec3};

use crate::error::EngineResult;
use crate::model::Edge;
use crate::object::{ObjectId, SimObject, SimState};

// ============================================================================
// CANVAS
// ============================================================================

/// How an object asks to be drawn.
#[derive(Clone, Copy, Debug)]
pub enum DrawMode<'a> {
    /// Springs as line segments.
    Wireframe(&'a [Edge]),
    /// Vertices only.
    Points,
}

/// One draw request, borrowed from the object's state for the duration of
/// the call.
#[derive(Clone, Copy, Debug)]
pub struct DrawItem<'a> {
    /// Object being drawn.
    pub object: &'a ObjectId,
    /// Output frame.
    pub frame: u64,
    /// Completed physics laps of the buffer being drawn.
    pub lap: u64,
    /// Buffer-select flag at draw time.
    pub select: bool,
    /// Address of the storage being drawn.
    pub storage: usize,
    /// Presentation transform.
    pub transform: Transform,
    /// Presentation program.
    pub program: &'a str,
    /// Committed object-space positions.
    pub vertices: &'a [Vec3],
    /// Topology to draw.
    pub mode: DrawMode<'a>,
}

impl<'a> DrawItem<'a> {
    /// Describes the committed buffer of `state`.
    #[must_use]
    pub fn new(object: &'a ObjectId, frame: u64, state: &'a SimState, mode: DrawMode<'a>) -> Self {
        let positions = state.positions();
        Self {
            object,
            frame,
            lap: positions.swaps(),
            select: positions.select(),
            storage: positions.current().as_ptr() as usize,
            transform: state.transform(),
            program: state.program(),
            vertices: positions.current(),
            mode,
        }
    }
}

/// A draw target.
pub trait Canvas: Send {
    /// Called once before the first object of a frame.
    fn begin_frame(&mut self, _frame: u64) {}

    /// Draws one object.
    fn draw(&mut self, item: &DrawItem<'_>);

    /// Called once after the last object of a frame.
    fn end_frame(&mut self, _frame: u64) {}
}

// ============================================================================
// FRAME RECORDER
// ============================================================================

/// What a [`FrameRecorder`] keeps of one draw.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    /// Object drawn.
    pub object: ObjectId,
    /// Output frame.
    pub frame: u64,
    /// Physics lap of the drawn buffer.
    pub lap: u64,
    /// Buffer-select flag.
    pub select: bool,
    /// Address of the drawn storage.
    pub storage: usize,
    /// Vertices drawn.
    pub vertex_count: usize,
    /// Springs drawn (0 for point clouds).
    pub edge_count: usize,
    /// CRC-32 of the raw vertex bytes.
    pub digest: u32,
    /// Presentation transform.
    pub transform: Transform,
    /// Presentation program.
    pub program: String,
}

impl DrawRecord {
    /// Captures a draw request.
    #[must_use]
    pub fn capture(item: &DrawItem<'_>) -> Self {
        Self {
            object: item.object.clone(),
            frame: item.frame,
            lap: item.lap,
            select: item.select,
            storage: item.storage,
            vertex_count: item.vertices.len(),
            edge_count: match item.mode {
                DrawMode::Wireframe(edges) => edges.len(),
                DrawMode::Points => 0,
            },
            digest: digest(item.vertices),
            transform: item.transform,
            program: item.program.to_string(),
        }
    }
}

/// CRC-32 of a vertex buffer's bytes.
#[must_use]
pub fn digest(vertices: &[Vec3]) -> u32 {
    crc32fast::hash(bytemuck::cast_slice(vertices))
}

/// Canvas that records every draw.
#[derive(Clone, Debug, Default)]
pub struct FrameRecorder {
    records: Vec<DrawRecord>,
    frames: u64,
}

impl FrameRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every draw, in order.
    #[must_use]
    pub fn records(&self) -> &[DrawRecord] {
        &self.records
    }

    /// Draws of one object, in frame order.
    pub fn records_for<'a>(&'a self, object: &'a ObjectId) -> impl Iterator<Item = &'a DrawRecord> + 'a {
        self.records.iter().filter(move |r| &r.object == object)
    }

    /// Completed frames.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Folds every digest into one value, for comparing whole runs.
    #[must_use]
    pub fn run_digest(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for record in &self.records {
            hasher.update(&record.digest.to_le_bytes());
        }
        hasher.finalize()
    }
}

impl Canvas for FrameRecorder {
    fn draw(&mut self, item: &DrawItem<'_>) {
        self.records.push(DrawRecord::capture(item));
    }

    fn end_frame(&mut self, _frame: u64) {
        self.frames += 1;
    }
}

// ============================================================================
// RENDER CONSUMER
// ============================================================================

/// Render statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Completed frames.
    pub frames: u64,
    /// Objects drawn, summed over frames.
    pub draws: u64,
    /// Wall-clock time spent.
    pub elapsed: Duration,
}

/// Drives the graphics gate of every registered object.
#[derive(Debug, Default)]
pub struct RenderConsumer {
    targets: Vec<(Arc<SimObject>, StageGate)>,
    frame: u64,
}

impl RenderConsumer {
    /// Creates a consumer over every object that has a graphics stage, in
    /// the given order. Objects without one are skipped.
    #[must_use]
    pub fn new<'a>(objects: impl IntoIterator<Item = &'a Arc<SimObject>>) -> Self {
        let targets = objects
            .into_iter()
            .filter_map(|object| {
                let gate = object.ring().gate(Role::GRAPHICS.as_str())?.clone();
                Some((Arc::clone(object), gate))
            })
            .collect();
        Self { targets, frame: 0 }
    }

    /// Objects drawn each frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if there is nothing to draw.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Next frame number.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` if a ring was closed mid-frame.
    pub fn render_frame(&mut self, canvas: &mut dyn Canvas) -> EngineResult<()> {
        let frame = self.frame;
        canvas.begin_frame(frame);
        for (object, gate) in &self.targets {
            object.run_stage(gate, |state| {
                object.apply_presentation(state);
                if let Some(drawable) = object.capabilities().drawable() {
                    drawable.draw(object.id(), frame, object.model(), state, canvas);
                }
            })?;
        }
        canvas.end_frame(frame);
        self.frame += 1;
        Ok(())
    }

    /// Runs `frames` frames.
    ///
    /// # Errors
    ///
    /// Stops at the first failing frame.
    pub fn run(&mut self, frames: u64, canvas: &mut dyn Canvas) -> EngineResult<RenderStats> {
        let start = Instant::now();
        let mut stats = RenderStats::default();
        for _ in 0..frames {
            self.render_frame(canvas)?;
            stats.frames += 1;
            stats.draws += self.targets.len() as u64;
        }
        stats.elapsed = start.elapsed();
        tracing::debug!(frames = stats.frames, draws = stats.draws, "render consumer finished");
        Ok(stats)
    }
}
