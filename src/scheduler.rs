//! Background compute for the road pipeline.
//!
//! Every job runs on its own worker thread and reports back over a channel tagged with
//! the generation of the base result it was computed from. Results of superseded jobs
//! are dropped on the polling side, so a restarted job never has to be joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::base::operator::{RoadBaseOperator, RoadBaseOperatorData};
use crate::config::RoadMeshConfig;
use crate::error::{Error, Result};
use crate::ops::{DerivedOp, DerivedOutput, MeshOutput, SplineMeshOutput};
use crate::preset::RoadPreset;
use crate::result::GeometryResult;
use crate::road::snapshot::RoadSplineSnapshot;

/// Cooperative cancellation as seen by an operator.
pub trait Progress: Sync {
    fn cancelled(&self) -> bool;

    fn check(&self) -> Result<()> {
        if self.cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// For synchronous callers.
pub struct NeverCancel;

impl Progress for NeverCancel {
    fn cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Progress for CancelToken {
    fn cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub type Generation = u64;

struct Running {
    ticket: u64,
    token: CancelToken,
}

/// One restartable background job producing a `T`.
pub struct BackgroundCompute<T> {
    tx: Sender<(u64, Generation, T)>,
    rx: Receiver<(u64, Generation, T)>,
    next_ticket: u64,
    running: Option<Running>,
}

impl<T: Send + 'static> Default for BackgroundCompute<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> BackgroundCompute<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, next_ticket: 0, running: None }
    }

    /// Run `job` on a worker thread. A job still running is cancelled and its result
    /// will never be returned.
    pub fn start<F>(&mut self, generation: Generation, job: F)
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.cancel();
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let token = CancelToken::new();
        let worker_token = token.clone();
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let value = job(&worker_token);
            if !worker_token.cancelled() {
                // the receiver only goes away with the owner
                let _ = tx.send((ticket, generation, value));
            }
        });
        self.running = Some(Running { ticket, token });
    }

    /// Result of the current job once it is done. Anything from an older job is dropped.
    pub fn poll(&mut self) -> Option<(Generation, T)> {
        while let Ok((ticket, generation, value)) = self.rx.try_recv() {
            if self.running.as_ref().map_or(false, |r| r.ticket == ticket) {
                self.running = None;
                return Some((generation, value));
            }
            log::trace!("dropping stale result of job {ticket}");
        }
        None
    }

    pub fn cancel(&mut self) {
        if let Some(r) = self.running.take() {
            r.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl<T> Drop for BackgroundCompute<T> {
    fn drop(&mut self) {
        if let Some(r) = &self.running {
            r.token.cancel();
        }
    }
}

/// What changed since the last pass. Geometry outranks attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyKind {
    /// Preset or derived-op settings: the base result stays valid
    Attributes,
    /// Snapshots or base settings
    Geometry,
}

/// Latest published outputs, all computed from the same base generation.
#[derive(Debug, Clone, Default)]
pub struct PipelineResults {
    pub generation: Generation,
    pub base: Option<GeometryResult>,
    pub drive_surface: Option<MeshOutput>,
    pub decals: Option<MeshOutput>,
    pub sidewalks: Option<MeshOutput>,
    pub curbs: Option<MeshOutput>,
    pub marks: Option<MeshOutput>,
    pub spline_mesh: Option<SplineMeshOutput>,
}

impl PipelineResults {
    fn clear_derived(&mut self) {
        self.drive_surface = None;
        self.decals = None;
        self.sidewalks = None;
        self.curbs = None;
        self.marks = None;
        self.spline_mesh = None;
    }

    fn store(&mut self, op: DerivedOp, output: DerivedOutput) {
        match (op, output) {
            (DerivedOp::DriveSurface, DerivedOutput::Mesh(m)) => self.drive_surface = Some(m),
            (DerivedOp::Decals, DerivedOutput::Mesh(m)) => self.decals = Some(m),
            (DerivedOp::Sidewalks, DerivedOutput::Mesh(m)) => self.sidewalks = Some(m),
            (DerivedOp::Curbs, DerivedOutput::Mesh(m)) => self.curbs = Some(m),
            (DerivedOp::Marks, DerivedOutput::Mesh(m)) => self.marks = Some(m),
            (DerivedOp::SplineMesh, DerivedOutput::Segments(s)) => self.spline_mesh = Some(s),
            (op, _) => log::warn!("{op:?} produced an unexpected output kind"),
        }
    }

    /// Every derived op has reported for this generation.
    pub fn is_complete(&self) -> bool {
        self.drive_surface.is_some()
            && self.decals.is_some()
            && self.sidewalks.is_some()
            && self.curbs.is_some()
            && self.marks.is_some()
            && self.spline_mesh.is_some()
    }
}

/// Chains the base pass and the derived ops of one road network, driven by `tick`.
pub struct RoadPipeline {
    snapshots: Vec<Arc<RoadSplineSnapshot>>,
    config: RoadMeshConfig,
    preset: Arc<RoadPreset>,
    dirty: Option<DirtyKind>,
    generation: Generation,
    base_job: BackgroundCompute<RoadBaseOperatorData>,
    base: Option<(Generation, Arc<RoadBaseOperatorData>)>,
    derived_jobs: Vec<(DerivedOp, BackgroundCompute<DerivedOutput>)>,
    results: PipelineResults,
}

impl RoadPipeline {
    pub fn new(snapshots: Vec<Arc<RoadSplineSnapshot>>, config: RoadMeshConfig, preset: RoadPreset) -> Self {
        Self {
            snapshots,
            config,
            preset: Arc::new(preset),
            dirty: Some(DirtyKind::Geometry),
            generation: 0,
            base_job: BackgroundCompute::new(),
            base: None,
            derived_jobs: DerivedOp::ALL.iter().map(|&op| (op, BackgroundCompute::new())).collect(),
            results: PipelineResults::default(),
        }
    }

    pub fn mark_dirty(&mut self, kind: DirtyKind) {
        self.dirty = Some(self.dirty.map_or(kind, |d| d.max(kind)));
    }

    pub fn set_snapshots(&mut self, snapshots: Vec<Arc<RoadSplineSnapshot>>) {
        self.snapshots = snapshots;
        self.mark_dirty(DirtyKind::Geometry);
    }

    pub fn set_config(&mut self, config: RoadMeshConfig) {
        let kind = if config.base != self.config.base { DirtyKind::Geometry } else { DirtyKind::Attributes };
        self.config = config;
        self.mark_dirty(kind);
    }

    pub fn set_preset(&mut self, preset: RoadPreset) {
        self.preset = Arc::new(preset);
        self.mark_dirty(DirtyKind::Attributes);
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn base(&self) -> Option<&Arc<RoadBaseOperatorData>> {
        self.base.as_ref().map(|(_, b)| b)
    }

    pub fn results(&self) -> &PipelineResults {
        &self.results
    }

    /// Work is queued or running.
    pub fn is_busy(&self) -> bool {
        self.dirty.is_some() || self.base_job.is_running() || self.derived_jobs.iter().any(|(_, j)| j.is_running())
    }

    /// Restart whatever the dirty flag asks for and collect finished jobs. Returns true
    /// when a new result was published.
    pub fn tick(&mut self) -> bool {
        match self.dirty.take() {
            Some(DirtyKind::Geometry) => self.start_base(),
            Some(DirtyKind::Attributes) if self.base.is_some() && !self.base_job.is_running() => self.start_derived(),
            Some(DirtyKind::Attributes) => {
                if !self.base_job.is_running() {
                    self.start_base();
                }
            }
            None => {}
        }

        let mut published = false;
        if let Some((generation, data)) = self.base_job.poll() {
            log::debug!("base generation {generation}: {:?}", data.result.kind);
            self.results.generation = generation;
            self.results.base = Some(data.result.clone());
            self.base = Some((generation, Arc::new(data)));
            self.start_derived();
            published = true;
        }

        let current = self.base.as_ref().map(|(g, _)| *g);
        for (op, job) in &mut self.derived_jobs {
            if let Some((generation, output)) = job.poll() {
                if Some(generation) == current {
                    self.results.store(*op, output);
                    published = true;
                } else {
                    log::trace!("{op:?}: dropping result of generation {generation}");
                }
            }
        }
        published
    }

    fn start_base(&mut self) {
        self.generation += 1;
        for (_, job) in &mut self.derived_jobs {
            job.cancel();
        }
        let operator = RoadBaseOperator::new(self.snapshots.clone(), self.config.base.clone());
        self.base_job.start(self.generation, move |token| operator.calculate(token));
    }

    fn start_derived(&mut self) {
        let Some((generation, base)) = self.base.clone() else { return };
        self.results.clear_derived();
        for (op, job) in &mut self.derived_jobs {
            let (op, base, preset, config) = (*op, base.clone(), self.preset.clone(), self.config.clone());
            job.start(generation, move |token| op.run(&config, &base, &preset, token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<T: Send + 'static>(job: &mut BackgroundCompute<T>) -> Option<(Generation, T)> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(r) = job.poll() {
                return Some(r);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn restart_drops_the_older_result() {
        let mut job = BackgroundCompute::new();
        job.start(1, |_| {
            std::thread::sleep(Duration::from_millis(50));
            "old"
        });
        job.start(2, |_| "new");
        assert_eq!(wait_for(&mut job), Some((2, "new")));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(job.poll(), None);
        assert!(!job.is_running());
    }

    #[test]
    fn cancel_stops_a_cooperative_job() {
        let mut job = BackgroundCompute::new();
        job.start(1, |token: &CancelToken| {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !token.cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            token.cancelled()
        });
        assert!(job.is_running());
        job.cancel();
        assert!(!job.is_running());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(job.poll(), None);
    }

    #[test]
    fn token_check() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.clone().cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
        assert!(NeverCancel.check().is_ok());
    }

    #[test]
    fn dirty_kinds_escalate() {
        let mut pipeline = RoadPipeline::new(Vec::new(), RoadMeshConfig::default(), RoadPreset::default());
        pipeline.dirty = None;
        pipeline.mark_dirty(DirtyKind::Attributes);
        pipeline.mark_dirty(DirtyKind::Geometry);
        pipeline.mark_dirty(DirtyKind::Attributes);
        assert_eq!(pipeline.dirty, Some(DirtyKind::Geometry));
    }
}
