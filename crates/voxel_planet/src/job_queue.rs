//! Worker pool for chunk generation and meshing
//!
//! CPU-heavy work runs on plain worker threads; the control loop submits
//! jobs and drains results on its own tick. Workers observe the per-chunk
//! cancellation flag at phase boundaries and contain panics per job so one
//! bad chunk cannot take the pool down.

use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::IVec3;
use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::boundary::BoundaryStore;
use crate::chunk::{build_chunk_mesh, Chunk};
use crate::density::PlanetField;
use crate::mesh::{MeshData, SurfacePoint, SurfacePointConfig};

/// Jobs the control loop hands to the pool
pub(crate) enum ChunkJob {
    /// Fill a fresh chunk's density lattice
    Generate {
        coord: IVec3,
        cancel: Arc<AtomicBool>,
    },

    /// Mesh a lattice snapshot; `revision` guards against stale installs
    Mesh {
        coord: IVec3,
        revision: u64,
        samples: Box<[f32]>,
    },
}

/// Completed work returned to the control loop
pub(crate) enum JobResult {
    Generated {
        coord: IVec3,
        chunk: Box<Chunk>,
        elapsed_ms: f32,
    },
    Cancelled {
        coord: IVec3,
    },
    Meshed {
        coord: IVec3,
        revision: u64,
        mesh: Option<MeshData>,
        points: Vec<SurfacePoint>,
        elapsed_ms: f32,
    },
    MeshFailed {
        coord: IVec3,
        revision: u64,
        reason: String,
    },
}

/// Shared context the workers evaluate against
struct WorkerContext {
    field: Arc<PlanetField>,
    store: Arc<BoundaryStore>,
    resolution: usize,
    chunk_size: f32,
    surface_config: SurfacePointConfig,
}

pub(crate) struct WorkerPool {
    job_tx: Option<Sender<ChunkJob>>,
    result_rx: Receiver<JobResult>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        field: Arc<PlanetField>,
        store: Arc<BoundaryStore>,
        resolution: usize,
        chunk_size: f32,
        surface_config: SurfacePointConfig,
    ) -> Self {
        let (job_tx, job_rx) = unbounded::<ChunkJob>();
        let (result_tx, result_rx) = unbounded::<JobResult>();

        let context = Arc::new(WorkerContext {
            field,
            store,
            resolution,
            chunk_size,
            surface_config,
        });

        let mut handles = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let context = Arc::clone(&context);
            handles.push(std::thread::spawn(move || {
                // Runs until the control side drops its sender
                for job in job_rx.iter() {
                    if let Some(result) = process_job(&context, job) {
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                }
            }));
        }

        Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
        }
    }

    pub fn submit(&self, job: ChunkJob) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(job);
        }
    }

    /// Collect every finished result without blocking.
    pub fn drain(&self) -> Vec<JobResult> {
        self.result_rx.try_iter().collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel stops the workers at their next recv
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn process_job(context: &WorkerContext, job: ChunkJob) -> Option<JobResult> {
    match job {
        ChunkJob::Generate { coord, cancel } => {
            let start = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut chunk = Chunk::new(coord, context.resolution, context.chunk_size);
                let completed =
                    chunk.generate_density_field(&context.field, &context.store, Some(&cancel));
                (completed, chunk)
            }));

            match outcome {
                Ok((true, chunk)) => Some(JobResult::Generated {
                    coord,
                    chunk: Box::new(chunk),
                    elapsed_ms: start.elapsed().as_secs_f32() * 1000.0,
                }),
                Ok((false, _)) => Some(JobResult::Cancelled { coord }),
                Err(panic) => {
                    error!("panic in generate worker for chunk {coord:?}: {panic:?}");
                    Some(JobResult::Cancelled { coord })
                }
            }
        }

        ChunkJob::Mesh {
            coord,
            revision,
            samples,
        } => {
            let start = Instant::now();
            let base = coord * context.resolution as i32;
            let voxel_step = context.chunk_size / context.resolution as f32;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                build_chunk_mesh(
                    &samples,
                    context.resolution,
                    base,
                    voxel_step,
                    &context.field,
                    &context.surface_config,
                )
            }));

            match outcome {
                Ok(Ok((mesh, points))) => Some(JobResult::Meshed {
                    coord,
                    revision,
                    mesh,
                    points,
                    elapsed_ms: start.elapsed().as_secs_f32() * 1000.0,
                }),
                Ok(Err(err)) => Some(JobResult::MeshFailed {
                    coord,
                    revision,
                    reason: err.to_string(),
                }),
                Err(panic) => {
                    error!("panic in mesh worker for chunk {coord:?}: {panic:?}");
                    Some(JobResult::MeshFailed {
                        coord,
                        revision,
                        reason: "panic during meshing".to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::time::Duration;

    fn pool() -> (WorkerPool, Arc<PlanetField>) {
        let mut config = EngineConfig::default();
        config.seed = 1;
        config.planet.radius = 60.0;
        config.terrain_layers.clear();
        config.caves.enabled = false;
        let field = Arc::new(PlanetField::new(&config));
        let store = Arc::new(BoundaryStore::new(16, 1.0));
        let pool = WorkerPool::new(
            2,
            Arc::clone(&field),
            store,
            16,
            16.0,
            SurfacePointConfig::default(),
        );
        (pool, field)
    }

    fn wait_for_results(pool: &WorkerPool, count: usize) -> Vec<JobResult> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut results = Vec::new();
        while results.len() < count && Instant::now() < deadline {
            results.extend(pool.drain());
            std::thread::sleep(Duration::from_millis(5));
        }
        results
    }

    #[test]
    fn generate_job_produces_filled_chunk() {
        let (pool, _) = pool();
        pool.submit(ChunkJob::Generate {
            coord: IVec3::new(3, 0, 0),
            cancel: Arc::new(AtomicBool::new(false)),
        });

        let results = wait_for_results(&pool, 1);
        assert_eq!(results.len(), 1);
        match &results[0] {
            JobResult::Generated { coord, chunk, .. } => {
                assert_eq!(*coord, IVec3::new(3, 0, 0));
                // Chunk [48, 64) crosses the radius-60 sphere
                assert!(!chunk.all_empty() && !chunk.all_solid());
            }
            _ => panic!("expected Generated result"),
        }
    }

    #[test]
    fn cancelled_generate_reports_cancelled() {
        let (pool, _) = pool();
        pool.submit(ChunkJob::Generate {
            coord: IVec3::ZERO,
            cancel: Arc::new(AtomicBool::new(true)),
        });

        let results = wait_for_results(&pool, 1);
        assert!(matches!(results[0], JobResult::Cancelled { coord } if coord == IVec3::ZERO));
    }

    #[test]
    fn mesh_job_returns_triangles_for_surface_chunk() {
        let (pool, field) = pool();
        let store = BoundaryStore::new(16, 1.0);
        let mut chunk = Chunk::new(IVec3::new(3, 0, 0), 16, 16.0);
        chunk.generate_density_field(&field, &store, None);

        pool.submit(ChunkJob::Mesh {
            coord: chunk.coord(),
            revision: chunk.revision(),
            samples: chunk.snapshot_lattice(),
        });

        let results = wait_for_results(&pool, 1);
        match &results[0] {
            JobResult::Meshed { mesh, revision, .. } => {
                assert_eq!(*revision, 0);
                assert!(mesh.as_ref().unwrap().triangle_count() > 0);
            }
            _ => panic!("expected Meshed result"),
        }
    }
}
