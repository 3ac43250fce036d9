//! Drives a full verification run: one instance per destination device,
//! executed by a fixed set of worker threads in batches, drawing predicate
//! engines from a shared pool.
//!
//! Batches are a memory bound, not a scheduling unit: every instance of a
//! batch is finished before the next batch starts, so peak engine state is
//! proportional to the pool size rather than the instance count. A panicking
//! instance is reported as failed and contributes no verdicts; its engine
//! still goes back to the pool.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use tracing::{debug, info, warn};

use plover_bdd::PredicateEngine;
use plover_ir::{Invariant, VerifyContext};

use crate::error::VerifyError;
use crate::instance::{VerifyInstance, UNIVERSAL_SPACE};
use crate::pool::EnginePool;
use crate::report::{BatchStats, FailedInstance, RunReport, Verdict};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Instances per batch.
    pub batch_size: usize,
    /// Worker threads; defaults to the pool size.
    pub workers: Option<usize>,
    /// Pool slots; defaults to `min(parallelism, instances / 2)`, at least 1.
    pub pool_size: Option<usize>,
    /// How long a worker waits for a pooled engine before cloning the seed.
    pub lease_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            batch_size: 500_000,
            workers: None,
            pool_size: None,
            lease_timeout: Duration::from_secs(10),
        }
    }
}

/// One instance per destination device. Destinations without configured
/// invariants get the default: at least one path, any packet.
pub fn build_instances(ctx: &VerifyContext) -> Vec<VerifyInstance> {
    ctx.destination_devices()
        .map(|device| {
            let invariants = ctx
                .invariants
                .get(&device.name)
                .cloned()
                .unwrap_or_else(|| vec![Invariant::exist_at_least(1, UNIVERSAL_SPACE)]);
            VerifyInstance::new(&device.name, invariants)
        })
        .collect()
}

/// Build the seed engine and pre-encode every context predicate, so all
/// pooled clones share the encodings and the prefix cache. The retains stay
/// with the seed; instances never release them.
fn warm_seed(ctx: &VerifyContext) -> Result<PredicateEngine, VerifyError> {
    let mut engine = PredicateEngine::new(ctx.family);
    for device in ctx.devices.values() {
        for lec in &device.lecs {
            engine.encode_dst_prefix_list(&lec.prefixes)?;
        }
    }
    for prefixes in ctx.packet_spaces.values() {
        engine.encode_dst_prefix_list(prefixes)?;
    }
    debug!(
        bytes = engine.memory_estimate(),
        "seed engine warmed"
    );
    Ok(engine)
}

fn default_pool_size(instance_count: usize) -> usize {
    let procs = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    procs.min((instance_count / 2).max(1))
}

/// Verify every destination in the context and collect the verdicts.
pub fn run(ctx: &VerifyContext, config: &RunnerConfig) -> Result<RunReport, VerifyError> {
    ctx.validate()?;
    let instances = build_instances(ctx);
    let pool_size = config
        .pool_size
        .unwrap_or_else(|| default_pool_size(instances.len()));
    let workers = config.workers.unwrap_or(pool_size).max(1);
    let batch_size = config.batch_size.max(1);
    info!(
        instances = instances.len(),
        pool_size, workers, batch_size, "verification run starting"
    );

    let started = Instant::now();
    let seed = Arc::new(warm_seed(ctx)?);
    let pool = EnginePool::new(seed, pool_size);
    let mut verdicts: Vec<Verdict> = Vec::new();
    let mut failed: Vec<FailedInstance> = Vec::new();
    let mut batches: Vec<BatchStats> = Vec::new();

    for (batch_index, batch) in instances.chunks(batch_size).enumerate() {
        let batch_started = Instant::now();
        let (job_tx, job_rx) = unbounded::<&VerifyInstance>();
        let (result_tx, result_rx) = unbounded::<Result<Vec<Verdict>, FailedInstance>>();
        for instance in batch {
            let _ = job_tx.send(instance);
        }
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let pool = &pool;
                scope.spawn(move || {
                    while let Ok(instance) = job_rx.recv() {
                        let mut lease = pool.acquire(config.lease_timeout);
                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            instance.run(ctx, &mut lease)
                        }));
                        let message = match outcome {
                            Ok(Ok(batch_verdicts)) => Ok(batch_verdicts),
                            Ok(Err(err)) => Err(FailedInstance {
                                destination: instance.destination.clone(),
                                reason: err.to_string(),
                            }),
                            Err(payload) => Err(FailedInstance {
                                destination: instance.destination.clone(),
                                reason: panic_message(payload),
                            }),
                        };
                        let _ = result_tx.send(message);
                    }
                });
            }
        });
        drop(result_tx);

        for result in result_rx.try_iter() {
            match result {
                Ok(batch_verdicts) => verdicts.extend(batch_verdicts),
                Err(failure) => {
                    warn!(
                        destination = %failure.destination,
                        reason = %failure.reason,
                        "instance failed"
                    );
                    failed.push(failure);
                }
            }
        }
        let stats = BatchStats {
            instances: batch.len(),
            elapsed_ms: batch_started.elapsed().as_millis() as u64,
        };
        debug!(
            batch = batch_index,
            instances = stats.instances,
            elapsed_ms = stats.elapsed_ms,
            "batch finished"
        );
        batches.push(stats);
    }

    let report = RunReport {
        verdicts,
        failed,
        pool: pool.metrics(),
        instance_count: instances.len(),
        batches,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        verdicts = report.verdicts.len(),
        failed = report.failed.len(),
        reuse_ratio = report.pool.reuse_ratio(),
        "verification run finished"
    );
    Ok(report)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "instance panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plover_bdd::AddressFamily;
    use plover_ir::{Device, Topology};

    #[test]
    fn destinations_without_invariants_get_the_default() {
        let mut ctx = VerifyContext::new(AddressFamily::V4, Topology::default());
        ctx.add_device(Device::destination("d1"));
        ctx.add_device(Device::new("mid"));
        ctx.add_device(Device::destination("d2"));
        ctx.add_invariant("d2", Invariant::exist_at_least(3, "edge"));

        let instances = build_instances(&ctx);
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].destination, "d1");
        assert_eq!(
            instances[0].invariants,
            vec![Invariant::exist_at_least(1, UNIVERSAL_SPACE)]
        );
        assert_eq!(
            instances[1].invariants,
            vec![Invariant::exist_at_least(3, "edge")]
        );
    }

    #[test]
    fn pool_sizing_never_drops_to_zero() {
        assert_eq!(default_pool_size(0), 1);
        assert_eq!(default_pool_size(1), 1);
        assert!(default_pool_size(1_000_000) >= 1);
    }
}
