use comfy_table::{Cell, ContentArrangement, Table};
use indicatif::MultiProgress;
use log::{debug, info};
use pageheap_core::{BinHeap, HeapConfig, HeapDelegate, HeapError, ROOT, Slot};
use std::{error::Error, time::Duration};

use crate::{
    cli::{self, human_duration, human_rate},
    measure_time,
};

#[derive(thiserror::Error, Debug)]
pub enum StressError {
    #[error("round {round}, {phase}: {msg}")]
    Invariant {
        round: usize,
        phase: &'static str,
        msg: String,
    },
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Parameters of a stress run.
#[derive(Debug, Clone)]
pub struct StressOptions {
    /// Number of objects.
    pub items: usize,
    /// Operations in the replace and update phases.
    pub ops: usize,
    pub rounds: usize,
    pub seed: u64,
    /// Verify the whole heap after every operation.
    pub paranoid: bool,
    pub config: HeapConfig,
}

/// Timing of one phase of one round.
#[derive(Debug, Clone)]
pub struct PhaseStats {
    pub round: usize,
    pub phase: &'static str,
    pub ops: usize,
    pub duration: Duration,
    pub capacity: usize,
}

/// A fixed population of objects, each with a key and a heap slot.
struct Objects {
    keys: Vec<u64>,
    slots: Vec<Option<Slot>>,
}

impl HeapDelegate<u32> for Objects {
    #[inline(always)]
    fn less(&self, a: &u32, b: &u32) -> bool {
        self.keys[*a as usize] < self.keys[*b as usize]
    }

    #[inline(always)]
    fn reindex(&mut self, item: &u32, slot: Option<Slot>) {
        self.slots[*item as usize] = slot;
    }
}

struct Driver<'a> {
    opts: &'a StressOptions,
    heap: BinHeap<u32, Objects>,
    present: Vec<bool>,
    rng: fastrand::Rng,
    round: usize,
    progress: Option<&'a MultiProgress>,
}

impl<'a> Driver<'a> {
    fn fail(&self, phase: &'static str, msg: String) -> StressError {
        StressError::Invariant {
            round: self.round,
            phase,
            msg,
        }
    }

    fn key(&self, object: u32) -> u64 {
        self.heap.delegate().keys[object as usize]
    }

    fn slot(&self, object: u32) -> Option<Slot> {
        self.heap.delegate().slots[object as usize]
    }

    fn paranoia(&self, phase: &'static str) -> Result<(), StressError> {
        if self.opts.paranoid {
            self.heap
                .check()
                .map_err(|e| self.fail(phase, e.to_string()))?;
        }
        Ok(())
    }

    /// Returns the root object, checking that it knows it is the root.
    fn root(&self, phase: &'static str) -> Result<u32, StressError> {
        let root = *self
            .heap
            .root()
            .ok_or_else(|| self.fail(phase, "heap is unexpectedly empty".to_string()))?;
        if self.slot(root) != Some(ROOT) {
            return Err(self.fail(
                phase,
                format!("root object {} believes it is at {:?}", root, self.slot(root)),
            ));
        }
        Ok(root)
    }

    fn insert(&mut self, object: u32, key: u64) -> Result<(), StressError> {
        self.heap.delegate_mut().keys[object as usize] = key;
        self.heap.insert(object)?;
        self.present[object as usize] = true;
        Ok(())
    }

    fn phase<F>(&mut self, phase: &'static str, ops: usize, mut step: F) -> Result<PhaseStats, StressError>
    where
        F: FnMut(&mut Self) -> Result<(), StressError>,
    {
        let pb = match self.progress {
            Some(progress) if cli::should_use_progress_bar(ops) => {
                Some(cli::create_progress_bar(progress, ops, phase))
            }
            _ => None,
        };
        let tick = (ops / 100).max(1);

        let (result, duration) = measure_time!({
            let mut result = Ok(());
            for i in 0..ops {
                result = step(self);
                if result.is_err() {
                    break;
                }
                if i % tick == 0 {
                    if let Some(pb) = &pb {
                        pb.set_position(i as u64);
                    }
                }
            }
            result
        });
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        result?;

        debug!(
            "Round {} {}: {} ops in {}",
            self.round,
            phase,
            ops,
            human_duration(duration)
        );
        Ok(PhaseStats {
            round: self.round,
            phase,
            ops,
            duration,
            capacity: self.heap.capacity(),
        })
    }

    fn run_round(&mut self, stats: &mut Vec<PhaseStats>) -> Result<(), StressError> {
        let n = self.opts.items;
        let mut last = 0u64;

        // Fill up with every object
        let mut next_object = 0u32;
        stats.push(self.phase("insert", n, |d| {
            let object = next_object;
            next_object += 1;
            last = d.rng.u64(..);
            d.insert(object, last)?;

            let root = d.root("insert")?;
            if d.key(root) > last {
                return Err(d.fail("insert", format!("root key {} above new key {}", d.key(root), last)));
            }
            d.paranoia("insert")
        })?);

        // Replace the root with a fresh key
        stats.push(self.phase("replace", self.opts.ops, |d| {
            let root = d.root("replace")?;
            if d.key(root) > last {
                return Err(d.fail("replace", format!("root key {} above last key {}", d.key(root), last)));
            }
            d.heap.delete(ROOT)?;
            if d.slot(root).is_some() {
                return Err(d.fail("replace", format!("deleted object {} still has a slot", root)));
            }

            last = d.rng.u64(..);
            d.insert(root, last)?;
            d.paranoia("replace")
        })?);

        // Drain in order
        let mut prev = 0u64;
        stats.push(self.phase("drain", n, |d| {
            let root = d.root("drain")?;
            let key = d.key(root);
            if key < prev {
                return Err(d.fail("drain", format!("key {} after {}", key, prev)));
            }
            prev = key;
            d.heap.delete(ROOT)?;
            d.present[root as usize] = false;
            d.paranoia("drain")
        })?);

        // Random deletes, re-keys and inserts
        stats.push(self.phase("update", self.opts.ops, |d| {
            let object = d.rng.u32(0..n as u32);
            if !d.present[object as usize] {
                let key = d.rng.u64(..);
                return d.insert(object, key).and_then(|_| d.paranoia("update"));
            }

            let slot = d
                .slot(object)
                .ok_or_else(|| d.fail("update", format!("object {} has no slot", object)))?;
            if d.key(object) & 1 == 1 {
                d.heap.delete(slot)?;
                if d.slot(object).is_some() {
                    return Err(d.fail("update", format!("deleted object {} still has a slot", object)));
                }
                d.present[object as usize] = false;
            } else {
                d.heap.delegate_mut().keys[object as usize] = d.rng.u64(..);
                let settled = d.heap.reorder(slot)?;
                if d.slot(object) != Some(settled) {
                    return Err(d.fail("update", format!("object {} lost track of slot {}", object, settled)));
                }
            }
            d.paranoia("update")
        })?);

        // Leave the heap empty for the next round
        while let Some(object) = self.heap.pop() {
            self.present[object as usize] = false;
        }
        self.heap.check()?;
        Ok(())
    }
}

/// Runs the stress workload and returns per-phase statistics.
pub fn run(opts: &StressOptions, progress: Option<&MultiProgress>) -> Result<Vec<PhaseStats>, StressError> {
    let objects = Objects {
        keys: vec![0; opts.items],
        slots: vec![None; opts.items],
    };
    let mut driver = Driver {
        opts,
        heap: BinHeap::with_config(opts.config.clone(), objects)?,
        present: vec![false; opts.items],
        rng: fastrand::Rng::with_seed(opts.seed),
        round: 0,
        progress,
    };

    let mut stats = Vec::new();
    for round in 0..opts.rounds {
        driver.round = round;
        driver.run_round(&mut stats)?;
    }

    if let Err(heap) = driver.heap.destroy() {
        return Err(StressError::Invariant {
            round: opts.rounds,
            phase: "destroy",
            msg: format!("{} object(s) left in the heap", heap.len()),
        });
    }
    Ok(stats)
}

/// CLI entry point.
pub fn stress(opts: StressOptions, no_progress_bar: bool) -> Result<(), Box<dyn Error>> {
    let progress = cli::init_logging();
    info!(
        "Stress: {} objects, {} ops/phase, {} round(s), seed {}, {:?}",
        opts.items,
        opts.ops,
        opts.rounds,
        opts.seed,
        opts.config.validate()?
    );

    let progress = if no_progress_bar { None } else { Some(&progress) };
    let (stats, total) = measure_time!({ run(&opts, progress)? });

    print_summary(&stats);
    info!("Total runtime: {}", human_duration(total));
    Ok(())
}

fn print_summary(stats: &[PhaseStats]) {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Round", "Phase", "Ops", "Time", "Rate", "Capacity"]);

    for s in stats {
        table.add_row(vec![
            Cell::new(s.round),
            Cell::new(s.phase),
            Cell::new(s.ops),
            Cell::new(human_duration(s.duration)),
            Cell::new(human_rate(s.ops, s.duration)),
            Cell::new(s.capacity),
        ]);
    }
    println!("{table}");
}
