//! Heap workloads

use rand::Rng;
use stress_herd_core::{ExitStatus, StressClass, StressContext, Stressor};

const DEFAULT_BIGHEAP_GROWTH: usize = 64 * 1024;
const DEFAULT_MALLOC_SLOTS: usize = 32 * 1024;
const DEFAULT_MALLOC_MAX: usize = 64 * 1024;

/// Grows one heap allocation until memory runs out, then starts over
///
/// Workers are made preferred OOM-killer victims, so a kill here is the
/// expected way out under pressure and the supervisor restarts the slot.
#[derive(Debug, Clone, Copy)]
pub struct BigHeap {
    /// Bytes added per bogo-op, rounded down to whole pages
    pub growth: usize,
}

impl Default for BigHeap {
    fn default() -> Self {
        Self {
            growth: DEFAULT_BIGHEAP_GROWTH,
        }
    }
}

impl Stressor for BigHeap {
    fn name(&self) -> &str {
        "bigheap"
    }

    fn class(&self) -> StressClass {
        StressClass::OS | StressClass::VM
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let page = ctx.page_size.max(1);
        let growth = (self.growth.max(page) / page) * page;
        let mut heap: Vec<u8> = Vec::new();
        let mut nomems = 0u32;

        while ctx.keep_stressing() {
            let old = heap.len();
            if heap.try_reserve_exact(growth).is_err() {
                tracing::debug!(
                    worker = %ctx.name,
                    size_mb = old >> 20,
                    instance = ctx.instance,
                    "out of memory, starting over"
                );
                heap = Vec::new();
                nomems += 1;
                continue;
            }
            // Touch one byte per page of the new tail.
            heap.resize(old + growth, 0);
            for (i, byte) in heap[old..].iter_mut().enumerate().step_by(page) {
                if !ctx.keep_running() {
                    return ExitStatus::Success;
                }
                *byte = i as u8;
            }
            if heap[old..]
                .iter()
                .enumerate()
                .step_by(page)
                .any(|(i, &b)| b != i as u8)
            {
                tracing::error!(worker = %ctx.name, "heap contents changed under us");
                return ExitStatus::NotSuccess;
            }
            ctx.inc();
        }
        if nomems > 0 {
            tracing::debug!(worker = %ctx.name, nomems, "out of memory restarts");
        }
        ExitStatus::Success
    }
}

/// Random allocate, free and resize churn across a table of slots
#[derive(Debug, Clone, Copy)]
pub struct Malloc {
    /// Live allocations kept at most
    pub slots: usize,
    /// Largest single allocation in bytes
    pub max_bytes: usize,
}

impl Default for Malloc {
    fn default() -> Self {
        Self {
            slots: DEFAULT_MALLOC_SLOTS,
            max_bytes: DEFAULT_MALLOC_MAX,
        }
    }
}

impl Stressor for Malloc {
    fn name(&self) -> &str {
        "malloc"
    }

    fn class(&self) -> StressClass {
        StressClass::CPU | StressClass::MEMORY | StressClass::OS
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let slots = self.slots.max(1);
        let max = self.max_bytes.max(1);
        let mut table: Vec<Option<Vec<u8>>> = vec![None; slots];

        while ctx.keep_stressing() {
            let i = ctx.rng.gen_range(0..slots);
            let len = ctx.rng.gen_range(1..=max);
            match table[i].take() {
                Some(mut block) if ctx.rng.gen_bool(0.5) => {
                    if block.try_reserve_exact(len.saturating_sub(block.len())).is_err() {
                        return ExitStatus::NoResource;
                    }
                    block.resize(len, 0xa5);
                    table[i] = Some(block);
                }
                Some(_) => {}
                None => {
                    let mut block = Vec::new();
                    if block.try_reserve_exact(len).is_err() {
                        return ExitStatus::NoResource;
                    }
                    block.resize(len, 0x5a);
                    table[i] = Some(block);
                }
            }
            ctx.inc();
        }
        ExitStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_bounded;

    #[test]
    fn test_bigheap_grows_per_op() {
        let heap = BigHeap { growth: 8192 };
        let (status, ops) = run_bounded(&heap, 16);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ops, 16);
    }

    #[test]
    fn test_bigheap_growth_below_a_page_still_progresses() {
        let heap = BigHeap { growth: 1 };
        let (status, ops) = run_bounded(&heap, 4);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ops, 4);
    }

    #[test]
    fn test_malloc_churn() {
        let malloc = Malloc {
            slots: 8,
            max_bytes: 4096,
        };
        let (status, ops) = run_bounded(&malloc, 500);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ops, 500);
    }
}
