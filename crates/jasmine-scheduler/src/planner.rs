//! GPU allocation planning
//!
//! `plan` is a pure function of the ordered GPU ids and the process count.
//! With at least as many GPUs as processes, ids are split into contiguous
//! slices and the first `G mod P` processes take one extra id. With fewer
//! GPUs than processes, ids are handed out round-robin so GPUs are shared.
//! Without GPUs, every process runs CPU-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device visibility variable
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

/// Process-local index variable
pub const PROCESS_INDEX_VAR: &str = "JASMINE_PROCESS_INDEX";

/// GPUs and launch environment for one worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub process_index: u32,
    pub gpu_ids: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Allocation {
    fn new(process_index: u32, gpu_ids: Vec<String>) -> Self {
        let mut env = BTreeMap::new();
        if !gpu_ids.is_empty() {
            env.insert(CUDA_VISIBLE_DEVICES.to_string(), gpu_ids.join(","));
        }
        env.insert(PROCESS_INDEX_VAR.to_string(), process_index.to_string());
        Self {
            process_index,
            gpu_ids,
            env,
        }
    }

    /// Allocation variables followed by `extra`, skipping extra keys that
    /// would shadow an allocation variable
    pub fn launch_env(&self, extra: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.extend(
            extra
                .iter()
                .filter(|(k, _)| !self.env.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        vars
    }
}

/// Assign GPU subsets to processes `0..num_processes`
pub fn plan(gpu_ids: &[String], num_processes: u32) -> Vec<Allocation> {
    let p = num_processes as usize;
    let g = gpu_ids.len();

    if g == 0 {
        return (0..num_processes)
            .map(|idx| Allocation::new(idx, Vec::new()))
            .collect();
    }

    if p > g {
        return (0..p)
            .map(|idx| Allocation::new(idx as u32, vec![gpu_ids[idx % g].clone()]))
            .collect();
    }

    let base = g / p;
    let extra = g % p;
    let mut start = 0;
    (0..p)
        .map(|idx| {
            let len = if idx < extra { base + 1 } else { base };
            let slice = gpu_ids[start..start + len].to_vec();
            start += len;
            Allocation::new(idx as u32, slice)
        })
        .collect()
}
