//! Slurm batch submission
//!
//! The scheduler owns process durability for Slurm targets, so a submission
//! is one batch script with every worker backgrounded inside it.

use jasmine_core::{JasmineError, JasmineResult};
use jasmine_runtime::shell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::planner::Allocation;

const HEREDOC_MARKER: &str = "JASMINE_BATCH_EOF";

/// A renderable batch job
#[derive(Debug, Clone)]
pub struct SlurmBatch {
    pub job_name: String,
    pub directives: BTreeMap<String, String>,
    pub work_dir: Option<String>,
    pub command: String,
    pub allocations: Vec<Allocation>,
    pub extra_env: BTreeMap<String, String>,
}

impl SlurmBatch {
    /// Job name from the `job-name` directive, or `jasmine-{target}`
    pub fn job_name_for(target: &str, directives: &BTreeMap<String, String>) -> String {
        directives
            .get("job-name")
            .or_else(|| directives.get("job_name"))
            .cloned()
            .unwrap_or_else(|| format!("jasmine-{}", target))
    }

    /// Batch script text
    pub fn render(&self) -> String {
        let mut lines = vec!["#!/bin/bash".to_string()];
        lines.push(format!("#SBATCH --job-name={}", self.job_name));
        for (key, value) in &self.directives {
            if key == "job-name" || key == "job_name" {
                continue;
            }
            let key = key.replace('_', "-");
            if value.is_empty() {
                lines.push(format!("#SBATCH --{}", key));
            } else {
                lines.push(format!("#SBATCH --{}={}", key, value));
            }
        }
        lines.push(String::new());
        if let Some(dir) = &self.work_dir {
            lines.push(format!("cd {} || exit 1", shell::quote_dir(dir)));
        }
        for allocation in &self.allocations {
            let env = allocation.launch_env(&self.extra_env);
            let launch = match shell::export_env(env.iter().map(|(k, v)| (k, v))) {
                Some(exports) => format!("({} && {}) &", exports, self.command),
                None => format!("({}) &", self.command),
            };
            lines.push(launch);
        }
        lines.push("wait".to_string());
        lines.join("\n")
    }

    /// `sbatch --parsable` fed the script on stdin
    pub fn submit_command(&self) -> String {
        format!(
            "sbatch --parsable <<'{marker}'\n{script}\n{marker}",
            marker = HEREDOC_MARKER,
            script = self.render()
        )
    }
}

/// Job id from `sbatch --parsable` output (`id` or `id;cluster`)
pub fn parse_job_id(output: &str) -> JasmineResult<String> {
    let id = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split(';').next())
        .unwrap_or("")
        .trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_') {
        Ok(id.to_string())
    } else {
        Err(JasmineError::Serialization(format!(
            "unexpected sbatch output: '{}'",
            output.trim()
        )))
    }
}

/// One queued or running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlurmJob {
    pub id: String,
    pub state: String,
}

/// Queue listing for a job name
pub fn squeue_command(job_name: &str) -> String {
    format!(
        "squeue --noheader --name={} --format='%i %T'",
        shell::quote(job_name)
    )
}

/// Parse `squeue --format='%i %T'` lines
pub fn parse_squeue(output: &str) -> Vec<SlurmJob> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let state = parts.next()?;
            Some(SlurmJob {
                id: id.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;

    fn batch() -> SlurmBatch {
        let mut directives = BTreeMap::new();
        directives.insert("partition".to_string(), "gpu".to_string());
        directives.insert("gres".to_string(), "gpu:2".to_string());
        directives.insert("cpus_per_task".to_string(), "8".to_string());
        let mut extra_env = BTreeMap::new();
        extra_env.insert("WANDB_API_KEY".to_string(), "key".to_string());
        SlurmBatch {
            job_name: SlurmBatch::job_name_for("cluster", &directives),
            directives,
            work_dir: Some("~/src/project".to_string()),
            command: "wandb agent org/proj/abc".to_string(),
            allocations: plan(&["0".to_string(), "1".to_string()], 2),
            extra_env,
        }
    }

    #[test]
    fn test_render_script() {
        let script = batch().render();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[1], "#SBATCH --job-name=jasmine-cluster");
        assert!(lines.contains(&"#SBATCH --cpus-per-task=8"));
        assert!(lines.contains(&"#SBATCH --partition=gpu"));
        assert!(lines.contains(&"cd ~/src/project || exit 1"));
        assert!(lines.contains(
            &"(export CUDA_VISIBLE_DEVICES=1 && export JASMINE_PROCESS_INDEX=1 && export WANDB_API_KEY=key && wandb agent org/proj/abc) &"
        ));
        assert_eq!(lines.last(), Some(&"wait"));
    }

    #[test]
    fn test_job_name_override() {
        let mut directives = BTreeMap::new();
        directives.insert("job-name".to_string(), "custom".to_string());
        assert_eq!(SlurmBatch::job_name_for("t", &directives), "custom");
    }

    #[test]
    fn test_submit_command_uses_heredoc() {
        let cmd = batch().submit_command();
        assert!(cmd.starts_with("sbatch --parsable <<'JASMINE_BATCH_EOF'\n#!/bin/bash"));
        assert!(cmd.ends_with("\nJASMINE_BATCH_EOF"));
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("12345\n").unwrap(), "12345");
        assert_eq!(parse_job_id("12345;cluster\n").unwrap(), "12345");
        assert!(parse_job_id("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn test_parse_squeue() {
        let jobs = parse_squeue("101 RUNNING\n102 PENDING\n\n");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].state, "PENDING");
        assert_eq!(squeue_command("jasmine-x"), "squeue --noheader --name=jasmine-x --format='%i %T'");
    }
}
