//! GPU discovery on the executing host

use jasmine_core::{parse_gpu_indices, GpuConfig, JasmineResult, NVIDIA_SMI_QUERY};
use jasmine_runtime::CommandExecutor;
use tracing::{debug, warn};

/// Turn a GPU configuration into concrete ids on `exec`'s host
///
/// `auto` queries nvidia-smi. A host without it, or where it fails, is
/// treated as CPU-only. Channel errors still propagate.
pub async fn resolve_gpus(exec: &dyn CommandExecutor, config: &GpuConfig) -> JasmineResult<Vec<String>> {
    if let Some(ids) = config.ids() {
        return Ok(ids.to_vec());
    }

    let output = exec.run(NVIDIA_SMI_QUERY, None).await?;
    if !output.success() {
        warn!(
            host = exec.host(),
            exit_code = output.exit_code,
            "GPU detection failed, running CPU-only"
        );
        return Ok(Vec::new());
    }

    let ids = parse_gpu_indices(&output.stdout);
    debug!(host = exec.host(), gpus = ?ids, "Detected GPUs");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jasmine_runtime::mock::{MockExecutor, MockResponse};

    #[tokio::test]
    async fn test_explicit_ids_skip_detection() {
        let exec = MockExecutor::new("gpu1");
        let ids = resolve_gpus(&exec, &GpuConfig::parse("2,3")).await.unwrap();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(exec.commands().is_empty());
    }

    #[tokio::test]
    async fn test_auto_detects() {
        let exec = MockExecutor::new("gpu1");
        exec.respond("nvidia-smi", MockResponse::ok("0\n1\n"));
        let ids = resolve_gpus(&exec, &GpuConfig::Auto).await.unwrap();
        assert_eq!(ids, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_auto_without_nvidia_smi_is_cpu_only() {
        let exec = MockExecutor::new("cpu-box");
        exec.respond("nvidia-smi", MockResponse::fail(127, "nvidia-smi: not found"));
        let ids = resolve_gpus(&exec, &GpuConfig::Auto).await.unwrap();
        assert!(ids.is_empty());
    }
}
