// gpu/mod.rs — wgpu compute device.
//
// `WgpuBackend` runs the seven pipeline kernels as WGSL compute shaders
// behind the same `ComputeBackend` contract as the host reference device.
// The host kernels in `crate::host` stay the authoritative reference: the
// GPU tests compare against them.
//
//   GpuDevice     adapter selection, limits profile, workgroup size
//   WgpuBackend   buffer arena, pipeline cache, launch/wait, transfers
//
// GPU tests need a real Vulkan adapter and are `#[ignore]`d. Each one is
// split into an inner test that does the work and prints GPU_TEST_OK, and
// an outer test that runs the inner one in a child `cargo test` process,
// so a driver crash fails one test instead of the whole harness.

pub mod backend;
pub mod device;

pub use backend::WgpuBackend;
pub use device::{DeviceProfile, GpuDevice, GpuError};

/// Run one `#[ignore]`d inner test in a child process and return its
/// combined stdout and stderr.
#[cfg(test)]
pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
    let output = std::process::Command::new("cargo")
        .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
        .output()
        .unwrap_or_else(|e| panic!("subprocess failed for {test_name}: {e}"));
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    print!("{stdout}");
    eprint!("{stderr}");
    stdout + &stderr
}
