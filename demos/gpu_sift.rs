// demos/gpu_sift.rs — GPU vs host SIFT pipeline.
//
// Runs the same image through the wgpu device and the host reference
// device, prints both reports and how many GPU features have a host feature
// at the same position and angle.
//
// USAGE
// ─────
//   cargo run --release --example gpu_sift                      # synthetic blobs
//   cargo run --release --example gpu_sift -- path/to/img.png
//   cargo run --release --example gpu_sift -- path/to/img.png rpi  # RaspberryPi limits

use sift_pipeline::config::SiftParams;
use sift_pipeline::gpu::{DeviceProfile, GpuDevice, WgpuBackend};
use sift_pipeline::image::Image;
use sift_pipeline::kernel::ComputeBackend;
use sift_pipeline::pipeline::{Pipeline, SiftOutput};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let src: Image<u8> = match args.get(1) {
        Some(path) => load_image(path),
        None => {
            eprintln!("[gpu_sift] no image path given, using generated blob scene");
            blob_scene(752, 480)
        }
    };
    let profile = match args.get(2).map(String::as_str) {
        Some("rpi") => DeviceProfile::RaspberryPi,
        _ => DeviceProfile::Native,
    };
    let params = SiftParams::default();

    eprintln!("[gpu_sift] initialising GPU ({profile})...");
    let gpu = GpuDevice::new_with_profile(profile).unwrap_or_else(|e| panic!("{e}"));
    let mut backend = WgpuBackend::new(gpu, params.scales_per_octave);
    backend.prepare().unwrap_or_else(|e| panic!("kernel compilation failed: {e}"));
    eprintln!("[gpu_sift] device: {}", backend.name());

    let mut gpu_pipeline = Pipeline::new(backend, params.clone()).unwrap_or_else(|e| panic!("{e}"));
    let mut host_pipeline = Pipeline::host(params).unwrap_or_else(|e| panic!("{e}"));

    // First GPU run pays for buffer allocation; time the second.
    gpu_pipeline.run(&src).unwrap_or_else(|e| panic!("GPU run failed: {e}"));
    let gpu_out = gpu_pipeline.run(&src).unwrap_or_else(|e| panic!("GPU run failed: {e}"));
    let host_out = host_pipeline.run(&src).unwrap_or_else(|e| panic!("host run failed: {e}"));

    summary("gpu ", &gpu_out);
    summary("host", &host_out);

    let matched = gpu_out
        .features
        .iter()
        .filter(|g| {
            host_out.features.iter().any(|h| {
                (g.x - h.x).abs() < 0.1 && (g.y - h.y).abs() < 0.1 && (g.angle - h.angle).abs() < 0.05
            })
        })
        .count();
    println!(
        "{matched}/{} GPU features match a host feature",
        gpu_out.features.len()
    );
}

fn summary(tag: &str, out: &SiftOutput) {
    let per_octave: Vec<usize> = out.octaves.iter().map(|o| o.keypoints).collect();
    println!(
        "[{tag}] {:>5} features {per_octave:?} in {:.2} ms (extrema {:.2}, compact {:.2}, describe {:.2})",
        out.features.len(),
        out.timing.total * 1e3,
        out.timing.extrema * 1e3,
        out.timing.compact * 1e3,
        out.timing.describe * 1e3
    );
}

fn load_image(path: &str) -> Image<u8> {
    let img = image::open(path)
        .unwrap_or_else(|e| panic!("failed to open {path}: {e}"))
        .to_luma8();
    let (w, h) = img.dimensions();
    Image::<u8>::from_vec(w as usize, h as usize, img.into_raw())
}

fn blob_scene(width: usize, height: usize) -> Image<u8> {
    Image::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let mut v = 30.0;
        for i in 0..16 {
            let cx = (40 + (i * 173) % (width - 80)) as f32;
            let cy = (40 + (i * 97) % (height - 80)) as f32;
            let s = 2.5 + (i % 5) as f32 * 2.0;
            let d2 = (fx - cx).powi(2) + (fy - cy).powi(2);
            v += 170.0 * (-d2 / (2.0 * s * s)).exp();
        }
        v.min(255.0) as u8
    })
}
