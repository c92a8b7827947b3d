// demos/sift_demo.rs — SIFT features on the host reference device.
//
// Runs the full octave pipeline on an image and prints per-octave counts and
// stage timings. With `--json` the features are written as JSON as well.
//
// USAGE
// ─────
//   cargo run --release --example sift_demo                      # synthetic blobs
//   cargo run --release --example sift_demo -- path/to/img.png
//   cargo run --release --example sift_demo -- img.png params.json --json out.json

use std::path::Path;

use sift_pipeline::config::SiftParams;
use sift_pipeline::image::Image;
use sift_pipeline::pipeline::{Pipeline, SiftOutput};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let json_out = args
        .iter()
        .position(|a| a == "--json")
        .and_then(|i| args.get(i + 1).cloned());
    let positional: Vec<&String> = args
        .iter()
        .skip(1)
        .filter(|a| a.as_str() != "--json" && Some(*a) != json_out.as_ref())
        .collect();

    let src: Image<u8> = match positional.first() {
        Some(path) => load_image(path),
        None => {
            eprintln!("[sift_demo] no image path given, using generated blob scene");
            blob_scene(640, 480)
        }
    };
    let params = match positional.get(1) {
        Some(path) => SiftParams::from_json_file(Path::new(path.as_str()))
            .unwrap_or_else(|e| panic!("bad parameter file {path}: {e}")),
        None => SiftParams::default(),
    };
    eprintln!("[sift_demo] source {}×{}, {params:?}", src.width(), src.height());

    let mut pipeline = Pipeline::host(params).unwrap_or_else(|e| panic!("{e}"));
    let out = pipeline.run(&src).unwrap_or_else(|e| panic!("pipeline failed: {e}"));
    report(&out);

    if let Some(path) = json_out {
        let json = serde_json::to_string_pretty(&out).expect("features serialise");
        std::fs::write(&path, json).unwrap_or_else(|e| panic!("failed to write {path}: {e}"));
        eprintln!("[sift_demo] wrote {} features to {path}", out.features.len());
    }
}

fn report(out: &SiftOutput) {
    println!("octave      size  candidates  refined  keypoints  overflow");
    for o in &out.octaves {
        println!(
            "{:>6}  {:>4}×{:<4}  {:>10}  {:>7}  {:>9}  {:>8}",
            o.octave, o.width, o.height, o.candidates, o.refined, o.keypoints, o.overflow_warnings
        );
    }
    let t = &out.timing;
    println!(
        "total {} features in {:.1} ms (pyramid {:.1}, extrema {:.1}, compact {:.1}, describe {:.1}, harvest {:.1})",
        out.features.len(),
        t.total * 1e3,
        t.pyramid * 1e3,
        t.extrema * 1e3,
        t.compact * 1e3,
        t.describe * 1e3,
        t.harvest * 1e3
    );
}

fn load_image(path: &str) -> Image<u8> {
    let img = image::open(path)
        .unwrap_or_else(|e| panic!("failed to open {path}: {e}"))
        .to_luma8();
    let (w, h) = img.dimensions();
    Image::<u8>::from_vec(w as usize, h as usize, img.into_raw())
}

/// Gaussian blobs of several sizes on a dark background.
fn blob_scene(width: usize, height: usize) -> Image<u8> {
    let blobs: Vec<(f32, f32, f32)> = (0..12)
        .map(|i| {
            let x = (60 + (i * 137) % (width - 120)) as f32;
            let y = (60 + (i * 89) % (height - 120)) as f32;
            (x, y, 3.0 + (i % 4) as f32 * 2.5)
        })
        .collect();
    Image::from_fn(width, height, |x, y| {
        let v: f32 = blobs
            .iter()
            .map(|&(cx, cy, s)| {
                let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                180.0 * (-d2 / (2.0 * s * s)).exp()
            })
            .sum();
        (30.0 + v).min(255.0) as u8
    })
}
