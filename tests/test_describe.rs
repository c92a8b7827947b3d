// tests/test_describe.rs — Orientation / descriptor stage sequencing.

use sift_pipeline::buffers::{BufferLayout, DeviceBuffers};
use sift_pipeline::config::SiftParams;
use sift_pipeline::describe::orient_and_describe;
use sift_pipeline::error::Result;
use sift_pipeline::host::{HostDevice, KernelContext};
use sift_pipeline::kernel::{ComputeBackend, KernelCall, KernelId, NdRange};
use sift_pipeline::keypoint::{Keypoint, DESCRIPTOR_LEN};
use sift_pipeline::pipeline::OctaveGeometry;

const W: usize = 32;
const H: usize = 32;

/// Orientation stand-in that appends three extra keypoints and nothing else.
fn append_three(ctx: &mut KernelContext<'_>, call: &KernelCall, _range: NdRange) -> Result<()> {
    let counter = call.buffer_at(3)?;
    ctx.memory.get_mut(counter)?.i32s_mut()[0] += 3;
    Ok(())
}

fn setup(kps: &[Keypoint]) -> (HostDevice, DeviceBuffers, SiftParams) {
    let params = SiftParams::default();
    let layout = BufferLayout { width: W, height: H, dog_levels: params.dog_levels(), capacity: 20 };
    let mut dev = HostDevice::new(params.scales_per_octave).with_history();
    let buffers = DeviceBuffers::allocate(&mut dev, layout).unwrap();
    // Horizontal ramp: every gradient points along +x.
    let gray: Vec<f32> = (0..W * H).map(|i| 4.0 * (i % W) as f32).collect();
    dev.write(buffers.gray, 0, &gray).unwrap();
    dev.write(buffers.current(), 0, kps).unwrap();
    buffers.write_counter(&mut dev, kps.len()).unwrap();
    (dev, buffers, params)
}

#[test]
fn extra_orientations_extend_descriptor_range() {
    let kps = [Keypoint::new(16.0, 16.0, 2.0, 0.0), Keypoint::new(10.0, 20.0, 2.0, 0.0)];
    let (mut dev, buffers, params) = setup(&kps);
    dev.register(KernelId::OrientationAssignment, append_three);
    dev.clear_history();

    let total = orient_and_describe(&mut dev, &buffers, &params, &OctaveGeometry::new(0, W, H), 0, 2).unwrap();
    assert_eq!(total, 5);

    let ori = dev.launches_of(KernelId::OrientationAssignment).next().unwrap();
    assert_eq!(ori.call.int_at(7).unwrap(), 0, "start");
    assert_eq!(ori.call.int_at(8).unwrap(), 2, "end is newcnt");

    let desc = dev.launches_of(KernelId::Descriptor).next().unwrap();
    assert_eq!(desc.call.int_at(5).unwrap(), 0);
    assert_eq!(desc.call.int_at(6).unwrap(), 5, "descriptors cover appended keypoints");
}

#[test]
fn empty_range_only_computes_gradients() {
    let (mut dev, buffers, params) = setup(&[Keypoint::new(16.0, 16.0, 2.0, 0.0)]);
    dev.clear_history();
    let total = orient_and_describe(&mut dev, &buffers, &params, &OctaveGeometry::new(0, W, H), 1, 1).unwrap();
    assert_eq!(total, 1);
    assert_eq!(dev.launches_of(KernelId::ComputeGradientOrientation).count(), 1);
    assert_eq!(dev.launches_of(KernelId::OrientationAssignment).count(), 0);
    assert_eq!(dev.launches_of(KernelId::Descriptor).count(), 0);
}

#[test]
fn ramp_gives_one_orientation_and_full_descriptors() {
    let kps = [Keypoint::new(16.0, 16.0, 2.0, 0.0), Keypoint::new(10.0, 20.0, 2.0, 0.0)];
    let (mut dev, buffers, params) = setup(&kps);
    // Octave 1: keypoints come back in input-image coordinates (× 2).
    let total = orient_and_describe(&mut dev, &buffers, &params, &OctaveGeometry::new(1, W, H), 0, 2).unwrap();
    assert_eq!(total, 2, "a single gradient direction has one dominant peak");

    let out: Vec<Keypoint> = dev.read(buffers.current(), 0, 2).unwrap();
    assert_eq!((out[0].x, out[0].y, out[0].sigma), (32.0, 32.0, 4.0));
    assert_eq!((out[1].x, out[1].y), (20.0, 40.0));
    for k in &out {
        assert!(k.angle.abs() < 0.2, "angle {} should point along +x", k.angle);
    }

    let desc: Vec<u8> = dev.read(buffers.descriptors, 0, 2 * DESCRIPTOR_LEN).unwrap();
    for d in desc.chunks_exact(DESCRIPTOR_LEN) {
        assert!(d.iter().any(|&b| b > 0));
    }
}
