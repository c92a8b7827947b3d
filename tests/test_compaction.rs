// tests/test_compaction.rs — Stream compaction of the keypoint buffer pair.

use sift_pipeline::buffers::{BufferLayout, DeviceBuffers};
use sift_pipeline::compact::compact;
use sift_pipeline::host::HostDevice;
use sift_pipeline::kernel::{ComputeBackend, KernelId};
use sift_pipeline::keypoint::Keypoint;

fn setup(capacity: usize) -> (HostDevice, DeviceBuffers) {
    let layout = BufferLayout { width: 32, height: 32, dog_levels: 5, capacity };
    let mut dev = HostDevice::new(3).with_history();
    let buffers = DeviceBuffers::allocate(&mut dev, layout).unwrap();
    (dev, buffers)
}

fn kp(i: usize) -> Keypoint {
    Keypoint::new(i as f32, 2.0 * i as f32, 1.5, 0.0)
}

/// Write `kps` at slot 0 of the current buffer and set the Counter to their
/// count, as if a detection pass had just appended them.
fn load(dev: &mut HostDevice, buffers: &DeviceBuffers, kps: &[Keypoint]) {
    dev.write(buffers.current(), 0, kps).unwrap();
    buffers.write_counter(dev, kps.len()).unwrap();
}

fn sorted(mut v: Vec<Keypoint>) -> Vec<Keypoint> {
    v.sort_by(|a, b| a.x.total_cmp(&b.x));
    v
}

// ===== Dense output =====

#[test]
fn compaction_keeps_prefix_and_valid_multiset() {
    let (mut dev, mut buffers) = setup(16);
    // Prefix [0, 3) from earlier scales, then a sparse range [3, 10).
    let mut kps = vec![kp(0), kp(1), kp(2)];
    kps.extend([kp(3), Keypoint::INVALID, kp(5), Keypoint::INVALID, Keypoint::INVALID, kp(8), kp(9)]);
    load(&mut dev, &buffers, &kps);
    let before = buffers.current();

    let c = compact(&mut dev, &mut buffers, 3).unwrap();
    assert_eq!(c.scanned_end, 10);
    assert_eq!(c.count, 7);
    assert_eq!(c.removed(), 3);
    assert!(!c.overflow_risk);
    assert_ne!(buffers.current(), before, "compaction must swap the pair");
    assert_eq!(buffers.read_counter(&mut dev).unwrap(), 7);

    let dense: Vec<Keypoint> = dev.read(buffers.current(), 0, 7).unwrap();
    assert_eq!(&dense[..3], &[kp(0), kp(1), kp(2)], "prefix moved");
    assert_eq!(sorted(dense[3..].to_vec()), vec![kp(3), kp(5), kp(8), kp(9)]);

    // The rest of the live buffer is still sentinel.
    let tail: Vec<Keypoint> = dev.read(buffers.current(), 7, 9).unwrap();
    assert!(tail.iter().all(|k| !k.is_valid()));
}

#[test]
fn spare_buffer_is_sentinel_after_compaction() {
    let (mut dev, mut buffers) = setup(8);
    load(&mut dev, &buffers, &[kp(1), kp(2), Keypoint::INVALID, kp(4)]);
    compact(&mut dev, &mut buffers, 0).unwrap();
    let spare: Vec<Keypoint> = dev.read(buffers.spare(), 0, 8).unwrap();
    assert!(spare.iter().all(|k| *k == Keypoint::INVALID));
}

#[test]
fn all_rejected_range_collapses_to_prefix() {
    let (mut dev, mut buffers) = setup(8);
    load(&mut dev, &buffers, &[kp(0), kp(1), Keypoint::INVALID, Keypoint::INVALID]);
    let c = compact(&mut dev, &mut buffers, 2).unwrap();
    assert_eq!(c.count, 2);
    let dense: Vec<Keypoint> = dev.read(buffers.current(), 0, 3).unwrap();
    assert_eq!(&dense[..2], &[kp(0), kp(1)]);
    assert!(!dense[2].is_valid());
}

// ===== No-op and overflow =====

#[test]
fn nothing_appended_is_a_no_op() {
    let (mut dev, mut buffers) = setup(8);
    load(&mut dev, &buffers, &[kp(0), kp(1)]);
    let before = buffers.current();
    dev.clear_history();

    let c = compact(&mut dev, &mut buffers, 2).unwrap();
    assert_eq!(c.count, 2);
    assert_eq!(buffers.current(), before);
    assert_eq!(dev.launches_of(KernelId::Compact).count(), 0);
    assert_eq!(dev.history().len(), 0, "no kernel may run");
}

#[test]
fn full_buffer_reports_overflow_risk_and_stays_bounded() {
    let (mut dev, mut buffers) = setup(10);
    let kps: Vec<Keypoint> = (0..10).map(kp).collect();
    load(&mut dev, &buffers, &kps);
    let c = compact(&mut dev, &mut buffers, 0).unwrap();
    assert!(c.overflow_risk);
    assert_eq!(c.count, 10);
    assert!(buffers.read_counter(&mut dev).unwrap() <= buffers.capacity());
}

#[test]
fn compact_launch_covers_scanned_range() {
    let (mut dev, mut buffers) = setup(16);
    load(&mut dev, &buffers, &[kp(0), kp(1), kp(2), kp(3), kp(4)]);
    dev.clear_history();
    compact(&mut dev, &mut buffers, 1).unwrap();

    let launches: Vec<_> = dev.launches_of(KernelId::Compact).collect();
    assert_eq!(launches.len(), 1);
    let call = &launches[0].call;
    assert_eq!(call.int_at(3).unwrap(), 1, "start");
    assert_eq!(call.int_at(4).unwrap(), 5, "end is the counter before compaction");
    assert!(launches[0].range.global[0] >= 5);
}
