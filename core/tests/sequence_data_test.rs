use image::{Rgb, RgbImage};
use seqgather::config::NetConfig;
use seqgather::distributed::{CpuBackend, ParallelMode};
use seqgather::layers::{Layer, LayerKind, build_layer};
use seqgather::tensor::Blob;
use std::fs;
use std::path::Path;

const FRAMES: usize = 10;
const SIDE: u32 = 4;

/// Writes `FRAMES` solid-color PNG frames whose value encodes the label.
fn write_video(dir: &Path, label: u8) {
    fs::create_dir_all(dir).unwrap();
    for frame in 1..=FRAMES {
        let v = label * 10;
        RgbImage::from_pixel(SIDE, SIDE, Rgb([v, v, v]))
            .save(dir.join(format!("img_{frame:04}.png")))
            .unwrap();
    }
}

/// Lays out a dataset of `labels.len()` videos plus a network file and returns the file path.
///
/// Video `i` has label `labels[i]`; videos listed in `broken` have no frames on disk.
fn write_dataset(root: &Path, labels: &[u8], broken: &[usize], shuffle: bool) -> std::path::PathBuf {
    let mut videos = String::new();
    let mut shots = String::new();
    for (i, &label) in labels.iter().enumerate() {
        let dir = root.join(format!("video{i}"));
        if broken.contains(&i) {
            fs::create_dir_all(&dir).unwrap();
        } else {
            write_video(&dir, label);
        }
        let cuts = root.join(format!("video{i}.cuts"));
        fs::write(&cuts, "1\n").unwrap();
        videos.push_str(&format!("{} {FRAMES} {label}\n", dir.display()));
        shots.push_str(&format!("{} {FRAMES}\n", cuts.display()));
    }
    fs::write(root.join("videos.txt"), videos).unwrap();
    fs::write(root.join("shots.txt"), shots).unwrap();

    let net = format!(
        r#"
        [[layer]]
        type = "sequence_data"
        name = "data"
        [layer.data]
        video_source = "videos.txt"
        shot_source = "shots.txt"
        batch_size = 2
        num_frames = 5
        num_segments = 1
        num_shots = 1
        name_pattern = "img_%04d.png"
        shuffle = {shuffle}
        seed = 5

        [[layer]]
        type = "gather"
        name = "gather"
        "#
    );
    let path = root.join("net.toml");
    fs::write(&path, net).unwrap();
    path
}

fn build(path: &Path, name: &str) -> Box<dyn Layer<f32>> {
    let net = NetConfig::from_file(path).unwrap();
    let config = net.layer(name).unwrap();
    build_layer::<f32, CpuBackend>(config, &ParallelMode::Serial).unwrap()
}

fn labels(top: &[Blob<f32>]) -> Vec<f32> {
    top[1].data().clone()
}

#[test]
fn test_end_to_end_sequential_batches() {
    let dir = tempfile::tempdir().unwrap();
    let net = write_dataset(dir.path(), &[1, 2, 3], &[], false);
    let mut layer = build(&net, "data");
    assert_eq!(layer.kind(), LayerKind::SequenceData);

    let mut top = vec![Blob::default(), Blob::default()];
    layer.setup(&[], &mut top).unwrap();
    // 5 RGB frames stacked on the channel axis.
    assert_eq!(top[0].shape(), &[2, 15, 4, 4]);
    assert_eq!(top[1].shape(), &[2, 1, 1, 1]);

    layer.forward(&[], &mut top).unwrap();
    assert_eq!(labels(&top), vec![1.0, 2.0]);
    let item = 15 * 16;
    assert!(top[0].data()[..item].iter().all(|&v| v == 10.0));
    assert!(top[0].data()[item..].iter().all(|&v| v == 20.0));

    // The cursor wraps after the third video.
    layer.forward(&[], &mut top).unwrap();
    assert_eq!(labels(&top), vec![3.0, 1.0]);
    layer.forward(&[], &mut top).unwrap();
    assert_eq!(labels(&top), vec![2.0, 3.0]);
}

#[test]
fn test_shuffle_keeps_frames_with_labels() {
    let dir = tempfile::tempdir().unwrap();
    let net = write_dataset(dir.path(), &[1, 2, 3, 4, 5], &[], true);
    let mut layer = build(&net, "data");
    let mut top = vec![Blob::default(), Blob::default()];
    layer.setup(&[], &mut top).unwrap();

    let mut epoch = Vec::new();
    for _ in 0..5 {
        layer.forward(&[], &mut top).unwrap();
        let data = top[0].data();
        let item = data.len() / 2;
        for (slot, &label) in labels(&top).iter().enumerate() {
            assert!(data[slot * item..(slot + 1) * item].iter().all(|&v| v == label * 10.0));
            epoch.push(label as i32);
        }
    }
    // Ten items over a five-video dataset: two complete epochs.
    for chunk in epoch.chunks(5) {
        let mut seen = chunk.to_vec();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}

#[test]
fn test_decode_failure_leaves_slot_stale() {
    let dir = tempfile::tempdir().unwrap();
    let net = write_dataset(dir.path(), &[1, 2], &[1], false);
    let mut layer = build(&net, "data");
    let mut top = vec![Blob::default(), Blob::default()];
    layer.setup(&[], &mut top).unwrap();

    // Video 1 never decodes, so the second slot keeps the zeroed buffer contents.
    layer.forward(&[], &mut top).unwrap();
    assert_eq!(labels(&top), vec![1.0, 0.0]);
    drop(layer);
}

#[test]
fn test_data_feeds_serial_gather() {
    let dir = tempfile::tempdir().unwrap();
    let net = write_dataset(dir.path(), &[1, 2, 3], &[], false);
    let mut data = build(&net, "data");
    let mut gather = build(&net, "gather");

    let mut data_top = vec![Blob::default(), Blob::default()];
    data.setup(&[], &mut data_top).unwrap();
    let mut gathered = vec![Blob::default(), Blob::default()];
    gather.setup(&data_top, &mut gathered).unwrap();
    assert_eq!(gathered[0].shape(), data_top[0].shape());

    data.forward(&[], &mut data_top).unwrap();
    gather.forward(&data_top, &mut gathered).unwrap();
    // The swap replaces the buffer contents, not the shared buffer, so the alias survives.
    assert!(gathered[1].shares_data_with(&data_top[1]));
    assert_eq!(*gathered[1].data(), vec![1.0, 2.0]);
}

#[test]
fn test_setup_fails_on_mismatched_sources() {
    let dir = tempfile::tempdir().unwrap();
    let net = write_dataset(dir.path(), &[1, 2], &[], false);
    let shots = fs::read_to_string(dir.path().join("shots.txt")).unwrap();
    let first = shots.lines().next().unwrap();
    fs::write(dir.path().join("shots.txt"), format!("{first}\n")).unwrap();

    let mut layer = build(&net, "data");
    let mut top = vec![Blob::default(), Blob::default()];
    let err = layer.setup(&[], &mut top).unwrap_err();
    assert!(err.to_string().contains("2 entries"), "{err}");
}
