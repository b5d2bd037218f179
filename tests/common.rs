use gatn_rs::attack::GatnTraining;
use gatn_rs::classifier::{ClassifierArch, ClassifierTraining};
use gatn_rs::experiment::ExperimentConfig;
use gatn_rs::optim::ExponentialDecay;
use gatn_rs::ClassifierKind;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Rows of a noisy three class problem: a rising ramp, a falling ramp and a bump.
fn rows(n: usize, seq_len: usize, labels: &[i32], rng: &mut Pcg64) -> String {
    let mut out = String::new();
    for i in 0..n {
        let class = i % labels.len();
        write!(out, "{}", labels[class]).unwrap();
        for t in 0..seq_len {
            let s = t as f64 / (seq_len - 1) as f64;
            let base = match class {
                0 => s,
                1 => 1. - s,
                _ => (-(s - 0.5) * (s - 0.5) * 20.).exp(),
            };
            write!(out, ",{:.6}", base + rng.gen_range(-0.05..0.05)).unwrap();
        }
        out.push('\n');
    }
    out
}

/// Writes `<root>/ucr/<id>/Synthetic_TRAIN.txt` and `..._TEST.txt`.
pub fn write_ucr(root: &Path, id: usize, n_train: usize, n_test: usize, seq_len: usize) {
    let mut rng = Pcg64::seed_from_u64(id as u64);
    let dir = root.join("ucr").join(id.to_string());
    fs::create_dir_all(&dir).unwrap();
    // labels as they appear in the archive, not yet 0-based
    let labels = [1, 2, 3];
    fs::write(dir.join("Synthetic_TRAIN.txt"), rows(n_train, seq_len, &labels, &mut rng)).unwrap();
    fs::write(dir.join("Synthetic_TEST.txt"), rows(n_test, seq_len, &labels, &mut rng)).unwrap();
}

/// A small, fast experiment rooted in `root`.
pub fn small_config(root: &Path, kind: ClassifierKind) -> ExperimentConfig {
    ExperimentConfig {
        data_root: root.join("data"),
        weights_root: root.join("weights"),
        gatn_weights_root: root.join("gatn_weights"),
        log_dir: root.join("logs"),
        image_dir: root.join("images"),
        classifier: kind,
        datasets: vec![1],
        betas: vec![0.1, 0.001],
        classifier_arch: ClassifierArch {
            conv_filters: vec![4, 4],
            conv_kernels: vec![3, 3],
            lstm_units: 4,
        },
        classifier_training: ClassifierTraining {
            epochs: 15,
            batch_size: 8,
            learning_rate: 0.01,
        },
        gatn: GatnTraining {
            epochs: 3,
            batch_size: 8,
            learning_rate: ExponentialDecay {
                lr_initial: 0.01,
                decay_steps: 1000,
                decay_rate: 0.96,
                staircase: false,
            },
            hidden: vec![16],
        },
        ..ExperimentConfig::default()
    }
}
