//! Adversary listing and original-vs-adversarial plots
use crate::attack::{perturb, Partition};
use crate::error::{GatnError, Result};
use crate::experiment::ExperimentConfig;
use crate::gatn::per_sample_mse;
use crate::results::{adversary_log_path, read_adversary_log};
use crate::TsFloat;
use log::{debug, info};
use ndarray::{ArrayView2, Axis};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Which sample to inspect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleQuery {
    pub dataset_id: usize,
    pub beta: TsFloat,
    pub partition: Partition,
    /// Position in the partition, or the n-th sample of `class_id` when set.
    pub sample_id: usize,
    pub class_id: Option<usize>,
    /// Overlay both series in one panel instead of two side by side.
    pub plot_delta: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SampleReport {
    pub dataset_id: usize,
    pub partition: Partition,
    pub sample_id: usize,
    pub ground_truth: usize,
    pub clean_class: usize,
    pub clean_prob: TsFloat,
    pub adversarial_class: usize,
    pub adversarial_prob: TsFloat,
    pub mse: TsFloat,
    pub image: PathBuf,
}

/// Ids of the samples recorded as adversaries by the last run for this
/// (dataset, classifier, target, partition, beta).
///
/// # Errors
/// `MissingAdversaryLog` if that run has not happened
pub fn list_adversaries(
    config: &ExperimentConfig,
    dataset_id: usize,
    partition: Partition,
    beta: TsFloat,
) -> Result<Vec<usize>> {
    let path = adversary_log_path(
        &config.log_dir,
        dataset_id,
        config.classifier,
        config.target_class,
        partition,
        beta,
    );
    let ids = read_adversary_log(&path)?
        .into_iter()
        .filter(|r| r.is_adversary())
        .map(|r| r.sample_id)
        .collect();
    Ok(ids)
}

pub fn image_path(image_dir: &Path, dataset_id: usize, sample_id: usize) -> PathBuf {
    image_dir.join(format!(
        "whitebox-dataset-{}-sample-{}.svg",
        dataset_id, sample_id
    ))
}

/// Attack one sample with the saved generator and plot the result.
///
/// # Errors
/// If a checkpoint is missing or mismatched, the sample or class does not
/// exist in the partition, or rendering fails
pub fn render_sample(config: &ExperimentConfig, query: &SampleQuery) -> Result<SampleReport> {
    let store = config.store();
    let dataset = config.load_dataset(query.dataset_id)?;
    let classifier = store.load_classifier(query.dataset_id, config.classifier)?;
    let generator = store.load_generator(
        query.dataset_id,
        config.target_class,
        query.beta,
        &classifier,
    )?;
    let (train, test) = config.partitions(&dataset);
    let set = match query.partition {
        Partition::Train => train,
        Partition::Test => test,
    };

    let sample_id = match query.class_id {
        Some(class) => {
            let members = set.class_indices(class);
            if members.is_empty() {
                return Err(GatnError::InvalidClass(class));
            }
            *members.get(query.sample_id).ok_or(GatnError::InvalidSampleId {
                sample_id: query.sample_id,
                len: members.len(),
            })?
        }
        None => query.sample_id,
    };
    if sample_id >= set.len() {
        return Err(GatnError::InvalidSampleId {
            sample_id,
            len: set.len(),
        });
    }
    let ground_truth = set.label(sample_id);

    let x = set.sample(sample_id).insert_axis(Axis(0));
    let clf = &classifier.classifier;
    clf.check_input(&x)?;
    let clean_probs = clf.predict_proba(&x);
    let x_adv = perturb(clf, &generator.generator, &x, config.target_class);
    let adv_probs = clf.predict_proba(&x_adv.view());
    let clean_class = clf.predict(&x)[0];
    let adversarial_class = clf.predict(&x_adv.view())[0];
    let mse = per_sample_mse(&x, &x_adv.view())[0];

    let image = image_path(&config.image_dir, query.dataset_id, sample_id);
    let title = format!(
        "Adversarial label : {} - Real label : {}",
        adversarial_class, ground_truth
    );
    plot_series(
        &image,
        &title,
        &set.sample(sample_id),
        &x_adv.index_axis(Axis(0), 0),
        query.plot_delta,
    )?;
    info!("saved plot to {:?}", image);

    Ok(SampleReport {
        dataset_id: query.dataset_id,
        partition: query.partition,
        sample_id,
        ground_truth,
        clean_class,
        clean_prob: clean_probs[[0, clean_class]],
        adversarial_class,
        adversarial_prob: adv_probs[[0, adversarial_class]],
        mse,
        image,
    })
}

fn value_range<'a>(values: impl Iterator<Item = &'a TsFloat>) -> std::ops::Range<TsFloat> {
    let (lo, hi) = values.fold((TsFloat::INFINITY, TsFloat::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return -1. ..1.;
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad)..(hi + pad)
}

fn draw_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    caption: &str,
    y_range: std::ops::Range<TsFloat>,
    series: &[(&str, &ArrayView2<TsFloat>, RGBColor)],
) -> Result<()> {
    let steps = series.first().map_or(1, |(_, s, _)| s.nrows());
    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .caption(caption, ("sans-serif", 18.0))
        .set_label_area_size(LabelAreaPosition::Left, 50)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0f64..(steps.max(2) - 1) as f64, y_range)
        .map_err(|e| GatnError::Plot(e.to_string()))?;
    chart
        .configure_mesh()
        .x_desc("Timesteps")
        .y_desc("Magnitude")
        .draw()
        .map_err(|e| GatnError::Plot(e.to_string()))?;

    for &(label, values, color) in series {
        for channel in values.axis_iter(Axis(1)) {
            chart
                .draw_series(LineSeries::new(
                    channel.iter().enumerate().map(|(t, &v)| (t as f64, v)),
                    &color,
                ))
                .map_err(|e| GatnError::Plot(e.to_string()))?
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
        }
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(|e| GatnError::Plot(e.to_string()))
}

/// Render an original and an adversarial series of shape (T, C) to an SVG file.
///
/// # Errors
pub fn plot_series<'a>(
    path: &Path,
    title: &str,
    original: &ArrayView2<'a, TsFloat>,
    adversarial: &ArrayView2<'a, TsFloat>,
    overlay: bool,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GatnError::io(parent, e))?;
    }
    let y_range = value_range(original.iter().chain(adversarial.iter()));
    let size = if overlay { (800, 500) } else { (1400, 500) };
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(|e| GatnError::Plot(e.to_string()))?;
    let root = root
        .titled(title, ("sans-serif", 22.0))
        .map_err(|e| GatnError::Plot(e.to_string()))?;

    if overlay {
        draw_panel(
            &root,
            "Original vs adversarial",
            y_range,
            &[("original", original, BLUE), ("adversarial", adversarial, RED)],
        )?;
    } else {
        let panels = root.split_evenly((1, 2));
        draw_panel(&panels[0], "Original", y_range.clone(), &[("original", original, BLUE)])?;
        draw_panel(&panels[1], "Adversarial", y_range, &[("adversarial", adversarial, RED)])?;
    }
    root.present().map_err(|e| GatnError::Plot(e.to_string()))?;
    debug!("rendered {:?}", path);
    Ok(())
}
