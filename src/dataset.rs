//! UCR archive loading and the sample containers used by training and attacks
use crate::error::{GatnError, Result};
use crate::TsFloat;
use itertools::Itertools;
use log::{debug, warn};
use ndarray::{Array1, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use ordered_float::OrderedFloat;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Samples of shape (N, T, C) with labels in `0..num_classes`.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesSet {
    x: Array3<TsFloat>,
    y: Array1<usize>,
    num_classes: usize,
}

/// One mini-batch. `offset` is the id of its first sample.
pub struct Batch<'a> {
    pub offset: usize,
    pub x: ArrayView3<'a, TsFloat>,
    pub y: ArrayView1<'a, usize>,
}

impl TimeSeriesSet {
    /// # Errors
    /// If the label count differs from the sample count or a label is out of range
    pub fn new(x: Array3<TsFloat>, y: Array1<usize>, num_classes: usize) -> Result<Self> {
        if x.shape()[0] != y.len() {
            return Err(GatnError::Shape(format!(
                "{} samples but {} labels",
                x.shape()[0],
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&label| label >= num_classes) {
            return Err(GatnError::Shape(format!(
                "label {} with only {} classes",
                bad, num_classes
            )));
        }
        Ok(Self { x, y, num_classes })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.x.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.x.shape()[2]
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn x(&self) -> ArrayView3<TsFloat> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView1<usize> {
        self.y.view()
    }

    pub fn sample(&self, idx: usize) -> ArrayView2<TsFloat> {
        self.x.index_axis(Axis(0), idx)
    }

    pub fn label(&self, idx: usize) -> usize {
        self.y[idx]
    }

    /// Samples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
            num_classes: self.num_classes,
        }
    }

    /// Every sample whose label is not `class`.
    pub fn without_class(&self, class: usize) -> Self {
        let keep = self
            .y
            .iter()
            .positions(|&label| label != class)
            .collect::<Vec<_>>();
        self.select(&keep)
    }

    /// Indices of the samples labelled `class`, in order.
    pub fn class_indices(&self, class: usize) -> Vec<usize> {
        self.y.iter().positions(|&label| label == class).collect()
    }

    /// Seeded random split into (train, test) with `ceil(len * test_fraction)` test samples.
    pub fn split(&self, test_fraction: TsFloat, seed: u64) -> (Self, Self) {
        let mut rng = Pcg64::seed_from_u64(seed);
        let mut indices = (0..self.len()).collect::<Vec<_>>();
        indices.shuffle(&mut rng);
        let n_test = ((self.len() as TsFloat) * test_fraction.clamp(0., 1.)).ceil() as usize;
        let (test, train) = indices.split_at(n_test.min(self.len()));
        (self.select(train), self.select(test))
    }

    /// A shuffled copy, used to draw training batches.
    pub fn shuffled<R: Rng>(&self, rng: &mut R) -> Self {
        let mut indices = (0..self.len()).collect::<Vec<_>>();
        indices.shuffle(rng);
        self.select(&indices)
    }

    /// Consecutive batches of at most `batch_size` samples.
    ///
    /// # Panics
    /// If `batch_size` is zero
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Batch<'_>> {
        assert!(batch_size > 0);
        self.x
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(self.y.axis_chunks_iter(Axis(0), batch_size))
            .enumerate()
            .map(move |(idx, (x, y))| Batch {
                offset: idx * batch_size,
                x,
                y,
            })
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        (self.len() + batch_size - 1) / batch_size
    }
}

/// One archive dataset with its original train/test partitions.
#[derive(Clone, Debug)]
pub struct UcrDataset {
    pub id: usize,
    pub train: TimeSeriesSet,
    pub test: TimeSeriesSet,
}

impl UcrDataset {
    pub const fn num_classes(&self) -> usize {
        self.train.num_classes()
    }

    pub fn seq_len(&self) -> usize {
        self.train.seq_len()
    }

    pub fn channels(&self) -> usize {
        self.train.channels()
    }
}

/// Short description of a dataset on disk, used for listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub seq_len: usize,
    pub num_classes: usize,
}

pub fn dataset_dir(data_root: &Path, id: usize) -> PathBuf {
    data_root.join("ucr").join(id.to_string())
}

/// Archive ids with a directory under `<data_root>/ucr/`, ascending.
///
/// # Errors
pub fn list_ucr(data_root: &Path) -> Result<Vec<usize>> {
    let root = data_root.join("ucr");
    let entries = fs::read_dir(&root).map_err(|e| GatnError::io(&root, e))?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GatnError::io(&root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// # Errors
pub fn summarize(data_root: &Path, id: usize) -> Result<DatasetSummary> {
    let dataset = load_ucr(data_root, id, false)?;
    Ok(DatasetSummary {
        id,
        train_size: dataset.train.len(),
        test_size: dataset.test.len(),
        seq_len: dataset.seq_len(),
        num_classes: dataset.num_classes(),
    })
}

/// Load dataset `id` from `<data_root>/ucr/<id>/`.
///
/// Raw labels (any numeric values) are mapped to `0..num_classes` in
/// ascending order over both partitions. With `normalize`, every series is
/// z-normalized on its own.
///
/// # Errors
/// If the files are missing, malformed, empty or of inconsistent lengths
pub fn load_ucr(data_root: &Path, id: usize, normalize: bool) -> Result<UcrDataset> {
    let dir = dataset_dir(data_root, id);
    let train_path = find_split_file(&dir, "TRAIN")?;
    let test_path = find_split_file(&dir, "TEST")?;
    debug!("loading {:?} and {:?}", train_path, test_path);

    let (train_labels, train_rows) = read_rows(&train_path)?;
    let (test_labels, test_rows) = read_rows(&test_path)?;
    if train_rows.is_empty() {
        return Err(GatnError::EmptyDataset(train_path.display().to_string()));
    }
    if test_rows.is_empty() {
        return Err(GatnError::EmptyDataset(test_path.display().to_string()));
    }
    let seq_len = train_rows[0].len();
    if let Some(bad) = test_rows.iter().find(|row| row.len() != seq_len) {
        return Err(GatnError::Shape(format!(
            "train series have length {} but a test series has length {}",
            seq_len,
            bad.len()
        )));
    }

    let classes = train_labels
        .iter()
        .chain(&test_labels)
        .copied()
        .map(OrderedFloat)
        .sorted()
        .dedup()
        .collect::<Vec<_>>();
    let encode = |labels: &[TsFloat]| -> Array1<usize> {
        labels
            .iter()
            .map(|&l| classes.binary_search(&OrderedFloat(l)).unwrap_or(0))
            .collect()
    };

    let train = TimeSeriesSet::new(
        to_array(&train_rows, normalize),
        encode(&train_labels),
        classes.len(),
    )?;
    let test = TimeSeriesSet::new(
        to_array(&test_rows, normalize),
        encode(&test_labels),
        classes.len(),
    )?;
    debug!(
        "dataset {}: {} train, {} test, length {}, {} classes",
        id,
        train.len(),
        test.len(),
        seq_len,
        classes.len()
    );
    Ok(UcrDataset { id, train, test })
}

fn find_split_file(dir: &Path, split: &str) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).map_err(|_| GatnError::MissingDataset(dir.to_path_buf()))?;
    let suffix = format!("_{}", split);
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map_or(false, |stem| {
                    let stem = stem.to_uppercase();
                    stem == split || stem.ends_with(&suffix)
                })
        })
        .sorted()
        .next()
        .ok_or_else(|| GatnError::MissingDataset(dir.to_path_buf()))
}

/// Rows of `label, v_0, v_1, ...` separated by commas, tabs or spaces.
fn read_rows(path: &Path) -> Result<(Vec<TsFloat>, Vec<Vec<TsFloat>>)> {
    let text = fs::read_to_string(path).map_err(|e| GatnError::io(path, e))?;
    let mut labels = Vec::new();
    let mut rows: Vec<Vec<TsFloat>> = Vec::new();
    let mut missing = 0usize;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut values = Vec::new();
        for field in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
        {
            let value: TsFloat = field.parse().map_err(|_| {
                GatnError::parse(path, line_no + 1, format!("not a number: {:?}", field))
            })?;
            values.push(value);
        }
        if values.len() < 2 {
            return Err(GatnError::parse(path, line_no + 1, "expected a label and at least one value"));
        }
        let label = values.remove(0);
        if !label.is_finite() {
            return Err(GatnError::parse(path, line_no + 1, "label is not finite"));
        }
        if let Some(first) = rows.first() {
            if first.len() != values.len() {
                return Err(GatnError::parse(
                    path,
                    line_no + 1,
                    format!("series has length {} instead of {}", values.len(), first.len()),
                ));
            }
        }
        for v in values.iter_mut().filter(|v| v.is_nan()) {
            *v = 0.;
            missing += 1;
        }
        labels.push(label);
        rows.push(values);
    }
    if missing > 0 {
        warn!("{:?}: replaced {} missing values with 0", path, missing);
    }
    Ok((labels, rows))
}

fn to_array(rows: &[Vec<TsFloat>], normalize: bool) -> Array3<TsFloat> {
    let seq_len = rows.first().map_or(0, Vec::len);
    let mut x = Array3::zeros((rows.len(), seq_len, 1));
    for (mut sample, row) in x.outer_iter_mut().zip(rows) {
        let mut series = sample.index_axis_mut(Axis(1), 0);
        series.assign(&ArrayView1::from(row.as_slice()));
        if normalize {
            z_normalize(&mut series);
        }
    }
    x
}

fn z_normalize(series: &mut ndarray::ArrayViewMut1<TsFloat>) {
    let mean = series.mean().unwrap_or(0.);
    let std = series.std(0.);
    if std > 1e-8 {
        series.mapv_inplace(|v| (v - mean) / std);
    } else {
        series.mapv_inplace(|v| v - mean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use more_asserts::assert_le;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn archive(train: &str, test: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let dir = dataset_dir(root.path(), 7);
        fs::create_dir_all(&dir).unwrap();
        write_file(&dir, "Toy_TRAIN.tsv", train);
        write_file(&dir, "Toy_TEST.tsv", test);
        root
    }

    #[test]
    fn test_load_maps_labels_in_ascending_order() {
        let root = archive(
            "-1\t1\t2\t3\n1\t3\t2\t1\n",
            "1,0,0,1\n-1,2,2,2\n2 5 5 5\n",
        );
        let dataset = load_ucr(root.path(), 7, false).unwrap();
        assert_eq!(dataset.num_classes(), 3);
        assert_eq!(dataset.seq_len(), 3);
        assert_eq!(dataset.channels(), 1);
        assert_eq!(dataset.train.y().to_vec(), vec![0, 1]);
        assert_eq!(dataset.test.y().to_vec(), vec![1, 0, 2]);
        assert_eq!(dataset.test.sample(2)[[1, 0]], 5.);
        assert_eq!(list_ucr(root.path()).unwrap(), vec![7]);
    }

    #[test]
    fn test_z_normalization() {
        let root = archive("0,1,2,3,4\n1,5,5,5,5\n", "0,1,1,1,2\n");
        let dataset = load_ucr(root.path(), 7, true).unwrap();
        let series = dataset.train.sample(0).index_axis(Axis(1), 0).to_owned();
        assert_abs_diff_eq!(series.mean().unwrap(), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(series.std(0.), 1., epsilon = 1e-12);
        // constant series are only centred
        assert!(dataset.train.sample(1).iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_malformed_rows_are_reported_with_line() {
        let root = archive("0,1,2\n1,1,x\n", "0,1,2\n");
        match load_ucr(root.path(), 7, false) {
            Err(GatnError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }

        let root = archive("0,1,2\n1,1,2,3\n", "0,1,2\n");
        assert!(matches!(load_ucr(root.path(), 7, false), Err(GatnError::Parse { .. })));
    }

    #[test]
    fn test_missing_dataset() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_ucr(root.path(), 3, false),
            Err(GatnError::MissingDataset(_))
        ));
    }

    fn toy_set(n: usize) -> TimeSeriesSet {
        let x = Array3::from_shape_fn((n, 4, 1), |(i, t, _)| (i * 4 + t) as f64);
        let y = (0..n).map(|i| i % 3).collect::<Array1<_>>();
        TimeSeriesSet::new(x, y, 3).unwrap()
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let set = toy_set(11);
        let (train, test) = set.split(0.5, 0);
        assert_eq!(test.len(), 6);
        assert_eq!(train.len(), 5);
        assert_eq!(set.split(0.5, 0), (train.clone(), test.clone()));

        let firsts = train
            .x()
            .outer_iter()
            .chain(test.x().outer_iter())
            .map(|s| s[[0, 0]] as usize)
            .sorted()
            .collect::<Vec<_>>();
        assert_eq!(firsts, (0..11).map(|i| i * 4).collect::<Vec<_>>());
    }

    #[test]
    fn test_without_class_and_batches() {
        let set = toy_set(10);
        let cleaned = set.without_class(0);
        assert!(cleaned.y().iter().all(|&l| l != 0));
        assert_eq!(cleaned.len(), 6);
        assert_eq!(set.class_indices(0), vec![0, 3, 6, 9]);

        let batches = set.batches(4).collect::<Vec<_>>();
        assert_eq!(batches.len(), set.num_batches(4));
        assert_eq!(batches.iter().map(|b| b.offset).collect::<Vec<_>>(), vec![0, 4, 8]);
        assert_eq!(batches[2].x.shape(), &[2, 4, 1]);
        for b in &batches {
            assert_le!(b.y.len(), 4);
        }
    }

    #[test]
    fn test_label_out_of_range_is_rejected() {
        let x = Array3::zeros((2, 3, 1));
        let y = Array1::from(vec![0, 2]);
        assert!(TimeSeriesSet::new(x, y, 2).is_err());
    }
}
