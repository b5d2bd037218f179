//! Experiment configuration and the search / evaluation drivers
use crate::attack::{attack_partitions, score_gatn, train_gatn, AttackConfig, GatnTraining, Partition};
use crate::checkpoint::{ClassifierCheckpoint, GeneratorCheckpoint, ModelStore};
use crate::classifier::{accuracy, train_classifier, Classifier, ClassifierArch, ClassifierKind, ClassifierTraining};
use crate::dataset::{list_ucr, load_ucr, summarize, DatasetSummary, TimeSeriesSet, UcrDataset};
use crate::error::{GatnError, Result};
use crate::results::{adversary_log_path, write_adversary_log, ResultRow, ResultsLog};
use crate::TsFloat;
use log::{info, warn};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How the archive's test split is divided between generator training and
/// generator evaluation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SplitSettings {
    pub test_fraction: TsFloat,
    pub seed: u64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            test_fraction: 0.5,
            seed: 0,
        }
    }
}

/// Everything a search, evaluation or visualization run needs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub data_root: PathBuf,
    pub weights_root: PathBuf,
    pub gatn_weights_root: PathBuf,
    pub log_dir: PathBuf,
    pub image_dir: PathBuf,
    pub classifier: ClassifierKind,
    pub generator_name: String,
    /// Archive ids to run on; empty means every dataset under `data_root`.
    pub datasets: Vec<usize>,
    pub target_class: usize,
    pub alpha: TsFloat,
    pub betas: Vec<TsFloat>,
    pub normalize: bool,
    pub split: SplitSettings,
    pub seed: u64,
    pub classifier_arch: ClassifierArch,
    pub classifier_training: ClassifierTraining,
    pub gatn: GatnTraining,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            weights_root: PathBuf::from("weights"),
            gatn_weights_root: PathBuf::from("gatn_weights"),
            log_dir: PathBuf::from("logs"),
            image_dir: PathBuf::from("images"),
            classifier: ClassifierKind::Cnn,
            generator_name: "gatn".to_string(),
            datasets: vec![],
            target_class: 0,
            alpha: 1.5,
            betas: vec![0.1, 0.05, 0.01, 0.005, 0.001, 0.0005, 0.0001, 0.00001],
            normalize: true,
            split: SplitSettings::default(),
            seed: 0,
            classifier_arch: ClassifierArch::default(),
            classifier_training: ClassifierTraining::default(),
            gatn: GatnTraining::default(),
        }
    }
}

impl ExperimentConfig {
    /// # Errors
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| GatnError::io(path, e))?;
        serde_json::from_str(&text).map_err(|source| GatnError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn store(&self) -> ModelStore {
        ModelStore::new(&self.weights_root, &self.gatn_weights_root, &self.generator_name)
    }

    /// # Errors
    /// If `datasets` is empty and the archive cannot be listed
    pub fn dataset_ids(&self) -> Result<Vec<usize>> {
        if self.datasets.is_empty() {
            list_ucr(&self.data_root)
        } else {
            Ok(self.datasets.clone())
        }
    }

    pub const fn attack_config(&self, dataset_id: usize, beta: TsFloat) -> AttackConfig {
        AttackConfig {
            dataset_id,
            target_class: self.target_class,
            alpha: self.alpha,
            beta,
        }
    }

    /// # Errors
    pub fn load_dataset(&self, dataset_id: usize) -> Result<UcrDataset> {
        load_ucr(&self.data_root, dataset_id, self.normalize)
    }

    /// Generator-train and generator-test partitions of a dataset.
    pub fn partitions(&self, dataset: &UcrDataset) -> (TimeSeriesSet, TimeSeriesSet) {
        attack_partitions(dataset, self.split.test_fraction, self.split.seed)
    }
}

/// Outcome of one (dataset, beta) search run.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchOutcome {
    pub dataset_id: usize,
    pub beta: TsFloat,
    pub result: std::result::Result<ResultRow, String>,
}

impl SearchOutcome {
    /// The logged row, or a row of -1 for a failed run.
    pub fn row(&self) -> ResultRow {
        match &self.result {
            Ok(row) => *row,
            Err(_) => ResultRow::failed(self.dataset_id, self.beta),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchSummary {
    pub outcomes: Vec<SearchOutcome>,
}

impl SearchSummary {
    pub fn successes(&self) -> impl Iterator<Item = &SearchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &SearchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Train and save a new classifier for `dataset`.
///
/// # Errors
pub fn fit_classifier(config: &ExperimentConfig, dataset: &UcrDataset) -> Result<ClassifierCheckpoint> {
    let mut rng = Pcg64::seed_from_u64(config.seed);
    let mut classifier = Classifier::build(
        config.classifier,
        dataset.seq_len(),
        dataset.channels(),
        dataset.num_classes(),
        &config.classifier_arch,
        &mut rng,
    )?;
    info!("training {} classifier on dataset {}", config.classifier, dataset.id);
    train_classifier(
        &mut classifier,
        &dataset.train,
        &dataset.test,
        &config.classifier_training,
        &mut rng,
    )?;
    info!(
        "dataset {}: train acc = {:.4} | test acc = {:.4}",
        dataset.id,
        accuracy(&classifier, &dataset.train, config.classifier_training.batch_size),
        accuracy(&classifier, &dataset.test, config.classifier_training.batch_size)
    );
    let store = config.store();
    store.save_classifier(dataset.id, &classifier)?;
    store.load_classifier(dataset.id, config.classifier)
}

/// The saved classifier for `dataset`, trained first if there is none.
///
/// # Errors
pub fn ensure_classifier(config: &ExperimentConfig, dataset: &UcrDataset) -> Result<ClassifierCheckpoint> {
    let store = config.store();
    if store.has_classifier(dataset.id, config.classifier) {
        store.load_classifier(dataset.id, config.classifier)
    } else {
        warn!(
            "no {} classifier for dataset {}, training one",
            config.classifier, dataset.id
        );
        fit_classifier(config, dataset)
    }
}

fn search_one(
    config: &ExperimentConfig,
    dataset: &UcrDataset,
    classifier: &ClassifierCheckpoint,
    beta: TsFloat,
) -> Result<ResultRow> {
    let attack = config.attack_config(dataset.id, beta);
    let store = config.store();
    let (train, test) = config.partitions(dataset);
    let mut rng = Pcg64::seed_from_u64(config.seed);
    info!(
        "dataset {}: training GATN for target {} with beta {}",
        dataset.id, attack.target_class, beta
    );
    let (generator, _) = train_gatn(
        &classifier.classifier,
        &train,
        &test,
        &attack,
        &config.gatn,
        &mut rng,
        |generator| {
            store
                .save_generator(
                    dataset.id,
                    &GeneratorCheckpoint {
                        classifier_fingerprint: classifier.fingerprint.clone(),
                        target_class: attack.target_class,
                        alpha: attack.alpha,
                        beta,
                        generator: generator.clone(),
                    },
                )
                .map(|_| ())
        },
    )?;

    let scores = score_gatn(
        &classifier.classifier,
        &generator,
        &train,
        &attack,
        Partition::Train,
        config.gatn.batch_size,
    )?;
    let row = ResultRow::from_scores(dataset.id, beta, &scores);
    write_adversary_log(
        &adversary_log_path(
            &config.log_dir,
            dataset.id,
            config.classifier,
            attack.target_class,
            Partition::Train,
            beta,
        ),
        &scores.records,
    )?;
    ResultsLog::new(&config.log_dir, config.classifier, Partition::Train).append(&row)?;
    info!(
        "dataset {} beta {}: mse = {:.6} | target rate = {:.6} | {} adversaries",
        dataset.id,
        beta,
        scores.mse,
        scores.target_rate,
        row.num_adversaries
    );
    Ok(row)
}

/// Train, score and log a generator for every configured dataset and beta.
///
/// A failure only affects its own (dataset, beta) run. It is reported in the
/// summary and never reaches the results log.
///
/// # Errors
/// If the dataset list cannot be determined
pub fn run_search(config: &ExperimentConfig) -> Result<SearchSummary> {
    let mut summary = SearchSummary::default();
    for dataset_id in config.dataset_ids()? {
        let prepared = config
            .load_dataset(dataset_id)
            .and_then(|dataset| ensure_classifier(config, &dataset).map(|clf| (dataset, clf)));
        for &beta in &config.betas {
            let result = match &prepared {
                Ok((dataset, classifier)) => {
                    search_one(config, dataset, classifier, beta).map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            if let Err(msg) = &result {
                warn!("dataset {} beta {} failed: {}", dataset_id, beta, msg);
            }
            summary.outcomes.push(SearchOutcome {
                dataset_id,
                beta,
                result,
            });
        }
    }
    Ok(summary)
}

/// Score saved generators on the generator-test partition.
///
/// # Errors
/// On the first dataset or checkpoint that cannot be loaded
pub fn run_eval(config: &ExperimentConfig) -> Result<Vec<ResultRow>> {
    let store = config.store();
    let results = ResultsLog::new(&config.log_dir, config.classifier, Partition::Test);
    let mut rows = Vec::new();
    for dataset_id in config.dataset_ids()? {
        let dataset = config.load_dataset(dataset_id)?;
        let classifier = store.load_classifier(dataset_id, config.classifier)?;
        let (_, test) = config.partitions(&dataset);
        for &beta in &config.betas {
            let attack = config.attack_config(dataset_id, beta);
            let checkpoint = store.load_generator(dataset_id, attack.target_class, beta, &classifier)?;
            let scores = score_gatn(
                &classifier.classifier,
                &checkpoint.generator,
                &test,
                &attack,
                Partition::Test,
                config.gatn.batch_size,
            )?;
            let row = ResultRow::from_scores(dataset_id, beta, &scores);
            results.append(&row)?;
            write_adversary_log(
                &adversary_log_path(
                    &config.log_dir,
                    dataset_id,
                    config.classifier,
                    attack.target_class,
                    Partition::Test,
                    beta,
                ),
                &scores.records,
            )?;
            info!(
                "dataset {} beta {}: test mse = {:.6} | acc = {:.6} | target rate = {:.6} | {} adversaries",
                dataset_id, beta, scores.mse, scores.acc_realistic, scores.target_rate, row.num_adversaries
            );
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Retrain and save the classifier of every configured dataset.
///
/// # Errors
pub fn run_train_classifiers(config: &ExperimentConfig) -> Result<Vec<ClassifierCheckpoint>> {
    config
        .dataset_ids()?
        .into_iter()
        .map(|id| config.load_dataset(id).and_then(|dataset| fit_classifier(config, &dataset)))
        .collect()
}

/// # Errors
pub fn list_datasets(config: &ExperimentConfig) -> Result<Vec<DatasetSummary>> {
    config
        .dataset_ids()?
        .into_iter()
        .map(|id| summarize(&config.data_root, id))
        .collect()
}
