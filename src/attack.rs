//! Training and scoring of a GATN against a frozen classifier
use crate::classifier::Classifier;
use crate::dataset::{TimeSeriesSet, UcrDataset};
use crate::dnn::softmax::argmax_rows;
use crate::error::{GatnError, Result};
use crate::gatn::{per_sample_mse, reconstruction_mse, reranking, targeted_mse, Generator};
use crate::optim::{Adam, ExponentialDecay};
use crate::TsFloat;
use log::{debug, info};
use ndarray::{Array3, ArrayView3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the attack data a score or record refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Test,
}

impl Partition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of one attack run.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct AttackConfig {
    pub dataset_id: usize,
    pub target_class: usize,
    /// Scale applied to the row maximum when reranking; greater than one.
    pub alpha: TsFloat,
    /// Weight of the reconstruction term.
    pub beta: TsFloat,
}

impl AttackConfig {
    /// # Errors
    /// If the target class does not exist
    pub fn check_target(&self, num_classes: usize) -> Result<()> {
        if self.target_class >= num_classes {
            return Err(GatnError::InvalidTargetClass {
                target: self.target_class,
                num_classes,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatnTraining {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: ExponentialDecay,
    pub hidden: Vec<usize>,
}

impl Default for GatnTraining {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 128,
            learning_rate: ExponentialDecay {
                lr_initial: 0.1,
                decay_steps: 1000,
                decay_rate: 0.96,
                staircase: false,
            },
            hidden: vec![256, 256],
        }
    }
}

/// The generator-train and generator-test partitions, both drawn from the
/// archive's test split.
pub fn attack_partitions(
    dataset: &UcrDataset,
    test_fraction: TsFloat,
    seed: u64,
) -> (TimeSeriesSet, TimeSeriesSet) {
    dataset.test.split(test_fraction, seed)
}

/// Outcome of attacking one sample.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AdversaryRecord {
    pub partition: Partition,
    pub sample_id: usize,
    pub beta: TsFloat,
    /// The adversarial prediction is the target class.
    pub success: bool,
    pub mse: TsFloat,
    pub original_class: usize,
    pub predicted_class: usize,
    pub adversarial_class: usize,
    pub target_class: usize,
}

impl AdversaryRecord {
    /// A correctly classified, non-target sample that was flipped to the target.
    pub fn is_adversary(&self) -> bool {
        self.success
            && self.predicted_class == self.original_class
            && self.predicted_class != self.target_class
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttackScores {
    pub mse: TsFloat,
    pub acc_realistic: TsFloat,
    pub acc_optimistic: TsFloat,
    pub target_rate: TsFloat,
    pub records: Vec<AdversaryRecord>,
}

impl AttackScores {
    pub fn num_adversaries(&self) -> usize {
        self.records.iter().filter(|r| r.is_adversary()).count()
    }
}

/// Statistics of one GATN training epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: TsFloat,
    pub test_acc: TsFloat,
    pub test_target_rate: TsFloat,
    pub improved: bool,
}

/// Perturb `x` with the generator, feeding it the classifier's target gradient.
pub fn perturb(
    classifier: &Classifier,
    generator: &Generator,
    x: &ArrayView3<TsFloat>,
    target: usize,
) -> Array3<TsFloat> {
    let (_, grad) = classifier.target_gradient(x, target);
    generator.forward(x, &grad.view())
}

/// Train a fresh generator against `classifier`.
///
/// Samples labelled with the target class are dropped from `train`.
/// `on_improve` is called with the generator every time the mean training
/// loss of an epoch improves on the best so far; the generator returned is
/// the one from that best epoch.
///
/// # Errors
/// If the target class does not exist, no training samples remain, the data
/// does not fit the classifier or `on_improve` fails
pub fn train_gatn<R, F>(
    classifier: &Classifier,
    train: &TimeSeriesSet,
    test: &TimeSeriesSet,
    config: &AttackConfig,
    settings: &GatnTraining,
    rng: &mut R,
    mut on_improve: F,
) -> Result<(Generator, Vec<EpochReport>)>
where
    R: Rng,
    F: FnMut(&Generator) -> Result<()>,
{
    config.check_target(classifier.num_classes())?;
    let train = train.without_class(config.target_class);
    if train.is_empty() {
        return Err(GatnError::EmptyDataset(format!(
            "generator training partition of dataset {} without class {}",
            config.dataset_id, config.target_class
        )));
    }
    classifier.check_input(&train.x())?;
    let batch_size = settings.batch_size.clamp(1, train.len());
    let mut generator = Generator::build(train.seq_len(), train.channels(), &settings.hidden, rng)?;
    debug!("{} with {} parameters", generator, generator.num_params());

    let mut adam = Adam::new(settings.learning_rate);
    let mut best = (TsFloat::INFINITY, generator.clone());
    let mut reports = Vec::with_capacity(settings.epochs);

    for epoch in 1..=settings.epochs {
        let shuffled = train.shuffled(rng);
        let mut losses = Vec::with_capacity(shuffled.num_batches(batch_size));
        for batch in shuffled.batches(batch_size) {
            let (probs, grad) = classifier.target_gradient(&batch.x, config.target_class);
            let reranked = reranking(&probs.view(), config.target_class, config.alpha);
            let x_adv = generator.forward(&batch.x, &grad.view());

            let adv_probs = classifier.predict_proba(&x_adv.view());
            let (loss_y, probs_grad) = targeted_mse(&adv_probs.view(), &reranked.view());
            let (loss_x, x_grad) = reconstruction_mse(&x_adv.view(), &batch.x);
            let output_grad =
                classifier.input_gradient(&x_adv.view(), &probs_grad.view()) + x_grad * config.beta;

            let param_grads = generator.backward(&batch.x, &grad.view(), &output_grad);
            adam.step(generator.params_mut(), &param_grads);
            losses.push(config.beta * loss_x + loss_y);
        }
        let train_loss = losses.iter().sum::<TsFloat>() / losses.len() as TsFloat;

        let scores = score_gatn(classifier, &generator, test, config, Partition::Test, batch_size)?;
        info!(
            "Epoch {}: Train Loss = {:.5} | Test Acc = {:.6} | Target rate = {:.6}",
            epoch, train_loss, scores.acc_realistic, scores.target_rate
        );

        let improved = train_loss < best.0;
        if improved {
            info!(
                "Saving weights as training loss improved from {:.5} to {:.5}",
                best.0, train_loss
            );
            on_improve(&generator)?;
            best = (train_loss, generator.clone());
        }
        reports.push(EpochReport {
            epoch,
            train_loss,
            test_acc: scores.acc_realistic,
            test_target_rate: scores.target_rate,
            improved,
        });
    }
    Ok((best.1, reports))
}

/// Attack every sample of `set` in order and score the outcome.
///
/// Sample ids are positions in `set`. The result only depends on the
/// weights, the samples and the config.
///
/// # Errors
/// If the target class does not exist or the data does not fit the classifier
pub fn score_gatn(
    classifier: &Classifier,
    generator: &Generator,
    set: &TimeSeriesSet,
    config: &AttackConfig,
    partition: Partition,
    batch_size: usize,
) -> Result<AttackScores> {
    config.check_target(classifier.num_classes())?;
    classifier.check_input(&set.x())?;
    let mut records = Vec::with_capacity(set.len());
    for batch in set.batches(batch_size.max(1)) {
        let (probs, grad) = classifier.target_gradient(&batch.x, config.target_class);
        let clean = argmax_rows(&probs.view());
        let x_adv = generator.forward(&batch.x, &grad.view());
        let adversarial = classifier.predict(&x_adv.view());
        let mse = per_sample_mse(&batch.x, &x_adv.view());
        for i in 0..batch.y.len() {
            records.push(AdversaryRecord {
                partition,
                sample_id: batch.offset + i,
                beta: config.beta,
                success: adversarial[i] == config.target_class,
                mse: mse[i],
                original_class: batch.y[i],
                predicted_class: clean[i],
                adversarial_class: adversarial[i],
                target_class: config.target_class,
            });
        }
    }

    let n = records.len().max(1) as TsFloat;
    let fraction = |pred: &dyn Fn(&AdversaryRecord) -> bool| {
        records.iter().filter(|&r| pred(r)).count() as TsFloat / n
    };
    Ok(AttackScores {
        mse: records.iter().map(|r| r.mse).sum::<TsFloat>() / n,
        acc_realistic: fraction(&|r| r.adversarial_class == r.original_class),
        acc_optimistic: fraction(&|r| r.adversarial_class == r.predicted_class),
        target_rate: fraction(&|r| r.success),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierArch, ClassifierKind};
    use ndarray::{Array1, Array3};
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn toy() -> (Classifier, TimeSeriesSet) {
        let mut rng = Pcg64::seed_from_u64(2);
        let arch = ClassifierArch {
            conv_filters: vec![4],
            conv_kernels: vec![3],
            lstm_units: 4,
        };
        let clf = Classifier::build(ClassifierKind::Cnn, 6, 1, 3, &arch, &mut rng).unwrap();
        let x = Array3::from_shape_fn((9, 6, 1), |(i, t, _)| ((i * 3 + t) as f64 * 0.7).sin());
        let y = (0..9).map(|i| i % 3).collect::<Array1<_>>();
        (clf, TimeSeriesSet::new(x, y, 3).unwrap())
    }

    fn config(target_class: usize) -> AttackConfig {
        AttackConfig {
            dataset_id: 0,
            target_class,
            alpha: 1.5,
            beta: 0.01,
        }
    }

    fn quick() -> GatnTraining {
        GatnTraining {
            epochs: 3,
            batch_size: 4,
            hidden: vec![8],
            ..GatnTraining::default()
        }
    }

    #[test]
    fn test_adversary_definition() {
        let mut record = AdversaryRecord {
            partition: Partition::Train,
            sample_id: 0,
            beta: 0.1,
            success: true,
            mse: 0.,
            original_class: 1,
            predicted_class: 1,
            adversarial_class: 0,
            target_class: 0,
        };
        assert!(record.is_adversary());
        record.predicted_class = 0;
        record.original_class = 0;
        assert!(!record.is_adversary());
        record.original_class = 2;
        record.predicted_class = 1;
        assert!(!record.is_adversary());
    }

    #[test]
    fn test_invalid_target_is_rejected() {
        let (clf, set) = toy();
        let mut rng = Pcg64::seed_from_u64(0);
        let res = train_gatn(&clf, &set, &set, &config(3), &quick(), &mut rng, |_| Ok(()));
        assert!(matches!(
            res,
            Err(GatnError::InvalidTargetClass {
                target: 3,
                num_classes: 3
            })
        ));
    }

    #[test]
    fn test_training_saves_on_improvement() {
        let (clf, set) = toy();
        let mut rng = Pcg64::seed_from_u64(0);
        let mut saves = 0;
        let (generator, reports) =
            train_gatn(&clf, &set, &set, &config(1), &quick(), &mut rng, |_| {
                saves += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports[0].improved);
        assert_eq!(saves, reports.iter().filter(|r| r.improved).count());

        let x_adv = perturb(&clf, &generator, &set.x(), 1);
        assert_eq!(x_adv.shape(), set.x().shape());
    }

    #[test]
    fn test_scoring_is_deterministic_and_consistent() {
        let (clf, set) = toy();
        let mut rng = Pcg64::seed_from_u64(4);
        let generator = Generator::build(6, 1, &[5], &mut rng).unwrap();
        let first = score_gatn(&clf, &generator, &set, &config(0), Partition::Test, 4).unwrap();
        let second = score_gatn(&clf, &generator, &set, &config(0), Partition::Test, 4).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.records.len(), set.len());
        assert_eq!(
            first.records.iter().map(|r| r.sample_id).collect::<Vec<_>>(),
            (0..set.len()).collect::<Vec<_>>()
        );
        for record in &first.records {
            if record.predicted_class == 0 {
                assert!(!record.is_adversary());
            }
        }
        assert!(first.num_adversaries() <= first.records.len());
        assert!((0. ..=1.).contains(&first.target_rate));
    }
}
