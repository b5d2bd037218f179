//! The frozen target classifiers (FCN and LSTM) and their supervised training
use crate::dataset::TimeSeriesSet;
use crate::dnn::softmax::{argmax_rows, cross_entropy, softmax, softmax_backward};
use crate::dnn::{Conv1d, Dense, GlobalAvgPool1d, Layer, Lstm, ReLU, DNN};
use crate::error::{GatnError, Result};
use crate::optim::{Adam, ExponentialDecay};
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Ix3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Cnn,
    Lstm,
}

impl ClassifierKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cnn => "cnn",
            Self::Lstm => "lstm",
        }
    }

    /// Directory and file stem of the classifier checkpoint.
    pub fn checkpoint_name(self) -> String {
        format!("gridsearch-{}", self.as_str())
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Layer sizes of both architectures.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierArch {
    pub conv_filters: Vec<usize>,
    pub conv_kernels: Vec<usize>,
    pub lstm_units: usize,
}

impl Default for ClassifierArch {
    fn default() -> Self {
        Self {
            conv_filters: vec![128, 256, 128],
            conv_kernels: vec![8, 5, 3],
            lstm_units: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierTraining {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: TsFloat,
}

impl Default for ClassifierTraining {
    fn default() -> Self {
        Self {
            epochs: 300,
            batch_size: 128,
            learning_rate: 1e-3,
        }
    }
}

/// A network producing logits, read through a softmax.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Classifier {
    kind: ClassifierKind,
    num_classes: usize,
    dnn: DNN,
}

impl Classifier {
    /// Fresh Glorot-initialized classifier for sequences of shape (`seq_len`, `channels`).
    ///
    /// # Errors
    /// If the architecture is inconsistent
    pub fn build<R: Rng>(
        kind: ClassifierKind,
        seq_len: usize,
        channels: usize,
        num_classes: usize,
        arch: &ClassifierArch,
        rng: &mut R,
    ) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer>> = Vec::new();
        match kind {
            ClassifierKind::Cnn => {
                if arch.conv_filters.is_empty() || arch.conv_filters.len() != arch.conv_kernels.len() {
                    return Err(GatnError::Shape(format!(
                        "{} conv filter counts for {} kernel sizes",
                        arch.conv_filters.len(),
                        arch.conv_kernels.len()
                    )));
                }
                let mut c_in = channels;
                for (&filters, &kernel) in arch.conv_filters.iter().zip(&arch.conv_kernels) {
                    layers.push(Box::new(Conv1d::glorot(seq_len, kernel, c_in, filters, rng)));
                    layers.push(Box::new(ReLU::new(TensorShape::new(vec![seq_len, filters]))));
                    c_in = filters;
                }
                layers.push(Box::new(GlobalAvgPool1d::new(seq_len, c_in)));
                layers.push(Box::new(Dense::glorot(c_in, num_classes, rng)));
            }
            ClassifierKind::Lstm => {
                layers.push(Box::new(Lstm::glorot(seq_len, channels, arch.lstm_units, rng)));
                layers.push(Box::new(Dense::glorot(arch.lstm_units, num_classes, rng)));
            }
        }
        let dnn = DNN::new(layers)?;
        debug!("built {} classifier: {}", kind, dnn);
        Ok(Self {
            kind,
            num_classes,
            dnn,
        })
    }

    pub const fn kind(&self) -> ClassifierKind {
        self.kind
    }

    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub const fn dnn(&self) -> &DNN {
        &self.dnn
    }

    /// Per-sample input shape (T, C).
    pub fn input_shape(&self) -> TensorShape {
        self.dnn.input_shape()
    }

    /// # Errors
    /// If `x` does not have the per-sample shape the classifier was built for
    pub fn check_input(&self, x: &ArrayView3<TsFloat>) -> Result<()> {
        if self.input_shape().matches_batched(x.shape()) {
            Ok(())
        } else {
            Err(GatnError::Shape(format!(
                "classifier expects samples of shape {} but got {:?}",
                self.input_shape(),
                &x.shape()[1..]
            )))
        }
    }

    pub fn logits(&self, x: &ArrayView3<TsFloat>) -> Array2<TsFloat> {
        to_matrix(self.dnn.forward(&x.to_owned().into_dyn()))
    }

    pub fn predict_proba(&self, x: &ArrayView3<TsFloat>) -> Array2<TsFloat> {
        softmax(&self.logits(x).view())
    }

    pub fn predict(&self, x: &ArrayView3<TsFloat>) -> Array1<usize> {
        argmax_rows(&self.predict_proba(x).view())
    }

    /// Gradient of `sum(p(x) * probs_grad)` w.r.t. `x`.
    pub fn input_gradient(
        &self,
        x: &ArrayView3<TsFloat>,
        probs_grad: &ArrayView2<TsFloat>,
    ) -> Array3<TsFloat> {
        let trace = self.dnn.forward_trace(&x.to_owned().into_dyn());
        let probs = softmax(&to_matrix_ref(&trace[trace.len() - 1]).view());
        let logits_grad = softmax_backward(&probs.view(), probs_grad);
        let (input_grad, _) = self.dnn.backward(&trace, logits_grad.into_dyn());
        to_batch(input_grad)
    }

    /// Class probabilities and the gradient of each sample's target-class
    /// probability w.r.t. that sample.
    pub fn target_gradient(
        &self,
        x: &ArrayView3<TsFloat>,
        target: usize,
    ) -> (Array2<TsFloat>, Array3<TsFloat>) {
        let trace = self.dnn.forward_trace(&x.to_owned().into_dyn());
        let probs = softmax(&to_matrix_ref(&trace[trace.len() - 1]).view());
        let mut selector = Array2::zeros(probs.raw_dim());
        selector.column_mut(target).fill(1.);
        let logits_grad = softmax_backward(&probs.view(), &selector.view());
        let (input_grad, _) = self.dnn.backward(&trace, logits_grad.into_dyn());
        (probs, to_batch(input_grad))
    }

    /// Hex SHA-256 of the serialized weights.
    ///
    /// # Errors
    /// If serialization fails
    pub fn fingerprint(&self) -> std::result::Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&json)))
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} classes): {}", self.kind, self.num_classes, self.dnn)
    }
}

fn to_matrix(out: ndarray::ArrayD<TsFloat>) -> Array2<TsFloat> {
    out.into_dimensionality().unwrap()
}

fn to_matrix_ref(out: &ndarray::ArrayD<TsFloat>) -> Array2<TsFloat> {
    out.view().into_dimensionality().unwrap().to_owned()
}

fn to_batch(grad: ndarray::ArrayD<TsFloat>) -> Array3<TsFloat> {
    grad.into_dimensionality::<Ix3>().unwrap()
}

/// Fraction of `set` classified correctly.
pub fn accuracy(classifier: &Classifier, set: &TimeSeriesSet, batch_size: usize) -> TsFloat {
    if set.is_empty() {
        return 0.;
    }
    let correct: usize = set
        .batches(batch_size)
        .map(|batch| {
            classifier
                .predict(&batch.x)
                .iter()
                .zip(batch.y)
                .filter(|(p, y)| p == y)
                .count()
        })
        .sum();
    correct as TsFloat / set.len() as TsFloat
}

/// Per-epoch statistics of classifier training.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: TsFloat,
    pub val_accuracy: TsFloat,
}

/// Supervised training with softmax cross-entropy and Adam.
///
/// The classifier ends up holding the weights of the epoch with the lowest
/// mean training loss.
///
/// # Errors
/// If the training set is empty or does not match the classifier
pub fn train_classifier<R: Rng>(
    classifier: &mut Classifier,
    train: &TimeSeriesSet,
    validation: &TimeSeriesSet,
    settings: &ClassifierTraining,
    rng: &mut R,
) -> Result<Vec<EpochStats>> {
    if train.is_empty() {
        return Err(GatnError::EmptyDataset("classifier training set".to_string()));
    }
    classifier.check_input(&train.x())?;
    let batch_size = settings.batch_size.clamp(1, train.len());
    let mut adam = Adam::new(ExponentialDecay::constant(settings.learning_rate));
    let mut best = (TsFloat::INFINITY, classifier.dnn.clone());
    let mut history = Vec::with_capacity(settings.epochs);

    for epoch in 1..=settings.epochs {
        let shuffled = train.shuffled(rng);
        let mut total = 0.;
        for batch in shuffled.batches(batch_size) {
            let trace = classifier.dnn.forward_trace(&batch.x.to_owned().into_dyn());
            let probs = softmax(&to_matrix_ref(&trace[trace.len() - 1]).view());
            let (loss, logits_grad) = cross_entropy(&probs.view(), &batch.y);
            let (_, grads) = classifier.dnn.backward(&trace, logits_grad.into_dyn());
            adam.step(classifier.dnn.params_mut(), &grads);
            total += loss * batch.y.len() as TsFloat;
        }
        let loss = total / train.len() as TsFloat;
        let val_accuracy = accuracy(classifier, validation, batch_size);
        info!(
            "Epoch {}/{}: loss = {:.5} | val acc = {:.4}",
            epoch, settings.epochs, loss, val_accuracy
        );
        if loss < best.0 {
            debug!("training loss improved from {:.5} to {:.5}", best.0, loss);
            best = (loss, classifier.dnn.clone());
        }
        history.push(EpochStats {
            epoch,
            loss,
            val_accuracy,
        });
    }
    classifier.dnn = best.1;
    Ok(history)
}
