#![allow(clippy::must_use_candidate)]
//! White-box Gradient Adversarial Transformation Networks (GATN) against
//! time series classifiers trained on the UCR archive.
//!
//! The pipeline loads a dataset, trains (or restores) a CNN or LSTM
//! classifier, trains one residual generator per beta that turns a series
//! and the classifier's target-class gradient into a targeted adversarial
//! series, then scores, logs and plots the result.
extern crate ndarray;
extern crate ndarray_stats;
extern crate rand;

pub mod affine;
pub mod attack;
pub mod checkpoint;
pub mod classifier;
pub mod dataset;
pub mod dnn;
pub mod error;
pub mod experiment;
pub mod gatn;
pub mod optim;
pub mod results;
pub mod tensorshape;
pub mod visualize;

#[cfg(test)]
mod test_util;

/// Scalar type used throughout the numerical core.
pub type TsFloat = f64;

pub use attack::{AdversaryRecord, AttackScores, Partition};
pub use classifier::{Classifier, ClassifierKind};
pub use dataset::{TimeSeriesSet, UcrDataset};
pub use error::{GatnError, Result};
pub use experiment::ExperimentConfig;
pub use gatn::Generator;
