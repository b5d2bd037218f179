//! JSON checkpoints of classifiers and generators
use crate::classifier::{Classifier, ClassifierKind};
use crate::error::{GatnError, Result};
use crate::gatn::Generator;
use crate::TsFloat;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A classifier together with the fingerprint of its weights.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClassifierCheckpoint {
    pub fingerprint: String,
    pub classifier: Classifier,
}

/// A generator and the classifier it was trained against.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GeneratorCheckpoint {
    pub classifier_fingerprint: String,
    pub target_class: usize,
    pub alpha: TsFloat,
    pub beta: TsFloat,
    pub generator: Generator,
}

/// Locates checkpoints under the two weight roots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelStore {
    weights_root: PathBuf,
    gatn_weights_root: PathBuf,
    generator_name: String,
}

impl ModelStore {
    pub fn new(
        weights_root: impl Into<PathBuf>,
        gatn_weights_root: impl Into<PathBuf>,
        generator_name: impl Into<String>,
    ) -> Self {
        Self {
            weights_root: weights_root.into(),
            gatn_weights_root: gatn_weights_root.into(),
            generator_name: generator_name.into(),
        }
    }

    /// `<weights_root>/ucr/<id>/<name>/<name>.json`
    pub fn classifier_path(&self, dataset_id: usize, kind: ClassifierKind) -> PathBuf {
        let name = kind.checkpoint_name();
        self.weights_root
            .join("ucr")
            .join(dataset_id.to_string())
            .join(&name)
            .join(format!("{}.json", name))
    }

    /// `<gatn_weights_root>/ucr/<id>/<generator>_<target>/beta_<beta>.json`
    pub fn generator_path(&self, dataset_id: usize, target_class: usize, beta: TsFloat) -> PathBuf {
        self.gatn_weights_root
            .join("ucr")
            .join(dataset_id.to_string())
            .join(format!("{}_{}", self.generator_name, target_class))
            .join(format!("beta_{}.json", beta))
    }

    pub fn has_classifier(&self, dataset_id: usize, kind: ClassifierKind) -> bool {
        self.classifier_path(dataset_id, kind).is_file()
    }

    /// # Errors
    pub fn save_classifier(&self, dataset_id: usize, classifier: &Classifier) -> Result<PathBuf> {
        let path = self.classifier_path(dataset_id, classifier.kind());
        let fingerprint = classifier.fingerprint().map_err(|source| GatnError::Serde {
            path: path.clone(),
            source,
        })?;
        let checkpoint = ClassifierCheckpoint {
            fingerprint,
            classifier: classifier.clone(),
        };
        write_json(&path, &checkpoint)?;
        info!("saved classifier to {:?}", path);
        Ok(path)
    }

    /// # Errors
    /// `MissingCheckpoint` if nothing was saved for this dataset and kind
    pub fn load_classifier(&self, dataset_id: usize, kind: ClassifierKind) -> Result<ClassifierCheckpoint> {
        let path = self.classifier_path(dataset_id, kind);
        let checkpoint: ClassifierCheckpoint = read_json(&path)?;
        debug!("loaded classifier {} from {:?}", checkpoint.fingerprint, path);
        Ok(checkpoint)
    }

    /// # Errors
    pub fn save_generator(
        &self,
        dataset_id: usize,
        checkpoint: &GeneratorCheckpoint,
    ) -> Result<PathBuf> {
        let path = self.generator_path(dataset_id, checkpoint.target_class, checkpoint.beta);
        write_json(&path, checkpoint)?;
        debug!("saved generator to {:?}", path);
        Ok(path)
    }

    /// Load the generator for (dataset, target, beta) and check that it was
    /// trained against `classifier`.
    ///
    /// # Errors
    /// `MissingCheckpoint` if it does not exist, `ClassifierMismatch` if it
    /// belongs to a different classifier
    pub fn load_generator(
        &self,
        dataset_id: usize,
        target_class: usize,
        beta: TsFloat,
        classifier: &ClassifierCheckpoint,
    ) -> Result<GeneratorCheckpoint> {
        let path = self.generator_path(dataset_id, target_class, beta);
        let checkpoint: GeneratorCheckpoint = read_json(&path)?;
        if checkpoint.classifier_fingerprint != classifier.fingerprint {
            return Err(GatnError::ClassifierMismatch {
                expected: checkpoint.classifier_fingerprint,
                found: classifier.fingerprint.clone(),
            });
        }
        Ok(checkpoint)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GatnError::io(parent, e))?;
    }
    let file = fs::File::create(path).map_err(|e| GatnError::io(path, e))?;
    serde_json::to_writer(std::io::BufWriter::new(file), value).map_err(|source| GatnError::Serde {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(GatnError::MissingCheckpoint(path.to_path_buf()));
    }
    let file = fs::File::open(path).map_err(|e| GatnError::io(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| GatnError::Serde {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierArch;
    use ndarray::Array3;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn store(root: &Path) -> ModelStore {
        ModelStore::new(root.join("weights"), root.join("gatn_weights"), "gatn")
    }

    #[test]
    fn test_paths() {
        let store = ModelStore::new("w", "g", "gatn");
        assert_eq!(
            store.classifier_path(12, ClassifierKind::Cnn),
            PathBuf::from("w/ucr/12/gridsearch-cnn/gridsearch-cnn.json")
        );
        assert_eq!(
            store.generator_path(12, 1, 0.005),
            PathBuf::from("g/ucr/12/gatn_1/beta_0.005.json")
        );
    }

    #[test]
    fn test_roundtrip_and_fingerprint_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut rng = Pcg64::seed_from_u64(9);
        let arch = ClassifierArch {
            conv_filters: vec![2],
            conv_kernels: vec![3],
            lstm_units: 2,
        };
        let clf = Classifier::build(ClassifierKind::Cnn, 5, 1, 2, &arch, &mut rng).unwrap();
        assert!(matches!(
            store.load_classifier(1, ClassifierKind::Cnn),
            Err(GatnError::MissingCheckpoint(_))
        ));
        store.save_classifier(1, &clf).unwrap();
        assert!(store.has_classifier(1, ClassifierKind::Cnn));
        let loaded = store.load_classifier(1, ClassifierKind::Cnn).unwrap();
        assert_eq!(loaded.fingerprint, clf.fingerprint().unwrap());
        let x = Array3::from_elem((2, 5, 1), 0.3);
        assert!(loaded
            .classifier
            .predict_proba(&x.view())
            .abs_diff_eq(&clf.predict_proba(&x.view()), 1e-12));

        let generator = Generator::build(5, 1, &[3], &mut rng).unwrap();
        let checkpoint = GeneratorCheckpoint {
            classifier_fingerprint: loaded.fingerprint.clone(),
            target_class: 0,
            alpha: 1.5,
            beta: 0.1,
            generator,
        };
        store.save_generator(1, &checkpoint).unwrap();
        assert!(store.load_generator(1, 0, 0.1, &loaded).is_ok());
        assert!(matches!(
            store.load_generator(1, 0, 0.01, &loaded),
            Err(GatnError::MissingCheckpoint(_))
        ));

        let other = ClassifierCheckpoint {
            fingerprint: "0".repeat(64),
            classifier: clf,
        };
        assert!(matches!(
            store.load_generator(1, 0, 0.1, &other),
            Err(GatnError::ClassifierMismatch { .. })
        ));
    }
}
