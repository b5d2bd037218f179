//! CSV results logs and per-run adversary logs
use crate::attack::{AdversaryRecord, AttackScores, Partition};
use crate::classifier::ClassifierKind;
use crate::error::{GatnError, Result};
use crate::TsFloat;
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RESULTS_HEADER: &str =
    "dataset_id,beta,train_mse,train_acc_realistic,train_acc_optimistic,train_target_rate,num_adversaries";

const ADVERSARY_HEADER: &str =
    "partition,sample_id,beta,success,mse,original_class,predicted_class,adversarial_class,target_class";

/// One line of a results log. A failed run is reported with every metric at -1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResultRow {
    pub dataset_id: usize,
    pub beta: TsFloat,
    pub mse: TsFloat,
    pub acc_realistic: TsFloat,
    pub acc_optimistic: TsFloat,
    pub target_rate: TsFloat,
    pub num_adversaries: i64,
}

impl ResultRow {
    pub fn from_scores(dataset_id: usize, beta: TsFloat, scores: &AttackScores) -> Self {
        Self {
            dataset_id,
            beta,
            mse: scores.mse,
            acc_realistic: scores.acc_realistic,
            acc_optimistic: scores.acc_optimistic,
            target_rate: scores.target_rate,
            num_adversaries: scores.num_adversaries() as i64,
        }
    }

    pub const fn failed(dataset_id: usize, beta: TsFloat) -> Self {
        Self {
            dataset_id,
            beta,
            mse: -1.,
            acc_realistic: -1.,
            acc_optimistic: -1.,
            target_rate: -1.,
            num_adversaries: -1,
        }
    }

    pub fn to_csv(&self) -> String {
        format!(
            "{},{:.5},{:.6},{:.6},{:.6},{:.6},{}",
            self.dataset_id,
            self.beta,
            self.mse,
            self.acc_realistic,
            self.acc_optimistic,
            self.target_rate,
            self.num_adversaries
        )
    }
}

/// Append-only results CSV; the header is written when the file is created.
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    /// `<log_dir>/gatn_nn_whitebox_results[_test]_<kind>.csv`
    pub fn new(log_dir: &Path, kind: ClassifierKind, partition: Partition) -> Self {
        let name = match partition {
            Partition::Train => format!("gatn_nn_whitebox_results_{}.csv", kind),
            Partition::Test => format!("gatn_nn_whitebox_results_test_{}.csv", kind),
        };
        Self {
            path: log_dir.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    pub fn append(&self, row: &ResultRow) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| GatnError::io(parent, e))?;
        }
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GatnError::io(&self.path, e))?;
        if is_new {
            writeln!(file, "{}", RESULTS_HEADER).map_err(|e| GatnError::io(&self.path, e))?;
        }
        writeln!(file, "{}", row.to_csv()).map_err(|e| GatnError::io(&self.path, e))
    }
}

/// `<log_dir>/adversaries/ucr_<id>/<kind>_target_<t>_<partition>_beta_<beta>.csv`
pub fn adversary_log_path(
    log_dir: &Path,
    dataset_id: usize,
    kind: ClassifierKind,
    target_class: usize,
    partition: Partition,
    beta: TsFloat,
) -> PathBuf {
    log_dir
        .join("adversaries")
        .join(format!("ucr_{}", dataset_id))
        .join(format!(
            "{}_target_{}_{}_beta_{}.csv",
            kind, target_class, partition, beta
        ))
}

/// Replace the log at `path` with `records`.
///
/// # Errors
pub fn write_adversary_log(path: &Path, records: &[AdversaryRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GatnError::io(parent, e))?;
    }
    let mut body = String::from(ADVERSARY_HEADER);
    body.push('\n');
    for r in records {
        body.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            r.partition,
            r.sample_id,
            r.beta,
            u8::from(r.success),
            r.mse,
            r.original_class,
            r.predicted_class,
            r.adversarial_class,
            r.target_class
        ));
    }
    fs::write(path, body).map_err(|e| GatnError::io(path, e))?;
    debug!("wrote {} records to {:?}", records.len(), path);
    Ok(())
}

/// # Errors
/// `MissingAdversaryLog` if there is no file at `path`, `Parse` on malformed lines
pub fn read_adversary_log(path: &Path) -> Result<Vec<AdversaryRecord>> {
    if !path.is_file() {
        return Err(GatnError::MissingAdversaryLog(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|e| GatnError::io(path, e))?;
    text.lines()
        .enumerate()
        .skip(1)
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_record(line).map_err(|msg| GatnError::parse(path, idx + 1, msg)))
        .collect()
}

fn parse_record(line: &str) -> std::result::Result<AdversaryRecord, String> {
    let fields = line.trim().split(',').collect::<Vec<_>>();
    if fields.len() != 9 {
        return Err(format!("expected 9 fields, found {}", fields.len()));
    }
    let int = |i: usize| -> std::result::Result<usize, String> {
        fields[i]
            .parse()
            .map_err(|_| format!("field {} is not an integer: {:?}", i + 1, fields[i]))
    };
    let float = |i: usize| -> std::result::Result<TsFloat, String> {
        fields[i]
            .parse()
            .map_err(|_| format!("field {} is not a number: {:?}", i + 1, fields[i]))
    };
    let partition = match fields[0] {
        "train" => Partition::Train,
        "test" => Partition::Test,
        other => return Err(format!("unknown partition {:?}", other)),
    };
    Ok(AdversaryRecord {
        partition,
        sample_id: int(1)?,
        beta: float(2)?,
        success: int(3)? != 0,
        mse: float(4)?,
        original_class: int(5)?,
        predicted_class: int(6)?,
        adversarial_class: int(7)?,
        target_class: int(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sample_id: usize, predicted_class: usize, adversarial_class: usize) -> AdversaryRecord {
        AdversaryRecord {
            partition: Partition::Test,
            sample_id,
            beta: 0.0005,
            success: adversarial_class == 0,
            mse: 0.125,
            original_class: 1,
            predicted_class,
            adversarial_class,
            target_class: 0,
        }
    }

    #[test]
    fn test_row_formatting() {
        let row = ResultRow {
            dataset_id: 3,
            beta: 0.0005,
            mse: 0.123_456_78,
            acc_realistic: 0.5,
            acc_optimistic: 0.25,
            target_rate: 1.,
            num_adversaries: 4,
        };
        assert_eq!(row.to_csv(), "3,0.00050,0.123457,0.500000,0.250000,1.000000,4");
        assert_eq!(
            ResultRow::failed(3, 0.1).to_csv(),
            "3,0.10000,-1.000000,-1.000000,-1.000000,-1.000000,-1"
        );
    }

    #[test]
    fn test_results_log_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::new(dir.path(), ClassifierKind::Lstm, Partition::Test);
        assert!(log.path().ends_with("gatn_nn_whitebox_results_test_lstm.csv"));
        log.append(&ResultRow::failed(1, 0.1)).unwrap();
        log.append(&ResultRow::failed(1, 0.01)).unwrap();
        let text = fs::read_to_string(log.path()).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RESULTS_HEADER);
    }

    #[test]
    fn test_adversary_log_is_replaced_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = adversary_log_path(dir.path(), 5, ClassifierKind::Cnn, 0, Partition::Test, 0.0005);
        assert!(path.ends_with("adversaries/ucr_5/cnn_target_0_test_beta_0.0005.csv"));
        assert!(matches!(
            read_adversary_log(&path),
            Err(GatnError::MissingAdversaryLog(_))
        ));

        write_adversary_log(&path, &[record(0, 1, 0), record(1, 1, 1), record(2, 0, 0)]).unwrap();
        write_adversary_log(&path, &[record(0, 1, 0), record(1, 1, 1)]).unwrap();
        let records = read_adversary_log(&path).unwrap();
        assert_eq!(records, vec![record(0, 1, 0), record(1, 1, 1)]);
        assert_eq!(
            records.iter().filter(|r| r.is_adversary()).map(|r| r.sample_id).collect::<Vec<_>>(),
            vec![0]
        );
    }

    #[test]
    fn test_malformed_log_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, format!("{}\ntest,1,0.1,1\n", ADVERSARY_HEADER)).unwrap();
        assert!(matches!(
            read_adversary_log(&path),
            Err(GatnError::Parse { line: 2, .. })
        ));
    }
}
