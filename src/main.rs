use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use gatn_rs::experiment::{
    list_datasets, run_eval, run_search, run_train_classifiers, ExperimentConfig, SearchOutcome,
};
use gatn_rs::visualize::{list_adversaries, render_sample, SampleQuery};
use gatn_rs::{ClassifierKind, Partition};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gatn", version, about = "White-box GATN attacks on UCR time series classifiers")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON experiment configuration; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Overrides {
    /// Classifier architecture to attack
    #[arg(long, value_enum, global = true)]
    classifier: Option<ClassifierKind>,

    /// Target class of the attack
    #[arg(long, global = true)]
    target: Option<usize>,

    /// Dataset ids to process (repeatable); defaults to the configured list
    #[arg(long = "dataset", global = true)]
    datasets: Vec<usize>,

    /// Betas to sweep (repeatable); defaults to the configured list
    #[arg(long = "beta", global = true)]
    betas: Vec<f64>,

    #[arg(long, global = true)]
    data_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the datasets present in the archive
    Datasets,
    /// Train and save the target classifiers
    TrainClassifier,
    /// Train a generator per dataset and beta and log the adversaries found
    Search,
    /// Score saved generators on the held-out partition
    Eval,
    /// List adversaries of a run, or plot one sample
    Visualize(VisualizeArgs),
}

#[derive(Args, Debug)]
struct VisualizeArgs {
    /// Sample to plot; without it the adversary ids are listed
    #[arg(long)]
    sample_id: Option<usize>,

    /// Select the n-th sample of this class instead of a partition position
    #[arg(long)]
    class_id: Option<usize>,

    #[arg(long, value_enum, default_value = "test")]
    partition: Partition,

    /// Overlay original and adversarial series in one panel
    #[arg(long)]
    plot_delta: bool,
}

fn init_logging(log_dir: &Path, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{h({l})} {t} - {m}{n}")))
        .build();
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} {t} - {m}{n}")))
        .build(log_dir.join("gatn.log"))
        .with_context(|| format!("cannot open log file in {:?}", log_dir))?;

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(
            Root::builder()
                .appender("stderr")
                .appender("logfile")
                .build(level),
        )?;
    log4rs::init_config(config)?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ExperimentConfig> {
    let mut config = match &cli.config {
        Some(path) => ExperimentConfig::from_file(path)
            .with_context(|| format!("cannot load experiment config {:?}", path))?,
        None => ExperimentConfig::default(),
    };
    let o = &cli.overrides;
    if let Some(kind) = o.classifier {
        config.classifier = kind;
    }
    if let Some(target) = o.target {
        config.target_class = target;
    }
    if !o.datasets.is_empty() {
        config.datasets = o.datasets.clone();
    }
    if !o.betas.is_empty() {
        config.betas = o.betas.clone();
    }
    if let Some(root) = &o.data_root {
        config.data_root = root.clone();
    }
    Ok(config)
}

fn visualize(config: &ExperimentConfig, args: &VisualizeArgs) -> Result<()> {
    let (dataset_id, beta) = match (config.datasets.as_slice(), config.betas.as_slice()) {
        ([dataset_id], [beta]) => (*dataset_id, *beta),
        _ => bail!("visualize needs exactly one --dataset and one --beta"),
    };

    match args.sample_id {
        None if args.class_id.is_none() => {
            let ids = list_adversaries(config, dataset_id, args.partition, beta)?;
            println!(
                "Adversary List (dataset {}, {} partition, beta {}, target {}):",
                dataset_id, args.partition, beta, config.target_class
            );
            println!("{:?}", ids);
            println!("Number of adversaries : {}", ids.len());
        }
        sample_id => {
            let report = render_sample(
                config,
                &SampleQuery {
                    dataset_id,
                    beta,
                    partition: args.partition,
                    sample_id: sample_id.unwrap_or(0),
                    class_id: args.class_id,
                    plot_delta: args.plot_delta,
                },
            )?;
            println!("Sample {} of the {} partition", report.sample_id, report.partition);
            println!("Ground truth class : {}", report.ground_truth);
            println!(
                "Predicted class : {} (probability {:.6})",
                report.clean_class, report.clean_prob
            );
            println!(
                "Adversarial class : {} (probability {:.6})",
                report.adversarial_class, report.adversarial_prob
            );
            println!("MSE : {:.6}", report.mse);
            println!("Saved image to {}", report.image.display());
        }
    }
    Ok(())
}

fn print_outcomes<'a>(heading: &str, outcomes: impl Iterator<Item = &'a SearchOutcome>) {
    println!("\n{} {} {}", "*".repeat(20), heading, "*".repeat(20));
    for outcome in outcomes {
        println!("{}", outcome.row().to_csv());
        if let Err(msg) = &outcome.result {
            println!("    {}", msg);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("cannot create {:?}", config.log_dir))?;
    init_logging(&config.log_dir, cli.verbose)?;

    match &cli.command {
        Command::Datasets => {
            for summary in list_datasets(&config).context("listing datasets")? {
                println!(
                    "{:>4}  train {:>5}  test {:>5}  length {:>5}  classes {:>3}",
                    summary.id, summary.train_size, summary.test_size, summary.seq_len, summary.num_classes
                );
            }
        }
        Command::TrainClassifier => {
            let saved = run_train_classifiers(&config).context("training classifiers")?;
            println!("Trained {} classifier(s)", saved.len());
        }
        Command::Search => {
            let summary = run_search(&config).context("running search")?;
            println!("\nAll searches complete !");
            print_outcomes("SUCCESSES", summary.successes());
            print_outcomes("ERRORS", summary.errors());
        }
        Command::Eval => {
            let rows = run_eval(&config).context("evaluation aborted")?;
            println!("Evaluated {} generator(s)", rows.len());
        }
        Command::Visualize(args) => visualize(&config, args)?,
    }
    Ok(())
}
