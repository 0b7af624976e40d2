//! melodist CLI: train a melody transformer, generate from a seed, export
//! note-event files.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use dfdx::tensor::AutoDevice;
use melodist::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliError = Box<dyn std::error::Error>;
type CliResult = std::result::Result<(), CliError>;

#[derive(Parser)]
#[command(name = "melodist")]
#[command(about = "Train a melody transformer and generate melodies from a seed")]
#[command(version)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// JSON array of token strings
    Array,
    /// One JSON string of comma separated tokens
    Record,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a corpus and save it with its vocabulary
    Train {
        /// Corpus file: a JSON array of melody records
        corpus: PathBuf,

        /// Output artifact directory
        #[arg(short, long, default_value = "melodist-model")]
        output: PathBuf,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f64>,

        /// Random seed for initialization and shuffling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Extend a seed melody with a trained model
    Generate {
        /// Trained artifact directory
        #[arg(short, long)]
        model: PathBuf,

        /// Seed as a record, e.g. "C4-1.0, E4-1.0", or a JSON array
        seed: String,

        /// Length of the result, seed included
        #[arg(long)]
        max_length: Option<usize>,

        /// Token that ends generation early
        #[arg(long)]
        stop_token: Option<String>,

        /// Write the melody here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "array")]
        format: OutputFormat,

        /// Also write a note-event file
        #[arg(long)]
        midi: Option<PathBuf>,
    },

    /// Convert a melody (JSON array or record string) to a note-event file
    ExportMidi {
        input: PathBuf,
        output: PathBuf,
    },

    /// Fit a vocabulary on a corpus and print its statistics
    Vocab {
        corpus: PathBuf,

        /// Print every token with its index
        #[arg(long)]
        list: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Train {
            corpus,
            output,
            epochs,
            batch_size,
            learning_rate,
            seed,
        } => {
            let mut train = config.train;
            train.epochs = epochs.unwrap_or(train.epochs);
            train.batch_size = batch_size.unwrap_or(train.batch_size);
            train.learning_rate = learning_rate.unwrap_or(train.learning_rate);
            train.seed = seed.unwrap_or(train.seed);
            cmd_train(&corpus, &output, config.model, &train)
        }
        Commands::Generate {
            model,
            seed,
            max_length,
            stop_token,
            output,
            format,
            midi,
        } => {
            let mut generate = config.generate.clone();
            generate.max_length = max_length.unwrap_or(generate.max_length);
            if stop_token.is_some() {
                generate.stop_token = stop_token;
            }
            cmd_generate(
                &model,
                &seed,
                &generate,
                output.as_deref(),
                format,
                midi.as_deref(),
                &config,
            )
        }
        Commands::ExportMidi { input, output } => cmd_export_midi(&input, &output, &config),
        Commands::Vocab { corpus, list } => cmd_vocab(&corpus, list),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> std::result::Result<MelodistConfig, CliError> {
    Ok(match path {
        Some(path) => MelodistConfig::from_json_file(path)?,
        None => MelodistConfig::default(),
    })
}

fn read_corpus(path: &Path) -> std::result::Result<Corpus, CliError> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read corpus {}: {e}", path.display()))?;
    let corpus = Corpus::from_json_str(&text)?;
    if corpus.is_empty() {
        return Err(format!("{} holds no usable melodies", path.display()).into());
    }
    Ok(corpus)
}

fn cmd_train(corpus: &Path, output: &Path, model: ModelConfig, train: &TrainConfig) -> CliResult {
    train.validate()?;
    let mut corpus = read_corpus(corpus)?;
    corpus.truncate(train.max_sequence_length);

    let vocab = Vocabulary::fit(corpus.melodies());
    let model = model.with_vocab_size(vocab.size_with_padding());
    let dataset = Dataset::from_melodies(&vocab, corpus.melodies(), train.batch_size)?
        .with_shuffle_window(train.shuffle_window)
        .with_seed(train.seed);

    println!("Training melody transformer");
    println!("===========================");
    println!("Melodies:     {}", corpus.len());
    println!("Rejected:     {}", corpus.rejected().len());
    println!("Vocabulary:   {} tokens", vocab.len());
    println!("Pairs:        {}", dataset.pair_count());
    println!("Epochs:       {}", train.epochs);
    println!();

    let dev = AutoDevice::seed_from_u64(train.seed);
    let mut trainer = Trainer::from_config(MelodyModel::build(&dev, model)?, train)?;
    let report = trainer.fit(&dataset, train.epochs)?;
    for (epoch, loss) in report.epoch_losses.iter().enumerate() {
        println!("  epoch {epoch:>3}  loss {loss:.5}");
    }

    ModelArtifact::new(trainer.into_model(), vocab)?.save(output)?;
    println!();
    println!("Saved model to {}", output.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_generate(
    model: &Path,
    seed: &str,
    generate: &GenerateConfig,
    output: Option<&Path>,
    format: OutputFormat,
    midi: Option<&Path>,
    config: &MelodistConfig,
) -> CliResult {
    let dev = AutoDevice::default();
    let artifact = ModelArtifact::load(model, &dev)?;
    let seed = if seed.trim_start().starts_with('[') {
        Melody::from_exchange_json(seed)?
    } else {
        Melody::parse_record(seed)?
    };

    let generator = Generator::new(&artifact.model, &artifact.vocabulary, generate)?;
    let melody = generator.generate(&seed)?;
    info!(tokens = melody.len(), "generated melody");

    let text = match format {
        OutputFormat::Array => melody.to_json_array()?,
        OutputFormat::Record => melody.to_json_record()?,
    };
    match output {
        Some(path) => fs::write(path, &text)?,
        None => println!("{text}"),
    }
    if let Some(path) = midi {
        let summary = write_midi(&melody, &config.timing, path)?;
        println!(
            "Wrote {} notes to {} ({} skipped)",
            summary.notes_written,
            path.display(),
            summary.skipped
        );
    }
    Ok(())
}

fn cmd_export_midi(input: &Path, output: &Path, config: &MelodistConfig) -> CliResult {
    let text = fs::read_to_string(input)
        .map_err(|e| format!("cannot read melody {}: {e}", input.display()))?;
    let melody = Melody::from_exchange_json(&text)?;
    let summary = write_midi(&melody, &config.timing, output)?;
    println!(
        "Wrote {} notes to {} ({} skipped)",
        summary.notes_written,
        output.display(),
        summary.skipped
    );
    Ok(())
}

fn cmd_vocab(corpus: &Path, list: bool) -> CliResult {
    let corpus = read_corpus(corpus)?;
    let vocab = Vocabulary::fit(corpus.melodies());

    println!("Melodies:          {}", corpus.len());
    println!("Rejected records:  {}", corpus.rejected().len());
    println!("Longest melody:    {}", corpus.max_melody_len());
    println!("Distinct tokens:   {}", vocab.len());
    println!("Size with padding: {}", vocab.size_with_padding());
    if list {
        println!();
        for (i, token) in vocab.tokens().iter().enumerate() {
            println!("  {:>5}  {token}", i + 1);
        }
    }
    Ok(())
}
