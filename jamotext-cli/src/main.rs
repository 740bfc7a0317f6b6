use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use log::info;

use jamotext::{Args, JamoText, JamoTextErrorKind, JamoTextResult, ModelKind};

/// Word and sentence embeddings with Korean jamo subwords.
#[derive(Parser, Debug)]
#[command(name = "jamotext", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a skipgram model.
    Skipgram(TrainOpts),
    /// Train a cbow model.
    Cbow(TrainOpts),
    /// Train a supervised classifier.
    Supervised(TrainOpts),
    /// Product-quantize a trained supervised model.
    Quantize(QuantizeOpts),
    /// Evaluate precision and recall at k on a labeled file.
    Test {
        /// Trained model (.bin or .ftz).
        model: PathBuf,
        /// Labeled test file, or `-` for standard input.
        test_file: String,
        #[arg(default_value_t = 1)]
        k: i32,
    },
    /// Print the k most probable labels for each input line.
    Predict {
        model: PathBuf,
        /// Labeled test file, or `-` for standard input.
        test_file: String,
        #[arg(default_value_t = 1)]
        k: i32,
        /// Emit predictions as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Print the k most probable labels with their probabilities.
    PredictProb {
        model: PathBuf,
        test_file: String,
        #[arg(default_value_t = 1)]
        k: i32,
        #[arg(long)]
        json: bool,
    },
    /// Print word vectors for words read from standard input.
    PrintWordVectors { model: PathBuf },
    /// Print sentence vectors for lines read from standard input.
    PrintSentenceVectors { model: PathBuf },
    /// Print the subword n-gram vectors of a word.
    PrintNgrams { model: PathBuf, word: String },
    /// Query nearest neighbors interactively.
    Nn {
        model: PathBuf,
        #[arg(default_value_t = 10)]
        k: i32,
    },
    /// Query analogies (A - B + C) interactively.
    Analogies {
        model: PathBuf,
        #[arg(default_value_t = 10)]
        k: i32,
    },
}

#[derive(ClapArgs, Debug)]
struct TrainOpts {
    /// Training file path, or `-` for standard input.
    #[arg(long)]
    input: String,
    /// Output files basename; writes <output>.bin and <output>.vec.
    #[arg(long)]
    output: String,
    /// Learning rate.
    #[arg(long)]
    lr: Option<f64>,
    /// Rate of learning-rate updates, in tokens.
    #[arg(long)]
    lr_update_rate: Option<i32>,
    /// Size of the word vectors.
    #[arg(long)]
    dim: Option<i32>,
    /// Size of the context window.
    #[arg(long)]
    ws: Option<i32>,
    /// Number of epochs.
    #[arg(long)]
    epoch: Option<i32>,
    /// Minimal number of word occurrences.
    #[arg(long)]
    min_count: Option<i32>,
    /// Minimal number of label occurrences.
    #[arg(long)]
    min_count_label: Option<i32>,
    /// Number of negatives sampled.
    #[arg(long)]
    neg: Option<i32>,
    /// Max length of word n-grams.
    #[arg(long)]
    word_ngrams: Option<i32>,
    /// Loss function: ns, hs or softmax.
    #[arg(long)]
    loss: Option<String>,
    /// Number of subword hash buckets.
    #[arg(long)]
    bucket: Option<i32>,
    /// Min length of char n-grams.
    #[arg(long)]
    minn: Option<i32>,
    /// Max length of char n-grams.
    #[arg(long)]
    maxn: Option<i32>,
    /// Number of worker threads.
    #[arg(long)]
    thread: Option<i32>,
    /// Sampling threshold.
    #[arg(long)]
    t: Option<f64>,
    /// Label prefix.
    #[arg(long)]
    label: Option<String>,
    /// Verbosity level.
    #[arg(long)]
    verbose: Option<i32>,
    /// Vector text file to seed the input matrix from.
    #[arg(long)]
    pretrained_vectors: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct QuantizeOpts {
    /// Model basename; loads <output>.bin and writes <output>.ftz.
    #[arg(long)]
    output: String,
    /// Training file, only needed together with --retrain.
    #[arg(long)]
    input: Option<String>,
    /// Number of input rows to keep, 0 keeps everything.
    #[arg(long, default_value_t = 0)]
    cutoff: i32,
    /// Sub-quantizer slice width.
    #[arg(long, default_value_t = 2)]
    dsub: i32,
    /// Quantize row norms separately.
    #[arg(long)]
    qnorm: bool,
    /// Quantize the output matrix as well.
    #[arg(long)]
    qout: bool,
    /// Retrain the pruned embeddings before quantizing.
    #[arg(long)]
    retrain: bool,
    /// Epochs for retraining.
    #[arg(long)]
    epoch: Option<i32>,
    /// Learning rate for retraining.
    #[arg(long)]
    lr: Option<f64>,
}

fn build_args(model: ModelKind, opts: TrainOpts) -> JamoTextResult<Args> {
    let mut args = match model {
        ModelKind::Supervised => Args::supervised(),
        _ => Args::default(),
    };
    args.model = model;
    args.input = opts.input;
    args.output = opts.output;
    if let Some(v) = opts.lr {
        args.lr = v;
    }
    if let Some(v) = opts.lr_update_rate {
        args.lr_update_rate = v;
    }
    if let Some(v) = opts.dim {
        args.dim = v;
    }
    if let Some(v) = opts.ws {
        args.ws = v;
    }
    if let Some(v) = opts.epoch {
        args.epoch = v;
    }
    if let Some(v) = opts.min_count {
        args.min_count = v;
    }
    if let Some(v) = opts.min_count_label {
        args.min_count_label = v;
    }
    if let Some(v) = opts.neg {
        args.neg = v;
    }
    if let Some(v) = opts.word_ngrams {
        args.word_ngrams = v;
    }
    if let Some(v) = opts.loss {
        args.loss = v.parse()?;
    }
    if let Some(v) = opts.bucket {
        args.bucket = v;
    }
    if let Some(v) = opts.minn {
        args.minn = v;
    }
    if let Some(v) = opts.maxn {
        args.maxn = v;
    }
    if let Some(v) = opts.thread {
        args.thread = v;
    }
    if let Some(v) = opts.t {
        args.t = v;
    }
    if let Some(v) = opts.label {
        args.label = v;
    }
    if let Some(v) = opts.verbose {
        args.verbose = v;
    }
    if let Some(v) = opts.pretrained_vectors {
        args.pretrained_vectors = v;
    }
    Ok(args)
}

/// Spools standard input to a temporary file so the trainer can shard it.
fn spool_stdin() -> JamoTextResult<String> {
    let path = std::env::temp_dir().join(format!("jamotext-stdin-{}.txt", std::process::id()));
    let mut file = File::create(&path)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    file.write_all(&buffer)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    Ok(path.to_string_lossy().into_owned())
}

fn run_train(model: ModelKind, opts: TrainOpts) -> JamoTextResult<()> {
    let mut args = build_args(model, opts)?;
    if args.input == "-" {
        args.input = spool_stdin()?;
    }
    let output = args.output.clone();
    let engine = JamoText::train(args)?;
    engine.save_model(format!("{}.bin", output))?;
    engine.save_vectors_file(format!("{}.vec", output))?;
    info!("Saved {}.bin and {}.vec", output, output);
    Ok(())
}

fn run_quantize(opts: QuantizeOpts) -> JamoTextResult<()> {
    let mut engine = JamoText::load_model(format!("{}.bin", opts.output))?;
    let mut qargs = Args::default();
    qargs.input = opts.input.unwrap_or_default();
    qargs.cutoff = opts.cutoff;
    qargs.dsub = opts.dsub;
    qargs.qnorm = opts.qnorm;
    qargs.qout = opts.qout;
    qargs.retrain = opts.retrain;
    if let Some(epoch) = opts.epoch {
        qargs.epoch = epoch;
    }
    if let Some(lr) = opts.lr {
        qargs.lr = lr;
    }
    engine.quantize(&qargs)?;
    engine.save_model(format!("{}.ftz", opts.output))?;
    info!("Saved {}.ftz", opts.output);
    Ok(())
}

fn read_source_bytes(path: &str) -> JamoTextResult<Vec<u8>> {
    if path == "-" {
        let mut buffer = Vec::new();
        io::stdin()
            .read_to_end(&mut buffer)
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        Ok(buffer)
    } else {
        std::fs::read(path).map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))
    }
}

fn line_source(path: &str) -> JamoTextResult<Box<dyn BufRead>> {
    if path == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        let file = File::open(path)
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn run_test(model: PathBuf, test_file: String, k: i32) -> JamoTextResult<()> {
    let engine = JamoText::load_model(model)?;
    let data = read_source_bytes(&test_file)?;
    let metrics = engine.test(&mut Cursor::new(data), k)?;
    println!("N\t{}", metrics.nexamples);
    println!("P@{}\t{:.3}", k, metrics.precision());
    println!("R@{}\t{:.3}", k, metrics.recall());
    Ok(())
}

fn run_predict(
    model: PathBuf,
    test_file: String,
    k: i32,
    with_probability: bool,
    json: bool,
) -> JamoTextResult<()> {
    let engine = JamoText::load_model(model)?;
    let reader = line_source(&test_file)?;
    for line in reader.lines() {
        let line = line.map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let predictions = engine.predict_line(&line, k)?;
        if json {
            let entries: Vec<serde_json::Value> = predictions
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "label": p.label,
                        "probability": p.probability,
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(entries));
            continue;
        }
        let mut parts: Vec<String> = Vec::with_capacity(predictions.len());
        for p in &predictions {
            parts.push(p.label.clone());
            if with_probability {
                parts.push(format!("{}", p.probability));
            }
        }
        println!("{}", parts.join(" "));
    }
    Ok(())
}

fn run_print_word_vectors(model: PathBuf) -> JamoTextResult<()> {
    let engine = JamoText::load_model(model)?;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        for word in line.split_whitespace() {
            let vec = engine.word_vector(word);
            println!("{} {}", word, vec);
        }
    }
    Ok(())
}

fn run_print_sentence_vectors(model: PathBuf) -> JamoTextResult<()> {
    let engine = JamoText::load_model(model)?;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let vec = engine.sentence_vector(&line)?;
        println!("{}", vec);
    }
    Ok(())
}

fn run_print_ngrams(model: PathBuf, word: String) -> JamoTextResult<()> {
    let engine = JamoText::load_model(model)?;
    for (ngram, vec) in engine.ngram_vectors(&word)? {
        println!("{} {}", ngram, vec);
    }
    Ok(())
}

fn run_nn(model: PathBuf, k: i32) -> JamoTextResult<()> {
    let mut engine = JamoText::load_model(model)?;
    let stdin = io::stdin();
    print!("Query word? ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        if let Some(word) = line.split_whitespace().next() {
            for (score, neighbor) in engine.nn(word, k)? {
                println!("{} {:.6}", neighbor, score);
            }
        }
        print!("Query word? ");
        io::stdout().flush().ok();
    }
    Ok(())
}

fn run_analogies(model: PathBuf, k: i32) -> JamoTextResult<()> {
    let mut engine = JamoText::load_model(model)?;
    let stdin = io::stdin();
    print!("Query triplet (A - B + C)? ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() == 3 {
            for (score, result) in engine.analogies(k, words[0], words[1], words[2])? {
                println!("{} {:.6}", result, score);
            }
        } else if !words.is_empty() {
            eprintln!("Expected three words");
        }
        print!("Query triplet (A - B + C)? ");
        io::stdout().flush().ok();
    }
    Ok(())
}

fn main() -> JamoTextResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Skipgram(opts) => run_train(ModelKind::Skipgram, opts),
        Command::Cbow(opts) => run_train(ModelKind::Cbow, opts),
        Command::Supervised(opts) => run_train(ModelKind::Supervised, opts),
        Command::Quantize(opts) => run_quantize(opts),
        Command::Test {
            model,
            test_file,
            k,
        } => run_test(model, test_file, k),
        Command::Predict {
            model,
            test_file,
            k,
            json,
        } => run_predict(model, test_file, k, false, json),
        Command::PredictProb {
            model,
            test_file,
            k,
            json,
        } => run_predict(model, test_file, k, true, json),
        Command::PrintWordVectors { model } => run_print_word_vectors(model),
        Command::PrintSentenceVectors { model } => run_print_sentence_vectors(model),
        Command::PrintNgrams { model, word } => run_print_ngrams(model, word),
        Command::Nn { model, k } => run_nn(model, k),
        Command::Analogies { model, k } => run_analogies(model, k),
    }
}
