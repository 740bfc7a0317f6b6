use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use jamotext::{Args, JamoText, ModelKind};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("jamotext-test-{}-{}", std::process::id(), name))
}

fn write_corpus(name: &str, content: &str) -> PathBuf {
    let path = temp_path(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn english_corpus() -> String {
    let mut corpus = String::new();
    for _ in 0..30 {
        corpus.push_str("the quick brown fox jumps over the lazy dog\n");
        corpus.push_str("the dog sleeps under the warm sun\n");
        corpus.push_str("a quick cat jumps over the fence\n");
    }
    corpus
}

fn skipgram_args(input: &PathBuf) -> Args {
    let mut args = Args::default();
    args.model = ModelKind::Skipgram;
    args.input = input.to_string_lossy().into_owned();
    args.thread = 1;
    args.dim = 10;
    args.min_count = 1;
    args.minn = 2;
    args.maxn = 5;
    args.ws = 5;
    args.epoch = 2;
    args.bucket = 5000;
    args.verbose = 0;
    args
}

#[test]
fn test_skipgram_deterministic_and_round_trip() {
    let corpus = write_corpus("sg-corpus.txt", &english_corpus());

    let first = JamoText::train(skipgram_args(&corpus)).unwrap();
    let second = JamoText::train(skipgram_args(&corpus)).unwrap();

    // single-thread runs with fixed seeds are bit-reproducible
    for i in 0..first.dict().nwords() {
        let word = first.dict().word(i).to_string();
        assert_eq!(
            first.word_vector(&word).data(),
            second.word_vector(&word).data(),
            "word {} differs between identical runs",
            word
        );
    }

    let vec = first.word_vector("the");
    let norm = vec.norm();
    assert!(norm.is_finite());
    assert!(norm > 0.0);

    // save -> load keeps every vocabulary vector bit-identical
    let mut buffer = Vec::new();
    first.save_model_to_writer(&mut buffer).unwrap();
    let loaded = JamoText::load_model_from_reader(&mut Cursor::new(buffer)).unwrap();
    assert_eq!(loaded.dict().nwords(), first.dict().nwords());
    for i in 0..first.dict().nwords() {
        let word = first.dict().word(i).to_string();
        assert_eq!(
            first.word_vector(&word).data(),
            loaded.word_vector(&word).data()
        );
    }
}

#[test]
fn test_nearest_neighbors_shape() {
    let corpus = write_corpus("nn-corpus.txt", &english_corpus());
    let mut engine = JamoText::train(skipgram_args(&corpus)).unwrap();

    let neighbors = engine.nn("the", 3).unwrap();
    assert_eq!(neighbors.len(), 3);
    let mut seen = std::collections::HashSet::new();
    for (score, word) in &neighbors {
        assert_ne!(word, "the");
        assert!(seen.insert(word.clone()), "duplicate neighbor {}", word);
        assert!(*score > -1.0001 && *score <= 1.0001, "cosine {}", score);
    }

    // bank eviction keeps queries working
    engine.clear_word_bank();
    let again = engine.nn("the", 3).unwrap();
    assert_eq!(again.len(), 3);

    assert!(engine.nn("", 3).is_err());
    assert!(engine.nn("the", 0).is_err());
}

#[test]
fn test_analogies_shape() {
    let corpus = write_corpus("analogy-corpus.txt", &english_corpus());
    let mut engine = JamoText::train(skipgram_args(&corpus)).unwrap();

    let results = engine.analogies(2, "fox", "dog", "cat").unwrap();
    assert_eq!(results.len(), 2);
    for (_, word) in &results {
        assert_ne!(word, "fox");
        assert_ne!(word, "dog");
        assert_ne!(word, "cat");
    }
}

#[test]
fn test_unsupervised_sentence_vector() {
    let corpus = write_corpus("sv-corpus.txt", &english_corpus());
    let engine = JamoText::train(skipgram_args(&corpus)).unwrap();

    let svec = engine.sentence_vector("the quick fox").unwrap();
    assert!(svec.norm() > 0.0);
    let same = engine
        .sentence_similarity("the quick fox", "the quick fox")
        .unwrap();
    assert!((same - 1.0).abs() < 1e-4);
}

fn supervised_corpus() -> String {
    let mut corpus = String::new();
    for _ in 0..20 {
        corpus.push_str("__label__pos good great nice wonderful\n");
        corpus.push_str("__label__pos fine lovely perfect good\n");
        corpus.push_str("__label__neg bad awful terrible poor\n");
        corpus.push_str("__label__neg worst horrible bad nasty\n");
    }
    corpus
}

fn supervised_args(input: &PathBuf) -> Args {
    let mut args = Args::supervised();
    args.input = input.to_string_lossy().into_owned();
    args.thread = 1;
    args.dim = 10;
    args.epoch = 10;
    args.verbose = 0;
    args
}

#[test]
fn test_supervised_predict_and_test() {
    let corpus = write_corpus("sup-corpus.txt", &supervised_corpus());
    let engine = JamoText::train(supervised_args(&corpus)).unwrap();

    let predictions = engine.predict_line("good lovely perfect", 2).unwrap();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0].label, "__label__pos");
    assert!(predictions[0].probability >= predictions[1].probability);
    let total: f32 = predictions.iter().map(|p| p.probability).sum();
    assert!((total - 1.0).abs() < 1e-4, "probability mass {}", total);

    // empty lines predict nothing
    assert!(engine.predict_line("", 1).unwrap().is_empty());

    let metrics = engine
        .test(&mut Cursor::new(supervised_corpus().into_bytes()), 1)
        .unwrap();
    assert_eq!(metrics.nexamples, 80);
    assert!(metrics.precision() > 0.8, "P@1 {}", metrics.precision());

    // supervised sentence vectors average the line's rows
    let svec = engine.sentence_vector("good great").unwrap();
    assert!(svec.norm() > 0.0);
    let empty = engine.sentence_vector("").unwrap();
    assert_eq!(empty.norm(), 0.0);
}

fn wide_supervised_corpus() -> String {
    // 300 distinct words across two classes so the input matrix clears the
    // 256-row floor of the product quantizer.
    let mut corpus = String::new();
    for block in 0..30 {
        let mut line = String::from("__label__pos");
        for j in 0..5 {
            line.push_str(&format!(" posw{:03}", block * 5 + j));
        }
        line.push('\n');
        corpus.push_str(&line);

        let mut line = String::from("__label__neg");
        for j in 0..5 {
            line.push_str(&format!(" negw{:03}", block * 5 + j));
        }
        line.push('\n');
        corpus.push_str(&line);
    }
    corpus
}

#[test]
fn test_quantize_round_trip() {
    let corpus_text = wide_supervised_corpus();
    let corpus = write_corpus("quant-corpus.txt", &corpus_text);
    let mut args = supervised_args(&corpus);
    args.epoch = 8;
    let mut engine = JamoText::train(args).unwrap();
    assert!(engine.dict().nwords() >= 256);

    let dev_lines: Vec<String> = corpus_text
        .lines()
        .map(|line| {
            line.split_whitespace()
                .skip(1)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    let before: Vec<String> = dev_lines
        .iter()
        .map(|line| engine.predict_line(line, 1).unwrap()[0].label.clone())
        .collect();

    let mut qargs = Args::default();
    qargs.cutoff = 0;
    qargs.dsub = 2;
    qargs.qnorm = true;
    qargs.qout = false;
    engine.quantize(&qargs).unwrap();
    assert!(engine.is_quantized());

    // quantizing twice is refused
    assert!(engine.quantize(&qargs).is_err());

    let after: Vec<String> = dev_lines
        .iter()
        .map(|line| engine.predict_line(line, 1).unwrap()[0].label.clone())
        .collect();
    let agree = before
        .iter()
        .zip(&after)
        .filter(|(a, b)| a == b)
        .count() as f64
        / before.len() as f64;
    assert!(agree >= 0.9, "quantized agreement {}", agree);

    // .ftz round trip reproduces the quantized predictions exactly
    let mut buffer = Vec::new();
    engine.save_model_to_writer(&mut buffer).unwrap();
    let loaded = JamoText::load_model_from_reader(&mut Cursor::new(buffer)).unwrap();
    assert!(loaded.is_quantized());
    for line in &dev_lines[..10] {
        let a = engine.predict_line(line, 1).unwrap();
        let b = loaded.predict_line(line, 1).unwrap();
        assert_eq!(a[0].label, b[0].label);
        assert!((a[0].probability - b[0].probability).abs() < 1e-6);
    }
}

#[test]
fn test_quantize_refuses_unsupervised() {
    let corpus = write_corpus("quant-sg-corpus.txt", &english_corpus());
    let mut engine = JamoText::train(skipgram_args(&corpus)).unwrap();
    let qargs = Args::default();
    assert!(engine.quantize(&qargs).is_err());
}

fn korean_corpus() -> String {
    let mut corpus = String::new();
    for _ in 0..40 {
        corpus.push_str("이명박은 대통령이다 .\n");
        corpus.push_str("문재인은 대통령이다 .\n");
        corpus.push_str("서울은 수도이다 .\n");
    }
    corpus
}

#[test]
fn test_korean_training_and_similarity() {
    let corpus = write_corpus("ko-corpus.txt", &korean_corpus());
    let mut args = skipgram_args(&corpus);
    args.minn = 2;
    args.maxn = 4;
    args.epoch = 5;
    let engine = JamoText::train(args).unwrap();

    // the vocabulary stores decomposed jamo
    let id = engine.dict().word_id("대통령이다");
    assert!(id >= 0);
    assert!(engine.dict().word(id).contains('ᴥ'));

    let similarity = engine
        .sentence_similarity("이명박은 대통령이다 .", "문재인은 대통령이다 .")
        .unwrap();
    assert!(similarity > 0.5, "similarity {}", similarity);

    let unrelated = engine
        .sentence_similarity("이명박은 대통령이다 .", "이명박은 대통령이다 .")
        .unwrap();
    assert!((unrelated - 1.0).abs() < 1e-4);
}

#[test]
fn test_cbow_trains() {
    let corpus = write_corpus("cbow-corpus.txt", &english_corpus());
    let mut args = skipgram_args(&corpus);
    args.model = ModelKind::Cbow;
    args.epoch = 1;
    let engine = JamoText::train(args).unwrap();
    assert!(engine.word_vector("dog").norm() > 0.0);
}

#[test]
fn test_multithreaded_training_completes() {
    let corpus = write_corpus("mt-corpus.txt", &english_corpus());
    let mut args = skipgram_args(&corpus);
    args.thread = 2;
    args.epoch = 1;
    let engine = JamoText::train(args).unwrap();
    assert!(engine.word_vector("fox").norm() > 0.0);
}

#[test]
fn test_cancelled_training_returns_error() {
    let corpus = write_corpus("cancel-corpus.txt", &english_corpus());
    let cancel = AtomicBool::new(true);
    let result = JamoText::train_with_cancel(skipgram_args(&corpus), &cancel);
    assert!(result.is_err());
}

#[test]
fn test_vectors_file_format() {
    let corpus = write_corpus("vec-corpus.txt", &english_corpus());
    let engine = JamoText::train(skipgram_args(&corpus)).unwrap();

    let mut buffer = Vec::new();
    engine.save_vectors(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert_eq!(
        header,
        format!("{} {}", engine.dict().nwords(), engine.dim())
    );
    let mut count = 0;
    for line in lines {
        let fields: Vec<&str> = line.split(' ').collect();
        assert_eq!(fields.len() as i32, engine.dim() + 1);
        for value in &fields[1..] {
            value.parse::<f32>().unwrap();
        }
        count += 1;
    }
    assert_eq!(count, engine.dict().nwords());
}

#[test]
fn test_bad_model_file_is_rejected() {
    let bogus = vec![0u8; 64];
    assert!(JamoText::load_model_from_reader(&mut Cursor::new(bogus)).is_err());
    assert!(JamoText::load_model(temp_path("does-not-exist.bin")).is_err());
}

#[test]
fn test_pretrained_vectors() {
    let corpus = write_corpus("pre-corpus.txt", &english_corpus());
    let base = JamoText::train(skipgram_args(&corpus)).unwrap();
    let vectors_path = temp_path("pre-vectors.vec");
    base.save_vectors_file(&vectors_path).unwrap();

    // a corpus missing one of the pretrained words
    let small = write_corpus("pre-small-corpus.txt", "the quick brown fox\n");
    let mut args = skipgram_args(&small);
    args.epoch = 1;
    args.pretrained_vectors = vectors_path.to_string_lossy().into_owned();
    let engine = JamoText::train(args).unwrap();

    // pretrained-only words were merged into the vocabulary
    assert!(engine.dict().word_id("lazy") >= 0);
    assert!(engine.word_vector("lazy").norm() > 0.0);

    // a dimension mismatch is fatal
    let mut args = skipgram_args(&small);
    args.dim = 7;
    args.pretrained_vectors = vectors_path.to_string_lossy().into_owned();
    assert!(JamoText::train(args).is_err());
}

#[test]
fn test_ngram_vectors() {
    let corpus = write_corpus("ngram-corpus.txt", &english_corpus());
    let engine = JamoText::train(skipgram_args(&corpus)).unwrap();
    let ngrams = engine.ngram_vectors("quick").unwrap();
    assert!(!ngrams.is_empty());
    assert_eq!(ngrams[0].0, "quick");
    for (_, vec) in &ngrams {
        assert_eq!(vec.len() as i32, engine.dim());
    }
}
