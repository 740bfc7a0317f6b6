//! Parallel SGD over a byte-sharded input file.
//!
//! Each worker opens its own reader, seeks to its shard offset and streams
//! lines through the dictionary. The matrices are shared through `Hogwild`
//! with no locks on the update path; only the global token counter is
//! synchronized and drives the learning-rate decay.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;
use std::time::Instant;

use log::info;
use rand::Rng;

use jamotext_core::args::{Args, ModelKind};
use jamotext_core::dictionary::{Dictionary, EntryKind};
use jamotext_core::error::JamoTextErrorKind;
use jamotext_core::matrix::Matrix;
use jamotext_core::model::Model;
use jamotext_core::JamoTextResult;

use crate::hogwild::Hogwild;

/// Runs `args.thread` workers until `epoch * ntokens` tokens are consumed.
/// Returns the trained matrices and the loss reported by thread 0.
pub fn train(
    args: &Args,
    dict: &Dictionary,
    input: Matrix,
    output: Matrix,
    cancel: Option<&AtomicBool>,
) -> JamoTextResult<(Matrix, Matrix, f32)> {
    let file_size = std::fs::metadata(&args.input)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?
        .len();
    let counts = match args.model {
        ModelKind::Supervised => dict.counts(EntryKind::Label),
        _ => dict.counts(EntryKind::Word),
    };
    let wi = Hogwild::new(input);
    let wo = Hogwild::new(output);
    let token_count = AtomicI64::new(0);
    let start = Instant::now();

    let mut results: Vec<JamoTextResult<f32>> = Vec::new();
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for thread_id in 0..args.thread {
            let wi = wi.clone();
            let wo = wo.clone();
            let token_count = &token_count;
            let counts = counts.as_slice();
            handles.push(scope.spawn(move || {
                train_thread(
                    args,
                    dict,
                    wi,
                    wo,
                    token_count,
                    counts,
                    thread_id,
                    file_size,
                    start,
                    cancel,
                )
            }));
        }
        for handle in handles {
            results.push(handle.join().unwrap_or_else(|_| {
                Err(JamoTextErrorKind::Model
                    .with_error(anyhow::anyhow!("training worker panicked")))
            }));
        }
    });

    let mut loss = 0.0;
    for (thread_id, result) in results.into_iter().enumerate() {
        let worker_loss = result?;
        if thread_id == 0 {
            loss = worker_loss;
        }
    }

    let input = wi.into_inner().ok_or_else(|| {
        JamoTextErrorKind::Model.with_error(anyhow::anyhow!("input matrix still shared"))
    })?;
    let output = wo.into_inner().ok_or_else(|| {
        JamoTextErrorKind::Model.with_error(anyhow::anyhow!("output matrix still shared"))
    })?;
    Ok((input, output, loss))
}

#[allow(clippy::too_many_arguments)]
fn train_thread(
    args: &Args,
    dict: &Dictionary,
    wi: Hogwild<Matrix>,
    wo: Hogwild<Matrix>,
    token_count: &AtomicI64,
    counts: &[i64],
    thread_id: i32,
    file_size: u64,
    start: Instant,
    cancel: Option<&AtomicBool>,
) -> JamoTextResult<f32> {
    let file = File::open(&args.input)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(
            thread_id as u64 * file_size / args.thread as u64,
        ))
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;

    let osz = wo.get().rows() as i32;
    let mut model = Model::new(args, osz, thread_id as u64);
    model.set_target_counts(counts)?;

    let total = args.epoch as i64 * dict.ntokens();
    let mut local_token_count: i64 = 0;
    let mut line: Vec<i32> = Vec::new();
    let mut labels: Vec<i32> = Vec::new();
    let mut last_logged_percent: i64 = -1;

    while token_count.load(Ordering::Relaxed) < total {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(JamoTextErrorKind::Interrupted
                    .with_error(anyhow::anyhow!("training interrupted")));
            }
        }
        let progress = token_count.load(Ordering::Relaxed) as f32 / total as f32;
        let lr = args.lr as f32 * (1.0 - progress);
        match args.model {
            ModelKind::Supervised => {
                local_token_count +=
                    dict.get_line_labeled(&mut reader, &mut line, &mut labels)? as i64;
                supervised_step(&mut model, wi.get_mut(), wo.get_mut(), lr, &line, &labels)?;
            }
            ModelKind::Cbow => {
                local_token_count += dict.get_line(&mut reader, &mut line, model.rng_mut())? as i64;
                cbow_step(args, dict, &mut model, wi.get_mut(), wo.get_mut(), lr, &line)?;
            }
            ModelKind::Skipgram => {
                local_token_count += dict.get_line(&mut reader, &mut line, model.rng_mut())? as i64;
                skipgram_step(args, dict, &mut model, wi.get_mut(), wo.get_mut(), lr, &line)?;
            }
        }
        if local_token_count > args.lr_update_rate as i64 {
            token_count.fetch_add(local_token_count, Ordering::Relaxed);
            local_token_count = 0;
            if thread_id == 0 && args.verbose > 1 {
                let done = token_count.load(Ordering::Relaxed).min(total);
                let percent = done * 100 / total;
                if percent != last_logged_percent {
                    last_logged_percent = percent;
                    let words_per_sec = done as f64
                        / args.thread.max(1) as f64
                        / start.elapsed().as_secs_f64().max(1e-9);
                    info!(
                        "Progress: {:3}% words/sec/thread: {:8.0} lr: {:.6} loss: {:.6}",
                        percent,
                        words_per_sec,
                        lr,
                        model.loss()
                    );
                }
            }
        }
    }
    Ok(model.loss())
}

fn supervised_step(
    model: &mut Model,
    wi: &mut Matrix,
    wo: &mut Matrix,
    lr: f32,
    line: &[i32],
    labels: &[i32],
) -> JamoTextResult<()> {
    if labels.is_empty() || line.is_empty() {
        return Ok(());
    }
    let i = model.rng_mut().gen_range(0..labels.len());
    model.update(wi, wo, line, labels[i], lr)
}

fn cbow_step(
    args: &Args,
    dict: &Dictionary,
    model: &mut Model,
    wi: &mut Matrix,
    wo: &mut Matrix,
    lr: f32,
    line: &[i32],
) -> JamoTextResult<()> {
    let mut bow: Vec<i32> = Vec::new();
    for w in 0..line.len() as isize {
        let boundary = model.rng_mut().gen_range(1..=args.ws) as isize;
        bow.clear();
        for c in -boundary..=boundary {
            let pos = w + c;
            if c != 0 && pos >= 0 && pos < line.len() as isize {
                bow.extend_from_slice(dict.subwords_of(line[pos as usize]));
            }
        }
        model.update(wi, wo, &bow, line[w as usize], lr)?;
    }
    Ok(())
}

fn skipgram_step(
    args: &Args,
    dict: &Dictionary,
    model: &mut Model,
    wi: &mut Matrix,
    wo: &mut Matrix,
    lr: f32,
    line: &[i32],
) -> JamoTextResult<()> {
    for w in 0..line.len() as isize {
        let boundary = model.rng_mut().gen_range(1..=args.ws) as isize;
        let ngrams = dict.subwords_of(line[w as usize]);
        for c in -boundary..=boundary {
            let pos = w + c;
            if c != 0 && pos >= 0 && pos < line.len() as isize {
                model.update(wi, wo, ngrams, line[pos as usize], lr)?;
            }
        }
    }
    Ok(())
}
