use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, bounded};
use rayon::prelude::*;
use tch::Tensor;
use tch::vision::imagenet;

use crate::error::EvalError;

/// How many decoded batches may sit in the prefetch channel before the
/// loader thread blocks.
const PREFETCH_BATCHES: usize = 4;

#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub path: PathBuf,
    pub label: i64,
}

/// An ordered image dataset parsed from a list file.
///
/// One image per line, `path<whitespace>label`. Iteration order is the
/// file order and never changes, so embeddings computed from the list
/// line up with `labels()` by position.
#[derive(Debug)]
pub struct ImageList {
    path: PathBuf,
    entries: Vec<ImageEntry>,
}

impl ImageList {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("cannot read image list {}", path.display()))?;

        let mut entries = vec![];
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((image, label)) = line.rsplit_once(char::is_whitespace) else {
                bail!("malformed line {} in {}: missing label", lineno + 1, path.display());
            };
            let label = label.parse::<i64>().with_context(|| {
                format!("malformed line {} in {}: bad label `{}`", lineno + 1, path.display(), label)
            })?;
            entries.push(ImageEntry { path: PathBuf::from(image.trim_end()), label });
        }

        if entries.is_empty() {
            return Err(EvalError::EmptyDataset(path.display().to_string()).into());
        }
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn labels(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.label).collect()
    }

    /// Loads the images in fixed list order, `batch_size` at a time.
    ///
    /// Decoding runs on a background thread (data-parallel within a
    /// batch) and prefetches over a bounded channel so it overlaps with
    /// inference on the consumer side. A decode failure is yielded
    /// in-stream and ends the iteration.
    pub fn batches(&self, batch_size: usize) -> BatchLoader {
        let batch_size = batch_size.max(1);
        let entries = self.entries.clone();
        let (tx, rx) = bounded(PREFETCH_BATCHES);

        thread::spawn(move || {
            for chunk in entries.chunks(batch_size) {
                let images = chunk
                    .par_iter()
                    .map(|entry| {
                        imagenet::load_image_and_resize224(&entry.path).with_context(|| {
                            format!("cannot load image {}", entry.path.display())
                        })
                    })
                    .collect::<Result<Vec<_>>>();

                let batch = match images {
                    Ok(images) => {
                        let labels = chunk.iter().map(|e| e.label).collect();
                        Ok(Batch { images: Tensor::stack(&images, 0), labels })
                    }
                    Err(e) => Err(e),
                };
                let failed = batch.is_err();
                if tx.send(batch).is_err() || failed {
                    break;
                }
            }
        });

        BatchLoader { rx }
    }
}

/// A decoded image batch: `[B, 3, 224, 224]` tensors normalized with
/// the ImageNet per-channel mean/std, plus the matching labels.
pub struct Batch {
    pub images: Tensor,
    pub labels: Vec<i64>,
}

pub struct BatchLoader {
    rx: Receiver<Result<Batch>>,
}

impl Iterator for BatchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
