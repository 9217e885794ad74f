use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use clap::ValueEnum;
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::Array2;
use tch::nn::{self, ModuleT, VarStore};
use tch::vision::resnet;
use tch::{Device, Tensor};

use crate::dataset::ImageList;
use crate::error::ModelLoadError;

/// Length of the embedding vector produced per image.
pub const EMBEDDING_DIM: i64 = 4096;

const META_EPOCH: &str = "meta.epoch";
const META_BEST_LOSS: &str = "meta.best_loss";

/// Supported backbone variants, differing only in depth/capacity.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backbone {
    Resnet18,
    Resnet34,
    Resnet50,
    Resnet101,
}

impl Backbone {
    /// Constructs the selected variant with its classification layer
    /// replaced by a linear projection to `embedding_dim`. Only the
    /// requested variant is ever built.
    pub fn build(self, p: &nn::Path, embedding_dim: i64) -> Box<dyn ModuleT> {
        match self {
            Backbone::Resnet18 => Box::new(resnet::resnet18(p, embedding_dim)),
            Backbone::Resnet34 => Box::new(resnet::resnet34(p, embedding_dim)),
            Backbone::Resnet50 => Box::new(resnet::resnet50(p, embedding_dim)),
            Backbone::Resnet101 => Box::new(resnet::resnet101(p, embedding_dim)),
        }
    }

    pub fn default_checkpoint(self) -> String {
        format!("model_state_{}.safetensors", self)
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backbone::Resnet18 => "resnet18",
            Backbone::Resnet34 => "resnet34",
            Backbone::Resnet50 => "resnet50",
            Backbone::Resnet101 => "resnet101",
        };
        f.write_str(name)
    }
}

/// Auxiliary training state stored alongside the weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointMeta {
    pub epoch: i64,
    pub best_loss: f64,
}

/// Writes every variable of `vs` plus the metadata scalars to a
/// safetensors file. The symmetric counterpart of [`load_checkpoint`].
pub fn save_checkpoint(vs: &VarStore, meta: CheckpointMeta, path: &Path) -> Result<()> {
    let mut tensors: Vec<(String, Tensor)> =
        vs.variables().into_iter().map(|(name, t)| (name, t.to_device(Device::Cpu))).collect();
    tensors.push((META_EPOCH.to_owned(), Tensor::from(meta.epoch as f64)));
    tensors.push((META_BEST_LOSS.to_owned(), Tensor::from(meta.best_loss)));
    Tensor::write_safetensors(&tensors, path)?;
    Ok(())
}

/// Copies checkpoint weights into `vs`, validating every tensor shape
/// against the network that was built, and returns the training
/// metadata for reporting.
pub fn load_checkpoint(vs: &mut VarStore, path: &Path) -> Result<CheckpointMeta, ModelLoadError> {
    let tensors = Tensor::read_safetensors(path)
        .map_err(|source| ModelLoadError::Read { path: path.to_path_buf(), source })?;
    let mut tensors: HashMap<String, Tensor> = tensors.into_iter().collect();

    let epoch = take_meta(&mut tensors, META_EPOCH, path)?;
    let best_loss = take_meta(&mut tensors, META_BEST_LOSS, path)?;

    let mut variables = vs.variables();
    for (name, var) in variables.iter_mut() {
        let Some(src) = tensors.get(name) else {
            return Err(ModelLoadError::MissingTensor {
                path: path.to_path_buf(),
                name: name.clone(),
            });
        };
        if src.size() != var.size() {
            return Err(ModelLoadError::ShapeMismatch {
                path: path.to_path_buf(),
                name: name.clone(),
                expected: var.size(),
                found: src.size(),
            });
        }
        tch::no_grad(|| var.copy_(src));
    }

    Ok(CheckpointMeta { epoch: epoch as i64, best_loss })
}

fn take_meta(
    tensors: &mut HashMap<String, Tensor>,
    name: &str,
    path: &Path,
) -> Result<f64, ModelLoadError> {
    let tensor = tensors.remove(name).ok_or_else(|| ModelLoadError::MissingMeta {
        path: path.to_path_buf(),
        name: name.to_owned(),
    })?;
    tensor.f_double_value(&[]).map_err(|_| ModelLoadError::ShapeMismatch {
        path: path.to_path_buf(),
        name: name.to_owned(),
        expected: vec![],
        found: tensor.size(),
    })
}

/// Maps images to fixed-length embedding vectors.
///
/// Inference-only: every forward pass runs under `no_grad` with the
/// network in evaluation mode. Runs on CUDA when available, otherwise
/// on the CPU.
pub struct EmbeddingExtractor {
    net: Box<dyn ModuleT>,
    _vs: VarStore,
    device: Device,
    dim: i64,
}

impl EmbeddingExtractor {
    /// Builds the selected backbone and loads trained weights from
    /// `checkpoint`, returning the extractor plus the checkpoint's
    /// training metadata.
    pub fn load(
        backbone: Backbone,
        checkpoint: &Path,
        embedding_dim: i64,
    ) -> Result<(Self, CheckpointMeta), ModelLoadError> {
        let device = Device::cuda_if_available();
        debug!("running inference on {:?}", device);

        let mut vs = VarStore::new(device);
        let net = backbone.build(&vs.root(), embedding_dim);
        let meta = load_checkpoint(&mut vs, checkpoint)?;
        Ok((Self { net, _vs: vs, device, dim: embedding_dim }, meta))
    }

    pub fn dim(&self) -> i64 {
        self.dim
    }

    /// Embeds a `[B, 3, 224, 224]` batch, returning `[B, dim]` on the
    /// host regardless of where inference ran.
    pub fn embed_batch(&self, images: &Tensor) -> Result<Array2<f32>> {
        let output = tch::no_grad(|| self.net.forward_t(&images.to_device(self.device), false));
        let output = output.to_device(Device::Cpu);
        let size = output.size();
        let flat = Vec::<f32>::try_from(&output.flatten(0, 1))?;
        Ok(Array2::from_shape_vec((size[0] as usize, size[1] as usize), flat)?)
    }

    /// Embeds every image of `list` in a single fixed-order pass and
    /// concatenates the results into one `[len, dim]` matrix.
    pub fn embed_dataset(&self, list: &ImageList, batch_size: usize) -> Result<Array2<f32>> {
        info!("computing feature embeddings for {} images", list.len());
        let pb = ProgressBar::new(list.len() as u64);
        let start = Instant::now();

        let mut data = Vec::with_capacity(list.len() * self.dim as usize);
        let mut rows = 0usize;
        for batch in list.batches(batch_size) {
            let embeddings = self.embed_batch(&batch?.images)?;
            rows += embeddings.nrows();
            pb.inc(embeddings.nrows() as u64);
            data.extend(embeddings);
        }
        pb.finish_and_clear();
        info!("{:.2} seconds for getting embeddings", start.elapsed().as_secs_f64());

        Ok(Array2::from_shape_vec((rows, self.dim as usize), data)?)
    }
}
