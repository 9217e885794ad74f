use tch::Tensor;
use tch::nn::{self, Module, ModuleT};
use thiserror::Error;

/// Spatial resolution the stage schedule is laid out for. Three
/// stride-2 stages reduce 32 to 4 and the final 4x4 max pool collapses
/// that to 1x1, so other resolutions are rejected outright.
pub const INPUT_SIZE: i64 = 32;

const IN_CHANNELS: i64 = 3;
const CHANNELS: i64 = 196;
const STRIDES: [i64; 8] = [1, 2, 1, 2, 1, 1, 1, 2];

#[derive(Debug, Error)]
#[error("discriminator input must be [N, {IN_CHANNELS}, {INPUT_SIZE}, {INPUT_SIZE}], got {0:?}")]
pub struct InputShapeError(pub Vec<i64>);

/// Convolutional critic with two heads: a scalar realness score and a
/// 10-way class logit vector per image.
///
/// Eight stages of (3x3 conv, layer norm over the full (C, H, W)
/// extent, leaky ReLU) at a constant 196 channels, followed by a 4x4
/// max pool and the two linear heads.
#[derive(Debug)]
pub struct Discriminator {
    stages: nn::SequentialT,
    fc1: nn::Linear,
    fc10: nn::Linear,
}

impl Discriminator {
    pub fn new(p: &nn::Path) -> Self {
        let mut stages = nn::seq_t();
        let mut dim = INPUT_SIZE;
        let mut in_channels = IN_CHANNELS;
        for (i, &stride) in STRIDES.iter().enumerate() {
            if stride == 2 {
                dim /= 2;
            }
            let conv_cfg = nn::ConvConfig { stride, padding: 1, ..Default::default() };
            stages = stages
                .add(nn::conv2d(p / format!("conv{}", i + 1), in_channels, CHANNELS, 3, conv_cfg))
                .add(nn::layer_norm(
                    p / format!("ln{}", i + 1),
                    vec![CHANNELS, dim, dim],
                    Default::default(),
                ))
                .add_fn(|x| x.leaky_relu());
            in_channels = CHANNELS;
        }

        let fc1 = nn::linear(p / "fc1", CHANNELS, 1, Default::default());
        let fc10 = nn::linear(p / "fc10", CHANNELS, 10, Default::default());
        Self { stages, fc1, fc10 }
    }

    /// Returns `([N, 1] realness, [N, 10] class logits)`.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor), InputShapeError> {
        let size = xs.size();
        if size.len() != 4
            || size[1] != IN_CHANNELS
            || size[2] != INPUT_SIZE
            || size[3] != INPUT_SIZE
        {
            return Err(InputShapeError(size));
        }

        let x = self.stages.forward_t(xs, train).max_pool2d_default(4);
        let x = x.view([-1, CHANNELS]);
        Ok((self.fc1.forward(&x), self.fc10.forward(&x)))
    }
}

#[cfg(test)]
mod tests {
    use tch::nn::VarStore;
    use tch::{Device, Kind};

    use super::*;

    fn discriminator() -> (VarStore, Discriminator) {
        let vs = VarStore::new(Device::Cpu);
        let net = Discriminator::new(&vs.root());
        (vs, net)
    }

    #[test]
    fn test_output_shapes() {
        let (_vs, net) = discriminator();
        let xs = Tensor::randn([4, 3, 32, 32], (Kind::Float, Device::Cpu));
        let (realness, logits) = net.forward_t(&xs, false).unwrap();
        assert_eq!(realness.size(), vec![4, 1]);
        assert_eq!(logits.size(), vec![4, 10]);
    }

    #[test]
    fn test_wrong_resolution_rejected() {
        let (_vs, net) = discriminator();
        let xs = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let err = net.forward_t(&xs, false).unwrap_err();
        assert_eq!(err.0, vec![2, 3, 64, 64]);
    }

    #[test]
    fn test_wrong_channel_count_rejected() {
        let (_vs, net) = discriminator();
        let xs = Tensor::randn([2, 1, 32, 32], (Kind::Float, Device::Cpu));
        assert!(net.forward_t(&xs, false).is_err());
    }

    #[test]
    fn test_missing_batch_dimension_rejected() {
        let (_vs, net) = discriminator();
        let xs = Tensor::randn([3, 32, 32], (Kind::Float, Device::Cpu));
        assert!(net.forward_t(&xs, false).is_err());
    }
}
