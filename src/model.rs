use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::dataset::NUM_CLASSES;

/// Feature count after the conv/pool stack on 28x28 input:
/// 28 -> 26 -> 13 -> 11 -> 5 -> 3 spatial, 32 channels.
const FLATTENED_SIZE: usize = 32 * 3 * 3;

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
}

/// Small convolutional classifier: three 3x3 conv layers with two 2x2 max
/// pools in between, then two dense layers. Softmax is folded into the loss,
/// so the forward pass returns logits.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    conv3: Conv2d<B>,
    linear1: Linear<B>,
    linear2: Linear<B>,
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        Model {
            conv1: Conv2dConfig::new([1, 16], [3, 3]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([16, 32], [3, 3]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv3: Conv2dConfig::new([32, 32], [3, 3]).init(device),
            linear1: LinearConfig::new(FLATTENED_SIZE, self.hidden_size).init(device),
            linear2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new().with_num_classes(NUM_CLASSES)
    }
}

impl<B: Backend> Model<B> {
    /// Computes class logits for a `[n, 28, 28, 1]` image batch.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, height, width, _channels] = images.dims();
        // Single-channel NHWC is layout-identical to NCHW.
        let x = images.reshape([batch, 1, height, width]);

        let x = relu(self.conv1.forward(x));
        let x = self.pool1.forward(x);
        let x = relu(self.conv2.forward(x));
        let x = self.pool2.forward(x);
        let x = relu(self.conv3.forward(x));

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        let x = relu(self.linear1.forward(x));
        self.linear2.forward(x)
    }
}
