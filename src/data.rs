use burn::tensor::{backend::Backend, Data, Shape, Tensor};

use crate::dataset::{RawDataset, IMAGE_H, IMAGE_SIZE, IMAGE_W, NUM_CLASSES};
use crate::error::Error;

/// A shaped tensor pair for one unit of training or evaluation input.
///
/// `images` is `[n, 28, 28, 1]`, `targets` the matching one-hot rows as
/// `[n, 10]` floats.
#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 2>,
}

pub struct MnistBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Batches the first `num_examples` examples of the split in storage
    /// order, or the whole split when `None`. Builds fresh tensors on every
    /// call and never mutates the split's buffers.
    pub fn batch(
        &self,
        split: &RawDataset,
        num_examples: Option<usize>,
    ) -> Result<MnistBatch<B>, Error> {
        let count = split.num_examples();
        let n = num_examples.unwrap_or(count);
        if n > count {
            return Err(Error::invalid_argument(format!(
                "requested {n} examples but the split holds {count}"
            )));
        }

        self.slice(split, 0, n)
    }

    /// Batches the contiguous example range `[start, end)` of the split.
    pub fn slice(
        &self,
        split: &RawDataset,
        start: usize,
        end: usize,
    ) -> Result<MnistBatch<B>, Error> {
        let count = split.num_examples();
        if start > end || end > count {
            return Err(Error::invalid_argument(format!(
                "example range {start}..{end} is out of bounds for a split of {count}"
            )));
        }
        let n = end - start;

        let images = Data::new(
            split.images[start * IMAGE_SIZE..end * IMAGE_SIZE].to_vec(),
            Shape::new([n, IMAGE_H, IMAGE_W, 1]),
        );
        let targets = Data::new(
            split.labels[start * NUM_CLASSES..end * NUM_CLASSES]
                .iter()
                .map(|&value| value as f32)
                .collect::<Vec<_>>(),
            Shape::new([n, NUM_CLASSES]),
        );

        Ok(MnistBatch {
            images: Tensor::from_data(images.convert(), &self.device),
            targets: Tensor::from_data(targets.convert(), &self.device),
        })
    }
}
