use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::{Error, LoadError};

pub const IMAGE_H: usize = 28;
pub const IMAGE_W: usize = 28;
pub const IMAGE_SIZE: usize = IMAGE_H * IMAGE_W;
pub const NUM_CLASSES: usize = 10;

pub const NUM_DATASET_ELEMENTS: usize = 65_000;
pub const NUM_TRAIN_ELEMENTS: usize = 55_000;
pub const NUM_TEST_ELEMENTS: usize = NUM_DATASET_ELEMENTS - NUM_TRAIN_ELEMENTS;

/// Sprite rows decoded per chunk. Bounds peak memory during decode; chunking
/// is not observable in the output buffer.
const DECODE_CHUNK_ROWS: usize = 5_000;

const MNIST_IMAGES_SPRITE_URL: &str =
    "https://storage.googleapis.com/learnjs-data/model-builder/mnist_images.png";
const MNIST_LABELS_URL: &str =
    "https://storage.googleapis.com/learnjs-data/model-builder/mnist_labels_uint8";

/// Remote locations of the sprite sheet and the one-hot label blob.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SpriteSource {
    pub images_url: String,
    pub labels_url: String,
}

impl Default for SpriteSource {
    fn default() -> Self {
        Self {
            images_url: MNIST_IMAGES_SPRITE_URL.to_string(),
            labels_url: MNIST_LABELS_URL.to_string(),
        }
    }
}

/// Decoded dataset buffers.
///
/// `images` holds one flattened example per `IMAGE_SIZE` floats, normalized to
/// `[0, 1]`, in sprite row order. `labels` holds the matching one-hot rows of
/// `NUM_CLASSES` bytes. Built once per load and not mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawDataset {
    pub images: Vec<f32>,
    pub labels: Vec<u8>,
}

impl RawDataset {
    pub fn num_examples(&self) -> usize {
        self.images.len() / IMAGE_SIZE
    }

    /// Splits off the first `train_count` examples, leaving the remainder as
    /// the test set. Order is preserved on both sides; concatenating the two
    /// halves reproduces the original buffers.
    pub fn split_at(mut self, train_count: usize) -> Result<(RawDataset, RawDataset), Error> {
        let total = self.num_examples();
        if train_count > total {
            return Err(Error::invalid_argument(format!(
                "train count {train_count} exceeds the {total} available examples"
            )));
        }

        let test_images = self.images.split_off(train_count * IMAGE_SIZE);
        let test_labels = self.labels.split_off(train_count * NUM_CLASSES);

        Ok((
            RawDataset {
                images: self.images,
                labels: self.labels,
            },
            RawDataset {
                images: test_images,
                labels: test_labels,
            },
        ))
    }
}

/// The loaded dataset, already partitioned into train and test splits.
pub struct MnistData {
    train: RawDataset,
    test: RawDataset,
}

impl MnistData {
    /// Fetches and decodes the remote dataset, splitting at the standard
    /// 55 000-example train boundary.
    pub fn load(source: &SpriteSource) -> Result<Self, Error> {
        let (sprite, labels) = fetch(source)?;
        let raw = decode_sprite(&sprite, labels)?;
        Self::from_raw(raw, NUM_TRAIN_ELEMENTS)
    }

    pub fn from_raw(raw: RawDataset, train_count: usize) -> Result<Self, Error> {
        let (train, test) = raw.split_at(train_count)?;
        Ok(Self { train, test })
    }

    pub fn train(&self) -> &RawDataset {
        &self.train
    }

    pub fn test(&self) -> &RawDataset {
        &self.test
    }
}

/// Fetches the sprite image and the label blob concurrently. Either failure
/// aborts the load.
fn fetch(source: &SpriteSource) -> Result<(Vec<u8>, Vec<u8>), LoadError> {
    let client = reqwest::blocking::Client::new();

    let (sprite, labels) = thread::scope(|scope| {
        let sprite = scope.spawn(|| fetch_bytes(&client, &source.images_url));
        let labels = scope.spawn(|| fetch_bytes(&client, &source.labels_url));

        (
            sprite.join().expect("sprite fetch should not panic"),
            labels.join().expect("label fetch should not panic"),
        )
    });

    Ok((sprite?, labels?))
}

fn fetch_bytes(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<u8>, LoadError> {
    let response = client.get(url).send()?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

/// Decodes the sprite sheet into normalized image buffers and pairs them with
/// the verbatim label bytes.
///
/// The sprite packs one flattened example per row, so its width must equal
/// `IMAGE_SIZE` and its height the example count.
pub fn decode_sprite(png: &[u8], labels: Vec<u8>) -> Result<RawDataset, LoadError> {
    decode_sprite_chunked(png, labels, DECODE_CHUNK_ROWS)
}

fn decode_sprite_chunked(
    png: &[u8],
    labels: Vec<u8>,
    chunk_rows: usize,
) -> Result<RawDataset, LoadError> {
    let sprite = image::load_from_memory(png)?.to_rgba8();
    let (width, height) = sprite.dimensions();
    let (width, height) = (width as usize, height as usize);

    if width != IMAGE_SIZE {
        return Err(LoadError::SpriteLayout {
            expected: IMAGE_SIZE,
            found: width,
        });
    }

    // The source is grayscale stored as RGBA, so the channels are redundant;
    // keep the red one. The last chunk may be partial.
    let raw = sprite.as_raw();
    let mut images = Vec::with_capacity(width * height);
    for chunk_start in (0..height).step_by(chunk_rows.max(1)) {
        let rows = chunk_rows.max(1).min(height - chunk_start);
        let offset = chunk_start * width * 4;
        let pixels = &raw[offset..offset + rows * width * 4];

        images.extend(pixels.chunks_exact(4).map(|px| px[0] as f32 / 255.0));
    }

    if labels.len() % NUM_CLASSES != 0 {
        return Err(LoadError::LabelLayout(labels.len()));
    }
    if height != labels.len() / NUM_CLASSES {
        return Err(LoadError::SizeMismatch {
            images: height,
            labels: labels.len() / NUM_CLASSES,
        });
    }

    Ok(RawDataset { images, labels })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encodes one grayscale sprite row per example into an in-memory PNG.
    pub(crate) fn sprite_png(examples: &[Vec<u8>]) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(examples.len() * IMAGE_SIZE);
        for example in examples {
            assert_eq!(example.len(), IMAGE_SIZE);
            pixels.extend_from_slice(example);
        }

        let sprite = image::GrayImage::from_raw(IMAGE_SIZE as u32, examples.len() as u32, pixels)
            .expect("sprite dimensions should match the pixel buffer");

        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(sprite)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageOutputFormat::Png,
            )
            .expect("in-memory png encoding should succeed");
        png
    }

    pub(crate) fn one_hot(class: usize) -> Vec<u8> {
        let mut row = vec![0u8; NUM_CLASSES];
        row[class] = 1;
        row
    }

    fn patterned_examples(count: usize) -> (Vec<Vec<u8>>, Vec<u8>) {
        let examples: Vec<Vec<u8>> = (0..count)
            .map(|i| (0..IMAGE_SIZE).map(|j| ((i * 31 + j * 7) % 256) as u8).collect())
            .collect();
        let labels = (0..count).flat_map(|i| one_hot(i % NUM_CLASSES)).collect();
        (examples, labels)
    }

    #[test]
    fn decode_normalizes_red_channel() {
        let mut example = vec![0u8; IMAGE_SIZE];
        example[0] = 0;
        example[1] = 128;
        example[2] = 255;

        let png = sprite_png(&[example]);
        let raw = decode_sprite(&png, one_hot(3)).unwrap();

        assert_eq!(raw.num_examples(), 1);
        assert_eq!(raw.images[0], 0.0);
        assert_eq!(raw.images[1], 128.0 / 255.0);
        assert_eq!(raw.images[2], 1.0);
    }

    #[test]
    fn chunk_size_does_not_change_decode() {
        let (examples, labels) = patterned_examples(10);
        let png = sprite_png(&examples);

        let whole = decode_sprite_chunked(&png, labels.clone(), 10).unwrap();
        let even = decode_sprite_chunked(&png, labels.clone(), 2).unwrap();
        let uneven = decode_sprite_chunked(&png, labels, 7).unwrap();

        assert_eq!(whole.images, even.images);
        // 10 rows in chunks of 7 leaves a remainder chunk of 3.
        assert_eq!(whole.images, uneven.images);
    }

    #[test]
    fn decode_rejects_mismatched_labels() {
        let (examples, _) = patterned_examples(4);
        let png = sprite_png(&examples);

        let err = decode_sprite(&png, vec![0u8; 3 * NUM_CLASSES]).unwrap_err();
        assert!(matches!(err, LoadError::SizeMismatch { images: 4, labels: 3 }));

        let err = decode_sprite(&png, vec![0u8; NUM_CLASSES + 1]).unwrap_err();
        assert!(matches!(err, LoadError::LabelLayout(_)));
    }

    #[test]
    fn decode_rejects_wrong_sprite_width() {
        let sprite = image::GrayImage::from_raw(10, 4, vec![0u8; 40]).unwrap();
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(sprite)
            .write_to(
                &mut std::io::Cursor::new(&mut png),
                image::ImageOutputFormat::Png,
            )
            .unwrap();

        let err = decode_sprite(&png, vec![0u8; 4 * NUM_CLASSES]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::SpriteLayout {
                expected: IMAGE_SIZE,
                found: 10
            }
        ));
    }

    #[test]
    fn split_preserves_order_and_contents() {
        let (examples, labels) = patterned_examples(10);
        let png = sprite_png(&examples);
        let raw = decode_sprite(&png, labels).unwrap();

        let original = raw.clone();
        let (train, test) = raw.split_at(7).unwrap();

        assert_eq!(train.num_examples(), 7);
        assert_eq!(test.num_examples(), 3);
        assert_eq!(train.num_examples() + test.num_examples(), original.num_examples());

        let mut images = train.images.clone();
        images.extend_from_slice(&test.images);
        assert_eq!(images, original.images);

        let mut labels = train.labels.clone();
        labels.extend_from_slice(&test.labels);
        assert_eq!(labels, original.labels);
    }

    #[test]
    fn split_rejects_oversized_train_count() {
        let (examples, labels) = patterned_examples(2);
        let raw = decode_sprite(&sprite_png(&examples), labels).unwrap();

        assert!(matches!(raw.split_at(3), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn split_at_boundaries() {
        let (examples, labels) = patterned_examples(3);
        let raw = decode_sprite(&sprite_png(&examples), labels).unwrap();

        let (train, test) = raw.clone().split_at(0).unwrap();
        assert_eq!(train.num_examples(), 0);
        assert_eq!(test.num_examples(), 3);

        let (train, test) = raw.split_at(3).unwrap();
        assert_eq!(train.num_examples(), 3);
        assert_eq!(test.num_examples(), 0);
    }
}
