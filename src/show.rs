use std::fmt;

use burn::tensor::{backend::Backend, Tensor};

use crate::data::MnistBatcher;
use crate::dataset::{RawDataset, IMAGE_SIZE, IMAGE_W};
use crate::error::Error;
use crate::model::Model;

/// Which series a metric point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSplit {
    Train,
    Validation,
}

impl fmt::Display for MetricSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSplit::Train => write!(f, "train"),
            MetricSplit::Validation => write!(f, "validation"),
        }
    }
}

/// Sample predictions gathered for display: the inspected images as flat
/// normalized pixels plus the predicted and true class per example.
#[derive(Debug, Clone)]
pub struct TestResults {
    pub images: Vec<f32>,
    pub predictions: Vec<usize>,
    pub labels: Vec<usize>,
}

impl TestResults {
    pub fn count(&self) -> usize {
        self.predictions.len()
    }

    pub fn correct(&self) -> usize {
        self.predictions
            .iter()
            .zip(&self.labels)
            .filter(|(prediction, label)| prediction == label)
            .count()
    }
}

/// Presentation layer boundary. The training core only ever calls into it;
/// nothing calls back.
pub trait Presenter {
    fn log_status(&mut self, message: &str);
    fn plot_loss(&mut self, step: usize, value: f64, split: MetricSplit);
    fn plot_accuracy(&mut self, step: usize, value: f64, split: MetricSplit);
    fn show_test_results(&mut self, results: &TestResults);
}

/// Console renderer: status lines on stdout, metric points through the log
/// facade, sample predictions as ASCII thumbnails.
pub struct ConsolePresenter {
    /// How many of the inspected examples get a full thumbnail.
    pub max_thumbnails: usize,
}

impl Default for ConsolePresenter {
    fn default() -> Self {
        Self { max_thumbnails: 3 }
    }
}

impl Presenter for ConsolePresenter {
    fn log_status(&mut self, message: &str) {
        println!("{message}");
    }

    fn plot_loss(&mut self, step: usize, value: f64, split: MetricSplit) {
        log::debug!("loss[{split}] step={step} value={value:.4}");
    }

    fn plot_accuracy(&mut self, step: usize, value: f64, split: MetricSplit) {
        log::debug!("accuracy[{split}] step={step} value={value:.4}");
    }

    fn show_test_results(&mut self, results: &TestResults) {
        println!(
            "sample predictions: {}/{} correct",
            results.correct(),
            results.count()
        );

        for index in 0..results.count().min(self.max_thumbnails) {
            let prediction = results.predictions[index];
            let label = results.labels[index];
            let marker = if prediction == label { "" } else { " (wrong)" };
            println!("pred {prediction}, label {label}{marker}");

            let pixels = &results.images[index * IMAGE_SIZE..(index + 1) * IMAGE_SIZE];
            println!("{}", ascii_thumbnail(pixels));
        }
    }
}

/// Renders one flat normalized image as rows of brightness-ramp characters.
fn ascii_thumbnail(pixels: &[f32]) -> String {
    const RAMP: &[u8] = b" .:-=+*#%@";

    let mut out = String::with_capacity(pixels.len() + pixels.len() / IMAGE_W);
    for (i, value) in pixels.iter().enumerate() {
        let shade = (value.clamp(0.0, 1.0) * (RAMP.len() - 1) as f32).round() as usize;
        out.push(RAMP[shade] as char);
        if (i + 1) % IMAGE_W == 0 && i + 1 != pixels.len() {
            out.push('\n');
        }
    }
    out
}

/// Runs the model over the first `num_examples` test examples and hands the
/// annotated predictions to the presenter. Used as the live inspection hook
/// during training.
pub fn show_predictions<B: Backend, P: Presenter>(
    model: &Model<B>,
    test_split: &RawDataset,
    device: &B::Device,
    num_examples: usize,
    presenter: &mut P,
) -> Result<(), Error> {
    let count = num_examples.min(test_split.num_examples());
    let batcher = MnistBatcher::<B>::new(device.clone());
    let batch = batcher.batch(test_split, Some(count))?;

    let predictions = argmax_classes(model.forward(batch.images.clone()));
    let labels = argmax_classes(batch.targets);
    let images = batch.images.into_data().convert::<f32>().value;

    presenter.show_test_results(&TestResults {
        images,
        predictions,
        labels,
    });
    Ok(())
}

/// Collapses per-class scores to the winning class index per row.
pub(crate) fn argmax_classes<B: Backend>(scores: Tensor<B, 2>) -> Vec<usize> {
    let [n, _classes] = scores.dims();
    scores
        .argmax(1)
        .reshape([n])
        .into_data()
        .convert::<i64>()
        .value
        .into_iter()
        .map(|class| class as usize)
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Captures every presenter call for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingPresenter {
        pub statuses: Vec<String>,
        pub loss_points: Vec<(usize, f64, MetricSplit)>,
        pub accuracy_points: Vec<(usize, f64, MetricSplit)>,
        pub results_shown: usize,
    }

    impl Presenter for RecordingPresenter {
        fn log_status(&mut self, message: &str) {
            self.statuses.push(message.to_string());
        }

        fn plot_loss(&mut self, step: usize, value: f64, split: MetricSplit) {
            self.loss_points.push((step, value, split));
        }

        fn plot_accuracy(&mut self, step: usize, value: f64, split: MetricSplit) {
            self.accuracy_points.push((step, value, split));
        }

        fn show_test_results(&mut self, _results: &TestResults) {
            self.results_shown += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_count_correct_predictions() {
        let results = TestResults {
            images: vec![0.0; 3 * IMAGE_SIZE],
            predictions: vec![1, 2, 3],
            labels: vec![1, 0, 3],
        };

        assert_eq!(results.count(), 3);
        assert_eq!(results.correct(), 2);
    }

    #[test]
    fn thumbnail_maps_brightness_to_ramp_ends() {
        let mut pixels = vec![0.0f32; IMAGE_SIZE];
        pixels[0] = 1.0;

        let art = ascii_thumbnail(&pixels);
        assert!(art.starts_with('@'));
        assert!(art.ends_with(' '));
        assert_eq!(art.lines().count(), IMAGE_SIZE / IMAGE_W);
    }

    #[test]
    fn argmax_picks_winning_class_per_row() {
        type TestBackend = burn::backend::NdArray;
        let device = Default::default();

        let scores = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.7, 0.2], [0.9, 0.05, 0.05]],
            &device,
        );

        assert_eq!(argmax_classes(scores), vec![1, 0]);
    }
}
