use burn::{
    config::Config,
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{GradientsParams, Optimizer, RmsPropConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};

use crate::data::{MnistBatch, MnistBatcher};
use crate::dataset::{MnistData, RawDataset, SpriteSource};
use crate::error::Error;
use crate::model::{Model, ModelConfig};
use crate::show::{show_predictions, MetricSplit, Presenter};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: RmsPropConfig,
    #[config(default = 3)]
    pub num_epochs: usize,
    #[config(default = 320)]
    pub batch_size: usize,
    #[config(default = 0.15)]
    pub validation_split: f64,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Refresh the live predictions every N batches within an epoch; 0
    /// disables the refresh.
    #[config(default = 10)]
    pub inspect_every: usize,
    /// How many test examples the inspection hook runs the model over.
    #[config(default = 50)]
    pub inspect_examples: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(ModelConfig::default(), RmsPropConfig::new())
    }
}

/// Lifecycle of one load/train/evaluate run. No retries: every failure is
/// terminal and the whole flow must be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Loading,
    Ready,
    Training,
    Evaluated,
}

/// Callback events emitted by the training loop, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    BatchEnd {
        /// Batch index within the current epoch.
        batch: usize,
        loss: f64,
        accuracy: f64,
    },
    EpochEnd {
        epoch: usize,
        valid_loss: f64,
        valid_accuracy: f64,
    },
}

/// One point of a metric history series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub step: usize,
    pub value: f64,
    pub split: MetricSplit,
}

/// Per-run mutable state: the monotone batch counter, the loss and accuracy
/// histories, and the run lifecycle. Created at run start, discarded with it.
#[derive(Debug)]
pub struct TrainingSession {
    state: RunState,
    batch_counter: usize,
    total_batches: usize,
    loss_series: Vec<SeriesPoint>,
    accuracy_series: Vec<SeriesPoint>,
    last_valid_accuracy: Option<f64>,
}

impl Default for TrainingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingSession {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            batch_counter: 0,
            total_batches: 0,
            loss_series: Vec::new(),
            accuracy_series: Vec::new(),
            last_valid_accuracy: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn batch_counter(&self) -> usize {
        self.batch_counter
    }

    pub fn loss_series(&self) -> &[SeriesPoint] {
        &self.loss_series
    }

    pub fn accuracy_series(&self) -> &[SeriesPoint] {
        &self.accuracy_series
    }

    pub fn last_valid_accuracy(&self) -> Option<f64> {
        self.last_valid_accuracy
    }

    pub(crate) fn set_state(&mut self, state: RunState) {
        log::debug!("session state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub(crate) fn start_training(&mut self, total_batches: usize) {
        self.total_batches = total_batches;
        self.set_state(RunState::Training);
    }

    /// Applies one training event: updates the counter and history series and
    /// forwards the metrics to the presenter.
    pub fn handle<P: Presenter>(&mut self, event: &TrainingEvent, presenter: &mut P) {
        match *event {
            TrainingEvent::BatchEnd { loss, accuracy, .. } => {
                self.batch_counter += 1;
                let step = self.batch_counter;

                let percent = 100.0 * step as f64 / self.total_batches.max(1) as f64;
                presenter.log_status(&format!("training ({percent:.1}%)"));

                self.push(step, loss, accuracy, MetricSplit::Train);
                presenter.plot_loss(step, loss, MetricSplit::Train);
                presenter.plot_accuracy(step, accuracy, MetricSplit::Train);
            }
            TrainingEvent::EpochEnd {
                valid_loss,
                valid_accuracy,
                ..
            } => {
                let step = self.batch_counter;
                self.last_valid_accuracy = Some(valid_accuracy);

                self.push(step, valid_loss, valid_accuracy, MetricSplit::Validation);
                presenter.plot_loss(step, valid_loss, MetricSplit::Validation);
                presenter.plot_accuracy(step, valid_accuracy, MetricSplit::Validation);
            }
        }
    }

    fn push(&mut self, step: usize, loss: f64, accuracy: f64, split: MetricSplit) {
        self.loss_series.push(SeriesPoint {
            step,
            value: loss,
            split,
        });
        self.accuracy_series.push(SeriesPoint {
            step,
            value: accuracy,
            split,
        });
    }
}

/// Final metrics of a completed run.
#[derive(Debug)]
pub struct TrainingReport {
    pub final_valid_accuracy: f64,
    pub test_accuracy: f64,
    pub test_loss: f64,
    pub session: TrainingSession,
}

/// Trains the model over the train split, reserving the trailing
/// `validation_split` fraction for per-epoch validation.
///
/// `inspect` receives the live model every `inspect_every`-th batch of an
/// epoch and after each validation pass.
pub fn train<B: AutodiffBackend, P: Presenter>(
    device: B::Device,
    data: &MnistData,
    config: &TrainingConfig,
    session: &mut TrainingSession,
    presenter: &mut P,
    mut inspect: impl FnMut(&Model<B>, &mut P),
) -> Result<Model<B>, Error> {
    if config.batch_size == 0 {
        return Err(Error::invalid_argument("batch size must be non-zero"));
    }
    if !(0.0..1.0).contains(&config.validation_split) {
        return Err(Error::invalid_argument(format!(
            "validation split {} is outside [0, 1)",
            config.validation_split
        )));
    }

    let train_split = data.train();
    let total = train_split.num_examples();
    let fit_count = (total as f64 * (1.0 - config.validation_split)).floor() as usize;
    let valid_count = total - fit_count;
    if fit_count == 0 {
        return Err(Error::invalid_argument(
            "train split is empty after the validation holdout",
        ));
    }
    if valid_count == 0 {
        return Err(Error::invalid_argument(
            "validation holdout is empty; lower the train count or raise the split",
        ));
    }

    B::seed(config.seed);

    let batches_per_epoch = fit_count.div_ceil(config.batch_size);
    session.start_training(batches_per_epoch * config.num_epochs);

    let mut model = config.model.init::<B>(&device);
    let mut optim = config.optimizer.init();
    let batcher = MnistBatcher::<B>::new(device.clone());
    let batcher_valid = MnistBatcher::<B::InnerBackend>::new(device.clone());
    let loss_fn = CrossEntropyLossConfig::new().init(&device);
    let loss_fn_valid = CrossEntropyLossConfig::new().init(&device);

    for epoch in 0..config.num_epochs {
        for (batch_index, start) in (0..fit_count).step_by(config.batch_size).enumerate() {
            let end = (start + config.batch_size).min(fit_count);
            let batch = batcher.slice(train_split, start, end)?;
            let targets = target_classes(&batch);

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), targets.clone());
            let loss_value = loss.clone().into_scalar().elem::<f64>();
            if !loss_value.is_finite() {
                return Err(Error::Training(format!(
                    "non-finite loss {loss_value} at epoch {epoch}, batch {batch_index}"
                )));
            }
            let accuracy_value = accuracy(output, targets);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);

            session.handle(
                &TrainingEvent::BatchEnd {
                    batch: batch_index,
                    loss: loss_value,
                    accuracy: accuracy_value,
                },
                presenter,
            );
            if config.inspect_every != 0 && batch_index % config.inspect_every == 0 {
                inspect(&model, presenter);
            }
        }

        let (valid_loss, valid_accuracy) = evaluate(
            &model.valid(),
            &batcher_valid,
            &loss_fn_valid,
            train_split,
            fit_count,
            total,
            config.batch_size,
        )?;
        session.handle(
            &TrainingEvent::EpochEnd {
                epoch,
                valid_loss,
                valid_accuracy,
            },
            presenter,
        );
        inspect(&model, presenter);
    }

    Ok(model)
}

/// Mean loss and accuracy of `model` over the example range `[start, end)` of
/// the split, weighted by batch size.
pub fn evaluate<B: Backend>(
    model: &Model<B>,
    batcher: &MnistBatcher<B>,
    loss_fn: &CrossEntropyLoss<B>,
    split: &RawDataset,
    start: usize,
    end: usize,
    batch_size: usize,
) -> Result<(f64, f64), Error> {
    if start >= end {
        return Err(Error::invalid_argument(format!(
            "evaluation range {start}..{end} is empty"
        )));
    }

    let mut examples = 0usize;
    let mut loss_sum = 0.0;
    let mut correct = 0.0;

    for batch_start in (start..end).step_by(batch_size.max(1)) {
        let batch_end = (batch_start + batch_size.max(1)).min(end);
        let batch = batcher.slice(split, batch_start, batch_end)?;
        let targets = target_classes(&batch);

        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), targets.clone());

        let n = batch_end - batch_start;
        loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
        correct += correct_count(output, targets);
        examples += n;
    }

    Ok((loss_sum / examples as f64, correct / examples as f64))
}

/// Runs the whole pipeline once: load, build, train, evaluate against the
/// held-out test split, report. Any error aborts the run.
pub fn run<B: AutodiffBackend, P: Presenter>(
    device: B::Device,
    source: &SpriteSource,
    config: &TrainingConfig,
    presenter: &mut P,
) -> Result<TrainingReport, Error> {
    let mut session = TrainingSession::new();

    presenter.log_status("loading the MNIST dataset");
    session.set_state(RunState::Loading);
    let data = MnistData::load(source)?;
    session.set_state(RunState::Ready);

    presenter.log_status("starting model training");
    let inspect_examples = config.inspect_examples;
    let inspect_device = device.clone();
    let model = train(
        device.clone(),
        &data,
        config,
        &mut session,
        presenter,
        |model: &Model<B>, presenter: &mut P| {
            let model = model.valid();
            if let Err(error) = show_predictions(
                &model,
                data.test(),
                &inspect_device,
                inspect_examples,
                presenter,
            ) {
                log::warn!("failed to refresh sample predictions: {error}");
            }
        },
    )?;

    let test = data.test();
    let batcher = MnistBatcher::<B::InnerBackend>::new(device.clone());
    let loss_fn = CrossEntropyLossConfig::new().init(&device);
    let (test_loss, test_accuracy) = evaluate(
        &model.valid(),
        &batcher,
        &loss_fn,
        test,
        0,
        test.num_examples(),
        config.batch_size,
    )?;
    session.set_state(RunState::Evaluated);

    let final_valid_accuracy = session.last_valid_accuracy().unwrap_or(f64::NAN);
    presenter.log_status(&format!(
        "Final validation accuracy: {:.1}%; Final test accuracy: {:.1}%",
        final_valid_accuracy * 100.0,
        test_accuracy * 100.0
    ));

    Ok(TrainingReport {
        final_valid_accuracy,
        test_accuracy,
        test_loss,
        session,
    })
}

/// One-hot target rows collapsed to class indices for the loss.
fn target_classes<B: Backend>(batch: &MnistBatch<B>) -> Tensor<B, 1, Int> {
    let [n, _classes] = batch.targets.dims();
    batch.targets.clone().argmax(1).reshape([n])
}

fn correct_count<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let [n, _classes] = output.dims();
    if n == 0 {
        return 0.0;
    }
    output
        .argmax(1)
        .reshape([n])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<f64>()
}

fn accuracy<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let [n, _classes] = output.dims();
    if n == 0 {
        return 0.0;
    }
    correct_count(output, targets) / n as f64
}
