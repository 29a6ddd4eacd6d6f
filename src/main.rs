use burn::backend::Autodiff;

use mnist_sprite::dataset::SpriteSource;
use mnist_sprite::show::{ConsolePresenter, Presenter};
use mnist_sprite::training::{self, TrainingConfig};

#[cfg(all(feature = "ndarray", not(feature = "wgpu")))]
mod selected {
    pub type Inner = burn::backend::NdArray;

    pub fn device() -> burn::backend::ndarray::NdArrayDevice {
        burn::backend::ndarray::NdArrayDevice::Cpu
    }
}

#[cfg(feature = "wgpu")]
mod selected {
    pub type Inner = burn::backend::Wgpu;

    pub fn device() -> burn::backend::wgpu::WgpuDevice {
        burn::backend::wgpu::WgpuDevice::default()
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let source = SpriteSource::default();
    let config = TrainingConfig::default();
    let mut presenter = ConsolePresenter::default();

    let result = training::run::<Autodiff<selected::Inner>, _>(
        selected::device(),
        &source,
        &config,
        &mut presenter,
    );

    // Failures surface through the same status channel as progress messages.
    if let Err(error) = result {
        presenter.log_status(&format!("run failed: {error}"));
        std::process::exit(1);
    }
}
