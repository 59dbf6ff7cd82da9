use crate::error::SolverError;
use burn::backend::Autodiff;
use burn::tensor::backend::AutodiffBackend;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Compute device selected once at startup.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Wgpu,
    Cuda,
}

/// Work that is generic over the autodiff backend picked by [`launch`].
///
/// Inference work can use `B::InnerBackend`, which shares the device type.
pub trait BackendTask {
    type Output;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> anyhow::Result<Self::Output>;
}

/// Run `task` on the backend matching `device`.
pub fn launch<T: BackendTask>(device: ComputeDevice, task: T) -> anyhow::Result<T::Output> {
    match device {
        ComputeDevice::Cpu => {
            type Cpu = Autodiff<burn::backend::NdArray<f32>>;
            task.run::<Cpu>(burn::backend::ndarray::NdArrayDevice::Cpu)
        }
        #[cfg(feature = "wgpu")]
        ComputeDevice::Wgpu => {
            type Gpu = Autodiff<burn::backend::Wgpu<f32, i32>>;
            task.run::<Gpu>(burn::backend::wgpu::WgpuDevice::default())
        }
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda => {
            type Gpu = Autodiff<burn::backend::Cuda<f32, i32>>;
            task.run::<Gpu>(burn::backend::cuda::CudaDevice::default())
        }
        #[allow(unreachable_patterns)]
        other => Err(SolverError::UnsupportedDevice(format!("{other:?}")).into()),
    }
}
