use crate::error::{SolverError, SolverResult};
use crate::model::{Discriminator, Generator, StackLayout};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use std::path::{Path, PathBuf};
use tracing::debug;

type CheckpointRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// Saves and restores generator/discriminator weights as
/// `{iteration}-G.ckpt` and `{iteration}-D.ckpt` in one directory.
#[derive(Clone, Debug)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generator_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("{iteration}-G.ckpt"))
    }

    pub fn discriminator_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("{iteration}-D.ckpt"))
    }

    /// Write both networks for `iteration`, replacing any earlier pair.
    pub fn save<B: Backend>(
        &self,
        iteration: usize,
        generator: &Generator<B>,
        discriminator: &Discriminator<B>,
    ) -> SolverResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|err| SolverError::CheckpointWrite {
            path: self.dir.clone(),
            reason: err.to_string(),
        })?;
        save_module(generator, &self.generator_path(iteration))?;
        save_module(discriminator, &self.discriminator_path(iteration))?;
        Ok(())
    }

    /// Load both networks saved at `iteration` into the given modules.
    pub fn restore<B: Backend>(
        &self,
        iteration: usize,
        generator: Generator<B>,
        discriminator: Discriminator<B>,
        device: &B::Device,
    ) -> SolverResult<(Generator<B>, Discriminator<B>)> {
        let g_path = self.generator_path(iteration);
        let d_path = self.discriminator_path(iteration);
        for path in [&g_path, &d_path] {
            if !path.is_file() {
                return Err(SolverError::CheckpointNotFound { path: path.clone() });
            }
        }
        let generator = load_module(generator, &g_path, device)?;
        let discriminator = load_module(discriminator, &d_path, device)?;
        Ok((generator, discriminator))
    }

    /// Highest iteration with both files present.
    pub fn latest_iteration(&self) -> Option<usize> {
        let pattern = self.dir.join("*-G.ckpt");
        let entries = glob::glob(&pattern.to_string_lossy()).ok()?;
        entries
            .filter_map(Result::ok)
            .filter_map(|path| {
                let stem = path.file_name()?.to_str()?.strip_suffix("-G.ckpt")?;
                stem.parse::<usize>().ok()
            })
            .filter(|&iteration| self.discriminator_path(iteration).is_file())
            .max()
    }
}

fn save_module<B: Backend, M: Module<B>>(module: &M, path: &Path) -> SolverResult<()> {
    let write_error = |reason: String| SolverError::CheckpointWrite {
        path: path.to_path_buf(),
        reason,
    };
    let recorder = CheckpointRecorder::default();
    let bytes = Recorder::<B>::record(&recorder, module.clone().into_record(), ())
        .map_err(|err| write_error(format!("{err:?}")))?;

    // Stage beside the target, then rename into place.
    let staging = path.with_extension("ckpt.partial");
    std::fs::write(&staging, &bytes).map_err(|err| write_error(err.to_string()))?;
    std::fs::rename(&staging, path).map_err(|err| write_error(err.to_string()))?;
    debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn load_module<B: Backend, M: StackLayout<B>>(
    module: M,
    path: &Path,
    device: &B::Device,
) -> SolverResult<M> {
    let corrupt = |reason: String| SolverError::CheckpointCorrupt {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|source| SolverError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let recorder = CheckpointRecorder::default();
    let record: M::Record = Recorder::<B>::load(&recorder, bytes, device)
        .map_err(|err| corrupt(format!("{err:?}")))?;

    // `load_record` panics when stack lengths differ.
    let found = M::record_stack_lengths(&record);
    let expected = module.stack_lengths();
    if found != expected {
        return Err(corrupt(format!(
            "layer stacks {found:?} do not match the configured network {expected:?}"
        )));
    }

    let expected = module.num_params();
    let loaded = module.load_record(record);
    let found = loaded.num_params();
    if found != expected {
        return Err(corrupt(format!(
            "holds {found} parameters, the configured network has {expected}"
        )));
    }
    Ok(loaded)
}
