//! A trained model and its vocabulary, saved and loaded as one unit.
//!
//! An artifact is a directory:
//! - `manifest.json` holds the format version, the [ModelConfig] and the
//!   ordered token table of the vocabulary.
//! - `weights.safetensors` holds every parameter, keyed by layer path such
//!   as `encoder.0.self_attn.w_q.weight` or `head.weight`.
//!
//! Saving writes a sibling staging directory and renames it into place, so a
//! reader never sees a manifest without its weights.

use std::fs;
use std::path::{Path, PathBuf};

use dfdx::prelude::*;
use melodist_core::error::VocabularyError;
use melodist_core::vocab::Vocabulary;
use memmap2::MmapOptions;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::error::{MelodyError, Result};
use crate::nn::transformer::MelodyModel;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const FORMAT_VERSION: u32 = 1;

/// Parameters whose first dimension is the vocabulary size.
const VOCAB_SIZED: [&str; 3] = ["src_embedding.weight", "tgt_embedding.weight", "head.weight"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub model: ModelConfig,
    pub vocabulary: Vocabulary,
}

impl Manifest {
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| MelodyError::resource(&path, format!("cannot read manifest: {e}")))?;
        let manifest: Self = serde_json::from_str(&text)
            .map_err(|e| MelodyError::resource(&path, format!("malformed manifest: {e}")))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(MelodyError::resource(
                &path,
                format!(
                    "format version {} is not supported (expected {FORMAT_VERSION})",
                    manifest.format_version
                ),
            ));
        }
        Ok(manifest)
    }
}

/// A model together with the vocabulary its indices refer to.
#[derive(Debug)]
pub struct ModelArtifact<D: Device<f32>> {
    pub model: MelodyModel<D>,
    pub vocabulary: Vocabulary,
}

impl<D: Device<f32>> ModelArtifact<D> {
    /// Pairs a model with a vocabulary, rejecting pairs that disagree on size.
    pub fn new(model: MelodyModel<D>, vocabulary: Vocabulary) -> Result<Self> {
        vocabulary.check_size(model.config().vocab_size)?;
        Ok(Self { model, vocabulary })
    }

    /// Writes the artifact to `dir`, replacing whatever was there.
    ///
    /// The old artifact is moved aside, not deleted, until the new one is in
    /// place. On failure `dir` holds either the old artifact or the new one.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let staging = sibling_dir(dir, "staging")?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        if let Err(e) = self.write_into(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        swap_into_place(&staging, dir)?;
        info!(
            path = %dir.display(),
            vocab_size = self.model.config().vocab_size,
            "saved model artifact"
        );
        Ok(())
    }

    fn write_into(&self, dir: &Path) -> Result<()> {
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            model: *self.model.config(),
            vocabulary: self.vocabulary.clone(),
        };
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
        let weights = dir.join(WEIGHTS_FILE);
        self.model
            .network()
            .save_safetensors(&weights)
            .map_err(|e| MelodyError::resource(&weights, format!("cannot write weights: {e:?}")))
    }

    /// Loads the model and the vocabulary stored with it.
    pub fn load(dir: impl AsRef<Path>, dev: &D) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = Manifest::read(dir)?;
        let model = load_model(dir, dev, manifest.model)?;
        Self::new(model, manifest.vocabulary)
    }

    /// Loads the model but pairs it with `vocabulary`, a vocabulary rebuilt
    /// from the training corpus. It must map every index to the same token as
    /// the stored table, otherwise the model's indices would be misread.
    pub fn load_with_vocabulary(
        dir: impl AsRef<Path>,
        dev: &D,
        vocabulary: Vocabulary,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = Manifest::read(dir)?;
        manifest.vocabulary.check_table(&vocabulary)?;
        let model = load_model(dir, dev, manifest.model)?;
        Self::new(model, vocabulary)
    }
}

/// The hidden sibling `.<name>.<suffix>` of `dir`.
fn sibling_dir(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| MelodyError::resource(dir, "artifact path has no directory name"))?;
    let mut sibling = std::ffi::OsString::from(".");
    sibling.push(name);
    sibling.push(".");
    sibling.push(suffix);
    Ok(dir.with_file_name(sibling))
}

/// Renames `staging` to `dir`. An existing `dir` is renamed to a backup
/// first and restored if the second rename fails.
fn swap_into_place(staging: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(fs::rename(staging, dir)?);
    }
    let backup = sibling_dir(dir, "previous")?;
    if backup.exists() {
        fs::remove_dir_all(&backup)?;
    }
    fs::rename(dir, &backup)?;
    if let Err(e) = fs::rename(staging, dir) {
        if let Err(restore) = fs::rename(&backup, dir) {
            warn!(
                backup = %backup.display(),
                error = %restore,
                "cannot restore the previous artifact"
            );
        }
        return Err(e.into());
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        warn!(backup = %backup.display(), error = %e, "cannot remove the previous artifact");
    }
    Ok(())
}

/// Checks the stored shapes against `config` before anything is loaded.
fn check_stored_shapes(path: &Path, config: &ModelConfig) -> Result<()> {
    let unreadable = |e: String| MelodyError::resource(path, format!("cannot read weights: {e}"));
    let f = fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let buffer = unsafe { MmapOptions::new().map(&f) }.map_err(|e| unreadable(e.to_string()))?;
    let tensors = SafeTensors::deserialize(&buffer).map_err(|e| unreadable(format!("{e:?}")))?;
    for name in VOCAB_SIZED {
        let view = tensors
            .tensor(name)
            .map_err(|e| unreadable(format!("{name}: {e:?}")))?;
        match *view.shape() {
            [rows, cols] if cols == config.d_model => {
                if rows != config.vocab_size {
                    return Err(VocabularyError::SizeMismatch {
                        expected: config.vocab_size,
                        actual: rows,
                    }
                    .into());
                }
            }
            ref shape => {
                return Err(MelodyError::resource(
                    path,
                    format!(
                        "{name} has shape {shape:?}, expected ({}, {})",
                        config.vocab_size, config.d_model
                    ),
                ))
            }
        }
    }
    Ok(())
}

fn load_model<D: Device<f32>>(dir: &Path, dev: &D, config: ModelConfig) -> Result<MelodyModel<D>> {
    let weights = dir.join(WEIGHTS_FILE);
    check_stored_shapes(&weights, &config)?;
    let mut model = MelodyModel::build(dev, config)?;
    model
        .network_mut()
        .load_safetensors(&weights)
        .map_err(|e| MelodyError::resource(&weights, format!("cannot load weights: {e:?}")))?;
    info!(path = %dir.display(), vocab_size = config.vocab_size, "loaded model artifact");
    Ok(model)
}
