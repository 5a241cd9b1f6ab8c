//! Known-face registry: descriptors paired with identities, built from a
//! corpus directory with one sub-folder per person.

use crate::projection::Projection;
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::quality::equalize_histogram;
use crate::roster::IdentityStore;
use crate::types::{Descriptor, IdentityRecord};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("corpus directory not found: {0}")]
    CorpusNotFound(String),
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Minimum descriptor count before a projection is considered.
    pub pca_min_samples: usize,
    pub pca_components: usize,
    /// Also index a histogram-equalized copy of every sample.
    pub augment_equalized: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            pca_min_samples: 10,
            pca_components: 128,
            augment_equalized: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub descriptors: usize,
    pub identities: usize,
    pub dimension: usize,
    pub projected: bool,
}

/// Parallel descriptor/identity lists. Entries are only added in pairs, so
/// `descriptors[i]` always belongs to `identities[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownFaceRegistry {
    descriptors: Vec<Descriptor>,
    identities: Vec<IdentityRecord>,
    projection: Option<Projection>,
    #[serde(default)]
    generation: u64,
}

impl KnownFaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: Descriptor, identity: IdentityRecord) {
        self.descriptors.push(descriptor);
        self.identities.push(identity);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn identities(&self) -> &[IdentityRecord] {
        &self.identities
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Descriptor, &IdentityRecord)> {
        self.descriptors.iter().zip(self.identities.iter())
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Map a raw query descriptor into the space the registry is stored in.
    pub fn prepare_query(&self, descriptor: &Descriptor) -> Descriptor {
        match &self.projection {
            Some(projection) if projection.input_dim() == descriptor.dim() => {
                projection.apply(descriptor)
            }
            _ => descriptor.clone(),
        }
    }

    /// Fit a projection on the current descriptors and project them, when
    /// there are enough samples to make one worthwhile.
    pub fn fit_projection(&mut self, settings: &RegistrySettings) -> bool {
        if self.projection.is_some() {
            return false;
        }
        let count = self.descriptors.len();
        let dim = self.descriptors.first().map(Descriptor::dim).unwrap_or(0);
        if count <= settings.pca_min_samples
            || count <= settings.pca_components
            || dim <= settings.pca_components
        {
            return false;
        }
        let Some(projection) = Projection::fit(&self.descriptors, settings.pca_components) else {
            tracing::warn!(count, dim, "projection fit failed; keeping raw descriptors");
            return false;
        };
        self.descriptors = self.descriptors.iter().map(|d| projection.apply(d)).collect();
        tracing::info!(
            from = dim,
            to = projection.output_dim(),
            samples = count,
            "fitted descriptor projection"
        );
        self.projection = Some(projection);
        true
    }

    pub fn stats(&self) -> RegistryStats {
        let mut ids: Vec<&str> = self.identities.iter().map(|i| i.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        RegistryStats {
            descriptors: self.descriptors.len(),
            identities: ids.len(),
            dimension: self.descriptors.first().map(Descriptor::dim).unwrap_or(0),
            projected: self.projection.is_some(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), descriptors = self.len(), "registry saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        let registry: Self = serde_json::from_str(&raw)?;
        if registry.descriptors.len() != registry.identities.len() {
            return Err(RegistryError::Serialization(serde::de::Error::custom(
                "descriptor and identity counts differ",
            )));
        }
        tracing::info!(path = %path.display(), descriptors = registry.len(), "registry loaded");
        Ok(registry)
    }
}

/// Build a registry from `corpus_root/<person>/<image>` files.
///
/// Undecodable images, images without a face, and descriptors whose
/// dimension disagrees with the first one are logged and skipped.
pub fn build_registry(
    corpus_root: &Path,
    provider: &mut dyn EmbeddingProvider,
    identities: &dyn IdentityStore,
    settings: &RegistrySettings,
) -> Result<KnownFaceRegistry, RegistryError> {
    if !corpus_root.is_dir() {
        return Err(RegistryError::CorpusNotFound(corpus_root.display().to_string()));
    }

    let mut registry = KnownFaceRegistry::new();
    let mut dim: Option<usize> = None;

    for folder in sorted_entries(corpus_root)?.into_iter().filter(|p| p.is_dir()) {
        let Some(name) = folder.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let identity = identities
            .lookup(name)
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                tracing::warn!(folder = name, "no roster match; using folder name");
                IdentityRecord::from_folder(name)
            });

        let mut added = 0usize;
        let mut skipped = 0usize;
        for path in sorted_entries(&folder)?.into_iter().filter(|p| is_image(p)) {
            let image = match image::open(&path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping undecodable image"
                    );
                    skipped += 1;
                    continue;
                }
            };
            let descriptors = match describe_sample(provider, &image, settings.augment_equalized) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "embedding failed");
                    skipped += 1;
                    continue;
                }
            };
            if descriptors.is_empty() {
                tracing::debug!(path = %path.display(), "no face found");
                skipped += 1;
                continue;
            }
            for descriptor in descriptors {
                let expected = *dim.get_or_insert(descriptor.dim());
                if descriptor.dim() != expected {
                    tracing::warn!(
                        path = %path.display(),
                        expected,
                        got = descriptor.dim(),
                        "descriptor dimension mismatch"
                    );
                    skipped += 1;
                    continue;
                }
                registry.push(descriptor, identity.clone());
                added += 1;
            }
        }
        tracing::info!(identity = %identity.display_name, added, skipped, "indexed corpus folder");
    }

    registry.fit_projection(settings);
    Ok(registry)
}

/// Descriptors for one corpus sample. Faces are located once; with
/// `augment` the same boxes are embedded again on the equalized image.
fn describe_sample(
    provider: &mut dyn EmbeddingProvider,
    image: &GrayImage,
    augment: bool,
) -> Result<Vec<Descriptor>, ProviderError> {
    let boxes = provider.locate(image)?;
    if boxes.is_empty() {
        return Ok(Vec::new());
    }
    let again = augment.then(|| boxes.clone());
    let mut descriptors: Vec<Descriptor> =
        provider.embed(image, boxes)?.into_iter().map(|(_, d)| d).collect();
    if let Some(boxes) = again {
        let equalized = equalize_histogram(image);
        descriptors.extend(provider.embed(&equalized, boxes)?.into_iter().map(|(_, d)| d));
    }
    Ok(descriptors)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let mut paths = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
}

/// Registry snapshot shared between the session thread and rebuild tasks.
/// Readers clone the `Arc`; `replace` swaps in a new snapshot.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    current: RwLock<Arc<KnownFaceRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: KnownFaceRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<KnownFaceRegistry> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Install `registry` with a generation one past the current one.
    pub fn replace(&self, mut registry: KnownFaceRegistry) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        registry.generation = guard.generation + 1;
        let generation = registry.generation;
        *guard = Arc::new(registry);
        generation
    }

    /// Rebuild from the corpus and swap. On failure the previous snapshot
    /// stays in place.
    pub fn reload(
        &self,
        corpus_root: &Path,
        provider: &mut dyn EmbeddingProvider,
        identities: &dyn IdentityStore,
        settings: &RegistrySettings,
    ) -> Result<u64, RegistryError> {
        let registry = build_registry(corpus_root, provider, identities, settings)?;
        let size = registry.len();
        let generation = self.replace(registry);
        tracing::info!(generation, descriptors = size, "registry reloaded");
        Ok(generation)
    }
}
