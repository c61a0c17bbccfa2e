//! Dependency descriptors and the materialization cache.
//!
//! A dependency can be handed to the service as a file, a byte buffer, a
//! readable stream or an already loaded module. Each of them is turned into a
//! [`MaterializedReference`] holding the binary image the backend links
//! against. Materialized references are cached per service instance and are
//! never evicted: a long-lived service that sees an unbounded number of
//! distinct dependencies grows without bound.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use log::{debug, trace};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::CompileError;
use crate::loader::LoadedModule;

/// A readable stream of a binary dependency.
///
/// The stream is read to the end the first time its identity is needed and
/// never again; its content is kept so later materializations reuse it. The
/// label only names the image when it is written to disk.
pub struct StreamSource {
    label: String,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    content: OnceLock<StreamContent>,
}

struct StreamContent {
    image: Arc<[u8]>,
    digest: [u8; 32],
}

impl StreamSource {
    pub fn new(label: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        StreamSource {
            label: label.into(),
            reader: Mutex::new(Some(Box::new(reader))),
            content: OnceLock::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn content(&self) -> Result<&StreamContent, CompileError> {
        if let Some(content) = self.content.get() {
            return Ok(content);
        }
        let mut reader = self.reader.lock();
        // another thread may have finished reading while we waited
        if let Some(content) = self.content.get() {
            return Ok(content);
        }
        let mut stream = reader.take().ok_or_else(|| {
            CompileError::io(
                &self.label,
                std::io::Error::other("stream reference failed on an earlier read"),
            )
        })?;
        let mut image = Vec::new();
        stream
            .read_to_end(&mut image)
            .map_err(|e| CompileError::io(&self.label, e))?;
        trace!("read {} bytes from stream {}", image.len(), self.label);
        let digest = Sha256::digest(&image).into();
        Ok(self.content.get_or_init(|| StreamContent {
            image: image.into(),
            digest,
        }))
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").field("label", &self.label).finish_non_exhaustive()
    }
}

/// One binary dependency of a compile request.
#[derive(Debug)]
pub enum DependencyDescriptor {
    Path(PathBuf),
    Bytes { name: String, data: Arc<[u8]> },
    Stream(StreamSource),
    Module(Arc<LoadedModule>),
}

impl DependencyDescriptor {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        DependencyDescriptor::Path(path.into())
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        DependencyDescriptor::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn stream(label: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        DependencyDescriptor::Stream(StreamSource::new(label, reader))
    }

    pub fn module(module: Arc<LoadedModule>) -> Self {
        DependencyDescriptor::Module(module)
    }

    /// Cache key, derived from location or content.
    ///
    /// Never opens a file. A stream is consumed on the first call, which is
    /// the only way to know its content.
    pub fn identity(&self) -> Result<ReferenceIdentity, CompileError> {
        Ok(match self {
            DependencyDescriptor::Path(path) => ReferenceIdentity::location(path),
            DependencyDescriptor::Bytes { data, .. } => ReferenceIdentity::Content(Sha256::digest(data).into()),
            DependencyDescriptor::Stream(stream) => ReferenceIdentity::Content(stream.content()?.digest),
            DependencyDescriptor::Module(module) => ReferenceIdentity::location(module.origin()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceIdentity {
    Location(PathBuf),
    Content([u8; 32]),
}

impl ReferenceIdentity {
    /// Absolute form of `path`, computed lexically so it stays stable after the file is gone.
    fn location(path: &Path) -> Self {
        ReferenceIdentity::Location(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
    }
}

/// Backend-consumable form of a dependency: its binary image.
#[derive(Debug, Clone)]
pub struct MaterializedReference {
    image: Arc<[u8]>,
    origin: Option<PathBuf>,
    file_name: String,
}

impl MaterializedReference {
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// File the image was read from, or the file a loaded module came from.
    /// It may no longer exist.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Name to give the image when the backend needs it on disk.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn from_file(path: &Path) -> Result<Self, CompileError> {
        let image = std::fs::read(path).map_err(|e| CompileError::io(path, e))?;
        Ok(MaterializedReference {
            image: image.into(),
            origin: Some(path.to_path_buf()),
            file_name: file_name_of(path),
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reference".to_string())
}

/// Converts descriptors into materialized references, once per identity.
///
/// Safe to share between threads. Two threads materializing the same
/// identity at once may both do the work; the first result stored wins.
pub struct ReferenceMaterializer {
    cache: Mutex<HashMap<ReferenceIdentity, MaterializedReference>>,
}

impl Default for ReferenceMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceMaterializer {
    pub fn new() -> Self {
        ReferenceMaterializer {
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn materialize(&self, descriptor: &DependencyDescriptor) -> Result<MaterializedReference, CompileError> {
        let identity = descriptor.identity()?;
        if let Some(cached) = self.cache.lock().get(&identity) {
            trace!("reference cache hit: {:?}", identity);
            return Ok(cached.clone());
        }

        debug!("materializing reference {:?}", identity);
        let fresh = match descriptor {
            DependencyDescriptor::Path(path) => MaterializedReference::from_file(path)?,
            DependencyDescriptor::Bytes { name, data } => MaterializedReference {
                image: data.clone(),
                origin: None,
                file_name: name.clone(),
            },
            DependencyDescriptor::Stream(stream) => MaterializedReference {
                image: stream.content()?.image.clone(),
                origin: None,
                file_name: stream.label.clone(),
            },
            // the module keeps its image, its working files may be gone
            DependencyDescriptor::Module(module) => MaterializedReference {
                image: module.shared_image(),
                origin: Some(module.origin().to_path_buf()),
                file_name: file_name_of(module.origin()),
            },
        };

        let mut cache = self.cache.lock();
        Ok(cache.entry(identity).or_insert(fresh).clone())
    }

    /// Materialize every descriptor, keeping their order.
    pub fn materialize_all(&self, descriptors: &[DependencyDescriptor]) -> Result<Vec<MaterializedReference>, CompileError> {
        descriptors.iter().map(|d| self.materialize(d)).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
