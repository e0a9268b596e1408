//! Resolution, specialization and invocation engine
//!
//! An [`Engine`] binds itself to exactly one user function on the first
//! successful [`Engine::specialize`] and serves every later
//! [`Engine::invoke`] with it.

pub mod active;
pub mod error;
pub mod invoke;
pub mod module;
pub mod normalize;
pub mod request;
pub mod resolver;
pub mod settle;
pub mod value;

#[cfg(test)]
pub mod testing;

use std::path::Path;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use tokio::sync::Mutex;

use crate::provision::Provisioner;
pub use active::{ActiveFunction, ActiveSlot};
pub use error::{InvokeError, SpecializeError};
pub use module::ModuleLoader;
pub use request::ModuleReference;
pub use value::InvocationRequest;

pub struct Engine {
    slot: ActiveSlot,
    loader: Arc<dyn ModuleLoader>,
    provisioner: Option<Provisioner>,
    // Serializes specialization attempts so only one loads at a time.
    specializing: Mutex<()>,
}

impl Engine {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            slot: ActiveSlot::new(),
            loader,
            provisioner: None,
            specializing: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Provisioner) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn is_specialized(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Source file of the active function, once specialized
    pub fn specialized_path(&self) -> Option<&Path> {
        self.slot.get().map(|active| active.source_path.as_path())
    }

    /// Bind the engine to the callable `reference` designates.
    ///
    /// Fails without side effects on the active function; a failed attempt
    /// leaves the engine eligible for another one.
    pub async fn specialize(
        &self,
        reference: &ModuleReference,
    ) -> Result<&ActiveFunction, SpecializeError> {
        if self.is_specialized() {
            return Err(SpecializeError::AlreadySpecialized);
        }
        let _guard = self.specializing.lock().await;
        if self.is_specialized() {
            return Err(SpecializeError::AlreadySpecialized);
        }

        if let Some(provisioner) = &self.provisioner {
            provisioner.ensure_shared_modules();
        }

        let source_path = resolver::resolve(&reference.path)?;
        let module = self.loader.load(&source_path).await?;
        let callable = module::select_export(module.as_ref(), reference.export_name.as_deref())?;
        drop(module);

        self.slot
            .commit(ActiveFunction {
                callable,
                source_path,
            })
            .map_err(|_| SpecializeError::AlreadySpecialized)?;
        self.slot.get().ok_or(SpecializeError::AlreadySpecialized)
    }

    pub async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<Response<Full<Bytes>>, InvokeError> {
        let active = self.slot.get().ok_or(InvokeError::NotSpecialized)?;
        invoke::invoke(active.callable.as_ref(), request).await
    }
}
