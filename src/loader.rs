// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    backend::{Component, ComponentCallbacks, Core},
    error::{Error, Result},
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// An initialised core from which component handles are acquired.
///
/// The core is deinitialised exactly once, by [`ComponentLoader::unload`]
/// or when the loader is dropped.
pub struct ComponentLoader {
    core: Arc<dyn Core>,
    loaded: bool,
}

impl ComponentLoader {
    /// Initialises `core` for a session that needs `role`.
    ///
    /// # Errors
    ///
    /// [`Error::ComponentNotFound`] if the core fails to initialise.
    pub fn load(core: Arc<dyn Core>, role: &str) -> Result<Self> {
        core.initialize().map_err(|code| Error::ComponentNotFound {
            role: role.to_string(),
            reason: format!("core initialisation failed: {}", code),
        })?;
        debug!(role, "core initialised");
        Ok(Self { core, loaded: true })
    }

    /// Picks the component to load: `explicit` if given, otherwise the
    /// first component the core lists for `role`.
    pub fn resolve(&self, role: &str, explicit: Option<&str>) -> Result<String> {
        if let Some(name) = explicit {
            return Ok(name.to_string());
        }
        let names = self.core.components_of_role(role);
        debug!(role, ?names, "components for role");
        names
            .into_iter()
            .next()
            .ok_or_else(|| Error::ComponentNotFound {
                role: role.to_string(),
                reason: "no component implements the role".to_string(),
            })
    }

    /// Acquires a handle to `name`, registering `callbacks`.
    pub fn acquire(
        &self,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Box<dyn Component>> {
        let component = self
            .core
            .get_handle(name, callbacks)
            .map_err(|code| Error::HandleAcquisitionFailed {
                name: name.to_string(),
                code,
            })?;
        info!(component = name, "component handle acquired");
        Ok(component)
    }

    /// Returns a handle to the core. Failure is logged; the handle is gone
    /// either way.
    pub fn release(&self, component: Box<dyn Component>) {
        match self.core.free_handle(component) {
            Ok(()) => debug!("component handle freed"),
            Err(code) => error!(%code, "failed to free component handle"),
        }
    }

    pub fn unload(&mut self) {
        if !self.loaded {
            return;
        }
        self.loaded = false;
        if let Err(code) = self.core.deinitialize() {
            error!(%code, "core deinitialisation failed");
        } else {
            debug!("core deinitialised");
        }
    }
}

impl Drop for ComponentLoader {
    fn drop(&mut self) {
        self.unload();
    }
}
