//! [`PluginRegistry`] – controller name → factory resolution.
//!
//! The configuration names controllers as a comma-separated list, e.g.
//! `"balloon, ksm"`.  The registry maps each (case-insensitive) name to a
//! factory and instantiates the list once, in order, from the shared
//! [`ControllerContext`].
//!
//! A name that does not resolve, or whose factory fails, is logged and left
//! out; the remaining controllers still load.  The returned list keeps the
//! configuration order, which is also the dispatch order on every tick.
//!
//! # Example
//!
//! ```rust
//! use hostvisor_hal::PluginRegistry;
//!
//! let registry = PluginRegistry::with_builtins();
//! assert!(registry.contains("balloon"));
//! assert!(registry.contains("KSM"));
//! assert!(!registry.contains("nosuch"));
//! ```

use std::collections::HashMap;

use hostvisor_types::HostvisorError;
use tracing::{info, warn};

use crate::balloon::{self, BalloonController};
use crate::controller::{Controller, ControllerContext};
use crate::ksm::{self, KsmController};

/// Builds one controller instance from the shared property bag.
pub type ControllerFactory =
    Box<dyn Fn(&ControllerContext) -> Result<Box<dyn Controller>, HostvisorError> + Send + Sync>;

/// Split a configured controller list into names: comma-separated, surrounding
/// whitespace stripped, empty entries skipped.
pub fn parse_controller_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|name| !name.is_empty())
}

/// Runtime table of controller factories.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, ControllerFactory>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the `balloon` and `ksm`
    /// controllers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(balloon::NAME, BalloonController::instance);
        registry.register(ksm::NAME, KsmController::instance);
        registry
    }

    /// Register a factory under `name`.  Any factory previously registered
    /// under the same (case-insensitive) name is replaced.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ControllerContext) -> Result<Box<dyn Controller>, HostvisorError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(name.trim().to_lowercase(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve `name` and build one instance.
    ///
    /// # Errors
    ///
    /// Returns [`HostvisorError::UnknownController`] when nothing is
    /// registered under `name`, or whatever error the factory itself returns.
    pub fn instantiate(
        &self,
        name: &str,
        ctx: &ControllerContext,
    ) -> Result<Box<dyn Controller>, HostvisorError> {
        let factory = self
            .factories
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| HostvisorError::UnknownController(name.to_string()))?;
        factory(ctx)
    }

    /// Instantiate every controller named in `list`, in order.  Failures are
    /// logged at `warn` and skipped.
    pub fn load(&self, list: &str, ctx: &ControllerContext) -> Vec<Box<dyn Controller>> {
        let mut controllers = Vec::new();
        for name in parse_controller_names(list) {
            match self.instantiate(name, ctx) {
                Ok(controller) => {
                    info!(controller = name, "controller loaded");
                    controllers.push(controller);
                }
                Err(e) => {
                    warn!(controller = name, error = %e, "unable to load controller; skipping");
                }
            }
        }
        controllers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StaticGuestManager;
    use crate::sim::DryRunHypervisor;
    use hostvisor_types::{GuestSample, HostSample};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    struct NoHost;
    impl crate::monitor::HostMonitor for NoHost {
        fn interrogate(&self) -> Option<HostSample> {
            None
        }
    }

    struct Named(String);
    impl Controller for Named {
        fn name(&self) -> &str {
            &self.0
        }
        fn process(&mut self, _: &HostSample, _: &[GuestSample]) -> Result<(), HostvisorError> {
            Ok(())
        }
    }

    fn context() -> ControllerContext {
        ControllerContext {
            hypervisor: Arc::new(DryRunHypervisor::new()),
            host_monitor: Arc::new(NoHost),
            guest_manager: Arc::new(StaticGuestManager::default()),
            config: Arc::new(BTreeMap::<(String, String), String>::new()),
        }
    }

    fn names_of(controllers: &[Box<dyn Controller>]) -> Vec<&str> {
        controllers.iter().map(|c| c.name()).collect()
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn parse_strips_whitespace_and_empty_entries() {
        let names: Vec<&str> = parse_controller_names(" balloon ,, ksm,\t,cpu ").collect();
        assert_eq!(names, vec!["balloon", "ksm", "cpu"]);
        assert_eq!(parse_controller_names("").count(), 0);
    }

    #[test]
    fn load_keeps_configuration_order() {
        let registry = PluginRegistry::with_builtins();
        let loaded = registry.load("ksm, balloon", &context());
        assert_eq!(names_of(&loaded), vec!["ksm", "balloon"]);
    }

    #[test]
    fn unknown_controller_is_skipped() {
        let registry = PluginRegistry::with_builtins();
        let loaded = registry.load("nosuch,ksm", &context());
        assert_eq!(names_of(&loaded), vec!["ksm"]);
    }

    #[test]
    fn instantiate_unknown_returns_typed_error() {
        let registry = PluginRegistry::new();
        let result = registry.instantiate("nosuch", &context());
        assert!(matches!(result, Err(HostvisorError::UnknownController(name)) if name == "nosuch"));
    }

    #[test]
    fn failing_factory_is_skipped_like_unknown_name() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register("broken", |_ctx: &ControllerContext| {
            Err(HostvisorError::ControllerFailed {
                controller: "broken".to_string(),
                details: "missing device".to_string(),
            })
        });
        let loaded = registry.load("broken, balloon", &context());
        assert_eq!(names_of(&loaded), vec!["balloon"]);
    }

    #[test]
    fn names_resolve_case_insensitively() {
        let registry = PluginRegistry::with_builtins();
        let loaded = registry.load("Balloon, KSM", &context());
        assert_eq!(names_of(&loaded), vec!["balloon", "ksm"]);
        assert_eq!(registry.names(), vec!["balloon", "ksm"]);
    }

    #[test]
    fn duplicate_names_load_twice() {
        let mut registry = PluginRegistry::new();
        registry.register("echo", |_ctx: &ControllerContext| {
            Ok(Box::new(Named("echo".to_string())) as Box<dyn Controller>)
        });
        let loaded = registry.load("echo,echo", &context());
        assert_eq!(names_of(&loaded), vec!["echo", "echo"]);
    }

    #[test]
    fn re_registering_replaces_factory() {
        let mut registry = PluginRegistry::with_builtins();
        registry.register("KSM", |_ctx: &ControllerContext| {
            Ok(Box::new(Named("custom-ksm".to_string())) as Box<dyn Controller>)
        });
        let loaded = registry.load("ksm", &context());
        assert_eq!(names_of(&loaded), vec!["custom-ksm"]);
    }
}
