//! Shared AT handlers, one per transport.
//!
//! Several drivers (network, SMS, GNSS...) usually talk to the same modem
//! port. They obtain the handler for that port through an [`AtRegistry`],
//! which hands out the existing instance with its reference count
//! incremented and tears it down when the last user closes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use modemat_core::{AtConfig, Result};
use modemat_hardware::Transport;
use tracing::info;

use crate::handler::AtHandler;

/// Registry of live [`AtHandler`]s keyed by transport identity.
#[derive(Debug, Default)]
pub struct AtRegistry {
    instances: Mutex<HashMap<usize, Arc<AtHandler>>>,
}

/// Identity of the shared transport allocation.
fn transport_key(transport: &Arc<dyn Transport>) -> usize {
    Arc::as_ptr(transport).cast::<()>() as usize
}

impl AtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<usize, Arc<AtHandler>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handler for `transport`, created with `config` if none is live.
    ///
    /// An existing handler is returned with its count incremented and
    /// `config` is ignored. An entry whose count already dropped to zero
    /// through [`AtHandler::dec_ref_count`] is detached and replaced.
    ///
    /// # Errors
    /// Returns [`AtError::Config`](modemat_core::AtError::Config) when a new
    /// handler is needed and `config` does not validate.
    pub fn get_instance(
        &self,
        transport: Arc<dyn Transport>,
        config: &AtConfig,
    ) -> Result<Arc<AtHandler>> {
        let key = transport_key(&transport);
        let mut instances = self.map();

        if let Some(existing) = instances.get(&key)
            && existing.ref_count() > 0
        {
            let count = existing.inc_ref_count();
            info!(transport = transport.name(), ref_count = count, "AT handler shared");
            return Ok(Arc::clone(existing));
        }

        let handler = Arc::new(AtHandler::new(Arc::clone(&transport), config.clone())?);
        let stale = instances.insert(key, Arc::clone(&handler));
        drop(instances);

        if let Some(stale) = stale {
            destroy(&stale);
        }
        info!(transport = transport.name(), "AT handler created");
        Ok(handler)
    }

    /// Release one reference to `handler`. Returns the remaining count.
    ///
    /// At zero the handler leaves the registry, its URC handlers are dropped
    /// and its buffer released. Closing a handler that is already at zero
    /// does nothing.
    pub fn close(&self, handler: &Arc<AtHandler>) -> usize {
        let key = transport_key(handler.transport());
        let mut instances = self.map();

        match handler.release_ref() {
            Some(0) => {}
            Some(remaining) => return remaining,
            None => return 0,
        }
        if instances
            .get(&key)
            .is_some_and(|entry| Arc::ptr_eq(entry, handler))
        {
            instances.remove(&key);
        }
        drop(instances);

        destroy(handler);
        0
    }

    /// Turn traffic tracing on or off for every live handler.
    pub fn set_debug_list(&self, enabled: bool) {
        for handler in self.instances() {
            handler.set_debug(enabled);
        }
    }

    /// Change the AT timeout of every live handler.
    pub fn set_at_timeout_list(&self, timeout: Duration, sticky: bool) {
        for handler in self.instances() {
            handler.set_at_timeout(timeout, sticky);
        }
    }

    /// Number of handlers with a nonzero count.
    pub fn len(&self) -> usize {
        self.map().values().filter(|handler| handler.ref_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live handlers.
    pub fn instances(&self) -> Vec<Arc<AtHandler>> {
        self.map()
            .values()
            .filter(|handler| handler.ref_count() > 0)
            .cloned()
            .collect()
    }
}

fn destroy(handler: &AtHandler) {
    handler.detach();
    info!(transport = handler.transport().name(), "AT handler destroyed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use modemat_core::AtError;
    use modemat_hardware::mock::MockTransport;

    fn transport() -> Arc<dyn Transport> {
        let (transport, _modem) = MockTransport::new();
        Arc::new(transport)
    }

    #[test]
    fn test_same_transport_shares_handler() {
        let registry = AtRegistry::new();
        let port = transport();

        let first = registry.get_instance(Arc::clone(&port), &AtConfig::default()).unwrap();
        let second = registry.get_instance(Arc::clone(&port), &AtConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.ref_count(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_transports() {
        let registry = AtRegistry::new();
        let a = registry.get_instance(transport(), &AtConfig::default()).unwrap();
        let b = registry.get_instance(transport(), &AtConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_close_to_zero_removes() {
        let registry = AtRegistry::new();
        let port = transport();
        let first = registry.get_instance(Arc::clone(&port), &AtConfig::default()).unwrap();
        let _second = registry.get_instance(Arc::clone(&port), &AtConfig::default()).unwrap();

        assert_eq!(registry.close(&first), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.close(&first), 0);
        assert!(registry.is_empty());

        let fresh = registry.get_instance(port, &AtConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.ref_count(), 1);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let registry = AtRegistry::new();
        let port = transport();
        let handler = registry.get_instance(Arc::clone(&port), &AtConfig::default()).unwrap();

        assert_eq!(registry.close(&handler), 0);
        let replacement = registry.get_instance(port, &AtConfig::default()).unwrap();
        assert_eq!(registry.close(&handler), 0);
        assert_eq!(replacement.ref_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_manual_release_replaces_and_detaches() {
        let registry = AtRegistry::new();
        let port = transport();
        let stale = registry.get_instance(Arc::clone(&port), &AtConfig::default()).unwrap();
        let on_ring: Arc<dyn crate::UrcHandler> = Arc::new(|_: &mut crate::AtEngine| {});
        stale.set_urc_handler("RING", Some(&on_ring)).unwrap();

        assert_eq!(stale.dec_ref_count(), 0);
        assert!(registry.is_empty());
        assert!(registry.instances().is_empty());

        let fresh = registry.get_instance(port, &AtConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(stale.urc_handler_count(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_detaches_urc_handlers() {
        let registry = AtRegistry::new();
        let handler = registry.get_instance(transport(), &AtConfig::default()).unwrap();
        let on_ring: Arc<dyn crate::UrcHandler> = Arc::new(|_: &mut crate::AtEngine| {});
        handler.set_urc_handler("RING", Some(&on_ring)).unwrap();

        registry.close(&handler);
        assert_eq!(handler.urc_handler_count(), 0);
    }

    #[test]
    fn test_invalid_config_not_registered() {
        let registry = AtRegistry::new();
        let config = AtConfig::default().with_buffer_size(1);
        assert!(matches!(
            registry.get_instance(transport(), &config),
            Err(AtError::Config(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_setters() {
        let registry = AtRegistry::new();
        let a = registry.get_instance(transport(), &AtConfig::default()).unwrap();
        let b = registry.get_instance(transport(), &AtConfig::default()).unwrap();

        registry.set_debug_list(true);
        registry.set_at_timeout_list(Duration::from_millis(250), true);
        for handler in [a, b] {
            let at = handler.lock();
            assert!(at.debug_enabled());
            assert_eq!(at.at_timeout(), Duration::from_millis(250));
        }
    }
}
