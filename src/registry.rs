// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-local producer registry: rejects multiple local producers for
//! the same region name.
//!
//! Uses the same `DashMap` lock-free map construction `RuntimeConfig`
//! reaches for elsewhere in this stack, here holding an open-name set
//! instead of a QoS store.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::error::{FlexShmError, Result};

fn open_producers() -> &'static DashMap<String, ()> {
    static OPEN_PRODUCERS: OnceLock<DashMap<String, ()>> = OnceLock::new();
    OPEN_PRODUCERS.get_or_init(DashMap::new)
}

/// RAII guard for a registered producer name. Unregisters on drop, so a
/// producer that fails construction partway through never leaks its claim.
pub struct ProducerGuard {
    name: Arc<str>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        open_producers().remove(self.name.as_ref());
    }
}

/// Claim `name` for a producer in this process.
///
/// # Errors
///
/// Returns [`FlexShmError::NameInUse`] if a live [`ProducerGuard`] for
/// `name` already exists in this process.
pub fn register_producer(name: &str) -> Result<ProducerGuard> {
    if open_producers().insert(name.to_string(), ()).is_some() {
        return Err(FlexShmError::NameInUse(name.to_string()));
    }
    Ok(ProducerGuard { name: Arc::from(name) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_producer_for_same_name_is_rejected() {
        let _first = register_producer("/registry-test-a").unwrap();
        assert!(matches!(register_producer("/registry-test-a"), Err(FlexShmError::NameInUse(_))));
    }

    #[test]
    fn name_becomes_available_again_after_guard_drops() {
        {
            let _g = register_producer("/registry-test-b").unwrap();
        }
        assert!(register_producer("/registry-test-b").is_ok());
    }

    #[test]
    fn distinct_names_do_not_conflict() {
        let _a = register_producer("/registry-test-c1").unwrap();
        let _b = register_producer("/registry-test-c2").unwrap();
    }
}
