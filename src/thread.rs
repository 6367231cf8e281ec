//! Consumer thread configuration.
//!
//! Each processor gets a dedicated, named OS thread; latency-sensitive
//! deployments can additionally pin consumers to a core.

use core_affinity::CoreId;
use std::thread::JoinHandle;

/// Naming and affinity settings for the threads an
/// [`EventExchange`](crate::EventExchange) spawns.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    affinity: Option<CoreId>,
    name_prefix: String,
    next_id: usize,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self {
            affinity: None,
            name_prefix: "event-processor".to_owned(),
            next_id: 0,
        }
    }

    /// Pin spawned consumer threads to the given CPU core.
    ///
    /// # Panics
    /// Panics if the core id is not present on this machine.
    pub fn pin_at_core(mut self, core_id: usize) -> Self {
        validate_core_id(core_id);
        self.affinity = Some(CoreId { id: core_id });
        self
    }

    /// Prefix for spawned thread names; threads are numbered `prefix-0`,
    /// `prefix-1`, ...
    pub fn name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    fn next_name(&mut self) -> String {
        let name = format!("{}-{}", self.name_prefix, self.next_id);
        self.next_id += 1;
        name
    }

    /// Spawn a named (and optionally pinned) thread running `f`.
    pub(crate) fn spawn<F>(&mut self, f: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let affinity = self.affinity;
        std::thread::Builder::new()
            .name(self.next_name())
            .spawn(move || {
                if let Some(core) = affinity {
                    core_affinity::set_for_current(core);
                }
                f()
            })
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_core_id(core_id: usize) {
    let available = core_affinity::get_core_ids().unwrap_or_default();
    assert!(
        available.iter().any(|core| core.id == core_id),
        "core {core_id} is not available on this machine"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_names_are_numbered() {
        let mut context = ThreadContext::new().name_prefix("consumer");
        assert_eq!(context.next_name(), "consumer-0");
        assert_eq!(context.next_name(), "consumer-1");
    }

    #[test]
    fn test_spawned_thread_carries_the_name() {
        let mut context = ThreadContext::new();
        let handle = context
            .spawn(|| {
                assert!(std::thread::current()
                    .name()
                    .unwrap()
                    .starts_with("event-processor-"));
            })
            .unwrap();
        handle.join().unwrap();
    }
}
