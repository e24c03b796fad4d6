#![forbid(unsafe_code)]

//! Container configuration.

/// Settings for one [`Container`](crate::Container).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Label attached to the `transaction` span and log events, to tell
    /// containers apart when several are bridged.
    /// Default: `"default"`.
    pub label: String,

    /// Upper bound on propagation passes after one commit. A pass re-runs
    /// the stale computations reachable from the pending changes; a
    /// computation that keeps invalidating upstream work hits this bound
    /// and fails with [`Error::PropagationLimit`](crate::Error::PropagationLimit).
    /// Default: 100.
    pub max_propagation_passes: usize,

    /// Deliver patches applied through
    /// [`Container::present_patch`](crate::Container::present_patch) outside
    /// a transaction to migration listeners. Off by default so two bridged
    /// containers do not echo each other's patches.
    /// Default: false.
    pub deliver_presented_patches: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            label: "default".to_owned(),
            max_propagation_passes: 100,
            deliver_presented_patches: false,
        }
    }
}

impl ContainerConfig {
    /// Set the container label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the propagation pass bound. Zero is raised to one.
    #[must_use]
    pub fn with_max_propagation_passes(mut self, passes: usize) -> Self {
        self.max_propagation_passes = passes.max(1);
        self
    }

    /// Toggle delivery of presented patches to migration listeners.
    #[must_use]
    pub fn with_deliver_presented_patches(mut self, enabled: bool) -> Self {
        self.deliver_presented_patches = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.label, "default");
        assert_eq!(config.max_propagation_passes, 100);
        assert!(!config.deliver_presented_patches);
    }

    #[test]
    fn builders_override() {
        let config = ContainerConfig::default()
            .with_label("server")
            .with_max_propagation_passes(0)
            .with_deliver_presented_patches(true);
        assert_eq!(config.label, "server");
        assert_eq!(config.max_propagation_passes, 1);
        assert!(config.deliver_presented_patches);
    }
}
