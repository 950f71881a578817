//! Release bundles compiled into the binary.

use crate::bundle::ReleaseBundle;

/// Fast-moving release channel
pub const RAPID: &str = "rapid";

/// Conservative release channel
pub const STABLE: &str = "stable";

/// Deployment name declared by the built-in bundles
pub const DEFAULT_TARGET: &str = "web";

macro_rules! bundle_files {
    ($channel:literal: $($file:literal),+ $(,)?) => {
        [$(($file, include_bytes!(concat!("../bundles/", $channel, "/", $file)).as_slice())),+]
    };
}

/// The built-in `rapid` and `stable` bundles
pub fn builtin_bundles() -> Vec<ReleaseBundle> {
    vec![
        ReleaseBundle::embedded(
            RAPID,
            DEFAULT_TARGET,
            bundle_files!("rapid": "kustomization.yaml", "deployment.yaml", "service.yaml"),
        ),
        ReleaseBundle::embedded(
            STABLE,
            DEFAULT_TARGET,
            bundle_files!("stable": "kustomization.yaml", "deployment.yaml", "service.yaml"),
        ),
    ]
}
