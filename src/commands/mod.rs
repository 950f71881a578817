// Release bundle inspection
pub mod bundles;
pub mod compile;

// BundleDeployment lifecycle
pub mod objects;
pub mod reconcile;
