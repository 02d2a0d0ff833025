pub mod metrics;
pub mod patch;

mod error;

pub use error::*;

/// Field manager name used on every server-side-apply patch this controller
/// issues, so concurrent writers (other controllers, humans) can tell which
/// fields we own.
pub(crate) const MANAGER_NAME: &str = "workflow-controller";

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}
