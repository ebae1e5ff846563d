//! Local model runtime discovery.
//!
//! The tokenizer + language-model binding ships separately and registers
//! through the plugin layer; the core only carries the seam. A bare build
//! has no runtime and relies on a remote engine.

use crate::orchestrator::RuntimeLoader;

pub fn discover() -> Option<RuntimeLoader> {
    None
}
