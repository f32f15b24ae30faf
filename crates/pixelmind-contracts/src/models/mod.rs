mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_IMAGE_MODEL, IMAGE_PROMPT_CAPABILITY};
pub use selectors::{ModelSelection, ModelSelector};
