//! Cache key component validation

use crate::{Error, Result};

/// Reject key components that could escape or collide inside the cache tree
pub fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", kind)));
    }
    if value == "." || value == ".." {
        return Err(Error::InvalidInput(format!("{} must not be '{}'", kind, value)));
    }
    if value.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "{} must not start with '.': {}",
            kind, value
        )));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidInput(format!(
            "{} must not contain path separators: {}",
            kind, value
        )));
    }
    Ok(())
}

pub fn validate_key(stage: &str, config_slug: &str, item_key: &str) -> Result<()> {
    validate_component("stage", stage)?;
    validate_component("config slug", config_slug)?;
    validate_component("item key", item_key)?;
    Ok(())
}

/// Index key for one entry: `stage/slug/item`
pub fn index_key(stage: &str, config_slug: &str, item_key: &str) -> String {
    format!("{}/{}/{}", stage, config_slug, item_key)
}
