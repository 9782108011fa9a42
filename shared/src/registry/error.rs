use thiserror::Error;

use crate::types::{CustomId, TypeTag};

/// Errors raised while building the type registry. All of these indicate a
/// startup-time configuration mistake rather than a wire-level problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Type tag {tag} is already registered to '{existing}' (attempted: '{new}')")]
    DuplicateTag {
        tag: TypeTag,
        existing: &'static str,
        new: &'static str,
    },

    #[error("Custom packet id {custom_id} is already registered")]
    DuplicateCustomId { custom_id: CustomId },
}
