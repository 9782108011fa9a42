pub mod directory;
pub mod error;
pub mod manage;
pub mod object;
pub mod sync_var;

pub use directory::ObjectDirectory;
pub use error::ReplicationError;
pub use manage::{ObjectChange, ObjectManage};
pub use object::{ObjectMeta, OwnershipMode, Replicated, ReplicatedType, VisibilityMode};
pub use sync_var::{SyncVarEntry, SyncVarReplicator, SyncVarUpdate, WriteDirection};
