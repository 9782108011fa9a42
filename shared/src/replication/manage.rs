use serde::{Deserialize, Serialize};

use crate::{
    replication::object::{ObjectMeta, OwnershipMode, VisibilityMode},
    types::{NetworkId, SessionId, TypeTag},
};

/// Body of an ObjectManage packet: the replicated-object lifecycle protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectManage {
    /// Announce a new object. The sender picks the network id; `extra`
    /// carries the type-specific payload.
    Create {
        network_id: NetworkId,
        type_tag: TypeTag,
        owner: SessionId,
        ownership: OwnershipMode,
        visibility: VisibilityMode,
        active: bool,
        extra: Vec<u8>,
    },
    /// The receiver constructed the object; the sender may now treat it as
    /// live on that peer.
    ConfirmCreate { network_id: NetworkId },
    /// An object with that id and type is already live on the receiver.
    AlreadyExists { network_id: NetworkId },
    Destroy { network_id: NetworkId },
    ConfirmDestroy { network_id: NetworkId },
    Modify {
        network_id: NetworkId,
        change: ObjectChange,
    },
    ConfirmModify { network_id: NetworkId },
}

/// A single mutation applied by a Modify action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectChange {
    Owner(SessionId),
    Ownership(OwnershipMode),
    Visibility(VisibilityMode),
    NetworkId(NetworkId),
    Active(bool),
}

impl ObjectManage {
    /// The Create action announcing an existing object.
    pub fn create_for(meta: &ObjectMeta, type_tag: TypeTag, extra: Vec<u8>) -> Self {
        ObjectManage::Create {
            network_id: meta.network_id,
            type_tag,
            owner: meta.owner,
            ownership: meta.ownership,
            visibility: meta.visibility,
            active: meta.active,
            extra,
        }
    }

    pub fn network_id(&self) -> NetworkId {
        match self {
            ObjectManage::Create { network_id, .. }
            | ObjectManage::ConfirmCreate { network_id }
            | ObjectManage::AlreadyExists { network_id }
            | ObjectManage::Destroy { network_id }
            | ObjectManage::ConfirmDestroy { network_id }
            | ObjectManage::Modify { network_id, .. }
            | ObjectManage::ConfirmModify { network_id } => *network_id,
        }
    }
}
