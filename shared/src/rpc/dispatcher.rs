//! Resolves and invokes remote methods with ownership-based authorization.
//!
//! Resolution filters a type's invocables by name, then by structural match
//! of the supplied argument kinds against each candidate's parameter list.
//! Exactly one candidate must survive: zero is MethodNotFound, two or more is
//! AmbiguousMatch. Resolution never picks "the first one".

use log::warn;

pub use crate::registry::{InvocationContext, InvokeDirection};

use crate::{
    registry::InvocableDescriptor,
    replication::object::{ObjectMeta, Replicated},
    rpc::{
        error::RpcError,
        invocation::{InvocationOutcome, NetworkInvocation, NetworkInvocationResult},
        value::{ArgKind, ArgValue},
    },
    types::NetworkId,
};

/// Select the single invocable matching `method` and the argument kinds.
pub fn resolve<'a>(
    invocables: &'a [InvocableDescriptor],
    method: &str,
    args: &[ArgValue],
) -> Result<&'a InvocableDescriptor, RpcError> {
    let kinds: Vec<ArgKind> = args.iter().map(ArgValue::kind).collect();
    let mut matched: Option<&'a InvocableDescriptor> = None;
    let mut count = 0usize;
    for descriptor in invocables {
        if descriptor.name == method && structurally_matches(descriptor, &kinds) {
            count += 1;
            if matched.is_none() {
                matched = Some(descriptor);
            }
        }
    }
    match count {
        0 => Err(RpcError::MethodNotFound {
            method: method.to_string(),
        }),
        1 => Ok(matched.unwrap_or_else(|| unreachable!())),
        _ => Err(RpcError::AmbiguousMatch {
            method: method.to_string(),
            count,
        }),
    }
}

fn structurally_matches(descriptor: &InvocableDescriptor, kinds: &[ArgKind]) -> bool {
    if kinds.len() < descriptor.required || kinds.len() > descriptor.params.len() {
        return false;
    }
    kinds
        .iter()
        .zip(descriptor.params.iter())
        // A Null argument is compatible with any declared parameter
        .all(|(supplied, declared)| supplied == declared || *supplied == ArgKind::Null)
}

/// Check direction and (for secure methods) ownership before execution.
pub fn authorize(
    descriptor: &InvocableDescriptor,
    context: &InvocationContext,
    meta: &ObjectMeta,
    target: NetworkId,
) -> Result<(), RpcError> {
    match descriptor.direction {
        InvokeDirection::ServerOnly if !context.caller_is_server => {
            return Err(RpcError::WrongDirection {
                method: descriptor.name.to_string(),
                required: "server",
            });
        }
        InvokeDirection::ClientOnly if context.caller_is_server => {
            return Err(RpcError::WrongDirection {
                method: descriptor.name.to_string(),
                required: "client",
            });
        }
        _ => {}
    }
    if descriptor.secure && !meta.authorizes(context.caller, context.caller_is_server) {
        return Err(RpcError::OwnershipViolation {
            method: descriptor.name.to_string(),
            caller: context.caller,
            target,
        });
    }
    Ok(())
}

/// Run a resolved, authorized invocable, defaulting unmatched optional
/// parameters to Null. Handler failures become structured outcomes; the
/// dispatcher itself never crashes on one.
pub fn execute(
    descriptor: &InvocableDescriptor,
    object: &mut dyn Replicated,
    context: &InvocationContext,
    args: &[ArgValue],
) -> InvocationOutcome {
    let padded: Vec<ArgValue>;
    let args = if args.len() < descriptor.params.len() {
        padded = args
            .iter()
            .cloned()
            .chain(std::iter::repeat(ArgValue::Null))
            .take(descriptor.params.len())
            .collect();
        &padded[..]
    } else {
        args
    };
    match (descriptor.handler)(object, context, args) {
        Ok(value) => InvocationOutcome::Success(value),
        Err(error) => InvocationOutcome::Failure(error.to_string()),
    }
}

/// The full receive-side path for one invocation against one target object:
/// resolve, authorize, execute. Returns the result packet body to send back,
/// or None for fire-and-forget calls (whose failures are logged locally).
pub fn dispatch_invocation(
    invocables: &[InvocableDescriptor],
    object: &mut dyn Replicated,
    context: &InvocationContext,
    target: NetworkId,
    invocation: &NetworkInvocation,
) -> Option<NetworkInvocationResult> {
    let outcome = match resolve(invocables, &invocation.method, &invocation.args) {
        Ok(descriptor) => match authorize(descriptor, context, object.meta(), target) {
            Ok(()) => execute(descriptor, object, context, &invocation.args),
            Err(error) => InvocationOutcome::Failure(error.to_string()),
        },
        Err(error) => InvocationOutcome::Failure(error.to_string()),
    };

    if invocation.ignore_result {
        if let InvocationOutcome::Failure(message) = &outcome {
            warn!(
                "Fire-and-forget invocation '{}' on object {target} failed: {message}",
                invocation.method
            );
        }
        return None;
    }
    match invocation.callback_id {
        Some(callback_id) => Some(NetworkInvocationResult {
            callback_id,
            outcome,
        }),
        None => {
            if let InvocationOutcome::Failure(message) = &outcome {
                warn!(
                    "Invocation '{}' on object {target} failed with no callback: {message}",
                    invocation.method
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::{InvocableDescriptor, TypeRegistry},
        replication::object::{ObjectMeta, OwnershipMode, Replicated, ReplicatedType},
        replication::error::ReplicationError,
        types::TypeTag,
    };

    #[derive(Default)]
    struct Turret {
        meta: ObjectMeta,
        heading: f32,
    }

    impl Replicated for Turret {
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
        fn type_tag(&self) -> TypeTag {
            Self::TYPE_TAG
        }
        fn sync_var_get(&self, field: &str) -> Option<ArgValue> {
            (field == "heading").then_some(ArgValue::F32(self.heading))
        }
        fn sync_var_set(&mut self, field: &str, value: &ArgValue) -> Result<(), ReplicationError> {
            if field != "heading" {
                return Err(ReplicationError::UnknownField {
                    network_id: self.meta.network_id,
                    field: field.to_string(),
                });
            }
            self.heading = value.as_f32().unwrap_or(0.0);
            Ok(())
        }
    }

    fn aim_f32(
        object: &mut dyn Replicated,
        _: &InvocationContext,
        args: &[ArgValue],
    ) -> Result<ArgValue, RpcError> {
        let _ = (object, args);
        Ok(ArgValue::Str("aim-f32".into()))
    }

    fn aim_str(
        _: &mut dyn Replicated,
        _: &InvocationContext,
        _: &[ArgValue],
    ) -> Result<ArgValue, RpcError> {
        Ok(ArgValue::Str("aim-str".into()))
    }

    fn aim_str_twin(
        _: &mut dyn Replicated,
        _: &InvocationContext,
        _: &[ArgValue],
    ) -> Result<ArgValue, RpcError> {
        Ok(ArgValue::Str("aim-str-twin".into()))
    }

    fn fail_always(
        _: &mut dyn Replicated,
        _: &InvocationContext,
        _: &[ArgValue],
    ) -> Result<ArgValue, RpcError> {
        Err(RpcError::HandlerFailed("kaboom".into()))
    }

    const TURRET_INVOCABLES: &[InvocableDescriptor] = &[
        InvocableDescriptor {
            name: "aim",
            direction: InvokeDirection::Either,
            secure: false,
            params: &[ArgKind::F32],
            required: 1,
            handler: aim_f32,
        },
        InvocableDescriptor {
            name: "aim",
            direction: InvokeDirection::Either,
            secure: false,
            params: &[ArgKind::Str],
            required: 1,
            handler: aim_str,
        },
        InvocableDescriptor {
            name: "aim_at_named",
            direction: InvokeDirection::Either,
            secure: false,
            params: &[ArgKind::Str],
            required: 1,
            handler: aim_str,
        },
        InvocableDescriptor {
            name: "aim_at_named",
            direction: InvokeDirection::Either,
            secure: false,
            params: &[ArgKind::Str],
            required: 1,
            handler: aim_str_twin,
        },
        InvocableDescriptor {
            name: "explode",
            direction: InvokeDirection::ServerOnly,
            secure: false,
            params: &[],
            required: 0,
            handler: fail_always,
        },
        InvocableDescriptor {
            name: "move_to",
            direction: InvokeDirection::Either,
            secure: true,
            params: &[ArgKind::F32, ArgKind::F32],
            required: 1,
            handler: aim_f32,
        },
    ];

    impl ReplicatedType for Turret {
        const TYPE_TAG: TypeTag = 11;
        const TYPE_NAME: &'static str = "Turret";
        fn list_invocables() -> &'static [InvocableDescriptor] {
            TURRET_INVOCABLES
        }
    }

    fn client_context(caller: i32) -> InvocationContext {
        InvocationContext {
            caller,
            caller_is_server: false,
        }
    }

    #[test]
    fn resolves_by_argument_kind() {
        let by_float = resolve(TURRET_INVOCABLES, "aim", &[ArgValue::F32(1.0)]).expect("resolves");
        assert_eq!(by_float.params, &[ArgKind::F32]);
        let by_str =
            resolve(TURRET_INVOCABLES, "aim", &[ArgValue::Str("north".into())]).expect("resolves");
        assert_eq!(by_str.params, &[ArgKind::Str]);
    }

    #[test]
    fn resolution_is_deterministic() {
        for _ in 0..10 {
            let descriptor =
                resolve(TURRET_INVOCABLES, "aim", &[ArgValue::F32(0.5)]).expect("resolves");
            assert_eq!(descriptor.params, &[ArgKind::F32]);
        }
    }

    #[test]
    fn ambiguous_match_fails_rather_than_picking_first() {
        let error = resolve(
            TURRET_INVOCABLES,
            "aim_at_named",
            &[ArgValue::Str("east".into())],
        )
        .expect_err("must be ambiguous");
        assert!(matches!(error, RpcError::AmbiguousMatch { count: 2, .. }));
    }

    #[test]
    fn null_argument_is_ambiguous_across_overloads() {
        // Null matches both the F32 and Str overloads equally
        let error =
            resolve(TURRET_INVOCABLES, "aim", &[ArgValue::Null]).expect_err("must be ambiguous");
        assert!(matches!(error, RpcError::AmbiguousMatch { .. }));
    }

    #[test]
    fn unknown_method_is_not_found() {
        let error = resolve(TURRET_INVOCABLES, "teleport", &[]).expect_err("must fail");
        assert!(matches!(error, RpcError::MethodNotFound { .. }));
    }

    #[test]
    fn optional_parameters_may_be_omitted() {
        let descriptor =
            resolve(TURRET_INVOCABLES, "move_to", &[ArgValue::F32(3.0)]).expect("resolves");
        assert_eq!(descriptor.params.len(), 2);
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let descriptor = resolve(TURRET_INVOCABLES, "explode", &[]).expect("resolves");
        let meta = ObjectMeta::default();
        let error = authorize(descriptor, &client_context(4), &meta, 1).expect_err("must fail");
        assert!(matches!(error, RpcError::WrongDirection { .. }));
    }

    #[test]
    fn secure_method_requires_ownership() {
        let descriptor =
            resolve(TURRET_INVOCABLES, "move_to", &[ArgValue::F32(0.0)]).expect("resolves");
        let meta = ObjectMeta {
            owner: 1,
            ownership: OwnershipMode::Client,
            ..ObjectMeta::default()
        };
        // Non-owner is rejected regardless of argument values
        let error = authorize(descriptor, &client_context(2), &meta, 5).expect_err("must fail");
        assert!(matches!(error, RpcError::OwnershipViolation { caller: 2, .. }));
        // Owner passes
        authorize(descriptor, &client_context(1), &meta, 5).expect("owner is authorized");
    }

    #[test]
    fn handler_failure_becomes_structured_outcome() {
        let registry = TypeRegistry::new();
        registry.register::<Turret>().expect("registers");
        let mut turret = Turret::default();
        let context = InvocationContext {
            caller: 0,
            caller_is_server: true,
        };
        let invocation = NetworkInvocation {
            callback_id: Some(1),
            method: "explode".into(),
            args: vec![],
            ignore_result: false,
        };
        let result =
            dispatch_invocation(TURRET_INVOCABLES, &mut turret, &context, 1, &invocation)
                .expect("result expected");
        assert_eq!(result.callback_id, 1);
        assert!(matches!(result.outcome, InvocationOutcome::Failure(_)));
    }

    #[test]
    fn ignore_result_suppresses_reply() {
        let mut turret = Turret::default();
        let context = InvocationContext {
            caller: 0,
            caller_is_server: true,
        };
        let invocation = NetworkInvocation {
            callback_id: Some(1),
            method: "explode".into(),
            args: vec![],
            ignore_result: true,
        };
        assert!(
            dispatch_invocation(TURRET_INVOCABLES, &mut turret, &context, 1, &invocation).is_none()
        );
    }
}
