//! Method descriptors and the interface facade: turning a named, typed
//! remote call into a client-side proxy invocation and a server-side
//! handler wrapper, without walking anything at runtime. An interface is
//! just a `&'static [MethodSpec]` built once by its constructor function.

use std::sync::Arc;

use async_trait::async_trait;
use loadbus_wire::{error_codes, AgentId, MsgId, ProtocolError};
use serde_json::Value;

use crate::kind::{FieldSpec, Kind, ObjectDescriptor};

/// Context handed to a handler for one inbound call: who sent it and under
/// which message-id, so the handler (or code it calls into) can address a
/// reply without re-deriving routing state.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub src_agent_id: AgentId,
    pub src_msg_id: MsgId,
}

#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub name: &'static str,
    pub args: Vec<FieldSpec>,
    pub returns: Kind,
}

impl MethodSpec {
    #[must_use]
    pub fn new(name: &'static str, args: Vec<FieldSpec>, returns: Kind) -> Self {
        Self {
            name,
            args,
            returns,
        }
    }

    fn args_descriptor(&self) -> ObjectDescriptor {
        ObjectDescriptor {
            name: self.name,
            fields: self.args.clone(),
        }
    }

    pub fn check_args(&self, args: &Value) -> Result<(), ProtocolError> {
        Kind::Object(self.args_descriptor()).check(args)
    }

    pub fn check_return(&self, value: &Value) -> Result<(), ProtocolError> {
        self.returns.check(value)
    }
}

/// Remote-call failure: either the peer replied with an error frame, or the
/// reply didn't match the method's declared return kind.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{message} (code {code})")]
    Remote { code: u16, message: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl RpcError {
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RpcError::Remote { code, .. } => *code,
            RpcError::Protocol(e) => e.code(),
        }
    }
}

/// The transport a method-proxy sends commands over: allocate the caller's
/// own agent-id view and perform one command/response round trip. Both the
/// broker's local-agent loopback and the client runtime's socket connection
/// implement this the same way from the facade's point of view.
#[async_trait]
pub trait CommandSink: Send + Sync {
    fn agent_id(&self) -> AgentId;

    async fn call(&self, target: AgentId, cmd: &str, args: Value) -> Result<Value, (u16, String)>;
}

/// Synthesizes the method-proxy call described in the method facade:
/// validate arguments, send, await the reply, validate the result.
pub async fn invoke(
    sink: &dyn CommandSink,
    target: AgentId,
    spec: &MethodSpec,
    args: Value,
) -> Result<Value, RpcError> {
    spec.check_args(&args)?;
    match sink.call(target, spec.name, args).await {
        Ok(result) => {
            spec.check_return(&result)?;
            Ok(result)
        }
        Err((code, message)) => Err(RpcError::Remote { code, message }),
    }
}

/// The server side of a method: implemented once per local or remote
/// handler object and driven by [`dispatch`].
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, ProtocolError>;
}

/// The `@method-impl` wrapper: deserialize-checked args in, handler body,
/// serialize-checked result out. `ProtocolError`s raised by the handler
/// propagate to the caller unchanged; everything else is the handler's
/// business (it should not happen if handlers stick to `ProtocolError`).
pub async fn dispatch<H: MethodHandler + ?Sized>(
    spec: &MethodSpec,
    handler: &H,
    ctx: CallContext,
    args: Value,
) -> Result<Value, ProtocolError> {
    spec.check_args(&args)?;
    let result = handler.handle(ctx, args).await?;
    spec.check_return(&result)?;
    Ok(result)
}

/// An interface is an ordered, static list of method descriptors, plus the
/// concrete typed client-side proxy a [`Interface::proxy`] call hands back
/// for it. Built once by a constructor function rather than discovered by
/// walking an object's attributes at runtime.
pub trait Interface {
    /// The typed proxy returned by `Client::proxy::<Self>(target)`: one
    /// async method per entry in [`Interface::methods`], each wrapping
    /// [`invoke`] so argument/result validation stays in one place.
    type Proxy;

    fn methods() -> &'static [MethodSpec];

    fn find(name: &str) -> Option<&'static MethodSpec> {
        Self::methods().iter().find(|m| m.name == name)
    }

    /// Builds this interface's proxy over `sink`, addressed at `target`.
    fn proxy(sink: Arc<dyn CommandSink>, target: AgentId) -> Self::Proxy;
}

/// Maps a numeric error-code/message pair back to the richer
/// [`ProtocolError`] enum, for code paths (dispatch shells) that need to
/// re-raise a remote failure locally rather than keep it as a bare pair.
#[must_use]
pub fn protocol_error_from_code(code: u16, message: String) -> ProtocolError {
    match code {
        error_codes::COMMAND_NOT_FOUND => ProtocolError::CommandNotFound(message),
        error_codes::MESSAGE_FORMAT => ProtocolError::MessageFormat(message),
        error_codes::INVALID_DATA => ProtocolError::InvalidData(message),
        error_codes::INVALID_STATE => ProtocolError::InvalidState(message),
        error_codes::ACCESS_DENIED => ProtocolError::AccessDenied,
        error_codes::CONNECTION_ERROR => ProtocolError::ConnectionError(message),
        _ => ProtocolError::InternalError(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct EchoSink {
        agent_id: AgentId,
        last_call: Mutex<Option<(AgentId, String, Value)>>,
        reply: Result<Value, (u16, String)>,
    }

    #[async_trait]
    impl CommandSink for EchoSink {
        fn agent_id(&self) -> AgentId {
            self.agent_id
        }

        async fn call(
            &self,
            target: AgentId,
            cmd: &str,
            args: Value,
        ) -> Result<Value, (u16, String)> {
            *self.last_call.lock().unwrap() = Some((target, cmd.to_owned(), args));
            self.reply.clone()
        }
    }

    fn hello_spec() -> MethodSpec {
        MethodSpec::new(
            "hello",
            vec![
                FieldSpec::required("agentType", Kind::String),
                FieldSpec::required("agentUuid", Kind::String),
            ],
            Kind::Object(ObjectDescriptor {
                name: "HelloResponse",
                fields: vec![FieldSpec::required("agentId", Kind::Int)],
            }),
        )
    }

    #[tokio::test]
    async fn invoke_rejects_args_missing_a_required_field() {
        let sink = EchoSink {
            agent_id: AgentId(8),
            last_call: Mutex::new(None),
            reply: Ok(json!({"agentId": 8})),
        };
        let spec = hello_spec();
        let err = invoke(&sink, AgentId::ROOT, &spec, json!({"agentType": "cli"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ProtocolError::MessageFormat(_))));
    }

    #[tokio::test]
    async fn invoke_round_trips_a_well_formed_call() {
        let sink = EchoSink {
            agent_id: AgentId(8),
            last_call: Mutex::new(None),
            reply: Ok(json!({"agentId": 8})),
        };
        let spec = hello_spec();
        let result = invoke(
            &sink,
            AgentId::ROOT,
            &spec,
            json!({"agentType": "cli", "agentUuid": "uuid-A"}),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"agentId": 8}));
    }

    #[tokio::test]
    async fn invoke_surfaces_a_remote_error_with_its_code() {
        let sink = EchoSink {
            agent_id: AgentId(8),
            last_call: Mutex::new(None),
            reply: Err((201, "Access is denied".to_owned())),
        };
        let spec = hello_spec();
        let err = invoke(
            &sink,
            AgentId::ROOT,
            &spec,
            json!({"agentType": "cli", "agentUuid": "uuid-A"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), 201);
    }

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, _ctx: CallContext, args: Value) -> Result<Value, ProtocolError> {
            let agent_type = args["agentType"].as_str().unwrap_or_default();
            Ok(json!({"agentId": agent_type.len() as i64}))
        }
    }

    #[tokio::test]
    async fn dispatch_validates_args_and_result_around_the_handler() {
        let spec = hello_spec();
        let handler = EchoHandler;
        let ctx = CallContext {
            src_agent_id: AgentId(8),
            src_msg_id: MsgId(1),
        };
        let result = dispatch(
            &spec,
            &handler,
            ctx,
            json!({"agentType": "cli", "agentUuid": "uuid-A"}),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"agentId": 3}));
    }
}
