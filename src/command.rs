//! Command endpoint - binds request/response schema pair to handler
//!
//! ```
//! # use matd::command::CommandEndpoint;
//! # use matd::schema::{Field, Schema, Value};
//! let move_to_level = CommandEndpoint::new(
//!     0x00,
//!     "MoveToLevel",
//!     Schema::structure(vec![
//!         Field::new(0, "level", Schema::U8),
//!         Field::new(1, "transition_time", Schema::nullable(Schema::U16)),
//!     ]),
//!     |req: Value, _ctx| async move {
//!         log::info!("level -> {:?}", req.field(0));
//!         Ok(Value::structure([]))
//!     },
//! );
//! assert_eq!(move_to_level.response_id, None);
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::error::{Error, Result};
use crate::messages::StatusCode;
use crate::schema::{self, Schema, Value};
use crate::session::InvocationContext;
use crate::tlv::DEFAULT_MAX_DEPTH;

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
type Handler = Box<dyn Fn(Value, InvocationContext) -> HandlerFuture + Send + Sync>;

pub struct CommandEndpoint {
    pub invoke_id: u32,
    /// id of response command; None for commands answered by status only
    pub response_id: Option<u32>,
    pub name: &'static str,
    pub request: Schema,
    pub response: Schema,
    handler: Handler,
    reentrant: bool,
    /// held for the whole invocation of non reentrant endpoint
    busy: tokio::sync::Mutex<()>,
}

/// Result of single invocation
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeOutcome {
    pub status: StatusCode,
    pub cluster_status: Option<u8>,
    pub response_id: Option<u32>,
    /// anonymous tlv encoded response (empty for status only answer)
    pub data: Vec<u8>,
}

impl InvokeOutcome {
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            cluster_status: None,
            response_id: None,
            data: Vec::new(),
        }
    }
}

impl std::fmt::Debug for CommandEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEndpoint")
            .field("invoke_id", &self.invoke_id)
            .field("response_id", &self.response_id)
            .field("name", &self.name)
            .field("reentrant", &self.reentrant)
            .finish()
    }
}

impl CommandEndpoint {
    pub fn new<F, Fut>(invoke_id: u32, name: &'static str, request: Schema, handler: F) -> Self
    where
        F: Fn(Value, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            invoke_id,
            response_id: None,
            name,
            request,
            response: Schema::empty(),
            handler: Box::new(move |req, ctx| Box::pin(handler(req, ctx))),
            reentrant: false,
            busy: tokio::sync::Mutex::new(()),
        }
    }

    /// Answer with response command instead of plain status
    pub fn with_response(mut self, response_id: u32, response: Schema) -> Self {
        self.response_id = Some(response_id);
        self.response = response;
        self
    }

    /// Allow overlapping invocations of this endpoint
    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    pub fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    pub async fn invoke(&self, ctx: &InvocationContext, raw: &[u8]) -> Result<InvokeOutcome> {
        self.invoke_with_depth(ctx, raw, DEFAULT_MAX_DEPTH).await
    }

    /// Decode arguments, run handler, encode its result.
    ///
    /// Bad arguments and handler failures become status codes. Err is returned only when
    /// handler produced value not matching response schema.
    pub async fn invoke_with_depth(
        &self,
        ctx: &InvocationContext,
        raw: &[u8],
        max_depth: usize,
    ) -> Result<InvokeOutcome> {
        let request = match schema::decode_with_depth(&self.request, raw, max_depth) {
            Ok(r) => r,
            Err(e) if e.is_input_error() => {
                log::debug!(
                    "{} ({:#x}) exch:{} rejected arguments {}: {}",
                    self.name,
                    self.invoke_id,
                    ctx.exchange_id,
                    hex::encode(raw),
                    e
                );
                return Ok(InvokeOutcome::status(StatusCode::InvalidCommand));
            }
            Err(e) => return Err(e),
        };

        let result = {
            let _guard = if self.reentrant {
                None
            } else {
                Some(self.busy.lock().await)
            };
            (self.handler)(request, ctx.clone()).await
        };

        match result {
            Ok(value) => {
                let data = schema::encode(&self.response, &value).map_err(|e| {
                    log::error!(
                        "{} ({:#x}) returned value not matching response schema: {}",
                        self.name,
                        self.invoke_id,
                        e
                    );
                    match e {
                        Error::EncodingInvariantViolation(m) => Error::EncodingInvariantViolation(
                            format!("{} ({:#x}): {}", self.name, self.invoke_id, m),
                        ),
                        other => other,
                    }
                })?;
                Ok(InvokeOutcome {
                    status: StatusCode::Success,
                    cluster_status: None,
                    response_id: self.response_id,
                    data: if self.response_id.is_some() { data } else { Vec::new() },
                })
            }
            Err(e) => {
                let (status, cluster_status) = failure_status(&e);
                log::debug!(
                    "{} ({:#x}) exch:{} failed with {}: {:?}",
                    self.name,
                    self.invoke_id,
                    ctx.exchange_id,
                    status,
                    e
                );
                Ok(InvokeOutcome {
                    status,
                    cluster_status,
                    response_id: None,
                    data: Vec::new(),
                })
            }
        }
    }
}

fn failure_status(err: &anyhow::Error) -> (StatusCode, Option<u8>) {
    match err.downcast_ref::<Error>() {
        Some(Error::HandlerFailure {
            status,
            cluster_status,
        }) => (status.unwrap_or(StatusCode::Failure), *cluster_status),
        Some(Error::ConstraintViolation(_)) => (StatusCode::ConstraintError, None),
        _ => (StatusCode::Failure, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::session::{AuthMode, SessionIdentity};
    use crate::tlv::TlvBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> InvocationContext {
        InvocationContext::new(SessionIdentity::new(1, 1, AuthMode::Case), 0x1122, 1, 7)
    }

    fn add_request() -> Schema {
        Schema::structure(vec![
            Field::new(0, "a", Schema::U16),
            Field::new(1, "b", Schema::U16),
        ])
    }

    fn add_response() -> Schema {
        Schema::structure(vec![Field::new(0, "sum", Schema::U32)])
    }

    fn adder() -> CommandEndpoint {
        CommandEndpoint::new(1, "Add", add_request(), |req: Value, _ctx| async move {
            let a = req.field(0).and_then(Value::as_u64).unwrap_or(0);
            let b = req.field(1).and_then(Value::as_u64).unwrap_or(0);
            if a == 0 && b == 0 {
                return Err(Error::status(StatusCode::ConstraintError).into());
            }
            if a == 1 {
                return Err(Error::cluster_status(0x42).into());
            }
            if a == 2 {
                anyhow::bail!("storage not available");
            }
            Ok(Value::structure([(0, Value::UInt(a + b))]))
        })
        .with_response(2, add_response())
    }

    fn args(a: u64, b: u64) -> Vec<u8> {
        schema::encode(
            &add_request(),
            &Value::structure([(0, Value::UInt(a)), (1, Value::UInt(b))]),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn success_encodes_response() {
        let out = adder().invoke(&ctx(), &args(40, 2)).await.unwrap();
        assert_eq!(out.status, StatusCode::Success);
        assert_eq!(out.response_id, Some(2));
        assert_eq!(
            schema::decode(&add_response(), &out.data).unwrap(),
            Value::structure([(0, Value::UInt(42))])
        );
    }

    #[tokio::test]
    async fn handler_failures_map_to_status() {
        let ep = adder();
        let out = ep.invoke(&ctx(), &args(0, 0)).await.unwrap();
        assert_eq!(out, InvokeOutcome::status(StatusCode::ConstraintError));

        let out = ep.invoke(&ctx(), &args(1, 0)).await.unwrap();
        assert_eq!(out.status, StatusCode::Failure);
        assert_eq!(out.cluster_status, Some(0x42));
        assert!(out.data.is_empty());

        let out = ep.invoke(&ctx(), &args(2, 0)).await.unwrap();
        assert_eq!(out, InvokeOutcome::status(StatusCode::Failure));
    }

    #[tokio::test]
    async fn bad_arguments_never_reach_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let ep = CommandEndpoint::new(1, "Add", add_request(), move |_req, _ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(Value::structure([])) }
        });

        // b missing
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct().unwrap();
        tlv.write_uint(0, 1).unwrap();
        tlv.write_struct_end().unwrap();
        let out = ep.invoke(&ctx(), &tlv.data).await.unwrap();
        assert_eq!(out.status, StatusCode::InvalidCommand);

        // truncated
        let out = ep.invoke(&ctx(), &args(1, 2)[..4]).await.unwrap();
        assert_eq!(out.status, StatusCode::InvalidCommand);

        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let out = ep.invoke(&ctx(), &args(1, 2)).await.unwrap();
        assert_eq!(out.status, StatusCode::Success);
        assert_eq!(out.response_id, None);
        assert!(out.data.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nonconforming_response_is_loud() {
        let ep = CommandEndpoint::new(3, "Broken", Schema::empty(), |_req, _ctx| async {
            Ok(Value::structure([(0, Value::Utf8("not a number".into()))]))
        })
        .with_response(4, add_response());
        let empty = schema::encode(&Schema::empty(), &Value::structure([])).unwrap();
        let r = ep.invoke(&ctx(), &empty).await;
        assert!(matches!(r, Err(Error::EncodingInvariantViolation(_))));
    }

    async fn overlapping(ep: Arc<CommandEndpoint>) {
        let empty = schema::encode(&Schema::empty(), &Value::structure([])).unwrap();
        let (c1, c2) = (ctx(), ctx());
        let (a, b) = tokio::join!(ep.invoke(&c1, &empty), ep.invoke(&c2, &empty));
        assert_eq!(a.unwrap().status, StatusCode::Success);
        assert_eq!(b.unwrap().status, StatusCode::Success);
    }

    fn tracking(
        reentrant: bool,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> CommandEndpoint {
        let ep = CommandEndpoint::new(5, "Slow", Schema::empty(), move |_req, _ctx| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::structure([]))
            }
        });
        if reentrant {
            ep.reentrant()
        } else {
            ep
        }
    }

    #[tokio::test]
    async fn non_reentrant_invocations_do_not_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        overlapping(Arc::new(tracking(false, active.clone(), peak.clone()))).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        let peak = Arc::new(AtomicUsize::new(0));
        overlapping(Arc::new(tracking(true, active, peak.clone()))).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
