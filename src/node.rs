//! Node: registry of cluster instances and dispatch of interactions to them.
//!
//! Node owns every cluster registered on it; there is no process wide state, two nodes in
//! one process are fully independent.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::attribute::{AttributeChange, AttributeDef};
use crate::cluster::{Cluster, ClusterBuilder, ClusterInstanceId};
use crate::command::{CommandEndpoint, InvokeOutcome};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::interaction::{
    self, AttributeReport, CommandPath, InvokeRequest, InvokeResponseItem, ReadRequest,
    WriteRequest,
};
use crate::messages::{Message, ProtocolMessageHeader, StatusCode};
use crate::schema;
use crate::session::{InvocationContext, SessionIdentity};

/// Outcome of attribute read
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeResponse {
    pub status: StatusCode,
    pub attribute_id: u32,
    /// version of this attribute alone; a change of sibling attribute in same cluster
    /// instance does not move it (Matter scopes DataVersion to whole cluster instance)
    pub data_version: u32,
    /// anonymous tlv of current value, empty unless status is success
    pub data: Vec<u8>,
}

impl AttributeResponse {
    fn status(attribute_id: u32, status: StatusCode) -> Self {
        Self {
            status,
            attribute_id,
            data_version: 0,
            data: Vec::new(),
        }
    }
}

/// Interaction model message produced by node
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

pub struct Node {
    config: NodeConfig,
    clusters: RwLock<HashMap<ClusterInstanceId, Arc<Cluster>>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            clusters: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Build and register cluster. Nesting limit of node config applies to its decoders.
    pub fn add_cluster(&self, builder: ClusterBuilder) -> anyhow::Result<ClusterInstanceId> {
        let cluster = builder.max_tlv_depth(self.config.max_tlv_depth).build()?;
        let id = cluster.id();
        let mut clusters = self.clusters.write().unwrap_or_else(PoisonError::into_inner);
        if clusters.contains_key(&id) {
            anyhow::bail!("cluster {} already registered", id);
        }
        clusters.insert(id, Arc::new(cluster));
        log::info!("registered cluster {}", id);
        Ok(id)
    }

    /// Unregister cluster. Invocations already running keep their reference and finish.
    pub fn remove_cluster(&self, id: ClusterInstanceId) -> Option<Arc<Cluster>> {
        let removed = self
            .clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            log::info!("removed cluster {}", id);
        }
        removed
    }

    pub fn cluster(&self, id: ClusterInstanceId) -> Option<Arc<Cluster>> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Cluster instance or status telling which part of the path is unknown
    fn resolve(&self, id: ClusterInstanceId) -> std::result::Result<Arc<Cluster>, StatusCode> {
        let clusters = self.clusters.read().unwrap_or_else(PoisonError::into_inner);
        match clusters.get(&id) {
            Some(c) => Ok(c.clone()),
            None if clusters.keys().any(|k| k.endpoint == id.endpoint) => {
                Err(StatusCode::UnsupportedCluster)
            }
            None => Err(StatusCode::UnsupportedEndpoint),
        }
    }

    pub fn find_command_endpoint(
        &self,
        id: ClusterInstanceId,
        invoke_id: u32,
    ) -> Option<Arc<CommandEndpoint>> {
        self.cluster(id)?.command(invoke_id).cloned()
    }

    pub fn find_attribute(&self, id: ClusterInstanceId, attribute_id: u32) -> Option<AttributeDef> {
        self.cluster(id)?.attributes().definition(attribute_id).cloned()
    }

    /// Invoke command. None means owning exchange was cancelled and result must not be sent.
    pub async fn invoke(
        &self,
        ctx: &InvocationContext,
        id: ClusterInstanceId,
        invoke_id: u32,
        raw: &[u8],
    ) -> Result<Option<InvokeOutcome>> {
        if ctx.is_cancelled() {
            log::debug!(
                "exch:{} cancelled before invoke of {:#x} at {}",
                ctx.exchange_id,
                invoke_id,
                id
            );
            return Ok(None);
        }
        let cluster = match self.resolve(id) {
            Ok(c) => c,
            Err(status) => return Ok(Some(InvokeOutcome::status(status))),
        };
        let endpoint = match cluster.command(invoke_id) {
            Some(e) => e.clone(),
            None => return Ok(Some(InvokeOutcome::status(StatusCode::UnsupportedCommand))),
        };
        let outcome = endpoint.invoke_with_depth(ctx, raw, cluster.max_depth()).await?;
        if ctx.is_cancelled() {
            log::debug!(
                "exch:{} cancelled, discarding {} result of {}",
                ctx.exchange_id,
                outcome.status,
                endpoint.name
            );
            return Ok(None);
        }
        Ok(Some(outcome))
    }

    pub fn read_attribute(
        &self,
        id: ClusterInstanceId,
        attribute_id: u32,
    ) -> Result<AttributeResponse> {
        let cluster = match self.resolve(id) {
            Ok(c) => c,
            Err(status) => return Ok(AttributeResponse::status(attribute_id, status)),
        };
        let store = cluster.attributes();
        let (def, (value, revision)) =
            match (store.definition(attribute_id), store.snapshot(attribute_id)) {
                (Some(d), Some(s)) => (d, s),
                _ => {
                    return Ok(AttributeResponse::status(
                        attribute_id,
                        StatusCode::UnsupportedAttribute,
                    ))
                }
            };
        let data = schema::encode(&def.schema, &value)?;
        Ok(AttributeResponse {
            status: StatusCode::Success,
            attribute_id,
            data_version: revision as u32,
            data,
        })
    }

    pub fn write_attribute(
        &self,
        ctx: &InvocationContext,
        id: ClusterInstanceId,
        attribute_id: u32,
        raw: &[u8],
        data_version: Option<u32>,
    ) -> StatusCode {
        match self.resolve(id) {
            Ok(c) => c.attributes().write_versioned(attribute_id, raw, ctx, data_version),
            Err(status) => status,
        }
    }

    pub fn subscribe<F>(&self, id: ClusterInstanceId, attribute_id: u32, f: F) -> Result<()>
    where
        F: Fn(&AttributeChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.resolve(id)
            .map_err(Error::status)?
            .attributes()
            .subscribe(attribute_id, f)
    }

    /// Process interaction model payload received on exchange.
    ///
    /// Returns message to send back, or None when nothing may be sent (exchange cancelled,
    /// response suppressed by requester). Err is returned only for defects of registered
    /// clusters; every problem of peer input is answered with status.
    pub async fn handle_message(
        &self,
        ctx: &InvocationContext,
        opcode: u8,
        payload: &[u8],
    ) -> Result<Option<Reply>> {
        if payload.len() > self.config.max_payload_size {
            log::debug!("exch:{} payload of {} bytes refused", ctx.exchange_id, payload.len());
            return self.status_reply(StatusCode::ResourceExhausted).map(Some);
        }
        let depth = self.config.max_tlv_depth;
        let reply = match opcode {
            ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_REQ => {
                match InvokeRequest::decode(payload, depth) {
                    Ok(req) => self.handle_invoke(ctx, req).await?,
                    Err(e) => return self.bad_request(ctx, payload, e).map(Some),
                }
            }
            ProtocolMessageHeader::INTERACTION_OPCODE_READ_REQ => {
                match ReadRequest::decode(payload, depth) {
                    Ok(req) => Some(self.handle_read(req)?),
                    Err(e) => return self.bad_request(ctx, payload, e).map(Some),
                }
            }
            ProtocolMessageHeader::INTERACTION_OPCODE_WRITE_REQ => {
                match WriteRequest::decode(payload, depth) {
                    Ok(req) => self.handle_write(ctx, req)?,
                    Err(e) => return self.bad_request(ctx, payload, e).map(Some),
                }
            }
            _ => {
                log::debug!("exch:{} unsupported opcode {:#x}", ctx.exchange_id, opcode);
                return self.status_reply(StatusCode::InvalidAction).map(Some);
            }
        };
        match reply {
            Some(r) if r.payload.len() > self.config.max_payload_size => {
                log::warn!(
                    "exch:{} response of {} bytes over limit {}",
                    ctx.exchange_id,
                    r.payload.len(),
                    self.config.max_payload_size
                );
                self.status_reply(StatusCode::ResourceExhausted).map(Some)
            }
            r => Ok(r),
        }
    }

    /// Process complete decoded message. Returns encoded protocol header followed by
    /// payload of the response; message header and encryption are left to transport.
    pub async fn handle(
        &self,
        message: &Message,
        session: SessionIdentity,
        fabric_index: u8,
        cancel: CancellationToken,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        if message.protocol_header.protocol_id != ProtocolMessageHeader::PROTOCOL_ID_INTERACTION {
            anyhow::bail!("unexpected protocol {}", message.protocol_header.protocol_id);
        }
        let ctx = InvocationContext::from_message(message, session, fabric_index)
            .with_cancellation(cancel);
        let reply = match self
            .handle_message(&ctx, message.protocol_header.opcode, &message.payload)
            .await?
        {
            Some(r) => r,
            None => return Ok(None),
        };
        let mut out = message
            .protocol_header
            .response(reply.opcode, message.message_header.message_counter)
            .encode()?;
        out.extend_from_slice(&reply.payload);
        Ok(Some(out))
    }

    async fn handle_invoke(
        &self,
        ctx: &InvocationContext,
        req: InvokeRequest,
    ) -> Result<Option<Reply>> {
        let mut items = Vec::with_capacity(req.invokes.len());
        for inv in &req.invokes {
            let path = inv.path;
            let outcome = match self
                .invoke(ctx, path.cluster_instance(), path.command, &inv.fields)
                .await?
            {
                Some(o) => o,
                None => return Ok(None),
            };
            items.push(match outcome.response_id {
                Some(response_id) if outcome.status.is_success() => InvokeResponseItem::Command {
                    path: CommandPath::new(path.endpoint, path.cluster, response_id),
                    data: outcome.data,
                },
                _ => InvokeResponseItem::Status {
                    path,
                    status: outcome.status,
                    cluster_status: outcome.cluster_status,
                },
            });
        }
        if req.suppress_response {
            return Ok(None);
        }
        let revision = self.config.interaction_model_revision;
        let payload =
            interaction::encode_invoke_response(&items, revision).map_err(encoding_defect)?;
        Ok(Some(Reply {
            opcode: ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_RESP,
            payload,
        }))
    }

    fn handle_read(&self, req: ReadRequest) -> Result<Reply> {
        let mut reports = Vec::with_capacity(req.paths.len());
        for path in req.paths {
            let r = self.read_attribute(path.cluster_instance(), path.attribute)?;
            reports.push(if r.status.is_success() {
                AttributeReport::Data {
                    path,
                    data_version: r.data_version,
                    data: r.data,
                }
            } else {
                AttributeReport::Status { path, status: r.status }
            });
        }
        let revision = self.config.interaction_model_revision;
        let payload =
            interaction::encode_report_data(&reports, revision).map_err(encoding_defect)?;
        Ok(Reply {
            opcode: ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA,
            payload,
        })
    }

    fn handle_write(&self, ctx: &InvocationContext, req: WriteRequest) -> Result<Option<Reply>> {
        let statuses: Vec<_> = req
            .writes
            .iter()
            .map(|w| {
                let status = self.write_attribute(
                    ctx,
                    w.path.cluster_instance(),
                    w.path.attribute,
                    &w.data,
                    w.data_version,
                );
                (w.path, status)
            })
            .collect();
        if req.suppress_response {
            return Ok(None);
        }
        let revision = self.config.interaction_model_revision;
        let payload =
            interaction::encode_write_response(&statuses, revision).map_err(encoding_defect)?;
        Ok(Some(Reply {
            opcode: ProtocolMessageHeader::INTERACTION_OPCODE_WRITE_RESP,
            payload,
        }))
    }

    fn bad_request(
        &self,
        ctx: &InvocationContext,
        payload: &[u8],
        e: anyhow::Error,
    ) -> Result<Reply> {
        log::debug!(
            "exch:{} unparsable request {}: {:#}",
            ctx.exchange_id,
            hex::encode(payload),
            e
        );
        self.status_reply(StatusCode::InvalidAction)
    }

    fn status_reply(&self, status: StatusCode) -> Result<Reply> {
        let revision = self.config.interaction_model_revision;
        let payload =
            interaction::encode_status_response(status, revision).map_err(encoding_defect)?;
        Ok(Reply {
            opcode: ProtocolMessageHeader::INTERACTION_OPCODE_STATUS_RESP,
            payload,
        })
    }
}

fn encoding_defect(e: anyhow::Error) -> Error {
    log::error!("failed to encode response: {:#}", e);
    Error::EncodingInvariantViolation(format!("{:#}", e))
}
