//! Interaction model payloads: requests accepted by the node and responses it produces.
//!
//! Only concrete paths are understood; wildcard paths are refused when parsing.

use anyhow::{Context, Result};

use crate::cluster::ClusterInstanceId;
use crate::messages::StatusCode;
use crate::tlv::{self, TlvBuffer, TlvItem, TlvItemValue, TlvReader};

/// Encoding of empty anonymous structure, used when request omits command fields
pub const EMPTY_STRUCT: [u8; 2] = [0x15, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPath {
    pub endpoint: u16,
    pub cluster: u32,
    pub command: u32,
}

impl CommandPath {
    pub fn new(endpoint: u16, cluster: u32, command: u32) -> Self {
        Self {
            endpoint,
            cluster,
            command,
        }
    }

    pub fn cluster_instance(&self) -> ClusterInstanceId {
        ClusterInstanceId::new(self.endpoint, self.cluster)
    }

    fn encode(&self, tlv: &mut TlvBuffer, tag: u8) -> Result<()> {
        tlv.write_list(tag)?;
        tlv.write_uint16(0, self.endpoint)?;
        tlv.write_uint32(1, self.cluster)?;
        tlv.write_uint32(2, self.command)?;
        tlv.write_struct_end()?;
        Ok(())
    }

    fn decode(item: &TlvItem) -> Result<Self> {
        Ok(Self {
            endpoint: item
                .get_u16(&[0])
                .context("command path: endpoint (wildcards not supported)")?,
            cluster: item.get_u32(&[1]).context("command path: cluster")?,
            command: item.get_u32(&[2]).context("command path: command")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributePath {
    pub endpoint: u16,
    pub cluster: u32,
    pub attribute: u32,
}

impl AttributePath {
    pub fn new(endpoint: u16, cluster: u32, attribute: u32) -> Self {
        Self {
            endpoint,
            cluster,
            attribute,
        }
    }

    pub fn cluster_instance(&self) -> ClusterInstanceId {
        ClusterInstanceId::new(self.endpoint, self.cluster)
    }

    fn encode(&self, tlv: &mut TlvBuffer, tag: u8) -> Result<()> {
        tlv.write_list(tag)?;
        tlv.write_uint16(2, self.endpoint)?;
        tlv.write_uint32(3, self.cluster)?;
        tlv.write_uint32(4, self.attribute)?;
        tlv.write_struct_end()?;
        Ok(())
    }

    fn decode(item: &TlvItem) -> Result<Self> {
        Ok(Self {
            endpoint: item
                .get_u16(&[2])
                .context("attribute path: endpoint (wildcards not supported)")?,
            cluster: item
                .get_u32(&[3])
                .context("attribute path: cluster (wildcards not supported)")?,
            attribute: item
                .get_u32(&[4])
                .context("attribute path: attribute (wildcards not supported)")?,
        })
    }
}

fn decode_root(payload: &[u8], max_depth: usize) -> Result<TlvItem> {
    let first = TlvReader::with_max_depth(payload, max_depth).raw_element()?;
    if first.len() != payload.len() {
        anyhow::bail!("{} bytes after payload structure", payload.len() - first.len());
    }
    let root = tlv::decode_tlv_with_depth(payload, max_depth)?;
    match root.value {
        TlvItemValue::List(_) => Ok(root),
        _ => anyhow::bail!("payload is not structure"),
    }
}

fn container<'a>(root: &'a TlvItem, tag: u8, what: &str) -> Result<&'a TlvItem> {
    let item = root.get_item(&[tag]).context(format!("{} missing", what))?;
    if !matches!(item.value, TlvItemValue::List(_)) {
        anyhow::bail!("{} is not container", what);
    }
    Ok(item)
}

/// One command of invoke request. `fields` is anonymous tlv of command fields element.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandData {
    pub path: CommandPath,
    pub fields: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub suppress_response: bool,
    pub timed_request: bool,
    pub invokes: Vec<CommandData>,
}

impl InvokeRequest {
    pub fn decode(payload: &[u8], max_depth: usize) -> Result<Self> {
        let root = decode_root(payload, max_depth).context("invoke request")?;
        let mut invokes = Vec::new();
        for item in container(&root, 2, "invoke requests")?.children() {
            let path = CommandPath::decode(item.get_item(&[0]).context("command path missing")?)?;
            let fields = match item.get_item(&[1]) {
                Some(f) => {
                    let raw = f.raw(payload).context("command fields out of buffer")?;
                    tlv::anonymous(raw)?
                }
                None => EMPTY_STRUCT.to_vec(),
            };
            invokes.push(CommandData { path, fields });
        }
        Ok(Self {
            suppress_response: root.get_bool(&[0]).unwrap_or(false),
            timed_request: root.get_bool(&[1]).unwrap_or(false),
            invokes,
        })
    }

    /// Encode request. Tag of command fields is replaced.
    pub fn encode(&self, revision: u8) -> Result<Vec<u8>> {
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct()?;
        tlv.write_bool(0, self.suppress_response)?;
        tlv.write_bool(1, self.timed_request)?;
        tlv.write_array(2)?;
        for inv in &self.invokes {
            tlv.write_anon_struct()?;
            inv.path.encode(&mut tlv, 0)?;
            tlv.write_retagged(1, &inv.fields)?;
            tlv.write_struct_end()?;
        }
        tlv.write_struct_end()?;
        tlv.write_uint8(0xff, revision)?;
        tlv.write_struct_end()?;
        Ok(tlv.data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub paths: Vec<AttributePath>,
}

impl ReadRequest {
    pub fn decode(payload: &[u8], max_depth: usize) -> Result<Self> {
        let root = decode_root(payload, max_depth).context("read request")?;
        let paths = container(&root, 0, "attribute requests")?
            .children()
            .iter()
            .map(AttributePath::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { paths })
    }

    pub fn encode(&self, revision: u8) -> Result<Vec<u8>> {
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct()?;
        tlv.write_array(0)?;
        for p in &self.paths {
            tlv.write_anon_list()?;
            tlv.write_uint16(2, p.endpoint)?;
            tlv.write_uint32(3, p.cluster)?;
            tlv.write_uint32(4, p.attribute)?;
            tlv.write_struct_end()?;
        }
        tlv.write_struct_end()?;
        tlv.write_bool(3, true)?;
        tlv.write_uint8(0xff, revision)?;
        tlv.write_struct_end()?;
        Ok(tlv.data)
    }
}

/// One attribute of write request. `data` is anonymous tlv of data element.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeData {
    pub data_version: Option<u32>,
    pub path: AttributePath,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub suppress_response: bool,
    pub timed_request: bool,
    pub writes: Vec<AttributeData>,
}

impl WriteRequest {
    pub fn decode(payload: &[u8], max_depth: usize) -> Result<Self> {
        let root = decode_root(payload, max_depth).context("write request")?;
        let mut writes = Vec::new();
        for item in container(&root, 2, "write requests")?.children() {
            let path = item.get_item(&[1]).context("attribute path missing")?;
            let path = AttributePath::decode(path)?;
            let data = item
                .get_item(&[2])
                .context("attribute data missing")?
                .raw(payload)
                .context("attribute data out of buffer")?;
            let data = tlv::anonymous(data)?;
            writes.push(AttributeData {
                data_version: item.get_u32(&[0]),
                path,
                data,
            });
        }
        Ok(Self {
            suppress_response: root.get_bool(&[0]).unwrap_or(false),
            timed_request: root.get_bool(&[1]).unwrap_or(false),
            writes,
        })
    }

    /// Encode request. Tag of attribute data is replaced.
    pub fn encode(&self, revision: u8) -> Result<Vec<u8>> {
        let mut tlv = TlvBuffer::new();
        tlv.write_anon_struct()?;
        tlv.write_bool(0, self.suppress_response)?;
        tlv.write_bool(1, self.timed_request)?;
        tlv.write_array(2)?;
        for w in &self.writes {
            tlv.write_anon_struct()?;
            if let Some(dv) = w.data_version {
                tlv.write_uint32(0, dv)?;
            }
            w.path.encode(&mut tlv, 1)?;
            tlv.write_retagged(2, &w.data)?;
            tlv.write_struct_end()?;
        }
        tlv.write_struct_end()?;
        tlv.write_uint8(0xff, revision)?;
        tlv.write_struct_end()?;
        Ok(tlv.data)
    }
}

fn encode_status_ib(
    tlv: &mut TlvBuffer,
    tag: u8,
    status: StatusCode,
    cluster_status: Option<u8>,
) -> Result<()> {
    tlv.write_struct(tag)?;
    tlv.write_uint8(0, status.code())?;
    if let Some(cs) = cluster_status {
        tlv.write_uint8(1, cs)?;
    }
    tlv.write_struct_end()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResponseItem {
    /// response command; data is anonymous tlv of its fields
    Command { path: CommandPath, data: Vec<u8> },
    Status {
        path: CommandPath,
        status: StatusCode,
        cluster_status: Option<u8>,
    },
}

pub fn encode_invoke_response(items: &[InvokeResponseItem], revision: u8) -> Result<Vec<u8>> {
    let mut tlv = TlvBuffer::new();
    tlv.write_anon_struct()?;
    tlv.write_bool(0, false)?;
    tlv.write_array(1)?;
    for item in items {
        tlv.write_anon_struct()?;
        match item {
            InvokeResponseItem::Command { path, data } => {
                tlv.write_struct(0)?;
                path.encode(&mut tlv, 0)?;
                tlv.write_retagged(1, data)?;
                tlv.write_struct_end()?;
            }
            InvokeResponseItem::Status {
                path,
                status,
                cluster_status,
            } => {
                tlv.write_struct(1)?;
                path.encode(&mut tlv, 0)?;
                encode_status_ib(&mut tlv, 1, *status, *cluster_status)?;
                tlv.write_struct_end()?;
            }
        }
        tlv.write_struct_end()?;
    }
    tlv.write_struct_end()?;
    tlv.write_uint8(0xff, revision)?;
    tlv.write_struct_end()?;
    Ok(tlv.data)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeReport {
    /// current value; data is anonymous tlv
    Data {
        path: AttributePath,
        data_version: u32,
        data: Vec<u8>,
    },
    Status { path: AttributePath, status: StatusCode },
}

pub fn encode_report_data(reports: &[AttributeReport], revision: u8) -> Result<Vec<u8>> {
    let mut tlv = TlvBuffer::new();
    tlv.write_anon_struct()?;
    tlv.write_array(1)?;
    for r in reports {
        tlv.write_anon_struct()?;
        match r {
            AttributeReport::Status { path, status } => {
                tlv.write_struct(0)?;
                path.encode(&mut tlv, 0)?;
                encode_status_ib(&mut tlv, 1, *status, None)?;
                tlv.write_struct_end()?;
            }
            AttributeReport::Data {
                path,
                data_version,
                data,
            } => {
                tlv.write_struct(1)?;
                tlv.write_uint32(0, *data_version)?;
                path.encode(&mut tlv, 1)?;
                tlv.write_retagged(2, data)?;
                tlv.write_struct_end()?;
            }
        }
        tlv.write_struct_end()?;
    }
    tlv.write_struct_end()?;
    tlv.write_bool(4, true)?;
    tlv.write_uint8(0xff, revision)?;
    tlv.write_struct_end()?;
    Ok(tlv.data)
}

pub fn encode_write_response(
    statuses: &[(AttributePath, StatusCode)],
    revision: u8,
) -> Result<Vec<u8>> {
    let mut tlv = TlvBuffer::new();
    tlv.write_anon_struct()?;
    tlv.write_array(0)?;
    for (path, status) in statuses {
        tlv.write_anon_struct()?;
        path.encode(&mut tlv, 0)?;
        encode_status_ib(&mut tlv, 1, *status, None)?;
        tlv.write_struct_end()?;
    }
    tlv.write_struct_end()?;
    tlv.write_uint8(0xff, revision)?;
    tlv.write_struct_end()?;
    Ok(tlv.data)
}

pub fn encode_status_response(status: StatusCode, revision: u8) -> Result<Vec<u8>> {
    let mut tlv = TlvBuffer::new();
    tlv.write_anon_struct()?;
    tlv.write_uint8(0, status.code())?;
    tlv.write_uint8(0xff, revision)?;
    tlv.write_struct_end()?;
    Ok(tlv.data)
}
