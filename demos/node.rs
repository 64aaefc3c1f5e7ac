//! Demo node with OnOff and LevelControl clusters on endpoint 1.
//!
//! Requests are built from command line, processed by node and response is printed.
//!
//! # Usage
//!
//! ```bash
//! # toggle light and read state
//! cargo run --example node -- invoke 1 6 2
//! cargo run --example node -- read 1 6 0
//!
//! # move to level 128 (fields are anonymous tlv structure)
//! cargo run --example node -- invoke 1 8 0 1524008018
//!
//! # write OnLevel
//! cargo run --example node -- --verbose write 1 8 17 0480
//!
//! # process complete decrypted message
//! cargo run --example node -- message 040000000a00000008070605040302010508341201001528...
//! ```

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use matd::attribute::{AttributeDef, Constraint};
use matd::cluster::{Cluster, ClusterInstanceId};
use matd::command::CommandEndpoint;
use matd::config::NodeConfig;
use matd::interaction::{
    AttributeData, AttributePath, CommandData, CommandPath, InvokeRequest, ReadRequest,
    WriteRequest,
};
use matd::messages::{Message, ProtocolMessageHeader};
use matd::node::Node;
use matd::schema::{Field, Schema, Value};
use matd::session::{AuthMode, InvocationContext, SessionIdentity};
use matd::tlv;
use tokio_util::sync::CancellationToken;

const ON_OFF: u32 = 0x0006;
const LEVEL_CONTROL: u32 = 0x0008;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(long)]
    #[arg(global = true, default_value_t = false)]
    verbose: bool,

    /// json node configuration
    #[clap(long)]
    #[arg(global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Invoke command, fields are hex encoded anonymous tlv
    Invoke {
        endpoint: u16,
        cluster: u32,
        command: u32,
        #[arg(default_value_t = String::from("1518"))]
        fields: String,
    },
    /// Read attribute
    Read {
        endpoint: u16,
        cluster: u32,
        attribute: u32,
    },
    /// Write attribute, data is hex encoded anonymous tlv
    Write {
        endpoint: u16,
        cluster: u32,
        attribute: u32,
        data: String,
        #[clap(long)]
        data_version: Option<u32>,
    },
    /// Process hex encoded decrypted message (message header, protocol header, payload)
    Message { message: String },
}

fn on_off_command(
    node: &Weak<Node>,
    id: u32,
    name: &'static str,
    value: Option<bool>,
) -> CommandEndpoint {
    let node = node.clone();
    CommandEndpoint::new(id, name, Schema::empty(), move |_req, ctx| {
        let node = node.clone();
        async move {
            let node = node.upgrade().context("node is gone")?;
            let cluster = node
                .cluster(ClusterInstanceId::new(1, ON_OFF))
                .context("on/off cluster is gone")?;
            let attrs = cluster.attributes();
            let on = value.unwrap_or(!attrs.read(0).and_then(|v| v.as_bool()).unwrap_or(false));
            attrs.set(0, on)?;
            log::info!("light {} by node {:x}", if on { "on" } else { "off" }, ctx.source_node_id);
            Ok(Value::structure([]))
        }
    })
}

fn move_to_level(node: &Weak<Node>) -> CommandEndpoint {
    let node = node.clone();
    let request = Schema::structure(vec![
        Field::new(0, "level", Schema::U8),
        Field::new(1, "transition_time", Schema::nullable(Schema::U16)),
        Field::new(2, "options_mask", Schema::optional(Schema::U8)),
        Field::new(3, "options_override", Schema::optional(Schema::U8)),
    ]);
    CommandEndpoint::new(0x00, "MoveToLevel", request, move |req, _ctx| {
        let node = node.clone();
        async move {
            let level = req.field(0).and_then(Value::as_u64).unwrap_or(0);
            let node = node.upgrade().context("node is gone")?;
            let cluster = node
                .cluster(ClusterInstanceId::new(1, LEVEL_CONTROL))
                .context("level control cluster is gone")?;
            cluster.attributes().set(0, level)?;
            Ok(Value::structure([]))
        }
    })
}

fn demo_node(config: NodeConfig) -> Result<Arc<Node>> {
    let node = Arc::new(Node::new(config));
    let weak = Arc::downgrade(&node);
    node.add_cluster(
        Cluster::builder(ClusterInstanceId::new(1, ON_OFF))
            .command(on_off_command(&weak, 0x00, "Off", Some(false)))
            .command(on_off_command(&weak, 0x01, "On", Some(true)))
            .command(on_off_command(&weak, 0x02, "Toggle", None))
            .attribute(AttributeDef::new(0x0000, "OnOff", Schema::Bool)),
    )?;
    node.add_cluster(
        Cluster::builder(ClusterInstanceId::new(1, LEVEL_CONTROL))
            .command(move_to_level(&weak))
            .attribute(
                AttributeDef::new(0x0000, "CurrentLevel", Schema::nullable(Schema::U8))
                    .with_constraint(Constraint::Range { min: 1, max: 254 })
                    .with_default(Value::UInt(1)),
            )
            .attribute(
                AttributeDef::new(0x0011, "OnLevel", Schema::nullable(Schema::U8))
                    .writable()
                    .with_default(Value::Null)
                    .with_constraint(Constraint::Range { min: 1, max: 254 }),
            ),
    )?;
    Ok(node)
}

fn print_reply(opcode: u8, payload: &[u8]) -> Result<()> {
    println!("opcode 0x{:x} payload {}", opcode, hex::encode(payload));
    let t = tlv::decode_tlv(payload)?;
    t.dump(1);
    println!("{:?}", t);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    let revision = config.interaction_model_revision;
    let node = demo_node(config)?;
    let ctx = InvocationContext::new(SessionIdentity::new(1, 1, AuthMode::Case), 0x1122, 1, 1);

    let (opcode, payload) = match cli.command {
        Commands::Invoke {
            endpoint,
            cluster,
            command,
            fields,
        } => {
            let req = InvokeRequest {
                suppress_response: false,
                timed_request: false,
                invokes: vec![CommandData {
                    path: CommandPath::new(endpoint, cluster, command),
                    fields: hex::decode(fields).context("fields are not hex")?,
                }],
            };
            (ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_REQ, req.encode(revision)?)
        }
        Commands::Read {
            endpoint,
            cluster,
            attribute,
        } => {
            let req = ReadRequest {
                paths: vec![AttributePath::new(endpoint, cluster, attribute)],
            };
            (ProtocolMessageHeader::INTERACTION_OPCODE_READ_REQ, req.encode(revision)?)
        }
        Commands::Write {
            endpoint,
            cluster,
            attribute,
            data,
            data_version,
        } => {
            let req = WriteRequest {
                suppress_response: false,
                timed_request: false,
                writes: vec![AttributeData {
                    data_version,
                    path: AttributePath::new(endpoint, cluster, attribute),
                    data: hex::decode(data).context("data is not hex")?,
                }],
            };
            (ProtocolMessageHeader::INTERACTION_OPCODE_WRITE_REQ, req.encode(revision)?)
        }
        Commands::Message { message } => {
            let message = Message::decode(&hex::decode(message).context("message is not hex")?)?;
            log::debug!("{:?}", message);
            let session = SessionIdentity::new(1, 1, AuthMode::Case);
            match node.handle(&message, session, 1, CancellationToken::new()).await? {
                Some(out) => {
                    let (header, payload) = ProtocolMessageHeader::decode(&out)?;
                    log::debug!("{:?}", header);
                    print_reply(header.opcode, &payload)?;
                }
                None => println!("no response"),
            }
            return Ok(());
        }
    };
    match node.handle_message(&ctx, opcode, &payload).await? {
        Some(reply) => print_reply(reply.opcode, &reply.payload),
        None => {
            println!("no response");
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = {
        if cli.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Error
        }
    };
    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
