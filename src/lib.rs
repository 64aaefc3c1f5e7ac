//! Matter application protocol core
//!
//! This library implements device side of Matter interaction model: it decodes tag-length-value
//! encoded requests, dispatches them to command handlers and attribute stores registered per
//! cluster instance and encodes responses. Transport, session establishment and encryption are
//! left to the embedding application; library consumes decrypted messages. Handlers are
//! asynchronous and library depends on Tokio.
//! Following are main parts of api:
//! - [tlv](tlv) - Matter tlv writer, lazy reader and tree decoder.
//! - [schema](schema) - Declarative description of values ([Schema](schema::Schema)) and strict
//!                      encode/decode of [Value](schema::Value) against it.
//! - [CommandEndpoint](command::CommandEndpoint) - binds request/response schema to async handler.
//! - [AttributeStore](attribute::AttributeStore) - current attribute values, write validation
//!                                                 and change notification.
//! - [Node](node::Node) - registry of [clusters](cluster::Cluster) and dispatch engine for invoke,
//!                        read and write interactions.
//!
//! Example of node with OnOff cluster:
//! ```
//! # use anyhow::Result;
//! # use matd::cluster::{Cluster, ClusterInstanceId};
//! # use matd::command::CommandEndpoint;
//! # use matd::attribute::AttributeDef;
//! # use matd::config::NodeConfig;
//! # use matd::node::Node;
//! # use matd::schema::{Schema, Value};
//! # use matd::session::{AuthMode, InvocationContext, SessionIdentity};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let on_off = ClusterInstanceId::new(1, 0x0006);
//! let node = Node::new(NodeConfig::default());
//! node.add_cluster(
//!     Cluster::builder(on_off)
//!         .attribute(AttributeDef::new(0x0000, "OnOff", Schema::Bool))
//!         .command(CommandEndpoint::new(0x01, "On", Schema::empty(), |_req, ctx| async move {
//!             log::info!("On from node {:x}", ctx.source_node_id);
//!             Ok(Value::structure([]))
//!         })),
//! )?;
//!
//! // transport supplies context for every decrypted message
//! let ctx = InvocationContext::new(SessionIdentity::new(1, 1, AuthMode::Case), 0x1122, 1, 0x33);
//! let outcome = node.invoke(&ctx, on_off, 0x01, &[0x15, 0x18]).await?;
//! assert!(outcome.unwrap().status.is_success());
//!
//! let state = node.read_attribute(on_off, 0x0000)?;
//! assert_eq!(state.data, vec![0x08]);
//! # Ok(())
//! # }
//! ```

pub mod attribute;
pub mod cluster;
pub mod command;
pub mod config;
pub mod error;
pub mod interaction;
pub mod messages;
pub mod node;
pub mod schema;
pub mod session;
pub mod tlv;
