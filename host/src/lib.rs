//! # Scene Replication Host
//!
//! This library keeps a shared 3D scene in sync between a sensor-equipped
//! host, a head-mounted display client and any number of tracked-controller
//! clients. Peers exchange small size-prefixed binary packets; the host
//! applies what it receives to its scene and streams its own local changes
//! back to the head-mounted client.
//!
//! ## Core Responsibilities
//!
//! ### Object Identity
//! Every replicated object carries an [`ObjectId`](shared::ObjectId) that is
//! the same on every peer. The [`registry::Registry`] maps those ids to the
//! scene's own handles. The side that spawns an object allocates its id;
//! receivers register the id they were sent.
//!
//! ### Inbound Dispatch
//! Two transports run side by side:
//! - a raw stream socket for the head-mounted device, one frame at a time
//! - an event transport for controller peers, which reassembles frames
//!   split across receive events
//!
//! Both feed the same [`dispatcher::Dispatcher`], which decodes each frame
//! and creates, moves or deletes scene objects accordingly.
//!
//! ### Outbound Replication
//! Local scene changes are queued in the registry and drained once per tick
//! by the [`pump::OutboundPump`], which sends them over a reverse channel
//! once it is connected.
//!
//! ## Architecture Design
//!
//! ### One Owner for the Scene
//! Listener tasks never touch the scene. They forward complete frames over
//! an unbounded channel to the tick loop in [`network::Host`], which owns
//! the [`scene::SceneAdapter`]. A slow or stalled peer therefore only stalls
//! its own task.
//!
//! ### Locking
//! The registry's id table and each of its hand-off queues are guarded
//! independently. No lock is held across I/O or across a call into the
//! scene.
//!
//! ### Fault Containment
//! A malformed packet or an unknown id is logged and dropped; the connection
//! continues. Transport failures close the affected connection or end the
//! reverse channel. Nothing here is fatal to the process.
//!
//! ## Module Organization
//!
//! - `config`: command-line configuration
//! - `dispatcher`: per-packet effects and controller bookkeeping
//! - `error`: error types
//! - `lifecycle`: reverse-channel state and event peer table
//! - `mesh`: mesh decoding and history persistence
//! - `network`: the host and its tick loop
//! - `pump`: per-tick outbound replication
//! - `registry`: object ids and hand-off queues
//! - `scene`: scene adapter boundary and a headless implementation
//! - `transport`: stream, event and outbound sockets
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use host::config::HostConfig;
//! use host::network::Host;
//! use host::scene::HeadlessScene;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut host = Host::bind(HostConfig::default(), HeadlessScene::new()).await?;
//!
//!     // Apply inbound packets and replicate local changes until Ctrl+C
//!     host.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod mesh;
pub mod network;
pub mod pump;
pub mod registry;
pub mod scene;
pub mod transport;
