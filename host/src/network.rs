//! Host network layer tying the transports to the tick loop

use crate::config::HostConfig;
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;
use crate::lifecycle::ConnectionLifecycle;
use crate::mesh::MeshHistory;
use crate::pump::{OutboundPump, TickReport};
use crate::registry::Registry;
use crate::scene::SceneAdapter;
use crate::transport::{
    EventChannel, EventListener, Inbound, OutboundLink, StreamListener,
};
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Scene replication host
///
/// Owns the scene adapter. Listener tasks forward [`Inbound`] messages over
/// a channel; the tick loop applies them and runs the outbound pump, so the
/// scene is only ever touched from one task.
pub struct Host<S: SceneAdapter> {
    config: HostConfig,
    scene: S,
    registry: Arc<Registry<S::Handle>>,
    lifecycle: Arc<ConnectionLifecycle>,
    dispatcher: Dispatcher<S::Handle>,
    pump: OutboundPump<S::Handle>,

    stream: Option<StreamListener>,
    event: Option<EventListener>,
    stream_addr: SocketAddr,
    event_addr: SocketAddr,
    ticks: u64,

    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl<S> Host<S>
where
    S: SceneAdapter + Send,
{
    /// Binds both listeners and restores mesh history if asked to
    pub async fn bind(config: HostConfig, mut scene: S) -> Result<Self, TransportError> {
        let stream = StreamListener::bind(
            config.stream_addr,
            config.stream_order(),
            config.max_frame_size,
        )
        .await?;
        let event = EventListener::bind(config.event_addr).await?;
        let stream_addr = stream.local_addr()?;
        let event_addr = event.local_addr()?;

        let registry = Arc::new(Registry::new());
        let lifecycle = Arc::new(ConnectionLifecycle::new());
        let link = Arc::new(OutboundLink::new(config.reverse_target()));

        let mut dispatcher = Dispatcher::new(Arc::clone(&registry), config.mesh_history_limit);
        if config.load_meshes {
            if let Some(path) = &config.mesh_file {
                match MeshHistory::load(path) {
                    Ok(meshes) => dispatcher.restore_meshes(meshes, &mut scene),
                    Err(e) => warn!("Could not load meshes from {}: {}", path.display(), e),
                }
            }
        }

        let pump = OutboundPump::new(
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            link.clone(),
            link,
        );
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            scene,
            registry,
            lifecycle,
            dispatcher,
            pump,
            stream: Some(stream),
            event: Some(event),
            stream_addr,
            event_addr,
            ticks: 0,
            inbound_tx,
            inbound_rx,
        })
    }

    pub fn registry(&self) -> Arc<Registry<S::Handle>> {
        Arc::clone(&self.registry)
    }

    pub fn lifecycle(&self) -> Arc<ConnectionLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    pub fn stream_addr(&self) -> SocketAddr {
        self.stream_addr
    }

    pub fn event_addr(&self) -> SocketAddr {
        self.event_addr
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn dispatcher(&self) -> &Dispatcher<S::Handle> {
        &self.dispatcher
    }

    /// Applies one message from a network task
    pub fn handle_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Frame { origin, body } => {
                self.dispatcher.dispatch(origin, &body, &mut self.scene);
            }
            Inbound::PeerConnected { connection, addr } => {
                self.lifecycle.peer_connected(connection, addr);
            }
            Inbound::PeerDisconnected { connection } => {
                self.lifecycle.peer_disconnected(connection);
                self.dispatcher.handle_disconnect(connection, &mut self.scene);
            }
        }
    }

    /// Runs the outbound pump once
    pub fn tick(&mut self) -> TickReport {
        let report = self.pump.tick(&mut self.scene);
        self.ticks += 1;

        // Periodic status, roughly once a second
        if self.ticks % u64::from(self.config.tick_rate.max(1)) == 0 {
            debug!(
                "Tick {}: {:?}, {} objects, {} queued, {} peers",
                self.ticks,
                self.lifecycle.status(),
                self.registry.len(),
                self.registry.queued(),
                self.lifecycle.peer_count()
            );
        }
        report
    }

    fn spawn_listeners(&mut self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if let Some(stream) = self.stream.take() {
            tasks.push(tokio::spawn(
                stream.run(self.inbound_tx.clone(), Arc::clone(&self.lifecycle)),
            ));
        }

        if let Some(event) = self.event.take() {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let channel = EventChannel::new(self.config.max_frame_size);
            tasks.push(tokio::spawn(event.run(events_tx)));
            tasks.push(tokio::spawn(channel.run(events_rx, self.inbound_tx.clone())));
        }

        tasks
    }

    fn save_meshes(&self) {
        let Some(path) = &self.config.mesh_file else {
            return;
        };
        if let Err(e) = self.dispatcher.mesh_history().save(path) {
            error!("Failed to save meshes to {}: {}", path.display(), e);
        }
    }

    /// Main loop: applies inbound messages and ticks until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let tasks = self.spawn_listeners();

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Host running: stream {}, events {}, {} ticks/s",
            self.stream_addr, self.event_addr, self.config.tick_rate
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Host shutting down");
                    break;
                }

                message = self.inbound_rx.recv() => {
                    match message {
                        Some(message) => self.handle_inbound(message),
                        None => break,
                    }
                }

                _ = tick_interval.tick() => {
                    self.tick();
                }
            }
        }

        for task in tasks {
            task.abort();
        }
        self.save_meshes();
    }
}
