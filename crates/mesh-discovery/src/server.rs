//! The discovery server: stream sessions, the ack/nack state machine,
//! and push dispatch.
//!
//! Each connection runs two loops: a receive task blocking on the wire
//! and forwarding requests over a channel, and a main loop selecting
//! between inbound requests and push events. Pushes arrive through the
//! bounded per-connection queue; the dispatcher does not hand over the
//! next push until the previous one's guard drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, instrument, warn};

use mesh_core::{ConfigKind, DiscoveryError, TypeUrl};
use mesh_proto::{
    AggregatedDiscoveryService, ControlPlane, DeltaDiscoveryRequest, DeltaDiscoveryResponse,
    DiscoveryRequest, DiscoveryResponse,
};
use mesh_push::{
    run_debounce, Environment, Proxy, ProxyType, PushContext, PushQueue, PushRequest,
    TriggerReason, WatchedResource,
};
use mesh_registry::ConfigStore;

use crate::auth::{check_connection_identity, AuthContext, Authenticator};
use crate::config::DiscoveryConfig;
use crate::connection::{Connection, ConnectionTable, PushEvent, PushGuard};
use crate::generator::{GeneratorRegistry, ResourceGenerator};
use crate::metrics::DiscoveryMetrics;
use crate::ready::ReadinessGate;
use crate::shutdown::ShutdownController;
use crate::status::StatusEventReporter;
use crate::stream::{
    is_expected_stream_error, ChannelSender, StreamReceiver, StreamSender, TonicReceiver,
};
use crate::utils::{generate_nonce, list_equal_unordered};

pub(crate) struct ServerInner {
    pub(crate) env: Arc<Environment>,
    pub(crate) config: DiscoveryConfig,
    pub(crate) connections: ConnectionTable,
    pub(crate) generators: GeneratorRegistry,
    pub(crate) push_queue: Arc<PushQueue>,
    push_semaphore: Arc<Semaphore>,
    update_tx: mpsc::UnboundedSender<PushRequest>,
    update_rx: Mutex<Option<mpsc::UnboundedReceiver<PushRequest>>>,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) status_reporter: Option<Arc<dyn StatusEventReporter>>,
    pub(crate) metrics: DiscoveryMetrics,
    pub(crate) ready: Arc<ReadinessGate>,
    pub(crate) shutdown: ShutdownController,
    pub(crate) control_plane_id: String,
    started: AtomicBool,
}

/// The discovery server. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct DiscoveryServer {
    pub(crate) inner: Arc<ServerInner>,
}

impl DiscoveryServer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        env: Arc<Environment>,
        config: DiscoveryConfig,
        generators: GeneratorRegistry,
        authenticator: Option<Arc<dyn Authenticator>>,
        status_reporter: Option<Arc<dyn StatusEventReporter>>,
        control_plane_id: String,
    ) -> Self {
        let metrics = DiscoveryMetrics::new();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let ready = Arc::new(ReadinessGate::new());
        let probe_env = Arc::clone(&env);
        ready.register("config-store-sync", move || probe_env.has_synced());

        let push_semaphore = Arc::new(Semaphore::new(config.push_throttle.max(1)));
        Self {
            inner: Arc::new(ServerInner {
                connections: ConnectionTable::new(metrics.clone()),
                env,
                config,
                generators,
                push_queue: Arc::new(PushQueue::new()),
                push_semaphore,
                update_tx,
                update_rx: Mutex::new(Some(update_rx)),
                authenticator,
                status_reporter,
                metrics,
                ready,
                shutdown: ShutdownController::new(),
                control_plane_id,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// The environment (stores, mesh config, global snapshot).
    pub fn environment(&self) -> &Arc<Environment> {
        &self.inner.env
    }

    /// Server configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Metrics recorder.
    pub fn metrics(&self) -> &DiscoveryMetrics {
        &self.inner.metrics
    }

    /// The readiness gate; embedders may register extra probes.
    pub fn readiness(&self) -> &Arc<ReadinessGate> {
        &self.inner.ready
    }

    /// The shutdown controller.
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.inner.shutdown
    }

    /// Number of connected proxies.
    pub fn client_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Whether the server may accept streams: caches synced and every
    /// registered probe passing.
    pub fn is_server_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    /// Submit a config-change push request. Called from store event
    /// handlers and debug triggers; requests are debounced and merged.
    pub fn config_update(&self, req: PushRequest) {
        if self.inner.update_tx.send(req).is_err() {
            warn!("push pipeline closed, dropping config update");
        }
    }

    /// Request a full push to every connected proxy (debug trigger).
    pub fn push_all(&self) {
        self.config_update(PushRequest::full(TriggerReason::Debug));
    }

    /// Request a push to a single proxy identified by cluster and IP.
    /// The proxy may be connected to a different replica; then this is a
    /// no-op.
    pub fn proxy_update(&self, cluster_id: &str, ip: &str) {
        let Some(connection) = self.inner.connections.find_by_cluster_and_ip(cluster_id, ip)
        else {
            return;
        };
        let mut req = PushRequest::full(TriggerReason::Proxy);
        req.push = Some(self.inner.env.global_push_context());
        self.inner.push_queue.enqueue(&connection.conn_id, req);
    }

    /// Start the background pipeline: store event handlers, debouncer,
    /// snapshot worker, and the push dispatcher. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.register_store_handlers();

        let update_rx = self
            .inner
            .update_rx
            .lock()
            .expect("update channel lock poisoned")
            .take()
            .expect("start called once");
        let (merged_tx, mut merged_rx) = mpsc::channel(1);
        tokio::spawn(run_debounce(
            update_rx,
            self.inner.config.debounce,
            merged_tx,
        ));

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(req) = merged_rx.recv().await {
                server.handle_merged_request(req);
            }
        });

        let server = self.clone();
        tokio::spawn(async move { server.dispatch_loop().await });
    }

    /// Wire every config kind's change events into the debouncer.
    fn register_store_handlers(&self) {
        for kind in ConfigKind::ALL {
            let server = self.clone();
            self.inner.env.store().register_event_handler(
                *kind,
                Arc::new(move |config, _event| {
                    let reason = match config.meta.kind {
                        ConfigKind::Service => TriggerReason::Service,
                        ConfigKind::ServiceEndpoints | ConfigKind::WorkloadEntry => {
                            TriggerReason::Endpoint
                        }
                        ConfigKind::Secret => TriggerReason::Secret,
                        _ => TriggerReason::Config,
                    };
                    // Service changes are keyed by hostname: sidecar
                    // scope dependency sets are hostname-based. Endpoint
                    // stores follow the same convention in meta.name.
                    let key = match &config.spec {
                        mesh_core::ConfigSpec::Service { hostname, .. } => mesh_core::ConfigKey::new(
                            config.meta.kind,
                            hostname.to_string(),
                            config.meta.namespace.clone(),
                        ),
                        _ => config.key(),
                    };
                    // Endpoint churn reuses the current snapshot; every
                    // other kind forces a rebuild.
                    let req = if config.meta.kind == ConfigKind::ServiceEndpoints {
                        PushRequest::incremental([key], reason)
                    } else {
                        PushRequest::for_config(key, reason)
                    };
                    server.config_update(req);
                }),
            );
        }
    }

    /// A debounced request: build (or reuse) the snapshot, then fan out.
    fn handle_merged_request(&self, req: PushRequest) {
        let req = if req.full {
            match self.inner.env.update_push_context(Some(&req)) {
                Ok(context) => {
                    self.inner
                        .metrics
                        .record_pushed_services(context.service_count());
                    info!(
                        version = %context.version(),
                        services = context.service_count(),
                        connected = self.client_count(),
                        "full push"
                    );
                    PushRequest {
                        push: Some(context),
                        ..req
                    }
                }
                Err(err) => {
                    // Existing streams keep the last good snapshot.
                    warn!(error = %err, "snapshot build failed, skipping push");
                    self.inner.metrics.record_internal_error();
                    return;
                }
            }
        } else {
            info!(connected = self.client_count(), "incremental push");
            PushRequest {
                push: Some(self.inner.env.global_push_context()),
                ..req
            }
        };
        self.start_push(req);
    }

    /// Enqueue a request against every live connection.
    fn start_push(&self, mut req: PushRequest) {
        let pending = self.inner.push_queue.pending();
        if pending > 0 {
            debug!(pending, "starting new push with pushes still pending");
        }
        req.start = Instant::now();
        for connection in self.inner.connections.list() {
            self.inner.push_queue.enqueue(&connection.conn_id, req.clone());
        }
    }

    /// Dequeue pushes and hand them to connection main loops, bounded by
    /// the push throttle. A push to a connection that went away is a
    /// no-op: dropping the event releases its queue slot.
    async fn dispatch_loop(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("push dispatcher stopped");
                        return;
                    }
                }
                dequeued = self.inner.push_queue.dequeue() => {
                    let (conn_id, request) = dequeued;
                    let permit = Arc::clone(&self.inner.push_semaphore)
                        .acquire_owned()
                        .await
                        .ok();
                    let guard =
                        PushGuard::new(Arc::clone(&self.inner.push_queue), conn_id.clone(), permit);
                    let event = PushEvent { request, guard };
                    match self.inner.connections.get(&conn_id) {
                        Some(connection) => {
                            if connection.deliver_push(event).await.is_err() {
                                debug!(conn = %conn_id, "connection closed during push delivery");
                            }
                        }
                        None => {
                            debug!(conn = %conn_id, "dropping push for disconnected proxy");
                        }
                    }
                }
            }
        }
    }

    // ---- per-stream session -----------------------------------------

    /// Serve one discovery stream. Generic over the receive half so
    /// tests can drive it over channels.
    pub async fn handle_stream<R>(
        &self,
        mut receiver: R,
        sender: Arc<dyn StreamSender>,
        peer_addr: String,
    ) -> Result<(), Status>
    where
        R: StreamReceiver + 'static,
    {
        // Without synced caches the snapshot would be built from empty
        // config, and reconnecting proxies would lose configuration.
        if !self.is_server_ready() {
            return Err(DiscoveryError::NotReady.into());
        }
        let _stream_guard = self.inner.shutdown.track_stream();

        let identities = match &self.inner.authenticator {
            Some(authenticator) => {
                let ctx = AuthContext {
                    peer_addr: peer_addr.clone(),
                };
                match authenticator.authenticate(&ctx) {
                    Ok(Some(ids)) => {
                        debug!(peer = %peer_addr, identities = ?ids, "authenticated stream");
                        ids
                    }
                    Ok(None) => {
                        debug!(peer = %peer_addr, "unauthenticated stream");
                        Vec::new()
                    }
                    Err(err) => {
                        warn!(peer = %peer_addr, error = %err, "stream authentication failed");
                        return Err(err.into());
                    }
                }
            }
            None => Vec::new(),
        };

        // First stream after startup builds the initial snapshot. On
        // failure the stream closes; another replica may have more luck.
        if !self.inner.env.global_push_context().init_done() {
            if let Err(err) = self.inner.env.update_push_context(None) {
                warn!(error = %err, "error reading config for initial snapshot");
                return Err(err.into());
            }
        }

        // The first message must identify the node; malicious clients
        // may omit it.
        let first = match receiver.recv().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(status) => {
                return if is_expected_stream_error(&status) {
                    info!(peer = %peer_addr, "stream terminated before first request");
                    Ok(())
                } else {
                    Err(status)
                };
            }
        };
        let node = match first.node.as_ref().filter(|n| !n.id.is_empty()) {
            Some(node) => node.clone(),
            None => return Err(DiscoveryError::MissingNodeId.into()),
        };

        let proxy = Arc::new(
            Proxy::from_node(&node.id, node.metadata.clone()).map_err(Status::from)?,
        );
        if let Some(locality) = &node.locality {
            *proxy.locality.write().expect("locality lock poisoned") =
                Some(mesh_push::Locality {
                    region: locality.region.clone(),
                    zone: locality.zone.clone(),
                    sub_zone: locality.sub_zone.clone(),
                });
        }

        if self.inner.config.enable_identity_check && !identities.is_empty() {
            if let Err(err) = check_connection_identity(
                &identities,
                &proxy.config_namespace,
                &proxy.metadata.service_account,
            ) {
                warn!(peer = %peer_addr, identities = ?identities, error = %err, "unauthorized stream");
                return Err(err.into());
            }
        }

        // Precompute the scope so the first responses see it.
        let push = self.inner.env.global_push_context();
        proxy.set_sidecar_scope(&push);

        let conn_id = self.inner.connections.next_conn_id(&node.id);
        let (connection, mut push_rx) =
            Connection::new(peer_addr, identities, conn_id, proxy, sender);
        self.inner.connections.add(Arc::clone(&connection));

        let result = self
            .serve_connection(&connection, receiver, &mut push_rx, first)
            .await;

        self.inner.connections.remove(&connection.conn_id);
        self.inner.push_queue.remove(&connection.conn_id);
        if let Some(reporter) = &self.inner.status_reporter {
            reporter.register_disconnect(&connection.conn_id, TypeUrl::PUSH_ORDER);
        }
        result
    }

    async fn serve_connection<R>(
        &self,
        connection: &Arc<Connection>,
        mut receiver: R,
        push_rx: &mut mpsc::Receiver<PushEvent>,
        first: DiscoveryRequest,
    ) -> Result<(), Status>
    where
        R: StreamReceiver + 'static,
    {
        self.process_request(connection, first).await?;

        // Receive task: reading is blocking, pushes must interleave, so
        // the wire reads move to their own task. Closing the channel
        // signals the remote side went away.
        let (req_tx, mut req_rx) = mpsc::channel::<Result<DiscoveryRequest, Status>>(1);
        let conn_id = connection.conn_id.clone();
        let peer = connection.peer_addr.clone();
        let metrics = self.inner.metrics.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(request)) => {
                        if req_tx.send(Ok(request)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        info!(conn = %conn_id, peer = %peer, "stream closed by client");
                        return;
                    }
                    Err(status) => {
                        if is_expected_stream_error(&status) {
                            info!(conn = %conn_id, peer = %peer, status = %status, "stream terminated");
                        } else {
                            error!(conn = %conn_id, peer = %peer, status = %status, "stream terminated with error");
                            metrics.record_internal_error();
                            let _ = req_tx.send(Err(status)).await;
                        }
                        return;
                    }
                }
            }
        });

        loop {
            tokio::select! {
                inbound = req_rx.recv() => match inbound {
                    Some(Ok(request)) => self.process_request(connection, request).await?,
                    Some(Err(status)) => return Err(status),
                    None => return Ok(()),
                },
                event = push_rx.recv() => match event {
                    Some(event) => {
                        let result = self.push_connection(connection, &event.request).await;
                        // Dropping the event releases the queue slot and
                        // the throttle permit.
                        drop(event);
                        if let Err(status) = result {
                            warn!(conn = %connection.conn_id, status = %status, "push failed, closing stream");
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn process_request(
        &self,
        connection: &Arc<Connection>,
        request: DiscoveryRequest,
    ) -> Result<(), Status> {
        self.inner.metrics.record_request(&request.type_url);
        if let Some(reporter) = &self.inner.status_reporter {
            reporter.register_event(
                &connection.conn_id,
                &request.type_url,
                &request.response_nonce,
            );
        }

        if !self.should_respond(connection, &request) {
            return Ok(());
        }

        let push = self.inner.env.global_push_context();
        let generator = self
            .inner
            .generators
            .resolve(&connection.proxy.metadata.generator, &request.type_url);
        let watched = connection
            .proxy
            .watched(&request.type_url)
            .unwrap_or_else(|| {
                WatchedResource::new(request.type_url.clone(), request.resource_names.clone())
            });
        let req = PushRequest {
            full: true,
            configs_updated: Default::default(),
            push: Some(Arc::clone(&push)),
            start: Instant::now(),
            reasons: Vec::new(),
        };
        self.push_xds(connection, &push, generator, &watched, &req)
            .await
    }

    /// The ack/nack decision, using the watched-resource state as the
    /// previous protocol state and the request as the current one.
    fn should_respond(&self, connection: &Arc<Connection>, request: &DiscoveryRequest) -> bool {
        let stype = TypeUrl::short_name(&request.type_url);

        // An error detail means the previous response was rejected. No
        // response; the config needs fixing first.
        if let Some(error) = &request.error_detail {
            warn!(
                xds = stype,
                conn = %connection.conn_id,
                code = error.code,
                message = %error.message,
                "client rejected configuration"
            );
            self.inner
                .metrics
                .record_nack(&request.type_url, &error.code.to_string());
            return false;
        }

        // First request for this type: initialize the watch.
        if request.response_nonce.is_empty() {
            debug!(xds = stype, conn = %connection.conn_id, "initializing watch");
            connection
                .proxy
                .init_watch(&request.type_url, request.resource_names.clone());
            return true;
        }

        let previous = connection.proxy.watched(&request.type_url);

        // A nonce with no previous state means the server restarted or
        // the proxy reconnected; respond with current resources.
        let Some(previous) = previous else {
            debug!(
                xds = stype,
                conn = %connection.conn_id,
                nonce = %request.response_nonce,
                "reconnect, reinitializing watch"
            );
            connection
                .proxy
                .init_watch(&request.type_url, request.resource_names.clone());
            return true;
        };

        // A nonce becomes stale the moment a newer one is sent.
        if request.response_nonce != previous.nonce_sent {
            debug!(
                xds = stype,
                conn = %connection.conn_id,
                received = %request.response_nonce,
                sent = %previous.nonce_sent,
                "expired nonce received"
            );
            self.inner.metrics.record_stale_nonce();
            return false;
        }

        // Nonce match: an ACK. Record it; respond only if the requested
        // resource set changed.
        let previous_names = connection.proxy.record_ack(
            &request.type_url,
            &request.version_info,
            &request.response_nonce,
            request.resource_names.clone(),
        );

        if list_equal_unordered(&previous_names, &request.resource_names) {
            debug!(
                xds = stype,
                conn = %connection.conn_id,
                version = %request.version_info,
                nonce = %request.response_nonce,
                "ack"
            );
            return false;
        }
        debug!(
            xds = stype,
            conn = %connection.conn_id,
            previous = ?previous_names,
            current = ?request.resource_names,
            "resource set changed"
        );
        true
    }

    /// Compute and send the configuration for one push event. Blocking
    /// and possibly slow for large configs.
    async fn push_connection(
        &self,
        connection: &Arc<Connection>,
        req: &PushRequest,
    ) -> Result<(), Status> {
        let Some(push) = req.push.clone() else {
            return Ok(());
        };

        if req.full {
            // A config change may make a different sidecar scope
            // applicable to this proxy.
            connection.proxy.set_sidecar_scope(&push);
        }

        if !proxy_needs_push(&connection.proxy, req) {
            debug!(conn = %connection.conn_id, "skipping push, no updates required");
            if req.full {
                // The skipped version still counts as distributed.
                self.report_all_events(&connection.conn_id, push.version(), &[]);
            }
            return Ok(());
        }

        let watched = connection.proxy.watched_ordered();
        for w in &watched {
            let generator = self
                .inner
                .generators
                .resolve(&connection.proxy.metadata.generator, &w.type_url);
            self.push_xds(connection, &push, generator, w, req).await?;
        }

        if req.full {
            let watched_types: Vec<String> =
                watched.iter().map(|w| w.type_url.clone()).collect();
            self.report_all_events(&connection.conn_id, push.version(), &watched_types);
        }
        self.inner.metrics.record_convergence(req.start.elapsed());
        Ok(())
    }

    /// Render and send one type for one connection.
    async fn push_xds(
        &self,
        connection: &Arc<Connection>,
        push: &Arc<PushContext>,
        generator: Option<Arc<dyn ResourceGenerator>>,
        watched: &WatchedResource,
        req: &PushRequest,
    ) -> Result<(), Status> {
        let Some(generator) = generator else {
            debug!(
                type_url = %TypeUrl::short_name(&watched.type_url),
                conn = %connection.conn_id,
                "no generator registered, skipping type"
            );
            return Ok(());
        };

        let started = Instant::now();
        let resources = match generator.generate(&connection.proxy, push, watched, req) {
            Ok(Some(resources)) => resources,
            Ok(None) => {
                // Nothing to send; the version still counts as applied.
                if let Some(reporter) = &self.inner.status_reporter {
                    reporter.register_event(
                        &connection.conn_id,
                        &watched.type_url,
                        push.version(),
                    );
                }
                return Ok(());
            }
            Err(err) => {
                warn!(
                    type_url = %TypeUrl::short_name(&watched.type_url),
                    conn = %connection.conn_id,
                    error = %err,
                    "generation failed, skipping type"
                );
                self.inner.metrics.record_generator_error(&watched.type_url);
                return Ok(());
            }
        };

        let count = resources.len();
        let response = DiscoveryResponse {
            version_info: push.version().to_string(),
            resources,
            type_url: watched.type_url.clone(),
            nonce: generate_nonce(),
            control_plane: Some(ControlPlane {
                identifier: self.inner.control_plane_id.clone(),
            }),
        };

        connection
            .send(response, self.inner.config.send_timeout, &self.inner.metrics)
            .await?;
        self.inner
            .metrics
            .record_push(&watched.type_url, started.elapsed());

        // Endpoint pushes are too chatty to log per response.
        if watched.type_url != TypeUrl::ENDPOINT {
            info!(
                type_url = %TypeUrl::short_name(&watched.type_url),
                conn = %connection.conn_id,
                resources = count,
                "push"
            );
        }
        Ok(())
    }

    /// Report a version as distributed for every standard type not in
    /// `except` - used when a push is skipped or for unwatched types,
    /// which effectively have the version applied.
    fn report_all_events(&self, conn_id: &str, version: &str, except: &[String]) {
        let Some(reporter) = &self.inner.status_reporter else {
            return;
        };
        for type_url in TypeUrl::PUSH_ORDER {
            if except.iter().any(|t| t == type_url) {
                continue;
            }
            reporter.register_event(conn_id, type_url, version);
        }
    }
}

/// Whether a push request is relevant to a proxy: everything is relevant
/// on unscoped changes; scoped changes consult the sidecar scope's
/// dependency set.
pub(crate) fn proxy_needs_push(proxy: &Proxy, req: &PushRequest) -> bool {
    if req.configs_updated.is_empty() {
        return true;
    }
    // Gateways are not sidecar-scoped.
    if proxy.proxy_type == ProxyType::Router {
        return true;
    }
    let Some(scope) = proxy.sidecar_scope() else {
        return true;
    };
    for key in &req.configs_updated {
        // Only kinds the scope's dependency set can reason about are
        // filtered; everything else always pushes.
        let scoped = matches!(
            key.kind,
            ConfigKind::Service
                | ConfigKind::ServiceEndpoints
                | ConfigKind::VirtualService
                | ConfigKind::DestinationRule
                | ConfigKind::Sidecar
        );
        if !scoped || scope.depends_on(key) {
            return true;
        }
    }
    false
}

/// The aggregated discovery gRPC service.
#[derive(Clone)]
pub struct AdsService {
    server: DiscoveryServer,
}

impl AdsService {
    /// Wrap a server.
    pub fn new(server: DiscoveryServer) -> Self {
        Self { server }
    }
}

/// Response stream type for the aggregated service.
pub type AdsResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

/// Delta response stream type.
pub type AdsDeltaResponseStream = ReceiverStream<Result<DeltaDiscoveryResponse, Status>>;

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream = AdsResponseStream;

    #[instrument(skip(self, request), name = "ads_stream")]
    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        if !self.server.is_server_ready() {
            return Err(DiscoveryError::NotReady.into());
        }

        let peer_addr = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let stream = request.into_inner();

        let (tx, rx) = mpsc::channel(self.server.config().stream_buffer_size);
        let sender = Arc::new(ChannelSender::new(tx));
        let server = self.server.clone();
        let failer = Arc::clone(&sender);
        tokio::spawn(async move {
            if let Err(status) = server
                .handle_stream(TonicReceiver::new(stream), sender, peer_addr)
                .await
            {
                failer.fail(status).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type DeltaAggregatedResourcesStream = AdsDeltaResponseStream;

    /// The delta protocol does not share the snapshot path and is not
    /// implemented.
    async fn delta_aggregated_resources(
        &self,
        _request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("not implemented"))
    }
}
