//! The push context: an immutable, internally-consistent snapshot of mesh
//! policy used to render one or more pushes.
//!
//! A context is built in one pass from the stores by [`PushContext::init_context`],
//! either fully or incrementally (reusing the previous context's indices
//! for config classes that did not change). Once built and published it
//! never mutates; new snapshots fully replace the pointer held by the
//! [`Environment`](crate::env::Environment).
//!
//! Build order matters: sidecar scopes are initialized last because they
//! project over services, virtual services, and destination rules.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use metrics::gauge;
use tracing::debug;

use mesh_core::{
    exported_to, most_specific_host_match, selector_matches, sort_most_specific, Config,
    ConfigKind, ConfigSpec, DiscoveryError, Hostname, Labels, Service, Visibility, MESH_GATEWAY,
};
use mesh_registry::ConfigStore;

use crate::env::Environment;
use crate::proxy::{Proxy, ProxyType};
use crate::request::PushRequest;
use crate::sidecar::SidecarScope;

/// Names of per-proxy push status metrics recorded during snapshot builds
/// and rendering.
pub mod status_metrics {
    /// Duplicate subsets dropped while merging destination rules for one
    /// host.
    pub const DUPLICATE_SUBSETS: &str = "push_destrule_duplicate_subsets";
    /// Virtual services rejected for a duplicated domain.
    pub const DUPLICATE_DOMAINS: &str = "push_vservice_duplicate_domain";
    /// Proxies not selected by any service.
    pub const PROXY_NO_SERVICE: &str = "push_proxy_no_service";
}

/// An event captured for one proxy during a push, surfaced on the debug
/// endpoint.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ProxyPushStatus {
    /// Proxy the event applies to.
    pub proxy: String,
    /// Human-readable message.
    pub message: String,
}

/// Destination rules for one visibility bucket, with hosts pre-sorted
/// most-specific-first so lookup is a linear scan with early exit.
#[derive(Clone, Debug, Default)]
pub struct ProcessedDestRules {
    hosts: Vec<Hostname>,
    export_to: HashMap<Hostname, Vec<Visibility>>,
    rules: HashMap<Hostname, Arc<Config>>,
}

impl ProcessedDestRules {
    fn lookup(&self, hostname: &Hostname) -> Option<&Arc<Config>> {
        most_specific_host_match(hostname, &self.hosts).and_then(|h| self.rules.get(h))
    }

    /// Hosts in match order. Exposed for scope building.
    pub fn hosts(&self) -> &[Hostname] {
        &self.hosts
    }
}

/// An immutable snapshot of mesh policy.
///
/// Field groups mirror the init passes; everything here is set during
/// `init_context` and read-only afterwards. The proxy-status map is the
/// one exception and carries its own lock.
pub struct PushContext {
    proxy_status: RwLock<HashMap<String, HashMap<String, ProxyPushStatus>>>,

    version: String,
    init_done: bool,

    root_namespace: String,
    scope_gateway_to_namespace: bool,
    default_service_export_to: HashSet<Visibility>,
    default_virtual_service_export_to: HashSet<Visibility>,
    default_destination_rule_export_to: HashSet<Visibility>,

    // Service indices.
    private_services_by_namespace: HashMap<String, Vec<Arc<Service>>>,
    public_services: Vec<Arc<Service>>,
    services_exported_to_namespace: HashMap<String, Vec<Arc<Service>>>,
    service_by_hostname: HashMap<Hostname, Arc<Service>>,
    service_by_hostname_and_namespace: HashMap<Hostname, HashMap<String, Arc<Service>>>,

    // Virtual service indices, bucketed by visibility then gateway name.
    private_virtual_services: HashMap<String, HashMap<String, Vec<Arc<Config>>>>,
    exported_virtual_services: HashMap<String, HashMap<String, Vec<Arc<Config>>>>,
    public_virtual_services: HashMap<String, Vec<Arc<Config>>>,

    // Destination rule buckets.
    namespace_local_dest_rules: HashMap<String, ProcessedDestRules>,
    exported_dest_rules_by_namespace: HashMap<String, ProcessedDestRules>,
    root_namespace_local_dest_rules: ProcessedDestRules,

    // Policy indices.
    authn_policies_by_namespace: HashMap<String, Vec<Arc<Config>>>,
    authz_policies_by_namespace: HashMap<String, Vec<Arc<Config>>>,
    envoy_filters_by_namespace: HashMap<String, Vec<Arc<Config>>>,

    // Gateways.
    gateways_by_namespace: HashMap<String, Vec<Arc<Config>>>,
    all_gateways: Vec<Arc<Config>>,

    // Sidecar scopes, initialized last.
    sidecars_by_namespace: HashMap<String, Vec<Arc<SidecarScope>>>,
}

impl PushContext {
    /// An empty, uninitialized context. Serves as the placeholder before
    /// the first build.
    pub fn empty() -> Self {
        Self {
            proxy_status: RwLock::new(HashMap::new()),
            version: String::new(),
            init_done: false,
            root_namespace: String::new(),
            scope_gateway_to_namespace: false,
            default_service_export_to: HashSet::new(),
            default_virtual_service_export_to: HashSet::new(),
            default_destination_rule_export_to: HashSet::new(),
            private_services_by_namespace: HashMap::new(),
            public_services: Vec::new(),
            services_exported_to_namespace: HashMap::new(),
            service_by_hostname: HashMap::new(),
            service_by_hostname_and_namespace: HashMap::new(),
            private_virtual_services: HashMap::new(),
            exported_virtual_services: HashMap::new(),
            public_virtual_services: HashMap::new(),
            namespace_local_dest_rules: HashMap::new(),
            exported_dest_rules_by_namespace: HashMap::new(),
            root_namespace_local_dest_rules: ProcessedDestRules::default(),
            authn_policies_by_namespace: HashMap::new(),
            authz_policies_by_namespace: HashMap::new(),
            envoy_filters_by_namespace: HashMap::new(),
            gateways_by_namespace: HashMap::new(),
            all_gateways: Vec::new(),
            sidecars_by_namespace: HashMap::new(),
        }
    }

    /// Whether the context has been initialized. Uninitialized contexts
    /// must not be pushed from.
    pub fn init_done(&self) -> bool {
        self.init_done
    }

    /// The snapshot version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The mesh root namespace.
    pub fn root_namespace(&self) -> &str {
        &self.root_namespace
    }

    /// Initialize the context from the environment.
    ///
    /// Called at most once per snapshot; repeated calls are no-ops. A
    /// missing or uninitialized `old` context, a missing request, or an
    /// empty configs-updated set forces a full build; otherwise only the
    /// index classes affected by the updated kinds are rebuilt and the
    /// rest are copied from `old`.
    pub fn init_context(
        &mut self,
        env: &Environment,
        old: Option<&PushContext>,
        req: Option<&PushRequest>,
    ) -> Result<(), DiscoveryError> {
        if self.init_done {
            return Ok(());
        }

        let mesh = env.mesh();
        self.version = env.next_version();
        self.root_namespace = mesh.root_namespace.clone();
        self.scope_gateway_to_namespace = mesh.scope_gateway_to_namespace;
        // Export defaults must be in place before the registry passes
        // run; they resolve empty exportTo sets.
        self.default_service_export_to = mesh.default_service_export_to.clone();
        self.default_virtual_service_export_to = mesh.default_virtual_service_export_to.clone();
        self.default_destination_rule_export_to =
            mesh.default_destination_rule_export_to.clone();

        match (old, req) {
            (Some(old), Some(req)) if !req.configs_updated.is_empty() => {
                self.update_context(env, old, req)?;
            }
            _ => {
                self.create_new_context(env)?;
            }
        }

        self.init_done = true;
        Ok(())
    }

    fn create_new_context(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.init_service_registry(env)?;
        self.init_virtual_services(env)?;
        self.init_destination_rules(env)?;
        self.init_authn_policies(env)?;
        self.init_authz_policies(env)?;
        self.init_envoy_filters(env)?;
        self.init_gateways(env)?;
        // Must run last: scopes project over everything above.
        self.init_sidecar_scopes(env)?;
        Ok(())
    }

    fn update_context(
        &mut self,
        env: &Environment,
        old: &PushContext,
        req: &PushRequest,
    ) -> Result<(), DiscoveryError> {
        let mut services_changed = false;
        let mut virtual_services_changed = false;
        let mut destination_rules_changed = false;
        let mut gateways_changed = false;
        let mut authn_changed = false;
        let mut authz_changed = false;
        let mut filters_changed = false;
        let mut sidecars_changed = false;

        for key in &req.configs_updated {
            match key.kind {
                ConfigKind::Service | ConfigKind::ServiceEndpoints | ConfigKind::WorkloadEntry => {
                    services_changed = true;
                }
                ConfigKind::VirtualService => virtual_services_changed = true,
                ConfigKind::DestinationRule => destination_rules_changed = true,
                ConfigKind::Gateway => gateways_changed = true,
                ConfigKind::Sidecar => sidecars_changed = true,
                ConfigKind::EnvoyFilter => filters_changed = true,
                ConfigKind::AuthnPolicy => authn_changed = true,
                ConfigKind::AuthzPolicy => authz_changed = true,
                // gateway-API objects translate into both virtual
                // services and gateways.
                ConfigKind::HttpRoute
                | ConfigKind::TcpRoute
                | ConfigKind::KubeGateway
                | ConfigKind::GatewayClass => {
                    virtual_services_changed = true;
                    gateways_changed = true;
                }
                // Secrets do not feed any snapshot index.
                ConfigKind::Secret => {}
            }
        }

        if services_changed {
            self.init_service_registry(env)?;
        } else {
            self.private_services_by_namespace = old.private_services_by_namespace.clone();
            self.public_services = old.public_services.clone();
            self.services_exported_to_namespace = old.services_exported_to_namespace.clone();
            self.service_by_hostname = old.service_by_hostname.clone();
            self.service_by_hostname_and_namespace =
                old.service_by_hostname_and_namespace.clone();
        }

        if virtual_services_changed {
            self.init_virtual_services(env)?;
        } else {
            self.private_virtual_services = old.private_virtual_services.clone();
            self.exported_virtual_services = old.exported_virtual_services.clone();
            self.public_virtual_services = old.public_virtual_services.clone();
        }

        if destination_rules_changed {
            self.init_destination_rules(env)?;
        } else {
            self.namespace_local_dest_rules = old.namespace_local_dest_rules.clone();
            self.exported_dest_rules_by_namespace =
                old.exported_dest_rules_by_namespace.clone();
            self.root_namespace_local_dest_rules =
                old.root_namespace_local_dest_rules.clone();
        }

        if authn_changed {
            self.init_authn_policies(env)?;
        } else {
            self.authn_policies_by_namespace = old.authn_policies_by_namespace.clone();
        }

        if authz_changed {
            self.init_authz_policies(env)?;
        } else {
            self.authz_policies_by_namespace = old.authz_policies_by_namespace.clone();
        }

        if filters_changed {
            self.init_envoy_filters(env)?;
        } else {
            self.envoy_filters_by_namespace = old.envoy_filters_by_namespace.clone();
        }

        if gateways_changed {
            self.init_gateways(env)?;
        } else {
            self.gateways_by_namespace = old.gateways_by_namespace.clone();
            self.all_gateways = old.all_gateways.clone();
        }

        // Sidecar scopes depend on services, virtual services, and
        // destination rules, so any of those invalidates them.
        if services_changed
            || virtual_services_changed
            || destination_rules_changed
            || sidecars_changed
        {
            self.init_sidecar_scopes(env)?;
        } else {
            self.sidecars_by_namespace = old.sidecars_by_namespace.clone();
        }

        Ok(())
    }

    // ---- init passes -------------------------------------------------

    fn init_service_registry(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.private_services_by_namespace.clear();
        self.public_services.clear();
        self.services_exported_to_namespace.clear();
        self.service_by_hostname.clear();
        self.service_by_hostname_and_namespace.clear();

        let configs = env.store().list(ConfigKind::Service, None)?;
        let mut services: Vec<Arc<Service>> = configs
            .iter()
            .filter_map(|c| match &c.spec {
                ConfigSpec::Service {
                    hostname,
                    ports,
                    cluster_external_addresses,
                } => Some(Arc::new(Service {
                    hostname: hostname.clone(),
                    namespace: c.meta.namespace.clone(),
                    ports: ports.clone(),
                    export_to: c.meta.export_to.clone(),
                    creation_time: c.meta.creation_time,
                    cluster_external_addresses: cluster_external_addresses
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                })),
                _ => None,
            })
            .collect();
        // Creation-time order keeps conflict resolution deterministic.
        services.sort_by(|a, b| a.creation_time.cmp(&b.creation_time));

        for service in services {
            let ns = service.namespace.clone();
            if service.export_to.contains(&Visibility::None) {
                // Visible nowhere: excluded from every index.
                continue;
            }

            if service.export_to.is_empty() {
                if self.default_service_export_to.contains(&Visibility::Private) {
                    self.private_services_by_namespace
                        .entry(ns.clone())
                        .or_default()
                        .push(Arc::clone(&service));
                } else if self.default_service_export_to.contains(&Visibility::Public) {
                    self.public_services.push(Arc::clone(&service));
                }
            } else if service.export_to.contains(&Visibility::Public) {
                // Public wins; other entries are ignored.
                self.public_services.push(Arc::clone(&service));
            } else {
                let mut private_added = false;
                for vis in &service.export_to {
                    match vis {
                        Visibility::Private => {
                            if !private_added {
                                private_added = true;
                                self.private_services_by_namespace
                                    .entry(ns.clone())
                                    .or_default()
                                    .push(Arc::clone(&service));
                            }
                        }
                        Visibility::Namespace(target) if *target == ns => {
                            // Naming the owning namespace is effectively
                            // private.
                            if !private_added {
                                private_added = true;
                                self.private_services_by_namespace
                                    .entry(ns.clone())
                                    .or_default()
                                    .push(Arc::clone(&service));
                            }
                        }
                        Visibility::Namespace(target) => {
                            self.services_exported_to_namespace
                                .entry(target.clone())
                                .or_default()
                                .push(Arc::clone(&service));
                        }
                        _ => {}
                    }
                }
            }

            self.service_by_hostname_and_namespace
                .entry(service.hostname.clone())
                .or_default()
                .insert(ns, Arc::clone(&service));
            self.service_by_hostname
                .insert(service.hostname.clone(), service);
        }

        Ok(())
    }

    fn init_virtual_services(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.private_virtual_services.clear();
        self.exported_virtual_services.clear();
        self.public_virtual_services.clear();

        let mut configs = env.store().list(ConfigKind::VirtualService, None)?;
        configs.sort_by(|a, b| a.meta.creation_time.cmp(&b.meta.creation_time));

        for config in configs {
            let spec = match &config.spec {
                ConfigSpec::VirtualService(spec) => spec,
                _ => continue,
            };
            let ns = config.meta.namespace.clone();
            let gateways: Vec<String> = spec
                .bound_gateways()
                .iter()
                .map(|g| qualify_gateway(&ns, g))
                .collect();
            let export = &config.meta.export_to;

            if export.contains(&Visibility::None) {
                continue;
            }

            let public = if export.is_empty() {
                self.default_virtual_service_export_to
                    .contains(&Visibility::Public)
            } else {
                export.contains(&Visibility::Public)
            };

            if public {
                for gw in &gateways {
                    self.public_virtual_services
                        .entry(gw.clone())
                        .or_default()
                        .push(Arc::clone(&config));
                }
                continue;
            }

            let mut private_added = false;
            let entries: Vec<Visibility> = if export.is_empty() {
                vec![Visibility::Private]
            } else {
                export.clone()
            };
            for vis in entries {
                match vis {
                    Visibility::Private => {
                        if !private_added {
                            private_added = true;
                            add_by_gateway(
                                self.private_virtual_services.entry(ns.clone()).or_default(),
                                &gateways,
                                &config,
                            );
                        }
                    }
                    Visibility::Namespace(target) if target == ns => {
                        if !private_added {
                            private_added = true;
                            add_by_gateway(
                                self.private_virtual_services.entry(ns.clone()).or_default(),
                                &gateways,
                                &config,
                            );
                        }
                    }
                    Visibility::Namespace(target) => {
                        add_by_gateway(
                            self.exported_virtual_services.entry(target).or_default(),
                            &gateways,
                            &config,
                        );
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn init_destination_rules(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.namespace_local_dest_rules.clear();
        self.exported_dest_rules_by_namespace.clear();
        self.root_namespace_local_dest_rules = ProcessedDestRules::default();

        let mut configs = env.store().list(ConfigKind::DestinationRule, None)?;
        // Older rules win merges.
        configs.sort_by(|a, b| a.meta.creation_time.cmp(&b.meta.creation_time));

        let mut local: HashMap<String, Vec<Arc<Config>>> = HashMap::new();
        let mut exported: HashMap<String, Vec<Arc<Config>>> = HashMap::new();
        let mut root_local: Vec<Arc<Config>> = Vec::new();

        for config in configs {
            if !matches!(config.spec, ConfigSpec::DestinationRule(_)) {
                continue;
            }
            let ns = config.meta.namespace.clone();
            let export = &config.meta.export_to;
            if export.contains(&Visibility::None) {
                continue;
            }

            // Local to the owning namespace regardless of export.
            local.entry(ns.clone()).or_default().push(Arc::clone(&config));

            let private_only = if export.is_empty() {
                !self
                    .default_destination_rule_export_to
                    .contains(&Visibility::Public)
                    && self
                        .default_destination_rule_export_to
                        .iter()
                        .all(|v| matches!(v, Visibility::Private))
            } else {
                export.iter().all(|v| match v {
                    Visibility::Private => true,
                    Visibility::Namespace(target) => *target == ns,
                    _ => false,
                })
            };

            if !private_only {
                exported
                    .entry(ns.clone())
                    .or_default()
                    .push(Arc::clone(&config));
            } else if ns == self.root_namespace {
                // A namespace-local rule in the root namespace is meant
                // for proxies in the root namespace itself.
                root_local.push(Arc::clone(&config));
            }
        }

        for (ns, rules) in local {
            let processed = self.process_dest_rules(&rules);
            self.namespace_local_dest_rules.insert(ns, processed);
        }
        for (ns, rules) in exported {
            let processed = self.process_dest_rules(&rules);
            self.exported_dest_rules_by_namespace.insert(ns, processed);
        }
        self.root_namespace_local_dest_rules = self.process_dest_rules(&root_local);

        Ok(())
    }

    /// Merge rules by host and produce a bucket with hosts in match
    /// order. The first rule for a host keeps its traffic policy and
    /// export set; later rules contribute subsets, with duplicates
    /// dropped and counted.
    fn process_dest_rules(&self, rules: &[Arc<Config>]) -> ProcessedDestRules {
        let mut out = ProcessedDestRules::default();
        for config in rules {
            let spec = match &config.spec {
                ConfigSpec::DestinationRule(spec) => spec,
                _ => continue,
            };
            let host = spec.host.clone();
            if let Some(existing) = out.rules.get(&host) {
                let merged = merge_dest_rules(existing, config, |rule_name| {
                    self.add_metric(
                        status_metrics::DUPLICATE_SUBSETS,
                        host.as_str(),
                        rule_name,
                        "duplicate subset dropped during merge",
                    );
                });
                out.rules.insert(host, Arc::new(merged));
            } else {
                out.hosts.push(host.clone());
                out.export_to
                    .insert(host.clone(), config.meta.export_to.clone());
                out.rules.insert(host, Arc::clone(config));
            }
        }
        sort_most_specific(&mut out.hosts);
        out
    }

    fn init_authn_policies(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.authn_policies_by_namespace =
            bucket_by_namespace(env.store().list(ConfigKind::AuthnPolicy, None)?);
        Ok(())
    }

    fn init_authz_policies(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.authz_policies_by_namespace =
            bucket_by_namespace(env.store().list(ConfigKind::AuthzPolicy, None)?);
        Ok(())
    }

    fn init_envoy_filters(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        let mut by_ns = bucket_by_namespace(env.store().list(ConfigKind::EnvoyFilter, None)?);
        for filters in by_ns.values_mut() {
            filters.sort_by(|a, b| {
                let pa = match &a.spec {
                    ConfigSpec::EnvoyFilter(f) => f.priority,
                    _ => 0,
                };
                let pb = match &b.spec {
                    ConfigSpec::EnvoyFilter(f) => f.priority,
                    _ => 0,
                };
                pa.cmp(&pb)
                    .then_with(|| a.meta.creation_time.cmp(&b.meta.creation_time))
                    .then_with(|| a.meta.name.cmp(&b.meta.name))
            });
        }
        self.envoy_filters_by_namespace = by_ns;
        Ok(())
    }

    fn init_gateways(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        let mut configs = env.store().list(ConfigKind::Gateway, None)?;
        configs.sort_by(|a, b| a.meta.creation_time.cmp(&b.meta.creation_time));
        self.gateways_by_namespace = bucket_by_namespace(configs.clone());
        self.all_gateways = configs;
        Ok(())
    }

    fn init_sidecar_scopes(&mut self, env: &Environment) -> Result<(), DiscoveryError> {
        self.sidecars_by_namespace.clear();

        let mut configs = env.store().list(ConfigKind::Sidecar, None)?;
        configs.sort_by(|a, b| a.meta.creation_time.cmp(&b.meta.creation_time));

        let mut by_ns: HashMap<String, Vec<Arc<SidecarScope>>> = HashMap::new();
        for config in configs {
            if !matches!(config.spec, ConfigSpec::Sidecar(_)) {
                continue;
            }
            let ns = config.meta.namespace.clone();
            let scope = Arc::new(SidecarScope::from_config(self, config));
            by_ns.entry(ns).or_default().push(scope);
        }

        // Every namespace with at least one service gets exactly one
        // default scope, unless a user config without a selector already
        // covers the namespace.
        let mut namespaces: HashSet<String> = HashSet::new();
        for by_ns_map in self.service_by_hostname_and_namespace.values() {
            namespaces.extend(by_ns_map.keys().cloned());
        }
        namespaces.extend(by_ns.keys().cloned());

        for ns in namespaces {
            let has_namespace_wide = by_ns
                .get(&ns)
                .is_some_and(|scopes| scopes.iter().any(|s| s.selector().is_none()));
            if !has_namespace_wide {
                let scope = Arc::new(SidecarScope::default_for_namespace(self, &ns));
                by_ns.entry(ns).or_default().push(scope);
            }
        }

        self.sidecars_by_namespace = by_ns;
        Ok(())
    }

    // ---- lookups -----------------------------------------------------

    /// Services visible to a proxy. A sidecar with a computed scope
    /// delegates to it; otherwise the union of the proxy-private,
    /// exported-to-proxy-namespace, and public buckets. Without a proxy,
    /// all private plus public services.
    pub fn services(&self, proxy: Option<&Proxy>) -> Vec<Arc<Service>> {
        if let Some(proxy) = proxy {
            if proxy.proxy_type == ProxyType::Sidecar {
                if let Some(scope) = proxy.sidecar_scope() {
                    return scope.services().to_vec();
                }
            }
        }

        let mut out = Vec::new();
        match proxy {
            Some(proxy) => {
                if let Some(private) = self
                    .private_services_by_namespace
                    .get(&proxy.config_namespace)
                {
                    out.extend(private.iter().cloned());
                }
                if let Some(exported) = self
                    .services_exported_to_namespace
                    .get(&proxy.config_namespace)
                {
                    out.extend(exported.iter().cloned());
                }
            }
            None => {
                for private in self.private_services_by_namespace.values() {
                    out.extend(private.iter().cloned());
                }
            }
        }
        out.extend(self.public_services.iter().cloned());
        out
    }

    /// Services visible to a namespace, ignoring sidecar scopes. Used to
    /// build the scopes themselves.
    pub(crate) fn services_visible_to(&self, namespace: &str) -> Vec<Arc<Service>> {
        let mut out = Vec::new();
        if let Some(private) = self.private_services_by_namespace.get(namespace) {
            out.extend(private.iter().cloned());
        }
        if let Some(exported) = self.services_exported_to_namespace.get(namespace) {
            out.extend(exported.iter().cloned());
        }
        out.extend(self.public_services.iter().cloned());
        out
    }

    /// Total number of indexed services.
    pub fn service_count(&self) -> usize {
        self.service_by_hostname.len()
    }

    /// The service for a hostname, following the proxy's sidecar scope
    /// when one is present.
    pub fn service_for_hostname(
        &self,
        proxy: Option<&Proxy>,
        hostname: &Hostname,
    ) -> Option<Arc<Service>> {
        if let Some(proxy) = proxy {
            if let Some(scope) = proxy.sidecar_scope() {
                return scope.service_for_hostname(hostname);
            }
        }
        self.service_by_hostname.get(hostname).cloned()
    }

    /// Virtual services bound to `gateway`, visible to the proxy:
    /// proxy-namespace-private, then exported-to-proxy-namespace, then
    /// public.
    pub fn virtual_services_for_gateway(
        &self,
        proxy: &Proxy,
        gateway: &str,
    ) -> Vec<Arc<Config>> {
        let mut out = Vec::new();
        if let Some(private) = self
            .private_virtual_services
            .get(&proxy.config_namespace)
            .and_then(|m| m.get(gateway))
        {
            out.extend(private.iter().cloned());
        }
        if let Some(exported) = self
            .exported_virtual_services
            .get(&proxy.config_namespace)
            .and_then(|m| m.get(gateway))
        {
            out.extend(exported.iter().cloned());
        }
        if let Some(public) = self.public_virtual_services.get(gateway) {
            out.extend(public.iter().cloned());
        }
        out
    }

    /// Virtual services visible to a namespace on the mesh gateway,
    /// ignoring sidecar scopes. Used to build the scopes.
    pub(crate) fn mesh_virtual_services_visible_to(&self, namespace: &str) -> Vec<Arc<Config>> {
        let mut out = Vec::new();
        if let Some(private) = self
            .private_virtual_services
            .get(namespace)
            .and_then(|m| m.get(MESH_GATEWAY))
        {
            out.extend(private.iter().cloned());
        }
        if let Some(exported) = self
            .exported_virtual_services
            .get(namespace)
            .and_then(|m| m.get(MESH_GATEWAY))
        {
            out.extend(exported.iter().cloned());
        }
        if let Some(public) = self.public_virtual_services.get(MESH_GATEWAY) {
            out.extend(public.iter().cloned());
        }
        out
    }

    /// The destination rule for a service as seen by a proxy.
    ///
    /// Search order: the proxy's sidecar scope when user-supplied; then
    /// (a) the proxy's own namespace (or the root-namespace-local bucket
    /// for proxies in the root namespace); (b) the service's owning
    /// namespace's exported bucket, subject to its export set; (c) the
    /// root namespace's exported bucket under the same check.
    pub fn destination_rule(&self, proxy: &Proxy, service: &Service) -> Option<Arc<Config>> {
        if proxy.proxy_type == ProxyType::Sidecar {
            if let Some(scope) = proxy.sidecar_scope() {
                if scope.has_user_config() {
                    return scope.destination_rule(&service.hostname);
                }
            }
        }
        self.destination_rule_for_namespace(&proxy.config_namespace, service)
    }

    /// The destination rule for a service as seen from a namespace,
    /// ignoring sidecar scopes.
    pub(crate) fn destination_rule_for_namespace(
        &self,
        client_namespace: &str,
        service: &Service,
    ) -> Option<Arc<Config>> {
        if client_namespace != self.root_namespace {
            if let Some(bucket) = self.namespace_local_dest_rules.get(client_namespace) {
                if let Some(rule) = bucket.lookup(&service.hostname) {
                    return Some(Arc::clone(rule));
                }
            }
        } else if let Some(rule) = self.root_namespace_local_dest_rules.lookup(&service.hostname)
        {
            // Namespace-local rules in the root namespace apply to
            // proxies in the root namespace itself.
            return Some(Arc::clone(rule));
        }

        if !service.namespace.is_empty() {
            if let Some(rule) = self.exported_destination_rule(
                &service.namespace,
                &service.hostname,
                client_namespace,
            ) {
                return Some(rule);
            }
        }

        self.exported_destination_rule(&self.root_namespace, &service.hostname, client_namespace)
    }

    fn exported_destination_rule(
        &self,
        owning_namespace: &str,
        hostname: &Hostname,
        client_namespace: &str,
    ) -> Option<Arc<Config>> {
        let bucket = self.exported_dest_rules_by_namespace.get(owning_namespace)?;
        let host = most_specific_host_match(hostname, &bucket.hosts)?;
        let export = bucket.export_to.get(host)?;
        if exported_to(
            export,
            owning_namespace,
            client_namespace,
            &self.default_destination_rule_export_to,
        ) {
            bucket.rules.get(host).cloned()
        } else {
            None
        }
    }

    /// Subset labels for (hostname, subset) as seen by a proxy, resolved
    /// through the destination rule.
    pub fn subset_labels(&self, proxy: &Proxy, hostname: &Hostname, subset: &str) -> Labels {
        if subset.is_empty() {
            return Labels::new();
        }
        let probe = Service::new(hostname.clone(), String::new());
        let Some(config) = self.destination_rule(proxy, &probe) else {
            return Labels::new();
        };
        if let ConfigSpec::DestinationRule(spec) = &config.spec {
            for s in &spec.subsets {
                if s.name == subset {
                    return s.labels.clone();
                }
            }
        }
        Labels::new()
    }

    /// Gateway configs applying to a proxy: selector must match the
    /// proxy's labels, and when gateway scoping is enabled only the
    /// proxy's own namespace is searched.
    pub fn gateways_for_proxy(&self, proxy: &Proxy) -> Vec<Arc<Config>> {
        let candidates: Box<dyn Iterator<Item = &Arc<Config>> + '_> =
            if self.scope_gateway_to_namespace {
                match self.gateways_by_namespace.get(&proxy.config_namespace) {
                    Some(gws) => Box::new(gws.iter()),
                    None => Box::new(std::iter::empty()),
                }
            } else {
                Box::new(self.all_gateways.iter())
            };

        candidates
            .filter(|config| match &config.spec {
                ConfigSpec::Gateway(spec) => {
                    spec.selector.is_empty() || selector_matches(&spec.selector, &proxy.labels)
                }
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// Services referenced by virtual services bound to the proxy's
    /// gateways.
    pub fn gateway_services(&self, proxy: &Proxy) -> Vec<Arc<Service>> {
        let services = self.services(Some(proxy));
        let mut referenced: HashSet<Hostname> = HashSet::new();

        for gateway in self.gateways_for_proxy(proxy) {
            let name = qualify_gateway(&gateway.meta.namespace, &gateway.meta.name);
            for vs in self.virtual_services_for_gateway(proxy, &name) {
                if let ConfigSpec::VirtualService(spec) = &vs.spec {
                    for dest in spec.destinations() {
                        referenced.insert(dest.host.clone());
                    }
                }
            }
        }

        services
            .into_iter()
            .filter(|s| referenced.contains(&s.hostname))
            .collect()
    }

    /// The authentication policy applying to a workload: a
    /// selector-matched policy in the namespace first, then a
    /// namespace-wide policy, then the root namespace policy.
    pub fn authn_policy_for(&self, namespace: &str, labels: &Labels) -> Option<Arc<Config>> {
        if let Some(policies) = self.authn_policies_by_namespace.get(namespace) {
            for policy in policies {
                if let Some(selector) = &policy.meta.workload_selector {
                    if selector_matches(selector, labels) {
                        return Some(Arc::clone(policy));
                    }
                }
            }
            if let Some(policy) = policies
                .iter()
                .find(|p| p.meta.workload_selector.is_none())
            {
                return Some(Arc::clone(policy));
            }
        }
        if namespace != self.root_namespace {
            if let Some(policies) = self.authn_policies_by_namespace.get(&self.root_namespace) {
                return policies
                    .iter()
                    .find(|p| p.meta.workload_selector.is_none())
                    .cloned();
            }
        }
        None
    }

    /// Authorization policies applying to a workload, root namespace
    /// first, each filtered by workload selector.
    pub fn authz_policies_for(&self, namespace: &str, labels: &Labels) -> Vec<Arc<Config>> {
        let mut out = Vec::new();
        if namespace != self.root_namespace {
            if let Some(policies) = self.authz_policies_by_namespace.get(&self.root_namespace) {
                out.extend(policies.iter().filter(|p| applies_to(p, labels)).cloned());
            }
        }
        if let Some(policies) = self.authz_policies_by_namespace.get(namespace) {
            out.extend(policies.iter().filter(|p| applies_to(p, labels)).cloned());
        }
        out
    }

    /// Envoy filters applying to a workload: root namespace filters
    /// first, then the workload's namespace, both selector-filtered and
    /// in priority order.
    pub fn envoy_filters_for(&self, namespace: &str, labels: &Labels) -> Vec<Arc<Config>> {
        let mut out = Vec::new();
        if namespace != self.root_namespace {
            if let Some(filters) = self.envoy_filters_by_namespace.get(&self.root_namespace) {
                out.extend(filters.iter().filter(|f| applies_to(f, labels)).cloned());
            }
        }
        if let Some(filters) = self.envoy_filters_by_namespace.get(namespace) {
            out.extend(filters.iter().filter(|f| applies_to(f, labels)).cloned());
        }
        out
    }

    /// The sidecar scope for a workload: selector-matched scopes first,
    /// then the namespace-wide scope. Namespaces unknown to the snapshot
    /// get a freshly built default scope.
    pub fn sidecar_scope_for(&self, namespace: &str, labels: &Labels) -> Arc<SidecarScope> {
        if let Some(scopes) = self.sidecars_by_namespace.get(namespace) {
            for scope in scopes {
                if let Some(selector) = scope.selector() {
                    if selector_matches(selector, labels) {
                        return Arc::clone(scope);
                    }
                }
            }
            if let Some(scope) = scopes.iter().find(|s| s.selector().is_none()) {
                return Arc::clone(scope);
            }
        }
        Arc::new(SidecarScope::default_for_namespace(self, namespace))
    }

    /// All sidecar scopes for a namespace. Exposed for the debug
    /// surface.
    pub fn sidecar_scopes(&self, namespace: &str) -> &[Arc<SidecarScope>] {
        self.sidecars_by_namespace
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ---- push status metrics ----------------------------------------

    /// Record a per-proxy event under a metric name. Generators call this
    /// to tag proxies with warnings during rendering.
    pub fn add_metric(&self, metric: &str, key: &str, proxy_id: &str, message: &str) {
        let mut status = self.proxy_status.write().expect("proxy status lock poisoned");
        status.entry(metric.to_string()).or_default().insert(
            key.to_string(),
            ProxyPushStatus {
                proxy: proxy_id.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Export the per-metric event counts as gauges. Called when the
    /// snapshot is published, which also resets the previous snapshot's
    /// counts (each snapshot starts empty).
    pub fn update_metrics(&self) {
        let status = self.proxy_status.read().expect("proxy status lock poisoned");
        for (metric, events) in status.iter() {
            gauge!("push_proxy_status", "metric" => metric.clone()).set(events.len() as f64);
        }
        debug!(version = %self.version, metrics = status.len(), "push status metrics updated");
    }

    /// The proxy-status map as JSON, for the debug endpoint.
    pub fn status_json(&self) -> serde_json::Value {
        let status = self.proxy_status.read().expect("proxy status lock poisoned");
        serde_json::to_value(&*status).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Whether a config's workload selector admits the given labels.
fn applies_to(config: &Config, labels: &Labels) -> bool {
    match &config.meta.workload_selector {
        Some(selector) => selector_matches(selector, labels),
        None => true,
    }
}

fn bucket_by_namespace(configs: Vec<Arc<Config>>) -> HashMap<String, Vec<Arc<Config>>> {
    let mut out: HashMap<String, Vec<Arc<Config>>> = HashMap::new();
    for config in configs {
        out.entry(config.meta.namespace.clone())
            .or_default()
            .push(config);
    }
    for configs in out.values_mut() {
        configs.sort_by(|a, b| a.meta.creation_time.cmp(&b.meta.creation_time));
    }
    out
}

fn add_by_gateway(
    bucket: &mut HashMap<String, Vec<Arc<Config>>>,
    gateways: &[String],
    config: &Arc<Config>,
) {
    for gw in gateways {
        bucket.entry(gw.clone()).or_default().push(Arc::clone(config));
    }
}

/// Qualify a short gateway name with the owning namespace. The reserved
/// mesh gateway and already-qualified names pass through.
pub fn qualify_gateway(namespace: &str, name: &str) -> String {
    if name == MESH_GATEWAY || name.contains('/') {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Merge a later destination rule into an earlier one for the same host.
/// The earlier rule keeps its traffic policy; subsets concatenate with
/// duplicates dropped.
fn merge_dest_rules(
    first: &Arc<Config>,
    second: &Arc<Config>,
    mut on_duplicate: impl FnMut(&str),
) -> Config {
    let mut merged = Config::clone(first);
    let (ConfigSpec::DestinationRule(base), ConfigSpec::DestinationRule(addition)) =
        (&mut merged.spec, &second.spec)
    else {
        return Config::clone(first);
    };

    let existing: HashSet<String> = base.subsets.iter().map(|s| s.name.clone()).collect();
    for subset in &addition.subsets {
        if existing.contains(&subset.name) {
            on_duplicate(&second.meta.name);
        } else {
            base.subsets.push(subset.clone());
        }
    }
    if base.traffic_policy.is_none() {
        base.traffic_policy = addition.traffic_policy.clone();
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MeshConfig;
    use crate::request::TriggerReason;
    use mesh_core::{ConfigKey, ConfigMeta, DestinationRuleSpec};
    use mesh_registry::{ConfigStore, MemoryStore};
    use std::collections::HashMap as StdHashMap;
    use std::time::{Duration, SystemTime};

    fn service_config(name: &str, ns: &str, host: &str, export: Vec<Visibility>) -> Config {
        let mut meta = ConfigMeta::new(ConfigKind::Service, name, ns);
        meta.export_to = export;
        meta.creation_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        Config {
            meta,
            spec: ConfigSpec::Service {
                hostname: host.into(),
                ports: vec![],
                cluster_external_addresses: Default::default(),
            },
        }
    }

    fn dest_rule(name: &str, ns: &str, host: &str, export: Vec<Visibility>) -> Config {
        let mut meta = ConfigMeta::new(ConfigKind::DestinationRule, name, ns);
        meta.export_to = export;
        Config {
            meta,
            spec: ConfigSpec::DestinationRule(DestinationRuleSpec {
                host: host.into(),
                traffic_policy: None,
                subsets: vec![],
            }),
        }
    }

    fn env_with(configs: Vec<Config>) -> Environment {
        let store = MemoryStore::new();
        for c in configs {
            store.apply(c);
        }
        Environment::new(Arc::new(store), MeshConfig::default())
    }

    fn built(env: &Environment) -> Arc<PushContext> {
        env.update_push_context(None).unwrap()
    }

    fn sidecar_proxy(ns: &str) -> Proxy {
        Proxy::from_node(
            &format!("sidecar~10.0.0.1~app.{ns}~{ns}.svc.cluster.local"),
            StdHashMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn service_buckets_partition_the_registry() {
        let env = env_with(vec![
            service_config("pub", "a", "pub.a.svc", vec![]),
            service_config("priv", "a", "priv.a.svc", vec![Visibility::Private]),
            service_config(
                "shared",
                "a",
                "shared.a.svc",
                vec![Visibility::Namespace("b".into())],
            ),
            service_config("hidden", "a", "hidden.a.svc", vec![Visibility::None]),
        ]);
        let ps = built(&env);

        let mut seen: HashSet<String> = HashSet::new();
        seen.extend(ps.public_services.iter().map(|s| s.hostname.to_string()));
        for list in ps.private_services_by_namespace.values() {
            seen.extend(list.iter().map(|s| s.hostname.to_string()));
        }
        for list in ps.services_exported_to_namespace.values() {
            seen.extend(list.iter().map(|s| s.hostname.to_string()));
        }

        let visible = env
            .store()
            .list(ConfigKind::Service, None)
            .unwrap()
            .iter()
            .filter(|c| !c.meta.export_to.contains(&Visibility::None))
            .count();
        assert_eq!(seen.len(), visible);
        assert!(!seen.contains("hidden.a.svc"));
        assert!(seen.contains("pub.a.svc"));
        assert!(seen.contains("priv.a.svc"));
        assert!(seen.contains("shared.a.svc"));
    }

    #[test]
    fn services_for_proxy_unions_buckets() {
        let env = env_with(vec![
            service_config("pub", "other", "pub.other.svc", vec![]),
            service_config("priv", "a", "priv.a.svc", vec![Visibility::Private]),
            service_config(
                "shared",
                "b",
                "shared.b.svc",
                vec![Visibility::Namespace("a".into())],
            ),
            service_config("locked", "b", "locked.b.svc", vec![Visibility::Private]),
        ]);
        let ps = built(&env);
        let proxy = sidecar_proxy("a");

        let hosts: HashSet<String> = ps
            .services(Some(&proxy))
            .iter()
            .map(|s| s.hostname.to_string())
            .collect();
        assert!(hosts.contains("pub.other.svc"));
        assert!(hosts.contains("priv.a.svc"));
        assert!(hosts.contains("shared.b.svc"));
        assert!(!hosts.contains("locked.b.svc"));
    }

    #[test]
    fn destination_rule_prefers_proxy_namespace() {
        let env = env_with(vec![
            service_config("web", "b", "web.b.svc", vec![]),
            dest_rule("local", "a", "web.b.svc", vec![Visibility::Private]),
            dest_rule("exported", "b", "web.b.svc", vec![]),
        ]);
        let ps = built(&env);
        let proxy = sidecar_proxy("a");
        let service = Service::new("web.b.svc", "b");

        let rule = ps.destination_rule(&proxy, &service).unwrap();
        assert_eq!(rule.meta.name, "local");
    }

    #[test]
    fn destination_rule_falls_back_to_service_namespace_export() {
        let env = env_with(vec![
            service_config("web", "b", "web.b.svc", vec![]),
            dest_rule("exported", "b", "web.b.svc", vec![]),
        ]);
        let ps = built(&env);
        let proxy = sidecar_proxy("a");
        let service = Service::new("web.b.svc", "b");

        let rule = ps.destination_rule(&proxy, &service).unwrap();
        assert_eq!(rule.meta.name, "exported");
    }

    #[test]
    fn destination_rule_export_check_blocks_other_namespaces() {
        let env = env_with(vec![
            service_config("web", "b", "web.b.svc", vec![]),
            dest_rule(
                "scoped",
                "b",
                "web.b.svc",
                vec![Visibility::Namespace("c".into())],
            ),
        ]);
        let ps = built(&env);
        let service = Service::new("web.b.svc", "b");

        let in_c = sidecar_proxy("c");
        assert!(ps.destination_rule(&in_c, &service).is_some());

        let in_a = sidecar_proxy("a");
        assert!(ps.destination_rule(&in_a, &service).is_none());
    }

    #[test]
    fn destination_rule_root_namespace_fallback() {
        let mesh = MeshConfig::default();
        let root = mesh.root_namespace.clone();
        let env = env_with(vec![
            service_config("web", "b", "web.b.svc", vec![]),
            dest_rule("mesh-wide", &root, "*.svc", vec![]),
        ]);
        let ps = built(&env);
        let proxy = sidecar_proxy("a");
        let service = Service::new("web.b.svc", "b");

        let rule = ps.destination_rule(&proxy, &service).unwrap();
        assert_eq!(rule.meta.name, "mesh-wide");
    }

    #[test]
    fn dest_rule_merge_combines_subsets() {
        use mesh_core::Subset;

        let mut first = dest_rule("one", "a", "web.a.svc", vec![]);
        if let ConfigSpec::DestinationRule(spec) = &mut first.spec {
            spec.subsets.push(Subset {
                name: "v1".into(),
                labels: Labels::new(),
            });
        }
        first.meta.creation_time = SystemTime::UNIX_EPOCH;

        let mut second = dest_rule("two", "a", "web.a.svc", vec![]);
        if let ConfigSpec::DestinationRule(spec) = &mut second.spec {
            spec.subsets.push(Subset {
                name: "v1".into(),
                labels: Labels::new(),
            });
            spec.subsets.push(Subset {
                name: "v2".into(),
                labels: Labels::new(),
            });
        }
        second.meta.creation_time = SystemTime::UNIX_EPOCH + Duration::from_secs(5);

        let env = env_with(vec![
            service_config("web", "a", "web.a.svc", vec![]),
            first,
            second,
        ]);
        let ps = built(&env);
        let proxy = sidecar_proxy("a");
        let service = Service::new("web.a.svc", "a");

        let rule = ps.destination_rule(&proxy, &service).unwrap();
        let ConfigSpec::DestinationRule(spec) = &rule.spec else {
            panic!("expected destination rule spec");
        };
        let names: Vec<_> = spec.subsets.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["v1", "v2"]);
    }

    fn vs_config(name: &str, ns: &str, gateways: Vec<&str>, export: Vec<Visibility>) -> Config {
        let mut meta = ConfigMeta::new(ConfigKind::VirtualService, name, ns);
        meta.export_to = export;
        Config {
            meta,
            spec: ConfigSpec::VirtualService(mesh_core::VirtualServiceSpec {
                hosts: vec!["web.test".into()],
                gateways: gateways.into_iter().map(String::from).collect(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn virtual_services_for_gateway_orders_private_exported_public() {
        let env = env_with(vec![
            vs_config("private", "a", vec!["a/edge"], vec![Visibility::Private]),
            vs_config(
                "exported",
                "b",
                vec!["a/edge"],
                vec![Visibility::Namespace("a".into())],
            ),
            vs_config("public", "c", vec!["a/edge"], vec![]),
        ]);
        let ps = built(&env);
        let proxy = sidecar_proxy("a");

        let names: Vec<_> = ps
            .virtual_services_for_gateway(&proxy, "a/edge")
            .iter()
            .map(|c| c.meta.name.clone())
            .collect();
        assert_eq!(names, vec!["private", "exported", "public"]);
    }

    #[test]
    fn empty_configs_updated_forces_full_rebuild() {
        let store = Arc::new(MemoryStore::new());
        store.apply(service_config("web", "a", "web.a.svc", vec![]));
        let env = Environment::new(store.clone(), MeshConfig::default());
        let first = built(&env);
        assert_eq!(first.service_count(), 1);

        // Apply a new service behind the snapshot's back, then issue an
        // incremental request with an empty set: everything rebuilds.
        store.apply(service_config("extra", "a", "extra.a.svc", vec![]));

        let req = PushRequest {
            full: false,
            configs_updated: HashSet::new(),
            push: None,
            start: std::time::Instant::now(),
            reasons: vec![TriggerReason::Unknown],
        };
        let rebuilt = env.update_push_context(Some(&req)).unwrap();
        assert_eq!(rebuilt.service_count(), 2);
    }

    #[test]
    fn incremental_rebuild_copies_unchanged_classes() {
        let env = env_with(vec![
            service_config("web", "a", "web.a.svc", vec![]),
            dest_rule("rule", "a", "web.a.svc", vec![]),
        ]);
        let first = built(&env);
        let first_service = Arc::clone(&first.public_services[0]);

        // Only destination rules changed: service indices must be
        // pointer-copied from the old context.
        let req = PushRequest::for_config(
            ConfigKey::new(ConfigKind::DestinationRule, "rule", "a"),
            TriggerReason::Config,
        );
        let second = env.update_push_context(Some(&req)).unwrap();
        assert!(Arc::ptr_eq(&second.public_services[0], &first_service));
        assert_ne!(second.version(), first.version());
    }

    #[test]
    fn default_sidecar_scope_per_service_namespace() {
        let env = env_with(vec![
            service_config("web", "a", "web.a.svc", vec![]),
            service_config("db", "b", "db.b.svc", vec![Visibility::Private]),
        ]);
        let ps = built(&env);

        for ns in ["a", "b"] {
            let defaults = ps
                .sidecar_scopes(ns)
                .iter()
                .filter(|s| !s.has_user_config())
                .count();
            assert_eq!(defaults, 1, "namespace {ns} must have one default scope");
        }
    }

    #[test]
    fn init_context_is_idempotent() {
        let env = env_with(vec![service_config("web", "a", "web.a.svc", vec![])]);
        let mut ps = PushContext::empty();
        ps.init_context(&env, None, None).unwrap();
        let version = ps.version().to_string();
        ps.init_context(&env, None, None).unwrap();
        assert_eq!(ps.version(), version);
    }

    #[test]
    fn gateway_scoping_flag_restricts_namespace() {
        let mut gw_a = ConfigMeta::new(ConfigKind::Gateway, "edge", "a");
        gw_a.creation_time = SystemTime::UNIX_EPOCH;
        let gw_b = ConfigMeta::new(ConfigKind::Gateway, "edge", "b");

        let store = MemoryStore::new();
        store.apply(Config {
            meta: gw_a,
            spec: ConfigSpec::Gateway(Default::default()),
        });
        store.apply(Config {
            meta: gw_b,
            spec: ConfigSpec::Gateway(Default::default()),
        });

        let mut mesh = MeshConfig::default();
        mesh.scope_gateway_to_namespace = true;
        let env = Environment::new(Arc::new(store), mesh);
        let ps = built(&env);

        let proxy = sidecar_proxy("a");
        let gws = ps.gateways_for_proxy(&proxy);
        assert_eq!(gws.len(), 1);
        assert_eq!(gws[0].meta.namespace, "a");
    }

    #[test]
    fn proxy_status_metrics_collect() {
        let env = env_with(vec![]);
        let ps = built(&env);
        ps.add_metric(
            status_metrics::PROXY_NO_SERVICE,
            "10.0.0.1",
            "app.a",
            "no service selected",
        );
        let json = ps.status_json();
        assert!(json
            .get(status_metrics::PROXY_NO_SERVICE)
            .and_then(|m| m.get("10.0.0.1"))
            .is_some());
    }
}
