//! Sidecar scopes: per-namespace, per-workload-selector projections over
//! the snapshot.
//!
//! A scope enumerates the services a proxy may see, the virtual-service
//! bindings that apply, and the merged destination rule per host. It also
//! carries the dependency set the dispatcher consults to skip pushes that
//! cannot affect the proxy. Scopes are immutable; they are built during
//! the sidecar-scope init pass (last, because they project over
//! everything else) and shared by reference.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mesh_core::{Config, ConfigKey, ConfigKind, ConfigSpec, Hostname, Labels, Service};

use crate::context::PushContext;

/// One parsed egress pattern: `namespace/hostname`, where the namespace
/// part may be `*` (any), `.` (own), or a literal name, and the hostname
/// part may be wildcarded.
#[derive(Clone, Debug)]
struct EgressPattern {
    namespace: String,
    host: Hostname,
}

impl EgressPattern {
    fn parse(pattern: &str) -> Option<EgressPattern> {
        let (ns, host) = pattern.split_once('/')?;
        if host.is_empty() {
            return None;
        }
        Some(EgressPattern {
            namespace: ns.to_string(),
            host: Hostname::new(host),
        })
    }

    fn matches(&self, own_namespace: &str, service: &Service) -> bool {
        let ns_ok = match self.namespace.as_str() {
            "*" => true,
            "." => service.namespace == own_namespace,
            literal => service.namespace == literal,
        };
        ns_ok && self.host.matches(&service.hostname)
    }
}

/// An immutable projection of the snapshot for one namespace (and
/// optionally one workload selector).
pub struct SidecarScope {
    /// Namespace the scope belongs to.
    pub namespace: String,
    /// The user config backing the scope; `None` for the synthesized
    /// default.
    config: Option<Arc<Config>>,
    services: Vec<Arc<Service>>,
    services_by_hostname: HashMap<Hostname, Arc<Service>>,
    destination_rules: HashMap<Hostname, Arc<Config>>,
    config_dependencies: HashSet<u64>,
    /// Default scopes see everything, so their dependency set is the
    /// whole config space.
    wildcard_dependencies: bool,
}

impl SidecarScope {
    /// The default scope for a namespace: every visible service, every
    /// config relevant.
    pub fn default_for_namespace(ps: &PushContext, namespace: &str) -> SidecarScope {
        let services = ps.services_visible_to(namespace);
        Self::build(ps, namespace, None, services, true)
    }

    /// A scope from a user sidecar config. Egress patterns restrict the
    /// visible service set; no patterns means everything visible to the
    /// namespace.
    pub fn from_config(ps: &PushContext, config: Arc<Config>) -> SidecarScope {
        let namespace = config.meta.namespace.clone();
        let candidates = ps.services_visible_to(&namespace);

        let patterns: Vec<EgressPattern> = match &config.spec {
            ConfigSpec::Sidecar(spec) => spec
                .egress
                .iter()
                .flat_map(|listener| listener.hosts.iter())
                .filter_map(|pattern| EgressPattern::parse(pattern))
                .collect(),
            _ => Vec::new(),
        };

        let services: Vec<Arc<Service>> = if patterns.is_empty() {
            candidates
        } else {
            candidates
                .into_iter()
                .filter(|svc| patterns.iter().any(|p| p.matches(&namespace, svc)))
                .collect()
        };

        Self::build(ps, &namespace, Some(config), services, false)
    }

    fn build(
        ps: &PushContext,
        namespace: &str,
        config: Option<Arc<Config>>,
        services: Vec<Arc<Service>>,
        wildcard_dependencies: bool,
    ) -> SidecarScope {
        let mut services_by_hostname = HashMap::with_capacity(services.len());
        let mut destination_rules = HashMap::new();
        let mut config_dependencies = HashSet::new();

        if let Some(config) = &config {
            config_dependencies.insert(config.key().hash_code());
        }

        for service in &services {
            services_by_hostname.insert(service.hostname.clone(), Arc::clone(service));
            config_dependencies.insert(
                ConfigKey::new(
                    ConfigKind::Service,
                    service.hostname.to_string(),
                    service.namespace.clone(),
                )
                .hash_code(),
            );
            // Endpoint changes for a visible service are relevant too.
            config_dependencies.insert(
                ConfigKey::new(
                    ConfigKind::ServiceEndpoints,
                    service.hostname.to_string(),
                    service.namespace.clone(),
                )
                .hash_code(),
            );

            if let Some(rule) = ps.destination_rule_for_namespace(namespace, service) {
                config_dependencies.insert(rule.key().hash_code());
                destination_rules.insert(service.hostname.clone(), rule);
            }
        }

        // Virtual services bound to the mesh gateway whose hosts overlap
        // the visible service set.
        for vs in ps.mesh_virtual_services_visible_to(namespace) {
            if let ConfigSpec::VirtualService(spec) = &vs.spec {
                let relevant = spec.hosts.iter().any(|vs_host| {
                    services
                        .iter()
                        .any(|svc| vs_host.matches(&svc.hostname) || svc.hostname.matches(vs_host))
                });
                if relevant {
                    config_dependencies.insert(vs.key().hash_code());
                }
            }
        }

        SidecarScope {
            namespace: namespace.to_string(),
            config,
            services,
            services_by_hostname,
            destination_rules,
            config_dependencies,
            wildcard_dependencies,
        }
    }

    /// Services visible through this scope.
    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    /// A visible service by hostname.
    pub fn service_for_hostname(&self, hostname: &Hostname) -> Option<Arc<Service>> {
        self.services_by_hostname.get(hostname).cloned()
    }

    /// The merged destination rule for a visible host.
    pub fn destination_rule(&self, hostname: &Hostname) -> Option<Arc<Config>> {
        self.destination_rules.get(hostname).cloned()
    }

    /// Whether this scope came from a user sidecar config.
    pub fn has_user_config(&self) -> bool {
        self.config.is_some()
    }

    /// The workload selector of the backing config, if any.
    pub fn selector(&self) -> Option<&Labels> {
        self.config
            .as_ref()
            .and_then(|c| c.meta.workload_selector.as_ref())
    }

    /// Whether a changed config is relevant to proxies using this scope.
    pub fn depends_on(&self, key: &ConfigKey) -> bool {
        self.wildcard_dependencies || self.config_dependencies.contains(&key.hash_code())
    }
}

impl std::fmt::Debug for SidecarScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarScope")
            .field("namespace", &self.namespace)
            .field("user_config", &self.has_user_config())
            .field("services", &self.services.len())
            .field("dependencies", &self.config_dependencies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Environment, MeshConfig};
    use mesh_core::{ConfigMeta, SidecarEgress, SidecarSpec, Visibility};
    use mesh_registry::MemoryStore;

    fn service_config(name: &str, ns: &str, host: &str) -> Config {
        Config {
            meta: ConfigMeta::new(ConfigKind::Service, name, ns),
            spec: ConfigSpec::Service {
                hostname: host.into(),
                ports: vec![],
                cluster_external_addresses: Default::default(),
            },
        }
    }

    fn sidecar_config(name: &str, ns: &str, hosts: Vec<&str>) -> Config {
        Config {
            meta: ConfigMeta::new(ConfigKind::Sidecar, name, ns),
            spec: ConfigSpec::Sidecar(SidecarSpec {
                egress: vec![SidecarEgress {
                    hosts: hosts.into_iter().map(String::from).collect(),
                }],
            }),
        }
    }

    fn build_env(configs: Vec<Config>) -> Environment {
        let store = MemoryStore::new();
        for c in configs {
            store.apply(c);
        }
        Environment::new(Arc::new(store), MeshConfig::default())
    }

    #[test]
    fn egress_pattern_parsing() {
        assert!(EgressPattern::parse("*/web.a.svc").is_some());
        assert!(EgressPattern::parse("no-slash").is_none());
        assert!(EgressPattern::parse("ns/").is_none());
    }

    #[test]
    fn egress_restricts_services() {
        let env = build_env(vec![
            service_config("web", "a", "web.a.svc"),
            service_config("db", "b", "db.b.svc"),
            sidecar_config("scope", "a", vec!["./web.a.svc"]),
        ]);
        let ps = env.update_push_context(None).unwrap();

        let scope = ps.sidecar_scope_for("a", &Labels::new());
        assert!(scope.has_user_config());
        let hosts: Vec<_> = scope.services().iter().map(|s| s.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["web.a.svc"]);
        assert!(scope.service_for_hostname(&"db.b.svc".into()).is_none());
    }

    #[test]
    fn wildcard_namespace_egress() {
        let env = build_env(vec![
            service_config("web", "a", "web.a.svc"),
            service_config("db", "b", "db.b.svc"),
            sidecar_config("scope", "a", vec!["*/*.svc"]),
        ]);
        let ps = env.update_push_context(None).unwrap();

        let scope = ps.sidecar_scope_for("a", &Labels::new());
        assert_eq!(scope.services().len(), 2);
    }

    #[test]
    fn default_scope_sees_everything_and_depends_on_everything() {
        let env = build_env(vec![
            service_config("web", "a", "web.a.svc"),
            service_config("db", "b", "db.b.svc"),
        ]);
        let ps = env.update_push_context(None).unwrap();

        let scope = ps.sidecar_scope_for("a", &Labels::new());
        assert!(!scope.has_user_config());
        assert_eq!(scope.services().len(), 2);
        assert!(scope.depends_on(&ConfigKey::new(
            ConfigKind::EnvoyFilter,
            "anything",
            "anywhere"
        )));
    }

    #[test]
    fn user_scope_dependency_set_is_restricted() {
        let env = build_env(vec![
            service_config("web", "a", "web.a.svc"),
            service_config("db", "b", "db.b.svc"),
            sidecar_config("scope", "a", vec!["./web.a.svc"]),
        ]);
        let ps = env.update_push_context(None).unwrap();

        let scope = ps.sidecar_scope_for("a", &Labels::new());
        assert!(scope.depends_on(&ConfigKey::new(ConfigKind::Service, "web.a.svc", "a")));
        assert!(scope.depends_on(&ConfigKey::new(
            ConfigKind::ServiceEndpoints,
            "web.a.svc",
            "a"
        )));
        assert!(!scope.depends_on(&ConfigKey::new(ConfigKind::Service, "db.b.svc", "b")));
        // The scope's own config is a dependency: editing it must push.
        assert!(scope.depends_on(&ConfigKey::new(ConfigKind::Sidecar, "scope", "a")));
    }

    #[test]
    fn selector_scope_wins_for_matching_workloads() {
        let mut selected = sidecar_config("selected", "a", vec!["./web.a.svc"]);
        selected.meta.workload_selector = Some(
            [("app".to_string(), "web".to_string())]
                .into_iter()
                .collect(),
        );
        let env = build_env(vec![
            service_config("web", "a", "web.a.svc"),
            selected,
            sidecar_config("namespace-wide", "a", vec!["*/*"]),
        ]);
        let ps = env.update_push_context(None).unwrap();

        let matching: Labels = [("app".to_string(), "web".to_string())]
            .into_iter()
            .collect();
        let scope = ps.sidecar_scope_for("a", &matching);
        assert_eq!(
            scope.config.as_ref().map(|c| c.meta.name.as_str()),
            Some("selected")
        );

        let other = ps.sidecar_scope_for("a", &Labels::new());
        assert_eq!(
            other.config.as_ref().map(|c| c.meta.name.as_str()),
            Some("namespace-wide")
        );
    }

    #[test]
    fn unknown_namespace_gets_fresh_default_scope() {
        let env = build_env(vec![service_config("web", "a", "web.a.svc")]);
        let ps = env.update_push_context(None).unwrap();

        let scope = ps.sidecar_scope_for("nowhere", &Labels::new());
        assert!(!scope.has_user_config());
        // Public services remain visible from unknown namespaces.
        assert_eq!(scope.services().len(), 1);
    }
}
