//! Immutable route table snapshots.
//!
//! # Responsibilities
//! - Hold routes grouped by virtual host
//! - Index targets by hostname alone for SNI routing
//! - Produce successor tables for added and deleted targets
//! - Report the metric identifiers implied by the current routes
//!
//! # Design Decisions
//! - A `Table` is never mutated; every change returns a new one
//! - Successors share untouched host buckets through `Arc`, copying only the
//!   bucket being changed
//! - Routes within a host are ordered longest path first so the first prefix
//!   match is the most specific

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::load_balancer::{LoadBalancer, WeightedRandom};
use crate::observability::metrics::{MetricsRegistry, Timer};
use crate::routing::matcher::{normalize_host, path_matches};
use crate::routing::name::target_name;

/// Errors rejecting a table mutation. The table is left unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid weight {weight} for {service} -> {target}: must be a positive 32-bit integer")]
    InvalidWeight {
        service: String,
        target: String,
        weight: i64,
    },

    #[error("invalid target {0:?}: expected a URL or host:port")]
    InvalidTarget(String),
}

/// Input to [`Table::add_route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub service: String,
    pub host: String,
    pub path: String,
    /// Upstream URL (`http://10.0.0.1:8080`) or bare `host:port`.
    pub target: String,
    pub weight: i64,
    pub tags: Vec<String>,
}

impl RouteDef {
    pub fn new(
        service: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            host: host.into(),
            path: path.into(),
            target: target.into(),
            weight: 1,
            tags: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&crate::config::RouteConfig> for RouteDef {
    fn from(config: &crate::config::RouteConfig) -> Self {
        Self {
            service: config.service.clone(),
            host: config.host.clone(),
            path: config.path.clone(),
            target: config.target.clone(),
            weight: config.weight,
            tags: config.tags.clone(),
        }
    }
}

/// Split a target into its optional URL form and its `host:port` address.
pub fn parse_target(target: &str) -> Result<(Option<Url>, String), RouteError> {
    let invalid = || RouteError::InvalidTarget(target.to_string());

    if target.contains("://") {
        let url = Url::parse(target).map_err(|_| invalid())?;
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = url.port_or_known_default().ok_or_else(invalid)?;
        let address = format!("{host}:{port}");
        return Ok((Some(url), address));
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok((None, target.to_string()))
        }
        _ => Err(invalid()),
    }
}

/// A single upstream endpoint.
#[derive(Debug, Clone)]
pub struct Target {
    pub service: String,
    /// `host:port` to dial.
    pub address: String,
    /// The target as a URL, when it was given as one.
    pub url: Option<Url>,
    pub weight: u32,
    pub tags: Vec<String>,
    /// Metric identifier of this target.
    pub metric_name: String,
    /// Timer acquired from the registry when the target was inserted.
    pub timer: Arc<dyn Timer>,
}

impl Target {
    /// Scheme to use when forwarding HTTP to this target.
    pub fn scheme(&self) -> &str {
        self.url.as_ref().map(Url::scheme).unwrap_or("http")
    }
}

/// A forwarding rule: service, host and path prefix with weighted targets.
#[derive(Debug, Clone)]
pub struct Route {
    pub service: String,
    /// Host as first given; the table keys it normalized.
    pub host: String,
    pub path: String,
    pub targets: Vec<Arc<Target>>,
}

impl Route {
    fn is_same(&self, service: &str, path: &str) -> bool {
        self.service == service && self.path == path
    }
}

/// The full routing state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Routes by normalized host, longest path first.
    hosts: HashMap<String, Arc<Vec<Route>>>,
    /// Every target under a host, regardless of path.
    by_hostname: HashMap<String, Arc<Vec<Arc<Target>>>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a list of routes in order.
    pub fn from_routes<'a, I>(registry: &dyn MetricsRegistry, defs: I) -> Result<Self, RouteError>
    where
        I: IntoIterator<Item = &'a RouteDef>,
    {
        defs
            .into_iter()
            .try_fold(Self::new(), |table, def| table.add_route(registry, def))
    }

    /// Return a successor table with the target added to its route.
    ///
    /// A target with the same address already on the route is replaced, so
    /// re-adding updates weight and tags.
    pub fn add_route(&self, registry: &dyn MetricsRegistry, def: &RouteDef) -> Result<Self, RouteError> {
        let weight = u32::try_from(def.weight)
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| RouteError::InvalidWeight {
                service: def.service.clone(),
                target: def.target.clone(),
                weight: def.weight,
            })?;
        let (url, address) = parse_target(&def.target)?;
        let host = normalize_host(&def.host);

        // Metric ids use the host as given; only bucket keys are normalized.
        let metric_name = target_name(&def.service, &def.host, &def.path, &address);
        let target = Arc::new(Target {
            service: def.service.clone(),
            timer: registry.timer(&metric_name),
            address,
            url,
            weight,
            tags: def.tags.clone(),
            metric_name,
        });

        let mut routes = self.bucket(&host);
        match routes.iter_mut().find(|r| r.is_same(&def.service, &def.path)) {
            Some(route) => match route.targets.iter_mut().find(|t| t.address == target.address) {
                Some(existing) => *existing = target,
                None => route.targets.push(target),
            },
            None => routes.push(Route {
                service: def.service.clone(),
                host: def.host.clone(),
                path: def.path.clone(),
                targets: vec![target],
            }),
        }

        Ok(self.with_bucket(host, routes))
    }

    /// Return a successor table without the given target.
    ///
    /// Routes left without targets and hosts left without routes are dropped.
    /// Deleting something that isn't there yields an equivalent table.
    pub fn del_route(&self, service: &str, host: &str, path: &str, target: &str) -> Self {
        let address = match parse_target(target) {
            Ok((_, address)) => address,
            Err(_) => target.to_string(),
        };
        let host = normalize_host(host);

        let mut routes = self.bucket(&host);
        for route in routes.iter_mut().filter(|r| r.is_same(service, path)) {
            route.targets.retain(|t| t.address != address);
        }
        routes.retain(|r| !r.targets.is_empty());

        self.with_bucket(host, routes)
    }

    /// Pick a target for an SNI hostname, ignoring paths.
    pub fn lookup_host(&self, hostname: &str) -> Option<Arc<Target>> {
        WeightedRandom.next_server(self.host_targets(&normalize_host(hostname)))
    }

    /// Pick a target for an HTTP request by host and path prefix.
    ///
    /// Falls back to routes registered without a host.
    pub fn lookup(&self, host: &str, path: &str) -> Option<Arc<Target>> {
        let host = normalize_host(host);
        [host.as_str(), ""]
            .iter()
            .filter_map(|h| self.hosts.get(*h))
            .flat_map(|routes| routes.iter())
            .find(|route| path_matches(&route.path, path))
            .and_then(|route| WeightedRandom.next_server(&route.targets))
    }

    /// All targets registered under a normalized host.
    pub fn host_targets(&self, host: &str) -> &[Arc<Target>] {
        self.by_hostname
            .get(host)
            .map(|targets| targets.as_slice())
            .unwrap_or(&[])
    }

    /// Metric identifiers implied by this table.
    pub fn metric_names(&self) -> BTreeSet<String> {
        self.targets().map(|t| t.metric_name.clone()).collect()
    }

    /// All routes, ordered by host then path.
    pub fn routes(&self) -> Vec<&Route> {
        let mut hosts: Vec<&String> = self.hosts.keys().collect();
        hosts.sort();
        hosts
            .into_iter()
            .flat_map(|h| self.hosts[h].iter())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn targets(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.hosts
            .values()
            .flat_map(|routes| routes.iter())
            .flat_map(|route| route.targets.iter())
    }

    /// Private copy of one host's routes.
    fn bucket(&self, host: &str) -> Vec<Route> {
        self.hosts
            .get(host)
            .map(|routes| routes.as_ref().clone())
            .unwrap_or_default()
    }

    /// Successor table with one host bucket replaced and its index rebuilt.
    fn with_bucket(&self, host: String, mut routes: Vec<Route>) -> Self {
        let mut next = self.clone();
        if routes.is_empty() {
            next.hosts.remove(&host);
            next.by_hostname.remove(&host);
            return next;
        }

        routes.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.service.cmp(&b.service))
        });

        if host.is_empty() {
            next.by_hostname.remove(&host);
        } else {
            let targets: Vec<Arc<Target>> = routes
                .iter()
                .flat_map(|r| r.targets.iter().cloned())
                .collect();
            next.by_hostname.insert(host.clone(), Arc::new(targets));
        }
        next.hosts.insert(host, Arc::new(routes));
        next
    }
}

impl fmt::Display for Table {
    /// One `route add` line per target.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for route in self.routes() {
            for t in &route.targets {
                let target = t.url.as_ref().map(Url::as_str).unwrap_or(&t.address);
                write!(
                    f,
                    "route add {} {}{} {} weight {}",
                    route.service, route.host, route.path, target, t.weight
                )?;
                if !t.tags.is_empty() {
                    write!(f, " tags \"{}\"", t.tags.join(","))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::NoopRegistry;

    fn add(table: &Table, def: RouteDef) -> Table {
        table.add_route(&NoopRegistry, &def).unwrap()
    }

    #[test]
    fn parse_target_forms() {
        let (url, addr) = parse_target("http://localhost:1234").unwrap();
        assert!(url.is_some());
        assert_eq!(addr, "localhost:1234");

        let (_, addr) = parse_target("https://example.com/base").unwrap();
        assert_eq!(addr, "example.com:443");

        let (url, addr) = parse_target("10.0.0.1:8443").unwrap();
        assert!(url.is_none());
        assert_eq!(addr, "10.0.0.1:8443");

        assert!(parse_target("localhost").is_err());
        assert!(parse_target(":80").is_err());
        assert!(parse_target("host:notaport").is_err());
        assert!(parse_target("http://").is_err());
    }

    #[test]
    fn add_route_rejects_bad_weight() {
        let table = Table::new();
        for weight in [0, -1, i64::from(u32::MAX) + 1] {
            let def = RouteDef::new("svc", "a.com", "/", "10.0.0.1:80").with_weight(weight);
            assert!(matches!(
                table.add_route(&NoopRegistry, &def),
                Err(RouteError::InvalidWeight { .. })
            ));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn add_route_rejects_bad_target() {
        let def = RouteDef::new("svc", "a.com", "/", "nowhere");
        assert_eq!(
            Table::new().add_route(&NoopRegistry, &def).unwrap_err(),
            RouteError::InvalidTarget("nowhere".into())
        );
    }

    #[test]
    fn metric_name_uses_host_as_given() {
        let t = add(&Table::new(), RouteDef::new("svc", "a.com:8080", "/", "10.0.0.1:80"));
        let t = add(&t, RouteDef::new("svc", "b.com.", "/", "10.0.0.1:80"));
        assert_eq!(
            t.metric_names().into_iter().collect::<Vec<_>>(),
            vec!["svc.a_com_8080./.10_0_0_1_80", "svc.b_com_./.10_0_0_1_80"]
        );
        assert_eq!(t.host_targets("a.com").len(), 1);

        let t = t.del_route("svc", "a.com:8080", "/", "10.0.0.1:80");
        assert_eq!(
            t.metric_names().into_iter().collect::<Vec<_>>(),
            vec!["svc.b_com_./.10_0_0_1_80"]
        );
    }

    #[test]
    fn add_route_leaves_predecessor_untouched() {
        let t1 = add(&Table::new(), RouteDef::new("svc", "a.com", "/", "10.0.0.1:80"));
        let t2 = add(&t1, RouteDef::new("svc", "a.com", "/", "10.0.0.2:80"));
        assert_eq!(t1.host_targets("a.com").len(), 1);
        assert_eq!(t2.host_targets("a.com").len(), 2);
    }

    #[test]
    fn re_adding_a_target_merges() {
        let t = add(&Table::new(), RouteDef::new("svc", "a.com", "/", "10.0.0.1:80"));
        let t = add(
            &t,
            RouteDef::new("svc", "a.com", "/", "10.0.0.1:80")
                .with_weight(5)
                .with_tags(["blue"]),
        );
        let targets = t.host_targets("a.com");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].weight, 5);
        assert_eq!(targets[0].tags, vec!["blue"]);
    }

    #[test]
    fn hostname_index_spans_paths() {
        let t = add(&Table::new(), RouteDef::new("svc-a", "A.com", "/a", "10.0.0.1:80"));
        let t = add(&t, RouteDef::new("svc-b", "a.com", "/b", "10.0.0.2:80"));
        assert_eq!(t.host_targets("a.com").len(), 2);
        assert!(t.lookup_host("A.COM.").is_some());
        assert!(t.lookup_host("b.com").is_none());
    }

    #[test]
    fn del_route_prunes_empty_routes_and_hosts() {
        let t = add(&Table::new(), RouteDef::new("svc", "a.com", "/", "http://10.0.0.1:80"));
        let t = add(&t, RouteDef::new("svc", "a.com", "/", "http://10.0.0.2:80"));

        let t = t.del_route("svc", "a.com", "/", "http://10.0.0.1:80");
        assert_eq!(t.host_targets("a.com").len(), 1);

        let t = t.del_route("svc", "a.com", "/", "10.0.0.2:80");
        assert!(t.is_empty());
        assert!(t.lookup_host("a.com").is_none());
    }

    #[test]
    fn del_missing_route_is_noop() {
        let t = add(&Table::new(), RouteDef::new("svc", "a.com", "/", "10.0.0.1:80"));
        let names = t.metric_names();

        let same = t
            .del_route("other", "a.com", "/", "10.0.0.1:80")
            .del_route("svc", "b.com", "/", "10.0.0.1:80")
            .del_route("svc", "a.com", "/x", "10.0.0.1:80")
            .del_route("svc", "a.com", "/", "10.0.0.9:80")
            .del_route("svc", "a.com", "/", "garbage");
        assert_eq!(same.metric_names(), names);
    }

    #[test]
    fn lookup_prefers_longest_prefix() {
        let t = add(&Table::new(), RouteDef::new("root", "a.com", "/", "10.0.0.1:80"));
        let t = add(&t, RouteDef::new("api", "a.com", "/api", "10.0.0.2:80"));
        let t = add(&t, RouteDef::new("any", "", "/static", "10.0.0.3:80"));

        assert_eq!(t.lookup("a.com", "/api/v1").unwrap().service, "api");
        assert_eq!(t.lookup("a.com:8080", "/index").unwrap().service, "root");
        assert_eq!(t.lookup("b.com", "/static/x.css").unwrap().service, "any");
        assert!(t.lookup("b.com", "/other").is_none());
    }

    #[test]
    fn metric_names_cover_every_target() {
        let t = add(&Table::new(), RouteDef::new("svc-a", "", "/aaa", "http://localhost:1234"));
        let t = add(&t, RouteDef::new("svc-b", "", "/bbb", "http://localhost:5678"));
        let names: Vec<_> = t.metric_names().into_iter().collect();
        assert_eq!(
            names,
            vec!["svc-a._./aaa.localhost_1234", "svc-b._./bbb.localhost_5678"]
        );
    }

    #[test]
    fn from_routes_is_all_or_nothing() {
        let good = RouteDef::new("svc", "a.com", "/", "10.0.0.1:80");
        let bad = RouteDef::new("svc", "a.com", "/", "10.0.0.2:80").with_weight(0);
        assert!(Table::from_routes(&NoopRegistry, [&good, &bad]).is_err());
        assert_eq!(
            Table::from_routes(&NoopRegistry, [&good]).unwrap().host_targets("a.com").len(),
            1
        );
    }

    #[test]
    fn display_lists_route_commands() {
        let t = add(
            &Table::new(),
            RouteDef::new("svc", "a.com", "/api", "http://10.0.0.1:80/")
                .with_weight(2)
                .with_tags(["x", "y"]),
        );
        let t = add(&t, RouteDef::new("svc", "a.com", "/", "10.0.0.2:80"));
        assert_eq!(
            t.to_string(),
            "route add svc a.com/api http://10.0.0.1/ weight 2 tags \"x,y\"\n\
             route add svc a.com/ 10.0.0.2:80 weight 1\n"
        );
    }
}
