//! Desired-state construction for one host.

use std::collections::BTreeMap;

use super::{annotations, labels, HostGroup};
use crate::error::BuildError;
use crate::host::split_host;
use crate::model::{
    BackendTarget, DerivedTarget, DerivedTargetSpec, HttpConfig, ObjectMeta, OwnerReference,
    PathRule, PathType, SourceRoute, TunnelRef,
};
use crate::naming::generate_name;
use crate::store::kinds;

/// Targets always speak HTTP to Pangolin; TLS is terminated downstream.
pub const TARGET_PROTOCOL: &str = "http";

const BASE_PRIORITY: u32 = 100;
const PRIORITY_PER_CHAR: u32 = 10;
const MAX_PRIORITY: u32 = 1000;

/// Settings taken from a route's directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub domain_name: Option<String>,
    pub subdomain: Option<String>,
    pub sso: bool,
    pub block_access: bool,
}

impl Overrides {
    pub fn from_source(source: &SourceRoute) -> Self {
        Self {
            domain_name: source.directive(annotations::DOMAIN_NAME).map(str::to_string),
            subdomain: source.directive(annotations::SUBDOMAIN).map(str::to_string),
            sso: source.directive(annotations::SSO) == Some("true"),
            block_access: source.directive(annotations::BLOCK_ACCESS) == Some("true"),
        }
    }
}

/// Builds the desired target for `group`.
///
/// The returned object carries identity labels but no owner reference;
/// see [`attach_owner`].
pub fn build_target(
    source: &SourceRoute,
    group: &HostGroup,
    tunnel: &TunnelRef,
    overrides: &Overrides,
    backend_scheme: &str,
) -> Result<DerivedTarget, BuildError> {
    let split = split_host(&group.host)?;
    let domain_name = overrides.domain_name.clone().unwrap_or(split.domain);
    let subdomain = overrides.subdomain.clone().unwrap_or(split.subdomain);

    let targets: Vec<BackendTarget> = group
        .paths
        .iter()
        .filter_map(|path| backend_target(source.namespace(), path, backend_scheme))
        .collect();
    if targets.is_empty() {
        return Err(BuildError::NoValidBackends {
            host: group.host.clone(),
        });
    }

    let mut metadata = ObjectMeta::new(
        source.namespace(),
        generate_name(source.namespace(), source.name(), &group.host),
    );
    metadata.labels = owner_labels(source);

    Ok(DerivedTarget {
        metadata,
        spec: DerivedTargetSpec {
            name: format!("{}/{}/{}", source.namespace(), source.name(), group.host),
            enabled: true,
            protocol: TARGET_PROTOCOL.to_string(),
            tunnel_ref: tunnel.clone(),
            http_config: Some(HttpConfig {
                domain_name,
                subdomain,
                sso: overrides.sso,
                block_access: overrides.block_access,
            }),
            targets,
        },
    })
}

fn backend_target(namespace: &str, path: &PathRule, scheme: &str) -> Option<BackendTarget> {
    let service = path.backend.as_ref().filter(|s| !s.name.is_empty())?;
    Some(BackendTarget {
        ip: format!("{}.{}.svc.cluster.local", service.name, namespace),
        port: service.port.number.unwrap_or(0),
        method: scheme.to_string(),
        path: path.path.clone(),
        path_match_type: path_match_type(path.path_type).to_string(),
        priority: path_priority(&path.path),
    })
}

/// Maps a path type onto Pangolin's match type. Anything but `Exact` is a prefix match.
pub fn path_match_type(path_type: Option<PathType>) -> &'static str {
    match path_type {
        Some(PathType::Exact) => "exact",
        Some(PathType::Prefix) | Some(PathType::ImplementationSpecific) | None => "prefix",
    }
}

/// Longer paths get higher priority: `min(1000, 100 + 10 * len)`.
///
/// Paths of equal length get equal priority; Pangolin then keeps
/// declaration order.
pub fn path_priority(path: &str) -> u32 {
    let len = u32::try_from(path.len()).unwrap_or(u32::MAX);
    BASE_PRIORITY
        .saturating_add(PRIORITY_PER_CHAR.saturating_mul(len))
        .min(MAX_PRIORITY)
}

/// Identity labels tying a target to its source route.
pub fn owner_labels(source: &SourceRoute) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::SOURCE_UID.to_string(), source.uid().to_string()),
        (labels::SOURCE_NAME.to_string(), source.name().to_string()),
        (
            labels::SOURCE_NAMESPACE.to_string(),
            source.namespace().to_string(),
        ),
    ])
}

/// Selector matching every target owned by `source`.
pub fn owner_selector(source: &SourceRoute) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::SOURCE_UID.to_string(), source.uid().to_string())])
}

/// Marks `source` as the controlling owner of `target` and sets identity labels.
pub fn attach_owner(target: &mut DerivedTarget, source: &SourceRoute) {
    target.metadata.labels.extend(owner_labels(source));
    target.metadata.owner_references = vec![OwnerReference {
        kind: kinds::SOURCE_ROUTE.to_string(),
        name: source.name().to_string(),
        uid: source.uid().to_string(),
        controller: true,
    }];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rule;

    fn source() -> SourceRoute {
        SourceRoute::new("default", "myapp", "uid-1").with_class("pangolin")
    }

    fn tunnel() -> TunnelRef {
        TunnelRef {
            name: "default".into(),
            namespace: "pangolin-system".into(),
        }
    }

    fn group(rule: Rule) -> HostGroup {
        HostGroup {
            host: rule.host.clone(),
            paths: rule.paths,
        }
    }

    fn build(source: &SourceRoute, rule: Rule) -> Result<DerivedTarget, BuildError> {
        build_target(
            source,
            &group(rule),
            &tunnel(),
            &Overrides::from_source(source),
            "http",
        )
    }

    #[test]
    fn test_build_basic_target() {
        let target = build(
            &source(),
            Rule::new("app.example.com").path("/", "svc-a", 80),
        )
        .unwrap();

        assert_eq!(target.metadata.name, "pic-default-myapp-a03c4624");
        assert_eq!(target.metadata.namespace, "default");
        assert_eq!(target.spec.name, "default/myapp/app.example.com");
        assert!(target.spec.enabled);
        assert_eq!(target.spec.protocol, "http");
        assert_eq!(target.spec.tunnel_ref, tunnel());

        let http = target.spec.http_config.as_ref().unwrap();
        assert_eq!(http.domain_name, "example.com");
        assert_eq!(http.subdomain, "app");
        assert!(!http.sso);
        assert!(!http.block_access);

        assert_eq!(
            target.spec.targets,
            vec![BackendTarget {
                ip: "svc-a.default.svc.cluster.local".into(),
                port: 80,
                method: "http".into(),
                path: "/".into(),
                path_match_type: "prefix".into(),
                priority: 110,
            }]
        );
    }

    #[test]
    fn test_identity_labels() {
        let target = build(&source(), Rule::new("app.example.com").path("/", "a", 80)).unwrap();
        assert_eq!(target.label(labels::SOURCE_UID), Some("uid-1"));
        assert_eq!(target.label(labels::SOURCE_NAME), Some("myapp"));
        assert_eq!(target.label(labels::SOURCE_NAMESPACE), Some("default"));
    }

    #[test]
    fn test_directive_overrides_win() {
        let source = source()
            .with_annotation(annotations::DOMAIN_NAME, "corp.example.net")
            .with_annotation(annotations::SUBDOMAIN, "myapp")
            .with_annotation(annotations::SSO, "true")
            .with_annotation(annotations::BLOCK_ACCESS, "true");

        let target = build(
            &source,
            Rule::new("internal.corp.example.com").path("/", "a", 80),
        )
        .unwrap();

        let http = target.spec.http_config.unwrap();
        assert_eq!(http.domain_name, "corp.example.net");
        assert_eq!(http.subdomain, "myapp");
        assert!(http.sso);
        assert!(http.block_access);
    }

    #[test]
    fn test_apex_host_has_empty_subdomain() {
        let target = build(&source(), Rule::new("example.com").path("/", "a", 80)).unwrap();
        assert_eq!(target.spec.http_config.unwrap().subdomain, "");
    }

    #[test]
    fn test_invalid_hosts_rejected() {
        for host in ["*.example.com", "10.0.0.1"] {
            let err = build(&source(), Rule::new(host).path("/", "a", 80)).unwrap_err();
            assert!(matches!(err, BuildError::InvalidHost { .. }), "{host}");
        }
    }

    #[test]
    fn test_paths_without_backend_are_dropped() {
        let target = build(
            &source(),
            Rule::new("app.example.com")
                .path_without_backend("/static")
                .path("/api", "api", 8080),
        )
        .unwrap();
        assert_eq!(target.spec.targets.len(), 1);
        assert_eq!(target.spec.targets[0].path, "/api");
    }

    #[test]
    fn test_no_valid_backends() {
        let err = build(
            &source(),
            Rule::new("app.example.com").path_without_backend("/"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            BuildError::NoValidBackends {
                host: "app.example.com".into()
            }
        );
    }

    #[test]
    fn test_match_type_mapping() {
        assert_eq!(path_match_type(Some(PathType::Exact)), "exact");
        assert_eq!(path_match_type(Some(PathType::Prefix)), "prefix");
        assert_eq!(
            path_match_type(Some(PathType::ImplementationSpecific)),
            "prefix"
        );
        assert_eq!(path_match_type(None), "prefix");
    }

    #[test]
    fn test_priority_grows_with_length_and_caps() {
        assert_eq!(path_priority(""), 100);
        assert_eq!(path_priority("/"), 110);
        assert_eq!(path_priority("/v1"), 130);
        assert_eq!(path_priority(&"/x".repeat(45)), 1000);
        // Equal length, different content: same priority.
        assert_eq!(path_priority("/abc"), path_priority("/xyz"));
    }

    #[test]
    fn test_named_port_becomes_zero() {
        let mut rule = Rule::new("app.example.com").path("/", "a", 80);
        if let Some(backend) = rule.paths[0].backend.as_mut() {
            backend.port.number = None;
            backend.port.name = Some("http".into());
        }
        let target = build(&source(), rule).unwrap();
        assert_eq!(target.spec.targets[0].port, 0);
    }

    #[test]
    fn test_backend_scheme_is_applied() {
        let source = source();
        let target = build_target(
            &source,
            &group(Rule::new("app.example.com").path("/", "a", 443)),
            &tunnel(),
            &Overrides::default(),
            "https",
        )
        .unwrap();
        assert_eq!(target.spec.targets[0].method, "https");
    }

    #[test]
    fn test_attach_owner() {
        let source = source();
        let mut target = build(&source, Rule::new("app.example.com").path("/", "a", 80)).unwrap();
        attach_owner(&mut target, &source);

        assert_eq!(target.metadata.owner_references.len(), 1);
        let owner = &target.metadata.owner_references[0];
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.kind, kinds::SOURCE_ROUTE);
        assert!(owner.controller);
        assert!(target.metadata.matches_labels(&owner_selector(&source)));
    }
}
