//! Field-by-field comparison of stored and desired target specs.

use crate::model::{BackendTarget, DerivedTargetSpec, HttpConfig};

/// Returns true when `current` must be rewritten to match `desired`.
///
/// Backend targets are compared position by position, so a reordering of
/// otherwise equal backends counts as a change.
pub fn spec_changed(current: &DerivedTargetSpec, desired: &DerivedTargetSpec) -> bool {
    current.name != desired.name
        || current.enabled != desired.enabled
        || current.protocol != desired.protocol
        || current.tunnel_ref.name != desired.tunnel_ref.name
        || current.tunnel_ref.namespace != desired.tunnel_ref.namespace
        || http_config_changed(current.http_config.as_ref(), desired.http_config.as_ref())
        || targets_changed(&current.targets, &desired.targets)
}

fn http_config_changed(current: Option<&HttpConfig>, desired: Option<&HttpConfig>) -> bool {
    match (current, desired) {
        (None, None) => false,
        (Some(c), Some(d)) => {
            c.domain_name != d.domain_name
                || c.subdomain != d.subdomain
                || c.sso != d.sso
                || c.block_access != d.block_access
        }
        _ => true,
    }
}

fn targets_changed(current: &[BackendTarget], desired: &[BackendTarget]) -> bool {
    current.len() != desired.len()
        || current.iter().zip(desired).any(|(c, d)| {
            c.ip != d.ip
                || c.port != d.port
                || c.method != d.method
                || c.path != d.path
                || c.path_match_type != d.path_match_type
                || c.priority != d.priority
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TunnelRef;

    fn backend(ip: &str, path: &str) -> BackendTarget {
        BackendTarget {
            ip: ip.into(),
            port: 80,
            method: "http".into(),
            path: path.into(),
            path_match_type: "prefix".into(),
            priority: 110,
        }
    }

    fn spec() -> DerivedTargetSpec {
        DerivedTargetSpec {
            name: "default/myapp/app.example.com".into(),
            enabled: true,
            protocol: "http".into(),
            tunnel_ref: TunnelRef {
                name: "default".into(),
                namespace: "pangolin".into(),
            },
            http_config: Some(HttpConfig {
                domain_name: "example.com".into(),
                subdomain: "app".into(),
                sso: false,
                block_access: false,
            }),
            targets: vec![
                backend("a.default.svc.cluster.local", "/a"),
                backend("b.default.svc.cluster.local", "/b"),
            ],
        }
    }

    #[test]
    fn test_identical_specs_unchanged() {
        assert!(!spec_changed(&spec(), &spec()));
    }

    #[test]
    fn test_scalar_changes_detected() {
        let base = spec();

        let mut changed = spec();
        changed.name = "other".into();
        assert!(spec_changed(&base, &changed));

        let mut changed = spec();
        changed.enabled = false;
        assert!(spec_changed(&base, &changed));

        let mut changed = spec();
        changed.protocol = "https".into();
        assert!(spec_changed(&base, &changed));

        let mut changed = spec();
        changed.tunnel_ref.namespace = "elsewhere".into();
        assert!(spec_changed(&base, &changed));
    }

    #[test]
    fn test_http_config_changes_detected() {
        let base = spec();

        let mut changed = spec();
        if let Some(http) = changed.http_config.as_mut() {
            http.sso = true;
        }
        assert!(spec_changed(&base, &changed));

        let mut changed = spec();
        changed.http_config = None;
        assert!(spec_changed(&base, &changed));
    }

    #[test]
    fn test_backend_changes_detected() {
        let base = spec();

        let mut changed = spec();
        changed.targets[1].port = 8080;
        assert!(spec_changed(&base, &changed));

        let mut changed = spec();
        changed.targets.pop();
        assert!(spec_changed(&base, &changed));
    }

    #[test]
    fn test_backend_reorder_counts_as_change() {
        let base = spec();
        let mut reordered = spec();
        reordered.targets.reverse();
        assert!(spec_changed(&base, &reordered));
    }
}
