//! Ingress-style source route.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ObjectKey, ObjectMeta};

/// Ingress-style object declaring hosts and their path-to-backend rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRoute {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SourceRouteSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRouteSpec {
    /// Class used to decide whether this controller manages the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Paths served for one host. Several rules may name the same host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub paths: Vec<PathRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<PathType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<ServiceBackend>,
}

/// How a path is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathType {
    Exact,
    Prefix,
    ImplementationSpecific,
}

/// Reference to an in-namespace service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBackend {
    pub name: String,
    #[serde(default)]
    pub port: BackendPort,
}

/// Service port, by number or by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SourceRoute {
    /// Creates an empty route with the given identity.
    pub fn new(namespace: &str, name: &str, uid: &str) -> Self {
        let mut metadata = ObjectMeta::new(namespace, name);
        metadata.uid = uid.to_string();
        Self {
            metadata,
            spec: SourceRouteSpec::default(),
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.spec.ingress_class_name = Some(class.to_string());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .annotations
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.spec.rules.push(rule);
        self
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// Class name, empty when unset.
    pub fn class(&self) -> &str {
        self.spec.ingress_class_name.as_deref().unwrap_or("")
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.metadata.annotations
    }

    /// Returns the annotation value if present and non-empty.
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl Rule {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            paths: Vec::new(),
        }
    }

    /// Appends a `Prefix` path to a numbered service port.
    pub fn path(self, path: &str, service: &str, port: u16) -> Self {
        self.typed_path(path, Some(PathType::Prefix), service, port)
    }

    pub fn typed_path(
        mut self,
        path: &str,
        path_type: Option<PathType>,
        service: &str,
        port: u16,
    ) -> Self {
        self.paths.push(PathRule {
            path: path.to_string(),
            path_type,
            backend: Some(ServiceBackend {
                name: service.to_string(),
                port: BackendPort {
                    number: Some(port),
                    name: None,
                },
            }),
        });
        self
    }

    /// Appends a path that references no backend.
    pub fn path_without_backend(mut self, path: &str) -> Self {
        self.paths.push(PathRule {
            path: path.to_string(),
            path_type: Some(PathType::Prefix),
            backend: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_ignores_empty_values() {
        let route = SourceRoute::new("default", "app", "uid-1")
            .with_annotation("a", "")
            .with_annotation("b", "value");

        assert_eq!(route.directive("a"), None);
        assert_eq!(route.directive("b"), Some("value"));
        assert_eq!(route.directive("c"), None);
    }

    #[test]
    fn test_deserialize_route_json() {
        let json = r#"{
            "metadata": {"namespace": "default", "name": "myapp", "uid": "u1"},
            "spec": {
                "ingressClassName": "pangolin",
                "rules": [
                    {"host": "app.example.com", "paths": [
                        {"path": "/", "pathType": "Prefix",
                         "backend": {"name": "svc-a", "port": {"number": 80}}}
                    ]},
                    {"paths": []}
                ]
            }
        }"#;

        let route: SourceRoute = serde_json::from_str(json).unwrap();
        assert_eq!(route.class(), "pangolin");
        assert_eq!(route.spec.rules.len(), 2);
        assert_eq!(route.spec.rules[1].host, "");
        let path = &route.spec.rules[0].paths[0];
        assert_eq!(path.path_type, Some(PathType::Prefix));
        assert_eq!(path.backend.as_ref().unwrap().port.number, Some(80));
    }
}
