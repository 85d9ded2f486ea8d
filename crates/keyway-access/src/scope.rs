//! Access policy scope

use serde::{Deserialize, Serialize};

/// Where an access policy applies
///
/// Serializes the way EKS reports scopes: `{"type":"cluster"}` or
/// `{"type":"namespace","namespaces":[...]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccessScope {
    /// Every namespace and cluster-scoped resource
    Cluster,
    /// Only the listed namespaces (never empty)
    Namespace {
        /// Target namespaces, deduplicated in input order
        namespaces: Vec<String>,
    },
}

impl AccessScope {
    /// Derive a scope from a comma-separated namespace list
    ///
    /// Entries are trimmed and empty entries dropped; if nothing remains the
    /// scope is the whole cluster.
    pub fn from_csv(namespaces: Option<&str>) -> Self {
        Self::from_namespaces(namespaces.into_iter().flat_map(|raw| raw.split(',')))
    }

    /// Derive a scope from individual namespace names
    pub fn from_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for ns in namespaces {
            let ns = ns.as_ref().trim();
            if !ns.is_empty() && !unique.iter().any(|u| u == ns) {
                unique.push(ns.to_string());
            }
        }

        if unique.is_empty() {
            AccessScope::Cluster
        } else {
            AccessScope::Namespace { namespaces: unique }
        }
    }

    /// Namespaces for a namespace scope, `None` for cluster scope
    pub fn namespaces(&self) -> Option<&[String]> {
        match self {
            AccessScope::Cluster => None,
            AccessScope::Namespace { namespaces } => Some(namespaces),
        }
    }

    /// Scope type as EKS names it
    pub fn type_name(&self) -> &'static str {
        match self {
            AccessScope::Cluster => "cluster",
            AccessScope::Namespace { .. } => "namespace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_namespaces_is_cluster_scope() {
        let scope = AccessScope::from_csv(None);
        assert_eq!(scope, AccessScope::Cluster);
        assert_eq!(scope.namespaces(), None);
        assert_eq!(scope.type_name(), "cluster");
    }

    #[test]
    fn test_blank_namespaces_is_cluster_scope() {
        assert_eq!(AccessScope::from_csv(Some("")), AccessScope::Cluster);
        assert_eq!(AccessScope::from_csv(Some(" , ,")), AccessScope::Cluster);
    }

    #[test]
    fn test_namespaces_are_split_and_trimmed() {
        let scope = AccessScope::from_csv(Some("team-a, team-b ,team-c"));
        assert_eq!(
            scope.namespaces(),
            Some(&["team-a".to_string(), "team-b".to_string(), "team-c".to_string()][..])
        );
        assert_eq!(scope.type_name(), "namespace");
    }

    #[test]
    fn test_single_namespace() {
        let scope = AccessScope::from_csv(Some("default"));
        assert_eq!(
            scope,
            AccessScope::Namespace {
                namespaces: vec!["default".to_string()]
            }
        );
    }

    #[test]
    fn test_duplicates_and_empty_entries_are_dropped() {
        let scope = AccessScope::from_csv(Some("a,,b,a, b"));
        assert_eq!(
            scope.namespaces(),
            Some(&["a".to_string(), "b".to_string()][..])
        );
    }

    #[test]
    fn test_serialized_shape() {
        assert_eq!(
            serde_json::to_value(AccessScope::Cluster).unwrap(),
            serde_json::json!({"type": "cluster"})
        );
        assert_eq!(
            serde_json::to_value(AccessScope::from_csv(Some("ns1"))).unwrap(),
            serde_json::json!({"type": "namespace", "namespaces": ["ns1"]})
        );
    }
}
