//! Resource identifier parsing.
//!
//! A resource path has the shape
//!
//! ```text
//! /subscriptions/{subId}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{childType}/{childName}]*
//! ```
//!
//! Empty segments are ignored, so leading, trailing and doubled slashes are
//! tolerated. The resource group name is always the 4th non-empty segment.
//!
//! # Example
//!
//! ```
//! use resource_pipeline::ResourceIdentity;
//!
//! let id = ResourceIdentity::parse(
//!     "/subscriptions/abc/resourceGroups/RG1/providers/Microsoft.Example/things/Thing1",
//! )
//! .unwrap();
//! assert_eq!(id.resource_group_name, "RG1");
//! assert_eq!(id.name(), Some("Thing1"));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

const SUBSCRIPTIONS: &str = "subscriptions";
const RESOURCE_GROUPS: &str = "resourceGroups";
const PROVIDERS: &str = "providers";

/// One `type/name` pair of a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSegment {
    /// The resource type segment, e.g. `applicationGateways`.
    pub resource_type: String,
    /// The resource name.
    pub name: String,
}

impl ResourceSegment {
    /// Create a new segment.
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

/// The structured form of a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// The subscription id.
    pub subscription_id: String,
    /// The resource group name.
    pub resource_group_name: String,
    /// The provider namespace, e.g. `Microsoft.Network`.
    /// `None` when the identity names the resource group itself.
    pub provider_namespace: Option<String>,
    /// The ancestors of the leaf resource, outermost first.
    pub parent_chain: Vec<ResourceSegment>,
    /// The leaf resource. `None` when the identity names the resource group itself.
    pub leaf: Option<ResourceSegment>,
}

impl ResourceIdentity {
    /// Identity of a resource group.
    pub fn resource_group(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            provider_namespace: None,
            parent_chain: Vec::new(),
            leaf: None,
        }
    }

    /// Identity of a top-level resource.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        provider_namespace: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            provider_namespace: Some(provider_namespace.into()),
            parent_chain: Vec::new(),
            leaf: Some(ResourceSegment::new(resource_type, name)),
        }
    }

    /// Append an ancestor (outermost first) in front of the leaf.
    pub fn with_parent(
        mut self,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.parent_chain
            .push(ResourceSegment::new(resource_type, name));
        self
    }

    /// Identity of a child of this resource.
    ///
    /// The current leaf becomes the last element of the parent chain.
    /// Returns `None` for a resource group identity, which has no provider.
    pub fn child(&self, resource_type: impl Into<String>, name: impl Into<String>) -> Option<Self> {
        let leaf = self.leaf.clone()?;
        let mut child = self.clone();
        child.parent_chain.push(leaf);
        child.leaf = Some(ResourceSegment::new(resource_type, name));
        Some(child)
    }

    /// Parse a resource path.
    ///
    /// Fails with [`PipelineError::MalformedIdentifier`] when the path has
    /// fewer than 4 non-empty segments or does not follow the expected
    /// `subscriptions/.../resourceGroups/.../providers/...` structure.
    pub fn parse(path: &str) -> Result<Self, PipelineError> {
        let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();

        if tokens.len() < 4 {
            return Err(PipelineError::malformed(
                path,
                format!("expected at least 4 segments, found {}", tokens.len()),
            ));
        }
        expect_literal(path, tokens[0], SUBSCRIPTIONS, 0)?;
        expect_literal(path, tokens[2], RESOURCE_GROUPS, 2)?;

        let mut identity = Self::resource_group(tokens[1], tokens[3]);
        if tokens.len() == 4 {
            return Ok(identity);
        }

        expect_literal(path, tokens[4], PROVIDERS, 4)?;
        let namespace = tokens
            .get(5)
            .ok_or_else(|| PipelineError::malformed(path, "missing provider namespace"))?;

        let pairs = &tokens[6..];
        if pairs.is_empty() {
            return Err(PipelineError::malformed(path, "missing resource type and name"));
        }
        if pairs.len() % 2 != 0 {
            return Err(PipelineError::malformed(
                path,
                format!("resource type '{}' has no name", pairs[pairs.len() - 1]),
            ));
        }

        let mut segments: Vec<ResourceSegment> = pairs
            .chunks(2)
            .map(|pair| ResourceSegment::new(pair[0], pair[1]))
            .collect();

        identity.provider_namespace = Some((*namespace).to_string());
        identity.leaf = segments.pop();
        identity.parent_chain = segments;
        Ok(identity)
    }

    /// Parse an optional resource path, treating absent or blank input as "not provided".
    pub fn parse_optional(path: Option<&str>) -> Result<Option<Self>, PipelineError> {
        match path {
            None => Ok(None),
            Some(p) if p.trim().is_empty() => Ok(None),
            Some(p) => Self::parse(p).map(Some),
        }
    }

    /// The leaf resource name.
    pub fn name(&self) -> Option<&str> {
        self.leaf.as_ref().map(|s| s.name.as_str())
    }

    /// The leaf resource type segment.
    pub fn resource_type(&self) -> Option<&str> {
        self.leaf.as_ref().map(|s| s.resource_type.as_str())
    }

    /// The fully-qualified type, e.g. `Microsoft.Network/applicationGateways/backendAddressPools`.
    pub fn full_resource_type(&self) -> Option<String> {
        let namespace = self.provider_namespace.as_ref()?;
        let leaf = self.leaf.as_ref()?;
        let mut full = namespace.clone();
        for segment in self.parent_chain.iter().chain(std::iter::once(leaf)) {
            full.push('/');
            full.push_str(&segment.resource_type);
        }
        Some(full)
    }

    /// Names of the ancestors, outermost first.
    pub fn parent_names(&self) -> Vec<&str> {
        self.parent_chain.iter().map(|s| s.name.as_str()).collect()
    }

    /// Identity of the immediate parent.
    ///
    /// For a top-level resource this is its resource group; a resource group has no parent.
    pub fn parent(&self) -> Option<Self> {
        self.leaf.as_ref()?;
        let mut parent = self.clone();
        parent.leaf = parent.parent_chain.pop();
        if parent.leaf.is_none() {
            parent.provider_namespace = None;
        }
        Some(parent)
    }

    /// Whether the leaf type (and parent types) match the given declaration, ignoring case.
    pub fn is_of_type(&self, namespace: &str, parent_types: &[&str], resource_type: &str) -> bool {
        let namespace_matches = self
            .provider_namespace
            .as_deref()
            .is_some_and(|ns| ns.eq_ignore_ascii_case(namespace));
        let leaf_matches = self
            .resource_type()
            .is_some_and(|t| t.eq_ignore_ascii_case(resource_type));
        let parents_match = self.parent_chain.len() == parent_types.len()
            && self
                .parent_chain
                .iter()
                .zip(parent_types)
                .all(|(segment, expected)| segment.resource_type.eq_ignore_ascii_case(expected));

        namespace_matches && leaf_matches && parents_match
    }
}

fn expect_literal(
    path: &str,
    token: &str,
    literal: &str,
    index: usize,
) -> Result<(), PipelineError> {
    if token.eq_ignore_ascii_case(literal) {
        Ok(())
    } else {
        Err(PipelineError::malformed(
            path,
            format!("expected '{}' at segment {}, found '{}'", literal, index, token),
        ))
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{}/{}/{}/{}",
            SUBSCRIPTIONS, self.subscription_id, RESOURCE_GROUPS, self.resource_group_name
        )?;
        if let (Some(namespace), Some(leaf)) = (&self.provider_namespace, &self.leaf) {
            write!(f, "/{}/{}", PROVIDERS, namespace)?;
            for segment in self.parent_chain.iter().chain(std::iter::once(leaf)) {
                write!(f, "/{}/{}", segment.resource_type, segment.name)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ResourceIdentity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_top_level_resource() {
        let id = ResourceIdentity::parse(
            "/subscriptions/abc/resourceGroups/RG1/providers/Microsoft.Example/things/Thing1",
        )
        .unwrap();

        assert_eq!(id.subscription_id, "abc");
        assert_eq!(id.resource_group_name, "RG1");
        assert_eq!(id.provider_namespace.as_deref(), Some("Microsoft.Example"));
        assert_eq!(id.resource_type(), Some("things"));
        assert_eq!(id.name(), Some("Thing1"));
        assert!(id.parent_chain.is_empty());
    }

    #[test]
    fn test_parse_nested_resource_keeps_parent_order() {
        let id = ResourceIdentity::parse(
            "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Network/applicationGateways/gw1/backendAddressPools/pool1",
        )
        .unwrap();

        assert_eq!(
            id.parent_chain,
            vec![ResourceSegment::new("applicationGateways", "gw1")]
        );
        assert_eq!(id.name(), Some("pool1"));
        assert_eq!(
            id.full_resource_type().as_deref(),
            Some("Microsoft.Network/applicationGateways/backendAddressPools")
        );
        assert_eq!(id.parent_names(), vec!["gw1"]);
    }

    #[test]
    fn test_parse_same_type_at_multiple_depths() {
        let id = ResourceIdentity::parse(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Example/folders/a/folders/b/folders/c",
        )
        .unwrap();

        assert_eq!(
            id.parent_chain,
            vec![
                ResourceSegment::new("folders", "a"),
                ResourceSegment::new("folders", "b"),
            ]
        );
        assert_eq!(id.name(), Some("c"));
    }

    #[test]
    fn test_parse_ignores_empty_segments() {
        let id = ResourceIdentity::parse(
            "subscriptions//abc/resourceGroups/RG1//providers/Microsoft.Example/things/Thing1/",
        )
        .unwrap();
        assert_eq!(id.resource_group_name, "RG1");
        assert_eq!(id.name(), Some("Thing1"));
    }

    #[test]
    fn test_parse_resource_group_path() {
        let id = ResourceIdentity::parse("/subscriptions/abc/resourceGroups/RG1").unwrap();
        assert_eq!(id.resource_group_name, "RG1");
        assert!(id.name().is_none());
        assert!(id.full_resource_type().is_none());
    }

    #[test]
    fn test_parse_is_case_insensitive_for_literals() {
        let id = ResourceIdentity::parse(
            "/SUBSCRIPTIONS/abc/resourcegroups/rg/Providers/Microsoft.Example/things/t",
        )
        .unwrap();
        assert_eq!(id.resource_group_name, "rg");
    }

    #[test]
    fn test_parse_too_few_segments() {
        for path in [
            "",
            "/",
            "/subscriptions",
            "/subscriptions/abc/resourceGroups",
            "a/b/c",
        ] {
            let err = ResourceIdentity::parse(path).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedIdentifier, "path: {}", path);
        }
    }

    #[test]
    fn test_parse_rejects_wrong_literals() {
        let err = ResourceIdentity::parse("/subscriptions/abc/groups/RG1").unwrap_err();
        assert!(err.message().contains("resourceGroups"));

        let err = ResourceIdentity::parse("/subscriptions/abc/resourceGroups/RG1/things/x")
            .unwrap_err();
        assert!(err.message().contains("providers"));
    }

    #[test]
    fn test_parse_rejects_dangling_type() {
        let err = ResourceIdentity::parse(
            "/subscriptions/abc/resourceGroups/RG1/providers/Microsoft.Example/things",
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedIdentifier);
        assert!(err.message().contains("things"));

        let err =
            ResourceIdentity::parse("/subscriptions/abc/resourceGroups/RG1/providers").unwrap_err();
        assert!(err.message().contains("namespace"));
    }

    #[test]
    fn test_resource_group_is_fourth_token() {
        let paths = [
            "/subscriptions/1/resourceGroups/a",
            "/subscriptions/2/resourceGroups/b-c/providers/N/t/n",
            "//subscriptions/3//resourceGroups/d_e/providers/N/p/q/t/n",
        ];
        for path in paths {
            let fourth = path.split('/').filter(|t| !t.is_empty()).nth(3).unwrap();
            assert_eq!(
                ResourceIdentity::parse(path).unwrap().resource_group_name,
                fourth
            );
        }
    }

    #[test]
    fn test_display_round_trip() {
        let id =
            ResourceIdentity::new("abc", "rg", "Microsoft.Network", "applicationGateways", "gw")
                .child("backendAddressPools", "pool")
                .unwrap();
        let rendered = id.to_string();
        assert_eq!(
            rendered,
            "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Network/applicationGateways/gw/backendAddressPools/pool"
        );
        assert_eq!(rendered.parse::<ResourceIdentity>().unwrap(), id);

        let group = ResourceIdentity::resource_group("abc", "rg");
        assert_eq!(ResourceIdentity::parse(&group.to_string()).unwrap(), group);
    }

    #[test]
    fn test_parse_optional() {
        assert!(ResourceIdentity::parse_optional(None).unwrap().is_none());
        assert!(ResourceIdentity::parse_optional(Some("")).unwrap().is_none());
        assert!(ResourceIdentity::parse_optional(Some("  ")).unwrap().is_none());
        assert!(ResourceIdentity::parse_optional(Some("/subscriptions/x")).is_err());
        assert!(ResourceIdentity::parse_optional(Some("/subscriptions/a/resourceGroups/b"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_parent() {
        let pool =
            ResourceIdentity::new("s", "rg", "Microsoft.Network", "applicationGateways", "gw")
                .child("backendAddressPools", "pool")
                .unwrap();
        let gateway = pool.parent().unwrap();
        assert_eq!(gateway.name(), Some("gw"));
        assert!(gateway.parent_chain.is_empty());

        let group = gateway.parent().unwrap();
        assert!(group.name().is_none());
        assert!(group.provider_namespace.is_none());
        assert!(group.parent().is_none());
    }

    #[test]
    fn test_is_of_type() {
        let pool = ResourceIdentity::parse(
            "/subscriptions/s/resourceGroups/rg/providers/microsoft.network/ApplicationGateways/gw/backendaddresspools/p",
        )
        .unwrap();
        assert!(pool.is_of_type(
            "Microsoft.Network",
            &["applicationGateways"],
            "backendAddressPools"
        ));
        assert!(!pool.is_of_type("Microsoft.Network", &[], "backendAddressPools"));
        assert!(!pool.is_of_type(
            "Microsoft.Compute",
            &["applicationGateways"],
            "backendAddressPools"
        ));
    }
}
