//! Defined tags for launched instances

use crate::oci::models::DefinedTags;
use std::collections::BTreeMap;

/// OCI rejects defined tag values longer than this.
pub const MAX_TAG_VALUE_LEN: usize = 48;
const MAX_TAG_KEY_LEN: usize = 100;

/// Tags inside one defined-tag namespace; keys are sanitized, later inserts win.
#[derive(Debug, Clone, PartialEq)]
pub struct TagBag {
    namespace: String,
    tags: BTreeMap<String, String>,
}

/// Replace characters OCI does not allow in tag keys.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TAG_KEY_LEN)
        .collect()
}

fn truncate_value(value: &str) -> String {
    value.chars().take(MAX_TAG_VALUE_LEN).collect()
}

impl TagBag {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            tags: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let key = sanitize_key(key);
        if key.is_empty() {
            return;
        }
        self.tags.insert(key, truncate_value(value));
    }

    pub fn extend<'a, I>(&mut self, tags: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in tags {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(&sanitize_key(key)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn into_defined_tags(self) -> DefinedTags {
        if self.tags.is_empty() {
            return DefinedTags::new();
        }
        let mut out = DefinedTags::new();
        out.insert(self.namespace, self.tags);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("karpenter.sh/nodepool"), "karpenter_sh_nodepool");
        assert_eq!(sanitize_key("team name"), "team_name");
        assert_eq!(sanitize_key("already-ok_1"), "already-ok_1");
    }

    #[test]
    fn test_values_truncated() {
        let mut bag = TagBag::new("karpenter");
        let long = "x".repeat(80);
        bag.insert("nodeclaim", &long);
        assert_eq!(bag.get("nodeclaim").map(str::len), Some(MAX_TAG_VALUE_LEN));
    }

    #[test]
    fn test_duplicate_keys_collapse() {
        let mut bag = TagBag::new("karpenter");
        bag.insert("karpenter.sh/nodepool", "user");
        bag.insert("karpenter_sh/nodepool", "system");
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("karpenter.sh/nodepool"), Some("system"));

        let tags = bag.into_defined_tags();
        assert_eq!(tags["karpenter"]["karpenter_sh_nodepool"], "system");
    }

    #[test]
    fn test_empty_bag_has_no_namespace() {
        let mut bag = TagBag::new("karpenter");
        bag.insert("", "ignored");
        assert!(bag.is_empty());
        assert!(bag.into_defined_tags().is_empty());
    }
}
