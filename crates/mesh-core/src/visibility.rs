//! Object visibility (exportTo) semantics.
//!
//! Every policy object and service carries an exportTo set controlling
//! which namespaces can see it. Normalization rules, applied uniformly:
//!
//! - empty set: the mesh default (typically public)
//! - contains `none` (`~`): visible nowhere, all other entries ignored
//! - contains `public` (`*`): visible everywhere, all other entries ignored
//! - `private` (`.`) or the owning namespace itself: visible only there
//! - a namespace name: visible to that namespace

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One entry of an exportTo set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// `*`: visible to the whole mesh.
    Public,
    /// `.`: visible only to the owning namespace.
    Private,
    /// `~`: visible to no one.
    None,
    /// Visible to one named namespace.
    Namespace(String),
}

impl Visibility {
    /// Parse the short-form notation used in manifests.
    pub fn parse(s: &str) -> Visibility {
        match s {
            "*" => Visibility::Public,
            "." => Visibility::Private,
            "~" => Visibility::None,
            ns => Visibility::Namespace(ns.to_string()),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => f.write_str("*"),
            Visibility::Private => f.write_str("."),
            Visibility::None => f.write_str("~"),
            Visibility::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// Whether an object owned by `owner_namespace` with the given exportTo
/// set is visible to `client_namespace`.
///
/// `default_export` supplies the mesh default applied when the set is
/// empty.
pub fn exported_to(
    export_to: &[Visibility],
    owner_namespace: &str,
    client_namespace: &str,
    default_export: &HashSet<Visibility>,
) -> bool {
    if export_to.is_empty() {
        return default_export.contains(&Visibility::Public)
            || (owner_namespace == client_namespace
                && default_export.contains(&Visibility::Private));
    }
    if export_to.contains(&Visibility::None) {
        return false;
    }
    if export_to.contains(&Visibility::Public) {
        return true;
    }
    export_to.iter().any(|v| match v {
        Visibility::Private => owner_namespace == client_namespace,
        Visibility::Namespace(ns) => ns == client_namespace,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_default() -> HashSet<Visibility> {
        [Visibility::Public].into_iter().collect()
    }

    #[test]
    fn parse_forms() {
        assert_eq!(Visibility::parse("*"), Visibility::Public);
        assert_eq!(Visibility::parse("."), Visibility::Private);
        assert_eq!(Visibility::parse("~"), Visibility::None);
        assert_eq!(
            Visibility::parse("prod"),
            Visibility::Namespace("prod".into())
        );
    }

    #[test]
    fn empty_uses_default() {
        assert!(exported_to(&[], "a", "b", &public_default()));

        let private_default = [Visibility::Private].into_iter().collect();
        assert!(exported_to(&[], "a", "a", &private_default));
        assert!(!exported_to(&[], "a", "b", &private_default));
    }

    #[test]
    fn none_beats_everything() {
        let set = vec![Visibility::None, Visibility::Public];
        assert!(!exported_to(&set, "a", "a", &public_default()));
        assert!(!exported_to(&set, "a", "b", &public_default()));
    }

    #[test]
    fn public_beats_namespaces() {
        let set = vec![Visibility::Namespace("x".into()), Visibility::Public];
        assert!(exported_to(&set, "a", "anything", &public_default()));
    }

    #[test]
    fn private_and_named() {
        let set = vec![Visibility::Private, Visibility::Namespace("prod".into())];
        assert!(exported_to(&set, "a", "a", &public_default()));
        assert!(exported_to(&set, "a", "prod", &public_default()));
        assert!(!exported_to(&set, "a", "staging", &public_default()));
    }

    #[test]
    fn own_namespace_name_is_private() {
        // exportTo naming the owning namespace is effectively private.
        let set = vec![Visibility::Namespace("a".into())];
        assert!(exported_to(&set, "a", "a", &public_default()));
        assert!(!exported_to(&set, "a", "b", &public_default()));
    }
}
