use crate::config::RiskLevel;
use crate::models::Priority;
use itertools::Itertools;
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::BitOr;

/// Capabilities a run is allowed to use.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActionSet(u16);

impl ActionSet {
    pub const OPTIMIZE_TABLES: Self = Self(1 << 0);
    pub const REMOVE_OVERHEAD: Self = Self(1 << 1);
    pub const BASIC_INDEXES: Self = Self(1 << 2);
    pub const ADVANCED_INDEXES: Self = Self(1 << 3);
    pub const CONVERT_ENGINE: Self = Self(1 << 4);
    pub const PURGE_EXPIRED_CACHE: Self = Self(1 << 5);
    pub const PURGE_REVISIONS: Self = Self(1 << 6);
    pub const PURGE_DRAFTS: Self = Self(1 << 7);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::OPTIMIZE_TABLES, "optimize_tables"),
        (Self::REMOVE_OVERHEAD, "remove_overhead"),
        (Self::BASIC_INDEXES, "add_basic_indexes"),
        (Self::ADVANCED_INDEXES, "add_advanced_indexes"),
        (Self::CONVERT_ENGINE, "convert_engines"),
        (Self::PURGE_EXPIRED_CACHE, "purge_expired_cache"),
        (Self::PURGE_REVISIONS, "purge_revisions"),
        (Self::PURGE_DRAFTS, "purge_drafts"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Each level is a strict superset of the one below it.
    pub const fn for_level(level: RiskLevel) -> Self {
        let low = Self::OPTIMIZE_TABLES.union(Self::REMOVE_OVERHEAD);
        let medium = low
            .union(Self::BASIC_INDEXES)
            .union(Self::CONVERT_ENGINE)
            .union(Self::PURGE_EXPIRED_CACHE);
        match level {
            RiskLevel::Low => low,
            RiskLevel::Medium => medium,
            RiskLevel::High => medium
                .union(Self::ADVANCED_INDEXES)
                .union(Self::PURGE_REVISIONS)
                .union(Self::PURGE_DRAFTS),
        }
    }

    pub fn allows_defragment(self) -> bool {
        self.contains(Self::OPTIMIZE_TABLES.union(Self::REMOVE_OVERHEAD))
    }

    /// High-priority indexes need either index capability; medium needs the advanced one.
    pub fn allows_index(self, priority: Priority) -> bool {
        match priority {
            Priority::High => self.intersects(Self::BASIC_INDEXES.union(Self::ADVANCED_INDEXES)),
            Priority::Medium => self.contains(Self::ADVANCED_INDEXES),
            Priority::Low => false,
        }
    }
}

impl BitOr for ActionSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .join(" | ");
        write!(f, "ActionSet({names})")
    }
}

/// Stable index name: `dbm_` plus the first 10 hex digits of
/// SHA-256 over `table:col1,col2`.
pub fn index_name(table: &str, columns: &[String]) -> String {
    let digest = Sha256::digest(format!("{}:{}", table, columns.join(",")).as_bytes());
    format!("dbm_{}", &hex::encode(digest)[..10])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn levels_are_nested() {
        let low = ActionSet::for_level(RiskLevel::Low);
        let medium = ActionSet::for_level(RiskLevel::Medium);
        let high = ActionSet::for_level(RiskLevel::High);
        assert!(medium.contains(low));
        assert!(high.contains(medium));
        assert_ne!(low, medium);
        assert_ne!(medium, high);
    }

    #[rstest]
    #[case(RiskLevel::Low, Priority::High, false)]
    #[case(RiskLevel::Medium, Priority::High, true)]
    #[case(RiskLevel::Medium, Priority::Medium, false)]
    #[case(RiskLevel::High, Priority::Medium, true)]
    #[case(RiskLevel::High, Priority::Low, false)]
    fn index_gate(#[case] level: RiskLevel, #[case] priority: Priority, #[case] allowed: bool) {
        assert_eq!(ActionSet::for_level(level).allows_index(priority), allowed);
    }

    #[test]
    fn purges_by_level() {
        let medium = ActionSet::for_level(RiskLevel::Medium);
        assert!(medium.contains(ActionSet::PURGE_EXPIRED_CACHE));
        assert!(!medium.contains(ActionSet::PURGE_REVISIONS));
        assert!(ActionSet::for_level(RiskLevel::High).contains(ActionSet::PURGE_DRAFTS));
    }

    #[test]
    fn index_name_is_stable_and_short() {
        let columns = vec!["meta_key".to_string()];
        let name = index_name("wp_postmeta", &columns);
        assert_eq!(name, index_name("wp_postmeta", &columns));
        assert_eq!(name.len(), 14);
        assert!(name.starts_with("dbm_"));
        assert!(crate::identifier::is_safe_identifier(&name));
        assert_ne!(name, index_name("wp_usermeta", &columns));
    }

    #[test]
    fn debug_lists_flags() {
        let set = ActionSet::OPTIMIZE_TABLES | ActionSet::PURGE_DRAFTS;
        assert_eq!(format!("{set:?}"), "ActionSet(optimize_tables | purge_drafts)");
    }
}
