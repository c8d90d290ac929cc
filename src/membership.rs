//! Publisher membership merging.
//!
//! A publisher has two member lists: users (with an `admin` or `editor`
//! capacity) and datasets (`private` or `public`). Migrating one publisher into
//! another merges each pair of lists so the target loses nothing and every
//! member of the source is carried over. A member present in both lists keeps a
//! single entry whose capacity is decided by a merge policy.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MemberKind {
    User,
    Dataset,
}

impl MemberKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Dataset => "dataset",
        }
    }
}

/// Capacity of a member within a publisher. Each member kind has its own set
/// of exactly two valid capacities.
pub(crate) trait MemberCapacity: Copy + Eq + fmt::Debug + fmt::Display {
    const KIND: MemberKind;

    fn as_str(&self) -> &'static str;
    fn from_db_str(s: &str) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum UserCapacity {
    Admin,
    Editor,
}

impl MemberCapacity for UserCapacity {
    const KIND: MemberKind = MemberKind::User;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Editor => "editor",
        }
    }

    fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "editor" => Some(Self::Editor),
            _ => None,
        }
    }
}

impl fmt::Display for UserCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DatasetCapacity {
    Private,
    Public,
}

impl MemberCapacity for DatasetCapacity {
    const KIND: MemberKind = MemberKind::Dataset;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }

    fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

impl fmt::Display for DatasetCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Member<C> {
    pub(crate) name: String,
    pub(crate) capacity: C,
}

impl<C> Member<C> {
    pub(crate) fn new(name: impl Into<String>, capacity: C) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

/// Users keep the most privileged capacity they hold in either list.
pub(crate) fn merge_user_capacity(source: UserCapacity, target: UserCapacity) -> UserCapacity {
    if source == target {
        source
    } else {
        UserCapacity::Admin
    }
}

/// Datasets keep the most restrictive capacity: private in either list stays private.
pub(crate) fn merge_dataset_capacity(
    source: DatasetCapacity,
    target: DatasetCapacity,
) -> DatasetCapacity {
    if source == target {
        source
    } else {
        DatasetCapacity::Private
    }
}

/// Merge `source` members into `target`, returning a new list.
///
/// The result holds the target-only members, then the source-only members,
/// then the members found in both lists with their capacity decided by
/// `capacity_merger(source_capacity, target_capacity)`. Each group keeps the
/// order of its input list. Neither input is modified.
pub(crate) fn merge_members<C: MemberCapacity>(
    source_members: &[Member<C>],
    target_members: &[Member<C>],
    capacity_merger: impl Fn(C, C) -> C,
) -> Vec<Member<C>> {
    let source_names: HashSet<&str> = source_members.iter().map(|m| m.name.as_str()).collect();
    let target_capacities: HashMap<&str, C> = target_members
        .iter()
        .map(|m| (m.name.as_str(), m.capacity))
        .collect();

    let mut result: Vec<Member<C>> = target_members
        .iter()
        .filter(|m| !source_names.contains(m.name.as_str()))
        .cloned()
        .collect();

    result.extend(
        source_members
            .iter()
            .filter(|m| !target_capacities.contains_key(m.name.as_str()))
            .cloned(),
    );

    for member in source_members {
        let Some(&target_capacity) = target_capacities.get(member.name.as_str()) else {
            continue;
        };
        let source_capacity = member.capacity;
        let merged = Member::new(
            member.name.clone(),
            capacity_merger(source_capacity, target_capacity),
        );

        if source_capacity != target_capacity {
            tracing::warn!(
                kind = C::KIND.as_str(),
                member = %merged.name,
                %source_capacity,
                %target_capacity,
                "Mismatched member capacities: {} will be migrated as {}",
                merged.name,
                merged.capacity,
            );
        }

        result.push(merged);
    }

    result
}

pub(crate) fn migrate_user_lists(
    source_users: &[Member<UserCapacity>],
    target_users: &[Member<UserCapacity>],
) -> Vec<Member<UserCapacity>> {
    merge_members(source_users, target_users, merge_user_capacity)
}

pub(crate) fn migrate_dataset_lists(
    source_datasets: &[Member<DatasetCapacity>],
    target_datasets: &[Member<DatasetCapacity>],
) -> Vec<Member<DatasetCapacity>> {
    merge_members(source_datasets, target_datasets, merge_dataset_capacity)
}
