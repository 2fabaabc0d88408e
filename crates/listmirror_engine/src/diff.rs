//! Membership sets and the difference between them.

use listmirror_protocol::Subject;
use serde::Serialize;
use std::collections::btree_set::{self, BTreeSet};

/// The members of a list at the time it was read.
///
/// Built fresh on every run. Only set semantics matter: order is not
/// preserved and a subject appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MembershipSet(BTreeSet<Subject>);

impl MembershipSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member. Returns false if it was already present.
    pub fn insert(&mut self, subject: Subject) -> bool {
        self.0.insert(subject)
    }

    /// Returns true if `subject` is a member.
    pub fn contains(&self, subject: &Subject) -> bool {
        self.0.contains(subject)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates members in identity order.
    pub fn iter(&self) -> btree_set::Iter<'_, Subject> {
        self.0.iter()
    }
}

impl FromIterator<Subject> for MembershipSet {
    fn from_iter<T: IntoIterator<Item = Subject>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for MembershipSet {
    type Item = Subject;
    type IntoIter = btree_set::IntoIter<Subject>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MembershipSet {
    type Item = &'a Subject;
    type IntoIter = btree_set::Iter<'a, Subject>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The changes that make a mirror equal to its source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDiff {
    to_add: Vec<Subject>,
    to_remove: Vec<Subject>,
}

impl MembershipDiff {
    /// Subjects in the source but not the mirror.
    pub fn to_add(&self) -> &[Subject] {
        &self.to_add
    }

    /// Subjects in the mirror but not the source.
    pub fn to_remove(&self) -> &[Subject] {
        &self.to_remove
    }

    /// Returns true if the mirror already matches the source.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Splits into `(to_add, to_remove)`.
    pub fn into_parts(self) -> (Vec<Subject>, Vec<Subject>) {
        (self.to_add, self.to_remove)
    }
}

/// Computes `source - mirror` and `mirror - source`.
pub fn diff(source: &MembershipSet, mirror: &MembershipSet) -> MembershipDiff {
    MembershipDiff {
        to_add: source.0.difference(&mirror.0).cloned().collect(),
        to_remove: mirror.0.difference(&source.0).cloned().collect(),
    }
}
