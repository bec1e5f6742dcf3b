use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The name of a bin: a sub-resource of a throttle group, usually one remote
/// host.
///
/// Bin names are compared verbatim; callers that want case-insensitive
/// hostnames should normalize before building the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinName(String);

impl BinName {
    /// Get the bin name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BinName {
    fn from(name: String) -> Self {
        BinName(name)
    }
}

impl From<&str> for BinName {
    fn from(name: &str) -> Self {
        BinName(name.to_string())
    }
}

impl From<&BinName> for BinName {
    fn from(name: &BinName) -> Self {
        name.clone()
    }
}

/// The set of bins a permit is scoped to.
///
/// The set is ordered and free of duplicates: naming the same bin twice in a
/// request counts it once.
///
/// # Examples
///
/// ```
/// use fairshare_lib::BinSet;
///
/// let bins: BinSet = ["b.example", "a.example", "b.example"].into_iter().collect();
/// assert_eq!(bins.len(), 2);
/// assert_eq!(bins.to_string(), "[a.example, b.example]");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BinSet(BTreeSet<BinName>);

impl BinSet {
    /// Create an empty bin set
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a bin to the set, returning whether it was newly inserted
    pub fn insert(&mut self, name: impl Into<BinName>) -> bool {
        self.0.insert(name.into())
    }

    /// Check whether the set contains the given bin
    #[must_use]
    pub fn contains(&self, name: &BinName) -> bool {
        self.0.contains(name)
    }

    /// Number of distinct bins in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the bins in order
    pub fn iter(&self) -> impl Iterator<Item = &BinName> {
        self.0.iter()
    }
}

impl<T: Into<BinName>> FromIterator<T> for BinSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a BinSet {
    type Item = &'a BinName;
    type IntoIter = std::collections::btree_set::Iter<'a, BinName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for BinSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(BinName::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
