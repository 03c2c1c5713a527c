// ── Pool health-check id set ──
//
// The appliance stores a pool's monitors as one space-joined text field.
// Internally it is an ordered set; the string form exists only at the
// adapter boundary.

use std::fmt;

use indexmap::IndexSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheckSet(IndexSet<String>);

impl HealthCheckSet {
    /// Parse the device's space-joined field. Blank entries are dropped.
    pub fn parse(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_owned).collect())
    }

    /// Add `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        self.0.insert(id.to_owned())
    }

    /// Remove `id`, keeping the order of the rest.
    pub fn remove(&mut self, id: &str) -> bool {
        self.0.shift_remove(id)
    }

    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn subtract(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Space-joined form for the device.
    pub fn to_device_string(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for HealthCheckSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_device_string())
    }
}

impl<'a> FromIterator<&'a str> for HealthCheckSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_owned).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tolerates_stray_whitespace() {
        let set = HealthCheckSet::parse("  a   b a ");
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_device_string(), "a b");
    }

    #[test]
    fn remove_keeps_colocated_ids() {
        let mut set = HealthCheckSet::parse("a b c");
        assert!(set.remove("b"));
        assert!(!set.remove("b"));
        assert_eq!(set.to_device_string(), "a c");
    }

    #[test]
    fn union_and_subtract() {
        let a: HealthCheckSet = ["x", "y"].into_iter().collect();
        let b: HealthCheckSet = ["y", "z"].into_iter().collect();
        assert_eq!(a.union(&b).to_device_string(), "x y z");
        assert_eq!(a.subtract(&b).to_device_string(), "x");
        assert!(a.subtract(&a).is_empty());
    }
}
