//! Enum descriptors.

/// Values of an enum, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumData {
    pub(crate) values: Vec<(String, i32)>,
    pub(crate) reserved_ranges: Vec<(i32, i32)>,
    pub(crate) reserved_names: Vec<String>,
}

impl EnumData {
    /// `(name, number)` pairs in declaration order
    pub fn values(&self) -> impl Iterator<Item = (&str, i32)> {
        self.values.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Number of declared names, aliases included
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the enum declares no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The number a name maps to
    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// The first declared name for a number
    pub fn name_of(&self, id: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == id)
            .map(|(n, _)| n.as_str())
    }

    /// Whether any name maps to `id`
    pub fn contains_id(&self, id: i32) -> bool {
        self.values.iter().any(|(_, v)| *v == id)
    }

    /// Inclusive reserved number ranges
    pub fn reserved_ranges(&self) -> &[(i32, i32)] {
        &self.reserved_ranges
    }

    /// Reserved value names
    pub fn reserved_names(&self) -> &[String] {
        &self.reserved_names
    }

    /// The first declared value, which is the enum's default
    pub fn default_value(&self) -> i32 {
        self.values.first().map_or(0, |(_, id)| *id)
    }

    pub(crate) fn is_reserved_id(&self, id: i32) -> bool {
        self.reserved_ranges
            .iter()
            .any(|(lo, hi)| (*lo..=*hi).contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        let data = EnumData {
            values: vec![("A".into(), 1), ("B".into(), 2), ("ALIAS".into(), 1)],
            reserved_ranges: vec![(10, 20)],
            reserved_names: vec![],
        };
        assert_eq!(data.value_of("ALIAS"), Some(1));
        assert_eq!(data.name_of(1), Some("A"));
        assert_eq!(data.name_of(3), None);
        assert_eq!(data.default_value(), 1);
        assert!(data.is_reserved_id(15));
        assert!(!data.is_reserved_id(21));
    }
}
