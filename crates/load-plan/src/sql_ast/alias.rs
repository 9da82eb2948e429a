//! SQL alias allocation
//!
//! Every table group gets its own alias base (`o1`, `o2`, `c1`, ...) and
//! every table reference inside the group takes the next alias from that
//! base (`o1_0`, `o1_1`, ...), so no two references of one plan collide.

use std::collections::HashMap;

/// Alias base owned by a single table group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAliasBase {
    base: String,
    next: usize,
}

impl SqlAliasBase {
    fn new(base: String) -> Self {
        Self { base, next: 0 }
    }

    pub fn alias_stem(&self) -> &str {
        &self.base
    }

    /// Next table alias for this base
    pub fn generate_new_alias(&mut self) -> String {
        let alias = format!("{}_{}", self.base, self.next);
        self.next += 1;
        alias
    }
}

/// Hands out alias bases, unique per stem
#[derive(Debug, Clone)]
pub struct SqlAliasBaseGenerator {
    stem_length: usize,
    counters: HashMap<String, usize>,
}

impl Default for SqlAliasBaseGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SqlAliasBaseGenerator {
    pub fn new(stem_length: usize) -> Self {
        Self {
            stem_length: stem_length.max(1),
            counters: HashMap::new(),
        }
    }

    /// Create an alias base for an entity name or collection role
    pub fn create_sql_alias_base(&mut self, stem_source: &str) -> SqlAliasBase {
        let stem = self.stem(stem_source);
        let counter = self.counters.entry(stem.clone()).or_insert(0);
        *counter += 1;
        SqlAliasBase::new(format!("{}{}", stem, counter))
    }

    fn stem(&self, source: &str) -> String {
        let unqualified = source.rsplit('.').next().unwrap_or(source);
        let stem: String = unqualified
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .take(self.stem_length)
            .collect::<String>()
            .to_ascii_lowercase();
        if stem.is_empty() {
            "t".to_string()
        } else {
            stem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_bases_are_unique_per_stem() {
        let mut generator = SqlAliasBaseGenerator::default();
        let mut order = generator.create_sql_alias_base("Order");
        let mut owner = generator.create_sql_alias_base("Owner");
        let mut items = generator.create_sql_alias_base("Order.lineItems");

        assert_eq!(order.generate_new_alias(), "o1_0");
        assert_eq!(order.generate_new_alias(), "o1_1");
        assert_eq!(owner.generate_new_alias(), "o2_0");
        assert_eq!(items.alias_stem(), "l1");
    }

    #[test]
    fn test_stem_length_and_fallback() {
        let mut generator = SqlAliasBaseGenerator::new(3);
        assert_eq!(generator.create_sql_alias_base("Customer").alias_stem(), "cus1");
        assert_eq!(generator.create_sql_alias_base("_1").alias_stem(), "t1");
    }
}
