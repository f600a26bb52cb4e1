//! Table references in SQL text
//!
//! A lexical scan over `FROM` and `JOIN` clauses, good enough to find the
//! tables a query touches for enrichment. Names bound by `WITH` are skipped.

use std::collections::HashSet;

use regex::Regex;

use crate::providers::TableIdentifier;

/// A table named in a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Catalog, empty when unqualified
    pub catalog: String,
    /// Schema, empty when unqualified
    pub schema: String,
    /// Table
    pub table: String,
    /// The name as written
    pub full_path: String,
}

impl TableRef {
    fn parse(path: &str) -> Self {
        let parts: Vec<&str> = path.split('.').collect();
        let (catalog, schema, table) = match parts.as_slice() {
            [c, s, t] => (*c, *s, *t),
            [s, t] => ("", *s, *t),
            _ => ("", "", path),
        };
        Self {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            full_path: path.to_string(),
        }
    }

    /// As a catalog lookup key.
    pub fn identifier(&self) -> TableIdentifier {
        TableIdentifier::new(&self.catalog, &self.schema, &self.table)
    }
}

const TABLE_PATTERN: &str = concat!(
    r"(?i)\b(?:FROM|JOIN)\s+",
    r"([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*){0,2})",
    r"(?:\s|,|;|\)|$)",
);

const CTE_PATTERN: &str = concat!(
    r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)",
    r"([a-zA-Z_][a-zA-Z0-9_]*)\s+AS\s*\(",
);

/// Tables referenced by `sql`, first occurrence first, without duplicates.
pub fn extract_tables(sql: &str) -> Vec<TableRef> {
    let (Ok(tables), Ok(ctes)) = (Regex::new(TABLE_PATTERN), Regex::new(CTE_PATTERN)) else {
        return Vec::new();
    };

    let cte_names: HashSet<String> = ctes
        .captures_iter(sql)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect();

    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for caps in tables.captures_iter(sql) {
        let Some(path) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let lower = path.to_ascii_lowercase();
        if cte_names.contains(&lower) || !seen.insert(lower) {
            continue;
        }
        refs.push(TableRef::parse(path));
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(sql: &str) -> Vec<String> {
        extract_tables(sql).into_iter().map(|r| r.full_path).collect()
    }

    #[test]
    fn test_three_part_name() {
        let refs = extract_tables("SELECT * FROM hive.sales.orders WHERE id = 1");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].catalog, "hive");
        assert_eq!(refs[0].schema, "sales");
        assert_eq!(refs[0].table, "orders");
    }

    #[test]
    fn test_joins_and_aliases() {
        assert_eq!(
            paths(
                "select o.id from sales.orders o join sales.customers AS c \
                 on o.cid = c.id left join items i on true"
            ),
            vec!["sales.orders", "sales.customers", "items"]
        );
    }

    #[test]
    fn test_duplicates_dropped() {
        assert_eq!(paths("SELECT * FROM a.b JOIN a.b ON true"), vec!["a.b"]);
        assert_eq!(paths("SELECT * FROM a JOIN b ON a.id = b.id"), vec!["a", "b"]);
    }

    #[test]
    fn test_cte_names_skipped() {
        assert_eq!(
            paths(
                "WITH recent AS (SELECT * FROM hive.sales.orders), \
                 top AS (SELECT * FROM recent) SELECT * FROM top"
            ),
            vec!["hive.sales.orders"]
        );
    }

    #[test]
    fn test_end_of_input_and_subquery() {
        assert_eq!(paths("select 1 from t"), vec!["t"]);
        assert_eq!(paths("select * from (select * from x.y)"), vec!["x.y"]);
    }

    #[test]
    fn test_no_tables() {
        assert!(extract_tables("SELECT 1").is_empty());
    }

    #[test]
    fn test_identifier() {
        let id = extract_tables("FROM s.t")[0].identifier();
        assert_eq!(id, TableIdentifier::new("", "s", "t"));
    }
}
