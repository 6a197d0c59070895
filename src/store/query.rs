use reqwest::Url;
use std::fmt::Display;

use super::{StoreError, StoreResult};

/// A PostgREST table query: `/rest/v1/<table>?select=...&col=op.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: &'static str,
    select: Option<&'static str>,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: &'static str) -> Self {
        Self {
            table,
            select: None,
            params: Vec::new(),
        }
    }

    pub fn select(mut self, columns: &'static str) -> Self {
        self.select = Some(columns);
        self
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("eq.{}", value))
    }

    pub fn lte(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("lte.{}", value))
    }

    pub fn gt(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("gt.{}", value))
    }

    pub fn in_list<T: Display>(self, column: &str, values: &[T]) -> Self {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.filter(column, format!("in.({})", joined))
    }

    /// Substring match; `*` is PostgREST's wildcard in URLs.
    pub fn contains(self, column: &str, fragment: &str) -> Self {
        self.filter(column, format!("like.*{}*", fragment))
    }

    /// Raw `or=(...)` group.
    pub fn or(self, expr: impl Display) -> Self {
        self.filter("or", format!("({})", expr))
    }

    pub fn order(self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.filter("order", format!("{}.{}", column, dir))
    }

    pub fn limit(self, n: usize) -> Self {
        self.filter("limit", n.to_string())
    }

    fn filter(mut self, key: &str, value: String) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    pub fn url(&self, base: &Url) -> StoreResult<Url> {
        let mut url = base
            .join(&format!("rest/v1/{}", self.table))
            .map_err(|err| StoreError::Url(err.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(columns) = self.select {
                pairs.append_pair("select", columns);
            }
            for (k, v) in &self.params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// `or` expression matching messages in either direction between two users.
pub fn between(a: impl Display, b: impl Display) -> String {
    format!(
        "and(fromid.eq.{a},toid.eq.{b}),and(fromid.eq.{b},toid.eq.{a})",
        a = a,
        b = b
    )
}
