//! 集合查询参数：分页、过滤条件、排序
//!
//! 条件是不透明的「字段 操作符 值」字符串，原样作为重复的 `q` 参数传递；客户端不做自动翻页。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 未指定 limit 时的单页大小
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// 一次集合查询的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub conditions: Vec<String>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, cond: impl Into<String>) -> Self {
        self.conditions.push(cond.into());
        self
    }

    pub fn conditions<I, S>(mut self, conds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions.extend(conds.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(field.into());
        self.sort_direction = direction;
        self
    }

    /// 转为 URL 查询对：limit、start、q（可重复）、sort（`+field` / `-field`）
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("limit".to_string(), self.limit.unwrap_or(DEFAULT_PAGE_SIZE).to_string()),
            ("start".to_string(), self.offset.to_string()),
        ];
        for cond in &self.conditions {
            let cond = cond.trim();
            if !cond.is_empty() {
                pairs.push(("q".to_string(), cond.to_string()));
            }
        }
        if let Some(field) = self.sort_by.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            let sign = match self.sort_direction {
                SortDirection::Asc => '+',
                SortDirection::Desc => '-',
            };
            pairs.push(("sort".to_string(), format!("{sign}{field}")));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_size() {
        let pairs = QueryParams::new().to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("limit".to_string(), "100".to_string()),
                ("start".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn test_conditions_and_sort() {
        let pairs = QueryParams::new()
            .conditions(["state=Running", "  ", "name~=web%"])
            .limit(5)
            .offset(10)
            .sort("createDate", SortDirection::Desc)
            .to_pairs();
        let q: Vec<_> = pairs.iter().filter(|(k, _)| k == "q").map(|(_, v)| v.as_str()).collect();
        assert_eq!(q, vec!["state=Running", "name~=web%"]);
        assert!(pairs.contains(&("sort".to_string(), "-createDate".to_string())));
        assert!(pairs.contains(&("start".to_string(), "10".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "5".to_string())));
    }
}
