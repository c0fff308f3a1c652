//! 资源路径规范化
//!
//! 模型给出的路径常缺少版本前缀（`vm-instances`、`/v1/vm-instances`），统一补成
//! `/zstack/v1/...`。规范化是幂等的：对结果再次规范化不会改变它。

/// 资源 API 的版本前缀
pub const API_PREFIX: &str = "/zstack/v1";

fn trim_slashes(s: &str) -> &str {
    s.trim_matches(|c: char| c == '/' || c.is_whitespace())
}

/// 去掉一层 `zstack/v1` 或 `v1` 前缀（若有）
fn strip_version_prefix(s: &str) -> &str {
    for prefix in ["zstack/v1", "v1"] {
        if s == prefix {
            return "";
        }
        if let Some(rest) = s.strip_prefix(prefix) {
            if rest.starts_with('/') {
                return rest;
            }
        }
    }
    s
}

/// 补全版本前缀并去掉首尾多余的 `/` 与空白
pub fn normalize_path(path: &str) -> String {
    let rest = trim_slashes(strip_version_prefix(trim_slashes(path)));
    if rest.is_empty() {
        API_PREFIX.to_string()
    } else {
        format!("{API_PREFIX}/{rest}")
    }
}
