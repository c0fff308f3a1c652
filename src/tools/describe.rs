//! tool_start 事件里的一行摘要：目标路径 + 截断的 uuid

use serde_json::Value;

use crate::cloud::normalize_path;
use crate::tools::CloudTool;

const ID_PREVIEW: usize = 8;
const ZQL_PREVIEW: usize = 60;

fn arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn short(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max).collect::<String>())
    }
}

fn target(args: &Value) -> String {
    let path = normalize_path(arg(args, "path"));
    let id = arg(args, "uuid");
    if id.is_empty() {
        path
    } else {
        format!("{path}/{}", short(id, ID_PREVIEW))
    }
}

/// 生成工具调用的人类可读摘要
pub fn describe(name: &str, args: &Value) -> String {
    let Some(tool) = CloudTool::from_name(name) else {
        return format!("unknown tool {name}");
    };
    match tool {
        CloudTool::Query => {
            let n = args
                .get("conditions")
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            if n == 0 {
                format!("Listing {}", target(args))
            } else {
                format!("Listing {} ({n} conditions)", target(args))
            }
        }
        CloudTool::Get => format!("Reading {}", target(args)),
        CloudTool::Create => format!("Creating in {}", target(args)),
        CloudTool::Update => format!("Updating {}", target(args)),
        CloudTool::Delete => format!("Deleting {}", target(args)),
        CloudTool::Action => {
            let action = args
                .get("action")
                .and_then(|v| v.as_object())
                .and_then(|o| o.keys().next().cloned())
                .unwrap_or_else(|| "action".to_string());
            format!("{action} on {}", target(args))
        }
        CloudTool::Zql => format!("ZQL: {}", short(arg(args, "zql"), ZQL_PREVIEW)),
    }
}
