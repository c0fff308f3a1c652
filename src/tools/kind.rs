//! 资源工具集合
//!
//! 工具是封闭枚举 `CloudTool`，分发处穷尽 match；新增工具必须同时补齐名称、参数类型、
//! 描述与分发分支，编译期即可发现遗漏。参数 Schema 由 schemars 从参数结构体生成。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::cloud::{DeleteMode, SortDirection};
use crate::llm::ToolDefinition;

/// 工具种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudTool {
    Query,
    Get,
    Create,
    Update,
    Delete,
    Action,
    Zql,
}

impl CloudTool {
    pub const ALL: [CloudTool; 7] = [
        CloudTool::Query,
        CloudTool::Get,
        CloudTool::Create,
        CloudTool::Update,
        CloudTool::Delete,
        CloudTool::Action,
        CloudTool::Zql,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CloudTool::Query => "query_resources",
            CloudTool::Get => "get_resource",
            CloudTool::Create => "create_resource",
            CloudTool::Update => "update_resource",
            CloudTool::Delete => "delete_resource",
            CloudTool::Action => "resource_action",
            CloudTool::Zql => "zql_query",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            CloudTool::Query => {
                "List resources in a collection with optional filter conditions, paging and sorting. \
                 Returns {items, total}. Does not paginate automatically."
            }
            CloudTool::Get => "Fetch one resource by uuid.",
            CloudTool::Create => "Create a resource in a collection. `body` is sent as the request body.",
            CloudTool::Update => "Update a resource by uuid. `body` is sent as the request body.",
            CloudTool::Delete => "Delete a resource by uuid. Mode Permissive refuses when dependents exist.",
            CloudTool::Action => {
                "Run an imperative action (start, stop, attach, ...) on a resource. \
                 `action` must have exactly one top-level key naming the action, e.g. \
                 {\"startVmInstance\": {}}."
            }
            CloudTool::Zql => {
                "Run a ZQL expression on the server, e.g. `query vminstance where state='Running'` \
                 or `count host`. Passed through unchanged."
            }
        }
    }

    pub fn parameters(&self) -> Value {
        match self {
            CloudTool::Query => schema_of::<QueryArgs>(),
            CloudTool::Get => schema_of::<GetArgs>(),
            CloudTool::Create => schema_of::<CreateArgs>(),
            CloudTool::Update => schema_of::<UpdateArgs>(),
            CloudTool::Delete => schema_of::<DeleteArgs>(),
            CloudTool::Action => schema_of::<ActionArgs>(),
            CloudTool::Zql => schema_of::<ZqlArgs>(),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// 全部工具定义（传给模型）
pub fn definitions() -> Vec<ToolDefinition> {
    CloudTool::ALL.iter().map(CloudTool::definition).collect()
}

/// 内联子 Schema，去掉 `$schema` / `title` 等厂商不需要的元字段
fn schema_of<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.remove("definitions");
    }
    value
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryArgs {
    /// Collection path, e.g. `vm-instances`, `hosts`, `l3-networks`
    pub path: String,
    /// Filter conditions passed through verbatim, e.g. `state=Running`, `name~=web%`
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Page size; defaults to 100
    #[serde(default)]
    pub limit: Option<u32>,
    /// Number of items to skip
    #[serde(default)]
    pub offset: Option<u32>,
    /// Field to sort by
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetArgs {
    /// Collection path, e.g. `vm-instances`
    pub path: String,
    /// Resource uuid
    pub uuid: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateArgs {
    pub path: String,
    /// Request body, usually `{"params": {...}}`
    pub body: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateArgs {
    pub path: String,
    pub uuid: String,
    /// Request body, usually `{"<updateAction>": {...}}`
    pub body: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteArgs {
    pub path: String,
    pub uuid: String,
    /// Defaults to Permissive
    #[serde(default)]
    pub mode: Option<DeleteMode>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ActionArgs {
    pub path: String,
    pub uuid: String,
    /// Single-key object naming the action, e.g. `{"stopVmInstance": {"type": "grace"}}`
    pub action: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ZqlArgs {
    /// ZQL expression
    pub zql: String,
}
