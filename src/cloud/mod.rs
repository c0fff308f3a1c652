//! 资源层：通用认证 REST 客户端（会话、CRUD 动词、动作端点、ZQL 透传）

pub mod client;
pub mod error;
pub mod path;
pub mod query;
pub mod session;

pub use client::{CloudClient, CloudClientOptions, DeleteMode, QueryResult, ResourceApi};
pub use error::CloudError;
pub use path::{normalize_path, API_PREFIX};
pub use query::{QueryParams, SortDirection, DEFAULT_PAGE_SIZE};
pub use session::{digest_password, Credentials, SessionInfo, SessionStore};
