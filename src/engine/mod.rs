//! 编排引擎：多轮工具调用循环、过程事件、结果截断

pub mod events;
pub mod loop_;
pub mod prompt;
pub mod truncate;

pub use events::{send_event, ChatEvent, EventSender};
pub use loop_::{
    CancelHandle, ChatEngine, EngineSettings, InFlightCall, InFlightRegistry, ABORTED_RESULT,
    DEFAULT_MAX_ROUNDS, DEFAULT_TIME_BUDGET,
};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
pub use truncate::{clip, serialize_clipped};
