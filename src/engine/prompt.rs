//! 默认 system prompt 与运行模式引导语拼接

use crate::llm::OperatingMode;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a cloud operations assistant. You manage resources on a cloud platform through the \
provided tools. Resource paths are collection names such as `vm-instances`, `hosts`, \
`l3-networks` or `volumes`; the API version prefix is added automatically.

- Prefer `zql_query` for counting and cross-resource questions.
- Look resources up before changing them, and confirm the target uuid in your answer.
- Mutating calls (create, update, delete, actions) run for real. Do not repeat a mutating \
call unless the previous attempt clearly failed.
- When a tool returns {\"error\": ...}, explain the failure or correct the arguments.";

/// 基础 prompt + 当前模式的引导语
pub fn compose(base: &str, mode: OperatingMode) -> String {
    let base = base.trim();
    if base.is_empty() {
        mode.prompt_guidance().to_string()
    } else {
        format!("{base}\n\n{}", mode.prompt_guidance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_appends_mode_guidance() {
        let p = compose("base", OperatingMode::Compact);
        assert!(p.starts_with("base\n\n"));
        assert!(p.contains("compact"));
        assert_eq!(compose("  ", OperatingMode::Full), OperatingMode::Full.prompt_guidance());
    }
}
