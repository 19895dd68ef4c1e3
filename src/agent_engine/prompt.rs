/// Default system prompt, starting with the `/no_think` control marker.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../../prompts/system_prompt.md");

/// Outbound instruction for step `step` (1-based).
pub fn instruction(task: &str, step: u32) -> String {
    if step <= 1 {
        format!(
            "Task: {task}\n\n\
             This is the current screenshot. Analyse the screen and decide the first action."
        )
    } else {
        format!(
            "Continue the task: {task}\n\n\
             This is the screenshot after the previous action. Analyse the current state and \
             decide the next action.\n\
             If the task is complete, use the done action."
        )
    }
}
