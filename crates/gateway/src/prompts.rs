//! Prompt templates: the agent system prompt, summarization, and title
//! generation.

/// System prompt for the coding agent, parameterized on the session's
/// working directory.
pub fn system_prompt(workdir: &str) -> String {
    format!(
        "You are Cobalt, an AI coding agent operating inside an isolated \
         sandbox container.\n\
         \n\
         The working directory for this session is: {workdir}\n\
         All relative paths in tool calls resolve against it.\n\
         \n\
         Guidelines:\n\
         - Inspect before you modify: read files and search the tree before editing.\n\
         - Prefer edit over write for existing files; keep changes minimal.\n\
         - Use bash with background=true for long-running commands and poll \
           them with job_output.\n\
         - Report results concisely; include file paths and line numbers when \
           referring to code.\n\
         - If a tool fails, read the error and adapt rather than repeating the \
           same call."
    )
}

/// System prompt for conversation summarization.
pub fn summary_system_prompt() -> &'static str {
    "You compress coding-agent conversations. Produce a summary that lets the \
     agent continue seamlessly: the user's goals, decisions taken, files \
     created or modified (with paths), commands run and their outcomes, open \
     problems, and the immediate next steps. Be specific and complete; omit \
     pleasantries."
}

/// The user-turn instruction appended when summarizing.
pub fn summary_request_prompt() -> &'static str {
    "Summarize the conversation so far following your instructions. Output \
     only the summary."
}

/// Prefix for a prompt re-queued because summarization interrupted it.
pub fn interrupted_prompt(original: &str) -> String {
    format!(
        "The previous attempt at this request was interrupted so the \
         conversation could be summarized. Continue working on it using the \
         summary above for context.\n\nOriginal request: {original}"
    )
}

/// Instruction for the title generator (small model).
pub fn title_prompt(first_message: &str) -> String {
    format!(
        "Generate a short title (at most 50 characters) for a coding session \
         that starts with this message. Output only the title, no quotes.\n\n\
         {first_message}"
    )
}
