use co_domain::stream::StepStopReason;
use co_domain::Error;

/// Map a reqwest error onto the shared error type, preserving the
/// timeout distinction.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Normalize provider stop reasons onto the shared vocabulary.
pub(crate) fn map_stop_reason(raw: &str) -> StepStopReason {
    match raw {
        "end_turn" | "stop" | "stop_sequence" => StepStopReason::EndTurn,
        "tool_use" | "tool_calls" => StepStopReason::ToolUse,
        "max_tokens" | "length" => StepStopReason::MaxTokens,
        _ => StepStopReason::Other,
    }
}
