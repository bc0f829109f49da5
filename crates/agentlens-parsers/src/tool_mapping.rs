use agentlens_types::EventKind;

/// Normalize a provider tool name to a display category.
///
/// The category set is open-ended: names outside the known groups fall
/// through as their lowercased form so the UI can still bucket them.
pub fn normalize_tool_type(name: &str) -> String {
    let lowered = name.to_lowercase();
    match lowered.as_str() {
        "bash" | "shell" | "run_command" | "exec" | "execute" | "terminal" | "run_terminal_cmd" => {
            "bash".to_string()
        }
        "read" | "read_file" | "view" | "view_file" | "cat" | "open_file" | "read_many_files" => {
            "read".to_string()
        }
        "edit" | "write" | "write_file" | "create_file" | "apply_patch" | "str_replace"
        | "str_replace_editor" | "edit_file" | "replace" | "multiedit" => "edit".to_string(),
        "glob" | "grep" | "search" | "search_file_content" | "find_files" | "codebase_search" => {
            "search".to_string()
        }
        "web_search" | "websearch" => "web:search".to_string(),
        "web_fetch" | "webfetch" | "open_page" | "fetch" => "web:open".to_string(),
        "task" | "agent" | "subagent" => "task".to_string(),
        "todowrite" | "todoread" | "update_plan" => "plan".to_string(),
        _ => lowered,
    }
}

/// Category for a web-search-style call, keyed by its `action.type`.
pub fn web_action_tool_type(action_type: &str) -> String {
    match action_type {
        "search" => "web:search".to_string(),
        "open_page" | "open" => "web:open".to_string(),
        "find" | "find_in_page" => "web:find".to_string(),
        other => format!("web:{}", other),
    }
}

/// Display label for the table-of-contents row.
pub fn toc_label(kind: EventKind, tool_name: &str, raw_type: &str) -> String {
    match kind {
        EventKind::User => "User".to_string(),
        EventKind::Assistant => "Assistant".to_string(),
        EventKind::Reasoning => "Thinking".to_string(),
        EventKind::System => "System".to_string(),
        EventKind::ToolUse => {
            if tool_name.is_empty() {
                "Tool".to_string()
            } else {
                format!("Tool: {}", tool_name)
            }
        }
        EventKind::ToolResult => {
            if tool_name.is_empty() {
                "Result".to_string()
            } else {
                format!("Result: {}", tool_name)
            }
        }
        EventKind::Meta => {
            if raw_type.is_empty() {
                "Meta".to_string()
            } else {
                raw_type.to_string()
            }
        }
    }
}
