//! Conversation-history repair ahead of a chat-completion request.
//!
//! Providers reject a transcript unless every assistant turn that issues tool
//! calls is followed, before anything else, by one tool message per call ID.
//! Histories that survived restarts, truncation, or a crash mid round-trip
//! often break that contract. [`sanitize_history`] recovers a valid transcript
//! by deleting the offending fragments, never reordering what is left:
//!
//! 1. [`filter_and_merge`] drops tool messages and tool-call turns that have no
//!    valid predecessor and keeps only the latest of consecutive user turns.
//! 2. [`validate_tool_call_groups`] drops every tool-call turn whose call IDs are
//!    not all answered, together with the partial results that follow it.
//!
//! Nothing here fails. Each removal is reported as a [`DropEvent`] instead.

use crate::protocol::{Message, Role};
use serde::Serialize;
use std::collections::HashSet;

/// Why a message disappeared from the history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropEvent {
    /// A tool message arrived before anything was accepted.
    OrphanedLeadingTool { index: usize },
    /// A tool message not preceded by a tool-call turn (tool messages skipped).
    OrphanedTool { index: usize },
    /// A tool-call turn arrived before anything was accepted.
    ToolCallTurnAtStart { index: usize },
    /// A tool-call turn directly after something other than a user or tool message.
    ToolCallTurnInvalidPredecessor { index: usize, prev_role: Role },
    /// A tool-call turn with unanswered call IDs, removed along with its results.
    IncompleteToolCallGroup {
        expected: usize,
        found: usize,
        removed: usize,
    },
    /// An earlier user turn replaced by the one that followed it.
    UserTurnMerged,
}

impl DropEvent {
    pub fn reason(&self) -> &'static str {
        match self {
            DropEvent::OrphanedLeadingTool { .. } => "orphaned_leading_tool",
            DropEvent::OrphanedTool { .. } => "orphaned_tool",
            DropEvent::ToolCallTurnAtStart { .. } => "tool_call_turn_at_start",
            DropEvent::ToolCallTurnInvalidPredecessor { .. } => {
                "tool_call_turn_invalid_predecessor"
            }
            DropEvent::IncompleteToolCallGroup { .. } => "incomplete_tool_call_group",
            DropEvent::UserTurnMerged => "user_turn_merged",
        }
    }

    /// Number of messages this event removed from the history.
    pub fn removed(&self) -> usize {
        match self {
            DropEvent::IncompleteToolCallGroup { removed, .. } => *removed,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub input_len: usize,
    pub output_len: usize,
    pub events: Vec<DropEvent>,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.events.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.input_len - self.output_len
    }

    pub fn count(&self, reason: &str) -> usize {
        self.events.iter().filter(|e| e.reason() == reason).count()
    }
}

/// Returns a copy of `history` that a tool-calling provider will accept.
pub fn sanitize_history(history: &[Message]) -> Vec<Message> {
    sanitize_history_with_report(history).0
}

/// Like [`sanitize_history`], also returning what was removed and why.
pub fn sanitize_history_with_report(history: &[Message]) -> (Vec<Message>, SanitizeReport) {
    if history.is_empty() {
        return (Vec::new(), SanitizeReport::default());
    }

    let (filtered, mut events) = filter_and_merge(history);
    let (validated, group_events) = validate_tool_call_groups(filtered);
    events.extend(group_events);

    let report = SanitizeReport {
        input_len: history.len(),
        output_len: validated.len(),
        events,
    };
    (validated, report)
}

/// Pass 1. Looks backward only over what it has already accepted.
pub fn filter_and_merge(history: &[Message]) -> (Vec<Message>, Vec<DropEvent>) {
    let mut accepted: Vec<Message> = Vec::with_capacity(history.len());
    let mut events = Vec::new();

    for (index, msg) in history.iter().enumerate() {
        match msg.role {
            Role::Tool => {
                if accepted.is_empty() {
                    events.push(DropEvent::OrphanedLeadingTool { index });
                    continue;
                }
                // The tool_call_id is not matched here; any open tool-call turn will do.
                if !follows_tool_call_turn(&accepted) {
                    events.push(DropEvent::OrphanedTool { index });
                    continue;
                }
                accepted.push(msg.clone());
            }
            Role::Assistant if msg.has_tool_calls() => {
                let Some(prev) = accepted.last() else {
                    events.push(DropEvent::ToolCallTurnAtStart { index });
                    continue;
                };
                if !matches!(prev.role, Role::User | Role::Tool) {
                    events.push(DropEvent::ToolCallTurnInvalidPredecessor {
                        index,
                        prev_role: prev.role.clone(),
                    });
                    continue;
                }
                accepted.push(msg.clone());
            }
            Role::Assistant => accepted.push(msg.clone()),
            _ => {
                if push_merging_user(&mut accepted, msg.clone()) {
                    events.push(DropEvent::UserTurnMerged);
                }
            }
        }
    }

    (accepted, events)
}

/// Pass 2. Keeps a tool-call turn only when its following run of tool messages
/// answers every non-empty call ID; otherwise the whole run goes with it.
pub fn validate_tool_call_groups(messages: Vec<Message>) -> (Vec<Message>, Vec<DropEvent>) {
    let mut validated: Vec<Message> = Vec::with_capacity(messages.len());
    let mut events = Vec::new();
    let mut iter = messages.into_iter().peekable();

    while let Some(msg) = iter.next() {
        if !msg.is_tool_call_turn() {
            // Removing a group can leave two user turns next to each other.
            if push_merging_user(&mut validated, msg) {
                events.push(DropEvent::UserTurnMerged);
            }
            continue;
        }

        let mut results = Vec::new();
        while let Some(result) = iter.next_if(|m| m.role == Role::Tool) {
            results.push(result);
        }

        let (expected_len, found_len, complete) = {
            let expected: HashSet<&str> = msg
                .tool_calls
                .iter()
                .map(|call| call.id.as_str())
                .filter(|id| !id.is_empty())
                .collect();
            let found: HashSet<&str> = results
                .iter()
                .filter_map(|m| m.tool_call_id.as_deref())
                .filter(|id| !id.is_empty())
                .collect();
            let complete = !expected.is_empty() && expected.is_subset(&found);
            (expected.len(), found.len(), complete)
        };

        if complete {
            validated.push(msg);
            validated.extend(results);
        } else {
            events.push(DropEvent::IncompleteToolCallGroup {
                expected: expected_len,
                found: found_len,
                removed: 1 + results.len(),
            });
        }
    }

    (validated, events)
}

fn follows_tool_call_turn(accepted: &[Message]) -> bool {
    for msg in accepted.iter().rev() {
        if msg.role == Role::Tool {
            continue;
        }
        return msg.is_tool_call_turn();
    }
    false
}

/// Appends `msg`, or replaces the last message when both are user turns.
/// Returns true on replacement.
fn push_merging_user(out: &mut Vec<Message>, msg: Message) -> bool {
    if msg.role == Role::User {
        if let Some(last) = out.last_mut() {
            if last.role == Role::User {
                *last = msg;
                return true;
            }
        }
    }
    out.push(msg);
    false
}

#[cfg(test)]
mod tests {
    use super::{filter_and_merge, sanitize_history, sanitize_history_with_report, DropEvent};
    use crate::protocol::{Message, Role, ToolCall};
    use std::collections::HashSet;

    fn call(id: &str) -> ToolCall {
        ToolCall::function(id, "shell_command", "{}")
    }

    fn tool_turn(ids: &[&str]) -> Message {
        Message::assistant_with_tool_calls(ids.iter().map(|id| call(id)).collect())
    }

    fn roles(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.role.as_str()).collect()
    }

    #[test]
    fn complete_group_is_unchanged() {
        let history = vec![
            Message::user("list files"),
            tool_turn(&["callA"]),
            Message::tool_result("callA", "a.txt"),
        ];
        let (out, report) = sanitize_history_with_report(&history);
        assert_eq!(out, history);
        assert!(report.is_clean());
    }

    #[test]
    fn drops_leading_orphaned_tool() {
        let history = vec![Message::tool_result("callA", "stale")];
        let (out, report) = sanitize_history_with_report(&history);
        assert!(out.is_empty());
        assert_eq!(
            report.events,
            vec![DropEvent::OrphanedLeadingTool { index: 0 }]
        );
    }

    #[test]
    fn drops_incomplete_group_with_partial_results() {
        let history = vec![
            Message::user("do two things"),
            tool_turn(&["callA", "callB"]),
            Message::tool_result("callA", "done"),
        ];
        let (out, report) = sanitize_history_with_report(&history);
        assert_eq!(out, vec![Message::user("do two things")]);
        assert_eq!(
            report.events,
            vec![DropEvent::IncompleteToolCallGroup {
                expected: 2,
                found: 1,
                removed: 2,
            }]
        );
        assert_eq!(report.dropped(), 2);
    }

    #[test]
    fn keeps_latest_of_consecutive_user_turns() {
        let history = vec![Message::user("hi"), Message::user("hi again")];
        let (out, report) = sanitize_history_with_report(&history);
        assert_eq!(out, vec![Message::user("hi again")]);
        assert_eq!(report.count("user_turn_merged"), 1);
    }

    #[test]
    fn drops_tool_call_turn_at_start() {
        let history = vec![tool_turn(&["callA"])];
        let (out, report) = sanitize_history_with_report(&history);
        assert!(out.is_empty());
        assert_eq!(
            report.events,
            vec![DropEvent::ToolCallTurnAtStart { index: 0 }]
        );
    }

    #[test]
    fn tolerates_extra_results_for_same_call() {
        let history = vec![
            Message::user("go"),
            tool_turn(&["callA"]),
            Message::tool_result("callA", "first"),
            Message::tool_result("callA", "second"),
        ];
        assert_eq!(sanitize_history(&history), history);
    }

    #[test]
    fn drops_tool_call_turn_after_assistant() {
        let history = vec![
            Message::user("go"),
            Message::assistant("thinking"),
            tool_turn(&["callA"]),
            Message::tool_result("callA", "x"),
        ];
        let (out, report) = sanitize_history_with_report(&history);
        assert_eq!(roles(&out), vec!["user", "assistant"]);
        assert_eq!(
            report.events,
            vec![
                DropEvent::ToolCallTurnInvalidPredecessor {
                    index: 2,
                    prev_role: Role::Assistant,
                },
                DropEvent::OrphanedTool { index: 3 },
            ]
        );
    }

    #[test]
    fn chained_tool_call_turns_survive() {
        let history = vec![
            Message::user("go"),
            tool_turn(&["a"]),
            Message::tool_result("a", "1"),
            tool_turn(&["b", "c"]),
            Message::tool_result("c", "3"),
            Message::tool_result("b", "2"),
            Message::assistant("done"),
        ];
        assert_eq!(sanitize_history(&history), history);
    }

    #[test]
    fn later_group_survives_when_earlier_group_is_dropped() {
        let history = vec![
            Message::user("go"),
            tool_turn(&["a", "b"]),
            Message::tool_result("a", "1"),
            tool_turn(&["c"]),
            Message::tool_result("c", "3"),
        ];
        let out = sanitize_history(&history);
        assert_eq!(
            out,
            vec![
                Message::user("go"),
                tool_turn(&["c"]),
                Message::tool_result("c", "3"),
            ]
        );
    }

    #[test]
    fn calls_with_only_empty_ids_are_never_complete() {
        let history = vec![
            Message::user("go"),
            tool_turn(&[""]),
            Message::tool_result("", "whatever"),
        ];
        assert_eq!(sanitize_history(&history), vec![Message::user("go")]);
    }

    #[test]
    fn empty_ids_are_ignored_when_others_are_answered() {
        let history = vec![
            Message::user("go"),
            tool_turn(&["a", ""]),
            Message::tool_result("a", "1"),
        ];
        assert_eq!(sanitize_history(&history), history);
    }

    #[test]
    fn result_without_call_id_is_kept_after_open_turn() {
        let mut anonymous = Message::tool_result("", "no id");
        anonymous.tool_call_id = None;
        let history = vec![
            Message::user("go"),
            tool_turn(&["a"]),
            Message::tool_result("a", "1"),
            anonymous,
        ];
        assert_eq!(sanitize_history(&history), history);
    }

    #[test]
    fn merges_users_left_adjacent_by_dropped_group() {
        let history = vec![
            Message::user("first"),
            tool_turn(&["a"]),
            Message::user("second"),
        ];
        let (out, report) = sanitize_history_with_report(&history);
        assert_eq!(out, vec![Message::user("second")]);
        assert_eq!(report.count("incomplete_tool_call_group"), 1);
        assert_eq!(report.count("user_turn_merged"), 1);
        assert_eq!(sanitize_history(&out), out);
    }

    #[test]
    fn system_and_unknown_roles_pass_through() {
        let developer = Message {
            role: Role::Other("developer".to_string()),
            ..Message::user("be terse")
        };
        let history = vec![
            Message::system("sys"),
            developer.clone(),
            developer.clone(),
            Message::user("q"),
        ];
        let (out, _) = filter_and_merge(&history);
        assert_eq!(out, history);
    }

    #[test]
    fn does_not_mutate_input() {
        let history = vec![Message::tool_result("a", "x"), Message::user("q")];
        let before = history.clone();
        let _ = sanitize_history(&history);
        assert_eq!(history, before);
    }

    fn satisfies_invariants(out: &[Message]) -> bool {
        for (i, msg) in out.iter().enumerate() {
            if msg.role == Role::Tool {
                let anchor = out[..i].iter().rev().find(|m| m.role != Role::Tool);
                if !anchor.is_some_and(|m| m.is_tool_call_turn()) {
                    return false;
                }
            }
            if msg.is_tool_call_turn() {
                let found: HashSet<&str> = out[i + 1..]
                    .iter()
                    .take_while(|m| m.role == Role::Tool)
                    .filter_map(|m| m.tool_call_id.as_deref())
                    .collect();
                let expected: Vec<&str> = msg
                    .tool_calls
                    .iter()
                    .map(|c| c.id.as_str())
                    .filter(|id| !id.is_empty())
                    .collect();
                if expected.is_empty() || !expected.iter().all(|id| found.contains(id)) {
                    return false;
                }
            }
            if i > 0 && msg.role == Role::User && out[i - 1].role == Role::User {
                return false;
            }
        }
        true
    }

    fn is_subsequence(out: &[Message], input: &[Message]) -> bool {
        let mut rest = input.iter();
        out.iter().all(|m| rest.any(|candidate| candidate == m))
    }

    fn build(kinds: &[usize]) -> Vec<Message> {
        kinds
            .iter()
            .enumerate()
            .map(|(pos, kind)| {
                let text = format!("m{pos}");
                match kind {
                    0 => Message::user(text),
                    1 => Message::assistant(text),
                    2 => Message {
                        content: Some(text),
                        ..tool_turn(&["a"])
                    },
                    3 => Message {
                        content: Some(text),
                        ..tool_turn(&["a", "b"])
                    },
                    4 => Message::tool_result("a", text),
                    5 => Message::tool_result("b", text),
                    6 => Message {
                        content: Some(text),
                        ..tool_turn(&[""])
                    },
                    _ => Message::system(text),
                }
            })
            .collect()
    }

    #[test]
    fn every_short_history_sanitizes_to_a_valid_fixed_point() {
        const KINDS: usize = 8;
        const MAX_LEN: u32 = 5;
        for len in 0..=MAX_LEN {
            for mut code in 0..KINDS.pow(len) {
                let mut kinds = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    kinds.push(code % KINDS);
                    code /= KINDS;
                }
                let input = build(&kinds);
                let (out, report) = sanitize_history_with_report(&input);

                assert!(out.len() <= input.len(), "{kinds:?}");
                assert!(satisfies_invariants(&out), "invariants broken for {kinds:?}");
                assert!(is_subsequence(&out, &input), "reordered for {kinds:?}");
                assert_eq!(sanitize_history(&out), out, "not idempotent for {kinds:?}");
                let removed: usize = report.events.iter().map(|e| e.removed()).sum();
                assert_eq!(removed, report.dropped(), "{kinds:?}");
            }
        }
    }
}
