//! Terminal rendering of messages, comparison slots and enhancements.

use colored::*;

use crate::events::ChatEvent;
use crate::message::{ComparisonMessage, Message, ModelSlot, Role, SlotKey};
use crate::tabs::Enhancement;

/// A run of plain text or one fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code { lang: String, code: String },
}

/// Split markdown-ish text on ``` fences. An unterminated fence runs to the end.
pub fn split_fences(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut fence: Option<String> = None;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        match (&fence, trimmed.strip_prefix("```")) {
            (None, Some(info)) => {
                if !buf.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut buf)));
                }
                fence = Some(info.trim().to_string());
            }
            (Some(_), Some(rest)) if rest.trim().is_empty() => {
                let lang = fence.take().unwrap_or_default();
                segments.push(Segment::Code {
                    lang,
                    code: std::mem::take(&mut buf),
                });
            }
            _ => buf.push_str(line),
        }
    }

    match fence {
        Some(lang) => segments.push(Segment::Code { lang, code: buf }),
        None if !buf.is_empty() => segments.push(Segment::Text(buf)),
        None => {}
    }
    segments
}

fn render_body(text: &str) -> String {
    let mut out = String::new();
    for segment in split_fences(text) {
        match segment {
            Segment::Text(t) => out.push_str(&t),
            Segment::Code { lang, code } => {
                let label = if lang.is_empty() { "code".to_string() } else { lang };
                out.push_str(&format!("{}\n", format!("┌─ {label}").bright_black()));
                for line in code.lines() {
                    out.push_str(&format!("{} {}\n", "│".bright_black(), line.bright_white()));
                }
                out.push_str(&format!("{}\n", "└─".bright_black()));
            }
        }
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

pub fn render_message(message: &Message) -> String {
    if let Some(kind) = message.failure {
        return format!(
            "{} {}\n",
            format!("✗ [{kind}]").bright_red().bold(),
            message.content.bright_red()
        );
    }
    let label = match message.role {
        Role::User => "you".bright_cyan().bold(),
        Role::Assistant => "assistant".bright_green().bold(),
    };
    let attribution = match &message.model_info {
        Some(info) => format!(" {}", format!("({}: {})", info.provider, info.model).bright_black()),
        None => String::new(),
    };
    format!("{label}{attribution}\n{}", render_body(&message.content))
}

pub fn render_slot(key: SlotKey, slot: &ModelSlot) -> String {
    let header = format!("[{key}] {}: {}", slot.provider, slot.model);
    if slot.is_loading {
        return format!("{} {}\n", header.bright_yellow().bold(), "loading...".bright_black());
    }
    match slot.failure {
        Some(kind) => format!(
            "{}\n{}\n",
            header.bright_yellow().bold(),
            format!("✗ [{kind}] {}", slot.content).bright_red()
        ),
        None => format!("{}\n{}", header.bright_yellow().bold(), render_body(&slot.content)),
    }
}

pub fn render_comparison(comparison: &ComparisonMessage) -> String {
    let mut out = format!(
        "{} {}\n",
        "compare".bright_magenta().bold(),
        comparison.user_message.bright_white()
    );
    for (key, slot) in comparison.slots() {
        out.push_str(&render_slot(key, slot));
    }
    out
}

pub fn render_enhancement(enhancement: &Enhancement) -> String {
    match enhancement {
        Enhancement::Pending => format!("{}\n", "enhancing answer...".bright_black()),
        Enhancement::Ready { text } => format!(
            "{}\n{}",
            "Enhanced answer".bright_green().bold(),
            render_body(text)
        ),
        Enhancement::Failed { fallback, error } => format!(
            "{}\n{}",
            format!("✗ enhancement failed: {error}").bright_red(),
            render_body(fallback)
        ),
    }
}

/// Text for a view event, or `None` for events the terminal does not echo.
///
/// User messages are not echoed; the prompt already shows them.
pub fn render_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::MessageAppended { message, .. } if message.role == Role::Assistant => {
            Some(render_message(message))
        }
        ChatEvent::ComparisonStarted { comparison } => Some(render_comparison(comparison)),
        ChatEvent::SlotSettled { slot, state, .. } => Some(render_slot(*slot, state)),
        ChatEvent::FilesChanged { count } => {
            Some(format!("{}\n", format!("{count} file(s) selected").bright_black()))
        }
        ChatEvent::RetrievalKeyChanged { key: Some(key) } => Some(format!(
            "{} {}\n",
            "retrieval key ready:".bright_green(),
            key.bright_white()
        )),
        ChatEvent::RetrievalKeyChanged { key: None } => Some(format!(
            "{}\n",
            "retrieval key cleared; run /embed again".bright_yellow()
        )),
        ChatEvent::EnhancementChanged { enhancement, .. } => Some(render_enhancement(enhancement)),
        ChatEvent::Cleared { tab } => Some(format!("{}\n", format!("[{tab}] cleared").bright_black())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::message::{CompareModels, ModelInfo};

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_split_plain_text() {
        assert_eq!(split_fences("hello\nworld"), vec![Segment::Text("hello\nworld".into())]);
        assert!(split_fences("").is_empty());
    }

    #[test]
    fn test_split_code_block_with_language() {
        let text = "Try this:\n```rust\nfn main() {}\n```\nDone.";
        assert_eq!(
            split_fences(text),
            vec![
                Segment::Text("Try this:\n".into()),
                Segment::Code {
                    lang: "rust".into(),
                    code: "fn main() {}\n".into()
                },
                Segment::Text("Done.".into()),
            ]
        );
    }

    #[test]
    fn test_split_unterminated_fence() {
        let segments = split_fences("```\nprint(1)\n");
        assert_eq!(
            segments,
            vec![Segment::Code {
                lang: String::new(),
                code: "print(1)\n".into()
            }]
        );
    }

    #[test]
    fn test_render_assistant_with_attribution() {
        plain();
        let msg = Message::assistant(
            "4",
            "c1",
            Some(ModelInfo {
                provider: "Ollama".into(),
                model: "gpt-oss:20b".into(),
            }),
        );
        let out = render_message(&msg);
        assert!(out.starts_with("assistant (Ollama: gpt-oss:20b)\n"));
        assert!(out.ends_with("4\n"));
    }

    #[test]
    fn test_render_failure_marks_kind() {
        plain();
        let err = ChatError::Status {
            status: 502,
            url: "http://x".into(),
            detail: "bad gateway".into(),
        };
        let out = render_message(&Message::failure(&err, ""));
        assert!(out.contains("[backend error 502]"));
    }

    #[test]
    fn test_render_code_block_label() {
        plain();
        let msg = Message::assistant("```py\nx = 1\n```", "", None);
        let out = render_message(&msg);
        assert!(out.contains("┌─ py"));
        assert!(out.contains("│ x = 1"));
    }

    #[test]
    fn test_render_loading_comparison() {
        plain();
        let c = ComparisonMessage::new("hi", &CompareModels::new("a", "b", "c"));
        let out = render_comparison(&c);
        assert!(out.contains("[model1] Local: a loading..."));
        assert!(out.contains("[model3] Local: c loading..."));
    }

    #[test]
    fn test_render_enhancement_header() {
        plain();
        let out = render_enhancement(&Enhancement::Ready { text: "better".into() });
        assert!(out.starts_with("Enhanced answer\n"));
    }
}
