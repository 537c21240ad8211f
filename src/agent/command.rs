//! Outbound commands understood by the input-method agent.
//!
//! Each command renders to one function-call line, e.g.
//! `process_key_event(0, 97, 0, None, None)`. String arguments are emitted
//! as double-quoted literals with `\\`, `"` and control characters escaped,
//! so a rendered command never contains the line terminator.

use std::fmt::{Display, Formatter, Write as _};

/// Input context id used by a single-context editor integration.
pub const DEFAULT_CONTEXT: u32 = 0;

/// Focus polling interval pushed by [`bootstrap`], in milliseconds.
pub const FOCUS_OBSERVATION_INTERVAL_MS: u32 = 1000;

/// A command sent to the agent over stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Allocate a new input context; answered by `ibus_create_imcontext_cb`.
    CreateImContext,
    /// Release an input context.
    DestroyImContext {
        /// Context id.
        id: u32,
    },
    /// Forward a key press to the engine.
    ProcessKeyEvent {
        /// Context id.
        id: u32,
        /// X keysym value.
        keyval: u32,
        /// Modifier mask.
        modmask: u32,
    },
    /// Report the text around the cursor.
    SetSurroundingText {
        /// Context id.
        id: u32,
        /// Surrounding text.
        text: String,
        /// Cursor position within `text`, in characters.
        cursor_pos: u32,
        /// Selection anchor within `text`, in characters.
        anchor_pos: u32,
    },
    /// Focus the context.
    FocusIn {
        /// Context id.
        id: u32,
    },
    /// Unfocus the context.
    FocusOut {
        /// Context id.
        id: u32,
    },
    /// Reset the engine state of the context.
    Reset {
        /// Context id.
        id: u32,
    },
    /// Turn the input method on.
    Enable {
        /// Context id.
        id: u32,
    },
    /// Turn the input method off.
    Disable {
        /// Context id.
        id: u32,
    },
    /// Switch the context to a named engine.
    SetEngine {
        /// Context id.
        id: u32,
        /// Engine name, e.g. `anthy`.
        name: String,
    },
    /// Move the candidate window next to the cursor.
    SetCursorLocation {
        /// Context id.
        id: u32,
        /// Left edge, in screen pixels.
        x: i32,
        /// Top edge, in screen pixels.
        y: i32,
        /// Cursor width.
        w: u32,
        /// Cursor height.
        h: u32,
    },
    /// Poll window focus every `interval_ms` milliseconds.
    StartFocusObservation {
        /// Polling interval.
        interval_ms: u32,
    },
    /// Stop polling window focus.
    StopFocusObservation,
    /// Ask for `ibus_list_active_engines_cb`.
    ListActiveEngines,
}

impl AgentCommand {
    /// Wire name of the command.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateImContext => "create_imcontext",
            Self::DestroyImContext { .. } => "destroy_imcontext",
            Self::ProcessKeyEvent { .. } => "process_key_event",
            Self::SetSurroundingText { .. } => "set_surrounding_text",
            Self::FocusIn { .. } => "focus_in",
            Self::FocusOut { .. } => "focus_out",
            Self::Reset { .. } => "reset",
            Self::Enable { .. } => "enable",
            Self::Disable { .. } => "disable",
            Self::SetEngine { .. } => "set_engine",
            Self::SetCursorLocation { .. } => "set_cursor_location",
            Self::StartFocusObservation { .. } => "start_focus_observation",
            Self::StopFocusObservation => "stop_focus_observation",
            Self::ListActiveEngines => "list_active_engines",
        }
    }

    /// Rendered command followed by `terminator`.
    #[must_use]
    pub fn to_line(&self, terminator: &str) -> String {
        format!("{self}{terminator}")
    }

    /// Key press for `keyval` on `id` with no modifiers.
    #[must_use]
    pub fn key(id: u32, keyval: u32) -> Self {
        Self::ProcessKeyEvent {
            id,
            keyval,
            modmask: 0,
        }
    }

    /// Empty surrounding text for `id`.
    #[must_use]
    pub fn clear_surrounding_text(id: u32) -> Self {
        Self::SetSurroundingText {
            id,
            text: String::new(),
            cursor_pos: 0,
            anchor_pos: 0,
        }
    }
}

impl Display for AgentCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self.name();
        match self {
            Self::CreateImContext | Self::StopFocusObservation | Self::ListActiveEngines => {
                write!(f, "{name}()")
            }
            Self::DestroyImContext { id }
            | Self::FocusIn { id }
            | Self::FocusOut { id }
            | Self::Reset { id }
            | Self::Enable { id }
            | Self::Disable { id } => write!(f, "{name}({id})"),
            Self::ProcessKeyEvent { id, keyval, modmask } => {
                write!(f, "{name}({id}, {keyval}, {modmask}, None, None)")
            }
            Self::SetSurroundingText {
                id,
                text,
                cursor_pos,
                anchor_pos,
            } => write!(
                f,
                "{name}({id}, {}, {cursor_pos}, {anchor_pos})",
                quote(text)
            ),
            Self::SetEngine { id, name: engine } => {
                write!(f, "{name}({id}, {})", quote(engine))
            }
            Self::SetCursorLocation { id, x, y, w, h } => {
                write!(f, "{name}({id}, {x}, {y}, {w}, {h})")
            }
            Self::StartFocusObservation { interval_ms } => write!(f, "{name}({interval_ms})"),
        }
    }
}

/// Commands pushed right after the agent starts.
#[must_use]
pub fn bootstrap() -> Vec<AgentCommand> {
    vec![
        AgentCommand::ListActiveEngines,
        AgentCommand::CreateImContext,
        AgentCommand::StartFocusObservation {
            interval_ms: FOCUS_OBSERVATION_INTERVAL_MS,
        },
        AgentCommand::FocusIn {
            id: DEFAULT_CONTEXT,
        },
        AgentCommand::Enable {
            id: DEFAULT_CONTEXT,
        },
    ]
}

/// Commands typing `keys` into the default context: each key press is
/// followed by an empty surrounding-text update.
#[must_use]
pub fn key_sequence(keys: &str) -> Vec<AgentCommand> {
    keys.chars()
        .flat_map(|c| {
            [
                AgentCommand::key(DEFAULT_CONTEXT, u32::from(c)),
                AgentCommand::clear_surrounding_text(DEFAULT_CONTEXT),
            ]
        })
        .collect()
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
