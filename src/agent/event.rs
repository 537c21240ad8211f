//! Inbound agent messages and typed dispatch.
//!
//! Each framed stdout line from the agent is one of:
//!
//! | Shape                                   | Parsed as                  |
//! |-----------------------------------------|----------------------------|
//! | text not starting with `{`              | [`Inbound::Text`]          |
//! | `{"message": "..."}`                    | [`Inbound::Message`]       |
//! | `{"command": "<known>", "args": ...}`   | [`Inbound::Event`]         |
//! | `{"command": "<other>", "args": ...}`   | [`Inbound::Unknown`]       |
//!
//! `args` may be positional (array) or keyword (object); positional values
//! are bound to parameter names in declaration order. [`dispatch`] maps
//! every [`AgentEvent`] onto its [`EventHandler`] method; unknown commands
//! are logged and ignored.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{AppError, Result};

// ── Wire envelope ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    message: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Value,
}

/// Classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Plain text line.
    Text(String),
    /// Human-readable diagnostic from the agent.
    Message(String),
    /// Recognised command.
    Event(AgentEvent),
    /// Well-formed command with an unrecognised name.
    Unknown {
        /// Command name as sent.
        command: String,
        /// Raw arguments.
        args: Value,
    },
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Named event emitted by the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// `error(message)`: the agent hit an error.
    Error {
        /// Error description.
        message: String,
    },
    /// `setq(name, value)`: the agent publishes a variable.
    Setq {
        /// Variable name, e.g. `ibus_version`.
        name: String,
        /// Variable value.
        value: Value,
    },
    /// `ibus_log(message)`.
    Log {
        /// Log text.
        message: String,
    },
    /// `ibus_create_imcontext_cb(id_no)`: a context was allocated.
    ImContextCreated {
        /// New context id.
        id_no: u32,
    },
    /// `ibus_start_focus_observation_cb(window_id)`.
    FocusObservationStarted {
        /// Focused window.
        window_id: u64,
    },
    /// `ibus_focus_changed_cb(window_id)`.
    FocusChanged {
        /// Newly focused window.
        window_id: u64,
    },
    /// `ibus_redo_focus_in_cb()`.
    RedoFocusIn,
    /// `ibus_status_changed_cb(id_no, engine_name)`: `None` means disabled.
    StatusChanged {
        /// Context id.
        id_no: u32,
        /// Active engine, if enabled.
        engine_name: Option<String>,
    },
    /// `ibus_query_surrounding_text_cb(...)`: engine wants surrounding text
    /// before it handles the key.
    QuerySurroundingText {
        /// Context id.
        id_no: u32,
        /// Pending keysym.
        keyval: u32,
        /// Pending modifier mask.
        modmask: u32,
        /// Backslash keycode hint.
        backslash: Option<u32>,
        /// Press (`true`) or release (`false`), if known.
        pressed: Option<bool>,
    },
    /// `ibus_update_preedit_text_cb(...)`.
    UpdatePreeditText {
        /// Context id.
        id_no: u32,
        /// Composed text.
        text: String,
        /// Cursor offset in `text`.
        cursor_pos: u32,
        /// Whether the preedit is shown.
        visible: bool,
        /// Space-separated attribute runs.
        attributes: String,
    },
    /// `ibus_show_preedit_text_cb(id_no)`.
    ShowPreeditText {
        /// Context id.
        id_no: u32,
    },
    /// `ibus_hide_preedit_text_cb(id_no)`.
    HidePreeditText {
        /// Context id.
        id_no: u32,
    },
    /// `ibus_commit_text_cb(id_no, text)`: insert `text` into the buffer.
    CommitText {
        /// Context id.
        id_no: u32,
        /// Committed text.
        text: String,
    },
    /// `ibus_update_auxiliary_text_cb(id_no, text, visible)`.
    UpdateAuxiliaryText {
        /// Context id.
        id_no: u32,
        /// Auxiliary text.
        text: String,
        /// Whether it is shown.
        visible: bool,
    },
    /// `ibus_show_auxiliary_text_cb(id_no)`.
    ShowAuxiliaryText {
        /// Context id.
        id_no: u32,
    },
    /// `ibus_hide_auxiliary_text_cb(id_no)`.
    HideAuxiliaryText {
        /// Context id.
        id_no: u32,
    },
    /// `ibus_show_lookup_table_cb(id_no, candidates, cursor_pos)`.
    ShowLookupTable {
        /// Context id.
        id_no: u32,
        /// Candidates on the current page.
        candidates: Vec<String>,
        /// Highlighted candidate on the page.
        cursor_pos: u32,
    },
    /// `ibus_hide_lookup_table_cb(id_no)`.
    HideLookupTable {
        /// Context id.
        id_no: u32,
    },
    /// `ibus_forward_key_event_cb(...)`: the engine passes a key back.
    ForwardKeyEvent {
        /// Context id.
        id_no: u32,
        /// Keysym.
        keyval: u32,
        /// Modifier mask without the release bit.
        modmask: u32,
        /// Press (`true`) or release.
        pressed: bool,
    },
    /// `ibus_delete_surrounding_text_cb(id_no, offset, n_chars)`.
    DeleteSurroundingText {
        /// Context id.
        id_no: u32,
        /// Offset from the cursor, in characters.
        offset: i32,
        /// Characters to delete.
        n_chars: u32,
    },
    /// `ibus_process_key_event_cb(id_no, handled)`.
    KeyEventProcessed {
        /// Context id.
        id_no: u32,
        /// Whether the engine consumed the key.
        handled: bool,
    },
    /// `ibus_list_active_engines_cb(engines)`.
    ActiveEngines {
        /// Engine names.
        engines: Vec<String>,
    },
}

// ── Argument shapes ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageArgs {
    message: String,
}

#[derive(Deserialize)]
struct SetqArgs {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct IdArgs {
    id_no: u32,
}

#[derive(Deserialize)]
struct WindowArgs {
    window_id: u64,
}

#[derive(Deserialize)]
struct StatusArgs {
    id_no: u32,
    #[serde(default)]
    engine_name: Option<String>,
}

#[derive(Deserialize)]
struct QuerySurroundingArgs {
    id_no: u32,
    keyval: u32,
    modmask: u32,
    #[serde(default)]
    backslash: Option<u32>,
    #[serde(default)]
    pressed: Option<bool>,
}

#[derive(Deserialize)]
struct PreeditArgs {
    id_no: u32,
    text: String,
    cursor_pos: u32,
    visible: bool,
    #[serde(default)]
    attributes: String,
}

#[derive(Deserialize)]
struct TextArgs {
    id_no: u32,
    text: String,
}

#[derive(Deserialize)]
struct AuxiliaryArgs {
    id_no: u32,
    text: String,
    visible: bool,
}

#[derive(Deserialize)]
struct LookupArgs {
    id_no: u32,
    candidates: Vec<String>,
    cursor_pos: u32,
}

#[derive(Deserialize)]
struct ForwardKeyArgs {
    id_no: u32,
    keyval: u32,
    modmask: u32,
    pressed: bool,
}

#[derive(Deserialize)]
struct DeleteSurroundingArgs {
    id_no: u32,
    offset: i32,
    n_chars: u32,
}

#[derive(Deserialize)]
struct HandledArgs {
    id_no: u32,
    handled: bool,
}

#[derive(Deserialize)]
struct EnginesArgs {
    engines: Vec<String>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Classify one framed line from the agent.
///
/// # Errors
///
/// - `AppError::Protocol("malformed json: …")` — starts with `{` but is
///   not a JSON object.
/// - `AppError::Protocol("invalid args …")` — known command, wrong
///   argument shape.
/// - `AppError::Protocol("missing command or message")` — neither key set.
pub fn parse_inbound_line(line: &str) -> Result<Inbound> {
    if !line.starts_with('{') {
        return Ok(Inbound::Text(line.to_owned()));
    }

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    if let Some(message) = envelope.message {
        return Ok(Inbound::Message(message));
    }

    let command = envelope
        .command
        .ok_or_else(|| AppError::Protocol("missing command or message".into()))?;

    match parse_event(&command, envelope.args)? {
        Ok(event) => Ok(Inbound::Event(event)),
        Err(args) => Ok(Inbound::Unknown { command, args }),
    }
}

/// Build the event for `command`. Unknown names hand `args` back in `Err`.
fn parse_event(command: &str, args: Value) -> Result<std::result::Result<AgentEvent, Value>> {
    let event = match command {
        "error" => {
            let a: MessageArgs = bind(command, args, &["message"])?;
            AgentEvent::Error { message: a.message }
        }
        "setq" => {
            let a: SetqArgs = bind(command, args, &["name", "value"])?;
            AgentEvent::Setq {
                name: a.name,
                value: a.value,
            }
        }
        "ibus_log" => {
            let a: MessageArgs = bind(command, args, &["message"])?;
            AgentEvent::Log { message: a.message }
        }
        "ibus_create_imcontext_cb" => {
            let a: IdArgs = bind(command, args, &["id_no"])?;
            AgentEvent::ImContextCreated { id_no: a.id_no }
        }
        "ibus_start_focus_observation_cb" => {
            let a: WindowArgs = bind(command, args, &["window_id"])?;
            AgentEvent::FocusObservationStarted {
                window_id: a.window_id,
            }
        }
        "ibus_focus_changed_cb" => {
            let a: WindowArgs = bind(command, args, &["window_id"])?;
            AgentEvent::FocusChanged {
                window_id: a.window_id,
            }
        }
        "ibus_redo_focus_in_cb" => AgentEvent::RedoFocusIn,
        "ibus_status_changed_cb" => {
            let a: StatusArgs = bind(command, args, &["id_no", "engine_name"])?;
            AgentEvent::StatusChanged {
                id_no: a.id_no,
                engine_name: a.engine_name,
            }
        }
        "ibus_query_surrounding_text_cb" => {
            let a: QuerySurroundingArgs = bind(
                command,
                args,
                &["id_no", "keyval", "modmask", "backslash", "pressed"],
            )?;
            AgentEvent::QuerySurroundingText {
                id_no: a.id_no,
                keyval: a.keyval,
                modmask: a.modmask,
                backslash: a.backslash,
                pressed: a.pressed,
            }
        }
        "ibus_update_preedit_text_cb" => {
            let a: PreeditArgs = bind(
                command,
                args,
                &["id_no", "text", "cursor_pos", "visible", "attributes"],
            )?;
            AgentEvent::UpdatePreeditText {
                id_no: a.id_no,
                text: a.text,
                cursor_pos: a.cursor_pos,
                visible: a.visible,
                attributes: a.attributes,
            }
        }
        "ibus_show_preedit_text_cb" => {
            let a: IdArgs = bind(command, args, &["id_no"])?;
            AgentEvent::ShowPreeditText { id_no: a.id_no }
        }
        "ibus_hide_preedit_text_cb" => {
            let a: IdArgs = bind(command, args, &["id_no"])?;
            AgentEvent::HidePreeditText { id_no: a.id_no }
        }
        "ibus_commit_text_cb" => {
            let a: TextArgs = bind(command, args, &["id_no", "text"])?;
            AgentEvent::CommitText {
                id_no: a.id_no,
                text: a.text,
            }
        }
        "ibus_update_auxiliary_text_cb" => {
            let a: AuxiliaryArgs = bind(command, args, &["id_no", "text", "visible"])?;
            AgentEvent::UpdateAuxiliaryText {
                id_no: a.id_no,
                text: a.text,
                visible: a.visible,
            }
        }
        "ibus_show_auxiliary_text_cb" => {
            let a: IdArgs = bind(command, args, &["id_no"])?;
            AgentEvent::ShowAuxiliaryText { id_no: a.id_no }
        }
        "ibus_hide_auxiliary_text_cb" => {
            let a: IdArgs = bind(command, args, &["id_no"])?;
            AgentEvent::HideAuxiliaryText { id_no: a.id_no }
        }
        "ibus_show_lookup_table_cb" => {
            let a: LookupArgs = bind(command, args, &["id_no", "candidates", "cursor_pos"])?;
            AgentEvent::ShowLookupTable {
                id_no: a.id_no,
                candidates: a.candidates,
                cursor_pos: a.cursor_pos,
            }
        }
        "ibus_hide_lookup_table_cb" => {
            let a: IdArgs = bind(command, args, &["id_no"])?;
            AgentEvent::HideLookupTable { id_no: a.id_no }
        }
        "ibus_forward_key_event_cb" => {
            let a: ForwardKeyArgs =
                bind(command, args, &["id_no", "keyval", "modmask", "pressed"])?;
            AgentEvent::ForwardKeyEvent {
                id_no: a.id_no,
                keyval: a.keyval,
                modmask: a.modmask,
                pressed: a.pressed,
            }
        }
        "ibus_delete_surrounding_text_cb" => {
            let a: DeleteSurroundingArgs = bind(command, args, &["id_no", "offset", "n_chars"])?;
            AgentEvent::DeleteSurroundingText {
                id_no: a.id_no,
                offset: a.offset,
                n_chars: a.n_chars,
            }
        }
        "ibus_process_key_event_cb" => {
            let a: HandledArgs = bind(command, args, &["id_no", "handled"])?;
            AgentEvent::KeyEventProcessed {
                id_no: a.id_no,
                handled: a.handled,
            }
        }
        "ibus_list_active_engines_cb" => {
            let a: EnginesArgs = bind(command, args, &["engines"])?;
            AgentEvent::ActiveEngines { engines: a.engines }
        }
        _ => return Ok(Err(args)),
    };

    Ok(Ok(event))
}

/// Deserialize `args` into `T`, binding positional values to `params`.
fn bind<T: DeserializeOwned>(command: &str, args: Value, params: &[&str]) -> Result<T> {
    let named = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::Array(values) => {
            if values.len() > params.len() {
                return Err(AppError::Protocol(format!(
                    "invalid args for {command}: expected at most {} positional values, got {}",
                    params.len(),
                    values.len()
                )));
            }
            params
                .iter()
                .map(|p| (*p).to_owned())
                .zip(values)
                .collect()
        }
        other => {
            return Err(AppError::Protocol(format!(
                "invalid args for {command}: expected array or object, got {other}"
            )))
        }
    };

    serde_json::from_value(Value::Object(named))
        .map_err(|e| AppError::Protocol(format!("invalid args for {command}: {e}")))
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Receiver of agent events. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait EventHandler {
    /// Plain text or `{"message": ...}` diagnostic.
    fn on_message(&mut self, message: &str) {
        debug!(text = message, "agent message");
    }
    /// `error`.
    fn on_error(&mut self, message: &str) {
        warn!(detail = message, "agent reported error");
    }
    /// `setq`.
    fn on_setq(&mut self, name: &str, value: &Value) {}
    /// `ibus_log`.
    fn on_log(&mut self, message: &str) {
        debug!(text = message, "agent log");
    }
    /// `ibus_create_imcontext_cb`.
    fn on_imcontext_created(&mut self, id_no: u32) {}
    /// `ibus_start_focus_observation_cb`.
    fn on_focus_observation_started(&mut self, window_id: u64) {}
    /// `ibus_focus_changed_cb`.
    fn on_focus_changed(&mut self, window_id: u64) {}
    /// `ibus_redo_focus_in_cb`.
    fn on_redo_focus_in(&mut self) {}
    /// `ibus_status_changed_cb`.
    fn on_status_changed(&mut self, id_no: u32, engine_name: Option<&str>) {}
    /// `ibus_query_surrounding_text_cb`.
    fn on_query_surrounding_text(
        &mut self,
        id_no: u32,
        keyval: u32,
        modmask: u32,
        backslash: Option<u32>,
        pressed: Option<bool>,
    ) {
    }
    /// `ibus_update_preedit_text_cb`.
    fn on_update_preedit_text(
        &mut self,
        id_no: u32,
        text: &str,
        cursor_pos: u32,
        visible: bool,
        attributes: &str,
    ) {
    }
    /// `ibus_show_preedit_text_cb`.
    fn on_show_preedit_text(&mut self, id_no: u32) {}
    /// `ibus_hide_preedit_text_cb`.
    fn on_hide_preedit_text(&mut self, id_no: u32) {}
    /// `ibus_commit_text_cb`.
    fn on_commit_text(&mut self, id_no: u32, text: &str) {}
    /// `ibus_update_auxiliary_text_cb`.
    fn on_update_auxiliary_text(&mut self, id_no: u32, text: &str, visible: bool) {}
    /// `ibus_show_auxiliary_text_cb`.
    fn on_show_auxiliary_text(&mut self, id_no: u32) {}
    /// `ibus_hide_auxiliary_text_cb`.
    fn on_hide_auxiliary_text(&mut self, id_no: u32) {}
    /// `ibus_show_lookup_table_cb`.
    fn on_show_lookup_table(&mut self, id_no: u32, candidates: &[String], cursor_pos: u32) {}
    /// `ibus_hide_lookup_table_cb`.
    fn on_hide_lookup_table(&mut self, id_no: u32) {}
    /// `ibus_forward_key_event_cb`.
    fn on_forward_key_event(&mut self, id_no: u32, keyval: u32, modmask: u32, pressed: bool) {}
    /// `ibus_delete_surrounding_text_cb`.
    fn on_delete_surrounding_text(&mut self, id_no: u32, offset: i32, n_chars: u32) {}
    /// `ibus_process_key_event_cb`.
    fn on_key_event_processed(&mut self, id_no: u32, handled: bool) {}
    /// `ibus_list_active_engines_cb`.
    fn on_active_engines(&mut self, engines: &[String]) {}
}

/// Route `inbound` to the matching `handler` method.
pub fn dispatch<H: EventHandler + ?Sized>(handler: &mut H, inbound: &Inbound) {
    match inbound {
        Inbound::Text(text) | Inbound::Message(text) => handler.on_message(text),
        Inbound::Event(event) => dispatch_event(handler, event),
        Inbound::Unknown { command, args } => {
            debug!(command = command.as_str(), %args, "unknown command, ignoring");
        }
    }
}

/// Parse `line` and dispatch it. Protocol errors are logged, never raised.
pub fn dispatch_line<H: EventHandler + ?Sized>(handler: &mut H, line: &str) {
    match parse_inbound_line(line) {
        Ok(inbound) => dispatch(handler, &inbound),
        Err(err) => warn!(error = %err, raw_line = line, "unparseable agent line, skipping"),
    }
}

fn dispatch_event<H: EventHandler + ?Sized>(handler: &mut H, event: &AgentEvent) {
    match event {
        AgentEvent::Error { message } => handler.on_error(message),
        AgentEvent::Setq { name, value } => handler.on_setq(name, value),
        AgentEvent::Log { message } => handler.on_log(message),
        AgentEvent::ImContextCreated { id_no } => handler.on_imcontext_created(*id_no),
        AgentEvent::FocusObservationStarted { window_id } => {
            handler.on_focus_observation_started(*window_id);
        }
        AgentEvent::FocusChanged { window_id } => handler.on_focus_changed(*window_id),
        AgentEvent::RedoFocusIn => handler.on_redo_focus_in(),
        AgentEvent::StatusChanged { id_no, engine_name } => {
            handler.on_status_changed(*id_no, engine_name.as_deref());
        }
        AgentEvent::QuerySurroundingText {
            id_no,
            keyval,
            modmask,
            backslash,
            pressed,
        } => handler.on_query_surrounding_text(*id_no, *keyval, *modmask, *backslash, *pressed),
        AgentEvent::UpdatePreeditText {
            id_no,
            text,
            cursor_pos,
            visible,
            attributes,
        } => handler.on_update_preedit_text(*id_no, text, *cursor_pos, *visible, attributes),
        AgentEvent::ShowPreeditText { id_no } => handler.on_show_preedit_text(*id_no),
        AgentEvent::HidePreeditText { id_no } => handler.on_hide_preedit_text(*id_no),
        AgentEvent::CommitText { id_no, text } => handler.on_commit_text(*id_no, text),
        AgentEvent::UpdateAuxiliaryText {
            id_no,
            text,
            visible,
        } => handler.on_update_auxiliary_text(*id_no, text, *visible),
        AgentEvent::ShowAuxiliaryText { id_no } => handler.on_show_auxiliary_text(*id_no),
        AgentEvent::HideAuxiliaryText { id_no } => handler.on_hide_auxiliary_text(*id_no),
        AgentEvent::ShowLookupTable {
            id_no,
            candidates,
            cursor_pos,
        } => handler.on_show_lookup_table(*id_no, candidates, *cursor_pos),
        AgentEvent::HideLookupTable { id_no } => handler.on_hide_lookup_table(*id_no),
        AgentEvent::ForwardKeyEvent {
            id_no,
            keyval,
            modmask,
            pressed,
        } => handler.on_forward_key_event(*id_no, *keyval, *modmask, *pressed),
        AgentEvent::DeleteSurroundingText {
            id_no,
            offset,
            n_chars,
        } => handler.on_delete_surrounding_text(*id_no, *offset, *n_chars),
        AgentEvent::KeyEventProcessed { id_no, handled } => {
            handler.on_key_event_processed(*id_no, *handled);
        }
        AgentEvent::ActiveEngines { engines } => handler.on_active_engines(engines),
    }
}
