use crate::navigation::NavAction;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Which handler owns the keyboard right now. Overlays win over the input mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeyContext {
    Normal,
    Search,
    Command,
    Prompt,
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Back,
    Navigate(NavAction),
    Open,
    NextService,
    ToggleHelp,
    Refresh,
    CycleRegion,
    StartSearch,
    StartCommand,
    NextMatch,
    PrevMatch,
    ToggleSelect,
    ClearSelection,
    ToggleAutoRefresh,
    StartInstance,
    StopInstance,
    RebootInstance,
    TerminateInstance,
    ConnectShell,
    CopyAddress,
    Download,
    Delete,
    Presign,
    Versioning,
    EditObject,
    UpdateKubeconfig,
    OpenDashboard,
    ParentPrefix,
    SubmitInput,
    CompleteInput,
    CancelInput,
    Backspace,
    InputChar(char),
    ConfirmYes,
    ConfirmNo,
}

pub fn map_key(context: KeyContext, key: KeyEvent) -> Option<Action> {
    match context {
        KeyContext::Normal => map_normal_mode_key(key),
        KeyContext::Search | KeyContext::Prompt => map_input_mode_key(key, false),
        KeyContext::Command => map_input_mode_key(key, true),
        KeyContext::Confirm => map_confirm_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => Some(Action::Quit),
        KeyCode::Char('u') if ctrl => Some(Action::Navigate(NavAction::HalfPageUp)),
        KeyCode::Char('d') if ctrl => Some(Action::Navigate(NavAction::HalfPageDown)),
        KeyCode::Char('b') if ctrl => Some(Action::Navigate(NavAction::PageUp)),
        KeyCode::Char('f') if ctrl => Some(Action::Navigate(NavAction::PageDown)),
        KeyCode::Char('g') if ctrl => Some(Action::Navigate(NavAction::Bottom)),
        _ if ctrl => None,
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Navigate(NavAction::Down)),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Navigate(NavAction::Up)),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Navigate(NavAction::Top)),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Navigate(NavAction::Bottom)),
        KeyCode::PageUp => Some(Action::Navigate(NavAction::PageUp)),
        KeyCode::PageDown => Some(Action::Navigate(NavAction::PageDown)),
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Esc => Some(Action::Back),
        KeyCode::Enter | KeyCode::Char('i') => Some(Action::Open),
        KeyCode::Tab => Some(Action::NextService),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('c') => Some(Action::CycleRegion),
        KeyCode::Char('/') => Some(Action::StartSearch),
        KeyCode::Char(':') => Some(Action::StartCommand),
        KeyCode::Char('n') => Some(Action::NextMatch),
        KeyCode::Char('N') => Some(Action::PrevMatch),
        KeyCode::Char(' ') => Some(Action::ToggleSelect),
        KeyCode::Char('x') => Some(Action::ClearSelection),
        KeyCode::Char('a') => Some(Action::ToggleAutoRefresh),
        KeyCode::Char('s') => Some(Action::StartInstance),
        KeyCode::Char('S') => Some(Action::StopInstance),
        KeyCode::Char('R') => Some(Action::RebootInstance),
        KeyCode::Char('t') => Some(Action::TerminateInstance),
        KeyCode::Char('C') => Some(Action::ConnectShell),
        KeyCode::Char('y') => Some(Action::CopyAddress),
        KeyCode::Char('d') => Some(Action::Download),
        KeyCode::Char('D') => Some(Action::Delete),
        KeyCode::Char('p') => Some(Action::Presign),
        KeyCode::Char('v') => Some(Action::Versioning),
        KeyCode::Char('e') => Some(Action::EditObject),
        KeyCode::Char('K') => Some(Action::UpdateKubeconfig),
        KeyCode::Char('9') => Some(Action::OpenDashboard),
        KeyCode::Char('h') | KeyCode::Backspace | KeyCode::Left => Some(Action::ParentPrefix),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent, completion: bool) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::CancelInput)
        }
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Tab if completion => Some(Action::CompleteInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c)
            if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT =>
        {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

fn map_confirm_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(Action::ConfirmNo),
        _ => None,
    }
}
