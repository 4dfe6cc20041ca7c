//! Transition table for the first-boot dialogue.
//!
//! Each state owns an ordered list of transitions, evaluated top to bottom
//! against the lowercased buffer; the first one whose trigger matches wins.
//! Setup states also accept the prompts of every later setup state so a
//! device that skips a step (EULA already accepted, password already set)
//! does not stall the automaton.

use std::sync::LazyLock;

use regex::Regex;

use super::state::{FailureReason, LoginAttempt, WizardState};
use crate::channel::PatternBuffer;

/// Interactive shell prompt at the very end of the output.
pub const COMPLETION_PROMPT: &str = r"(?:\A|[\r\n])[ \t]*[\w.\-@()/:]*[#>][ \t]*\z";

const COMPLETION_PHRASES: &[&str] = &[
    "configuration completed",
    "configuration applied successfully",
    "successfully performed firstboot",
];

/// Completion cue only once the new password is in; consoles greet at login
/// too.
const WELCOME: &str = "welcome";

const REJECTED: &[&str] = &["login incorrect", "authentication failed"];

const POST_LOGIN_CUES: &[&str] = &[
    "last login",
    "end user license",
    "eula",
    "press <enter>",
    "new password",
    "password for admin",
    "configure ipv4",
    "dhcp/manual",
];

static COMPLETION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(COMPLETION_PROMPT).expect("completion prompt pattern is valid"));

static LOGIN_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:login|username):\s*\z").expect("login prompt pattern is valid"));

static PASSWORD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"password:\s*\z").expect("password prompt pattern is valid"));

/// Setup states in dialogue order.
const SETUP_STAGES: [WizardState; 10] = [
    WizardState::LoggedIn,
    WizardState::AcceptingEula,
    WizardState::SettingNewPassword,
    WizardState::ConfirmingPassword,
    WizardState::ChoosingAddressMode,
    WizardState::SettingAddress,
    WizardState::SettingNetmask,
    WizardState::SettingGateway,
    WizardState::SettingDns,
    WizardState::ApplyingConfig,
];

/// What a transition looks for. Matched against lowercased text.
#[derive(Debug, Clone)]
pub enum Trigger {
    Contains(&'static str),
    /// Every substring present on one line, in any order.
    AllOf(&'static [&'static str]),
    Pattern(&'static Regex),
}

impl Trigger {
    /// Offset where the match ends.
    fn find_end(&self, lowered: &str) -> Option<usize> {
        match self {
            Self::Contains(needle) => lowered.find(needle).map(|i| i + needle.len()),
            Self::AllOf(needles) => {
                let mut start = 0;
                for line in lowered.split_inclusive('\n') {
                    let end = needles.iter().try_fold(0, |end, needle| {
                        line.find(needle).map(|i| end.max(i + needle.len()))
                    });
                    if let Some(end) = end {
                        return Some(start + end);
                    }
                    start += line.len();
                }
                None
            }
            Self::Pattern(re) => re.find(lowered).map(|m| m.end()),
        }
    }
}

/// What gets sent when a transition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Text(&'static str),
    Username,
    LoginPassword(LoginAttempt),
    NewPassword,
    Address,
    Netmask,
    Gateway,
    Dns,
}

/// Bookkeeping attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    ConfirmPassword,
    PasswordMismatch,
    EulaPage,
}

/// One row of a state's table.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Fires when any of these match.
    pub triggers: Vec<Trigger>,
    pub reply: Option<Reply>,
    pub next: WizardState,
    pub effect: Effect,
    /// Drop the matched prompt from the buffer once handled.
    pub consume: bool,
}

impl Transition {
    fn respond(triggers: Vec<Trigger>, reply: Reply, next: WizardState) -> Self {
        Self {
            triggers,
            reply: Some(reply),
            next,
            effect: Effect::None,
            consume: true,
        }
    }

    /// Change state without replying, leaving the cue for the next state.
    fn route(triggers: Vec<Trigger>, next: WizardState) -> Self {
        Self {
            triggers,
            reply: None,
            next,
            effect: Effect::None,
            consume: false,
        }
    }

    /// Change state without replying, dropping the cue.
    fn absorb(triggers: Vec<Trigger>, next: WizardState) -> Self {
        Self {
            consume: true,
            ..Self::route(triggers, next)
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    /// Earliest match end over all triggers.
    pub fn match_end(&self, lowered: &str) -> Option<usize> {
        self.triggers.iter().filter_map(|t| t.find_end(lowered)).min()
    }
}

fn any(needles: &[&'static str]) -> Vec<Trigger> {
    needles.iter().copied().map(Trigger::Contains).collect()
}

/// Rows only valid in exactly this state.
fn local_rows(state: WizardState) -> Vec<Transition> {
    use WizardState::*;
    match state {
        LoggedIn => vec![Transition::absorb(
            any(REJECTED),
            Failed(FailureReason::CredentialsRejected),
        )],
        AcceptingEula => vec![
            Transition::respond(
                any(&["'yes'", "yes/no", "agree to the eula"]),
                Reply::Text("YES"),
                SettingNewPassword,
            ),
            Transition::respond(
                any(&["--more--", "press <enter>", "press enter"]),
                Reply::Text(""),
                AcceptingEula,
            )
            .with_effect(Effect::EulaPage),
        ],
        ChoosingAddressMode => vec![
            Transition::absorb(
                vec![
                    Trigger::AllOf(&["password", "not match"]),
                    Trigger::AllOf(&["password", "mismatch"]),
                ],
                SettingNewPassword,
            )
            .with_effect(Effect::PasswordMismatch),
        ],
        _ => Vec::new(),
    }
}

/// Rows for this stage's own prompts, also offered by earlier stages.
fn stage_rows(state: WizardState) -> Vec<Transition> {
    use WizardState::*;
    match state {
        LoggedIn => vec![Transition::route(
            any(&["end user license", "eula", "press <enter>"]),
            AcceptingEula,
        )],
        SettingNewPassword => vec![Transition::respond(
            any(&["new password", "password for admin"]),
            Reply::NewPassword,
            ConfirmingPassword,
        )],
        ConfirmingPassword => vec![
            Transition::respond(
                vec![
                    Trigger::AllOf(&["confirm", "password"]),
                    Trigger::AllOf(&["re-enter", "password"]),
                    Trigger::Contains("retype"),
                    Trigger::AllOf(&["verify", "password"]),
                    Trigger::Contains("enter password again"),
                ],
                Reply::NewPassword,
                ChoosingAddressMode,
            )
            .with_effect(Effect::ConfirmPassword),
        ],
        ChoosingAddressMode => vec![
            Transition::respond(
                any(&["configure ipv4 via dhcp", "dhcp/manual"]),
                Reply::Text("manual"),
                SettingAddress,
            ),
            Transition::respond(
                any(&["configure ipv4?"]),
                Reply::Text("y"),
                ChoosingAddressMode,
            ),
            Transition::respond(
                any(&["configure ipv6?"]),
                Reply::Text("n"),
                ChoosingAddressMode,
            ),
        ],
        SettingAddress => vec![Transition::respond(
            vec![Trigger::AllOf(&["ipv4 address", "management"])],
            Reply::Address,
            SettingNetmask,
        )],
        SettingNetmask => vec![Transition::respond(
            vec![Trigger::AllOf(&["netmask", "management"])],
            Reply::Netmask,
            SettingGateway,
        )],
        SettingGateway => vec![Transition::respond(
            vec![Trigger::AllOf(&["default gateway", "management"])],
            Reply::Gateway,
            SettingDns,
        )],
        SettingDns => vec![
            Transition::respond(any(&["dns server"]), Reply::Dns, ApplyingConfig),
            Transition::respond(
                any(&["fully qualified hostname"]),
                Reply::Text(""),
                SettingDns,
            ),
        ],
        ApplyingConfig => vec![
            Transition::respond(any(&["search domains"]), Reply::Text(""), ApplyingConfig),
            Transition::respond(any(&["configure time"]), Reply::Text("n"), ApplyingConfig),
            Transition::respond(
                any(&["firepower management center"]),
                Reply::Text("n"),
                ApplyingConfig,
            ),
            Transition::respond(any(&["locally"]), Reply::Text("yes"), ApplyingConfig),
            Transition::respond(any(&["firewall mode"]), Reply::Text("routed"), ApplyingConfig),
            Transition::respond(
                any(&["apply this configuration"]),
                Reply::Text("y"),
                ApplyingConfig,
            ),
        ],
        _ => Vec::new(),
    }
}

/// Ordered transitions for `state`.
///
/// `login_limit` is the number of primary-credential rounds before the
/// fallback credential is used.
pub fn transitions(state: WizardState, login_limit: u32) -> Vec<Transition> {
    use WizardState::*;
    let login = || vec![Trigger::Pattern(&LOGIN_PROMPT)];
    let password = || vec![Trigger::Pattern(&PASSWORD_PROMPT)];

    match state {
        AwaitingLogin(attempt) => vec![
            Transition::respond(login(), Reply::Username, AwaitingPassword(attempt)),
            Transition::route(any(POST_LOGIN_CUES), LoggedIn),
            Transition::route(password(), AwaitingPassword(attempt)),
        ],
        AwaitingPassword(attempt) => {
            // The fallback round is treated as logged in whatever the outcome.
            let next = if attempt.is_fallback() {
                LoggedIn
            } else {
                CheckingLogin(attempt)
            };
            vec![Transition::respond(password(), Reply::LoginPassword(attempt), next)]
        }
        CheckingLogin(attempt) => vec![
            Transition::absorb(any(REJECTED), AwaitingLogin(attempt.next(login_limit))),
            Transition::route(any(POST_LOGIN_CUES), LoggedIn),
            Transition::route(login(), AwaitingLogin(attempt.next(login_limit))),
        ],
        Completed | Failed(_) => Vec::new(),
        setup => {
            let from = SETUP_STAGES.iter().position(|s| *s == setup).unwrap_or(0);
            let mut rows = local_rows(setup);
            for stage in &SETUP_STAGES[from..] {
                rows.extend(stage_rows(*stage));
            }
            rows
        }
    }
}

/// A transition whose trigger matched, with the match end offset.
#[derive(Debug, Clone)]
pub struct Selected {
    pub transition: Transition,
    pub end: usize,
}

/// First matching transition of `state` against `buffer`.
pub fn select(state: WizardState, buffer: &str, login_limit: u32) -> Option<Selected> {
    let lowered = buffer.to_ascii_lowercase();
    transitions(state, login_limit)
        .into_iter()
        .find_map(|transition| {
            transition
                .match_end(&lowered)
                .map(|end| Selected { transition, end })
        })
}

/// Where to cut the buffer after handling a match ending at `end`: the end
/// of that line, or the end of the buffer for a trailing prompt.
pub fn consume_point(buffer: &str, end: usize) -> usize {
    buffer
        .get(end..)
        .and_then(|rest| rest.find('\n'))
        .map_or(buffer.len(), |i| end + i + 1)
}

/// The device has left the wizard: a shell prompt or a completion phrase.
pub fn completion_seen(buffer: &PatternBuffer, state: WizardState) -> bool {
    if buffer.tail_contains(&COMPLETION_RE) {
        return true;
    }
    let lowered = buffer.as_str().to_ascii_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lowered.contains(p))
        || (password_set(state) && lowered.contains(WELCOME))
}

/// Setup has moved past the password prompts.
fn password_set(state: WizardState) -> bool {
    let Some(at) = SETUP_STAGES.iter().position(|s| *s == state) else {
        return false;
    };
    SETUP_STAGES
        .iter()
        .position(|s| *s == WizardState::ChoosingAddressMode)
        .is_some_and(|from| at >= from)
}
