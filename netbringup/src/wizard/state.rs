//! Wizard states.

use std::fmt;

/// Which credential a login round uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginAttempt {
    /// Factory credential, 1-based round number.
    Primary(u32),
    /// Inventory credential, tried once after every primary round was rejected.
    Fallback,
}

impl LoginAttempt {
    pub const FIRST: Self = Self::Primary(1);

    /// The round after a rejection of this one.
    pub fn next(self, primary_limit: u32) -> Self {
        match self {
            Self::Primary(n) if n < primary_limit => Self::Primary(n + 1),
            _ => Self::Fallback,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback)
    }
}

impl fmt::Display for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary(n) => write!(f, "attempt {n}"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Why the automaton gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Attempt budget ran out without a recognized prompt.
    NoRecognizablePrompt,
    /// The fallback credential was rejected too.
    CredentialsRejected,
    /// Password confirmation kept failing past its retry limit.
    PasswordMismatch,
}

/// Position of the automaton in the first-boot dialogue.
///
/// The login states carry the credential round; every other state is the
/// prompt the automaton is currently expecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    AwaitingLogin(LoginAttempt),
    AwaitingPassword(LoginAttempt),
    /// Password sent; waiting to see whether it was accepted.
    CheckingLogin(LoginAttempt),
    LoggedIn,
    AcceptingEula,
    SettingNewPassword,
    ConfirmingPassword,
    ChoosingAddressMode,
    SettingAddress,
    SettingNetmask,
    SettingGateway,
    SettingDns,
    ApplyingConfig,
    Completed,
    Failed(FailureReason),
}

impl WizardState {
    pub const INITIAL: Self = Self::AwaitingLogin(LoginAttempt::FIRST);

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Past the login exchange.
    pub fn is_logged_in(self) -> bool {
        !matches!(
            self,
            Self::AwaitingLogin(_) | Self::AwaitingPassword(_) | Self::CheckingLogin(_)
        )
    }
}

impl fmt::Display for WizardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingLogin(a) => write!(f, "AwaitingLogin({a})"),
            Self::AwaitingPassword(a) => write!(f, "AwaitingPassword({a})"),
            Self::CheckingLogin(a) => write!(f, "CheckingLogin({a})"),
            Self::Failed(reason) => write!(f, "Failed({reason:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}
