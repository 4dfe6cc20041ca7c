//! First-boot wizard automaton.
//!
//! Drives an appliance's interactive first-boot dialogue using only text
//! matches against accumulated output. The dialogue is modelled as an
//! explicit [`WizardState`] plus a per-state transition table (see
//! [`table`]). Unmatched output stays in the buffer for later transitions;
//! matched prompts are consumed so they are never answered twice.
//!
//! Read and write failures inside an attempt only mean "no new data". The
//! automaton fails when its attempt budget runs out, when every credential
//! is rejected, or when password confirmation keeps failing.

mod state;
pub mod table;

pub use state::{FailureReason, LoginAttempt, WizardState};

use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;

use crate::channel::{Pattern, Session};
use crate::error::{ChannelError, InventoryError, Result, WizardError};
use crate::inventory::Device;
use crate::transport::Transport;
use table::{Effect, Reply, Selected};

/// Wizard budgets and pacing.
#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Unproductive attempts (no transition fired) before giving up.
    pub attempt_budget: u32,

    /// How long one attempt waits for new output.
    pub attempt_timeout: Duration,

    /// Rounds with the factory credential before the fallback credential.
    pub login_attempts: u32,

    /// Blank-line page advances before the EULA is accepted blindly.
    pub eula_page_limit: u32,

    /// Password confirmation mismatches tolerated.
    pub password_retries: u32,

    /// Upper bound on replies sent, so a device that re-prompts forever
    /// still terminates.
    pub reply_budget: u32,

    /// Pause after the wake-up line before the first read.
    pub settle_delay: Duration,

    /// Check `show network` for the management address after completion.
    pub verify: bool,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            attempt_budget: 30,
            attempt_timeout: Duration::from_secs(8),
            login_attempts: 3,
            eula_page_limit: 25,
            password_retries: 3,
            reply_budget: 64,
            settle_delay: Duration::from_secs(8),
            verify: true,
        }
    }
}

/// Device-specific answers to the wizard's questions.
#[derive(Debug)]
pub struct WizardParams {
    pub username: String,
    /// Credential the appliance ships with.
    pub factory_password: SecretString,
    /// Inventory credential: the login fallback and the new admin password.
    pub password: SecretString,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: String,
}

impl WizardParams {
    /// Take credentials and the management address from the inventory.
    pub fn for_device(
        device: &Device,
        factory_password: &str,
        gateway: Ipv4Addr,
        dns: impl Into<String>,
    ) -> std::result::Result<Self, InventoryError> {
        let credentials = device.credentials()?;
        let management = device.management_interface()?;
        Ok(Self {
            username: credentials.username.clone(),
            factory_password: SecretString::from(factory_password.to_string()),
            password: SecretString::from(credentials.password().to_string()),
            address: management.address,
            netmask: management.netmask(),
            gateway,
            dns: dns.into(),
        })
    }

    /// Text for a reply and whether it must stay out of the logs.
    fn render(&self, reply: Reply) -> (String, bool) {
        match reply {
            Reply::Text(text) => (text.to_string(), false),
            Reply::Username => (self.username.clone(), false),
            Reply::LoginPassword(attempt) if attempt.is_fallback() => {
                (self.password.expose_secret().to_string(), true)
            }
            Reply::LoginPassword(_) => (self.factory_password.expose_secret().to_string(), true),
            Reply::NewPassword => (self.password.expose_secret().to_string(), true),
            Reply::Address => (self.address.to_string(), false),
            Reply::Netmask => (self.netmask.to_string(), false),
            Reply::Gateway => (self.gateway.to_string(), false),
            Reply::Dns => (self.dns.clone(), false),
        }
    }
}

/// Counters and sub-flags accumulated during a run.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub attempts: u32,
    pub replies: u32,
    pub eula_pages: u32,
    pub password_confirmed: bool,
    pub password_retries: u32,
    /// Every state entered, in order.
    pub history: Vec<WizardState>,
}

/// Outcome of a completed wizard.
#[derive(Debug, Clone)]
pub struct WizardReport {
    pub state: WizardState,
    pub progress: Progress,
    pub elapsed: Duration,
}

/// Automaton bound to one session.
pub struct Wizard<'a, T> {
    session: &'a mut Session<T>,
    config: &'a WizardConfig,
    params: &'a WizardParams,
    state: WizardState,
    progress: Progress,
}

impl<'a, T: Transport> Wizard<'a, T> {
    pub fn new(
        session: &'a mut Session<T>,
        config: &'a WizardConfig,
        params: &'a WizardParams,
    ) -> Self {
        Self {
            session,
            config,
            params,
            state: WizardState::INITIAL,
            progress: Progress {
                history: vec![WizardState::INITIAL],
                ..Progress::default()
            },
        }
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    /// Run the dialogue to a terminal state.
    pub async fn run(mut self) -> Result<WizardReport> {
        let started = Instant::now();
        let mut deadline = started + self.config.attempt_timeout;
        info!("{}: starting first-boot wizard", self.session.host());

        if let Err(e) = self.session.write_line("").await {
            debug!("{}: wake-up line failed: {e}", self.session.host());
        }
        tokio::time::sleep(self.config.settle_delay).await;

        while !self.state.is_terminal() {
            if table::completion_seen(self.session.buffer(), self.state) {
                self.enter(WizardState::Completed);
                break;
            }

            match table::select(
                self.state,
                self.session.buffer().as_str(),
                self.config.login_attempts,
            ) {
                Some(selected) => {
                    if self.fire(selected).await {
                        deadline = Instant::now() + self.config.attempt_timeout;
                        continue;
                    }
                }
                None => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if !remaining.is_zero() {
                        match self.session.read_available(remaining).await {
                            Ok(text) if !text.is_empty() => continue,
                            Ok(_) => {}
                            Err(e) => debug!("{}: read failed: {e}", self.session.host()),
                        }
                    }
                }
            }

            self.progress.attempts += 1;
            if self.progress.attempts >= self.config.attempt_budget {
                warn!(
                    "{}: no recognizable prompt after {} attempts in {}, tail {:?}",
                    self.session.host(),
                    self.progress.attempts,
                    self.state,
                    self.session.buffer().tail(80)
                );
                self.enter(WizardState::Failed(FailureReason::NoRecognizablePrompt));
                break;
            }
            deadline = Instant::now() + self.config.attempt_timeout;
            self.fallback().await;
        }

        match self.state {
            WizardState::Completed => {
                if self.config.verify {
                    self.verify().await?;
                }
                info!(
                    "{}: wizard completed after {} replies",
                    self.session.host(),
                    self.progress.replies
                );
                Ok(WizardReport {
                    state: self.state,
                    progress: self.progress,
                    elapsed: started.elapsed(),
                })
            }
            WizardState::Failed(reason) => Err(self.failure(reason).into()),
            other => Err(WizardError::ProtocolMismatch {
                state: other.to_string(),
                attempts: self.progress.attempts,
            }
            .into()),
        }
    }

    /// Send a transition's reply and advance. Returns false if the write failed.
    async fn fire(&mut self, selected: Selected) -> bool {
        let Selected { mut transition, end } = selected;

        if transition.effect == Effect::EulaPage
            && self.progress.eula_pages >= self.config.eula_page_limit
        {
            debug!("{}: EULA page limit reached", self.session.host());
            transition.reply = Some(Reply::Text("YES"));
            transition.next = WizardState::SettingNewPassword;
            transition.effect = Effect::None;
        }

        if let Some(reply) = transition.reply {
            if !self.send(reply).await {
                return false;
            }
        }

        if transition.consume {
            let cut = table::consume_point(self.session.buffer().as_str(), end);
            self.session.buffer_mut().consume_through(cut);
        }

        let next = self.apply(transition.effect, transition.next);
        self.enter(next);

        if self.progress.replies > self.config.reply_budget && !self.state.is_terminal() {
            warn!(
                "{}: reply budget of {} exhausted in {}",
                self.session.host(),
                self.config.reply_budget,
                self.state
            );
            self.enter(WizardState::Failed(FailureReason::NoRecognizablePrompt));
        }
        true
    }

    fn apply(&mut self, effect: Effect, next: WizardState) -> WizardState {
        match effect {
            Effect::None => next,
            Effect::ConfirmPassword => {
                self.progress.password_confirmed = true;
                next
            }
            Effect::PasswordMismatch => {
                self.progress.password_confirmed = false;
                self.progress.password_retries += 1;
                warn!(
                    "{}: password confirmation mismatch ({} of {})",
                    self.session.host(),
                    self.progress.password_retries,
                    self.config.password_retries
                );
                if self.progress.password_retries > self.config.password_retries {
                    WizardState::Failed(FailureReason::PasswordMismatch)
                } else {
                    next
                }
            }
            Effect::EulaPage => {
                self.progress.eula_pages += 1;
                next
            }
        }
    }

    /// No transition fired for a whole attempt: coax the device.
    async fn fallback(&mut self) {
        if self.state == WizardState::AcceptingEula {
            if self.progress.eula_pages >= self.config.eula_page_limit {
                if self.send(Reply::Text("YES")).await {
                    self.enter(WizardState::SettingNewPassword);
                }
            } else if self.send(Reply::Text("")).await {
                self.progress.eula_pages += 1;
            }
        } else {
            debug!("{}: re-probing in {}", self.session.host(), self.state);
            self.send(Reply::Text("")).await;
        }
    }

    async fn send(&mut self, reply: Reply) -> bool {
        let (text, hidden) = self.params.render(reply);
        let result = if hidden {
            self.session.write_hidden(&text).await
        } else {
            self.session.write_line(&text).await
        };
        match result {
            Ok(()) => {
                self.progress.replies += 1;
                debug!(
                    "{}: [{}] >> {:?}",
                    self.session.host(),
                    self.state,
                    if hidden { "********" } else { text.as_str() }
                );
                true
            }
            Err(e) => {
                debug!("{}: write failed in {}: {e}", self.session.host(), self.state);
                false
            }
        }
    }

    fn enter(&mut self, next: WizardState) {
        if next != self.state {
            info!("{}: {} -> {}", self.session.host(), self.state, next);
            self.state = next;
        }
        self.progress.history.push(next);
    }

    /// Confirm the management address from the device's own view.
    async fn verify(&mut self) -> Result<()> {
        self.session.buffer_mut().clear();
        let prompt = Pattern::regex(table::COMPLETION_PROMPT).map_err(ChannelError::from)?;
        let output = self
            .session
            .send_and_wait("show network", &prompt, self.config.attempt_timeout)
            .await?;
        let address = self.params.address.to_string();
        if output.contains(&address) {
            info!("{}: management address {address} verified", self.session.host());
            Ok(())
        } else {
            Err(WizardError::Configuration {
                message: format!("show network does not report management address {address}"),
            }
            .into())
        }
    }

    fn failure(&self, reason: FailureReason) -> WizardError {
        match reason {
            FailureReason::NoRecognizablePrompt => WizardError::ProtocolMismatch {
                state: self
                    .progress
                    .history
                    .iter()
                    .rev()
                    .find(|s| !s.is_terminal())
                    .copied()
                    .unwrap_or(WizardState::INITIAL)
                    .to_string(),
                attempts: self.progress.attempts,
            },
            FailureReason::CredentialsRejected => WizardError::AuthenticationFailed {
                user: self.params.username.clone(),
            },
            FailureReason::PasswordMismatch => WizardError::Configuration {
                message: format!(
                    "password confirmation failed {} times",
                    self.progress.password_retries
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::inventory::{Credentials, DeviceKind, Interface};
    use crate::testing::ScriptedTransport;
    use crate::transport::TelnetConfig;

    const MISMATCH: &str = "Passwords do not match.\r\nEnter new password: ";
    const CONFIRM: &str = "Confirm new password: ";

    fn params() -> WizardParams {
        let device = Device::new("FTD", DeviceKind::Appliance)
            .with_credentials(Credentials::new("admin", "Cisco@135"))
            .with_interface(Interface {
                name: "Management1/1".into(),
                address: Ipv4Addr::new(192, 168, 200, 4),
                prefix_len: 24,
                link: Some("management".into()),
                alias: Some("initial".into()),
            });
        WizardParams::for_device(&device, "Admin123", Ipv4Addr::new(192, 168, 200, 1), "8.8.8.8")
            .unwrap()
    }

    fn config() -> WizardConfig {
        WizardConfig {
            settle_delay: Duration::from_secs(1),
            verify: false,
            ..WizardConfig::default()
        }
    }

    fn session(transport: ScriptedTransport) -> Session<ScriptedTransport> {
        Session::new(transport, TelnetConfig::new("ftd", 5013))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_dialogue() {
        let transport = ScriptedTransport::new()
            .initial("\r\nfirepower login: ")
            .on_line("admin", "admin\r\nPassword: ")
            .on_line(
                "Admin123",
                "\r\nLast login: never\r\nYou must accept the EULA to continue.\r\nPress <ENTER> to display the EULA: ",
            )
            .on_line_seq(
                "",
                &[
                    "",
                    "END USER LICENSE AGREEMENT\r\nIMPORTANT: PLEASE READ\r\n--More--",
                    "\r\nPlease enter 'YES' or press <ENTER> to AGREE to the EULA: ",
                    "Enter a comma-separated list of DNS servers or 'none' [208.67.222.222]: ",
                    "Manage the device locally? (yes/no) [yes]: ",
                ],
            )
            .on_line(
                "YES",
                "\r\nYou must change the password for 'admin' to continue.\r\nEnter new password: ",
            )
            .on_line_seq(
                "Cisco@135",
                &[CONFIRM, "\r\nDo you want to configure IPv4? (y/n) [y]: "],
            )
            .on_line("y", "Do you want to configure IPv6? (y/n) [n]: ")
            .on_line(
                "n",
                "Configure IPv4 via DHCP or manually? (dhcp/manual) [manual]: ",
            )
            .on_line(
                "manual",
                "Enter an IPv4 address for the management interface [192.168.45.45]: ",
            )
            .on_line(
                "192.168.200.4",
                "Enter an IPv4 netmask for the management interface [255.255.255.0]: ",
            )
            .on_line(
                "255.255.255.0",
                "Enter the IPv4 default gateway for the management interface [data-interfaces]: ",
            )
            .on_line(
                "192.168.200.1",
                "Enter a fully qualified hostname for this system [firepower]: ",
            )
            .on_line(
                "8.8.8.8",
                "Enter a comma-separated list of search domains or 'none' []: ",
            )
            .on_line("yes", "Configure firewall mode? (routed/transparent) [routed]: ")
            .on_line("routed", "Configuring firewall mode ...\r\n\r\n> ")
            .on_line(
                "show network",
                "===============[ System Information ]===============\r\nHostname : firepower\r\nManagement IP : 192.168.200.4\r\n> ",
            );
        let mut session = session(transport);
        let config = WizardConfig {
            verify: true,
            ..config()
        };
        let params = params();

        let report = Wizard::new(&mut session, &config, &params).run().await.unwrap();

        assert_eq!(report.state, WizardState::Completed);
        assert!(report.progress.password_confirmed);
        assert_eq!(report.progress.eula_pages, 2);
        assert_eq!(report.progress.attempts, 0);

        let written = &session.transport().written;
        let position = |line: &str| written.iter().position(|l| l == line).unwrap();
        // Network parameters go out in fixed order.
        assert!(position("192.168.200.4") < position("255.255.255.0"));
        assert!(position("255.255.255.0") < position("192.168.200.1"));
        assert!(position("192.168.200.1") < position("8.8.8.8"));
        assert_eq!(session.transport().count_written("Cisco@135"), 2);
        assert_eq!(session.transport().count_written("manual"), 1);
        assert_eq!(written.last().map(String::as_str), Some("show network"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_pager_accepts_eula_at_page_limit() {
        let transport = ScriptedTransport::new()
            .initial("Press <ENTER> to display the EULA: ")
            .on_line("", "\r\nEND USER LICENSE AGREEMENT\r\n--More--")
            .on_line("YES", "\r\nfirepower> ");
        let mut session = session(transport);
        let config = WizardConfig {
            eula_page_limit: 2,
            ..config()
        };
        let params = params();

        let report = Wizard::new(&mut session, &config, &params).run().await.unwrap();

        assert_eq!(report.state, WizardState::Completed);
        assert_eq!(report.progress.eula_pages, 2);
        assert_eq!(session.transport().count_written("YES"), 1);
        // Wake-up line plus one blank line per page.
        assert_eq!(session.transport().count_written(""), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_eula_accepted_after_blank_line_limit() {
        let transport = ScriptedTransport::new()
            .initial("END USER LICENSE AGREEMENT\r\n")
            .on_line("", "Section 1. Definitions\r\n")
            .on_line("YES", "\r\nfirepower> ");
        let mut session = session(transport);
        let config = WizardConfig {
            eula_page_limit: 2,
            attempt_budget: 10,
            attempt_timeout: Duration::from_secs(1),
            ..config()
        };
        let params = params();

        let report = Wizard::new(&mut session, &config, &params).run().await.unwrap();

        assert_eq!(report.state, WizardState::Completed);
        assert_eq!(report.progress.eula_pages, 2);
        assert_eq!(session.transport().count_written("YES"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_credential_sent_exactly_once() {
        let transport = ScriptedTransport::new()
            .initial("firepower login: ")
            .on_line("admin", "Password: ")
            .on_line("Admin123", "\r\nLogin incorrect\r\n\r\nfirepower login: ")
            .on_line("Cisco@135", "\r\nLast login: today\r\n> ");
        let mut session = session(transport);
        let config = config();
        let params = params();

        let report = Wizard::new(&mut session, &config, &params).run().await.unwrap();

        assert_eq!(report.state, WizardState::Completed);
        let transport = session.transport();
        assert_eq!(transport.count_written("Admin123"), 3);
        assert_eq!(transport.count_written("Cisco@135"), 1);
        assert_eq!(transport.count_written("admin"), 4);
        assert!(
            report
                .progress
                .history
                .contains(&WizardState::AwaitingPassword(LoginAttempt::Fallback))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fallback_is_authentication_failure() {
        let transport = ScriptedTransport::new()
            .initial("login: ")
            .on_line("admin", "Password: ")
            .on_line("Admin123", "\r\nLogin incorrect\r\nlogin: ")
            .on_line("Cisco@135", "\r\nLogin incorrect\r\nlogin: ");
        let mut session = session(transport);
        let config = config();
        let params = params();

        let err = Wizard::new(&mut session, &config, &params).run().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Wizard(WizardError::AuthenticationFailed { ref user }) if user == "admin"
        ));
        assert_eq!(session.transport().count_written("Cisco@135"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_mismatch_reenters_new_password() {
        let transport = ScriptedTransport::new()
            .initial("You must change the password for 'admin' to continue.\r\nEnter new password: ")
            .on_line_seq(
                "Cisco@135",
                &[CONFIRM, MISMATCH, CONFIRM, "\r\nfirepower> "],
            );
        let mut session = session(transport);
        let config = config();
        let params = params();

        let report = Wizard::new(&mut session, &config, &params).run().await.unwrap();

        assert_eq!(report.state, WizardState::Completed);
        assert_eq!(report.progress.password_retries, 1);
        assert!(report.progress.password_confirmed);
        assert_eq!(session.transport().count_written("Cisco@135"), 4);

        // Confirm, mismatch back to a fresh password entry, confirm again.
        let history = &report.progress.history;
        let back = history
            .windows(2)
            .position(|w| {
                w == [WizardState::ChoosingAddressMode, WizardState::SettingNewPassword]
            })
            .unwrap();
        assert!(history[back + 1..].contains(&WizardState::ChoosingAddressMode));
    }

    #[tokio::test(start_paused = true)]
    async fn test_password_mismatch_is_bounded() {
        let replies = [CONFIRM, MISMATCH].repeat(4);
        let transport = ScriptedTransport::new()
            .initial("Enter new password: ")
            .on_line_seq("Cisco@135", &replies);
        let mut session = session(transport);
        let config = config();
        let params = params();

        let err = Wizard::new(&mut session, &config, &params).run().await.unwrap_err();

        assert!(matches!(err, Error::Wizard(WizardError::Configuration { .. })));
        assert_eq!(session.transport().count_written("Cisco@135"), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_output_fails_within_budget() {
        let transport = ScriptedTransport::new()
            .initial("Booting Cisco Firepower Threat Defense...\r\n")
            .on_line("", "......\r\n");
        let mut session = session(transport);
        let config = WizardConfig {
            attempt_budget: 5,
            attempt_timeout: Duration::from_secs(2),
            settle_delay: Duration::ZERO,
            ..config()
        };
        let params = params();

        let started = Instant::now();
        let err = Wizard::new(&mut session, &config, &params).run().await.unwrap_err();

        assert!(started.elapsed() <= config.attempt_timeout * config.attempt_budget);
        match err {
            Error::Wizard(WizardError::ProtocolMismatch { state, attempts }) => {
                assert_eq!(attempts, 5);
                assert_eq!(state, "AwaitingLogin(attempt 1)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_fails_without_hanging() {
        let mut session = session(ScriptedTransport::new());
        session.close().await.unwrap();
        let config = WizardConfig {
            attempt_budget: 3,
            ..config()
        };
        let params = params();

        let err = Wizard::new(&mut session, &config, &params).run().await.unwrap_err();
        assert!(matches!(err, Error::Wizard(WizardError::ProtocolMismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_rejects_wrong_address() {
        let transport = ScriptedTransport::new()
            .initial("\r\nfirepower# ")
            .on_line("show network", "Management IP : 192.168.45.45\r\nfirepower# ");
        let mut session = session(transport);
        let config = WizardConfig {
            verify: true,
            ..config()
        };
        let params = params();

        let err = Wizard::new(&mut session, &config, &params).run().await.unwrap_err();
        assert!(matches!(err, Error::Wizard(WizardError::Configuration { .. })));
    }

    #[test]
    fn test_passwords_render_hidden() {
        let params = params();
        assert_eq!(
            params.render(Reply::LoginPassword(LoginAttempt::FIRST)),
            ("Admin123".to_string(), true)
        );
        assert_eq!(
            params.render(Reply::LoginPassword(LoginAttempt::Fallback)),
            ("Cisco@135".to_string(), true)
        );
        assert_eq!(params.render(Reply::Netmask), ("255.255.255.0".to_string(), false));
    }
}
