//! Command runner: feeds expanded command templates to a shell session.
//!
//! Each command waits for the shell prompt before the next one is sent.
//! Commands are independent; a command whose prompt never shows up is logged
//! and skipped, not retried.

mod plan;
mod template;

pub use plan::{CommandTemplates, PlannedCommand, router_plan};
pub use template::{TemplateVars, expand, expand_all};

use std::time::Duration;

use log::{debug, info, warn};

use crate::channel::{Pattern, Session};
use crate::error::{ChannelError, Error, Result};
use crate::transport::Transport;

/// Command runner timing and prompt configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wait for the prompt after each command.
    pub command_timeout: Duration,

    /// Wait for the banner after the initial wake-up line.
    pub banner_timeout: Duration,

    /// Shell prompt that ends a command.
    pub prompt: Pattern,

    /// Output substrings that mark a command as rejected.
    pub failed_when_contains: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            banner_timeout: Duration::from_secs(5),
            prompt: Pattern::shell_prompt(),
            failed_when_contains: vec![
                "% Invalid input".to_string(),
                "% Incomplete command".to_string(),
                "% Ambiguous command".to_string(),
            ],
        }
    }
}

/// What happened to each command of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Commands written to the device.
    pub sent: usize,

    /// Commands whose prompt did not arrive in time (display form).
    pub timed_out: Vec<String>,

    /// Commands the device rejected, with the matched failure text.
    pub rejected: Vec<(String, String)>,
}

impl RunReport {
    /// Every command got its prompt back without a failure marker.
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.rejected.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} commands sent, {} timed out, {} rejected",
            self.sent,
            self.timed_out.len(),
            self.rejected.len()
        )
    }
}

/// Sends command sequences over one session.
pub struct CommandRunner<'a, T> {
    session: &'a mut Session<T>,
    config: &'a RunnerConfig,
}

impl<'a, T: Transport> CommandRunner<'a, T> {
    pub fn new(session: &'a mut Session<T>, config: &'a RunnerConfig) -> Self {
        Self { session, config }
    }

    /// Expand `templates` against `vars` and run them.
    ///
    /// Expansion happens up front; a missing value fails before anything
    /// is written.
    pub async fn run_templates<S: AsRef<str>>(
        &mut self,
        templates: &[S],
        vars: &TemplateVars,
    ) -> Result<RunReport> {
        let commands: Vec<PlannedCommand> = templates
            .iter()
            .map(|t| {
                Ok(PlannedCommand {
                    text: expand(t.as_ref(), vars)?,
                    hidden: t.as_ref().contains("{password}"),
                })
            })
            .collect::<std::result::Result<_, crate::error::TemplateError>>()?;
        self.run(&commands).await
    }

    /// Wake the line with an empty line and collect the banner.
    pub async fn wake(&mut self) -> Result<String> {
        self.session.write_line("").await?;
        let banner = self.session.read_available(self.config.banner_timeout).await?;
        let preview: String = banner.chars().take(100).collect();
        debug!("{}: banner {:?}", self.session.host(), preview);
        self.session.buffer_mut().clear();
        Ok(banner)
    }

    /// Send each command and wait for the prompt after it.
    ///
    /// Transport failures abort the run; prompt timeouts do not.
    pub async fn run(&mut self, commands: &[PlannedCommand]) -> Result<RunReport> {
        let mut report = RunReport::default();

        for command in commands {
            if command.hidden {
                self.session.write_hidden(&command.text).await?;
            } else {
                self.session.write_line(&command.text).await?;
            }
            report.sent += 1;

            match self
                .session
                .wait_for_pattern(&self.config.prompt, self.config.command_timeout)
                .await
            {
                Ok(output) => {
                    if let Some(marker) = self
                        .config
                        .failed_when_contains
                        .iter()
                        .find(|m| output.contains(m.as_str()))
                    {
                        warn!(
                            "{}: {:?} rejected: {}",
                            self.session.host(),
                            command.display(),
                            marker
                        );
                        report
                            .rejected
                            .push((command.display().to_string(), marker.clone()));
                    } else {
                        debug!("{}: >> {}", self.session.host(), command.display());
                    }
                }
                Err(Error::Channel(ChannelError::PatternTimeout { timeout, .. })) => {
                    warn!(
                        "{}: no prompt after {:?} within {:?}",
                        self.session.host(),
                        command.display(),
                        timeout
                    );
                    // Stale partial output must not satisfy the next prompt wait.
                    self.session.buffer_mut().clear();
                    report.timed_out.push(command.display().to_string());
                }
                Err(e) => return Err(e),
            }
        }

        info!("{}: {}", self.session.host(), report.summary());
        Ok(report)
    }
}
