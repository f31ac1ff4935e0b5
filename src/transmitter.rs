//! Message transmission
//!
//! The relay only sees [`Transmitter`]. The physical medium is an [`SmsCapability`] injected at
//! construction; [`SegmentingTransmitter`] splits long bodies into ordered segments and treats
//! the multi-part send as all-or-nothing.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::messages::preview;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Delivers one message body to one destination
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Go/no-go gate checked once before the relay starts
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    /// Send `body` to `destination`. Any failure is an [`Error::Delivery`].
    async fn send(&self, destination: &str, body: &str) -> Result<()>;
}

/// Platform capability that physically sends text
#[async_trait]
pub trait SmsCapability: Send + Sync {
    /// Platform permission prerequisites
    async fn check_permission(&self) -> Result<()>;

    /// Send ordered segments as one logical message
    async fn send_segments(&self, destination: &str, segments: &[String]) -> Result<()>;
}

#[async_trait]
impl SmsCapability for Box<dyn SmsCapability> {
    async fn check_permission(&self) -> Result<()> {
        (**self).check_permission().await
    }

    async fn send_segments(&self, destination: &str, segments: &[String]) -> Result<()> {
        (**self).send_segments(destination, segments).await
    }
}

/// Transmitter selected by config: dry-run, or the external send command
pub fn from_config(config: &Config) -> Result<SegmentingTransmitter<Box<dyn SmsCapability>>> {
    let capability: Box<dyn SmsCapability> = if config.dry_run {
        Box::new(DryRunCapability)
    } else {
        match &config.send_command {
            Some(program) => Box::new(CommandCapability::new(
                program.clone(),
                config.request_timeout(),
            )),
            None => {
                return Err(Error::Config(
                    "no send_command configured (use --dry-run to log instead of sending)"
                        .to_string(),
                ))
            }
        }
    };
    Ok(SegmentingTransmitter::new(
        capability,
        config.max_body_length_before_split,
    ))
}

/// Split `body` into chunks of at most `limit` characters, in order.
///
/// Never splits inside a UTF-8 code point; concatenating the chunks gives back `body`.
pub fn split_segments(body: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if body.chars().count() <= limit {
        return vec![body.to_string()];
    }

    let chars: Vec<char> = body.chars().collect();
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}

/// [`Transmitter`] over an injected capability
pub struct SegmentingTransmitter<C> {
    capability: C,
    segment_limit: usize,
}

impl<C: SmsCapability> SegmentingTransmitter<C> {
    pub fn new(capability: C, segment_limit: usize) -> Self {
        Self {
            capability,
            segment_limit,
        }
    }

    pub fn capability(&self) -> &C {
        &self.capability
    }
}

#[async_trait]
impl<C: SmsCapability> Transmitter for SegmentingTransmitter<C> {
    async fn ready(&self) -> Result<()> {
        self.capability.check_permission().await
    }

    async fn send(&self, destination: &str, body: &str) -> Result<()> {
        if destination.trim().is_empty() {
            return Err(Error::Delivery("empty destination".to_string()));
        }

        let segments = split_segments(body, self.segment_limit);
        if segments.len() > 1 {
            debug!("Sending {} segments to {}", segments.len(), destination);
        }

        self.capability
            .send_segments(destination, &segments)
            .await
            .map_err(|e| match e {
                Error::Delivery(_) => e,
                other => Error::Delivery(other.to_string()),
            })
    }
}

/// Sends through an external program, invoked once per segment as `<program> <to> <text>`
///
/// Each invocation must finish within `timeout`; a hung program is killed and the message fails.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    program: PathBuf,
    timeout: Duration,
}

impl CommandCapability {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }
}

#[async_trait]
impl SmsCapability for CommandCapability {
    async fn check_permission(&self) -> Result<()> {
        match tokio::fs::metadata(&self.program).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(Error::PermissionDenied(format!(
                "{} is not a file",
                self.program.display()
            ))),
            Err(e) => Err(Error::PermissionDenied(format!(
                "{}: {}",
                self.program.display(),
                e
            ))),
        }
    }

    async fn send_segments(&self, destination: &str, segments: &[String]) -> Result<()> {
        for (idx, segment) in segments.iter().enumerate() {
            let mut command = Command::new(&self.program);
            command.arg(destination).arg(segment).kill_on_drop(true);

            let output = tokio::time::timeout(self.timeout, command.output())
                .await
                .map_err(|_| {
                    warn!(
                        "Send command timed out on segment {}/{} to {}",
                        idx + 1,
                        segments.len(),
                        destination
                    );
                    Error::Delivery(format!(
                        "segment {}/{} timed out after {}ms",
                        idx + 1,
                        segments.len(),
                        self.timeout.as_millis()
                    ))
                })?
                .map_err(|e| Error::Delivery(format!("{}: {}", self.program.display(), e)))?;

            if !output.status.success() {
                warn!(
                    "Send command failed on segment {}/{} to {}",
                    idx + 1,
                    segments.len(),
                    destination
                );
                return Err(Error::Delivery(format!(
                    "segment {}/{} failed ({}): {}",
                    idx + 1,
                    segments.len(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        Ok(())
    }
}

/// Logs instead of sending; always succeeds
#[derive(Debug, Clone, Default)]
pub struct DryRunCapability;

#[async_trait]
impl SmsCapability for DryRunCapability {
    async fn check_permission(&self) -> Result<()> {
        Ok(())
    }

    async fn send_segments(&self, destination: &str, segments: &[String]) -> Result<()> {
        for (idx, segment) in segments.iter().enumerate() {
            info!(
                "[dry-run] {} ({}/{}): {}",
                destination,
                idx + 1,
                segments.len(),
                preview(segment, 40)
            );
        }
        Ok(())
    }
}
