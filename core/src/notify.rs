//! Best-effort status notification.
//!
//! `NotificationClient` holds an ordered list of transports and uses the
//! first one available on the host. It makes exactly one attempt: a failing
//! transport does not fall through to the next, and nothing is retried. With
//! no HTTP tool on the host at all, the notification counts as sent
//! (`Simulated`) so that an impoverished environment never blocks the cycle.

use std::fmt;

use serde::Serialize;

use crate::infrastructure::{shell_quote, CommandRunner};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Curl,
    Wget,
    Simulated,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Curl => "curl",
            TransportKind::Wget => "wget",
            TransportKind::Simulated => "simulated",
        })
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifyOutcome {
    pub success: bool,
    pub transport: TransportKind,
    /// HTTP status, transport error, or why it was simulated.
    pub detail: String,
}


/// Facts about the cycle that a transport may put in the request body.
#[derive(Debug, Clone, Serialize)]
pub struct Payload<'a> {
    pub process: &'a str,
    pub status: &'a str,
    pub host: String,
    pub timestamp: String,
}

impl<'a> Payload<'a> {
    pub fn new(process: &'a str, status: &'a str) -> Self {
        Payload {
            process,
            status,
            host: hostname(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}


pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Whether the host can use this transport at all.
    fn is_available(&self) -> bool;

    /// One request. `Ok` carries a short success detail.
    fn send(&self, url: &str, timeout_secs: u64, payload: &Payload<'_>) -> Result<String, String>;
}


/// POST with a JSON body through `curl`. Only 200 and 201 count as success.
pub struct CurlTransport<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CurlTransport<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        CurlTransport { runner }
    }
}

impl Transport for CurlTransport<'_> {
    fn kind(&self) -> TransportKind {
        TransportKind::Curl
    }

    fn is_available(&self) -> bool {
        self.runner.has_program("curl")
    }

    fn send(&self, url: &str, timeout_secs: u64, payload: &Payload<'_>) -> Result<String, String> {
        let body = serde_json::to_string(payload).map_err(|e| e.to_string())?;
        let cmd = format!(
            "curl -s -o /dev/null -w '%{{http_code}}' -X POST \
             -H 'Content-Type: application/json' \
             --connect-timeout {t} --max-time {t} -d {body} {url}",
            t = timeout_secs,
            body = shell_quote(&body),
            url = shell_quote(url),
        );
        let out = self.runner.run(&cmd)?;
        let code = out.trim();
        match code {
            "200" | "201" => Ok(format!("HTTP {}", code)),
            "000" | "" => Err("no HTTP response".into()),
            other => Err(format!("HTTP {}", other)),
        }
    }
}


/// GET through `wget`, single try. Success iff the transfer completes.
pub struct WgetTransport<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> WgetTransport<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        WgetTransport { runner }
    }
}

impl Transport for WgetTransport<'_> {
    fn kind(&self) -> TransportKind {
        TransportKind::Wget
    }

    fn is_available(&self) -> bool {
        self.runner.has_program("wget")
    }

    fn send(&self, url: &str, timeout_secs: u64, _payload: &Payload<'_>) -> Result<String, String> {
        let cmd = format!(
            "wget -q -O /dev/null --header='Content-Type: application/json' \
             --timeout={} --tries=1 {}",
            timeout_secs,
            shell_quote(url),
        );
        self.runner
            .run(&cmd)
            .map(|_| "transfer complete".to_string())
            .map_err(|e| {
                let e = e.trim();
                if e.is_empty() {
                    "transfer failed".to_string()
                } else {
                    e.to_string()
                }
            })
    }
}


pub struct NotificationClient<'a> {
    transports: Vec<Box<dyn Transport + 'a>>,
}

impl<'a> NotificationClient<'a> {
    pub fn new(transports: Vec<Box<dyn Transport + 'a>>) -> Self {
        NotificationClient { transports }
    }

    /// curl first, then wget, through `runner`.
    pub fn with_host_tools(runner: &'a dyn CommandRunner) -> Self {
        NotificationClient::new(vec![
            Box::new(CurlTransport::new(runner)),
            Box::new(WgetTransport::new(runner)),
        ])
    }

    /// The transport `notify` would use, or `Simulated`.
    pub fn selected(&self) -> TransportKind {
        self.transports
            .iter()
            .find(|t| t.is_available())
            .map(|t| t.kind())
            .unwrap_or(TransportKind::Simulated)
    }

    pub fn notify(&self, url: &str, timeout_secs: u64, payload: &Payload<'_>) -> NotifyOutcome {
        let transport = match self.transports.iter().find(|t| t.is_available()) {
            Some(t) => t,
            None => {
                tracing::info!(url, "no HTTP client on host, notification simulated");
                return NotifyOutcome {
                    success: true,
                    transport: TransportKind::Simulated,
                    detail: "no HTTP client available".into(),
                };
            }
        };

        let kind = transport.kind();
        match transport.send(url, timeout_secs, payload) {
            Ok(detail) => {
                tracing::debug!(%kind, url, %detail, "notification sent");
                NotifyOutcome {
                    success: true,
                    transport: kind,
                    detail,
                }
            }
            Err(detail) => {
                tracing::debug!(%kind, url, %detail, "notification failed");
                NotifyOutcome {
                    success: false,
                    transport: kind,
                    detail,
                }
            }
        }
    }
}


fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "unknown".into();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
