//! systemd service notifications
//!
//! Readiness and status lines for `Type=notify` units. Without
//! `NOTIFY_SOCKET` every call is a no-op.

use chrono::Local;
use sd_notify::NotifyState;
use tracing::debug;

/// Broker connected and announced
pub fn ready() {
    send(&[NotifyState::Ready]);
}

/// Timestamped `STATUS=` line shown by `systemctl status`
pub fn status(text: &str) {
    let line = status_line(text);
    send(&[NotifyState::Status(&line)]);
}

fn status_line(text: &str) -> String {
    format!("{} - {}.", Local::now().format("%Y-%m-%d %H:%M:%S"), text.trim_end_matches('.'))
}

fn send(states: &[NotifyState]) {
    if let Err(e) = sd_notify::notify(false, states) {
        debug!("systemd notification not delivered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_single_trailing_period() {
        let line = status_line("Configuration accepted.");
        assert!(line.ends_with(" - Configuration accepted."));
        assert!(!line.ends_with(".."));
    }

    #[cfg(unix)]
    #[test]
    fn test_ready_and_status_reach_notify_socket() {
        use std::os::unix::net::UnixDatagram;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let socket = UnixDatagram::bind(&path).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        std::env::set_var("NOTIFY_SOCKET", &path);
        status("Configuration accepted");
        ready();
        std::env::remove_var("NOTIFY_SOCKET");

        let mut buf = [0u8; 256];
        let n = socket.recv(&mut buf).unwrap();
        let first = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(first.starts_with("STATUS="));
        assert!(first.trim_end().ends_with("Configuration accepted."));

        let n = socket.recv(&mut buf).unwrap();
        assert_eq!(String::from_utf8_lossy(&buf[..n]).trim_end(), "READY=1");
    }
}
