//! Process-wide time configuration.
//!
//! [`configure_time`] records the timezone offset used for `HH:MM` timestamps,
//! then blocks until one of the configured NTP servers answers with a nonzero
//! time. The difference between that time and the host clock is kept
//! process-wide and applied by [`SystemClock`](crate::clock::SystemClock).
//!
//! The default [`TimeConfig`] has no timeout, so the call can block forever if
//! no server is ever reachable. Set [`TimeConfig::timeout`] to bound it.
use crate::clock::{self, SystemClock};
use std::net::{ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_NTP_SERVERS: [&str; 2] = ["pool.ntp.org", "time.nist.gov"];
pub const MAX_NTP_SERVERS: usize = 2;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;
// LI = 0, VN = 3, Mode = 3 (client)
const SNTP_CLIENT_HEADER: u8 = 0x1B;
const NTP_UNIX_EPOCH_DELTA: i64 = 2_208_988_800;
const NTP_ERA_SECS: i64 = 1 << 32;

#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("no NTP servers configured")]
    NoServers,
    #[error("NTP query to {server} failed: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid NTP response from {server}: {reason}")]
    InvalidResponse { server: String, reason: &'static str },
    #[error("time sync did not complete within {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct TimeConfig {
    pub tz_offset_hours: i32,
    /// Only the first [`MAX_NTP_SERVERS`] entries are queried.
    pub servers: Vec<String>,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            tz_offset_hours: 0,
            servers: DEFAULT_NTP_SERVERS.iter().map(|s| s.to_string()).collect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

pub trait TimeSource {
    /// Milliseconds since the Unix epoch according to `server`. Zero means the
    /// source has no time yet.
    fn query_unix_ms(&self, server: &str) -> Result<i64, TimeSyncError>;
}

/// Single-shot SNTP client (RFC 4330, client mode) over UDP.
#[derive(Debug, Clone)]
pub struct SntpSource {
    read_timeout: Duration,
}

impl SntpSource {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for SntpSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TimeSource for SntpSource {
    fn query_unix_ms(&self, server: &str) -> Result<i64, TimeSyncError> {
        let io_err = |source: std::io::Error| TimeSyncError::Io {
            server: server.to_string(),
            source,
        };

        let addr = (server, NTP_PORT)
            .to_socket_addrs()
            .map_err(io_err)?
            .next()
            .ok_or_else(|| TimeSyncError::InvalidResponse {
                server: server.to_string(),
                reason: "no address resolved",
            })?;
        let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).map_err(io_err)?;
        socket
            .set_read_timeout(Some(self.read_timeout))
            .map_err(io_err)?;
        socket.connect(addr).map_err(io_err)?;

        let mut request = [0u8; NTP_PACKET_LEN];
        request[0] = SNTP_CLIENT_HEADER;
        socket.send(&request).map_err(io_err)?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let len = socket.recv(&mut response).map_err(io_err)?;
        parse_sntp_response(&response[..len]).map_err(|reason| TimeSyncError::InvalidResponse {
            server: server.to_string(),
            reason,
        })
    }
}

/// Extracts the transmit timestamp as Unix milliseconds.
fn parse_sntp_response(buf: &[u8]) -> Result<i64, &'static str> {
    if buf.len() < NTP_PACKET_LEN {
        return Err("short packet");
    }
    let mode = buf[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err("unexpected mode");
    }
    if buf[1] == 0 {
        return Err("kiss-o'-death");
    }

    let secs = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
    let frac = u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]);
    if secs == 0 {
        return Err("zero transmit timestamp");
    }

    // MSB clear means era 1 (after 2036-02-07).
    let mut ntp_secs = secs as i64;
    if secs & 0x8000_0000 == 0 {
        ntp_secs += NTP_ERA_SECS;
    }
    let unix_secs = ntp_secs - NTP_UNIX_EPOCH_DELTA;
    let millis = ((frac as u64 * 1000) >> 32) as i64;
    Ok(unix_secs * 1000 + millis)
}

pub fn configure_time(config: &TimeConfig) -> Result<(), TimeSyncError> {
    configure_time_with(&SntpSource::default(), config)
}

pub fn configure_time_with(
    source: &impl TimeSource,
    config: &TimeConfig,
) -> Result<(), TimeSyncError> {
    if config.servers.is_empty() {
        return Err(TimeSyncError::NoServers);
    }
    clock::set_utc_offset_secs(config.tz_offset_hours.saturating_mul(3600));

    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        for server in config.servers.iter().take(MAX_NTP_SERVERS) {
            match source.query_unix_ms(server) {
                Ok(unix_ms) if unix_ms > 0 => {
                    let correction_ms = unix_ms - clock::host_unix_ms();
                    clock::set_correction_ms(correction_ms);
                    tracing::info!(
                        server = %server,
                        correction_ms,
                        attempts = attempts + 1,
                        tz_offset_hours = config.tz_offset_hours,
                        "time synchronized"
                    );
                    return Ok(());
                }
                Ok(_) => tracing::debug!(server = %server, "time source has no time yet"),
                Err(err) if attempts == 0 => tracing::warn!(error = %err, "ntp query failed"),
                Err(err) => tracing::debug!(error = %err, attempts, "ntp query failed"),
            }
        }
        attempts = attempts.saturating_add(1);

        if let Some(timeout) = config.timeout {
            if started.elapsed() >= timeout {
                tracing::warn!(attempts, ?timeout, "time sync timed out");
                return Err(TimeSyncError::TimedOut(timeout));
            }
        }
        std::thread::sleep(config.poll_interval);
    }
}

pub fn is_synchronized() -> bool {
    clock::is_synchronized(&SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::cell::RefCell;
    use std::sync::Mutex;

    // Tests below mutate the process-wide time settings.
    static PROCESS_TIME_GUARD: Mutex<()> = Mutex::new(());

    struct ScriptedSource {
        replies: RefCell<Vec<Result<i64, TimeSyncError>>>,
        queried: RefCell<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(mut replies: Vec<Result<i64, TimeSyncError>>) -> Self {
            replies.reverse();
            Self {
                replies: RefCell::new(replies),
                queried: RefCell::new(Vec::new()),
            }
        }
    }

    impl TimeSource for ScriptedSource {
        fn query_unix_ms(&self, server: &str) -> Result<i64, TimeSyncError> {
            self.queried.borrow_mut().push(server.to_string());
            self.replies.borrow_mut().pop().unwrap_or(Ok(0))
        }
    }

    fn fast_config(servers: &[&str]) -> TimeConfig {
        TimeConfig {
            tz_offset_hours: 0,
            servers: servers.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_millis(5),
            timeout: None,
        }
    }

    #[test]
    fn waits_until_source_reports_time_then_applies_offset() {
        let _guard = PROCESS_TIME_GUARD.lock().unwrap_or_else(|p| p.into_inner());
        let target_ms = 1_709_649_000_000;
        let source = ScriptedSource::new(vec![
            Ok(0),
            Err(TimeSyncError::InvalidResponse {
                server: "b".to_string(),
                reason: "short packet",
            }),
            Ok(0),
            Ok(target_ms),
        ]);
        let mut config = fast_config(&["a", "b"]);
        config.tz_offset_hours = 8;

        configure_time_with(&source, &config).unwrap();

        assert_eq!(source.queried.borrow().len(), 4);
        assert_eq!(SystemClock.utc_offset_secs(), 8 * 3600);
        let drift = (SystemClock.unix_seconds() - target_ms / 1000).abs();
        assert!(drift <= 2, "drift {drift}s");
        assert!(is_synchronized());

        clock::set_utc_offset_secs(0);
        clock::set_correction_ms(0);
    }

    #[test]
    fn only_first_two_servers_are_queried() {
        let _guard = PROCESS_TIME_GUARD.lock().unwrap_or_else(|p| p.into_inner());
        let source = ScriptedSource::new(vec![Ok(0), Ok(0), Ok(0), Ok(0)]);
        let mut config = fast_config(&["a", "b", "c"]);
        config.timeout = Some(Duration::from_millis(1));

        let err = configure_time_with(&source, &config).unwrap_err();

        assert!(matches!(err, TimeSyncError::TimedOut(_)));
        assert!(source.queried.borrow().iter().all(|s| s != "c"));
        clock::set_utc_offset_secs(0);
    }

    #[test]
    fn bounded_wait_times_out() {
        let _guard = PROCESS_TIME_GUARD.lock().unwrap_or_else(|p| p.into_inner());
        let source = ScriptedSource::new(Vec::new());
        let mut config = fast_config(&["a"]);
        config.timeout = Some(Duration::from_millis(30));

        let started = Instant::now();
        let err = configure_time_with(&source, &config).unwrap_err();

        assert!(matches!(err, TimeSyncError::TimedOut(t) if t == Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(source.queried.borrow().len() >= 2);
        clock::set_utc_offset_secs(0);
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let source = ScriptedSource::new(Vec::new());
        let err = configure_time_with(&source, &fast_config(&[])).unwrap_err();
        assert!(matches!(err, TimeSyncError::NoServers));
        assert!(source.queried.borrow().is_empty());
    }

    #[test]
    fn default_config_uses_public_ntp_servers_and_no_timeout() {
        let config = TimeConfig::default();
        assert_eq!(config.tz_offset_hours, 0);
        assert_eq!(config.servers, vec!["pool.ntp.org", "time.nist.gov"]);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.timeout.is_none());
    }

    fn server_packet(ntp_secs: u32, frac: u32) -> [u8; NTP_PACKET_LEN] {
        let mut buf = [0u8; NTP_PACKET_LEN];
        buf[0] = 0x1C; // LI = 0, VN = 3, Mode = 4
        buf[1] = 2;
        buf[40..44].copy_from_slice(&ntp_secs.to_be_bytes());
        buf[44..48].copy_from_slice(&frac.to_be_bytes());
        buf
    }

    #[test]
    fn parses_transmit_timestamp() {
        let ntp_secs = (1_709_649_000 + NTP_UNIX_EPOCH_DELTA) as u32;
        let buf = server_packet(ntp_secs, 1 << 31);
        assert_eq!(parse_sntp_response(&buf), Ok(1_709_649_000_500));
    }

    #[test]
    fn handles_era_rollover() {
        // 2040-01-01T00:00:00Z lands in NTP era 1.
        let unix = 2_208_988_800_i64;
        let ntp_secs = (unix + NTP_UNIX_EPOCH_DELTA - NTP_ERA_SECS) as u32;
        let buf = server_packet(ntp_secs, 0);
        assert_eq!(parse_sntp_response(&buf), Ok(unix * 1000));
    }

    #[test]
    fn rejects_malformed_responses() {
        assert_eq!(parse_sntp_response(&[0u8; 12]), Err("short packet"));

        let mut client_mode = server_packet(3_900_000_000, 0);
        client_mode[0] = SNTP_CLIENT_HEADER;
        assert_eq!(parse_sntp_response(&client_mode), Err("unexpected mode"));

        let mut kod = server_packet(3_900_000_000, 0);
        kod[1] = 0;
        assert_eq!(parse_sntp_response(&kod), Err("kiss-o'-death"));

        assert_eq!(
            parse_sntp_response(&server_packet(0, 0)),
            Err("zero transmit timestamp")
        );
    }
}
