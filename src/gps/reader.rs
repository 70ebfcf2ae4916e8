//! # GPS Serial Reader
//!
//! Reads NMEA sentences from the receiver's UART and publishes fixes.
//!
//! This module handles:
//! - Opening the serial port (8N1, no flow control)
//! - Line reads bounded by a read timeout
//! - Reopening the port after failures
//! - Stopping on shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::watch;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::feed::GpsFeed;
use super::nmea::{parse_sentence, Sentence};
use crate::config::GpsConfig;
use crate::error::{Result, TrackerError};

/// Longest line accepted from the receiver (NMEA 0183 sentences are at most 82 characters)
pub const MAX_SENTENCE_BYTES: usize = 256;

/// Why a read loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Shutdown was requested
    Shutdown,

    /// The port reached end of stream
    Eof,
}

/// Counters for one read session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub fixes: u64,
    pub no_fix: u64,
    pub malformed: u64,
}

/// Run the serial reader until shutdown
///
/// Failures to open or read the port are logged and retried after
/// `reconnect_interval_ms`; they never stop the task.
pub async fn run_serial(config: GpsConfig, feed: Arc<GpsFeed>, mut shutdown: watch::Receiver<bool>) {
    let reconnect = Duration::from_millis(config.reconnect_interval_ms);
    let read_timeout = Duration::from_millis(config.read_timeout_ms);

    loop {
        match open_port(&config.port, config.baud_rate) {
            Ok(port) => {
                info!("Opened GPS receiver at {} ({} baud)", config.port, config.baud_rate);
                let mut stats = ReadStats::default();
                let result = read_fixes(
                    BufReader::new(port),
                    &feed,
                    read_timeout,
                    config.apply_hemisphere_sign,
                    &mut stats,
                    &mut shutdown,
                )
                .await;

                debug!("GPS read session ended: {:?}", stats);
                match result {
                    Ok(ReadEnd::Shutdown) => break,
                    Ok(ReadEnd::Eof) => warn!("GPS receiver at {} closed the stream", config.port),
                    Err(e) => warn!("GPS read failed on {}: {}", config.port, e),
                }
            }
            Err(e) => warn!("Failed to open GPS receiver: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("GPS reader stopped");
}

/// Open the receiver's serial port
fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", path, e)))
}

/// Read sentences from `reader`, publishing each fix into `feed`
///
/// A read that times out is not an error: the receiver may be silent while
/// searching for satellites, and staleness is handled by the feed's consumers.
/// Bytes of a sentence interrupted by the timeout are kept until its line
/// break arrives. Runs longer than `MAX_SENTENCE_BYTES` without a line break
/// are discarded as malformed.
pub async fn read_fixes<R>(
    mut reader: R,
    feed: &GpsFeed,
    read_timeout: Duration,
    apply_hemisphere_sign: bool,
    stats: &mut ReadStats,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<ReadEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(128);

    loop {
        let remaining = MAX_SENTENCE_BYTES.saturating_sub(line.len()).max(1) as u64;
        let mut limited = (&mut reader).take(remaining);

        let read = tokio::select! {
            read = tokio::time::timeout(read_timeout, limited.read_until(b'\n', &mut line)) => read,
            _ = shutdown.changed() => return Ok(ReadEnd::Shutdown),
        };

        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                debug!("No NMEA data within {:?}", read_timeout);
                continue;
            }
        };

        if n == 0 {
            if !line.is_empty() {
                handle_sentence(&line, feed, apply_hemisphere_sign, stats);
            }
            return Ok(ReadEnd::Eof);
        }

        if line.ends_with(b"\n") {
            handle_sentence(&line, feed, apply_hemisphere_sign, stats);
            line.clear();
        } else if line.len() >= MAX_SENTENCE_BYTES {
            stats.malformed += 1;
            debug!("Discarding {} bytes without a line break", line.len());
            line.clear();
        }
    }
}

fn handle_sentence(line: &[u8], feed: &GpsFeed, apply_hemisphere_sign: bool, stats: &mut ReadStats) {
    let text = String::from_utf8_lossy(line);
    match parse_sentence(&text, apply_hemisphere_sign) {
        Ok(Sentence::Fix(position)) => {
            stats.fixes += 1;
            feed.publish(position);
        }
        Ok(Sentence::NoFix) => stats.no_fix += 1,
        Ok(Sentence::Other) => {}
        Err(e) => {
            stats.malformed += 1;
            debug!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Position;

    const INPUT: &[u8] = b"$GPGSV,3,1,11,03,03,111,00*70\r\n\
$GPGGA,123519,,,,,0,00,,,M,,M,,\r\n\
garbage line\r\n\
$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

    const GGA_FIX: &[u8] = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

    #[tokio::test]
    async fn test_read_fixes_publishes_until_eof() {
        let feed = GpsFeed::new(None);
        let (_tx, mut shutdown) = watch::channel(false);
        let mut stats = ReadStats::default();

        let end = read_fixes(INPUT, &feed, Duration::from_secs(1), true, &mut stats, &mut shutdown)
            .await
            .unwrap();

        assert_eq!(end, ReadEnd::Eof);
        assert_eq!(stats.fixes, 1);
        assert_eq!(stats.no_fix, 1);
        assert!(stats.malformed >= 1);

        let latest = feed.latest().unwrap().position;
        assert!((latest.latitude - 48.1173).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_read_fixes_stops_on_shutdown() {
        let feed = GpsFeed::new(None);
        let (tx, mut shutdown) = watch::channel(false);
        let mut stats = ReadStats::default();

        // A reader that never yields data
        let (_client, server) = tokio::io::duplex(64);
        let reader = BufReader::new(server);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        });

        let end = read_fixes(reader, &feed, Duration::from_millis(5), true, &mut stats, &mut shutdown)
            .await
            .unwrap();
        assert_eq!(end, ReadEnd::Shutdown);
        assert_eq!(feed.latest().map(|s| s.position), None::<Position>);
    }

    #[tokio::test]
    async fn test_sentence_split_by_read_timeout_is_kept() {
        use tokio::io::AsyncWriteExt;

        let feed = GpsFeed::new(None);
        let (_tx, mut shutdown) = watch::channel(false);
        let mut stats = ReadStats::default();

        let (head, rest) = GGA_FIX.split_at(30);
        let (head, rest) = (head.to_vec(), rest.to_vec());

        let (mut client, server) = tokio::io::duplex(256);
        tokio::spawn(async move {
            client.write_all(&head).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            client.write_all(&rest).await.unwrap();
        });

        let end = read_fixes(
            BufReader::new(server),
            &feed,
            Duration::from_millis(5),
            true,
            &mut stats,
            &mut shutdown,
        )
        .await
        .unwrap();

        assert_eq!(end, ReadEnd::Eof);
        assert_eq!(stats.fixes, 1);
        assert_eq!(stats.malformed, 0);
    }

    #[tokio::test]
    async fn test_runaway_line_is_capped() {
        let feed = GpsFeed::new(None);
        let (_tx, mut shutdown) = watch::channel(false);
        let mut stats = ReadStats::default();

        let mut input = vec![b'x'; MAX_SENTENCE_BYTES * 4];
        input.extend_from_slice(b"\r\n");
        input.extend_from_slice(GGA_FIX);

        let end = read_fixes(&input[..], &feed, Duration::from_secs(1), true, &mut stats, &mut shutdown)
            .await
            .unwrap();

        assert_eq!(end, ReadEnd::Eof);
        assert_eq!(stats.fixes, 1);
        assert!(stats.malformed >= 4);
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let result = open_port("/dev/nonexistent_gps_device_12345", 9600);
        match result {
            Err(TrackerError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_gps_device_12345"));
            }
            other => panic!("Expected Serial error, got: {:?}", other.map(|_| ())),
        }
    }
}
