//! End-of-run aggregation.
//!
//! Live events are best effort; the record is built from a full re-scan of
//! the buffer once the utility has exited. Download and upload always come
//! from the last match in the buffer, which is the summary line the utility
//! prints at the end. Ping prefers the live value and falls back to the last
//! latency match when no non-zero latency was seen live.

use chrono::{DateTime, Utc};
use speedpulse_state::{ResultRecord, UNKNOWN};

use crate::parser::Phase;
use crate::patterns;

/// The utility exited unsuccessfully; no record is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("measurement utility exited with code {exit_code}")]
pub struct NonZeroExit {
    pub exit_code: i32,
}

/// Build the canonical record for a finished run.
pub fn finalize(
    buffer: &str,
    exit_code: i32,
    live_ping: f64,
    timestamp: DateTime<Utc>,
) -> Result<ResultRecord, NonZeroExit> {
    if exit_code != 0 {
        return Err(NonZeroExit { exit_code });
    }

    let mut record = ResultRecord::empty(timestamp);

    record.ping = if live_ping > 0.0 {
        live_ping
    } else {
        patterns::last_phase_value(buffer, Phase::Ping).unwrap_or(0.0)
    };
    record.download = patterns::last_phase_value(buffer, Phase::Download).unwrap_or(0.0);
    record.upload = patterns::last_phase_value(buffer, Phase::Upload).unwrap_or(0.0);
    record.packet_loss = patterns::last_packet_loss(buffer).unwrap_or(0.0);

    if let Some(isp) = patterns::last_isp(buffer) {
        record.isp = isp;
    }
    if let Some(server) = patterns::last_server(buffer) {
        record.server_location = server.location.unwrap_or_else(|| UNKNOWN.to_string());
        record.server_country = server.country.unwrap_or_else(|| UNKNOWN.to_string());
        record.server_name = Some(server.name).filter(|n| !n.is_empty());
        record.server_id = server.id;
    }

    record.jitter = patterns::last_jitter(buffer);
    record.result_url = patterns::last_result_url(buffer);
    record.external_ip = patterns::last_external_ip(buffer);
    record.is_vpn = patterns::last_vpn_flag(buffer);

    let down = patterns::last_transfer_details(buffer, Phase::Download);
    record.download_bytes = down.bytes;
    record.download_elapsed_ms = down.elapsed_ms;
    let up = patterns::last_transfer_details(buffer, Phase::Upload);
    record.upload_bytes = up.bytes;
    record.upload_elapsed_ms = up.elapsed_ms;

    Ok(record)
}
