//! Tolerant text patterns for the Ookla CLI output.
//!
//! Everything format-specific lives here so the live parser and the
//! finalizer only deal in typed values. The CLI prints lines such as:
//!
//! ```text
//!      Server: Init7 AG - Winterthur (id: 21541)
//!         ISP: Init7
//! Idle Latency:     3.50 ms   (jitter: 0.12ms, low: 3.40ms, high: 3.70ms)
//!     Download:   912.34 Mbps (data used: 1.0 GB)
//!       Upload:   850.12 Mbps (data used: 900.3 MB)
//!  Packet Loss:     0.0%
//!   Result URL: https://www.speedtest.net/result/c/6c2c…
//! ```
//!
//! Progress updates reuse the same labels and are separated by `\r`.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::parser::{Phase, Reading};

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("bad pattern {pattern}: {e}")))
}

// Numbers are captured loosely (`[0-9][0-9.]*`) so that garbage such as
// `1.2.3` still matches and is then dropped by the float parse.

fn latency_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r"(?i)(?:[a-z]+[ \t]+)?(?:latency|ping):[ \t]*([0-9][0-9.]*)[ \t]*(ms|s)\b",
    )
}

fn download_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r"(?i)\bdownload:[ \t]*([0-9][0-9.]*)[ \t]*(gbps|mbps|kbps|bps|gbit/s|mbit/s|kbit/s)",
    )
}

fn upload_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r"(?i)\bupload:[ \t]*([0-9][0-9.]*)[ \t]*(gbps|mbps|kbps|bps|gbit/s|mbit/s|kbit/s)",
    )
}

fn direction_details_re(phase: Phase) -> &'static Regex {
    static DOWN: OnceLock<Regex> = OnceLock::new();
    static UP: OnceLock<Regex> = OnceLock::new();
    match phase {
        Phase::Upload => compiled(
            &UP,
            r"(?i)\bupload:[ \t]*[0-9][0-9.]*[ \t]*[a-z/]+[ \t]*\(([^)\r\n]*)\)",
        ),
        _ => compiled(
            &DOWN,
            r"(?i)\bdownload:[ \t]*[0-9][0-9.]*[ \t]*[a-z/]+[ \t]*\(([^)\r\n]*)\)",
        ),
    }
}

fn data_used_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?i)data used:[ \t]*([0-9][0-9.]*)[ \t]*(gb|mb|kb|b)\b")
}

fn elapsed_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?i)elapsed:[ \t]*([0-9][0-9.]*)[ \t]*(ms|s)\b")
}

fn server_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r"(?im)^[ \t]*Server:[ \t]*(.+?)(?:[ \t]*\(id[ \t]*[:=]?[ \t]*([0-9]+)\))?[ \t]*\r?$",
    )
}

fn isp_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?im)^[ \t]*ISP:[ \t]*(.+?)[ \t]*\r?$")
}

fn packet_loss_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?i)packet[ \t]+loss:[ \t]*([0-9][0-9.]*)[ \t]*%")
}

fn jitter_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r"(?i)latency:[ \t]*[0-9][0-9.]*[ \t]*ms[ \t]*\((?:jitter:[ \t]*([0-9][0-9.]*)[ \t]*ms|([0-9][0-9.]*)[ \t]*ms[ \t]+jitter)",
    )
}

fn result_url_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?i)result[ \t]+url:[ \t]*(https?://\S+)")
}

fn external_ip_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(
        &CELL,
        r"(?im)^[ \t]*(?:external|public)[ \t]+ip(?:[ \t]+address)?:[ \t]*([0-9A-Fa-f:.]+)",
    )
}

fn vpn_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    compiled(&CELL, r"(?im)^[ \t]*vpn:[ \t]*(yes|no|true|false)\b")
}

/// Parse a loosely captured decimal. `None` for anything `f64` rejects or
/// that is negative or not finite.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

fn latency_ms(caps: &Captures<'_>) -> Option<f64> {
    let value = parse_number(caps.get(1)?.as_str())?;
    match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "s" => Some(value * 1000.0),
        _ => Some(value),
    }
}

fn rate_mbps(caps: &Captures<'_>) -> Option<f64> {
    let value = parse_number(caps.get(1)?.as_str())?;
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    let mbps = match unit.as_str() {
        "gbps" | "gbit/s" => value * 1000.0,
        "kbps" | "kbit/s" => value / 1000.0,
        "bps" => value / 1_000_000.0,
        _ => value,
    };
    Some(mbps)
}

fn phase_re(phase: Phase) -> &'static Regex {
    match phase {
        Phase::Ping => latency_re(),
        Phase::Download => download_re(),
        Phase::Upload => upload_re(),
    }
}

fn phase_value(phase: Phase, caps: &Captures<'_>) -> Option<f64> {
    match phase {
        Phase::Ping => latency_ms(caps),
        Phase::Download | Phase::Upload => rate_mbps(caps),
    }
}

/// Every phase reading in `text`, in textual order. Unparsable values are
/// dropped; zero latency is kept (suppression is the parser's decision).
pub(crate) fn scan_readings(text: &str) -> Vec<Reading> {
    let mut found: Vec<(usize, Reading)> = Vec::new();
    for phase in [Phase::Ping, Phase::Download, Phase::Upload] {
        for caps in phase_re(phase).captures_iter(text) {
            let Some(start) = caps.get(0).map(|m| m.start()) else {
                continue;
            };
            if let Some(value) = phase_value(phase, &caps) {
                found.push((start, Reading { phase, value }));
            }
        }
    }
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, reading)| reading).collect()
}

/// Value of the last parsable match for `phase` anywhere in `text`.
pub(crate) fn last_phase_value(text: &str, phase: Phase) -> Option<f64> {
    phase_re(phase)
        .captures_iter(text)
        .filter_map(|caps| phase_value(phase, &caps))
        .last()
}

fn last_capture<'t>(re: &Regex, text: &'t str, group: usize) -> Option<&'t str> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(group).map(|m| m.as_str()))
        .last()
}

/// Server identity as printed on the `Server:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerLine {
    pub name: String,
    pub location: Option<String>,
    pub country: Option<String>,
    pub id: Option<String>,
}

/// Split `"<sponsor> - <city>[, <country>]"`.
pub(crate) fn last_server(text: &str) -> Option<ServerLine> {
    let caps = server_re().captures_iter(text).last()?;
    let raw = caps.get(1)?.as_str().trim();
    let id = caps.get(2).map(|m| m.as_str().to_string());

    let (name, location) = match raw.rsplit_once(" - ") {
        Some((name, location)) => (name.trim(), Some(location.trim())),
        None => (raw, None),
    };
    let (location, country) = match location {
        Some(loc) => match loc.rsplit_once(',') {
            Some((city, country)) if !country.trim().is_empty() => (
                Some(city.trim().to_string()),
                Some(country.trim().to_string()),
            ),
            _ => (Some(loc.to_string()), None),
        },
        None => (None, None),
    };

    Some(ServerLine {
        name: name.to_string(),
        location: location.filter(|l| !l.is_empty()),
        country,
        id,
    })
}

pub(crate) fn last_isp(text: &str) -> Option<String> {
    last_capture(isp_re(), text, 1)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn last_packet_loss(text: &str) -> Option<f64> {
    packet_loss_re()
        .captures_iter(text)
        .filter_map(|caps| parse_number(caps.get(1)?.as_str()))
        .last()
}

pub(crate) fn last_jitter(text: &str) -> Option<f64> {
    jitter_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let raw = caps.get(1).or_else(|| caps.get(2))?;
            parse_number(raw.as_str())
        })
        .last()
}

pub(crate) fn last_result_url(text: &str) -> Option<String> {
    last_capture(result_url_re(), text, 1).map(str::to_string)
}

pub(crate) fn last_external_ip(text: &str) -> Option<String> {
    last_capture(external_ip_re(), text, 1).map(str::to_string)
}

pub(crate) fn last_vpn_flag(text: &str) -> Option<bool> {
    last_capture(vpn_re(), text, 1)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "true"))
}

/// Counters printed in parentheses after a throughput figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TransferDetails {
    pub bytes: Option<u64>,
    pub elapsed_ms: Option<u64>,
}

pub(crate) fn last_transfer_details(text: &str, phase: Phase) -> TransferDetails {
    let Some(inner) = last_capture(direction_details_re(phase), text, 1) else {
        return TransferDetails::default();
    };

    let bytes = data_used_re().captures(inner).and_then(|caps| {
        let value = parse_number(caps.get(1)?.as_str())?;
        let factor = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
            "gb" => 1_000_000_000.0,
            "mb" => 1_000_000.0,
            "kb" => 1_000.0,
            _ => 1.0,
        };
        Some((value * factor).round() as u64)
    });

    let elapsed_ms = elapsed_re().captures(inner).and_then(|caps| {
        let value = parse_number(caps.get(1)?.as_str())?;
        let ms = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
            "s" => value * 1000.0,
            _ => value,
        };
        Some(ms.round() as u64)
    });

    TransferDetails { bytes, elapsed_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "\n   Speedtest by Ookla\n\n\
      Server: Init7 AG - Winterthur (id: 21541)\n\
         ISP: Init7\n\
Idle Latency:     3.50 ms   (jitter: 0.12ms, low: 3.40ms, high: 3.70ms)\n\
    Download:   912.34 Mbps (data used: 1.0 GB)\n\
                 12.33 ms   (jitter: 1.01ms, low: 4.20ms, high: 30.10ms)\n\
      Upload:   850.12 Mbps (data used: 900.3 MB, elapsed: 10.2 s)\n\
 Packet Loss:     0.5%\n\
  Result URL: https://www.speedtest.net/result/c/6c2c0ad3\n";

    #[test]
    fn test_scan_readings_in_textual_order() {
        let readings = scan_readings(SUMMARY);
        let phases: Vec<Phase> = readings.iter().map(|r| r.phase).collect();
        assert_eq!(phases, vec![Phase::Ping, Phase::Download, Phase::Upload]);
        assert_eq!(readings[0].value, 3.50);
        assert_eq!(readings[1].value, 912.34);
        assert_eq!(readings[2].value, 850.12);
    }

    #[test]
    fn test_loaded_latency_line_is_not_a_ping() {
        let readings = scan_readings("                 12.33 ms   (jitter: 1.01ms)\n");
        assert!(readings.is_empty());
    }

    #[test]
    fn test_unparsable_number_is_dropped() {
        assert!(scan_readings("Download: 1.2.3 Mbps\n").is_empty());
    }

    #[test]
    fn test_rate_units_normalise_to_mbps() {
        assert_eq!(last_phase_value("Download: 1.5 Gbps", Phase::Download), Some(1500.0));
        assert_eq!(last_phase_value("Upload: 800 kbps", Phase::Upload), Some(0.8));
        assert_eq!(last_phase_value("Download: 42 Mbit/s", Phase::Download), Some(42.0));
    }

    #[test]
    fn test_latency_in_seconds() {
        assert_eq!(last_phase_value("Ping: 0.25 s", Phase::Ping), Some(250.0));
    }

    #[test]
    fn test_server_line_split() {
        let server = last_server(SUMMARY).expect("server");
        assert_eq!(server.name, "Init7 AG");
        assert_eq!(server.location.as_deref(), Some("Winterthur"));
        assert_eq!(server.country, None);
        assert_eq!(server.id.as_deref(), Some("21541"));
    }

    #[test]
    fn test_server_line_with_country() {
        let server = last_server("Server: Telia - Stockholm, Sweden (id = 8)\n").expect("server");
        assert_eq!(server.location.as_deref(), Some("Stockholm"));
        assert_eq!(server.country.as_deref(), Some("Sweden"));
        assert_eq!(server.id.as_deref(), Some("8"));
    }

    #[test]
    fn test_summary_fields() {
        assert_eq!(last_isp(SUMMARY).as_deref(), Some("Init7"));
        assert_eq!(last_packet_loss(SUMMARY), Some(0.5));
        assert_eq!(last_jitter(SUMMARY), Some(0.12));
        assert_eq!(
            last_result_url(SUMMARY).as_deref(),
            Some("https://www.speedtest.net/result/c/6c2c0ad3")
        );
    }

    #[test]
    fn test_legacy_jitter_format() {
        assert_eq!(last_jitter("Latency:    12.34 ms   (0.56 ms jitter)\n"), Some(0.56));
    }

    #[test]
    fn test_packet_loss_not_available() {
        assert_eq!(last_packet_loss(" Packet Loss: Not available.\n"), None);
    }

    #[test]
    fn test_transfer_details() {
        let down = last_transfer_details(SUMMARY, Phase::Download);
        assert_eq!(down.bytes, Some(1_000_000_000));
        assert_eq!(down.elapsed_ms, None);

        let up = last_transfer_details(SUMMARY, Phase::Upload);
        assert_eq!(up.bytes, Some(900_300_000));
        assert_eq!(up.elapsed_ms, Some(10_200));
    }

    #[test]
    fn test_external_ip_and_vpn() {
        let text = "External IP: 203.0.113.9\nVPN: yes\n";
        assert_eq!(last_external_ip(text).as_deref(), Some("203.0.113.9"));
        assert_eq!(last_vpn_flag(text), Some(true));
        assert_eq!(last_vpn_flag("nothing here"), None);
    }
}
